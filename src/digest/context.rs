use crate::digest::model::{Cluster, Message, Ts};
use crate::error::SourceError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// On-demand history access for sources that cannot hand over a whole channel.
pub trait ThreadFetcher {
    /// Up to `before` messages at or before `ts` and `after` messages after it.
    fn surrounding(
        &self,
        channel_id: &str,
        ts: Ts,
        before: usize,
        after: usize,
    ) -> Result<Vec<Message>, SourceError>;

    fn thread_replies(&self, channel_id: &str, thread_id: &str) -> Result<Vec<Message>, SourceError>;

    /// Link to the message at `ts`, when the source can produce one.
    fn permalink(&self, _channel_id: &str, _ts: Ts) -> Option<String> {
        None
    }
}

pub enum ContextSource<'a> {
    /// The channel's complete history, ordered oldest first.
    History(&'a [Message]),
    Fetch {
        fetcher: &'a dyn ThreadFetcher,
        channel_id: &'a str,
    },
}

/// Collect the conversation around `cluster`, never returning an empty list
/// for a non-empty cluster.
pub fn gather(cluster: &Cluster, source: &ContextSource<'_>, window: usize) -> Vec<Message> {
    let gathered = match source {
        ContextSource::History(all) => from_history(cluster, all, window),
        ContextSource::Fetch {
            fetcher,
            channel_id,
        } => from_fetch(cluster, *fetcher, channel_id, window),
    };
    if gathered.is_empty() {
        return cluster.plain_messages();
    }
    gathered
}

fn from_history(cluster: &Cluster, all: &[Message], window: usize) -> Vec<Message> {
    let wanted = cluster.ts_set();
    let mut hits = all
        .iter()
        .enumerate()
        .filter(|(_, m)| wanted.contains(&m.ts))
        .map(|(idx, _)| idx);
    let Some(first) = hits.next() else {
        return Vec::new();
    };
    let last = hits.last().unwrap_or(first);

    let start = first.saturating_sub(window);
    let end = (last + window + 1).min(all.len());
    all[start..end].to_vec()
}

fn from_fetch(
    cluster: &Cluster,
    fetcher: &dyn ThreadFetcher,
    channel_id: &str,
    window: usize,
) -> Vec<Message> {
    let (Some(first), Some(last)) = (cluster.first_ts(), cluster.last_ts()) else {
        return Vec::new();
    };

    let mut collected: Vec<Message> = Vec::new();
    let mut absorb = |result: Result<Vec<Message>, SourceError>| match result {
        Ok(messages) => collected.extend(messages),
        Err(err) => warn!(channel = channel_id, error = %err, "context fetch failed"),
    };

    absorb(fetcher.surrounding(channel_id, first, window, 0));
    absorb(fetcher.surrounding(channel_id, last, 0, window));

    let threads: BTreeSet<String> = cluster.thread_ids();
    for thread in &threads {
        absorb(fetcher.thread_replies(channel_id, thread));
    }

    let mut unique: BTreeMap<Ts, Message> = BTreeMap::new();
    for msg in cluster.plain_messages().into_iter().chain(collected) {
        unique.entry(msg.ts).or_insert(msg);
    }
    unique.into_values().collect()
}
