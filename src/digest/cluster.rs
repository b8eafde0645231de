use crate::digest::model::{Cluster, RelevantMessage};
use std::collections::BTreeSet;

/// Group relevant messages into clusters by time proximity.
///
/// Messages are sorted first, so out-of-order input cannot open a spurious
/// cluster. A new cluster starts whenever the gap to the previous message
/// exceeds `gap_seconds`. With `merge_threads`, clusters that reference a
/// common thread are then folded together until no pair shares one.
pub fn cluster(
    messages: Vec<RelevantMessage>,
    gap_seconds: f64,
    merge_threads: bool,
) -> Vec<Cluster> {
    let mut sorted = messages;
    sorted.sort_by_key(|m| m.message.ts);

    let mut clusters: Vec<Vec<RelevantMessage>> = Vec::new();
    for msg in sorted {
        match clusters.last_mut() {
            Some(open)
                if open.last().is_some_and(|prev| {
                    msg.message.ts.as_secs_f64() - prev.message.ts.as_secs_f64() <= gap_seconds
                }) =>
            {
                open.push(msg);
            }
            _ => clusters.push(vec![msg]),
        }
    }

    let mut out: Vec<Cluster> = clusters
        .into_iter()
        .map(|messages| Cluster { messages })
        .collect();
    if merge_threads {
        out = merge_shared_threads(out);
    }
    out
}

fn merge_shared_threads(clusters: Vec<Cluster>) -> Vec<Cluster> {
    let mut slots: Vec<(Cluster, BTreeSet<String>)> = clusters
        .into_iter()
        .map(|c| {
            let threads = c.thread_ids();
            (c, threads)
        })
        .collect();

    loop {
        let mut merged_pair = None;
        'scan: for i in 0..slots.len() {
            for j in (i + 1)..slots.len() {
                if !slots[i].1.is_disjoint(&slots[j].1) {
                    merged_pair = Some((i, j));
                    break 'scan;
                }
            }
        }
        let Some((i, j)) = merged_pair else {
            break;
        };
        let (absorbed, threads) = slots.remove(j);
        let receiver = &mut slots[i];
        receiver.0.messages.extend(absorbed.messages);
        receiver.0.messages.sort_by_key(|m| m.message.ts);
        receiver.1.extend(threads);
    }

    let mut out: Vec<Cluster> = slots.into_iter().map(|(c, _)| c).collect();
    out.sort_by_key(|c| c.first_ts());
    out
}
