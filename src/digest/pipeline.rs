use crate::digest::analyze::{extract_knowledge, group_topics, summarize_incident, synthesize_article};
use crate::digest::audit;
use crate::digest::cache;
use crate::digest::classify::classify;
use crate::digest::cluster::cluster;
use crate::digest::config::{ClusteringConfig, SlackConfig};
use crate::digest::context::{ContextSource, ThreadFetcher, gather};
use crate::digest::dedup::dedup;
use crate::digest::model::{
    Article, ContextUnit, ExtractionRecord, IncidentEntry, Message, RelevantMessage, RunMode,
};
use crate::digest::paths::DigestPaths;
use crate::digest::provider::LlmProvider;
use crate::slack::client::SlackClient;
use crate::slack::scraped::{convert_scraped, read_export};
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where a run's channels come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpec {
    /// Slack Web API, by channel name or id.
    Api(Vec<String>),
    /// Scraped channel exports, by channel URL.
    Export(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub channels: ChannelSpec,
    pub use_cache: bool,
    pub cache_dir: PathBuf,
    pub exports_dir: PathBuf,
}

/// One channel's full message list plus what is needed to look up more.
#[derive(Debug, Clone)]
pub struct LoadedChannel {
    pub label: String,
    /// Slack channel id, set only when the channel can be queried live.
    pub channel_id: Option<String>,
    /// Link used for every unit when no per-message permalink exists.
    pub link: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    NoMessages,
    NoRelevantMessages,
    Complete,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub channels: usize,
    pub messages: usize,
    pub relevant: usize,
    pub clusters: usize,
    pub units: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub channel_labels: Vec<String>,
    pub incidents: Vec<IncidentEntry>,
    pub articles: Vec<Article>,
    pub stats: RunStats,
}

impl RunResult {
    fn empty(outcome: RunOutcome, channel_labels: Vec<String>, stats: RunStats) -> Self {
        Self {
            outcome,
            channel_labels,
            incidents: Vec::new(),
            articles: Vec::new(),
            stats,
        }
    }
}

/// Last non-empty path segment of a channel URL, used as its label.
pub fn channel_label_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .unwrap_or_default()
        .split('/')
        .rev()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("channel")
        .to_string()
}

fn looks_like_channel_id(raw: &str) -> bool {
    raw.len() >= 9
        && raw.starts_with(['C', 'G', 'D'])
        && raw.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Raw rows for one channel, from the cache when allowed, otherwise from
/// `load` with the result written back. Conversion happens after this.
fn cached_or<T, F>(req: &RunRequest, key: &str, label: &str, load: F) -> Vec<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<Vec<T>>,
{
    if req.use_cache
        && let Some(rows) = cache::load(&req.cache_dir, key)
    {
        info!(channel = label, count = rows.len(), "loaded raw messages from cache");
        return rows;
    }
    match load() {
        Ok(rows) => {
            if let Err(err) = cache::save(&req.cache_dir, key, &rows) {
                warn!(channel = label, error = %err, "failed to write message cache");
            }
            rows
        }
        Err(err) => {
            warn!(channel = label, error = %format!("{err:#}"), "channel load failed");
            Vec::new()
        }
    }
}

fn load_export_channels(req: &RunRequest, urls: &[String]) -> Vec<LoadedChannel> {
    urls.iter()
        .map(|url| {
            let label = channel_label_from_url(url);
            let export_path = cache::cache_path(&req.exports_dir, url);
            let rows = cached_or(req, url, &label, || read_export(&export_path));
            let messages = convert_scraped(rows);
            info!(channel = %label, count = messages.len(), "channel loaded");
            LoadedChannel {
                label,
                channel_id: None,
                link: Some(url.clone()),
                messages,
            }
        })
        .collect()
}

fn load_api_channels(
    req: &RunRequest,
    client: &SlackClient,
    names: &[String],
    history_days: u64,
) -> Vec<LoadedChannel> {
    let listed = client.resolve_channel_ids(names).unwrap_or_else(|err| {
        warn!(error = %err, "channel listing failed; using names as ids");
        BTreeMap::new()
    });

    names
        .iter()
        .map(|raw| raw.trim().trim_start_matches('#').to_string())
        .filter(|name| !name.is_empty())
        .map(|name| {
            let by_id = listed.iter().find(|(_, id)| **id == name);
            let (label, channel_id) = match (listed.get(&name), by_id) {
                (Some(id), _) => (name.clone(), Some(id.clone())),
                (None, Some((listed_name, id))) => (listed_name.clone(), Some(id.clone())),
                (None, None) if looks_like_channel_id(&name) => (name.clone(), Some(name.clone())),
                (None, None) => {
                    warn!(channel = %name, "channel not found");
                    (name.clone(), None)
                }
            };
            let messages = match &channel_id {
                Some(id) => {
                    let raw = cached_or(req, id, &label, || {
                        Ok(client.fetch_history(id, history_days)?)
                    });
                    client.to_messages(&raw)
                }
                None => Vec::new(),
            };
            info!(channel = %label, count = messages.len(), "channel loaded");
            LoadedChannel {
                label,
                channel_id,
                link: None,
                messages,
            }
        })
        .collect()
}

/// Message sources for a run, plus the live client when one is needed.
pub fn load_channels(
    req: &RunRequest,
    slack: &SlackConfig,
) -> Result<(Vec<LoadedChannel>, Option<SlackClient>)> {
    match &req.channels {
        ChannelSpec::Export(urls) => Ok((load_export_channels(req, urls), None)),
        ChannelSpec::Api(names) => {
            let client = SlackClient::new(slack)?;
            let channels = load_api_channels(req, &client, names, slack.history_days);
            Ok((channels, Some(client)))
        }
    }
}

fn build_units(
    channel: &LoadedChannel,
    relevant: Vec<RelevantMessage>,
    fetcher: Option<&dyn ThreadFetcher>,
    clustering: &ClusteringConfig,
    stats: &mut RunStats,
) -> Vec<ContextUnit> {
    let live = fetcher.zip(channel.channel_id.as_deref());
    let source = match live {
        Some((fetcher, channel_id)) => ContextSource::Fetch {
            fetcher,
            channel_id,
        },
        None => ContextSource::History(&channel.messages),
    };

    let clusters = cluster(relevant, clustering.gap_seconds(), true);
    stats.clusters += clusters.len();

    let units: Vec<ContextUnit> = clusters
        .into_iter()
        .map(|c| {
            let context = gather(&c, &source, clustering.context_window);
            ContextUnit::new(c, context, &channel.label)
        })
        .collect();
    let before = units.len();
    let mut units = dedup(units, clustering.overlap_threshold);
    info!(
        channel = %channel.label,
        clusters = before,
        units = units.len(),
        "clusters deduplicated"
    );

    for unit in &mut units {
        unit.permalink = match (live, unit.cluster.first_ts()) {
            (Some((fetcher, channel_id)), Some(ts)) => fetcher.permalink(channel_id, ts),
            _ => None,
        }
        .or_else(|| channel.link.clone());
    }
    stats.units += units.len();
    units
}

fn audit(paths: Option<&DigestPaths>, phase: &str, message: &str) {
    if let Some(paths) = paths
        && let Err(err) = audit::append_event(paths, phase, "ok", message)
    {
        warn!(phase, error = %format!("{err:#}"), "audit append failed");
    }
}

/// Classify, cluster, gather, deduplicate and analyze already-loaded
/// channels. Channels are processed in order, clusters in time order.
pub fn analyze_channels(
    provider: &dyn LlmProvider,
    fetcher: Option<&dyn ThreadFetcher>,
    channels: &[LoadedChannel],
    mode: RunMode,
    topic: &str,
    clustering: &ClusteringConfig,
    paths: Option<&DigestPaths>,
) -> RunResult {
    let labels: Vec<String> = channels.iter().map(|c| c.label.clone()).collect();
    let mut stats = RunStats {
        channels: channels.len(),
        messages: channels.iter().map(|c| c.messages.len()).sum(),
        ..RunStats::default()
    };
    audit(paths, "load", &format!("{} messages", stats.messages));
    if stats.messages == 0 {
        info!("no messages found in any channel");
        return RunResult::empty(RunOutcome::NoMessages, labels, stats);
    }

    let relevant: Vec<Vec<RelevantMessage>> = channels
        .iter()
        .map(|c| {
            if c.messages.is_empty() {
                return Vec::new();
            }
            let hits = classify(provider, &c.messages, topic, mode, &c.label);
            info!(channel = %c.label, total = c.messages.len(), relevant = hits.len(), "classified");
            hits
        })
        .collect();
    stats.relevant = relevant.iter().map(Vec::len).sum();
    audit(paths, "classify", &format!("{} relevant", stats.relevant));
    if stats.relevant == 0 {
        info!(topic, "no relevant messages found");
        return RunResult::empty(RunOutcome::NoRelevantMessages, labels, stats);
    }

    let mut incidents = Vec::new();
    let mut records: Vec<ExtractionRecord> = Vec::new();
    for (channel, hits) in channels.iter().zip(relevant) {
        if hits.is_empty() {
            continue;
        }
        let units = build_units(channel, hits, fetcher, clustering, &mut stats);
        for unit in units {
            match mode {
                RunMode::Incidents => {
                    let summary = summarize_incident(provider, &unit, topic);
                    info!(channel = %unit.channel_label, title = %summary.title, "incident summarized");
                    incidents.push(IncidentEntry {
                        summary,
                        channel: unit.channel_label.clone(),
                        date: unit.date.clone(),
                        participants: unit.participants.iter().cloned().collect(),
                        permalink: unit.permalink.clone(),
                        context_messages: unit.context_messages,
                    });
                }
                RunMode::Kb => {
                    let record = extract_knowledge(provider, &unit, topic);
                    info!(channel = %unit.channel_label, title = %record.title, "knowledge extracted");
                    records.push(record);
                }
            }
        }
    }
    stats.records = incidents.len() + records.len();
    audit(paths, "analyze", &format!("{} records", stats.records));

    let mut articles = Vec::new();
    if mode == RunMode::Kb {
        let groups = group_topics(provider, &records);
        info!(records = records.len(), groups = groups.len(), "records grouped");
        articles = groups
            .iter()
            .filter_map(|g| synthesize_article(provider, g, &records, topic))
            .collect();
        audit(paths, "synthesize", &format!("{} articles", articles.len()));
    }

    RunResult {
        outcome: RunOutcome::Complete,
        channel_labels: labels,
        incidents,
        articles,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ChannelSpec, LoadedChannel, RunOutcome, RunRequest, analyze_channels,
        channel_label_from_url, load_export_channels, looks_like_channel_id,
    };
    use crate::digest::cache;
    use crate::digest::config::ClusteringConfig;
    use crate::digest::model::{Message, RunMode, Severity, Ts};
    use crate::digest::provider::LlmProvider;
    use crate::error::ProviderError;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    /// Answers by prompt kind so one provider can drive a whole run.
    struct RoutingProvider {
        classify: String,
        extract: String,
        summary: String,
        group: String,
        synth: String,
        prompts: RefCell<Vec<String>>,
    }

    impl Default for RoutingProvider {
        fn default() -> Self {
            Self {
                classify: "[]".to_string(),
                extract: "{\"title\": \"Rotate keys\", \"category\": \"How-To\", \"content\": \"Use the console.\", \"tags\": [\"keys\"], \"source_summary\": \"Key rotation.\"}".to_string(),
                summary: "{\"title\": \"Key leak\", \"summary\": \"A key leaked.\", \"key_quotes\": [], \"severity\": \"serious\"}".to_string(),
                group: "not json".to_string(),
                synth: "not json".to_string(),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl LlmProvider for RoutingProvider {
        fn name(&self) -> String {
            "routing".to_string()
        }

        fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            let reply = if prompt.starts_with("You classify") {
                &self.classify
            } else if prompt.starts_with("You turn chat") {
                &self.extract
            } else if prompt.starts_with("You write incident") {
                &self.summary
            } else if prompt.starts_with("You group") {
                &self.group
            } else {
                &self.synth
            };
            Ok(reply.clone())
        }
    }

    fn channel(label: &str, secs: &[i64]) -> LoadedChannel {
        LoadedChannel {
            label: label.to_string(),
            channel_id: None,
            link: Some(format!("https://x.slack.com/archives/{label}")),
            messages: secs
                .iter()
                .map(|s| Message::new(Ts::from_secs(*s), "ana", format!("m{s}")))
                .collect(),
        }
    }

    #[test]
    fn url_labels_and_id_shapes() {
        assert_eq!(channel_label_from_url("https://a.slack.com/archives/C01ABCDEF/"), "C01ABCDEF");
        assert_eq!(channel_label_from_url(""), "channel");
        assert!(looks_like_channel_id("C01ABCDEFG"));
        assert!(!looks_like_channel_id("general"));
    }

    #[test]
    fn no_messages_short_circuits() {
        let provider = RoutingProvider::default();
        let got = analyze_channels(
            &provider,
            None,
            &[channel("a", &[])],
            RunMode::Kb,
            "keys",
            &ClusteringConfig::default(),
            None,
        );
        assert_eq!(got.outcome, RunOutcome::NoMessages);
        assert!(provider.prompts.borrow().is_empty());
    }

    #[test]
    fn no_relevant_messages_short_circuits() {
        let provider = RoutingProvider::default();
        let got = analyze_channels(
            &provider,
            None,
            &[channel("a", &[1, 2, 3])],
            RunMode::Incidents,
            "keys",
            &ClusteringConfig::default(),
            None,
        );
        assert_eq!(got.outcome, RunOutcome::NoRelevantMessages);
        assert_eq!(got.stats.messages, 3);
        assert_eq!(provider.prompts.borrow().len(), 1);
    }

    #[test]
    fn incident_run_yields_one_entry_per_deduplicated_unit() {
        let provider = RoutingProvider {
            classify: "[0, 1, 3]".to_string(),
            ..RoutingProvider::default()
        };
        // 0 and 60 cluster together; 100000 is its own cluster.
        let got = analyze_channels(
            &provider,
            None,
            &[channel("ops", &[0, 60, 120, 100_000])],
            RunMode::Incidents,
            "keys",
            &ClusteringConfig {
                context_window: 1,
                overlap_threshold: 0.9,
                ..ClusteringConfig::default()
            },
            None,
        );
        assert_eq!(got.outcome, RunOutcome::Complete);
        assert_eq!(got.stats.clusters, 2);
        assert_eq!(got.incidents.len(), 2);
        let first = &got.incidents[0];
        assert_eq!(first.summary.severity, Severity::Serious);
        assert_eq!(first.channel, "ops");
        assert_eq!(first.date, "1970-01-01");
        assert_eq!(first.context_messages.len(), 3);
        assert_eq!(
            first.permalink.as_deref(),
            Some("https://x.slack.com/archives/ops")
        );
    }

    #[test]
    fn kb_run_groups_and_falls_back_to_concatenation() {
        let provider = RoutingProvider {
            classify: "[0]".to_string(),
            group: "[{\"group_title\": \"Key rotation\", \"indices\": [0, 1]}]".to_string(),
            ..RoutingProvider::default()
        };
        let got = analyze_channels(
            &provider,
            None,
            &[channel("eng", &[0]), channel("ops", &[500_000])],
            RunMode::Kb,
            "keys",
            &ClusteringConfig::default(),
            None,
        );
        assert_eq!(got.stats.records, 2);
        assert_eq!(got.articles.len(), 1);
        let article = &got.articles[0];
        assert_eq!(article.title, "Key rotation");
        assert_eq!(article.content, "Use the console.\n\nUse the console.");
        assert_eq!(article.source_channels, vec!["eng", "ops"]);
    }

    #[test]
    fn export_rows_are_cached_raw_and_converted_on_every_load() {
        let tmp = tempdir().expect("tempdir");
        let url = "https://x.slack.com/archives/C0OPS".to_string();
        let req = RunRequest {
            channels: ChannelSpec::Export(vec![url.clone()]),
            use_cache: true,
            cache_dir: tmp.path().join("cache"),
            exports_dir: tmp.path().join("exports"),
        };
        fs::create_dir_all(&req.exports_dir).expect("mkdir");
        let export = cache::cache_path(&req.exports_dir, &url);
        fs::write(
            &export,
            r#"[{"day_divider": true, "text": "Today"},
                {"sender": "ana", "ts_value": "1700000000.000000", "text": "db is down", "key": "k1"},
                {"sender": "bo", "ts_value": 1700000060.0, "text": "  ", "key": "k2"}]"#,
        )
        .expect("write export");

        let first = load_export_channels(&req, std::slice::from_ref(&url));
        assert_eq!(first[0].messages.len(), 1);

        let cached = fs::read_to_string(cache::cache_path(&req.cache_dir, &url)).expect("cache");
        let rows: Vec<serde_json::Value> = serde_json::from_str(&cached).expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["day_divider"], serde_json::json!(true));

        fs::remove_file(&export).expect("remove export");
        let second = load_export_channels(&req, std::slice::from_ref(&url));
        assert_eq!(second[0].messages, first[0].messages);
        assert_eq!(second[0].messages[0].text, "db is down");
    }
}
