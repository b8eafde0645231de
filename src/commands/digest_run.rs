use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::digest::audit;
use crate::digest::config::{DigestConfig, load_config, validate};
use crate::digest::context::ThreadFetcher;
use crate::digest::model::RunMode;
use crate::digest::paths::resolve_paths;
use crate::digest::pipeline::{
    ChannelSpec, RunOutcome, RunRequest, analyze_channels, load_channels,
};
use crate::digest::provider::build_provider;
use crate::digest::report::{slugify, write_incident_report, write_kb};
use crate::digest::util::{format_utc_minute, now_epoch_secs};
use crate::error::DigestError;

#[derive(Debug, Clone, Default)]
pub struct DigestOptions {
    pub topic: String,
    pub channels: Vec<String>,
    pub urls: Vec<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub output: Option<PathBuf>,
    pub days: Option<u64>,
    pub no_cache: bool,
    pub cache_dir: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
}

fn non_empty_items(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn channel_spec(opts: &DigestOptions) -> Result<ChannelSpec> {
    let channels = non_empty_items(&opts.channels);
    let urls = non_empty_items(&opts.urls);
    match (channels.is_empty(), urls.is_empty()) {
        (false, true) => Ok(ChannelSpec::Api(channels)),
        (true, false) => Ok(ChannelSpec::Export(urls)),
        (true, true) => Err(DigestError::InvalidConfig(
            "one of --channels or --urls is required".to_string(),
        )
        .into()),
        (false, false) => Err(DigestError::InvalidConfig(
            "--channels and --urls cannot be combined".to_string(),
        )
        .into()),
    }
}

fn apply_overrides(cfg: &mut DigestConfig, opts: &DigestOptions) -> Result<()> {
    if let Some(kind) = &opts.provider {
        cfg.provider.kind = kind.clone();
    }
    if let Some(model) = &opts.model {
        cfg.provider.model = Some(model.clone());
        cfg.provider.ollama_model = model.clone();
        cfg.provider.lmstudio_model = Some(model.clone());
    }
    if let Some(days) = opts.days {
        cfg.slack.history_days = days;
    }
    validate(cfg)
}

fn default_output(mode: RunMode, topic: &str) -> PathBuf {
    let slug = slugify(topic);
    match mode {
        RunMode::Incidents => PathBuf::from(format!("{slug}-incidents.md")),
        RunMode::Kb => PathBuf::from(format!("{slug}-kb")),
    }
}

pub fn run(mode: RunMode, opts: &DigestOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new(mode.label());
    let topic = opts.topic.trim();
    if topic.is_empty() {
        return Err(DigestError::InvalidConfig("--topic cannot be empty".to_string()).into());
    }

    let mut cfg = load_config()?;
    apply_overrides(&mut cfg, opts)?;
    let channels = channel_spec(opts)?;
    let mut paths = resolve_paths()?;
    if let Some(dir) = &opts.cache_dir {
        paths.cache_dir = dir.clone();
    }
    if let Some(dir) = &opts.export_dir {
        paths.exports_dir = dir.clone();
    }

    let provider = build_provider(&cfg.provider)
        .map_err(|err| DigestError::NoProvider(err.to_string()))?;
    report.detail(format!("topic={topic}"));
    report.detail(format!("provider={}", provider.name()));

    let request = RunRequest {
        channels,
        use_cache: !opts.no_cache,
        cache_dir: paths.cache_dir.clone(),
        exports_dir: paths.exports_dir.clone(),
    };
    let (loaded, client) = load_channels(&request, &cfg.slack)?;
    let fetcher = client.as_ref().map(|c| c as &dyn ThreadFetcher);
    let result = analyze_channels(
        provider.as_ref(),
        fetcher,
        &loaded,
        mode,
        topic,
        &cfg.clustering,
        Some(&paths),
    );

    let stats = &result.stats;
    report.detail(format!(
        "channels={} messages={} relevant={} clusters={} units={} records={}",
        stats.channels, stats.messages, stats.relevant, stats.clusters, stats.units, stats.records
    ));
    match result.outcome {
        RunOutcome::NoMessages => report.detail("no messages found in any channel"),
        RunOutcome::NoRelevantMessages => {
            report.detail(format!("no messages related to \"{topic}\" found"))
        }
        RunOutcome::Complete => {}
    }

    let generated_at = format_utc_minute(now_epoch_secs()? as f64);
    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output(mode, topic));
    match mode {
        RunMode::Incidents => {
            let path = write_incident_report(
                &output,
                topic,
                &result.channel_labels,
                &result.incidents,
                &generated_at,
            )?;
            report.detail(format!("incidents={}", result.incidents.len()));
            report.detail(format!("report={}", path.display()));
        }
        RunMode::Kb => {
            let written = write_kb(
                &output,
                topic,
                &result.channel_labels,
                &result.articles,
                &generated_at,
            )
            .with_context(|| format!("failed to write knowledge base to {}", output.display()))?;
            report.detail(format!("articles={}", result.articles.len()));
            report.detail(format!("kb_dir={} files={}", output.display(), written.len()));
        }
    }

    if let Err(err) = audit::append_event(&paths, "render", "ok", &output.display().to_string()) {
        report.detail(format!("audit log skipped: {err:#}"));
    }
    Ok(report)
}
