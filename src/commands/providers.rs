use anyhow::Result;

use crate::commands::CommandReport;
use crate::digest::config::load_config;
use crate::digest::provider::{ProviderKind, build_provider, parse_provider_alias};

const ALL_KINDS: [ProviderKind; 4] = [
    ProviderKind::ClaudeCli,
    ProviderKind::ClaudeApi,
    ProviderKind::Ollama,
    ProviderKind::LmStudio,
];

/// Run each backend's availability check. With an explicit provider the
/// check must pass; otherwise at least one backend must be reachable.
pub fn run(only: Option<&str>) -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("providers");

    let kinds: Vec<ProviderKind> = match only {
        Some(raw) => match parse_provider_alias(raw) {
            Some(kind) => vec![kind],
            None => {
                report.issue(format!(
                    "unknown provider `{raw}`; valid options: cli, api, lmstudio, ollama"
                ));
                return Ok(report);
            }
        },
        None => ALL_KINDS.to_vec(),
    };

    let mut available = 0usize;
    for kind in &kinds {
        let mut provider_cfg = cfg.provider.clone();
        provider_cfg.kind = kind.label().to_string();
        match build_provider(&provider_cfg) {
            Ok(provider) => {
                available += 1;
                report.detail(format!("{}: available ({})", kind.label(), provider.name()));
            }
            Err(err) if only.is_some() => report.issue(format!("{}: {err}", kind.label())),
            Err(err) => report.detail(format!("{}: {err}", kind.label())),
        }
    }

    if only.is_none() && available == 0 {
        report.issue("no LLM provider is reachable");
    }
    report.detail(format!("default_provider={}", cfg.provider.kind));
    Ok(report)
}
