use std::env;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn filter_directive(digest_log: Option<String>, rust_log: Option<String>) -> String {
    digest_log
        .or(rust_log)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the stderr subscriber. Stdout stays reserved for command reports.
pub fn init() {
    let directive = filter_directive(env::var("DIGEST_LOG").ok(), env::var("RUST_LOG").ok());
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::filter_directive;

    #[test]
    fn digest_log_wins_over_rust_log() {
        assert_eq!(
            filter_directive(Some("debug".to_string()), Some("warn".to_string())),
            "debug"
        );
        assert_eq!(filter_directive(None, Some("warn".to_string())), "warn");
        assert_eq!(filter_directive(Some("  ".to_string()), None), "info");
        assert_eq!(filter_directive(None, None), "info");
    }
}
