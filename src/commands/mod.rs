pub mod digest_run;
pub mod providers;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Plain-text rendering used when `--json` is not set.
    pub fn render_text(&self) -> String {
        let status = if self.ok { "ok" } else { "failed" };
        let mut out = format!("{}: {status}\n", self.command);
        for line in &self.details {
            out.push_str(&format!("  {line}\n"));
        }
        for line in &self.issues {
            out.push_str(&format!("  issue: {line}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::CommandReport;

    #[test]
    fn issues_flip_ok_and_render() {
        let mut report = CommandReport::new("kb");
        report.detail("articles=2");
        assert_eq!(report.render_text(), "kb: ok\n  articles=2\n");

        report.issue("provider down");
        assert!(!report.ok);
        assert!(report.render_text().starts_with("kb: failed\n"));
        assert!(report.render_text().contains("  issue: provider down\n"));
    }
}
