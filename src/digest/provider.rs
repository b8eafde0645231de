use crate::digest::config::ProviderConfig;
use crate::digest::util::run_command_with_stdin;
use crate::error::ProviderError;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

const PROBE_TIMEOUT_SECS: u64 = 5;
const CLI_VERSION_TIMEOUT_SECS: u64 = 10;
const CLAUDE_TIMEOUT_SECS: u64 = 120;
const LOCAL_TIMEOUT_SECS: u64 = 300;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const JSON_ONLY_SYSTEM_PROMPT: &str = "You are a JSON-only assistant. You output ONLY valid JSON with no explanation, commentary, or thinking. Never include text outside the JSON.";

/// A text-completion backend. Implementations check availability when they
/// are built and report every later transport failure as `ProviderError::Backend`.
pub trait LlmProvider {
    fn name(&self) -> String;
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    ClaudeCli,
    ClaudeApi,
    LmStudio,
    Ollama,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::ClaudeCli => "cli",
            ProviderKind::ClaudeApi => "api",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::Ollama => "ollama",
        }
    }
}

pub fn parse_provider_alias(raw: &str) -> Option<ProviderKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "cli" | "claude-cli" => Some(ProviderKind::ClaudeCli),
        "api" | "claude-api" | "anthropic" => Some(ProviderKind::ClaudeApi),
        "lmstudio" | "lm-studio" => Some(ProviderKind::LmStudio),
        "ollama" => Some(ProviderKind::Ollama),
        _ => None,
    }
}

/// Build the configured backend, running its availability check.
pub fn build_provider(cfg: &ProviderConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
    let kind = parse_provider_alias(&cfg.kind).ok_or_else(|| {
        ProviderError::unavailable(
            cfg.kind.clone(),
            "unknown provider; valid options: cli, api, lmstudio, ollama",
        )
    })?;
    let provider: Box<dyn LlmProvider> = match kind {
        ProviderKind::ClaudeCli => Box::new(ClaudeCliProvider::new(
            cfg.claude_bin.clone(),
            cfg.model.clone(),
        )?),
        ProviderKind::ClaudeApi => Box::new(ClaudeApiProvider::new(
            cfg.api_key.clone().unwrap_or_default(),
            cfg.model.clone().unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.to_string()),
            cfg.api_base.clone(),
        )?),
        ProviderKind::LmStudio => Box::new(LmStudioProvider::new(
            cfg.lmstudio_model.clone(),
            cfg.lmstudio_url.clone(),
        )?),
        ProviderKind::Ollama => Box::new(OllamaProvider::new(
            cfg.ollama_model.clone(),
            cfg.ollama_url.clone(),
        )?),
    };
    Ok(provider)
}

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-6";

fn http_client(provider: &str, timeout_secs: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| ProviderError::unavailable(provider, format!("http client: {err}")))
}

fn send_for_json(request: RequestBuilder, provider: &str) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .map_err(|err| ProviderError::backend(provider, err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ProviderError::backend(
            provider,
            format!("status {status}: {}", body.trim()),
        ));
    }
    response
        .json::<Value>()
        .map_err(|err| ProviderError::backend(provider, format!("invalid JSON body: {err}")))
}

fn probe(request: RequestBuilder, provider: &str, hint: &str) -> Result<Value, ProviderError> {
    send_for_json(request.timeout(Duration::from_secs(PROBE_TIMEOUT_SECS)), provider).map_err(
        |err| match err {
            ProviderError::Backend { reason, .. } => {
                ProviderError::unavailable(provider, format!("{reason}. {hint}"))
            }
            other => other,
        },
    )
}

fn non_empty(provider: &str, text: String) -> Result<String, ProviderError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::backend(provider, "empty completion"));
    }
    Ok(trimmed.to_string())
}

fn extract_anthropic_text(json: &Value) -> Option<String> {
    let mut chunks = Vec::new();
    let content = json.get("content").and_then(Value::as_array)?;
    for part in content {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            chunks.push(text.to_string());
        }
    }
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

fn extract_openai_compatible_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let mut chunks = Vec::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    chunks.push(text.to_string());
                }
            }
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

fn extract_ollama_text(json: &Value) -> Option<String> {
    json.get("response")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn first_model_id(json: &Value) -> Option<String> {
    json.get("data")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|item| item.get("id").and_then(Value::as_str))
        .map(str::to_string)
}

pub struct ClaudeApiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl ClaudeApiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, ProviderError> {
        let label = "claude-api";
        if api_key.trim().is_empty() {
            return Err(ProviderError::unavailable(
                label,
                "API key is required (set ANTHROPIC_API_KEY or provider.api_key)",
            ));
        }
        let provider = Self {
            api_key: api_key.trim().to_string(),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(label, CLAUDE_TIMEOUT_SECS)?,
        };
        probe(
            provider
                .client
                .get(format!("{}/v1/models", provider.base_url))
                .header("x-api-key", &provider.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            label,
            "Check the API key and network access to the Anthropic API.",
        )?;
        Ok(provider)
    }
}

impl LlmProvider for ClaudeApiProvider {
    fn name(&self) -> String {
        format!("Claude API ({})", self.model)
    }

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let label = "claude-api";
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });
        let json = send_for_json(
            self.client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&payload),
            label,
        )?;
        let text = extract_anthropic_text(&json)
            .ok_or_else(|| ProviderError::backend(label, "response missing text content"))?;
        non_empty(label, text)
    }
}

pub struct ClaudeCliProvider {
    bin: PathBuf,
    model: Option<String>,
}

impl ClaudeCliProvider {
    pub fn new(bin: Option<PathBuf>, model: Option<String>) -> Result<Self, ProviderError> {
        let label = "claude-cli";
        let bin = match bin {
            Some(path) if path.exists() => path,
            Some(path) => {
                return Err(ProviderError::unavailable(
                    label,
                    format!("claude binary not found at {}", path.display()),
                ));
            }
            None => which::which("claude").map_err(|_| {
                ProviderError::unavailable(
                    label,
                    "Claude Code CLI not found on PATH. Install it or use a different provider.",
                )
            })?,
        };

        let out = run_command_with_stdin(
            Command::new(&bin).arg("--version"),
            "",
            CLI_VERSION_TIMEOUT_SECS,
        )
        .map_err(|err| ProviderError::unavailable(label, format!("version check failed: {err}")))?;
        if !out.status.success() {
            return Err(ProviderError::unavailable(
                label,
                format!(
                    "version check exited with {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
        }

        Ok(Self {
            bin,
            model: model.filter(|m| !m.trim().is_empty()),
        })
    }
}

impl LlmProvider for ClaudeCliProvider {
    fn name(&self) -> String {
        match &self.model {
            Some(model) => format!("Claude CLI ({model})"),
            None => "Claude CLI".to_string(),
        }
    }

    // The CLI has no output-length flag, so `max_tokens` is not forwarded.
    fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
        let label = "claude-cli";
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-p", "--output-format", "text"]);
        if let Some(model) = &self.model {
            cmd.args(["--model", model]);
        }
        let out = run_command_with_stdin(&mut cmd, prompt, CLAUDE_TIMEOUT_SECS)
            .map_err(|err| ProviderError::backend(label, err.to_string()))?;
        if !out.status.success() {
            return Err(ProviderError::backend(
                label,
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        non_empty(label, String::from_utf8_lossy(&out.stdout).to_string())
    }
}

pub struct OllamaProvider {
    model: String,
    base_url: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(model: String, base_url: String) -> Result<Self, ProviderError> {
        let label = "ollama";
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = http_client(label, LOCAL_TIMEOUT_SECS)?;
        probe(
            client.get(format!("{base_url}/api/tags")),
            label,
            &format!("Cannot connect to Ollama at {base_url}. Make sure Ollama is running."),
        )?;
        Ok(Self {
            model,
            base_url,
            client,
        })
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> String {
        format!("Ollama ({})", self.model)
    }

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let label = "ollama";
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {"num_predict": max_tokens}
        });
        let json = send_for_json(
            self.client
                .post(format!("{}/api/generate", self.base_url))
                .json(&payload),
            label,
        )?;
        let text = extract_ollama_text(&json)
            .ok_or_else(|| ProviderError::backend(label, "response missing `response` field"))?;
        non_empty(label, text)
    }
}

pub struct LmStudioProvider {
    model: Option<String>,
    base_url: String,
    client: Client,
}

impl LmStudioProvider {
    pub fn new(model: Option<String>, base_url: String) -> Result<Self, ProviderError> {
        let label = "lmstudio";
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = http_client(label, LOCAL_TIMEOUT_SECS)?;
        let models = probe(
            client.get(format!("{base_url}/v1/models")),
            label,
            &format!(
                "Cannot connect to LM Studio at {base_url}. Make sure its local server is running."
            ),
        )?;
        let model = model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| first_model_id(&models));
        Ok(Self {
            model,
            base_url,
            client,
        })
    }
}

impl LlmProvider for LmStudioProvider {
    fn name(&self) -> String {
        format!("LM Studio ({})", self.model.as_deref().unwrap_or("auto"))
    }

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let label = "lmstudio";
        let mut payload = serde_json::json!({
            "messages": [
                {"role": "system", "content": JSON_ONLY_SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": max_tokens,
            "stream": false,
            "temperature": 0.1
        });
        if let Some(model) = &self.model {
            payload["model"] = Value::String(model.clone());
        }
        let json = send_for_json(
            self.client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .json(&payload),
            label,
        )?;
        let text = extract_openai_compatible_text(&json)
            .ok_or_else(|| ProviderError::backend(label, "response missing message content"))?;
        non_empty(label, text)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ClaudeCliProvider, LlmProvider, OllamaProvider, ProviderKind, build_provider,
        extract_anthropic_text, extract_ollama_text, extract_openai_compatible_text,
        first_model_id, parse_provider_alias,
    };
    use crate::digest::config::ProviderConfig;
    use crate::error::ProviderError;
    use serde_json::json;
    use std::fs;
    use std::net::TcpListener;
    use std::path::Path;
    use tempfile::tempdir;

    fn closed_local_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    #[cfg(unix)]
    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, body).expect("write script");
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    #[test]
    fn provider_aliases_resolve() {
        assert_eq!(parse_provider_alias("CLI"), Some(ProviderKind::ClaudeCli));
        assert_eq!(parse_provider_alias("claude-api"), Some(ProviderKind::ClaudeApi));
        assert_eq!(parse_provider_alias("lm-studio"), Some(ProviderKind::LmStudio));
        assert_eq!(parse_provider_alias("ollama"), Some(ProviderKind::Ollama));
        assert_eq!(parse_provider_alias("gpt"), None);
    }

    #[test]
    fn response_shapes_are_read() {
        let anthropic = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(extract_anthropic_text(&anthropic).as_deref(), Some("a\nb"));

        let compat = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_openai_compatible_text(&compat).as_deref(), Some("hi"));

        let ollama = json!({"response": "out", "done": true});
        assert_eq!(extract_ollama_text(&ollama).as_deref(), Some("out"));

        let models = json!({"data": [{"id": "qwen2.5-7b"}, {"id": "other"}]});
        assert_eq!(first_model_id(&models).as_deref(), Some("qwen2.5-7b"));
        assert_eq!(first_model_id(&json!({"data": []})), None);
    }

    #[test]
    fn unknown_kind_is_unavailable() {
        let cfg = ProviderConfig {
            kind: "gpt".to_string(),
            ..ProviderConfig::default()
        };
        let err = build_provider(&cfg).err().expect("should fail");
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[test]
    fn unreachable_ollama_fails_at_construction() {
        let err = OllamaProvider::new("llama3.1".to_string(), closed_local_url())
            .err()
            .expect("should fail");
        match err {
            ProviderError::Unavailable { reason, .. } => {
                assert!(reason.contains("Cannot connect to Ollama"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn api_provider_requires_key() {
        let cfg = ProviderConfig {
            kind: "api".to_string(),
            api_key: Some("  ".to_string()),
            ..ProviderConfig::default()
        };
        let err = build_provider(&cfg).err().expect("should fail");
        assert!(err.to_string().contains("API key is required"));
    }

    #[test]
    fn missing_cli_binary_is_unavailable() {
        let tmp = tempdir().expect("tempdir");
        let err = ClaudeCliProvider::new(Some(tmp.path().join("nope")), None)
            .err()
            .expect("should fail");
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn cli_provider_pipes_prompt_and_reports_failures() {
        let tmp = tempdir().expect("tempdir");
        let ok_bin = tmp.path().join("claude-ok");
        write_script(
            &ok_bin,
            "#!/usr/bin/env bash\nif [[ \"${1:-}\" == \"--version\" ]]; then echo 1.0; exit 0; fi\nprompt=$(cat)\necho \"echo: ${prompt} model=${5:-none}\"\n",
        );
        let provider =
            ClaudeCliProvider::new(Some(ok_bin), Some("opus".to_string())).expect("construct");
        assert_eq!(provider.name(), "Claude CLI (opus)");
        let out = provider.complete("ping", 100).expect("complete");
        assert_eq!(out, "echo: ping model=opus");

        let bad_bin = tmp.path().join("claude-bad");
        write_script(
            &bad_bin,
            "#!/usr/bin/env bash\nif [[ \"${1:-}\" == \"--version\" ]]; then echo 1.0; exit 0; fi\ncat >/dev/null\necho 'rate limited' >&2\nexit 3\n",
        );
        let provider = ClaudeCliProvider::new(Some(bad_bin), None).expect("construct");
        let err = provider.complete("ping", 100).expect_err("should fail");
        match err {
            ProviderError::Backend { reason, .. } => assert_eq!(reason, "rate limited"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
