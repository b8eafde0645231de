use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no LLM provider reachable: {0}")]
    NoProvider(String),
}

/// Failure of an LLM backend. Every provider maps its transport errors onto
/// these two kinds so callers never branch on the backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
    #[error("{provider} call failed: {reason}")]
    Backend { provider: String, reason: String },
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("no valid JSON found in response: {snippet}")]
pub struct ParseError {
    pub snippet: String,
}

/// Outcome of a single LLM call wrapper; the orchestration layer swaps in
/// the fallback record on either variant.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Backend(#[from] ProviderError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl CallError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
        }
    }
}

#[derive(Debug, Error)]
#[error("message source failed ({operation}): {reason}")]
pub struct SourceError {
    pub operation: String,
    pub reason: String,
}

impl SourceError {
    pub fn new(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
