use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transport error ({transport}): {detail}")]
    Transport { transport: String, detail: String },

    #[error("Network error (status {status}): {detail}")]
    Network { status: u16, detail: String },

    #[error("Rate limited{}", retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for log fields and retry predicates.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Validation(_) => "validation",
            Error::InvalidState(_) => "invalid_state",
            Error::Auth(_) => "auth",
            Error::Transport { .. } => "transport",
            Error::Network { .. } => "network",
            Error::RateLimited { .. } => "rate_limited",
            Error::NotFound(_) => "not_found",
            Error::Memory(_) => "memory",
            Error::Timeout(_) => "timeout",
            Error::Unsupported(_) => "unsupported",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Other(_) => "other",
        }
    }

    /// Whether retrying the failed operation can possibly succeed.
    /// Auth, config, validation and state-machine violations are final.
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Config(_)
                | Error::Validation(_)
                | Error::InvalidState(_)
                | Error::Auth(_)
                | Error::Unsupported(_)
        )
    }

    pub fn transport(transport: &str, detail: impl Into<String>) -> Self {
        Error::Transport {
            transport: transport.to_string(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_not_recoverable() {
        assert!(!Error::Auth("bad token".into()).recoverable());
        assert!(!Error::Config("missing field".into()).recoverable());
        assert!(!Error::Validation("out of range".into()).recoverable());
        assert!(!Error::InvalidState("resume from stopped".into()).recoverable());
    }

    #[test]
    fn test_transient_errors_recoverable() {
        assert!(Error::Network { status: 503, detail: "unavailable".into() }.recoverable());
        assert!(Error::RateLimited { retry_after_ms: Some(1000) }.recoverable());
        assert!(Error::Memory("entry missing".into()).recoverable());
        assert!(Error::transport("http", "connection reset").recoverable());
    }

    #[test]
    fn test_codes_stable() {
        assert_eq!(Error::Auth("x".into()).code(), "auth");
        assert_eq!(Error::Network { status: 500, detail: String::new() }.code(), "network");
        assert_eq!(Error::RateLimited { retry_after_ms: None }.code(), "rate_limited");
    }
}
