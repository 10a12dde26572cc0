/// Shared error type used across all agentx crates.
///
/// Variants align with the error-kind taxonomy of §7: each carries a
/// free-form message and `kind()` returns the stable tag surfaced in
/// `stream.error` payloads and HTTP error bodies.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport: {0}")]
    Transport(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("input: {0}")]
    Input(String),

    #[error("tool: {0}")]
    Tool(String),

    #[error("interrupt: {0}")]
    Interrupt(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The stable kind tag surfaced to clients (§7 of the error taxonomy).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "internal",
            Error::Json(_) => "input",
            Error::Transport(_) => "transport",
            Error::Provider { .. } => "transport",
            Error::Timeout(_) => "timeout",
            Error::RateLimited(_) => "rate_limited",
            Error::Config(_) => "config",
            Error::Auth(_) => "config",
            Error::Input(_) => "input",
            Error::Tool(_) => "tool",
            Error::Interrupt(_) => "interrupt",
            Error::Busy(_) => "busy",
            Error::Internal(_) => "internal",
            Error::Other(_) => "internal",
        }
    }

    /// Whether this error is retryable at the LLM-call or tool layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Provider { .. } | Error::RateLimited(_) | Error::Timeout(_)
        )
    }

    /// Interrupts are never surfaced as `stream.error` (§7).
    pub fn is_surfaceable(&self) -> bool {
        !matches!(self, Error::Interrupt(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_match_taxonomy() {
        assert_eq!(Error::Input("x".into()).kind(), "input");
        assert_eq!(Error::Busy("x".into()).kind(), "busy");
        assert_eq!(Error::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(Error::Auth("x".into()).kind(), "config");
    }

    #[test]
    fn transport_rate_limited_and_timeout_are_retryable() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::Provider { provider: "p".into(), message: "500".into() }.is_retryable());
        assert!(Error::RateLimited("429".into()).is_retryable());
        assert!(Error::Timeout("exceeded".into()).is_retryable());
        assert!(!Error::Input("bad".into()).is_retryable());
        assert!(!Error::Tool("boom".into()).is_retryable());
    }

    #[test]
    fn interrupt_never_surfaceable() {
        assert!(!Error::Interrupt("user".into()).is_surfaceable());
        assert!(Error::Internal("bug".into()).is_surfaceable());
    }
}
