use thiserror::Error;

/// One failed attempt inside an exhausted request, kept for the aggregate error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// `"proxy 7 (1.2.3.4:8080)"` or `"direct"`.
    pub via: String,
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.via, self.reason)
    }
}

/// Unified error type for the trawl proxy pool
#[derive(Error, Debug)]
pub enum TrawlError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("Database query timed out")]
    QueryTimeout,

    // Circuit breaker
    #[error("Circuit breaker is open")]
    BreakerOpen,

    // Proxy errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i32 },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Invalid proxy port: {0}")]
    InvalidPort(i64),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Fetch errors
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Fetch attempt timed out")]
    AttemptTimeout,

    #[error("All attempts failed ({} tried): {}", attempts.len(), format_attempts(attempts))]
    AllAttemptsFailed { attempts: Vec<AttemptFailure> },

    // Validation / configuration
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal plumbing
    #[error("Report channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TrawlError {
    /// Transient infrastructure failures: these count toward the circuit
    /// breaker threshold and are eligible for retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TrawlError::Database(e) => !is_constraint_violation(e),
            TrawlError::DatabaseConnection(_)
            | TrawlError::QueryTimeout
            | TrawlError::AttemptTimeout
            | TrawlError::ChannelClosed
            | TrawlError::Io(_) => true,
            _ => false,
        }
    }

    /// Validation errors are rejected at the boundary: never retried, never
    /// counted by the circuit breaker.
    pub fn is_validation(&self) -> bool {
        match self {
            TrawlError::Validation(_)
            | TrawlError::InvalidProxyAddress(_)
            | TrawlError::InvalidPort(_)
            | TrawlError::UnsupportedProtocol(_)
            | TrawlError::InvalidConfig(_) => true,
            TrawlError::Database(e) => is_constraint_violation(e),
            _ => false,
        }
    }

    /// Failures attributed to a specific proxy rather than to shared
    /// infrastructure; these drive error_count and exclusion, not the breaker.
    pub fn is_proxy_failure(&self) -> bool {
        matches!(
            self,
            TrawlError::ProxyConnectionFailed(_)
                | TrawlError::FetchFailed(_)
                | TrawlError::AttemptTimeout
        )
    }
}

/// Unique/check violations are caller mistakes, not infrastructure trouble.
fn is_constraint_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| code == "23505" || code == "23514")
            .unwrap_or(false),
        _ => false,
    }
}

// Convert from URL parse errors (bulk proxy import)
impl From<url::ParseError> for TrawlError {
    fn from(err: url::ParseError) -> Self {
        TrawlError::InvalidProxyAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TrawlError::DatabaseConnection("refused".into()).is_transient());
        assert!(TrawlError::QueryTimeout.is_transient());
        assert!(TrawlError::AttemptTimeout.is_transient());

        assert!(!TrawlError::Validation("bad".into()).is_transient());
        assert!(!TrawlError::NoProxiesAvailable.is_transient());
        assert!(!TrawlError::BreakerOpen.is_transient());
    }

    #[test]
    fn test_validation_classification() {
        assert!(TrawlError::Validation("bad".into()).is_validation());
        assert!(TrawlError::InvalidPort(0).is_validation());
        assert!(TrawlError::UnsupportedProtocol("gopher".into()).is_validation());

        assert!(!TrawlError::QueryTimeout.is_validation());
        assert!(!TrawlError::FetchFailed("503".into()).is_validation());
    }

    #[test]
    fn test_proxy_failure_classification() {
        assert!(TrawlError::ProxyConnectionFailed("refused".into()).is_proxy_failure());
        assert!(TrawlError::FetchFailed("502".into()).is_proxy_failure());
        assert!(TrawlError::AttemptTimeout.is_proxy_failure());

        assert!(!TrawlError::QueryTimeout.is_proxy_failure());
        assert!(!TrawlError::NoProxiesAvailable.is_proxy_failure());
    }

    #[test]
    fn test_aggregate_error_lists_every_attempt() {
        let err = TrawlError::AllAttemptsFailed {
            attempts: vec![
                AttemptFailure {
                    via: "proxy 1 (10.0.0.1:8080)".into(),
                    reason: "connection refused".into(),
                },
                AttemptFailure {
                    via: "direct".into(),
                    reason: "timeout".into(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("2 tried"));
        assert!(msg.contains("proxy 1 (10.0.0.1:8080): connection refused"));
        assert!(msg.contains("direct: timeout"));
    }
}
