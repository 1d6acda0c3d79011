use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one proxied (or direct) fetch, as reported by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success {
        status_code: i32,
        response_time_ms: i32,
    },
    Failure {
        reason: String,
    },
}

impl ProxyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProxyOutcome::Success { .. })
    }

    pub fn response_time_ms(&self) -> Option<i32> {
        match self {
            ProxyOutcome::Success {
                response_time_ms, ..
            } => Some(*response_time_ms),
            ProxyOutcome::Failure { .. } => None,
        }
    }
}

/// Append-only record of one proxy use; never mutated after insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub proxy_id: i32,
    pub target_url: String,
    pub method: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UsageLogEntry {
    pub fn from_outcome(
        proxy_id: i32,
        target_url: impl Into<String>,
        method: impl Into<String>,
        outcome: &ProxyOutcome,
    ) -> Self {
        match outcome {
            ProxyOutcome::Success {
                status_code,
                response_time_ms,
            } => Self {
                proxy_id,
                target_url: target_url.into(),
                method: method.into(),
                success: true,
                status_code: Some(*status_code),
                response_time_ms: Some(*response_time_ms),
                error_message: None,
                timestamp: Utc::now(),
            },
            ProxyOutcome::Failure { reason } => Self {
                proxy_id,
                target_url: target_url.into(),
                method: method.into(),
                success: false,
                status_code: None,
                response_time_ms: None,
                error_message: Some(reason.clone()),
                timestamp: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_from_success_outcome() {
        let outcome = ProxyOutcome::Success {
            status_code: 200,
            response_time_ms: 120,
        };
        assert!(outcome.is_success());
        assert_eq!(outcome.response_time_ms(), Some(120));

        let entry = UsageLogEntry::from_outcome(7, "https://example.com", "GET", &outcome);
        assert_eq!(entry.proxy_id, 7);
        assert!(entry.success);
        assert_eq!(entry.status_code, Some(200));
        assert_eq!(entry.response_time_ms, Some(120));
        assert!(entry.error_message.is_none());
    }

    #[test]
    fn test_entry_from_failure_outcome() {
        let outcome = ProxyOutcome::Failure {
            reason: "connection refused".into(),
        };
        assert!(!outcome.is_success());
        assert_eq!(outcome.response_time_ms(), None);

        let entry = UsageLogEntry::from_outcome(7, "https://example.com", "GET", &outcome);
        assert!(!entry.success);
        assert_eq!(entry.status_code, None);
        assert_eq!(entry.error_message.as_deref(), Some("connection refused"));
    }
}
