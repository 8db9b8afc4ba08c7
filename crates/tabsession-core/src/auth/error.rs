use thiserror::Error;

/// Why a renewal attempt failed.
///
/// Only `Rejected` is grounds for ending the session. `Transient` failures are
/// left for the next scheduled attempt or the reactive expiration check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewError {
    #[error("Renewal rejected - refresh credential is no longer valid: {0}")]
    Rejected(String),

    #[error("Renewal failed, will retry later: {0}")]
    Transient(String),
}

/// Maximum length for response bodies carried in renewal errors
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RenewError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a renewal endpoint's HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 | 403 => RenewError::Rejected(truncated),
            _ => RenewError::Transient(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, RenewError::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(RenewError::from_status(401, "expired").is_rejected());
        assert!(RenewError::from_status(403, "revoked").is_rejected());
        assert!(!RenewError::from_status(500, "oops").is_rejected());
        assert!(!RenewError::from_status(429, "").is_rejected());
    }

    #[test]
    fn test_from_status_truncates_body() {
        let body = "x".repeat(2000);
        match RenewError::from_status(502, &body) {
            RenewError::Transient(msg) => {
                assert!(msg.starts_with("Status 502: "));
                assert!(msg.contains("truncated, 2000 total bytes"));
                assert!(msg.len() < 700);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
