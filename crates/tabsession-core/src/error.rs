use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Warning window ({warning_ms}ms) must be shorter than the idle timeout ({timeout_ms}ms)")]
    WarningNotShorterThanTimeout { warning_ms: u64, timeout_ms: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Session bus needs a capacity of at least one message")]
    ZeroCapacity,

    #[error("Session bus is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Cache key is not valid JSON: {key}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache key must be a non-empty JSON array: {0}")]
    NotAnArray(String),
}
