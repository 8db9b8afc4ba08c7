use std::fmt;

use serde_json::Value;

use crate::error::KeyError;

/// A serialized cache-key identifier, e.g. `["students",{"page":1}]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    raw: String,
    parts: Vec<Value>,
}

impl CacheKey {
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let value: Value = serde_json::from_str(raw).map_err(|source| KeyError::Malformed {
            key: raw.to_string(),
            source,
        })?;
        match value {
            Value::Array(parts) if !parts.is_empty() => Ok(Self {
                raw: raw.to_string(),
                parts,
            }),
            _ => Err(KeyError::NotAnArray(raw.to_string())),
        }
    }

    /// Build a key from its parts.
    pub fn from_parts(parts: Vec<Value>) -> Result<Self, KeyError> {
        let raw = Value::Array(parts).to_string();
        Self::parse(&raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// The leading part when it is a string, conventionally the query name.
    pub fn root(&self) -> Option<&str> {
        self.parts.first().and_then(Value::as_str)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_key() {
        let key = CacheKey::parse(r#"["students",{"page":1}]"#).expect("valid");
        assert_eq!(key.root(), Some("students"));
        assert_eq!(key.parts()[1], json!({"page": 1}));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(CacheKey::parse("[\"students\""), Err(KeyError::Malformed { .. })));
        assert!(matches!(CacheKey::parse("{\"a\":1}"), Err(KeyError::NotAnArray(_))));
        assert!(matches!(CacheKey::parse("[]"), Err(KeyError::NotAnArray(_))));
    }

    #[test]
    fn test_from_parts() {
        let key = CacheKey::from_parts(vec![json!("invoices"), json!(42)]).expect("valid");
        assert_eq!(key.as_str(), r#"["invoices",42]"#);
    }
}
