//! Key conventions: raw-key validation and the structured key codec
//!
//! The engine accepts any raw key passing `check_raw`; the structured
//! `namespace:type:identifier:vN` form is a convention callers can opt
//! into through `CacheKey` and `KeyCodec`. The `__idx` prefix is reserved
//! so index bookkeeping can never collide with user data in a shared
//! backend.

use crate::cache::error::CacheOperationError;

/// Upper bound on raw key length in bytes.
pub const MAX_RAW_KEY_LEN: usize = 512;

/// Prefix reserved for index bookkeeping records.
const RESERVED_PREFIX: &str = "__idx";

/// Structured cache key: `namespace:type:identifier:vN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: String,
    pub kind: String,
    pub identifier: String,
    pub version: u64,
}

impl CacheKey {
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        identifier: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            identifier: identifier.into(),
            version,
        }
    }

    pub fn render(&self) -> String {
        KeyCodec::render(self)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Renders and parses the structured key format.
pub struct KeyCodec;

impl KeyCodec {
    pub fn render(key: &CacheKey) -> String {
        format!(
            "{}:{}:{}:v{}",
            key.namespace, key.kind, key.identifier, key.version
        )
    }

    /// Parse a structured key. Requires exactly four non-empty segments
    /// with a `vN` version tail.
    pub fn parse(raw: &str) -> Result<CacheKey, CacheOperationError> {
        Self::check_raw(raw)?;
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() != 4 {
            return Err(CacheOperationError::invalid_key(format!(
                "expected namespace:type:identifier:vN, got {raw:?}"
            )));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CacheOperationError::invalid_key(format!(
                "empty segment in {raw:?}"
            )));
        }
        let version = segments[3]
            .strip_prefix('v')
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                CacheOperationError::invalid_key(format!(
                    "version segment must be vN, got {:?}",
                    segments[3]
                ))
            })?;
        Ok(CacheKey::new(segments[0], segments[1], segments[2], version))
    }

    /// Validate a raw key: non-empty, bounded, printable, and outside the
    /// reserved index prefix.
    pub fn check_raw(raw: &str) -> Result<(), CacheOperationError> {
        if raw.is_empty() {
            return Err(CacheOperationError::invalid_key("key is empty"));
        }
        if raw.len() > MAX_RAW_KEY_LEN {
            return Err(CacheOperationError::invalid_key(format!(
                "key exceeds {MAX_RAW_KEY_LEN} bytes"
            )));
        }
        if raw.starts_with(RESERVED_PREFIX) {
            return Err(CacheOperationError::invalid_key(format!(
                "prefix {RESERVED_PREFIX:?} is reserved"
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheOperationError::invalid_key(
                "key contains whitespace or control characters",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_key_round_trips() {
        let key = CacheKey::new("ip", "reputation", "192.0.2.1", 3);
        let raw = key.render();
        assert_eq!(raw, "ip:reputation:192.0.2.1:v3");
        assert_eq!(KeyCodec::parse(&raw).unwrap(), key);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(KeyCodec::parse("too:few:v1").is_err());
        assert!(KeyCodec::parse("ns:kind:id:3").is_err());
        assert!(KeyCodec::parse("ns:kind:id:vx").is_err());
        assert!(KeyCodec::parse("ns::id:v1").is_err());
    }

    #[test]
    fn raw_checks_reject_reserved_and_unprintable() {
        assert!(KeyCodec::check_raw("ns:kind:id:v1").is_ok());
        assert!(KeyCodec::check_raw("").is_err());
        assert!(KeyCodec::check_raw("__idx:tag:x").is_err());
        assert!(KeyCodec::check_raw("has space").is_err());
        assert!(KeyCodec::check_raw("has\tcontrol").is_err());
        assert!(KeyCodec::check_raw(&"k".repeat(MAX_RAW_KEY_LEN + 1)).is_err());
    }
}
