//! Bulk invalidation by tag, namespace and glob pattern
//!
//! The affected key set is resolved up front (index for tags/namespaces,
//! store scans for patterns), then processed in bounded chunks with a
//! cancellation check between chunks. Keys written strictly before the
//! call began are guaranteed in the resolved set; keys written
//! concurrently with the call have undefined ordering. Work already
//! applied survives cancellation and the completed count is reported.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use log::warn;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::cache::coordinator::Coordinator;
use crate::cache::error::CacheOperationError;

/// How far a bulk invalidation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationOutcome {
    /// Keys actually removed from at least one tier.
    pub removed: u64,
    /// False when the pass stopped at a cancellation point.
    pub completed: bool,
}

impl Coordinator {
    /// Remove every key carrying `tag` from every tier.
    pub async fn invalidate_by_tag(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<InvalidationOutcome, CacheOperationError> {
        let keys = self.inner.index.resolve_tag(tag);
        self.invalidate_keys(keys, cancel).await
    }

    /// Remove every key recorded under `namespace` from every tier.
    pub async fn invalidate_by_namespace(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<InvalidationOutcome, CacheOperationError> {
        let keys = self.inner.index.resolve_namespace(namespace);
        self.invalidate_keys(keys, cancel).await
    }

    /// Remove every key matching a glob pattern (`*` and `?` wildcards).
    /// Candidates come from store-side prefix scans on the pattern's
    /// literal prefix, with the index's known keys as a fallback for
    /// tiers whose scan failed. Best-effort with respect to concurrent
    /// writes matching the same pattern.
    pub async fn invalidate_by_pattern(
        &self,
        glob: &str,
        cancel: &CancellationToken,
    ) -> Result<InvalidationOutcome, CacheOperationError> {
        let matcher = glob_to_regex(glob)?;
        let prefix = literal_prefix(glob);

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for store in self.stores() {
            match store.scan_prefix(prefix).await {
                Ok(keys) => candidates.extend(keys),
                Err(e) => warn!(
                    "invalidate_by_pattern({glob}): {} tier scan degraded: {e}",
                    store.kind()
                ),
            }
        }
        for key in self.inner.index.known_keys() {
            if key.starts_with(prefix) {
                candidates.insert(key);
            }
        }

        candidates.retain(|key| matcher.is_match(key));
        self.invalidate_keys(candidates, cancel).await
    }

    /// Chunked forget over a resolved key set. Idempotent: re-running
    /// after an interruption only touches keys still present.
    async fn invalidate_keys(
        &self,
        keys: BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<InvalidationOutcome, CacheOperationError> {
        let batch = self.inner.invalidation_batch.load(Ordering::Acquire).max(1);
        let keys: Vec<String> = keys.into_iter().collect();
        let mut removed = 0u64;

        for chunk in keys.chunks(batch) {
            if cancel.is_cancelled() {
                return Ok(InvalidationOutcome {
                    removed,
                    completed: false,
                });
            }
            for key in chunk {
                match self.forget(key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("invalidation of {key:?} degraded: {e}"),
                }
            }
        }

        Ok(InvalidationOutcome {
            removed,
            completed: true,
        })
    }
}

/// Translate a glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex, CacheOperationError> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| CacheOperationError::invalid_key(format!("bad glob {glob:?}: {e}")))
}

/// Literal run before the first wildcard, used for store-side prefix scans.
fn literal_prefix(glob: &str) -> &str {
    match glob.find(['*', '?']) {
        Some(position) => &glob[..position],
        None => glob,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_translation_matches_expected_keys() {
        let re = glob_to_regex("user:*:v1").unwrap();
        assert!(re.is_match("user:42:v1"));
        assert!(re.is_match("user:a.b:v1"));
        assert!(!re.is_match("user:42:v2"));
        assert!(!re.is_match("account:42:v1"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("ip:192.0.2.?").unwrap();
        assert!(re.is_match("ip:192.0.2.1"));
        assert!(!re.is_match("ip:192x0x2x1"));
    }

    #[test]
    fn literal_prefix_stops_at_wildcard() {
        assert_eq!(literal_prefix("user:*"), "user:");
        assert_eq!(literal_prefix("exact:key"), "exact:key");
        assert_eq!(literal_prefix("?x"), "");
    }
}
