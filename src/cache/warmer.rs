//! Cache warming: named preload tasks executed ahead of demand
//!
//! Tasks are registered under a name and produce batches of entries that
//! are written through the coordinator. A batch run collects per-task
//! outcomes; one task failing never aborts the others.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::coordinator::{Coordinator, PutOptions};
use crate::cache::error::CacheOperationError;

/// One entry produced by a warm task.
#[derive(Debug, Clone)]
pub struct WarmEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub namespace: String,
}

impl WarmEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
            tags: BTreeSet::new(),
            namespace: String::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

type WarmFuture = Pin<Box<dyn Future<Output = Result<Vec<WarmEntry>, CacheOperationError>> + Send>>;
type WarmTaskFn = Arc<dyn Fn() -> WarmFuture + Send + Sync>;

/// Result of one warm task within a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmOutcome {
    /// Entries successfully written through the coordinator.
    pub loaded: usize,
    /// Entries the coordinator could not store.
    pub failed: usize,
    /// Producer or lookup error, when the task itself failed.
    pub error: Option<String>,
    /// False when the run stopped at a cancellation point.
    pub completed: bool,
}

/// Registry and executor for named warm tasks.
#[derive(Clone)]
pub struct Warmer {
    coordinator: Coordinator,
    tasks: Arc<DashMap<String, WarmTaskFn>>,
}

impl Warmer {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Register a producer under `name`, replacing any previous task with
    /// the same name.
    pub fn register<F, Fut>(&self, name: impl Into<String>, producer: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<WarmEntry>, CacheOperationError>> + Send + 'static,
    {
        let task: WarmTaskFn = Arc::new(move || Box::pin(producer()) as WarmFuture);
        self.tasks.insert(name.into(), task);
    }

    pub fn registered_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run the named tasks (all registered tasks when `names` is empty),
    /// writing their entries through the coordinator. Partial failures
    /// are collected per task; unknown names report an error entry.
    pub async fn warm(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> BTreeMap<String, WarmOutcome> {
        let selected: Vec<String> = if names.is_empty() {
            self.registered_tasks()
        } else {
            names.to_vec()
        };

        let mut results = BTreeMap::new();
        for name in selected {
            if cancel.is_cancelled() {
                results.insert(
                    name,
                    WarmOutcome {
                        completed: false,
                        ..WarmOutcome::default()
                    },
                );
                continue;
            }
            let outcome = self.run_task(&name, cancel).await;
            results.insert(name, outcome);
        }
        results
    }

    async fn run_task(&self, name: &str, cancel: &CancellationToken) -> WarmOutcome {
        let Some(task) = self.tasks.get(name).map(|t| t.value().clone()) else {
            return WarmOutcome {
                error: Some(format!("unknown warm task {name:?}")),
                completed: true,
                ..WarmOutcome::default()
            };
        };

        let entries = match task().await {
            Ok(entries) => entries,
            Err(e) => {
                return WarmOutcome {
                    error: Some(e.to_string()),
                    completed: true,
                    ..WarmOutcome::default()
                };
            }
        };

        let mut outcome = WarmOutcome {
            completed: true,
            ..WarmOutcome::default()
        };
        for entry in entries {
            if cancel.is_cancelled() {
                outcome.completed = false;
                break;
            }
            let options = PutOptions {
                tags: entry.tags,
                namespace: entry.namespace,
            };
            match self
                .coordinator
                .put(&entry.key, entry.value, entry.ttl, &options)
                .await
            {
                Ok(true) => outcome.loaded += 1,
                Ok(false) => outcome.failed += 1,
                Err(e) => {
                    debug!("warm task {name:?}: storing {:?} failed: {e}", entry.key);
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}
