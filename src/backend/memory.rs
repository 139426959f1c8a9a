use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::{BackendError, TelemetryBackend};
use crate::predicate::{Query, Term};

#[derive(Debug)]
struct Record {
    index: String,
    document: Value,
    visible_at: Instant,
}

/// An in-process backend whose records become visible at chosen instants.
///
/// Visibility is measured on the tokio clock, so tests driving it with a
/// paused runtime control exactly when telemetry "arrives".
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<Vec<Record>>,
    failures: AtomicUsize,
    queries: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&self, index: impl Into<String>, document: Value) {
        self.ingest_at(index, document, Instant::now());
    }

    pub fn ingest_after(&self, index: impl Into<String>, document: Value, delay: Duration) {
        self.ingest_at(index, document, Instant::now() + delay);
    }

    pub fn ingest_at(&self, index: impl Into<String>, document: Value, visible_at: Instant) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Record {
                index: index.into(),
                document,
                visible_at,
            });
    }

    /// Makes the next `count` queries fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of queries answered so far, failed ones included.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

/// Looks `field` up as a flattened key first, then as a dotted path.
fn lookup<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
    document.get(field).or_else(|| {
        field
            .split('.')
            .try_fold(document, |value, segment| value.get(segment))
    })
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn term_matches(document: &Value, term: &Term) -> bool {
    let Some(found) = lookup(document, term.field()).and_then(as_text) else {
        return false;
    };
    match term {
        Term::Equals { value, .. } => found == *value,
        Term::Contains { value, .. } => found.contains(value.as_str()),
    }
}

#[async_trait]
impl TelemetryBackend for MemoryBackend {
    async fn has_match(&self, query: &Query) -> Result<bool, BackendError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Unavailable {
                message: "injected failure".to_owned(),
            });
        }

        let pattern =
            glob::Pattern::new(&query.dataset).map_err(|error| BackendError::Unavailable {
                message: format!("invalid index pattern {:?}: {}", query.dataset, error),
            })?;

        let now = Instant::now();
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().any(|record| {
            record.visible_at <= now
                && pattern.matches(&record.index)
                && query
                    .terms
                    .iter()
                    .all(|term| term_matches(&record.document, term))
        }))
    }
}
