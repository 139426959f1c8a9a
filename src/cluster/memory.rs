use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::Value;

use super::{Cluster, ClusterError};
use crate::{
    internal_events::{ObjectApplied, ObjectDeleted},
    resource::{Object, ObjectKey},
};

/// A mutation the cluster was asked to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Apply(ObjectKey),
    Delete(ObjectKey),
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, Object>,
    calls: Vec<Call>,
    failing_applies: HashSet<String>,
    failing_deletes: HashSet<String>,
    statuses_by_kind: HashMap<String, Value>,
}

/// An in-process cluster that records every call made to it.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Objects of `kind` report `status` as soon as they are applied.
    #[must_use]
    pub fn with_status_on_apply(self, kind: impl Into<String>, status: Value) -> Self {
        self.state().statuses_by_kind.insert(kind.into(), status);
        self
    }

    /// Every apply of an object of `kind` fails.
    pub fn fail_apply(&self, kind: impl Into<String>) {
        self.state().failing_applies.insert(kind.into());
    }

    /// Every delete of an object of `kind` fails.
    pub fn fail_delete(&self, kind: impl Into<String>) {
        self.state().failing_deletes.insert(kind.into());
    }

    pub fn set_status(&self, key: &ObjectKey, status: Value) {
        if let Some(object) = self.state().objects.get_mut(key) {
            object.data.insert("status".to_owned(), status);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn applied(&self) -> Vec<ObjectKey> {
        self.calls_matching(|call| match call {
            Call::Apply(key) => Some(key),
            Call::Delete(_) => None,
        })
    }

    pub fn deleted(&self) -> Vec<ObjectKey> {
        self.calls_matching(|call| match call {
            Call::Delete(key) => Some(key),
            Call::Apply(_) => None,
        })
    }

    fn calls_matching(&self, f: impl Fn(&Call) -> Option<&ObjectKey>) -> Vec<ObjectKey> {
        self.state().calls.iter().filter_map(f).cloned().collect()
    }

    /// Keys of the objects currently present.
    pub fn objects(&self) -> Vec<ObjectKey> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state().objects.contains_key(key)
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn apply(&self, object: &Object) -> Result<(), ClusterError> {
        let key = object.key();
        let mut state = self.state();
        state.calls.push(Call::Apply(key.clone()));

        if state.failing_applies.contains(&key.kind) {
            return Err(ClusterError::Rejected {
                object: key.to_string(),
                message: "injected failure".to_owned(),
            });
        }

        let mut object = object.clone();
        if let Some(status) = state.statuses_by_kind.get(&object.kind) {
            object.data.insert("status".to_owned(), status.clone());
        }
        state.objects.insert(key.clone(), object);
        emit!(ObjectApplied {
            object: &key.to_string()
        });
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(key.clone()));

        if state.failing_deletes.contains(&key.kind) {
            return Err(ClusterError::Rejected {
                object: key.to_string(),
                message: "injected failure".to_owned(),
            });
        }

        if state.objects.remove(key).is_some() {
            emit!(ObjectDeleted {
                object: &key.to_string()
            });
        }
        Ok(())
    }

    async fn get_status(&self, key: &ObjectKey) -> Result<Option<Value>, ClusterError> {
        Ok(self
            .state()
            .objects
            .get(key)
            .and_then(|object| object.data.get("status"))
            .cloned())
    }
}
