//! The orchestration platform recipes are applied to.

use async_trait::async_trait;
use serde_json::Value;
use snafu::Snafu;

use crate::resource::{Object, ObjectKey};

pub mod kubectl;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use self::kubectl::KubectlCluster;
#[cfg(any(test, feature = "test-utils"))]
pub use self::memory::{Call, MemoryCluster};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClusterError {
    #[snafu(display("Could not run {}: {}", command, source))]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[snafu(display("{} exited with {:?}: {}", command, code, stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[snafu(display("Could not write manifest for {}: {}", object, source))]
    WriteManifest {
        object: String,
        source: std::io::Error,
    },
    #[snafu(display("Could not serialize {}: {}", object, source))]
    Serialize {
        object: String,
        source: serde_json::Error,
    },
    #[snafu(display("Could not parse state of {}: {}", object, source))]
    ParseState {
        object: String,
        source: serde_json::Error,
    },
    #[snafu(display("{} was rejected: {}", object, message))]
    Rejected { object: String, message: String },
}

/// Applies, inspects and removes objects.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Creates or updates `object`.
    async fn apply(&self, object: &Object) -> Result<(), ClusterError>;

    /// Removes the object. Removing an object that does not exist succeeds.
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError>;

    /// The `status` of the object, or `None` if it does not exist or has not
    /// reported one yet.
    async fn get_status(&self, key: &ObjectKey) -> Result<Option<Value>, ClusterError>;
}
