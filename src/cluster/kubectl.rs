use std::{ffi::OsString, io::Write};

use async_trait::async_trait;
use serde_json::Value;
use snafu::ResultExt;
use tokio::process::Command;

use super::{Cluster, ClusterError, ParseStateSnafu, SerializeSnafu, WriteManifestSnafu};
use crate::{
    context::Context,
    internal_events::{ObjectApplied, ObjectDeleted},
    resource::{Object, ObjectKey},
    util::{run_command, run_command_output},
};

/// Drives a cluster through the `kubectl` binary.
#[derive(Clone, Debug)]
pub struct KubectlCluster {
    kubectl_command: String,
}

/// `kind.version.group`, which `kubectl` resolves without ambiguity even when
/// several groups define the same kind.
fn resource_name(key: &ObjectKey) -> String {
    let kind = key.kind.to_lowercase();
    match key.api_version.split_once('/') {
        Some((group, version)) => format!("{kind}.{version}.{group}"),
        None => kind,
    }
}

impl KubectlCluster {
    pub fn new(kubectl_command: impl Into<String>) -> Self {
        Self {
            kubectl_command: kubectl_command.into(),
        }
    }

    pub fn from_context(context: &Context) -> Self {
        Self::new(context.kubectl_command.clone())
    }

    fn targeted(&self, verb: &str, key: &ObjectKey) -> Command {
        let mut command = Command::new(&self.kubectl_command);
        command.arg(verb).arg(resource_name(key)).arg(&key.name);
        if let Some(namespace) = &key.namespace {
            command.arg("-n").arg(namespace);
        }
        command
    }

    fn apply_command(&self, manifest: impl Into<OsString>) -> Command {
        let mut command = Command::new(&self.kubectl_command);
        command.arg("apply").arg("-f").arg(manifest.into());
        command
    }

    fn delete_command(&self, key: &ObjectKey) -> Command {
        let mut command = self.targeted("delete", key);
        command.arg("--ignore-not-found").arg("--wait=false");
        command
    }

    fn get_command(&self, key: &ObjectKey) -> Command {
        let mut command = self.targeted("get", key);
        command.arg("--ignore-not-found").arg("-o").arg("json");
        command
    }
}

#[async_trait]
impl Cluster for KubectlCluster {
    async fn apply(&self, object: &Object) -> Result<(), ClusterError> {
        let key = object.key().to_string();
        let manifest = serde_json::to_vec(object).context(SerializeSnafu {
            object: key.clone(),
        })?;

        let mut file = tempfile::Builder::new()
            .prefix("recipe-object-")
            .suffix(".json")
            .tempfile()
            .context(WriteManifestSnafu {
                object: key.clone(),
            })?;
        file.write_all(&manifest)
            .and_then(|()| file.flush())
            .context(WriteManifestSnafu {
                object: key.clone(),
            })?;

        run_command(self.apply_command(file.path())).await?;
        emit!(ObjectApplied { object: &key });
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        run_command(self.delete_command(key)).await?;
        emit!(ObjectDeleted {
            object: &key.to_string()
        });
        Ok(())
    }

    async fn get_status(&self, key: &ObjectKey) -> Result<Option<Value>, ClusterError> {
        let output = run_command_output(self.get_command(key)).await?;
        if output.trim().is_empty() {
            return Ok(None);
        }

        let mut object: Value = serde_json::from_str(&output).context(ParseStateSnafu {
            object: key.to_string(),
        })?;
        Ok(object
            .get_mut("status")
            .map(Value::take)
            .filter(|status| !status.is_null()))
    }
}
