use std::process::Stdio;

use snafu::{ResultExt, ensure};
use tokio::process::Command;

use crate::cluster::{ClusterError, CommandFailedSnafu, SpawnSnafu};

pub(crate) async fn run_command(command: Command) -> Result<(), ClusterError> {
    run_command_output(command).await.map(drop)
}

/// Runs `command` to completion and returns its stdout. The child is killed
/// if the returned future is dropped.
pub(crate) async fn run_command_output(mut command: Command) -> Result<String, ClusterError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let rendered = format!("{:?}", command.as_std());
    let output = command.output().await.context(SpawnSnafu {
        command: rendered.clone(),
    })?;
    ensure!(
        output.status.success(),
        CommandFailedSnafu {
            command: rendered,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }
    );

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
