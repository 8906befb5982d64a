//! Subprocess execution with a time budget.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::PortError;

/// Longest stderr excerpt carried in an error.
const STDERR_LIMIT: usize = 512;

/// Run `cmd` to completion and return its stdout.
///
/// The child is killed if `timeout` elapses first. A nonzero exit becomes
/// `PortError::Failed` with a trimmed stderr excerpt.
pub async fn run_checked(
    mut cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<Vec<u8>, PortError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    tracing::debug!(tool, command = ?cmd.as_std(), "Running collaborator");

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|source| PortError::Spawn {
            tool: tool.to_string(),
            source,
        })?,
        Err(_) => {
            tracing::warn!(tool, secs = timeout.as_secs(), "Collaborator timed out");
            return Err(PortError::Timeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
        return Err(PortError::Failed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr,
        });
    }
    Ok(output.stdout)
}

/// Bound an arbitrary future by the same budget rules as subprocesses.
pub async fn with_timeout<T, F>(tool: &str, timeout: Duration, fut: F) -> Result<T, PortError>
where
    F: std::future::Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout {
            tool: tool.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}
