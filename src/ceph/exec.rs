//! Cluster command execution
//!
//! The [`CommandExecutor`] trait is the seam between the control-plane logic
//! and the live cluster. Arguments are the verb hierarchy followed by
//! positional arguments (`["fs", "get", "myfs"]`); output is the command's
//! stdout, normally JSON.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, warn};

use super::ClusterInfo;
use crate::Error;

/// Trait for running admin commands against a cluster
///
/// This trait abstracts the `ceph` CLI for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command and return its output
    async fn execute(&self, cluster: &ClusterInfo, args: &[String]) -> Result<String, Error>;

    /// Run a command that must finish within `timeout`
    async fn execute_with_timeout(
        &self,
        cluster: &ClusterInfo,
        timeout: Duration,
        args: &[String],
    ) -> Result<String, Error>;
}

// =============================================================================
// Real Implementation
// =============================================================================

/// Executor that shells out to the `ceph` CLI
pub struct CephCli {
    binary: PathBuf,
    config_root: PathBuf,
}

impl CephCli {
    /// Create an executor using `binary` and configs under `config_root`
    pub fn new(binary: impl Into<PathBuf>, config_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_root: config_root.into(),
        }
    }

    fn command(&self, cluster: &ClusterInfo, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(cluster.connection_args(&self.config_root))
            .args(args)
            .args(["--format", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(
        &self,
        cluster: &ClusterInfo,
        args: &[String],
        limit: Option<Duration>,
    ) -> Result<String, Error> {
        debug!(command = %args.join(" "), cluster = %cluster.namespace, "running ceph command");

        let mut cmd = self.command(cluster, args);
        let run = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, cmd.output())
                    .await
                    .map_err(|_| format!("timed out after {}s", limit.as_secs())),
                None => Ok(cmd.output().await),
            }
        };

        let output = tokio::select! {
            _ = cluster.cancel_token().cancelled() => {
                return Err(Error::command(args, "cancelled"));
            }
            result = run => result
                .map_err(|msg| Error::command(args, msg))?
                .map_err(|e| {
                    Error::command(args, format!("failed to run {}: {e}", self.binary.display()))
                })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                command = %args.join(" "),
                code = ?output.status.code(),
                "ceph command failed"
            );
            return Err(Error::command(args, stderr.trim().to_string()));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| Error::decode(args.join(" "), format!("output is not UTF-8: {e}")))
    }
}

#[async_trait]
impl CommandExecutor for CephCli {
    async fn execute(&self, cluster: &ClusterInfo, args: &[String]) -> Result<String, Error> {
        self.run(cluster, args, None).await
    }

    async fn execute_with_timeout(
        &self,
        cluster: &ClusterInfo,
        timeout: Duration,
        args: &[String],
    ) -> Result<String, Error> {
        self.run(cluster, args, Some(timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceph::args;

    /// Story: the configured binary is missing on the operator image
    ///
    /// A spawn failure is reported as a command error naming the command,
    /// so the reconcile loop retries instead of crashing.
    #[tokio::test]
    async fn story_missing_binary_is_a_command_error() {
        let cli = CephCli::new("/nonexistent/ceph-binary", "/tmp");
        let cluster = ClusterInfo::for_testing("ns");

        let err = cli
            .execute(&cluster, &args(&["fs", "ls"]))
            .await
            .expect_err("binary does not exist");

        match err {
            Error::Command { command, message } => {
                assert_eq!(command, "fs ls");
                assert!(message.contains("/nonexistent/ceph-binary"));
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    /// Story: the operator is shutting down while a command is queued
    #[tokio::test]
    async fn story_cancelled_cluster_context_stops_commands() {
        let cli = CephCli::new("/nonexistent/ceph-binary", "/tmp");
        let cluster = ClusterInfo::for_testing("ns");
        cluster.cancel_token().cancel();

        let err = cli
            .execute_with_timeout(&cluster, Duration::from_secs(1), &args(&["fs", "dump"]))
            .await
            .expect_err("cancelled");

        // Either branch may win the race; both surface as a command error
        assert!(matches!(err, Error::Command { .. }));
    }
}
