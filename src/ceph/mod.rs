//! Ceph cluster access
//!
//! Everything that talks to the storage cluster goes through a
//! [`CommandExecutor`]: the operations in this module build argument lists,
//! run them against a [`ClusterInfo`], and decode the JSON that comes back
//! into the typed snapshots in [`types`].
//!
//! - [`exec`] - the command executor seam and the `ceph` CLI implementation
//! - [`types`] - response decoders for filesystem, MDS, pool and key payloads
//! - [`version`] - daemon version parsing
//! - [`auth`] - cephx entity provisioning, rotation and revocation
//! - [`pool`] - pool listing, creation and deletion
//! - [`filesystem`] - CephFS lifecycle and MDS failover

pub mod auth;
pub mod exec;
pub mod filesystem;
pub mod pool;
pub mod types;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use tokio_util::sync::CancellationToken;

pub use exec::{CephCli, CommandExecutor};
#[cfg(test)]
pub use exec::MockCommandExecutor;

/// Default admin entity used to issue commands
pub const ADMIN_ENTITY: &str = "client.admin";

/// Identifies the cluster and admin identity commands run against.
///
/// Built by the controllers for each reconcile pass from the readiness
/// resource; the core never mutates it. The cancellation token is a child of
/// the operator's shutdown token so that long polls end promptly on exit.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Namespace the cluster lives in
    pub namespace: String,
    /// Name of the CephCluster resource
    pub name: String,
    /// Entity used to authenticate commands
    pub admin_entity: String,
    cancel: CancellationToken,
}

impl ClusterInfo {
    /// Create connection info for the cluster in `namespace`
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            admin_entity: ADMIN_ENTITY.to_string(),
            cancel,
        }
    }

    /// Token that is cancelled when the operator shuts down
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the caller has asked in-flight work to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Connection arguments for the `ceph` CLI.
    ///
    /// Config and keyring live under `<root>/<namespace>/`.
    pub fn connection_args(&self, config_root: &Path) -> Vec<String> {
        let dir = config_root.join(&self.namespace);
        vec![
            format!("--cluster={}", self.namespace),
            format!(
                "--conf={}",
                dir.join(format!("{}.config", self.namespace)).display()
            ),
            format!("--name={}", self.admin_entity),
            format!(
                "--keyring={}",
                dir.join(format!("{}.keyring", self.admin_entity)).display()
            ),
        ]
    }

    /// Connection info with a fresh token, for unit tests
    #[cfg(test)]
    pub fn for_testing(namespace: &str) -> Self {
        Self::new(namespace, namespace, CancellationToken::new())
    }
}

/// Build an owned argument list from string slices
pub(crate) fn args<S: AsRef<str>>(parts: &[S]) -> Vec<String> {
    parts.iter().map(|p| p.as_ref().to_string()).collect()
}
