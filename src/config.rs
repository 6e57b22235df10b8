//! Operator configuration
//!
//! Populated once by the binary from flags and `CEPHALON_*` environment
//! variables, then carried in the controller context. Nothing below the
//! binary reads the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Requeue delay while the readiness resource is missing or unhealthy
pub const REQUEUE_CLUSTER_NOT_READY: Duration = Duration::from_secs(10);
/// Requeue delay for a filesystem that reached its declared state
pub const REQUEUE_FILESYSTEM_STEADY: Duration = Duration::from_secs(60);
/// First backoff step after a retryable failure
pub const ERROR_BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Backoff ceiling, also used for failures that will not fix themselves
pub const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(300);
/// Backoff after a bounded wait elapsed
pub const TIMEOUT_BACKOFF: Duration = Duration::from_secs(60);

/// Default path of the cluster admin CLI
pub const DEFAULT_CEPH_BINARY: &str = "ceph";
/// Default directory holding per-namespace cluster config and keyrings
pub const DEFAULT_CONFIG_ROOT: &str = "/var/lib/cephalon";

/// Settings shared by every reconcile pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Cluster admin CLI to spawn
    pub ceph_binary: PathBuf,
    /// Root of `<namespace>/<namespace>.config` and the admin keyring
    pub config_root: PathBuf,
    /// Bound on timeout-aware commands such as subvolume listings
    pub command_timeout: Duration,
    /// Delay between `fs dump` polls while waiting for standbys to drain
    pub standby_poll_interval: Duration,
    /// Give up waiting for standbys after this long
    pub standby_wait_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            ceph_binary: PathBuf::from(DEFAULT_CEPH_BINARY),
            config_root: PathBuf::from(DEFAULT_CONFIG_ROOT),
            command_timeout: Duration::from_secs(15),
            standby_poll_interval: Duration::from_secs(2),
            standby_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Reject settings that would make waits degenerate
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.command_timeout.is_zero() {
            return Err(crate::Error::validation(
                "operator config",
                "command timeout must be positive",
            ));
        }
        if self.standby_poll_interval.is_zero() {
            return Err(crate::Error::validation(
                "operator config",
                "standby poll interval must be positive",
            ));
        }
        if self.standby_wait_timeout < self.standby_poll_interval {
            return Err(crate::Error::validation(
                "operator config",
                "standby wait timeout must not be shorter than the poll interval",
            ));
        }
        Ok(())
    }
}
