//! Cephx entity management
//!
//! Thin wrappers over the `auth` command family. Key material is never
//! logged.

use std::fmt;

use tracing::{debug, info};

use super::types::decode_key;
use super::{args, ClusterInfo, CommandExecutor};
use crate::Error;

/// A subsystem-scoped permission granted to an entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capability {
    /// Daemon class the grant applies to (`mon`, `osd`, `mgr`, `mds`)
    pub subsystem: String,
    /// Capability string (e.g. `allow r`)
    pub grant: String,
}

impl Capability {
    /// Create a capability
    pub fn new(subsystem: impl Into<String>, grant: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            grant: grant.into(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.subsystem, self.grant)
    }
}

/// Flatten capabilities into positional arguments (`osd`, `allow *`, ...)
pub fn cap_args(caps: &[Capability]) -> Vec<String> {
    caps.iter()
        .flat_map(|c| [c.subsystem.clone(), c.grant.clone()])
        .collect()
}

fn with_caps(prefix: &[&str], caps: &[Capability]) -> Vec<String> {
    let mut cmd = args(prefix);
    cmd.extend(cap_args(caps));
    cmd
}

/// Get the key of `entity`, creating it with `caps` if it does not exist.
///
/// Does not change the caps of an existing entity; see [`update_caps`].
pub async fn get_or_create_key<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    entity: &str,
    caps: &[Capability],
) -> Result<String, Error> {
    let cmd = with_caps(&["auth", "get-or-create-key", entity], caps);
    debug!(entity, "getting or creating cephx key");
    let output = executor.execute(cluster, &cmd).await?;
    decode_key("auth get-or-create-key", &output)
}

/// Replace the caps of an existing entity
pub async fn update_caps<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    entity: &str,
    caps: &[Capability],
) -> Result<(), Error> {
    let cmd = with_caps(&["auth", "caps", entity], caps);
    executor.execute(cluster, &cmd).await?;
    Ok(())
}

/// Atomically replace the key of `entity` and return the new key
pub async fn rotate_key<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    entity: &str,
) -> Result<String, Error> {
    let output = executor
        .execute(cluster, &args(&["auth", "rotate", entity]))
        .await?;
    let key = decode_key("auth rotate", &output)?;
    info!(entity, "rotated cephx key");
    Ok(key)
}

/// Remove `entity`; an entity that is already gone counts as removed
pub async fn delete_entity<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    entity: &str,
) -> Result<(), Error> {
    match executor
        .execute(cluster, &args(&["auth", "del", entity]))
        .await
    {
        Ok(_) => {
            info!(entity, "deleted cephx entity");
            Ok(())
        }
        Err(e) if e.is_enoent() => {
            debug!(entity, "cephx entity already absent");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
