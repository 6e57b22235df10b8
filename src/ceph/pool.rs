//! Storage pool operations needed by the filesystem lifecycle

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::types::{decode, PoolSummary};
use super::{args, ClusterInfo, CommandExecutor};
use crate::Error;

/// Application tag applied to pools backing a filesystem
pub const CEPHFS_APPLICATION: &str = "cephfs";

/// List every pool's name and id
pub async fn list_pool_summaries<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
) -> Result<Vec<PoolSummary>, Error> {
    let output = executor
        .execute(cluster, &args(&["osd", "lspools"]))
        .await?;
    decode("osd lspools", &output)
}

/// Resolve pool ids to names; an id with no matching pool is an error
pub fn resolve_pool_names(pools: &[PoolSummary], ids: &[i64]) -> Result<Vec<String>, Error> {
    let by_id: BTreeMap<i64, &str> = pools.iter().map(|p| (p.number, p.name.as_str())).collect();
    ids.iter()
        .map(|id| {
            by_id.get(id).map(|name| name.to_string()).ok_or_else(|| {
                Error::cluster_state("pool id", format!("failed to find pool name for id {id}"))
            })
        })
        .collect()
}

/// Create a pool for filesystem use, tagged with the cephfs application.
///
/// Both commands are idempotent on the cluster side.
pub async fn create_filesystem_pool<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    name: &str,
) -> Result<(), Error> {
    executor
        .execute(cluster, &args(&["osd", "pool", "create", name]))
        .await?;
    executor
        .execute(
            cluster,
            &args(&["osd", "pool", "application", "enable", name, CEPHFS_APPLICATION]),
        )
        .await?;
    info!(pool = name, "created pool");
    Ok(())
}

/// Delete a pool by name
pub async fn delete_pool<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    name: &str,
) -> Result<(), Error> {
    executor
        .execute(
            cluster,
            &args(&["osd", "pool", "delete", name, name, "--yes-i-really-really-mean-it"]),
        )
        .await?;
    info!(pool = name, "deleted pool");
    Ok(())
}

/// Delete the crush rule named after a pool
pub async fn delete_crush_rule<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    name: &str,
) -> Result<(), Error> {
    executor
        .execute(cluster, &args(&["osd", "crush", "rule", "rm", name]))
        .await?;
    Ok(())
}

/// Delete pools by name, then the crush rules named after them.
///
/// A pool or rule that is already gone is skipped, so a teardown that
/// failed halfway can be repeated.
pub async fn delete_pools_and_rules<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    names: &[String],
) -> Result<(), Error> {
    for name in names {
        match delete_pool(executor, cluster, name).await {
            Err(e) if e.is_enoent() => debug!(pool = %name, "pool already deleted"),
            other => other?,
        }
    }
    for name in names {
        match delete_crush_rule(executor, cluster, name).await {
            Err(e) if e.is_enoent() => debug!(rule = %name, "crush rule already deleted"),
            other => other?,
        }
    }
    Ok(())
}
