//! CephFS lifecycle and MDS failover
//!
//! Filesystem creation and teardown, forced failover of standby-replay
//! daemons, rank resolution, and bounded waiting for standbys to drain. All
//! cluster state is observed through point-in-time snapshots (`fs get`,
//! `fs dump`), so every operation re-reads what it needs instead of trusting
//! an earlier view.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::pool::{delete_pools_and_rules, list_pool_summaries, resolve_pool_names};
use super::types::{
    decode, FilesystemDetails, FilesystemSummary, MdsDump, Subvolume, SubvolumeGroup,
};
use super::{args, ClusterInfo, CommandExecutor};
use crate::Error;

/// Group holding subvolumes created without an explicit group
pub const NO_GROUP: &str = "_nogroup";

/// List every filesystem
pub async fn list_filesystems<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
) -> Result<Vec<FilesystemSummary>, Error> {
    let output = executor.execute(cluster, &args(&["fs", "ls"])).await?;
    decode("fs ls", &output)
}

/// Find a filesystem in `fs ls` by name
pub async fn find_filesystem<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
) -> Result<Option<FilesystemSummary>, Error> {
    Ok(list_filesystems(executor, cluster)
        .await?
        .into_iter()
        .find(|fs| fs.name == fs_name))
}

/// Fetch the details and MDS map of a filesystem
pub async fn get_filesystem<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
) -> Result<FilesystemDetails, Error> {
    let output = executor
        .execute(cluster, &args(&["fs", "get", fs_name]))
        .await?;
    decode("fs get", &output)
}

/// Create a filesystem over existing pools.
///
/// The first data pool is the default; the rest are attached afterwards.
pub async fn create_filesystem<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    metadata_pool: &str,
    data_pools: &[String],
) -> Result<(), Error> {
    let (default_pool, extra_pools) = data_pools.split_first().ok_or_else(|| {
        Error::validation(fs_name, "a filesystem needs at least one data pool")
    })?;

    executor
        .execute(
            cluster,
            &args(&["fs", "new", fs_name, metadata_pool, default_pool.as_str()]),
        )
        .await?;
    for pool in extra_pools {
        add_data_pool(executor, cluster, fs_name, pool).await?;
    }

    info!(fs = fs_name, "created filesystem");
    Ok(())
}

/// Attach a data pool to a filesystem
pub async fn add_data_pool<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    pool: &str,
) -> Result<(), Error> {
    executor
        .execute(cluster, &args(&["fs", "add_data_pool", fs_name, pool]))
        .await?;
    Ok(())
}

/// Set the number of active ranks
pub async fn set_max_mds<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    count: u32,
) -> Result<(), Error> {
    executor
        .execute(
            cluster,
            &args(&["fs", "set", fs_name, "max_mds", &count.to_string()]),
        )
        .await?;
    Ok(())
}

/// Allow or forbid standby-replay daemons
pub async fn set_allow_standby_replay<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    allow: bool,
) -> Result<(), Error> {
    executor
        .execute(
            cluster,
            &args(&[
                "fs",
                "set",
                fs_name,
                "allow_standby_replay",
                if allow { "true" } else { "false" },
            ]),
        )
        .await?;
    Ok(())
}

/// Mark a filesystem down and fail all of its ranks
pub async fn fail_filesystem<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
) -> Result<(), Error> {
    executor
        .execute(cluster, &args(&["fs", "fail", fs_name]))
        .await?;
    info!(fs = fs_name, "failed filesystem");
    Ok(())
}

/// Remove a filesystem and, unless `preserve_pools` is set, its pools.
///
/// Pools are deleted before their crush rules. Any failed step aborts the
/// rest; a pool that is already gone is not a failure.
pub async fn remove_filesystem<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    preserve_pools: bool,
) -> Result<(), Error> {
    let fs = get_filesystem(executor, cluster, fs_name).await.map_err(|e| {
        if e.is_enoent() {
            e.with_context(format!("filesystem {fs_name:?} not found"))
        } else {
            e
        }
    })?;

    executor
        .execute(
            cluster,
            &args(&["fs", "rm", fs_name, "--yes-i-really-mean-it"]),
        )
        .await?;
    info!(fs = fs_name, "removed filesystem");

    if preserve_pools {
        info!(fs = fs_name, "preserving filesystem pools");
        return Ok(());
    }

    let pools = list_pool_summaries(executor, cluster).await?;
    let mut ids = fs.mdsmap.data_pools.clone();
    ids.push(fs.mdsmap.metadata_pool);
    let names = resolve_pool_names(&pools, &ids)?;
    delete_pools_and_rules(executor, cluster, &names).await
}

/// Force-fail the daemon with `gid`
pub async fn fail_mds<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    gid: u64,
) -> Result<(), Error> {
    executor
        .execute(cluster, &args(&["mds", "fail", &gid.to_string()]))
        .await?;
    Ok(())
}

/// Fail every standby-replay daemon of a filesystem.
///
/// Standby-replay daemons hold a replay of the active journal that must be
/// discarded before reducing the rank count or taking the filesystem down.
/// Daemons in any other state are left alone.
pub async fn fail_all_standby_replay_mds<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
) -> Result<(), Error> {
    let fs = get_filesystem(executor, cluster, fs_name).await?;
    for daemon in fs.mdsmap.standby_replay_daemons() {
        info!(fs = fs_name, mds = %daemon.name, gid = daemon.gid, "failing standby-replay mds");
        fail_mds(executor, cluster, daemon.gid).await?;
    }
    Ok(())
}

/// Name of the daemon currently filling `rank`
pub async fn get_mds_id_by_rank<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    rank: i64,
) -> Result<String, Error> {
    let fs = get_filesystem(executor, cluster, fs_name).await?;
    Ok(fs.mdsmap.daemon_name_for_rank(rank)?.to_string())
}

/// Cluster-wide MDS snapshot
pub async fn get_mds_dump<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
) -> Result<MdsDump, Error> {
    let output = executor.execute(cluster, &args(&["fs", "dump"])).await?;
    decode("fs dump", &output)
}

/// True if a standby named `<fs_name>-<letter>` is present
pub fn filesystem_has_standby(dump: &MdsDump, fs_name: &str) -> bool {
    dump.standbys.iter().any(|standby| {
        standby
            .name
            .strip_prefix(fs_name)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|suffix| {
                let mut chars = suffix.chars();
                matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
            })
    })
}

/// Poll `fs dump` until no standby of `fs_name` remains.
///
/// A command failure returns immediately. Standbys still present at the
/// deadline give [`Error::Timeout`]. Cancellation of the cluster context
/// ends the wait between polls.
pub async fn wait_for_no_standbys<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;

    loop {
        let dump = get_mds_dump(executor, cluster).await?;
        if !filesystem_has_standby(&dump, fs_name) {
            debug!(fs = fs_name, "no standby daemons remain");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(fs = fs_name, ?timeout, "standby daemons still present");
            return Err(Error::timeout(
                format!("standby daemons of filesystem {fs_name:?}"),
                format!("still present after {timeout:?}"),
            ));
        }

        tokio::select! {
            _ = cluster.cancel_token().cancelled() => {
                return Err(Error::internal("standby wait", "cancelled"));
            }
            _ = tokio::time::sleep(poll_interval.min(deadline - now)) => {}
        }
    }
}

/// List the subvolume groups of a filesystem
pub async fn list_subvolume_groups<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    timeout: Duration,
) -> Result<Vec<SubvolumeGroup>, Error> {
    let context = || format!("failed to list subvolumegroups in filesystem {fs_name:?}");
    let output = executor
        .execute_with_timeout(
            cluster,
            timeout,
            &args(&["fs", "subvolumegroup", "ls", fs_name]),
        )
        .await
        .map_err(|e| e.with_context(context()))?;
    decode("fs subvolumegroup ls", &output).map_err(|e| e.with_context(context()))
}

/// List the subvolumes in one group of a filesystem
pub async fn list_subvolumes_in_group<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    group: &str,
    timeout: Duration,
) -> Result<Vec<Subvolume>, Error> {
    let context = || {
        format!("failed to list subvolumes in filesystem {fs_name:?} subvolume group {group:?}")
    };
    let output = executor
        .execute_with_timeout(
            cluster,
            timeout,
            &args(&["fs", "subvolume", "ls", fs_name, group]),
        )
        .await
        .map_err(|e| e.with_context(context()))?;
    decode("fs subvolume ls", &output).map_err(|e| e.with_context(context()))
}

/// True if any subvolume exists in any group, including ungrouped ones
pub async fn has_subvolumes<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    timeout: Duration,
) -> Result<bool, Error> {
    let mut groups: Vec<String> = list_subvolume_groups(executor, cluster, fs_name, timeout)
        .await?
        .into_iter()
        .map(|g| g.name)
        .collect();
    groups.push(NO_GROUP.to_string());

    for group in &groups {
        let subvolumes =
            list_subvolumes_in_group(executor, cluster, fs_name, group, timeout).await?;
        if !subvolumes.is_empty() {
            debug!(fs = fs_name, group = %group, count = subvolumes.len(), "found subvolumes");
            return Ok(true);
        }
    }
    Ok(false)
}
