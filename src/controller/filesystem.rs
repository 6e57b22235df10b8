//! CephFilesystem reconciliation
//!
//! The create path converges pools, the filesystem row and MDS settings,
//! then records the filesystem id and which daemon fills each rank. The
//! delete path tears the filesystem down in a fixed order: standby-replay
//! daemons are failed, the filesystem is failed, standbys are drained, and
//! only then is the filesystem (and optionally its pools) removed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::store::namespaced_name;
use super::Context;
use crate::ceph::types::MdsMap;
use crate::ceph::{filesystem, pool, ClusterInfo, CommandExecutor};
use crate::config::{REQUEUE_CLUSTER_NOT_READY, REQUEUE_FILESYSTEM_STEADY};
use crate::crd::{
    CephCluster, CephFilesystem, CephFilesystemSpec, CephFilesystemStatus, Condition,
    ConditionStatus, Phase,
};
use crate::events::{actions, reasons};
use crate::Error;

/// Finalizer guarding filesystem teardown
pub const FILESYSTEM_FINALIZER: &str = "cephalon.dev/cephfilesystem";

const BLOCKED_BY_SUBVOLUMES: &str = "filesystem still has subvolumes; delete them before the filesystem";

/// Reconcile a CephFilesystem resource
#[instrument(skip(fs, ctx), fields(fs = %fs.name_any()))]
pub async fn reconcile_filesystem(
    fs: Arc<CephFilesystem>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let (namespace, name) = namespaced_name(fs.as_ref())?;

    let Some(fs) = ctx.kube.get_filesystem(&namespace, &name).await? else {
        debug!("filesystem resource no longer exists");
        ctx.record_success(fs.as_ref());
        return Ok(Action::await_change());
    };

    if fs.metadata.deletion_timestamp.is_some() {
        return cleanup_filesystem(fs, &ctx).await;
    }

    let fs = ensure_finalizer(fs, &ctx).await?;

    if let Err(e) = fs.spec.validate(&name) {
        warn!(error = %e, "filesystem validation failed");
        let status = CephFilesystemStatus::with_phase(Phase::Failed)
            .message(e.to_string())
            .observed_generation(fs.metadata.generation);
        ctx.kube.patch_filesystem_status(&fs, &status).await?;
        ctx.publish(
            &fs,
            EventType::Warning,
            reasons::VALIDATION_FAILED,
            actions::RECONCILE,
            Some(e.to_string()),
        )
        .await;
        return Ok(Action::await_change());
    }

    let Some(cluster) = ready_cluster(&ctx, &namespace).await? else {
        info!("cluster not ready, requeueing");
        return Ok(Action::requeue(REQUEUE_CLUSTER_NOT_READY));
    };
    let cluster_info = ctx.cluster_info(&cluster)?;
    let exec = ctx.executor.as_ref();

    ensure_pools(exec, &cluster_info, &name, &fs.spec).await?;
    ensure_filesystem(exec, &cluster_info, &name, &fs.spec).await?;
    configure_mds(exec, &cluster_info, &name, &fs.spec).await?;

    let details = filesystem::get_filesystem(exec, &cluster_info, &name).await?;
    let daemons = active_daemons(&details.mdsmap);

    let status = CephFilesystemStatus::with_phase(Phase::Ready)
        .fsid(details.id)
        .active_daemons(daemons)
        .observed_generation(fs.metadata.generation)
        .condition(Condition::new(
            "Ready",
            ConditionStatus::True,
            "FilesystemCreated",
            "filesystem is configured",
        ));

    let previous = fs.status.as_ref();
    let was_ready = previous.is_some_and(|s| s.phase == Phase::Ready);
    if status_changed(previous, &status) {
        ctx.kube.patch_filesystem_status(&fs, &status).await?;
    }
    if !was_ready {
        ctx.publish(
            &fs,
            EventType::Normal,
            reasons::FILESYSTEM_READY,
            actions::RECONCILE,
            None,
        )
        .await;
    }

    ctx.record_success(&fs);
    info!("filesystem reconciled");
    Ok(Action::requeue(REQUEUE_FILESYSTEM_STEADY))
}

/// Create any declared pool missing from the cluster
async fn ensure_pools<E: CommandExecutor + ?Sized>(
    exec: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    spec: &CephFilesystemSpec,
) -> Result<(), Error> {
    let existing: BTreeSet<String> = pool::list_pool_summaries(exec, cluster)
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();

    for name in declared_pools(fs_name, spec) {
        if !existing.contains(&name) {
            pool::create_filesystem_pool(exec, cluster, &name).await?;
        }
    }
    Ok(())
}

fn declared_pools(fs_name: &str, spec: &CephFilesystemSpec) -> Vec<String> {
    std::iter::once(spec.metadata_pool_name(fs_name))
        .chain(spec.data_pool_names(fs_name))
        .collect()
}

/// Delete declared pools that outlived their filesystem.
///
/// An earlier teardown may have removed the filesystem row and then failed
/// on a pool, in which case the pools can no longer be resolved through
/// the filesystem and are found by name instead.
async fn remove_leftover_pools<E: CommandExecutor + ?Sized>(
    exec: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    spec: &CephFilesystemSpec,
) -> Result<(), Error> {
    let existing: BTreeSet<String> = pool::list_pool_summaries(exec, cluster)
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();
    let leftover: Vec<String> = declared_pools(fs_name, spec)
        .into_iter()
        .filter(|p| existing.contains(p))
        .collect();
    if leftover.is_empty() {
        return Ok(());
    }
    info!(pools = ?leftover, "deleting pools left by an earlier teardown");
    pool::delete_pools_and_rules(exec, cluster, &leftover).await
}

/// Create the filesystem, or attach data pools it does not have yet
async fn ensure_filesystem<E: CommandExecutor + ?Sized>(
    exec: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    spec: &CephFilesystemSpec,
) -> Result<(), Error> {
    let data_pools = spec.data_pool_names(fs_name);

    let Some(summary) = filesystem::find_filesystem(exec, cluster, fs_name).await? else {
        let metadata = spec.metadata_pool_name(fs_name);
        return filesystem::create_filesystem(exec, cluster, fs_name, &metadata, &data_pools).await;
    };

    for data_pool in data_pools.iter().filter(|p| !summary.data_pools.contains(*p)) {
        info!(pool = %data_pool, "attaching data pool");
        filesystem::add_data_pool(exec, cluster, fs_name, data_pool).await?;
    }
    Ok(())
}

/// Converge active ranks and standby-replay.
///
/// Standby-replay daemons are failed first whenever ranks are reduced or
/// standby-replay is being disabled, so no daemon keeps replaying a
/// journal for a rank that is going away.
async fn configure_mds<E: CommandExecutor + ?Sized>(
    exec: &E,
    cluster: &ClusterInfo,
    fs_name: &str,
    spec: &CephFilesystemSpec,
) -> Result<(), Error> {
    let mds = &spec.metadata_server;
    let current = filesystem::get_filesystem(exec, cluster, fs_name).await?;

    if mds.active_count < current.mdsmap.max_mds || !mds.active_standby {
        filesystem::fail_all_standby_replay_mds(exec, cluster, fs_name).await?;
    }
    if mds.active_count != current.mdsmap.max_mds {
        info!(from = current.mdsmap.max_mds, to = mds.active_count, "setting max_mds");
    }
    filesystem::set_max_mds(exec, cluster, fs_name, mds.active_count).await?;
    filesystem::set_allow_standby_replay(exec, cluster, fs_name, mds.active_standby).await
}

/// Daemon name per in-rank; unresolvable ranks are skipped
fn active_daemons(mdsmap: &MdsMap) -> BTreeMap<String, String> {
    let mut daemons = BTreeMap::new();
    for &rank in &mdsmap.in_ranks {
        match mdsmap.daemon_name_for_rank(rank) {
            Ok(name) => {
                daemons.insert(rank.to_string(), name.to_string());
            }
            Err(e) => warn!(rank, error = %e, "skipping unresolved rank"),
        }
    }
    daemons
}

fn status_changed(previous: Option<&CephFilesystemStatus>, next: &CephFilesystemStatus) -> bool {
    let Some(prev) = previous else {
        return true;
    };
    prev.phase != next.phase
        || prev.message != next.message
        || prev.fsid != next.fsid
        || prev.active_daemons != next.active_daemons
        || prev.observed_generation != next.observed_generation
}

async fn ready_cluster(ctx: &Context, namespace: &str) -> Result<Option<CephCluster>, Error> {
    Ok(ctx
        .kube
        .get_ceph_cluster(namespace)
        .await?
        .filter(CephCluster::is_ready))
}

async fn ensure_finalizer(fs: CephFilesystem, ctx: &Context) -> Result<CephFilesystem, Error> {
    if fs.finalizers().iter().any(|f| f == FILESYSTEM_FINALIZER) {
        return Ok(fs);
    }
    let mut finalizers = fs.finalizers().to_vec();
    finalizers.push(FILESYSTEM_FINALIZER.to_string());
    ctx.kube.set_filesystem_finalizers(&fs, finalizers).await
}

async fn release(fs: &CephFilesystem, ctx: &Context) -> Result<Action, Error> {
    let finalizers = fs
        .finalizers()
        .iter()
        .filter(|f| *f != FILESYSTEM_FINALIZER)
        .cloned()
        .collect();
    ctx.kube.set_filesystem_finalizers(fs, finalizers).await?;
    ctx.record_success(fs);
    info!("filesystem finalized");
    Ok(Action::await_change())
}

async fn cleanup_filesystem(fs: CephFilesystem, ctx: &Context) -> Result<Action, Error> {
    if !fs.finalizers().iter().any(|f| f == FILESYSTEM_FINALIZER) {
        return Ok(Action::await_change());
    }
    let (namespace, name) = namespaced_name(&fs)?;

    if fs.spec.preserve_filesystem_on_delete {
        info!("preserving filesystem in the cluster");
        return release(&fs, ctx).await;
    }

    let cluster = match ctx.kube.get_ceph_cluster(&namespace).await? {
        None => {
            warn!("cluster is gone, releasing filesystem without teardown");
            return release(&fs, ctx).await;
        }
        Some(cluster) if !cluster.is_ready() => {
            info!("cluster not ready, deferring teardown");
            return Ok(Action::requeue(REQUEUE_CLUSTER_NOT_READY));
        }
        Some(cluster) => cluster,
    };
    let cluster_info = ctx.cluster_info(&cluster)?;
    let exec = ctx.executor.as_ref();

    if filesystem::find_filesystem(exec, &cluster_info, &name)
        .await?
        .is_none()
    {
        debug!("filesystem already absent from the cluster");
        if !fs.spec.preserve_pools_on_delete {
            remove_leftover_pools(exec, &cluster_info, &name, &fs.spec).await?;
        }
        return release(&fs, ctx).await;
    }

    if filesystem::has_subvolumes(exec, &cluster_info, &name, ctx.config.command_timeout).await? {
        warn!("deletion blocked by existing subvolumes");
        let status = CephFilesystemStatus::with_phase(Phase::Deleting)
            .message(BLOCKED_BY_SUBVOLUMES)
            .observed_generation(fs.metadata.generation);
        if status_changed(fs.status.as_ref(), &status) {
            ctx.kube.patch_filesystem_status(&fs, &status).await?;
            ctx.publish(
                &fs,
                EventType::Warning,
                reasons::DELETION_BLOCKED,
                actions::DELETE,
                Some(BLOCKED_BY_SUBVOLUMES.to_string()),
            )
            .await;
        }
        return Ok(Action::requeue(REQUEUE_FILESYSTEM_STEADY));
    }

    let status = CephFilesystemStatus::with_phase(Phase::Deleting)
        .message("removing filesystem")
        .observed_generation(fs.metadata.generation);
    let fs = if status_changed(fs.status.as_ref(), &status) {
        ctx.kube.patch_filesystem_status(&fs, &status).await?
    } else {
        fs
    };

    filesystem::fail_all_standby_replay_mds(exec, &cluster_info, &name).await?;
    filesystem::fail_filesystem(exec, &cluster_info, &name).await?;
    filesystem::wait_for_no_standbys(
        exec,
        &cluster_info,
        &name,
        ctx.config.standby_poll_interval,
        ctx.config.standby_wait_timeout,
    )
    .await?;
    filesystem::remove_filesystem(exec, &cluster_info, &name, fs.spec.preserve_pools_on_delete)
        .await?;

    ctx.publish(
        &fs,
        EventType::Normal,
        reasons::FILESYSTEM_DELETED,
        actions::DELETE,
        None,
    )
    .await;
    release(&fs, ctx).await
}
