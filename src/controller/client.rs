//! CephClient reconciliation
//!
//! One pass loads the latest object, handles deletion, waits for a ready
//! cluster, provisions the credential, publishes its secret and records
//! the outcome in status. Any cluster or object-store failure aborts the
//! pass and is retried by the error policy.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::cephx::{
    decide_key_action, gen_client_entity, generate_status_info, key_state, provision_credential,
    validate_client, KeyState, ProvisionedCredential,
};
use super::secret::{admin_key_for, build_secret, reconcile_client_secret};
use super::store::namespaced_name;
use super::Context;
use crate::ceph::auth;
use crate::config::REQUEUE_CLUSTER_NOT_READY;
use crate::crd::{CephClient, CephClientStatus, CephCluster, CephxStatus, Condition, ConditionStatus, Phase};
use crate::events::{actions, reasons};
use crate::Error;

/// Finalizer guarding cephx entity revocation
pub const CLIENT_FINALIZER: &str = "cephalon.dev/cephclient";

/// Reconcile a CephClient resource
#[instrument(skip(client, ctx), fields(client = %client.name_any()))]
pub async fn reconcile_client(client: Arc<CephClient>, ctx: Arc<Context>) -> Result<Action, Error> {
    let (namespace, name) = namespaced_name(client.as_ref())?;

    let Some(client) = ctx.kube.get_client(&namespace, &name).await? else {
        debug!("client no longer exists");
        ctx.record_success(client.as_ref());
        return Ok(Action::await_change());
    };

    if client.metadata.deletion_timestamp.is_some() {
        return cleanup_client(client, &ctx).await;
    }

    let client = ensure_finalizer(client, &ctx).await?;

    if let Err(e) = validate_client(&client) {
        warn!(error = %e, "client validation failed");
        let status = CephClientStatus::with_phase(Phase::Failed)
            .message(e.to_string())
            .cephx(carried_cephx(client.status.as_ref()))
            .observed_generation(client.metadata.generation);
        ctx.kube.patch_client_status(&client, &status).await?;
        ctx.publish(
            &client,
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
        ctx.publish(
            &client,
            EventType::Normal,
            reasons::CLUSTER_NOT_READY,
            actions::RECONCILE,
            None,
        )
        .await;
        return Ok(Action::requeue(REQUEUE_CLUSTER_NOT_READY));
    };
    let cluster_info = ctx.cluster_info(&cluster)?;

    let previous = client.status.clone();
    let action = decide_key_action(
        key_state(previous.as_ref()),
        &client.spec.security.cephx,
    );
    let entity = gen_client_entity(&name, &client.spec.caps);
    debug!(entity = %entity.entity, ?action, "provisioning credential");
    let cred = provision_credential(
        ctx.executor.as_ref(),
        &cluster_info,
        &entity,
        action,
        previous.as_ref().and_then(|s| s.cephx.as_ref()),
    )
    .await?;

    let client = if cred.rotated {
        record_rotation(client, &cred, &ctx).await?
    } else {
        client
    };

    let desired = (!client.spec.remove_secret).then(|| {
        build_secret(
            &client,
            &cred.entity,
            &cred.key,
            admin_key_for(&client, &cred.key).as_deref(),
        )
    });
    match reconcile_client_secret(ctx.kube.as_ref(), &client, desired).await {
        Ok(()) => {}
        Err(e @ Error::OwnershipConflict { .. }) => {
            let status = CephClientStatus::with_phase(Phase::Failed)
                .message(e.to_string())
                .cephx(Some(cred.cephx.clone()))
                .observed_generation(client.metadata.generation);
            ctx.kube.patch_client_status(&client, &status).await?;
            ctx.publish(
                &client,
                EventType::Warning,
                reasons::SECRET_CONFLICT,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    }

    let status = CephClientStatus::with_phase(Phase::Ready)
        .info(generate_status_info(&client))
        .cephx(Some(cred.cephx))
        .observed_generation(client.metadata.generation)
        .condition(Condition::new(
            "Ready",
            ConditionStatus::True,
            "Provisioned",
            "credential provisioned",
        ));

    let was_ready = previous.as_ref().is_some_and(|s| s.phase == Phase::Ready);
    if status_changed(previous.as_ref(), &status) {
        ctx.kube.patch_client_status(&client, &status).await?;
    }
    if !was_ready {
        ctx.publish(
            &client,
            EventType::Normal,
            reasons::CLIENT_READY,
            actions::RECONCILE,
            None,
        )
        .await;
    }

    ctx.record_success(&client);
    info!("client reconciled");
    Ok(Action::await_change())
}

/// Key status to keep on a non-Ready write.
///
/// An unknown key stays explicitly unknown even though the phase leaves
/// Ready, so that it is never mistaken for a fresh credential later.
fn carried_cephx(status: Option<&CephClientStatus>) -> Option<CephxStatus> {
    match key_state(status) {
        KeyState::Fresh => None,
        KeyState::Unknown => Some(CephxStatus::default()),
        KeyState::Known(_) => status.and_then(|s| s.cephx.clone()),
    }
}

/// Persist a confirmed rotation before the secret is touched
async fn record_rotation(
    client: CephClient,
    cred: &ProvisionedCredential,
    ctx: &Context,
) -> Result<CephClient, Error> {
    let info = client
        .status
        .as_ref()
        .map(|s| s.info.clone())
        .unwrap_or_default();
    let status = CephClientStatus::with_phase(Phase::Progressing)
        .message("key rotated")
        .info(info)
        .cephx(Some(cred.cephx.clone()))
        .observed_generation(client.metadata.generation);
    let client = ctx.kube.patch_client_status(&client, &status).await?;

    ctx.publish(
        &client,
        EventType::Normal,
        reasons::KEY_ROTATED,
        actions::ROTATE,
        Some(format!("key generation {}", cred.cephx.key_generation)),
    )
    .await;
    Ok(client)
}

/// Ready status differs from the persisted one in anything but timestamps
fn status_changed(previous: Option<&CephClientStatus>, next: &CephClientStatus) -> bool {
    let Some(prev) = previous else {
        return true;
    };
    prev.phase != next.phase
        || prev.message != next.message
        || prev.info != next.info
        || prev.cephx != next.cephx
        || prev.observed_generation != next.observed_generation
}

/// The namespace's cluster, if commands may be issued against it
async fn ready_cluster(ctx: &Context, namespace: &str) -> Result<Option<CephCluster>, Error> {
    Ok(ctx
        .kube
        .get_ceph_cluster(namespace)
        .await?
        .filter(CephCluster::is_ready))
}

async fn ensure_finalizer(client: CephClient, ctx: &Context) -> Result<CephClient, Error> {
    if client.finalizers().iter().any(|f| f == CLIENT_FINALIZER) {
        return Ok(client);
    }
    let mut finalizers = client.finalizers().to_vec();
    finalizers.push(CLIENT_FINALIZER.to_string());
    debug!("adding finalizer");
    ctx.kube.set_client_finalizers(&client, finalizers).await
}

async fn cleanup_client(client: CephClient, ctx: &Context) -> Result<Action, Error> {
    if !client.finalizers().iter().any(|f| f == CLIENT_FINALIZER) {
        return Ok(Action::await_change());
    }
    let (namespace, name) = namespaced_name(&client)?;

    match ctx.kube.get_ceph_cluster(&namespace).await? {
        None => warn!("cluster is gone, releasing client without revoking its entity"),
        Some(cluster) if !cluster.is_ready() => {
            info!("cluster not ready, deferring revocation");
            return Ok(Action::requeue(REQUEUE_CLUSTER_NOT_READY));
        }
        Some(cluster) => {
            let cluster_info = ctx.cluster_info(&cluster)?;
            let entity = gen_client_entity(&name, &client.spec.caps).entity;
            auth::delete_entity(ctx.executor.as_ref(), &cluster_info, &entity).await?;
            ctx.publish(
                &client,
                EventType::Normal,
                reasons::CREDENTIAL_REVOKED,
                actions::DELETE,
                Some(entity),
            )
            .await;
        }
    }

    let finalizers = client
        .finalizers()
        .iter()
        .filter(|f| *f != CLIENT_FINALIZER)
        .cloned()
        .collect();
    ctx.kube.set_client_finalizers(&client, finalizers).await?;
    ctx.record_success(&client);
    info!("client finalized");
    Ok(Action::await_change())
}
