//! Kubernetes Event recording
//!
//! Controllers emit Events visible via `kubectl describe` on the resource
//! they reconcile. Publishing is fire-and-forget: a failure is logged and
//! never breaks reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Reporting component name on published Events
pub const CONTROLLER_NAME: &str = "cephalon-controller";

/// Publishes Events about a resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`.
    ///
    /// `reason` and `action` should come from [`reasons`] and [`actions`].
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Credential provisioned and secret materialized
    pub const CLIENT_READY: &str = "ClientReady";
    /// Key replaced by a generation bump
    pub const KEY_ROTATED: &str = "KeyRotated";
    /// Secret name taken by something else
    pub const SECRET_CONFLICT: &str = "SecretConflict";
    /// Spec validation failed
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Readiness resource missing or unhealthy
    pub const CLUSTER_NOT_READY: &str = "ClusterNotReady";
    /// Filesystem matches its declared state
    pub const FILESYSTEM_READY: &str = "FilesystemReady";
    /// Filesystem removed from the cluster
    pub const FILESYSTEM_DELETED: &str = "FilesystemDeleted";
    /// Deletion refused while data remains
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
    /// Cephx entity removed
    pub const CREDENTIAL_REVOKED: &str = "CredentialRevoked";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Replacing key material
    pub const ROTATE: &str = "Rotate";
    /// Tearing down cluster-side state
    pub const DELETE: &str = "Delete";
}
