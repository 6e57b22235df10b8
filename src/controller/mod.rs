//! Controller implementations for cephalon CRDs
//!
//! This module contains the reconciliation logic for `CephClient` and
//! `CephFilesystem`. Both controllers share one [`Context`]: the object
//! store, the cluster command executor, the event publisher, operator
//! settings, and a per-resource failure counter that drives error backoff.

pub mod cephx;
mod client;
mod filesystem;
pub mod store;
pub mod secret;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::ceph::{CephCli, ClusterInfo, CommandExecutor};
use crate::config::{OperatorConfig, ERROR_BACKOFF_BASE, ERROR_BACKOFF_MAX, TIMEOUT_BACKOFF};
use crate::crd::CephCluster;
use crate::events::{EventPublisher, KubeEventPublisher, CONTROLLER_NAME};
use crate::Error;

pub use store::{KubeClient, KubeClientImpl, FIELD_MANAGER};
pub use client::{reconcile_client, CLIENT_FINALIZER};
pub use filesystem::{reconcile_filesystem, FILESYSTEM_FINALIZER};

/// Shared state for both controllers
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Cluster command executor
    pub executor: Arc<dyn CommandExecutor>,
    /// Event publisher for resource Events
    pub events: Arc<dyn EventPublisher>,
    /// Operator settings
    pub config: OperatorConfig,
    /// Cancelled when the operator shuts down
    pub shutdown: CancellationToken,
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with the given collaborators
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        executor: Arc<dyn CommandExecutor>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            executor,
            events,
            config: OperatorConfig::default(),
            shutdown: CancellationToken::new(),
            failures: DashMap::new(),
        }
    }

    /// Connection info for `cluster`, cancelled with the operator
    pub fn cluster_info(&self, cluster: &CephCluster) -> Result<ClusterInfo, Error> {
        let (namespace, name) = store::namespaced_name(cluster)?;
        Ok(ClusterInfo::new(
            namespace,
            name,
            self.shutdown.child_token(),
        ))
    }

    /// Publish an Event on `obj`
    pub async fn publish<K>(
        &self,
        obj: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), type_, reason, action, note)
            .await;
    }

    /// Consecutive failed passes recorded for `key`
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).map(|c| *c).unwrap_or(0)
    }

    /// Forget the failures of `obj` after a successful pass
    pub fn record_success<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()>,
    {
        self.failures.remove(&failure_key(obj));
    }

    fn record_failure(&self, key: String) -> u32 {
        let mut entry = self.failures.entry(key).or_insert(0);
        let previous = *entry;
        *entry = previous.saturating_add(1);
        previous
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    executor: Option<Arc<dyn CommandExecutor>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: OperatorConfig,
    shutdown: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            executor: None,
            events: None,
            config: OperatorConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the operator settings
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the token cancelled on shutdown
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the command executor
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let config = self.config;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            executor: self.executor.unwrap_or_else(|| {
                Arc::new(CephCli::new(config.ceph_binary.clone(), config.config_root.clone()))
            }),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))),
            config,
            shutdown: self.shutdown,
            failures: DashMap::new(),
        }
    }
}

/// Key under which failures of `obj` are counted
pub fn failure_key<K>(obj: &K) -> String
where
    K: Resource<DynamicType = ()>,
{
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Requeue delay after `error`, given the failures already recorded.
///
/// Retryable errors back off exponentially, timeouts wait a fixed longer
/// interval, and everything else waits the maximum.
pub fn backoff_for(error: &Error, previous_failures: u32) -> Duration {
    if error.is_timeout() {
        return TIMEOUT_BACKOFF;
    }
    if !error.is_retryable() {
        return ERROR_BACKOFF_MAX;
    }
    let factor = 2u32.checked_pow(previous_failures).unwrap_or(u32::MAX);
    ERROR_BACKOFF_BASE.saturating_mul(factor).min(ERROR_BACKOFF_MAX)
}

/// Error policy shared by both controllers
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let key = failure_key(obj.as_ref());
    let previous = ctx.record_failure(key.clone());
    let delay = backoff_for(error, previous);

    if error.is_retryable() {
        warn!(?error, resource = %key, failures = previous.saturating_add(1), ?delay, "reconciliation failed");
    } else {
        error!(?error, resource = %key, ?delay, "reconciliation failed");
    }
    Action::requeue(delay)
}
