//! In-memory collaborators for multi-pass reconcile stories
//!
//! [`FakeKube`] behaves like the API server where the controllers care:
//! every write bumps a resource version, writes carrying a stale version
//! fail with 409, and an object marked for deletion disappears once its
//! last finalizer is removed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};

use super::store::KubeClient;
use super::Context;
use crate::ceph::CommandExecutor;
use crate::crd::{
    CephClient, CephClientStatus, CephCluster, CephClusterSpec, CephClusterStatus,
    CephFilesystem, CephFilesystemStatus, CephHealth,
};
use crate::events::EventPublisher;
use crate::Error;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
struct State {
    version: u64,
    clients: BTreeMap<Key, CephClient>,
    filesystems: BTreeMap<Key, CephFilesystem>,
    clusters: BTreeMap<String, CephCluster>,
    secrets: BTreeMap<Key, Secret>,
    status_writes: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Check `incoming` against the stored version and stamp a new one
fn bump<K: Resource>(state: &mut State, stored: &mut K, incoming: Option<String>) -> Result<(), Error> {
    if let Some(rv) = incoming {
        if stored.meta().resource_version.as_deref() != Some(rv.as_str()) {
            return Err(api_error(
                409,
                "Conflict",
                format!("{} has been modified", stored.name_any()),
            ));
        }
    }
    stored.meta_mut().resource_version = Some(state.next_version());
    Ok(())
}

/// In-memory object store
#[derive(Clone, Default)]
pub(crate) struct FakeKube {
    state: Arc<Mutex<State>>,
}

impl FakeKube {
    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Store a CephClient, assigning uid and resource version
    pub(crate) fn insert_client(&self, mut client: CephClient) {
        self.with_state(|s| {
            let (ns, name) = (client.namespace().unwrap(), client.name_any());
            client.metadata.uid.get_or_insert_with(|| format!("uid-{name}"));
            client.metadata.generation.get_or_insert(1);
            client.metadata.resource_version = Some(s.next_version());
            s.clients.insert(key(&ns, &name), client);
        });
    }

    /// Current copy of a CephClient
    pub(crate) fn client(&self, namespace: &str, name: &str) -> Option<CephClient> {
        self.with_state(|s| s.clients.get(&key(namespace, name)).cloned())
    }

    /// Apply a spec change the way the API server would
    pub(crate) fn edit_client(&self, namespace: &str, name: &str, f: impl FnOnce(&mut CephClient)) {
        self.with_state(|s| {
            let version = s.next_version();
            let client = s.clients.get_mut(&key(namespace, name)).unwrap();
            f(client);
            client.metadata.generation = Some(client.metadata.generation.unwrap_or(0) + 1);
            client.metadata.resource_version = Some(version);
        });
    }

    /// Mark a CephClient for deletion
    pub(crate) fn delete_client(&self, namespace: &str, name: &str) {
        self.edit_client(namespace, name, |c| {
            c.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        });
    }

    /// Store a CephFilesystem, assigning uid and resource version
    pub(crate) fn insert_filesystem(&self, mut fs: CephFilesystem) {
        self.with_state(|s| {
            let (ns, name) = (fs.namespace().unwrap(), fs.name_any());
            fs.metadata.uid.get_or_insert_with(|| format!("uid-{name}"));
            fs.metadata.generation.get_or_insert(1);
            fs.metadata.resource_version = Some(s.next_version());
            s.filesystems.insert(key(&ns, &name), fs);
        });
    }

    /// Current copy of a CephFilesystem
    pub(crate) fn filesystem(&self, namespace: &str, name: &str) -> Option<CephFilesystem> {
        self.with_state(|s| s.filesystems.get(&key(namespace, name)).cloned())
    }

    /// Mark a CephFilesystem for deletion
    pub(crate) fn delete_filesystem(&self, namespace: &str, name: &str) {
        self.with_state(|s| {
            let version = s.next_version();
            let fs = s.filesystems.get_mut(&key(namespace, name)).unwrap();
            fs.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            fs.metadata.resource_version = Some(version);
        });
    }

    /// Set the readiness resource of `namespace`
    pub(crate) fn set_cluster(&self, namespace: &str, phase: &str, health: &str) {
        let mut cluster = CephCluster::new("rook-ceph", CephClusterSpec::default());
        cluster.metadata.namespace = Some(namespace.to_string());
        cluster.status = Some(CephClusterStatus {
            phase: phase.to_string(),
            ceph_status: Some(CephHealth {
                health: health.to_string(),
            }),
        });
        self.with_state(|s| {
            s.clusters.insert(namespace.to_string(), cluster);
        });
    }

    /// Remove the readiness resource of `namespace`
    pub(crate) fn remove_cluster(&self, namespace: &str) {
        self.with_state(|s| {
            s.clusters.remove(namespace);
        });
    }

    /// Store a secret as-is
    pub(crate) fn insert_secret(&self, mut secret: Secret) {
        self.with_state(|s| {
            let ns = secret.namespace().unwrap();
            secret.metadata.resource_version = Some(s.next_version());
            s.secrets.insert(key(&ns, &secret.name_any()), secret);
        });
    }

    /// Current copy of a secret
    pub(crate) fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.with_state(|s| s.secrets.get(&key(namespace, name)).cloned())
    }

    /// Number of status writes accepted so far
    pub(crate) fn status_writes(&self) -> usize {
        self.with_state(|s| s.status_writes)
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_client(&self, namespace: &str, name: &str) -> Result<Option<CephClient>, Error> {
        Ok(self.client(namespace, name))
    }

    async fn patch_client_status(
        &self,
        client: &CephClient,
        status: &CephClientStatus,
    ) -> Result<CephClient, Error> {
        self.with_state(|s| {
            let k = key(&client.namespace().unwrap(), &client.name_any());
            let mut stored = s
                .clients
                .get(&k)
                .cloned()
                .ok_or_else(|| api_error(404, "NotFound", k.1.clone()))?;
            bump(s, &mut stored, client.resource_version())?;
            stored.status = Some(status.clone());
            s.status_writes += 1;
            s.clients.insert(k, stored.clone());
            Ok(stored)
        })
    }

    async fn set_client_finalizers(
        &self,
        client: &CephClient,
        finalizers: Vec<String>,
    ) -> Result<CephClient, Error> {
        self.with_state(|s| {
            let k = key(&client.namespace().unwrap(), &client.name_any());
            let mut stored = s
                .clients
                .get(&k)
                .cloned()
                .ok_or_else(|| api_error(404, "NotFound", k.1.clone()))?;
            bump(s, &mut stored, client.resource_version())?;
            stored.metadata.finalizers = Some(finalizers);
            if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
                s.clients.remove(&k);
            } else {
                s.clients.insert(k, stored.clone());
            }
            Ok(stored)
        })
    }

    async fn get_filesystem(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CephFilesystem>, Error> {
        Ok(self.filesystem(namespace, name))
    }

    async fn patch_filesystem_status(
        &self,
        fs: &CephFilesystem,
        status: &CephFilesystemStatus,
    ) -> Result<CephFilesystem, Error> {
        self.with_state(|s| {
            let k = key(&fs.namespace().unwrap(), &fs.name_any());
            let mut stored = s
                .filesystems
                .get(&k)
                .cloned()
                .ok_or_else(|| api_error(404, "NotFound", k.1.clone()))?;
            bump(s, &mut stored, fs.resource_version())?;
            stored.status = Some(status.clone());
            s.status_writes += 1;
            s.filesystems.insert(k, stored.clone());
            Ok(stored)
        })
    }

    async fn set_filesystem_finalizers(
        &self,
        fs: &CephFilesystem,
        finalizers: Vec<String>,
    ) -> Result<CephFilesystem, Error> {
        self.with_state(|s| {
            let k = key(&fs.namespace().unwrap(), &fs.name_any());
            let mut stored = s
                .filesystems
                .get(&k)
                .cloned()
                .ok_or_else(|| api_error(404, "NotFound", k.1.clone()))?;
            bump(s, &mut stored, fs.resource_version())?;
            stored.metadata.finalizers = Some(finalizers);
            if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
                s.filesystems.remove(&k);
            } else {
                s.filesystems.insert(k, stored.clone());
            }
            Ok(stored)
        })
    }

    async fn get_ceph_cluster(&self, namespace: &str) -> Result<Option<CephCluster>, Error> {
        Ok(self.with_state(|s| s.clusters.get(namespace).cloned()))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.with_state(|s| {
            let k = key(namespace, &secret.name_any());
            if s.secrets.contains_key(&k) {
                return Err(api_error(409, "AlreadyExists", k.1));
            }
            let mut stored = secret.clone();
            stored.metadata.namespace = Some(namespace.to_string());
            stored.metadata.resource_version = Some(s.next_version());
            s.secrets.insert(k, stored);
            Ok(())
        })
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.with_state(|s| {
            let k = key(namespace, &secret.name_any());
            let mut stored = s
                .secrets
                .get(&k)
                .cloned()
                .ok_or_else(|| api_error(404, "NotFound", k.1.clone()))?;
            bump(s, &mut stored, secret.resource_version())?;
            let version = stored.metadata.resource_version.take();
            let mut replacement = secret.clone();
            replacement.metadata.namespace = Some(namespace.to_string());
            replacement.metadata.resource_version = version;
            s.secrets.insert(k, replacement);
            Ok(())
        })
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.with_state(|s| {
            s.secrets.remove(&key(namespace, name));
        });
        Ok(())
    }
}

/// A published Event
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecordedEvent {
    pub(crate) name: String,
    pub(crate) warning: bool,
    pub(crate) reason: String,
}

/// Publisher that keeps every Event in memory
#[derive(Clone, Default)]
pub(crate) struct RecordingEvents {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEvents {
    /// Reasons published so far, in order
    pub(crate) fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    /// Every Event published so far
    pub(crate) fn all(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            name: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
        });
    }
}

/// Context wired to the fakes and `executor`
pub(crate) fn fake_context(
    kube: &FakeKube,
    events: &RecordingEvents,
    executor: impl CommandExecutor + 'static,
) -> Arc<Context> {
    Arc::new(Context::for_testing(
        Arc::new(kube.clone()),
        Arc::new(executor),
        Arc::new(events.clone()),
    ))
}
