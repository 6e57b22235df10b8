//! Object-store access for the controllers
//!
//! Every write that replaces state carries the resource version it was
//! computed from, so a concurrent writer turns into a 409 and the pass is
//! retried with fresh reads instead of clobbering newer state.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::crd::{CephClient, CephClientStatus, CephCluster, CephFilesystem, CephFilesystemStatus};
use crate::Error;

/// Field manager for status and metadata writes
pub const FIELD_MANAGER: &str = "cephalon-controller";

/// Kubernetes operations used by the controllers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a CephClient; `None` if it does not exist
    async fn get_client(&self, namespace: &str, name: &str) -> Result<Option<CephClient>, Error>;

    /// Replace the status of `client`, conditional on its resource version
    async fn patch_client_status(
        &self,
        client: &CephClient,
        status: &CephClientStatus,
    ) -> Result<CephClient, Error>;

    /// Replace the finalizers of `client`, conditional on its resource version
    async fn set_client_finalizers(
        &self,
        client: &CephClient,
        finalizers: Vec<String>,
    ) -> Result<CephClient, Error>;

    /// Fetch a CephFilesystem; `None` if it does not exist
    async fn get_filesystem(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CephFilesystem>, Error>;

    /// Replace the status of `fs`, conditional on its resource version
    async fn patch_filesystem_status(
        &self,
        fs: &CephFilesystem,
        status: &CephFilesystemStatus,
    ) -> Result<CephFilesystem, Error>;

    /// Replace the finalizers of `fs`, conditional on its resource version
    async fn set_filesystem_finalizers(
        &self,
        fs: &CephFilesystem,
        finalizers: Vec<String>,
    ) -> Result<CephFilesystem, Error>;

    /// First CephCluster in `namespace`, if any
    async fn get_ceph_cluster(&self, namespace: &str) -> Result<Option<CephCluster>, Error>;

    /// Fetch a secret; `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret; fails if the name is taken
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Replace a secret; `secret` must carry the resource version it replaces
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; an absent secret counts as deleted
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Server-side apply of `status`, preconditioned on the object's version
    async fn apply_status<K>(&self, obj: &K, status: &impl Serialize) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let (namespace, name) = namespaced_name(obj)?;
        let patch = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "metadata": {
                "name": name,
                "resourceVersion": obj.resource_version(),
            },
            "status": status,
        });
        let updated = self
            .api::<K>(&namespace)
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn merge_finalizers<K>(&self, obj: &K, finalizers: Vec<String>) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let (namespace, name) = namespaced_name(obj)?;
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "finalizers": finalizers,
            }
        });
        let updated = self
            .api::<K>(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }
}

/// Namespace and name of a namespaced object
pub(crate) fn namespaced_name<K: Resource>(obj: &K) -> Result<(String, String), Error> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::internal("object store", format!("{} has no namespace", obj.name_any())))?;
    Ok((namespace, obj.name_any()))
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_client(&self, namespace: &str, name: &str) -> Result<Option<CephClient>, Error> {
        Ok(self.api::<CephClient>(namespace).get_opt(name).await?)
    }

    async fn patch_client_status(
        &self,
        client: &CephClient,
        status: &CephClientStatus,
    ) -> Result<CephClient, Error> {
        self.apply_status(client, status).await
    }

    async fn set_client_finalizers(
        &self,
        client: &CephClient,
        finalizers: Vec<String>,
    ) -> Result<CephClient, Error> {
        self.merge_finalizers(client, finalizers).await
    }

    async fn get_filesystem(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CephFilesystem>, Error> {
        Ok(self.api::<CephFilesystem>(namespace).get_opt(name).await?)
    }

    async fn patch_filesystem_status(
        &self,
        fs: &CephFilesystem,
        status: &CephFilesystemStatus,
    ) -> Result<CephFilesystem, Error> {
        self.apply_status(fs, status).await
    }

    async fn set_filesystem_finalizers(
        &self,
        fs: &CephFilesystem,
        finalizers: Vec<String>,
    ) -> Result<CephFilesystem, Error> {
        self.merge_finalizers(fs, finalizers).await
    }

    async fn get_ceph_cluster(&self, namespace: &str) -> Result<Option<CephCluster>, Error> {
        let list = self
            .api::<CephCluster>(namespace)
            .list(&ListParams::default().limit(1))
            .await?;
        Ok(list.items.into_iter().next())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.api::<Secret>(namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.api::<Secret>(namespace)
            .replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .api::<Secret>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
