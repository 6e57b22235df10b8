//! Secret materialization
//!
//! Publishes a credential's key as a Secret controlled by its CephClient.
//! A secret is only ever written or deleted by the resource that controls
//! it; anything else at the target name is a conflict.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::cephx::{is_admin, secret_name};
use super::store::{namespaced_name, KubeClient};
use crate::ceph::ADMIN_ENTITY;
use crate::crd::CephClient;
use crate::Error;

/// Secret key holding the user id
pub const USER_ID_KEY: &str = "userID";
/// Secret key holding the user's key
pub const USER_KEY_KEY: &str = "userKey";
/// Secret key holding the admin id (administrative credentials only)
pub const ADMIN_ID_KEY: &str = "adminID";
/// Secret key holding the admin key (administrative credentials only)
pub const ADMIN_KEY_KEY: &str = "adminKey";

/// Who controls the secret at the target name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretOwnership {
    /// Nothing exists at the name
    Absent,
    /// Controlled by the reconciled resource
    OwnedBySelf,
    /// Controlled by another CephClient
    OwnedBySibling {
        /// Name of the controlling CephClient
        owner: String,
    },
    /// Controlled by another kind of resource, or by nothing
    Foreign {
        /// `Kind/name` of the controller, if any
        owner: Option<String>,
    },
}

/// Classify `existing` relative to `client`
pub fn classify_ownership(client: &CephClient, existing: Option<&Secret>) -> SecretOwnership {
    let Some(secret) = existing else {
        return SecretOwnership::Absent;
    };
    let Some(controller) = secret
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true))
    else {
        return SecretOwnership::Foreign { owner: None };
    };

    if !is_client_kind(controller) {
        return SecretOwnership::Foreign {
            owner: Some(format!("{}/{}", controller.kind, controller.name)),
        };
    }

    let uid_matches = match client.uid() {
        Some(uid) if !controller.uid.is_empty() => uid == controller.uid,
        _ => true,
    };
    if controller.name == client.name_any() && uid_matches {
        SecretOwnership::OwnedBySelf
    } else {
        SecretOwnership::OwnedBySibling {
            owner: controller.name.clone(),
        }
    }
}

fn is_client_kind(owner: &OwnerReference) -> bool {
    let group = owner.api_version.split('/').next().unwrap_or_default();
    owner.kind == CephClient::kind(&()) && group == CephClient::group(&())
}

/// Build the secret publishing `key` for `client`
pub fn build_secret(client: &CephClient, entity: &str, key: &str, admin_key: Option<&str>) -> Secret {
    let user_id = entity.strip_prefix("client.").unwrap_or(entity);
    let mut data = BTreeMap::from([
        (USER_ID_KEY.to_string(), user_id.to_string()),
        (USER_KEY_KEY.to_string(), key.to_string()),
    ]);
    if let Some(admin_key) = admin_key {
        let admin_id = ADMIN_ENTITY.strip_prefix("client.").unwrap_or(ADMIN_ENTITY);
        data.insert(ADMIN_ID_KEY.to_string(), admin_id.to_string());
        data.insert(ADMIN_KEY_KEY.to_string(), admin_key.to_string());
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(client)),
            namespace: client.namespace(),
            owner_references: client.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

/// Admin key to publish alongside the user key, if the credential is administrative
pub fn admin_key_for(client: &CephClient, key: &str) -> Option<String> {
    is_admin(&client.spec.caps).then(|| key.to_string())
}

/// Converge the secret at the client's target name.
///
/// With `removeSecret` set, a secret this client controls is deleted and
/// anything else is left alone. Otherwise `desired` is created, or replaces
/// a secret this client controls. Any other existing secret is an
/// ownership conflict.
pub async fn reconcile_client_secret<K: KubeClient + ?Sized>(
    kube: &K,
    client: &CephClient,
    desired: Option<Secret>,
) -> Result<(), Error> {
    let (namespace, _) = namespaced_name(client)?;
    let name = secret_name(client);
    let existing = kube.get_secret(&namespace, &name).await?;
    let ownership = classify_ownership(client, existing.as_ref());

    if client.spec.remove_secret {
        match ownership {
            SecretOwnership::Absent => debug!(secret = %name, "secret already absent"),
            SecretOwnership::OwnedBySelf => {
                kube.delete_secret(&namespace, &name).await?;
                info!(secret = %name, "deleted client secret");
            }
            other => {
                debug!(secret = %name, ownership = ?other, "leaving secret owned by another resource")
            }
        }
        return Ok(());
    }

    let Some(mut desired) = desired else {
        return Err(Error::internal(
            "secret materializer",
            format!("no secret payload for {name}"),
        ));
    };

    match ownership {
        SecretOwnership::Absent => {
            kube.create_secret(&namespace, &desired).await?;
            info!(secret = %name, "created client secret");
            Ok(())
        }
        SecretOwnership::OwnedBySelf => {
            desired.metadata.resource_version = existing.and_then(|s| s.metadata.resource_version);
            kube.replace_secret(&namespace, &desired).await?;
            debug!(secret = %name, "updated client secret");
            Ok(())
        }
        SecretOwnership::OwnedBySibling { owner } => {
            warn!(secret = %name, owner = %owner, "secret is controlled by another CephClient");
            Err(Error::ownership_conflict(
                &name,
                format!("controlled by CephClient {owner}"),
            ))
        }
        SecretOwnership::Foreign { owner } => {
            let msg = match owner {
                Some(owner) => format!("controlled by {owner}"),
                None => "exists without a controlling owner".to_string(),
            };
            warn!(secret = %name, reason = %msg, "refusing to overwrite secret");
            Err(Error::ownership_conflict(&name, msg))
        }
    }
}
