//! Credential lifecycle
//!
//! Turns a CephClient spec into a cephx entity with caps, decides whether
//! the key is due for rotation, and provisions it. Rotation is
//! generation-based: a key is replaced only when the declared generation
//! exceeds the applied one, and a credential whose applied generation is
//! unknown is never rotated.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, info};

use crate::ceph::auth::{self, Capability};
use crate::ceph::version::running_version;
use crate::ceph::{ClusterInfo, CommandExecutor};
use crate::crd::{CephClient, CephClientStatus, CephxConfig, CephxStatus, KeyRotationPolicy, Phase};
use crate::Error;

/// Status info key holding the published secret's name
pub const SECRET_NAME_KEY: &str = "secretName";

/// Cap string granting full monitor access
const ADMIN_MON_CAP: &str = "allow *";

/// Entity name and caps derived from a spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientEntity {
    /// `client.<name>`
    pub entity: String,
    /// Non-empty caps, ordered by subsystem
    pub caps: Vec<Capability>,
}

impl ClientEntity {
    /// Caps as `<subsystem> <capability>` strings
    pub fn cap_strings(&self) -> Vec<String> {
        self.caps.iter().map(ToString::to_string).collect()
    }
}

/// Reject a client with no name, no namespace, or no usable caps
pub fn validate_client(client: &CephClient) -> Result<(), Error> {
    let name = client.name_any();
    if name.is_empty() {
        return Err(Error::validation("CephClient", "missing name"));
    }
    if client.namespace().unwrap_or_default().is_empty() {
        return Err(Error::validation(&name, "missing namespace"));
    }
    if !client.spec.caps.values().any(|cap| !cap.is_empty()) {
        return Err(Error::validation(&name, "at least one capability is required"));
    }
    Ok(())
}

/// Build the entity for `name`, skipping empty caps
pub fn gen_client_entity(name: &str, caps: &BTreeMap<String, String>) -> ClientEntity {
    ClientEntity {
        entity: format!("client.{name}"),
        caps: caps
            .iter()
            .filter(|(_, grant)| !grant.is_empty())
            .map(|(subsystem, grant)| Capability::new(subsystem, grant))
            .collect(),
    }
}

/// Default name of a client's secret
pub fn default_secret_name(name: &str) -> String {
    format!("ceph-client-{name}")
}

/// Secret name a client publishes to
pub fn secret_name(client: &CephClient) -> String {
    client
        .spec
        .secret_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_secret_name(&client.name_any()))
}

/// Status info for a client; empty when no secret is published
pub fn generate_status_info(client: &CephClient) -> BTreeMap<String, String> {
    if client.spec.remove_secret {
        return BTreeMap::new();
    }
    BTreeMap::from([(SECRET_NAME_KEY.to_string(), secret_name(client))])
}

/// True if the credential is administrative (full monitor access)
pub fn is_admin(caps: &BTreeMap<String, String>) -> bool {
    caps.get("mon").is_some_and(|cap| cap == ADMIN_MON_CAP)
}

/// What the persisted status says about the key in effect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    /// Never provisioned by this operator
    Fresh,
    /// Pre-existing key of indeterminate generation
    Unknown,
    /// Key at a known generation
    Known(u32),
}

/// Classify the key state of a client from its last persisted status
pub fn key_state(status: Option<&CephClientStatus>) -> KeyState {
    let Some(status) = status else {
        return KeyState::Fresh;
    };
    match &status.cephx {
        Some(cephx) if cephx.is_unknown() => KeyState::Unknown,
        Some(cephx) => KeyState::Known(cephx.key_generation),
        // Ready without key tracking means the key predates tracking
        None if status.phase == Phase::Ready => KeyState::Unknown,
        None => KeyState::Fresh,
    }
}

/// Action to take on the key during this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Leave the key and its recorded generation alone
    Keep,
    /// Record generation 1 for a newly provisioned key
    Initialize,
    /// Replace the key and record generation `target`
    Rotate {
        /// Generation the new key will carry
        target: u32,
    },
}

/// Decide the key action for `state` under `policy`
pub fn decide_key_action(state: KeyState, policy: &CephxConfig) -> KeyAction {
    let current = match state {
        KeyState::Unknown => return KeyAction::Keep,
        KeyState::Fresh => 1,
        KeyState::Known(generation) => generation,
    };

    let rotation_due = policy.key_rotation_policy == KeyRotationPolicy::KeyGeneration
        && policy.key_generation > current;

    match (state, rotation_due) {
        (_, true) => KeyAction::Rotate {
            target: policy.key_generation,
        },
        (KeyState::Fresh, false) => KeyAction::Initialize,
        _ => KeyAction::Keep,
    }
}

/// Result of provisioning a credential
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedCredential {
    /// Entity the key belongs to
    pub entity: String,
    /// Key in effect after this pass
    pub key: String,
    /// Key status to persist
    pub cephx: CephxStatus,
    /// True if the key was replaced in this pass
    pub rotated: bool,
}

/// Provision the entity, converge its caps, and apply `action`.
///
/// A failed rotation returns an error before any status is produced, so
/// the persisted generation never advances past a key the cluster did not
/// confirm.
pub async fn provision_credential<E: CommandExecutor + ?Sized>(
    executor: &E,
    cluster: &ClusterInfo,
    entity: &ClientEntity,
    action: KeyAction,
    previous: Option<&CephxStatus>,
) -> Result<ProvisionedCredential, Error> {
    let mut key = auth::get_or_create_key(executor, cluster, &entity.entity, &entity.caps).await?;
    auth::update_caps(executor, cluster, &entity.entity, &entity.caps).await?;

    let (cephx, rotated) = match action {
        KeyAction::Keep => {
            debug!(entity = %entity.entity, "keeping existing key");
            (previous.cloned().unwrap_or_default(), false)
        }
        KeyAction::Initialize => {
            let version = running_version(executor, cluster).await?;
            (CephxStatus::new(1, version.to_string()), false)
        }
        KeyAction::Rotate { target } => {
            let version = running_version(executor, cluster).await?;
            key = auth::rotate_key(executor, cluster, &entity.entity).await?;
            info!(entity = %entity.entity, generation = target, "key rotated");
            (CephxStatus::new(target, version.to_string()), true)
        }
    };

    Ok(ProvisionedCredential {
        entity: entity.entity.clone(),
        key,
        cephx,
        rotated,
    })
}
