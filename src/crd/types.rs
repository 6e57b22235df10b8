//! Supporting types shared by the cephalon CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a reconciled resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum Phase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Reconcile in progress or waiting on the cluster
    Progressing,
    /// Declared state is in effect
    Ready,
    /// Needs a spec change or operator intervention
    Failed,
    /// Cluster-side teardown in progress
    Deleting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Replace any condition of the same type, keeping the others
pub(crate) fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    conditions.retain(|c| c.type_ != condition.type_);
    conditions.push(condition);
}

/// When the operator replaces a credential's key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyRotationPolicy {
    /// Provision once, never rotate
    #[default]
    Disabled,
    /// Rotate whenever the declared generation exceeds the applied one
    KeyGeneration,
}

/// Cephx key settings of a credential
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CephxConfig {
    /// Rotation policy
    #[serde(default)]
    pub key_rotation_policy: KeyRotationPolicy,

    /// Target generation under the `KeyGeneration` policy
    #[serde(default)]
    pub key_generation: u32,
}

/// Security settings of a credential
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecuritySpec {
    /// Cephx key settings
    #[serde(default)]
    pub cephx: CephxConfig,
}

/// Last applied key of a credential.
///
/// Generation 0 means unknown: the key predates tracking and is never
/// rotated automatically.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CephxStatus {
    /// Generation of the key in effect
    #[serde(default)]
    pub key_generation: u32,

    /// Cluster version running when the key was issued
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_ceph_version: String,
}

impl CephxStatus {
    /// Status for a key issued at `generation` under `version`
    pub fn new(generation: u32, version: impl Into<String>) -> Self {
        Self {
            key_generation: generation,
            key_ceph_version: version.into(),
        }
    }

    /// True if the generation of the key in effect is not known
    pub fn is_unknown(&self) -> bool {
        self.key_generation == 0
    }
}
