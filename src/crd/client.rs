//! CephClient Custom Resource Definition
//!
//! A CephClient declares a cephx credential for an application: the caps it
//! is granted and where its key is published.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{upsert_condition, CephxStatus, Condition, Phase, SecuritySpec};

/// Specification for a CephClient
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cephalon.dev",
    version = "v1alpha1",
    kind = "CephClient",
    plural = "cephclients",
    shortname = "ccli",
    status = "CephClientStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".status.info.secretName"}"#,
    printcolumn = r#"{"name":"KeyGen","type":"integer","jsonPath":".status.cephx.keyGeneration"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CephClientSpec {
    /// Subsystem (`mon`, `osd`, `mgr`, `mds`) to capability string
    #[serde(default)]
    pub caps: BTreeMap<String, String>,

    /// Secret to publish the key in; defaults to `ceph-client-<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Do not publish a secret, and delete one this client published before
    #[serde(default)]
    pub remove_secret: bool,

    /// Key rotation settings
    #[serde(default)]
    pub security: SecuritySpec,
}

/// Status for a CephClient
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephClientStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Published artifacts, currently `secretName`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,

    /// Key in effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cephx: Option<CephxStatus>,

    /// Generation of the spec last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the client state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl CephClientStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the info map and return self for chaining
    pub fn info(mut self, info: BTreeMap<String, String>) -> Self {
        self.info = info;
        self
    }

    /// Set the key status and return self for chaining
    pub fn cephx(mut self, cephx: Option<CephxStatus>) -> Self {
        self.cephx = cephx;
        self
    }

    /// Record the reconciled spec generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        upsert_condition(&mut self.conditions, condition);
        self
    }
}
