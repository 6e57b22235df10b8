//! CephCluster readiness resource
//!
//! Owned by whatever deploys the storage cluster. This operator only reads
//! its status to decide whether cluster commands are safe to issue, so the
//! spec is left opaque.

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase value reported by a healthy cluster
pub const CLUSTER_PHASE_READY: &str = "Ready";
/// Health strings under which commands may be issued
pub const USABLE_HEALTH: [&str; 2] = ["HEALTH_OK", "HEALTH_WARN"];

/// Specification for a CephCluster (not interpreted)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cephalon.dev",
    version = "v1alpha1",
    kind = "CephCluster",
    plural = "cephclusters",
    shortname = "ccluster",
    status = "CephClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.cephStatus.health"}"#
)]
pub struct CephClusterSpec {
    /// Free-form settings owned by the cluster deployer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub settings: Option<serde_json::Value>,
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

/// Status for a CephCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterStatus {
    /// Deployment phase (e.g. `Progressing`, `Ready`)
    #[serde(default)]
    pub phase: String,

    /// Health as last reported by the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceph_status: Option<CephHealth>,
}

/// Cluster health summary
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CephHealth {
    /// `HEALTH_OK`, `HEALTH_WARN` or `HEALTH_ERR`
    #[serde(default)]
    pub health: String,
}

impl CephCluster {
    /// True if commands may be issued against this cluster
    pub fn is_ready(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        status.phase == CLUSTER_PHASE_READY
            && status
                .ceph_status
                .as_ref()
                .is_some_and(|s| USABLE_HEALTH.contains(&s.health.as_str()))
    }
}
