//! CephFilesystem Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{upsert_condition, Condition, Phase};

/// Specification for a CephFilesystem
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cephalon.dev",
    version = "v1alpha1",
    kind = "CephFilesystem",
    plural = "cephfilesystems",
    shortname = "cfs",
    status = "CephFilesystemStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Active","type":"integer","jsonPath":".spec.metadataServer.activeCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CephFilesystemSpec {
    /// Pool holding filesystem metadata
    #[serde(default)]
    pub metadata_pool: PoolSpec,

    /// Pools holding file data; the first is the default
    #[serde(default)]
    pub data_pools: Vec<PoolSpec>,

    /// Metadata server topology
    #[serde(default)]
    pub metadata_server: MetadataServerSpec,

    /// Leave the filesystem in the cluster when the resource is deleted
    #[serde(default)]
    pub preserve_filesystem_on_delete: bool,

    /// Keep the pools when the filesystem is removed
    #[serde(default)]
    pub preserve_pools_on_delete: bool,
}

/// A pool backing the filesystem
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PoolSpec {
    /// Explicit pool name; derived from the filesystem name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Metadata server topology
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataServerSpec {
    /// Number of active ranks
    #[serde(default = "default_active_count")]
    pub active_count: u32,

    /// Run a standby-replay daemon per active rank
    #[serde(default)]
    pub active_standby: bool,
}

fn default_active_count() -> u32 {
    1
}

impl Default for MetadataServerSpec {
    fn default() -> Self {
        Self {
            active_count: default_active_count(),
            active_standby: false,
        }
    }
}

impl CephFilesystemSpec {
    /// Validate the filesystem specification
    pub fn validate(&self, fs_name: &str) -> Result<(), crate::Error> {
        if self.data_pools.is_empty() {
            return Err(crate::Error::validation(
                fs_name,
                "at least one data pool is required",
            ));
        }
        if self.metadata_server.active_count == 0 {
            return Err(crate::Error::validation(
                fs_name,
                "metadataServer.activeCount must be at least 1",
            ));
        }

        let metadata = self.metadata_pool_name(fs_name);
        let data = self.data_pool_names(fs_name);
        let mut seen = std::collections::BTreeSet::new();
        for pool in std::iter::once(&metadata).chain(&data) {
            if pool.is_empty() {
                return Err(crate::Error::validation(fs_name, "pool names must not be empty"));
            }
            if !seen.insert(pool.as_str()) {
                return Err(crate::Error::validation(
                    fs_name,
                    format!("pool {pool:?} is declared more than once"),
                ));
            }
        }
        Ok(())
    }

    /// Resolved metadata pool name (`<fs>-metadata` by default)
    pub fn metadata_pool_name(&self, fs_name: &str) -> String {
        self.metadata_pool
            .name
            .clone()
            .unwrap_or_else(|| format!("{fs_name}-metadata"))
    }

    /// Resolved data pool names (`<fs>-data<N>` by default), in order
    pub fn data_pool_names(&self, fs_name: &str) -> Vec<String> {
        self.data_pools
            .iter()
            .enumerate()
            .map(|(i, pool)| pool.name.clone().unwrap_or_else(|| format!("{fs_name}-data{i}")))
            .collect()
    }
}

/// Status for a CephFilesystem
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephFilesystemStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Numeric filesystem id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsid: Option<i64>,

    /// Rank to the name of the daemon filling it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub active_daemons: BTreeMap<String, String>,

    /// Generation of the spec last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the filesystem state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl CephFilesystemStatus {
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

    /// Set the filesystem id and return self for chaining
    pub fn fsid(mut self, id: i64) -> Self {
        self.fsid = Some(id);
        self
    }

    /// Set the rank map and return self for chaining
    pub fn active_daemons(mut self, daemons: BTreeMap<String, String>) -> Self {
        self.active_daemons = daemons;
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
