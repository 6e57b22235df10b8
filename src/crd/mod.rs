//! Custom Resource Definitions for cephalon
//!
//! `CephClient` and `CephFilesystem` are reconciled by this operator.
//! `CephCluster` is read only, as the readiness gate for cluster commands.

mod client;
mod cluster;
mod filesystem;
mod types;

pub use client::{CephClient, CephClientSpec, CephClientStatus};
pub use cluster::{CephCluster, CephClusterSpec, CephClusterStatus, CephHealth};
pub use filesystem::{
    CephFilesystem, CephFilesystemSpec, CephFilesystemStatus, MetadataServerSpec, PoolSpec,
};
pub use types::{
    CephxConfig, CephxStatus, Condition, ConditionStatus, KeyRotationPolicy, Phase, SecuritySpec,
};
