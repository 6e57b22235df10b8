//! Cephalon - Kubernetes operator control plane for Ceph credentials and CephFS
//!
//! Cephalon reconciles two custom resources against a running Ceph cluster:
//!
//! - `CephClient` declares a cephx identity. The operator provisions the
//!   entity, keeps its capabilities in step, rotates its key on request and
//!   publishes the key in an owned Secret.
//! - `CephFilesystem` declares a CephFS filesystem. The operator creates its
//!   pools, converges MDS rank and standby-replay settings, and tears the
//!   filesystem down in a safe order on deletion.
//!
//! Both wait for the namespace's `CephCluster` to report a usable phase and
//! health before issuing any cluster command.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (CephClient, CephFilesystem, CephCluster)
//! - [`controller`] - Reconciliation logic and the shared controller context
//! - [`ceph`] - Cluster command execution and response decoding
//! - [`config`] - Operator settings and requeue intervals
//! - [`events`] - Kubernetes Event publishing
//! - [`retry`] - Backoff for startup-time API calls
//! - [`telemetry`] - Structured logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod ceph;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
