//! Integration tests for the cephalon operator
//!
//! These tests run against a kind cluster with the cephalon CRDs installed.
//! They exercise the API surface the operator depends on: schema defaults,
//! status subresources and finalizer handling. No Ceph cluster is needed.
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
