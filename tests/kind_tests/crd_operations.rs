//! Integration tests for CRD operations
//!
//! These tests tell the story of how the operator's object store behaves
//! against a real API server: status writes, finalizers, and the
//! resource-version preconditions the reconcilers rely on.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use tokio::time::sleep;

use cephalon::controller::{KubeClient, KubeClientImpl, CLIENT_FINALIZER};
use cephalon::crd::{
    CephClient, CephClientSpec, CephClientStatus, CephFilesystem, CephxStatus, Phase,
};

use super::helpers::{ensure_test_cluster, TEST_NAMESPACE};

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_client(name: &str) -> CephClient {
    let mut client = CephClient::new(
        name,
        CephClientSpec {
            caps: BTreeMap::from([
                ("mon".to_string(), "allow r".to_string()),
                ("osd".to_string(), "allow rw pool=rbd".to_string()),
            ]),
            ..Default::default()
        },
    );
    client.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    client
}

async fn cleanup_client(client: &Client, name: &str) {
    let api: Api<CephClient> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    if let Ok(mut existing) = api.get(name).await {
        existing.metadata.finalizers = None;
        let _ = api.replace(name, &PostParams::default(), &existing).await;
    }
    let _ = api.delete(name, &DeleteParams::default()).await;
    sleep(Duration::from_millis(500)).await;
}

// =============================================================================
// Status Stories
// =============================================================================

/// Story: the operator records a provisioned credential in status
///
/// The status carries the key generation and the secret name so that later
/// passes know which key is live and where it was published.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_write_is_persisted() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-status";
    cleanup_client(&client, name).await;

    let api: Api<CephClient> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let created = api
        .create(&PostParams::default(), &sample_client(name))
        .await
        .expect("failed to create client");

    let store = KubeClientImpl::new(client.clone());
    let status = CephClientStatus::with_phase(Phase::Ready)
        .info(BTreeMap::from([(
            "secretName".to_string(),
            "ceph-client-it-status".to_string(),
        )]))
        .cephx(Some(CephxStatus::new(1, "19.2.0")))
        .observed_generation(created.metadata.generation);
    store
        .patch_client_status(&created, &status)
        .await
        .expect("status write failed");

    let stored = store
        .get_client(TEST_NAMESPACE, name)
        .await
        .expect("get failed")
        .expect("client missing");
    let stored_status = stored.status.expect("status missing");
    assert_eq!(stored_status.phase, Phase::Ready);
    assert_eq!(
        stored_status.info.get("secretName").map(String::as_str),
        Some("ceph-client-it-status")
    );
    assert_eq!(
        stored_status.cephx.map(|c| c.key_generation),
        Some(1)
    );

    cleanup_client(&client, name).await;
}

/// Story: a status write based on a stale read is refused
///
/// Rotation is recorded in status before the secret is touched, so a pass
/// working from an outdated copy must not overwrite a newer generation.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_stale_status_write_conflicts() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-stale";
    cleanup_client(&client, name).await;

    let api: Api<CephClient> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let stale = api
        .create(&PostParams::default(), &sample_client(name))
        .await
        .expect("failed to create client");

    let store = KubeClientImpl::new(client.clone());
    store
        .patch_client_status(&stale, &CephClientStatus::with_phase(Phase::Progressing))
        .await
        .expect("first write failed");

    let err = store
        .patch_client_status(&stale, &CephClientStatus::with_phase(Phase::Ready))
        .await
        .expect_err("stale write should be refused");
    assert!(err.is_conflict(), "expected 409, got {err}");

    cleanup_client(&client, name).await;
}

// =============================================================================
// Finalizer Stories
// =============================================================================

/// Story: deletion waits until the operator releases its finalizer
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_finalizer_holds_deletion() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-finalizer";
    cleanup_client(&client, name).await;

    let api: Api<CephClient> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let created = api
        .create(&PostParams::default(), &sample_client(name))
        .await
        .expect("failed to create client");

    let store = KubeClientImpl::new(client.clone());
    store
        .set_client_finalizers(&created, vec![CLIENT_FINALIZER.to_string()])
        .await
        .expect("adding finalizer failed");

    api.delete(name, &DeleteParams::default())
        .await
        .expect("delete failed");

    let terminating = store
        .get_client(TEST_NAMESPACE, name)
        .await
        .expect("get failed")
        .expect("client should still exist while finalized");
    assert!(terminating.metadata.deletion_timestamp.is_some());
    assert_eq!(terminating.finalizers(), &[CLIENT_FINALIZER.to_string()]);

    store
        .set_client_finalizers(&terminating, Vec::new())
        .await
        .expect("releasing finalizer failed");

    let mut gone = false;
    for _ in 0..20 {
        if store
            .get_client(TEST_NAMESPACE, name)
            .await
            .expect("get failed")
            .is_none()
        {
            gone = true;
            break;
        }
        sleep(Duration::from_millis(250)).await;
    }
    assert!(gone, "client should be removed once the finalizer is released");
}

// =============================================================================
// Schema Stories
// =============================================================================

/// Story: a filesystem manifest written by hand is accepted by the schema
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_filesystem_manifest_accepted() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let api: Api<CephFilesystem> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "it-myfs";
    let _ = api.delete(name, &DeleteParams::default()).await;
    sleep(Duration::from_millis(500)).await;

    let manifest = serde_yaml::from_str::<CephFilesystem>(&format!(
        r#"
apiVersion: cephalon.dev/v1alpha1
kind: CephFilesystem
metadata:
  name: {name}
  namespace: {TEST_NAMESPACE}
spec:
  metadataPool: {{}}
  dataPools:
    - {{}}
    - name: archive
  metadataServer:
    activeCount: 2
    activeStandby: true
  preservePoolsOnDelete: true
"#
    ))
    .expect("manifest should parse");

    let created = api
        .create(&PostParams::default(), &manifest)
        .await
        .expect("failed to create filesystem");

    assert_eq!(created.spec.metadata_server.active_count, 2);
    assert!(created.spec.metadata_server.active_standby);
    assert!(created.spec.preserve_pools_on_delete);
    assert_eq!(
        created.spec.data_pool_names(name),
        vec!["it-myfs-data0".to_string(), "archive".to_string()]
    );

    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Story: the readiness lookup sees no cluster in an empty namespace
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_missing_ceph_cluster_reads_as_none() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let store = KubeClientImpl::new(client);

    let cluster = store
        .get_ceph_cluster(TEST_NAMESPACE)
        .await
        .expect("list failed");
    assert!(cluster.is_none());
}
