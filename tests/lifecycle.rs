//! End-to-end lifecycle scenarios against the in-memory control plane

use std::sync::Arc;

use nst_init::config::Config;
use nst_init::control_plane::{
    ControlPlane, InMemoryControlPlane, Operation, Resource, ResourceKind,
};
use nst_init::lifecycle::{DeployRequest, Lifecycle};
use nst_init::Error;

fn setup() -> (Arc<InMemoryControlPlane>, Lifecycle) {
    let cp = Arc::new(InMemoryControlPlane::new("apps"));
    let config = Config::new("apps", "example.com", "https", Some("traefik")).unwrap();
    (cp.clone(), Lifecycle::new(cp, config))
}

fn alice_my_app() -> DeployRequest {
    DeployRequest {
        owner: "Alice".to_string(),
        app_name: "My App".to_string(),
        image: "ghcr.io/a/b:latest".to_string(),
        port: Some(3000),
    }
}

#[tokio::test]
async fn deploy_derives_name_host_and_url() {
    let (cp, lifecycle) = setup();
    let deployed = lifecycle.deploy(&alice_my_app()).await.unwrap();

    assert_eq!(deployed.internal_name, "alice-my-app");
    assert_eq!(deployed.host, "my-app.example.com");
    assert_eq!(deployed.url, "https://my-app.example.com");

    assert!(cp.contains(ResourceKind::Workload, "alice-my-app").await);
    assert!(cp.contains(ResourceKind::Endpoint, "alice-my-app").await);
    assert!(cp.contains(ResourceKind::Route, "alice-my-app-ing").await);
}

#[tokio::test]
async fn invalid_requests_make_no_control_plane_calls() {
    let (cp, lifecycle) = setup();

    let blank_owner = DeployRequest {
        owner: String::new(),
        app_name: "x".to_string(),
        image: "img".to_string(),
        port: Some(80),
    };
    let err = lifecycle.deploy(&blank_owner).await.unwrap_err();
    assert!(err.to_string().contains("owner required"));

    let bad_port = DeployRequest {
        port: Some(70000),
        ..alice_my_app()
    };
    let err = lifecycle.deploy(&bad_port).await.unwrap_err();
    assert!(err.to_string().contains("port must be between 1 and 65535"));

    assert!(cp.journal().await.is_empty());
    assert!(cp.is_empty().await);
}

#[tokio::test]
async fn deploying_twice_converges_to_same_specs() {
    let (cp, lifecycle) = setup();
    lifecycle.deploy(&alice_my_app()).await.unwrap();
    let before = [
        cp.get(ResourceKind::Workload, "alice-my-app").await.unwrap(),
        cp.get(ResourceKind::Endpoint, "alice-my-app").await.unwrap(),
        cp.get(ResourceKind::Route, "alice-my-app-ing").await.unwrap(),
    ];

    lifecycle.deploy(&alice_my_app()).await.unwrap();
    let after = [
        cp.get(ResourceKind::Workload, "alice-my-app").await.unwrap(),
        cp.get(ResourceKind::Endpoint, "alice-my-app").await.unwrap(),
        cp.get(ResourceKind::Route, "alice-my-app-ing").await.unwrap(),
    ];

    for (old, new) in before.iter().zip(after.iter()) {
        match (old, new) {
            (Resource::Workload(a), Resource::Workload(b)) => assert_eq!(a.spec, b.spec),
            (Resource::Endpoint(a), Resource::Endpoint(b)) => assert_eq!(a.spec, b.spec),
            (Resource::Route(a), Resource::Route(b)) => assert_eq!(a.spec, b.spec),
            _ => panic!("kind changed across deploys"),
        }
        assert_eq!(old.metadata().labels, new.metadata().labels);
        assert_eq!(old.created_at(), new.created_at());
    }
    assert_eq!(cp.len().await, 3);
}

#[tokio::test]
async fn remove_with_partial_state_then_list_is_clean() {
    let (cp, lifecycle) = setup();
    lifecycle.deploy(&alice_my_app()).await.unwrap();

    // Out-of-band deletion of the Workload leaves two of three resources.
    cp.delete(ResourceKind::Workload, "alice-my-app")
        .await
        .unwrap();

    let report = lifecycle.remove("alice-my-app", "alice").await.unwrap();
    assert_eq!(
        report.deleted,
        vec![ResourceKind::Route, ResourceKind::Endpoint]
    );

    let apps = lifecycle.list().await.unwrap();
    assert!(apps.iter().all(|app| app.internal_name != "alice-my-app"));
    assert!(cp.is_empty().await);
}

#[tokio::test]
async fn second_remove_reports_not_found() {
    let (cp, lifecycle) = setup();
    lifecycle.deploy(&alice_my_app()).await.unwrap();

    lifecycle.remove("alice-my-app", "alice").await.unwrap();
    let err = lifecycle.remove("alice-my-app", "alice").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let deletes = cp
        .journal()
        .await
        .into_iter()
        .filter(|(op, _, _)| *op == Operation::Delete)
        .count();
    assert_eq!(deletes, 3);
}

#[tokio::test]
async fn only_the_recorded_owner_may_remove() {
    let (cp, lifecycle) = setup();
    lifecycle.deploy(&alice_my_app()).await.unwrap();

    let err = lifecycle.remove("alice-my-app", "bob").await.unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
    assert_eq!(err.status_code(), 403);
    assert_eq!(cp.len().await, 3);

    lifecycle.remove("alice-my-app", "ALICE").await.unwrap();
    assert!(cp.is_empty().await);
}

#[tokio::test]
async fn list_is_newest_first() {
    let (_cp, lifecycle) = setup();
    for app_name in ["first", "second", "third"] {
        lifecycle
            .deploy(&DeployRequest {
                app_name: app_name.to_string(),
                ..alice_my_app()
            })
            .await
            .unwrap();
    }

    let names: Vec<_> = lifecycle
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|app| app.internal_name)
        .collect();
    assert_eq!(names, vec!["alice-third", "alice-second", "alice-first"]);
}

#[tokio::test]
async fn partial_deploy_is_repaired_by_redeploy() {
    let (cp, lifecycle) = setup();
    cp.fail_next(Operation::Create, ResourceKind::Route, 500)
        .await;

    let err = lifecycle.deploy(&alice_my_app()).await.unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert!(cp.contains(ResourceKind::Workload, "alice-my-app").await);
    assert!(!cp.contains(ResourceKind::Route, "alice-my-app-ing").await);

    lifecycle.deploy(&alice_my_app()).await.unwrap();
    assert!(cp.contains(ResourceKind::Route, "alice-my-app-ing").await);
}
