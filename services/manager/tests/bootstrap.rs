//! Integration tests for cluster bootstrap against a mocked engine.
//!
//! The engine and the image registry are wiremock servers; the tests drive
//! the full bootstrap sequence and the idempotence law: running bootstrap
//! twice (simulating a manager restart) produces no fatal error and
//! converges to the same secret/service set.

use std::collections::BTreeMap;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use farm_manager::cluster::{ClusterController, ClusterSettings};
use farm_manager::swarm::SwarmClient;
use farm_types::NodeType;

fn settings(registry_host: &str) -> ClusterSettings {
    ClusterSettings {
        advertise_addr: "10.0.0.2".to_string(),
        manager_port: 2377,
        registry_domain: registry_host.to_string(),
        secure_registry: false,
        registry_username: "farm".to_string(),
        registry_password: "hunter2".to_string(),
        secrets: BTreeMap::from([("API_KEY".to_string(), "secret-value".to_string())]),
        environment: BTreeMap::from([(
            "FARM_API_HOSTNAME".to_string(),
            "api.farm.local".to_string(),
        )]),
    }
}

/// Mount the engine endpoints a successful bootstrap walks through.
///
/// `fresh` controls whether init/secret creation answer as first-time (200)
/// or as already-converged (503/409).
async fn mount_engine(server: &MockServer, fresh: bool) {
    if fresh {
        Mock::given(method("POST"))
            .and(path("/swarm/init"))
            .respond_with(ResponseTemplate::new(200).set_body_json("node-self"))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/secrets/create"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ID": "sec_1"})))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/create"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ID": "srv_1"})))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    // Converged answers; on a fresh server these serve the second run.
    Mock::given(method("POST"))
        .and(path("/swarm/init"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"message": "This node is already part of a swarm"})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/secrets/create"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"message": "secret api_key already exists"})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/create"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"message": "name conflicts with an existing object"})),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/swarm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "JoinTokens": {"Worker": "SWMTKN-1-worker", "Manager": "SWMTKN-1-manager"}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Swarm": {"NodeID": "node-self"}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/nodes/node-self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ID": "node-self",
            "Version": {"Index": 9},
            "Spec": {"Role": "manager", "Availability": "active"},
            "Status": {"State": "ready"}
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/nodes/node-self/update"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ID": "sec_1", "Spec": {"Name": "api_key"}}
        ])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": "Login Succeeded"})))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/_catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "repositories": ["blender"]
        })))
        .mount(server)
        .await;
}

fn controller(server: &MockServer) -> ClusterController {
    let host = server.uri().trim_start_matches("http://").to_string();
    let swarm = SwarmClient::new(&server.uri(), None).unwrap();
    ClusterController::new(swarm, settings(&host)).unwrap()
}

#[tokio::test]
async fn bootstrap_runs_twice_without_fatal_errors() {
    let server = MockServer::start().await;
    mount_engine(&server, true).await;

    let controller = controller(&server);

    // First run: fresh cluster.
    controller.bootstrap().await.unwrap();
    controller.create_service("blender").await.unwrap();

    // Second run: everything already exists; same converged set.
    controller.bootstrap().await.unwrap();
    controller.create_service("blender").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let creates = |p: &str| {
        requests
            .iter()
            .filter(|r| r.url.path() == p && r.method.as_str() == "POST")
            .count()
    };

    // Both runs attempted every idempotent mutation; none was fatal.
    assert_eq!(creates("/swarm/init"), 2);
    assert_eq!(creates("/secrets/create"), 2);
    assert_eq!(creates("/services/create"), 2);
}

#[tokio::test]
async fn bootstrap_on_an_already_converged_cluster_succeeds() {
    let server = MockServer::start().await;
    mount_engine(&server, false).await;

    let controller = controller(&server);
    controller.bootstrap().await.unwrap();
    controller.create_service("blender").await.unwrap();
}

#[tokio::test]
async fn unexpected_engine_errors_are_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/swarm/init"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"message": "engine exploded"})),
        )
        .mount(&server)
        .await;

    let controller = controller(&server);
    let error = controller.bootstrap().await.unwrap_err();
    assert!(error.to_string().contains("500"));
}

#[tokio::test]
async fn container_names_come_from_the_registry_catalog() {
    let server = MockServer::start().await;
    mount_engine(&server, false).await;

    let controller = controller(&server);
    let names = controller.container_names().await.unwrap();
    assert_eq!(names, vec!["blender".to_string()]);
}

#[tokio::test]
async fn join_returns_the_role_matched_token() {
    let server = MockServer::start().await;
    mount_engine(&server, false).await;

    let controller = controller(&server);

    assert_eq!(
        controller.join(NodeType::Worker).await.unwrap(),
        "SWMTKN-1-worker"
    );
    assert_eq!(
        controller.join(NodeType::Manager).await.unwrap(),
        "SWMTKN-1-manager"
    );
}

#[tokio::test]
async fn created_services_attach_secrets_env_and_limits() {
    let server = MockServer::start().await;
    mount_engine(&server, false).await;

    let controller = controller(&server);
    controller.create_service("blender").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.url.path() == "/services/create")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();

    assert_eq!(body["Mode"]["Replicated"]["Replicas"], 0);
    assert_eq!(
        body["TaskTemplate"]["ContainerSpec"]["Secrets"][0]["SecretName"],
        "api_key"
    );
    assert_eq!(
        body["TaskTemplate"]["ContainerSpec"]["Env"][0],
        "FARM_API_HOSTNAME=api.farm.local"
    );
    assert_eq!(
        body["TaskTemplate"]["Resources"]["Limits"]["NanoCPUs"],
        4_000_000_000i64
    );
    assert!(body["TaskTemplate"]["ContainerSpec"]["Image"]
        .as_str()
        .unwrap()
        .ends_with("/blender:latest"));
}
