//! Integration tests for the backend job API client against a mocked API.

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use farm_types::{FrameRange, Job, JobState, NodeType, Task, TaskState};
use farm_worker::client::JobApiClient;

fn test_task(scene_url: Option<String>) -> Task {
    Task {
        id: "task_1".to_string(),
        job: Job {
            id: "job_1".to_string(),
            state: JobState::Running,
            frame_range: FrameRange::new(1, 240),
            parallelism: 4,
            container_name: "blender".to_string(),
            scene_url,
            sequence_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        frame_range: FrameRange::new(1, 60),
        state: TaskState::Queued,
        created_at: Utc::now(),
    }
}

fn task_json(state: TaskState) -> serde_json::Value {
    let mut task = test_task(None);
    task.state = state;
    serde_json::to_value(&task).unwrap()
}

/// Build a client pointed at the mock server, caching into `data_dir`.
fn client(server: &MockServer, data_dir: &std::path::Path) -> JobApiClient {
    let address: std::net::SocketAddr = server.address().to_owned();
    JobApiClient::new(
        &address.ip().to_string(),
        address.port(),
        "v1",
        false,
        "test-key",
        data_dir,
    )
    .unwrap()
}

#[tokio::test]
async fn register_device_posts_the_node_type() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "dev_1",
            "node_type": "worker",
            "cluster_address": "10.0.0.2:2377",
            "token": "SWMTKN-1-worker",
            "joined_at": "2026-01-10T08:30:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    let device = client.register_device(NodeType::Worker).await.unwrap();

    assert_eq!(device.id, "dev_1");
    assert_eq!(device.token, "SWMTKN-1-worker");

    let request = &server.received_requests().await.unwrap()[0];
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["node_type"], "worker");
}

#[tokio::test]
async fn poll_task_returns_none_on_no_content() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/tasks/claim"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    assert!(client.poll_task("blender").await.unwrap().is_none());
}

#[tokio::test]
async fn poll_task_decodes_a_claimed_task() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/tasks/claim"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_json(TaskState::Queued)))
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    let task = client.poll_task("blender").await.unwrap().unwrap();
    assert_eq!(task.id, "task_1");
    assert_eq!(task.job.id, "job_1");
}

#[tokio::test]
async fn update_task_state_confirms_only_an_echoed_state() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let task = test_task(None);

    Mock::given(method("POST"))
        .and(path("/v1/tasks/task_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_json(TaskState::Running)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Second transition request: the backend refuses and echoes `failed`.
    Mock::given(method("POST"))
        .and(path("/v1/tasks/task_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_json(TaskState::Failed)))
        .mount(&server)
        .await;

    let client = client(&server, dir.path());

    assert!(client
        .update_task_state(&task, TaskState::Running)
        .await
        .unwrap());
    assert!(!client
        .update_task_state(&task, TaskState::Completed)
        .await
        .unwrap());
}

#[tokio::test]
async fn download_scene_stages_into_the_job_cache_dir() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/assets/job_1/scene.blend"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"blend-bytes".to_vec()))
        .mount(&server)
        .await;

    let scene_url = format!("{}/assets/job_1/scene.blend", server.uri());
    let task = test_task(Some(scene_url));

    let client = client(&server, dir.path());
    let staged = client.download_scene(&task).await.unwrap();

    assert_eq!(staged, dir.path().join("jobs/job_1/scene.blend"));
    assert_eq!(std::fs::read(&staged).unwrap(), b"blend-bytes");
}

#[tokio::test]
async fn download_scene_without_a_scene_url_errors() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let client = client(&server, dir.path());
    let task = test_task(None);

    assert!(client.download_scene(&task).await.is_err());
}

#[tokio::test]
async fn upload_outputs_sends_every_task_file_as_multipart() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let output_dir = dir.path().join("tasks/task_1");
    std::fs::create_dir_all(&output_dir).unwrap();
    std::fs::write(output_dir.join("frame_0001.png"), b"png-1").unwrap();
    std::fs::write(output_dir.join("frame_0002.png"), b"png-2").unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/tasks/task_1/images"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_json(TaskState::Running)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    let task = test_task(None);
    client.upload_outputs(&task).await.unwrap();

    let request = &server.received_requests().await.unwrap()[0];
    let content_type = request
        .headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("frame_0001.png"));
    assert!(body.contains("frame_0002.png"));
}

#[tokio::test]
async fn backend_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/tasks/task_1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("task not found"))
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    let error = client.get_task("task_1").await.unwrap_err();

    let message = error.to_string();
    assert!(message.contains("404"));
    assert!(message.contains("task not found"));
}
