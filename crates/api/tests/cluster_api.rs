//! Worker protocol over HTTP: heartbeat, poll and event report.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, WORKER};
use serde_json::json;
use spool_core::types::new_id;

// -- heartbeat --

#[tokio::test]
async fn ping_registers_worker() {
    let app = build_test_app();
    let response = app
        .post(
            "/api/v1/cluster/_ping",
            json!({ "endpoint": WORKER, "version": "1.2.0" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let worker = body_json(response).await["data"].clone();
    assert_eq!(worker["endpoint"], WORKER);
    assert_eq!(worker["state"], "Up");
    assert_eq!(worker["lock_state"], "Unlocked");
    assert_eq!(worker["ping_count"], 1);
}

#[tokio::test]
async fn ping_with_bad_endpoint_is_rejected() {
    let app = build_test_app();
    let response = app
        .post("/api/v1/cluster/_ping", json!({ "endpoint": "worker-1:5000" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

// -- poll --

#[tokio::test]
async fn next_without_work_is_no_content() {
    let app = build_test_app();
    app.ping(WORKER).await;

    let response = app
        .post("/api/v1/cluster/_next", json!({ "endpoint": WORKER }))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn next_hands_out_a_materialized_task() {
    let app = build_test_app();
    let project = new_id();
    let job = app
        .create_job(
            project,
            json!({ "name": "ingest", "scripts": [{ "name": "import", "modules": ["proxy"] }] }),
        )
        .await;
    app.ping(WORKER).await;

    let response = app
        .post("/api/v1/cluster/_next", json!({ "endpoint": WORKER }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let task = body_json(response).await["data"].clone();
    assert_eq!(task["jobId"], job["id"]);
    assert_eq!(task["state"], "Queued");
    assert_eq!(task["hostEndpoint"], WORKER);
    assert_eq!(task["script"]["execute"], json!([{ "module": "proxy" }]));
    assert_eq!(task["env"]["SPOOL_PROJECT_ID"], project.to_string());
    assert!(task["env"]["SPOOL_APIKEY"]
        .as_str()
        .unwrap()
        .starts_with(&format!("task.{project}.")));
    assert!(task["logFile"]
        .as_str()
        .unwrap()
        .starts_with("http://logs.test/spool/jobs/"));

    // The worker is now busy.
    let again = app
        .post("/api/v1/cluster/_next", json!({ "endpoint": WORKER }))
        .await;
    assert_eq!(again.status(), StatusCode::NO_CONTENT);
}

// -- events --

#[tokio::test]
async fn started_and_stopped_events_finish_the_job() {
    let app = build_test_app();
    let job = app
        .create_job(new_id(), json!({ "scripts": [{ "name": "import" }] }))
        .await;
    app.ping(WORKER).await;

    let task = body_json(
        app.post("/api/v1/cluster/_next", json!({ "endpoint": WORKER }))
            .await,
    )
    .await["data"]
        .clone();

    let started = json!({
        "taskId": task["id"],
        "jobId": task["jobId"],
        "event": { "type": "started" },
    });
    let response = app.post("/api/v1/cluster/_event", started).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let stopped = json!({
        "taskId": task["id"],
        "jobId": task["jobId"],
        "event": { "type": "stopped", "payload": { "exitStatus": 0 } },
    });
    let response = app.post("/api/v1/cluster/_event", stopped).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let id = job["id"].as_str().unwrap();
    let detail = body_json(app.get(&format!("/api/v1/jobs/{id}")).await).await["data"].clone();
    assert_eq!(detail["state"], "Success");
    assert_eq!(detail["task_counts"]["success"], 1);

    let metrics = body_json(app.get("/api/v1/cluster/_metrics").await).await["data"].clone();
    assert_eq!(metrics["dispatched"], 1);
}

#[tokio::test]
async fn event_for_unknown_task_is_404() {
    let app = build_test_app();
    let event = json!({
        "taskId": new_id(),
        "jobId": new_id(),
        "event": { "type": "progress", "payload": { "progress": 10 } },
    });
    let response = app.post("/api/v1/cluster/_event", event).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

// -- maintenance --

#[tokio::test]
async fn sweep_on_quiet_cluster_reports_nothing() {
    let app = build_test_app();
    let response = app.post("/api/v1/cluster/_sweep", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await["data"].clone();
    assert_eq!(report["orphansRetried"], 0);
    assert_eq!(report["jobsExpired"], 0);
}
