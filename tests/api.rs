mod common;

use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use common::{seed_dataset, spawn_queue, test_env, wait_for_terminal, TestEnv};
use loraforge::config::ForgeConfig;
use loraforge::models::JobStatus;
use loraforge::queue::{self, CancellationRegistry, JobExecutor, TaskDispatcher};
use loraforge::services::model_cache::ModelCache;
use loraforge::services::trainer::{LocalTrainer, Trainer};
use loraforge::{api, AppState};

const SAMPLE_JSONL: &[u8] = b"{\"text\": \"hello\"}\n{\"text\": \"world\"}\n";

fn app_state(
    env: &TestEnv,
    dispatcher: TaskDispatcher,
    cancellations: CancellationRegistry,
) -> web::Data<AppState> {
    let mut config = ForgeConfig::default();
    config.database.path = env.tmp.path().join("test.db");
    config.storage.data_dir = env.tmp.path().join("data");

    web::Data::new(AppState {
        db_pool: env.pool.clone(),
        storage: env.storage.clone(),
        config,
        dispatcher,
        cancellations,
        model_cache: Arc::new(ModelCache::new(2)),
    })
}

/// App state backed by a live worker pool draining the queue.
fn live_state(env: &TestEnv, trainer: Arc<dyn Trainer>) -> web::Data<AppState> {
    let (dispatcher, cancellations) = spawn_queue(env, trainer);
    app_state(env, dispatcher, cancellations)
}

/// App state whose queue is dispatch-only: tasks are accepted but never
/// executed, so rows stay exactly where the API left them. The idle
/// executor is returned so the queue channel stays open.
fn dispatch_only_state(env: &TestEnv) -> (web::Data<AppState>, JobExecutor) {
    let (dispatcher, executor, cancellations) = queue::build(
        env.job_service.clone(),
        env.dataset_service.clone(),
        env.storage.clone(),
        Arc::new(LocalTrainer::with_step_delay(Duration::ZERO)),
        &common::fast_training_config(),
    );
    (app_state(env, dispatcher, cancellations), executor)
}

fn multipart_request(
    uri: &str,
    filename: &str,
    content_type: &str,
    content: &[u8],
) -> test::TestRequest {
    let boundary = "------------------------loraforge1234";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    test::TestRequest::post()
        .uri(uri)
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
}

#[actix_rt::test]
async fn submitting_with_unknown_dataset_is_404_and_creates_no_row() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/jobs")
        .set_json(json!({ "dataset_id": "no-such-dataset" }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 404);

    let stats = env.job_service.stats().await.unwrap();
    assert_eq!(stats.total, 0);
}

#[actix_rt::test]
async fn submission_returns_pending_and_enqueues_the_task() {
    let env = test_env().await;
    let dataset_id = seed_dataset(&env, "train.jsonl", SAMPLE_JSONL).await;

    let (state, _executor) = dispatch_only_state(&env);
    let dispatcher = state.dispatcher.clone();
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/jobs")
        .set_json(json!({ "dataset_id": dataset_id, "num_epochs": 2 }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 201);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["message"], "Fine-tuning job submitted successfully");

    let job_id = body["job_id"].as_str().unwrap();
    assert!(dispatcher.is_in_flight(job_id));

    let job = env.job_service.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0.0);
}

#[actix_rt::test]
async fn dispatch_failure_fails_the_job_but_still_answers_success() {
    let env = test_env().await;
    let dataset_id = seed_dataset(&env, "train.jsonl", SAMPLE_JSONL).await;

    // Dropping the executor closes the queue, so submission will be
    // accepted by the API but refused by the dispatcher.
    let (dispatcher, executor, cancellations) = queue::build(
        env.job_service.clone(),
        env.dataset_service.clone(),
        env.storage.clone(),
        Arc::new(LocalTrainer::with_step_delay(Duration::ZERO)),
        &common::fast_training_config(),
    );
    drop(executor);

    let state = app_state(&env, dispatcher, cancellations);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/jobs")
        .set_json(json!({ "dataset_id": dataset_id, "num_epochs": 2 }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 201);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "failed");
    let message = body["message"].as_str().unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("Failed to submit job to queue"));

    // No orphaned pending row: the failure is visible through polling
    let job_id = body["job_id"].as_str().unwrap();
    let job = env.job_service.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.message.as_deref(), Some(message));
}

#[actix_rt::test]
async fn out_of_range_hyperparameters_are_rejected() {
    let env = test_env().await;
    let dataset_id = seed_dataset(&env, "train.jsonl", SAMPLE_JSONL).await;

    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/jobs")
        .set_json(json!({ "dataset_id": dataset_id, "num_epochs": 50 }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 400);

    let stats = env.job_service.stats().await.unwrap();
    assert_eq!(stats.total, 0);
}

#[actix_rt::test]
async fn querying_an_unknown_job_is_404() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::get()
        .uri("/api/v1/jobs/does-not-exist")
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 404);
}

#[actix_rt::test]
async fn uploading_a_jsonl_dataset_returns_a_preview() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = multipart_request(
        "/api/v1/datasets",
        "train.jsonl",
        "application/json",
        SAMPLE_JSONL,
    )
    .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 201);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["filename"], "train.jsonl");
    assert_eq!(body["status"], "uploaded");
    assert_eq!(body["size_bytes"], SAMPLE_JSONL.len() as i64);
    assert_eq!(body["preview"]["type"], "jsonl");
    assert_eq!(body["preview"]["num_rows"], 2);

    let dataset_id = body["dataset_id"].as_str().unwrap();
    assert!(env.dataset_service.dataset_exists(dataset_id).await.unwrap());
}

#[actix_rt::test]
async fn uploads_with_unsupported_types_are_rejected() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = multipart_request(
        "/api/v1/datasets",
        "weights.bin",
        "application/x-binary",
        b"\x00\x01\x02",
    )
    .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 400);
}

#[actix_rt::test]
async fn deleting_a_dataset_removes_it() {
    let env = test_env().await;
    let dataset_id = seed_dataset(&env, "train.jsonl", SAMPLE_JSONL).await;

    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::delete()
        .uri(&format!("/api/v1/datasets/{dataset_id}"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 204);

    let request = test::TestRequest::delete()
        .uri(&format!("/api/v1/datasets/{dataset_id}"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 404);
}

#[actix_rt::test]
async fn full_flow_trains_a_job_and_serves_generation_from_it() {
    let env = test_env().await;
    let dataset_id = seed_dataset(&env, "train.jsonl", SAMPLE_JSONL).await;

    let state = live_state(&env, Arc::new(LocalTrainer::with_step_delay(Duration::ZERO)));
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/jobs")
        .set_json(json!({ "dataset_id": dataset_id, "num_epochs": 1 }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 201);

    let body: Value = test::read_body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    wait_for_terminal(&env.job_service, &job_id).await;

    let request = test::TestRequest::get()
        .uri(&format!("/api/v1/jobs/{job_id}"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 200);

    let status: Value = test::read_body_json(response).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["progress"], 100.0);
    assert!(status["meta"]["model_path"].is_string());
    assert_eq!(status["meta"]["model_name"], "gpt2");

    let request = test::TestRequest::post()
        .uri("/api/v1/models/test")
        .set_json(json!({ "job_id": job_id, "prompt": "Once upon a time" }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 200);

    let generation: Value = test::read_body_json(response).await;
    assert!(generation["generated_text"]
        .as_str()
        .unwrap()
        .starts_with("Once upon a time"));
}

#[actix_rt::test]
async fn cancelling_a_terminal_job_is_rejected() {
    let env = test_env().await;
    let dataset_id = seed_dataset(&env, "train.jsonl", SAMPLE_JSONL).await;

    let state = live_state(&env, Arc::new(LocalTrainer::with_step_delay(Duration::ZERO)));
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/jobs")
        .set_json(json!({ "dataset_id": dataset_id, "num_epochs": 1 }))
        .to_request();
    let response = test::call_service(&app, request).await;
    let body: Value = test::read_body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    wait_for_terminal(&env.job_service, &job_id).await;

    let request = test::TestRequest::post()
        .uri(&format!("/api/v1/jobs/{job_id}/cancel"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 400);
}

#[actix_rt::test]
async fn available_models_are_sorted_by_vram_requirement() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::get()
        .uri("/api/v1/models/available")
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 200);

    let body: Value = test::read_body_json(response).await;
    let models = body["models"].as_array().unwrap();
    assert!(models.len() >= 3);
    assert!(models.iter().any(|m| m["id"] == "gpt2"));

    let vram: Vec<f64> = models
        .iter()
        .map(|m| m["vram_required_gb"].as_f64().unwrap())
        .collect();
    for pair in vram.windows(2) {
        assert!(pair[0] <= pair[1]);
    }

    // Cache size is reported exactly when the model is cached locally
    for model in models {
        assert!(model.get("cache_size_bytes").is_some());
        assert_eq!(
            model["is_cached"].as_bool().unwrap(),
            model["cache_size_bytes"].is_u64()
        );
    }
}

#[actix_rt::test]
async fn health_reports_ok_with_a_reachable_database() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::get().uri("/api/v1/health").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 200);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
}

#[actix_rt::test]
async fn manual_cleanup_returns_a_report() {
    let env = test_env().await;
    let (state, _executor) = dispatch_only_state(&env);
    let app = test::init_service(App::new().app_data(state).configure(api::configure)).await;

    let request = test::TestRequest::post()
        .uri("/api/v1/system/cleanup")
        .set_json(json!({ "older_than_days": 7 }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 200);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["jobs_deleted"], 0);
    assert_eq!(body["files_deleted"], 0);
    assert_eq!(body["errors"].as_array().unwrap().len(), 0);
}
