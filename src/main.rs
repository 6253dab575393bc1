use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;

use loraforge::config::ForgeConfig;
use loraforge::services::dataset_service::DatasetService;
use loraforge::services::job_service::JobService;
use loraforge::services::model_cache::ModelCache;
use loraforge::services::retention::RetentionSweeper;
use loraforge::services::trainer::LocalTrainer;
use loraforge::storage::{create_db_pool, FileStorage};
use loraforge::{api, queue, AppState};

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = ForgeConfig::from_env();

    // Initialize database
    let db_pool = create_db_pool(&config.database.path, config.database.max_connections).await?;

    // Initialize file storage
    let storage = FileStorage::new(config.storage.data_dir.clone());

    // Wire the task queue: dispatcher for the API side, executor worker
    // pool for the training side
    let trainer = Arc::new(LocalTrainer::new());
    let (dispatcher, executor, cancellations) = queue::build(
        JobService::new(db_pool.clone()),
        DatasetService::new(db_pool.clone(), storage.clone()),
        storage.clone(),
        trainer,
        &config.training,
    );

    tokio::spawn(executor.run());

    // Start retention sweeper
    let sweeper = RetentionSweeper::new(
        JobService::new(db_pool.clone()),
        storage.clone(),
        config.retention.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = sweeper.start().await {
            tracing::error!("Retention sweeper failed: {}", e);
        }
    });

    let model_cache = Arc::new(ModelCache::new(config.training.model_cache_capacity));

    // Create app state
    let app_state = web::Data::new(AppState {
        db_pool,
        storage,
        config,
        dispatcher,
        cancellations,
        model_cache,
    });

    // Start HTTP server
    let max_upload_size = app_state.config.storage.max_upload_size;
    let server = HttpServer::new({
        let app_state = app_state.clone();
        move || {
            let cors = Cors::default()
                .allowed_origin_fn({
                    let origins = app_state.config.server.cors_origins.clone();
                    move |origin, _| {
                        origin
                            .to_str()
                            .map(|origin| origins.iter().any(|allowed| allowed == origin))
                            .unwrap_or(false)
                    }
                })
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                .allowed_headers(vec!["Content-Type", "Authorization"])
                .max_age(3600);

            App::new()
                .app_data(app_state.clone())
                .app_data(web::PayloadConfig::new(max_upload_size))
                .wrap(cors)
                .configure(api::configure)
        }
    })
    .bind((
        app_state.config.server.host.clone(),
        app_state.config.server.port,
    ))?
    .run();

    tracing::info!(
        "loraforge server started on {}:{}",
        app_state.config.server.host,
        app_state.config.server.port
    );

    server.await?;

    Ok(())
}
