use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::{
    services::{job_service::JobService, retention::RetentionSweeper},
    AppState,
};

#[get("/health")]
async fn health(state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    let database = match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::error!("Health check database probe failed: {}", e);
            return Ok(HttpResponse::ServiceUnavailable().json(json!({
                "status": "degraded",
                "database": "unreachable",
            })));
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "database": database,
    })))
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    older_than_days: Option<i64>,
}

/// Operator-triggered retention sweep; the same logic also runs on the
/// background schedule.
#[post("/system/cleanup")]
async fn run_cleanup(
    state: web::Data<AppState>,
    request: web::Json<CleanupRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let older_than_days = request
        .older_than_days
        .unwrap_or(state.config.retention.job_retention_days);

    let sweeper = RetentionSweeper::new(
        JobService::new(state.db_pool.clone()),
        state.storage.clone(),
        state.config.retention.clone(),
    );

    let report = sweeper
        .cleanup(older_than_days)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(report))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(run_cleanup);
}
