use actix_web::{get, post, web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{JobStatus, StartFinetuningRequest, StartFinetuningResponse, TrainingStatusResponse},
    queue::TrainTask,
    services::{dataset_service::DatasetService, job_service::JobService, model_catalog},
    AppState,
};

#[post("/jobs")]
async fn start_finetuning(
    state: web::Data<AppState>,
    request: web::Json<StartFinetuningRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let request = request.into_inner();
    request
        .validate()
        .map_err(actix_web::error::ErrorBadRequest)?;

    let dataset_service = DatasetService::new(state.db_pool.clone(), state.storage.clone());
    let exists = dataset_service
        .dataset_exists(&request.dataset_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    if !exists {
        return Err(actix_web::error::ErrorNotFound(format!(
            "Dataset {} not found",
            request.dataset_id
        )));
    }

    let job_id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    let job_service = JobService::new(state.db_pool.clone());
    job_service
        .create_job(&job_id, &request.dataset_id, created_at)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let task = TrainTask {
        job_id: job_id.clone(),
        dataset_id: request.dataset_id.clone(),
        model_name: request.model_name.clone(),
        hyperparameters: model_catalog::resolve_hyperparameters(&request),
    };

    let response = match state.dispatcher.submit(task) {
        Ok(_) => StartFinetuningResponse {
            job_id,
            status: JobStatus::Pending,
            dataset_id: request.dataset_id,
            message: "Fine-tuning job submitted successfully".to_string(),
            created_at,
        },
        Err(e) => {
            // Never leave an orphaned pending row: the job exists, but its
            // failure is immediately visible through status polling.
            let message = format!("Failed to submit job to queue: {e}");
            let _ = job_service.fail(&job_id, &message).await;

            StartFinetuningResponse {
                job_id,
                status: JobStatus::Failed,
                dataset_id: request.dataset_id,
                message,
                created_at,
            }
        }
    };

    Ok(HttpResponse::Created().json(response))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    limit: Option<i64>,
}

#[get("/jobs")]
async fn list_jobs(
    state: web::Data<AppState>,
    query: web::Query<ListJobsQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let job_service = JobService::new(state.db_pool.clone());

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let jobs = job_service
        .list_jobs(limit)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let views: Vec<TrainingStatusResponse> =
        jobs.into_iter().map(TrainingStatusResponse::from).collect();

    Ok(HttpResponse::Ok().json(views))
}

#[get("/jobs/stats")]
async fn job_stats(state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    let job_service = JobService::new(state.db_pool.clone());

    let stats = job_service
        .stats()
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(stats))
}

#[get("/jobs/{id}")]
async fn get_training_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let job_service = JobService::new(state.db_pool.clone());
    let job_id = path.into_inner();

    let job = job_service
        .get_job(&job_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| {
            actix_web::error::ErrorNotFound(format!("Job with id {job_id} not found"))
        })?;

    Ok(HttpResponse::Ok().json(TrainingStatusResponse::from(job)))
}

#[post("/jobs/{id}/cancel")]
async fn cancel_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let job_service = JobService::new(state.db_pool.clone());
    let job_id = path.into_inner();

    let job = job_service
        .get_job(&job_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| {
            actix_web::error::ErrorNotFound(format!("Job with id {job_id} not found"))
        })?;

    if job.status.is_terminal() {
        return Err(actix_web::error::ErrorBadRequest(format!(
            "Job {} is already {}",
            job_id,
            job.status.as_str()
        )));
    }

    // Flag first so the executor skips further work, then fail the row for
    // immediate visibility. Both are best-effort and CAS-guarded.
    state.cancellations.request(&job_id);
    job_service
        .fail(&job_id, "Fine-tuning cancelled")
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let job = job_service
        .get_job(&job_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| {
            actix_web::error::ErrorNotFound(format!("Job with id {job_id} not found"))
        })?;

    Ok(HttpResponse::Ok().json(TrainingStatusResponse::from(job)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(start_finetuning)
        .service(list_jobs)
        .service(job_stats)
        .service(get_training_status)
        .service(cancel_job);
}
