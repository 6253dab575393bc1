use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use validator::Validate;

use crate::{
    services::{job_service::JobService, model_catalog::MODEL_PROFILES},
    AppState,
};

#[get("/models/available")]
async fn available_models(_state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    let mut models = Vec::with_capacity(MODEL_PROFILES.len());
    for profile in MODEL_PROFILES {
        let cache = hub_cache_entry(profile.name).await;
        models.push(json!({
            "id": profile.name,
            "name": profile.display_name,
            "description": profile.description,
            "vram_required_gb": profile.vram_required_gb,
            "quality_rating": profile.quality_rating,
            "speed_rating": profile.speed_rating,
            "batch_size": profile.batch_size,
            "max_length": profile.max_length,
            "learning_rate": profile.learning_rate,
            "lora_rank": profile.lora_rank,
            "lora_alpha": profile.lora_alpha,
            "is_cached": cache.is_some(),
            "cache_size_bytes": cache,
        }));
    }

    // Smallest VRAM requirement first
    models.sort_by(|a, b| {
        let vram_a = a["vram_required_gb"].as_f64().unwrap_or(0.0);
        let vram_b = b["vram_required_gb"].as_f64().unwrap_or(0.0);
        vram_a.total_cmp(&vram_b)
    });

    Ok(HttpResponse::Ok().json(json!({ "models": models })))
}

#[derive(Debug, Deserialize, Validate)]
struct TestModelRequest {
    job_id: String,
    prompt: String,

    #[validate(range(min = 1, max = 512))]
    max_new_tokens: Option<u32>,
}

#[post("/models/test")]
async fn test_model(
    state: web::Data<AppState>,
    request: web::Json<TestModelRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let request = request.into_inner();
    request
        .validate()
        .map_err(actix_web::error::ErrorBadRequest)?;

    let job_service = JobService::new(state.db_pool.clone());
    let job = job_service
        .get_job(&request.job_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| {
            actix_web::error::ErrorNotFound(format!("Job with id {} not found", request.job_id))
        })?;

    let model_path = job.model_path().ok_or_else(|| {
        actix_web::error::ErrorBadRequest(format!(
            "Job {} has not produced a trained model",
            request.job_id
        ))
    })?;

    let handle = state
        .model_cache
        .get_or_load(&model_path)
        .map_err(actix_web::error::ErrorNotFound)?;

    let started = std::time::Instant::now();
    let generated = handle.generate(&request.prompt, request.max_new_tokens.unwrap_or(100));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    Ok(HttpResponse::Ok().json(json!({
        "job_id": request.job_id,
        "model_path": model_path,
        "generated_text": generated,
        "generation_time_ms": elapsed_ms,
    })))
}

/// Size of the base model in the local Hugging Face hub cache, or `None`
/// when it has not been downloaded yet.
async fn hub_cache_entry(model_name: &str) -> Option<u64> {
    let cache_dir = hf_cache_dir()?;

    // "org/model" is cached as "models--org--model"
    let model_dir = cache_dir.join(format!("models--{}", model_name.replace('/', "--")));
    let snapshots = tokio::fs::metadata(model_dir.join("snapshots")).await.ok()?;
    if !snapshots.is_dir() {
        return None;
    }

    Some(dir_size(&model_dir).await.unwrap_or(0))
}

async fn dir_size(root: &std::path::Path) -> std::io::Result<u64> {
    let mut bytes = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                bytes += entry.metadata().await?.len();
            }
        }
    }

    Ok(bytes)
}

fn hf_cache_dir() -> Option<PathBuf> {
    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return Some(PathBuf::from(hf_home).join("hub"));
    }
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return Some(PathBuf::from(xdg_cache).join("huggingface").join("hub"));
    }

    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".cache").join("huggingface").join("hub"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(available_models).service(test_model);
}
