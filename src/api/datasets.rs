use actix_web::http::header;
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::{
    models::DatasetUploadResponse, services::dataset_service::DatasetService, AppState,
};

#[post("/datasets")]
async fn upload_dataset(
    state: web::Data<AppState>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, actix_web::Error> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| actix_web::error::ErrorBadRequest("Expected multipart/form-data"))?;

    if body.len() > state.config.storage.max_upload_size {
        return Err(actix_web::error::ErrorPayloadTooLarge(format!(
            "Upload exceeds {} bytes",
            state.config.storage.max_upload_size
        )));
    }

    let stream =
        futures::stream::once(async move { Ok::<web::Bytes, std::convert::Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(actix_web::error::ErrorBadRequest)?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_filename = field.file_name().unwrap_or("dataset.txt").to_string();
        let field_content_type = field.content_type().map(|mime| mime.to_string());

        DatasetService::validate_upload(&original_filename, field_content_type.as_deref())
            .map_err(actix_web::error::ErrorBadRequest)?;

        let content = field
            .bytes()
            .await
            .map_err(actix_web::error::ErrorBadRequest)?;

        let dataset_service = DatasetService::new(state.db_pool.clone(), state.storage.clone());
        let (dataset, preview) = dataset_service
            .save_upload(&original_filename, field_content_type, &content)
            .await
            .map_err(actix_web::error::ErrorInternalServerError)?;

        return Ok(HttpResponse::Created().json(DatasetUploadResponse {
            dataset_id: dataset.id,
            filename: dataset.original_filename,
            size_bytes: dataset.size_bytes,
            status: dataset.status,
            preview,
            created_at: dataset.created_at,
        }));
    }

    Err(actix_web::error::ErrorBadRequest(
        "Multipart request is missing a 'file' field",
    ))
}

#[derive(Debug, Deserialize)]
struct ListDatasetsQuery {
    limit: Option<i64>,
}

#[get("/datasets")]
async fn list_datasets(
    state: web::Data<AppState>,
    query: web::Query<ListDatasetsQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let dataset_service = DatasetService::new(state.db_pool.clone(), state.storage.clone());

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let datasets = dataset_service
        .list_datasets(limit)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(datasets))
}

#[get("/datasets/{id}")]
async fn get_dataset(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let dataset_service = DatasetService::new(state.db_pool.clone(), state.storage.clone());
    let dataset_id = path.into_inner();

    let dataset = dataset_service
        .get_dataset(&dataset_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| {
            actix_web::error::ErrorNotFound(format!("Dataset {dataset_id} not found"))
        })?;

    Ok(HttpResponse::Ok().json(dataset))
}

#[delete("/datasets/{id}")]
async fn delete_dataset(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let dataset_service = DatasetService::new(state.db_pool.clone(), state.storage.clone());
    let dataset_id = path.into_inner();

    let deleted = dataset_service
        .delete_dataset(&dataset_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    if !deleted {
        return Err(actix_web::error::ErrorNotFound(format!(
            "Dataset {dataset_id} not found"
        )));
    }

    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(upload_dataset)
        .service(list_datasets)
        .service(get_dataset)
        .service(delete_dataset);
}
