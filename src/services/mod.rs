pub mod dataset_service;
pub mod job_service;
pub mod model_cache;
pub mod model_catalog;
pub mod retention;
pub mod trainer;
