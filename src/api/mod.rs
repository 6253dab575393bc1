mod datasets;
mod jobs;
mod models;
mod system;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(jobs::configure)
            .configure(datasets::configure)
            .configure(models::configure)
            .configure(system::configure),
    );
}
