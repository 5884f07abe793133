use crate::metrics::HealthCheckReporting;
use actix_web::{get, web, HttpResponse, Responder};
use std::sync::Arc;

pub mod leaderboard;
pub mod live;

pub type HealthReporter = Arc<dyn HealthCheckReporting>;

/// Reports tracked listeners. Responds 500 while any listener keeps failing to connect.
#[get("/health")]
pub async fn health_check(data: web::Data<HealthReporter>) -> impl Responder {
    let report = data.report();

    let mut response = if report.healthy() {
        HttpResponse::Ok()
    } else {
        HttpResponse::InternalServerError()
    };

    response.json(report)
}
