use crate::adapters::api::handlers::leaderboard::get_leaderboard;
use crate::adapters::api::handlers::live::{recent_events, stream_events};
use crate::adapters::api::handlers::{health_check, HealthReporter};
use crate::core::services::listener_registry::ListenerRegistry;
use crate::utils::error::{RelayError, RelayResult};
use actix_web::{middleware, web, App, HttpServer};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Registers every endpoint and the shared state they read.
///
/// Shared between [`launch_api_server`] and the integration tests so both serve the same routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig, registry: Arc<ListenerRegistry>) {
    cfg.app_data(web::Data::new(registry.clone() as HealthReporter))
        .app_data(web::Data::new(registry))
        .service(health_check)
        .service(stream_events)
        .service(recent_events)
        .service(get_leaderboard);
}

/// Launches the Actix-web API server and runs it until the process receives a stop signal.
///
/// Endpoints:
/// - `GET /sse`: Server-Sent Events push stream.
/// - `GET /recent`: cursor-based poll of the recent window and top donor.
/// - `GET /leaderboard`: ranked donors for the session.
/// - `GET /health`: listener health report.
///
/// # Arguments
///
/// * `host` - The IP address on which the server should listen.
/// * `port` - The port on which the server should accept connections.
/// * `registry` - The process-wide listener registry.
pub async fn launch_api_server(
    host: Ipv4Addr,
    port: u16,
    registry: Arc<ListenerRegistry>,
) -> RelayResult<()> {
    HttpServer::new(move || {
        let registry = registry.clone();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::new(
                middleware::TrailingSlash::Trim,
            ))
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Version", "1.0"))
                    .add(("Access-Control-Allow-Origin", "*")),
            )
            .configure(|cfg| configure_routes(cfg, registry))
    })
    .bind((host, port))
    .map_err(|e| RelayError::Api(e.to_string()))?
    .run()
    .await
    .map_err(|e| RelayError::Api(e.to_string()))?;

    Ok(())
}
