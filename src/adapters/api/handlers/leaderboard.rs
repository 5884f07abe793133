use crate::adapters::api::models::api_response::ApiResponse;
use crate::adapters::api::models::leaderboard::{
    rank_donors, DEFAULT_LEADERBOARD_LIMIT, MAX_LEADERBOARD_LIMIT,
};
use crate::adapters::api::models::query::BroadcasterQuery;
use crate::core::services::listener_registry::ListenerRegistry;
use crate::utils::error::RelayError;
use actix_web::{get, web, HttpResponse, Responder};
use std::sync::Arc;

/// Ranks the donors of one broadcaster by cumulative diamonds for the current session.
///
/// `limit` defaults to 10 and is capped at 100. Ties keep first-seen order.
#[get("/leaderboard")]
pub async fn get_leaderboard(
    registry: web::Data<Arc<ListenerRegistry>>,
    query: web::Query<BroadcasterQuery>,
) -> Result<impl Responder, RelayError> {
    let broadcaster = query.broadcaster()?;
    let limit = match query.limit {
        Some(0) => return Err(RelayError::InvalidRequest("limit must be positive".into())),
        Some(limit) => limit.min(MAX_LEADERBOARD_LIMIT),
        None => DEFAULT_LEADERBOARD_LIMIT,
    };

    let donors = registry.top_donors(&broadcaster, limit)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(rank_donors(donors))))
}
