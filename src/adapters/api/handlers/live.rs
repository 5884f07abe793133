use crate::adapters::api::models::query::BroadcasterQuery;
use crate::core::services::fanout_hub::PushSubscription;
use crate::core::services::listener_registry::ListenerRegistry;
use crate::utils::error::RelayError;
use actix_web::http::header;
use actix_web::{get, web, HttpResponse, Responder};
use futures::stream;
use std::sync::Arc;
use tracing::{debug, info};

/// Opens a Server-Sent Events stream of live updates for one broadcaster.
///
/// The first request for an unknown broadcaster starts its listener. Each gift update is sent
/// as a `data:` frame holding the aggregated event, comments as `event: comment` frames, and
/// idle periods are filled with heartbeat comments. Recent events are replayed first when
/// replay is enabled.
///
/// # Query Parameters
/// - `broadcasterKey` (alias `username`): the broadcaster to follow.
///
/// # Responses
/// - **200 OK**: `text/event-stream` that stays open until the client disconnects.
/// - **400 Bad Request**: missing or blank broadcaster key.
#[get("/sse")]
pub async fn stream_events(
    registry: web::Data<Arc<ListenerRegistry>>,
    query: web::Query<BroadcasterQuery>,
) -> Result<impl Responder, RelayError> {
    let broadcaster = query.broadcaster()?;
    let subscription = registry.subscribe_push(&broadcaster)?;
    info!(%broadcaster, subscriber = subscription.id(), "Push subscriber connected");

    let frames = stream::unfold(subscription, |mut subscription: PushSubscription| async move {
        let frame = subscription.next_frame().await?;
        Some((
            Ok::<_, RelayError>(web::Bytes::from(frame.to_sse())),
            subscription,
        ))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(frames))
}

/// Returns the recent-events window, the top donor and the cursor for the next poll.
///
/// # Query Parameters
/// - `broadcasterKey` (alias `username`): the broadcaster to read.
/// - `lastSeenSequence`: the cursor returned by the previous poll. Without it the whole window is
///   returned; with it only entries updated after that sequence.
///
/// # Responses
/// - **200 OK**: `{"recent": [...], "topDonor": {...}, "lastSeenSequence": n}`.
/// - **400 Bad Request**: missing broadcaster key or non-numeric cursor.
#[get("/recent")]
pub async fn recent_events(
    registry: web::Data<Arc<ListenerRegistry>>,
    query: web::Query<BroadcasterQuery>,
) -> Result<impl Responder, RelayError> {
    let broadcaster = query.broadcaster()?;
    let response = registry.poll(&broadcaster, query.last_seen_sequence)?;
    debug!(
        %broadcaster,
        returned = response.recent.len(),
        cursor = response.last_seen_sequence,
        "Served poll"
    );
    Ok(HttpResponse::Ok().json(response))
}
