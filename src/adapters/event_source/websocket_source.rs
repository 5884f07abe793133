use crate::adapters::event_source::frame_parser::parse_frame;
use crate::config::{SourceConfig, BROADCASTER_PLACEHOLDER};
use crate::core::domain::broadcaster::BroadcasterKey;
use crate::core::domain::source_event::SourceEvent;
use crate::core::ports::event_source::{EventSource, SourceSubscription};
use crate::utils::error::{RelayError, RelayResult};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::Message;
use url::Url;

/// Connects to a live-event gateway over WebSocket, one connection per broadcaster.
///
/// The gateway pushes JSON frames (see [`parse_frame`]). Each subscription owns a reader task
/// that forwards parsed events into the subscription channel until the connection drops or the
/// subscription is cancelled.
#[derive(Debug, Clone)]
pub struct WebSocketEventSource {
    endpoint_template: String,
    connect_timeout: Duration,
    channel_capacity: usize,
}

impl WebSocketEventSource {
    pub fn new(config: &SourceConfig) -> RelayResult<Self> {
        if !config.endpoint.contains(BROADCASTER_PLACEHOLDER) {
            return Err(RelayError::Config(format!(
                "source endpoint {} has no {BROADCASTER_PLACEHOLDER} placeholder",
                config.endpoint
            )));
        }
        Ok(Self {
            endpoint_template: config.endpoint.clone(),
            connect_timeout: config.connect_timeout,
            channel_capacity: config.channel_capacity.max(1),
        })
    }

    /// Builds the gateway URL for `broadcaster`, form-encoding the key.
    pub fn endpoint_for(&self, broadcaster: &BroadcasterKey) -> RelayResult<Url> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(broadcaster.as_str().as_bytes()).collect();
        let endpoint = self
            .endpoint_template
            .replace(BROADCASTER_PLACEHOLDER, &encoded);
        Url::parse(&endpoint)
            .map_err(|e| RelayError::Config(format!("invalid source endpoint {endpoint}: {e}")))
    }
}

#[async_trait]
impl EventSource for WebSocketEventSource {
    async fn subscribe(&self, broadcaster: &BroadcasterKey) -> RelayResult<SourceSubscription> {
        let url = self.endpoint_for(broadcaster)?;
        debug!(%broadcaster, %url, "Connecting to live-event source");

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    RelayError::SourceConnection(format!(
                        "timed out after {} connecting to {url}",
                        humantime::format_duration(self.connect_timeout)
                    ))
                })?
                .map_err(|e| RelayError::SourceConnection(format!("{url}: {e}")))?;

        info!(%broadcaster, "Connected to live-event source");

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        tokio::spawn(pump_frames(
            ws_stream,
            tx,
            cancel.clone(),
            broadcaster.clone(),
        ));

        Ok(SourceSubscription::new(rx, cancel))
    }
}

/// Reads frames from `ws` and forwards parsed events into `events`.
///
/// Stops when the connection ends, when the receiving side is dropped or when `cancel` fires.
/// Transport errors and server-initiated closes are forwarded as `SourceConnection` so the
/// listener can tell them apart from malformed frames.
async fn pump_frames<S>(
    mut ws: S,
    events: mpsc::Sender<RelayResult<SourceEvent>>,
    cancel: CancellationToken,
    broadcaster: BroadcasterKey,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = ws.close().await {
                    debug!(%broadcaster, "Error closing source connection: {}", e);
                }
                break;
            }
            _ = events.closed() => break,
            frame = ws.next() => frame,
        };

        let item = match frame {
            Some(Ok(Message::Text(text))) => parse_frame(&text, Utc::now()).transpose(),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => parse_frame(text, Utc::now()).transpose(),
                Err(e) => Some(Err(RelayError::MalformedEvent(format!(
                    "binary frame is not UTF-8: {e}"
                )))),
            },
            Some(Ok(Message::Close(reason))) => {
                let reason = reason
                    .map(|frame| frame.reason.into_owned())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "no reason given".to_string());
                Some(Err(RelayError::SourceConnection(format!(
                    "closed by source: {reason}"
                ))))
            }
            Some(Ok(_)) => None,
            Some(Err(e)) => Some(Err(RelayError::SourceConnection(e.to_string()))),
            None => break,
        };

        let Some(item) = item else {
            continue;
        };
        let fatal = matches!(item, Err(RelayError::SourceConnection(_)));
        if events.send(item).await.is_err() || fatal {
            break;
        }
    }

    if !cancel.is_cancelled() {
        warn!(%broadcaster, "Source reader stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn source_for(endpoint: String) -> WebSocketEventSource {
        WebSocketEventSource::new(&SourceConfig {
            endpoint,
            connect_timeout: Duration::from_secs(2),
            channel_capacity: 16,
        })
        .unwrap()
    }

    /// Accepts one WebSocket client and sends `frames` to it, then keeps the socket open until
    /// the client goes away.
    async fn serve_frames(frames: Vec<Message>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(frame).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{addr}/live/{{broadcaster}}")
    }

    #[test]
    fn test_new_rejects_template_without_placeholder() {
        let result = WebSocketEventSource::new(&SourceConfig {
            endpoint: "ws://127.0.0.1:1/live".to_string(),
            ..SourceConfig::default()
        });
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn test_endpoint_for_form_encodes_key() {
        let source = source_for("wss://gateway.example.com/live/{broadcaster}".to_string());
        let key = BroadcasterKey::parse("some one").unwrap();
        let url = source.endpoint_for(&key).unwrap();
        assert_eq!(url.as_str(), "wss://gateway.example.com/live/some+one");
    }

    #[tokio::test]
    async fn test_subscribe_to_unreachable_gateway_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = source_for(format!("ws://{addr}/live/{{broadcaster}}"));
        let key = BroadcasterKey::parse("alice").unwrap();
        let result = source.subscribe(&key).await;
        assert!(matches!(result, Err(RelayError::SourceConnection(_))));
    }

    #[tokio::test]
    async fn test_subscription_forwards_gifts_and_skips_unknown_frames() {
        let endpoint = serve_frames(vec![
            Message::Text(r#"{"type":"like","count":3}"#.to_string()),
            Message::Text(
                r#"{"type":"gift","user":{"uniqueId":"u1","nickname":"Alice"},"gift":{"name":"Rose","diamondCount":1,"repeatCount":2}}"#
                    .to_string(),
            ),
            Message::Text("garbage".to_string()),
            Message::Text(
                r#"{"type":"comment","user":{"uniqueId":"u2"},"comment":"hi"}"#.to_string(),
            ),
        ])
        .await;

        let source = source_for(endpoint);
        let key = BroadcasterKey::parse("alice").unwrap();
        let mut subscription = source.subscribe(&key).await.unwrap();

        let first = subscription.next().await.unwrap().unwrap();
        let SourceEvent::Gift(gift) = first else {
            panic!("expected a gift, got {first:?}");
        };
        assert_eq!(gift.donor_id, "u1");
        assert_eq!(gift.repeat_count, 2);

        assert!(matches!(
            subscription.next().await,
            Some(Err(RelayError::MalformedEvent(_)))
        ));

        assert!(matches!(
            subscription.next().await,
            Some(Ok(SourceEvent::Comment(_)))
        ));
    }

    #[tokio::test]
    async fn test_server_close_ends_subscription_with_connection_error() {
        let endpoint = serve_frames(vec![Message::Close(None)]).await;
        let source = source_for(endpoint);
        let key = BroadcasterKey::parse("alice").unwrap();
        let mut subscription = source.subscribe(&key).await.unwrap();

        assert!(matches!(
            subscription.next().await,
            Some(Err(RelayError::SourceConnection(_)))
        ));
        assert!(subscription.next().await.is_none());
    }
}
