use crate::core::domain::gift::RawGiftEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat comment relayed to push subscribers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEvent {
    pub donor_id: String,
    pub display_name: String,
    pub comment: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub received_at: DateTime<Utc>,
}

/// Everything an event source can hand to a listener, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Gift(RawGiftEvent),
    Comment(CommentEvent),
}
