use crate::core::domain::broadcaster::BroadcasterKey;
use crate::utils::error::{RelayError, RelayResult};
use serde::Deserialize;

/// Query parameters shared by the live endpoints.
///
/// - `broadcasterKey` (or the legacy `username`): whose stream to read.
/// - `lastSeenSequence`: poll cursor, only used by `/recent`.
/// - `limit`: row cap, only used by `/leaderboard`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterQuery {
    #[serde(alias = "username")]
    pub broadcaster_key: Option<String>,
    pub last_seen_sequence: Option<u64>,
    pub limit: Option<usize>,
}

impl BroadcasterQuery {
    /// The validated broadcaster key.
    ///
    /// # Errors
    ///
    /// `RelayError::InvalidRequest` when the key is missing or blank.
    pub fn broadcaster(&self) -> RelayResult<BroadcasterKey> {
        let raw = self
            .broadcaster_key
            .as_deref()
            .ok_or_else(|| RelayError::InvalidRequest("broadcasterKey required".into()))?;
        BroadcasterKey::parse(raw)
    }
}
