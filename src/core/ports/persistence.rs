use crate::core::domain::broadcaster::BroadcasterKey;
use crate::utils::error::RelayResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Diamonds credited to a donor by one applied gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorCredit {
    pub broadcaster: BroadcasterKey,
    pub donor_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub diamonds_delta: u64,
}

/// The state of a recent-events entry after one applied gift.
///
/// `coalesced` is true when the gift was folded into an existing entry; the store should update
/// its latest record for the same donor and gift instead of inserting a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftRecord {
    pub broadcaster: BroadcasterKey,
    pub donor_id: String,
    pub gift_name: String,
    pub gift_image_url: String,
    pub gift_count: u64,
    pub diamonds: u64,
    pub coalesced: bool,
}

/// Optional durable storage for donors and gifts.
///
/// Writes are best-effort. Nothing in the aggregation or fanout path waits on them, and a
/// failure never changes in-memory state.
#[async_trait]
#[cfg_attr(feature = "test-helpers", mockall::automock)]
pub trait PersistencePort: Send + Sync {
    async fn record_donation(&self, credit: DonorCredit) -> RelayResult<()>;

    async fn record_gift(&self, gift: GiftRecord) -> RelayResult<()>;
}
