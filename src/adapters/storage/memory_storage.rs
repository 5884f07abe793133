use crate::core::domain::broadcaster::BroadcasterKey;
use crate::core::ports::persistence::{DonorCredit, GiftRecord, PersistencePort};
use crate::utils::error::RelayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A donor row: lifetime diamonds given to one broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDonor {
    pub donor_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub diamonds: u64,
}

/// A gift row. Streaks update the same row while they stay in the recent window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGift {
    pub donor_id: String,
    pub gift_name: String,
    pub gift_image_url: String,
    pub gift_count: u64,
    pub diamonds: u64,
    pub recorded_at: DateTime<Utc>,
}

/// An in-memory persistence adapter for donors and gifts.
///
/// Donor totals are keyed by broadcaster and donor id. Gift rows are append-only except for
/// coalesced records, which overwrite the latest row for the same donor and gift.
///
/// # Note
///
/// Intended for single-process deployments and tests. Data is lost on restart.
#[derive(Default, Clone)]
pub struct MemoryStorageAdapter {
    donors: Arc<RwLock<HashMap<BroadcasterKey, HashMap<String, StoredDonor>>>>,
    gifts: Arc<RwLock<HashMap<BroadcasterKey, Vec<StoredGift>>>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStorageAdapter {
    /// Donors of `broadcaster`, highest diamonds first, at most `limit` of them.
    pub async fn donors_by_diamonds(
        &self,
        broadcaster: &BroadcasterKey,
        limit: usize,
    ) -> Vec<StoredDonor> {
        use itertools::Itertools;

        let donors = self.donors.read().await;
        donors
            .get(broadcaster)
            .map(|rows| {
                rows.values()
                    .sorted_by(|a, b| {
                        b.diamonds
                            .cmp(&a.diamonds)
                            .then_with(|| a.donor_id.cmp(&b.donor_id))
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Gift rows of `broadcaster` in insertion order.
    pub async fn gifts(&self, broadcaster: &BroadcasterKey) -> Vec<StoredGift> {
        let gifts = self.gifts.read().await;
        gifts.get(broadcaster).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PersistencePort for MemoryStorageAdapter {
    async fn record_donation(&self, credit: DonorCredit) -> RelayResult<()> {
        let mut donors = self.donors.write().await;
        let row = donors
            .entry(credit.broadcaster)
            .or_default()
            .entry(credit.donor_id.clone())
            .or_insert_with(|| StoredDonor {
                donor_id: credit.donor_id,
                display_name: String::new(),
                avatar_url: String::new(),
                diamonds: 0,
            });
        row.display_name = credit.display_name;
        row.avatar_url = credit.avatar_url;
        row.diamonds = row.diamonds.saturating_add(credit.diamonds_delta);
        Ok(())
    }

    async fn record_gift(&self, gift: GiftRecord) -> RelayResult<()> {
        let mut gifts = self.gifts.write().await;
        let rows = gifts.entry(gift.broadcaster).or_default();

        let existing = if gift.coalesced {
            rows.iter_mut()
                .rev()
                .find(|row| row.donor_id == gift.donor_id && row.gift_name == gift.gift_name)
        } else {
            None
        };

        match existing {
            Some(row) => {
                row.gift_count = gift.gift_count;
                row.diamonds = gift.diamonds;
                row.recorded_at = Utc::now();
            }
            None => rows.push(StoredGift {
                donor_id: gift.donor_id,
                gift_name: gift.gift_name,
                gift_image_url: gift.gift_image_url,
                gift_count: gift.gift_count,
                diamonds: gift.diamonds,
                recorded_at: Utc::now(),
            }),
        }
        Ok(())
    }
}
