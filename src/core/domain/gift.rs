use crate::utils::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single gift as reported by the upstream source.
///
/// Only constructed through [`RawGiftEvent::new`], which enforces the invariants the
/// aggregator relies on: identifiers are present and `repeat_count` is at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGiftEvent {
    pub donor_id: String,
    pub donor_display_name: String,
    pub donor_avatar_url: String,
    pub gift_name: String,
    pub gift_image_url: String,
    pub unit_diamond_value: u64,
    pub repeat_count: u64,
    pub received_at: DateTime<Utc>,
}

impl RawGiftEvent {
    /// Creates a validated gift event.
    ///
    /// An empty display name falls back to the donor id.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedEvent` when the donor id or gift name is blank or when
    /// `repeat_count` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        donor_id: impl Into<String>,
        donor_display_name: impl Into<String>,
        donor_avatar_url: impl Into<String>,
        gift_name: impl Into<String>,
        gift_image_url: impl Into<String>,
        unit_diamond_value: u64,
        repeat_count: u64,
        received_at: DateTime<Utc>,
    ) -> RelayResult<Self> {
        let event = Self {
            donor_id: donor_id.into(),
            donor_display_name: donor_display_name.into(),
            donor_avatar_url: donor_avatar_url.into(),
            gift_name: gift_name.into(),
            gift_image_url: gift_image_url.into(),
            unit_diamond_value,
            repeat_count,
            received_at,
        };
        event.validate()?;

        let mut event = event;
        if event.donor_display_name.trim().is_empty() {
            event.donor_display_name = event.donor_id.clone();
        }
        Ok(event)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.donor_id.trim().is_empty() {
            return Err(RelayError::MalformedEvent("missing donor id".into()));
        }
        if self.gift_name.trim().is_empty() {
            return Err(RelayError::MalformedEvent(format!(
                "missing gift name for donor {}",
                self.donor_id
            )));
        }
        if self.repeat_count == 0 {
            return Err(RelayError::MalformedEvent(format!(
                "repeat count must be at least 1 (donor {}, gift {})",
                self.donor_id, self.gift_name
            )));
        }
        Ok(())
    }

    /// Diamonds carried by this event: unit value times repeat count.
    pub fn diamonds(&self) -> u64 {
        self.unit_diamond_value.saturating_mul(self.repeat_count)
    }
}

/// A recent-events entry: one or more gifts from the same donor coalesced together.
///
/// This is also the JSON payload of push frames and of the poll `recent` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedEvent {
    pub donor_id: String,
    pub donor_display_name: String,
    #[serde(rename = "donorAvatarURL")]
    pub donor_avatar_url: String,
    pub gift_name: String,
    #[serde(rename = "giftImageURL")]
    pub gift_image_url: String,
    pub total_gift_count: u64,
    pub total_diamonds: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_updated_at: DateTime<Utc>,
    pub sequence_number: u64,
}

impl AggregatedEvent {
    pub(crate) fn open(event: &RawGiftEvent, sequence_number: u64) -> Self {
        Self {
            donor_id: event.donor_id.clone(),
            donor_display_name: event.donor_display_name.clone(),
            donor_avatar_url: event.donor_avatar_url.clone(),
            gift_name: event.gift_name.clone(),
            gift_image_url: event.gift_image_url.clone(),
            total_gift_count: event.repeat_count,
            total_diamonds: event.diamonds(),
            last_updated_at: event.received_at,
            sequence_number,
        }
    }

    /// Folds another occurrence of the same gift into this entry.
    pub(crate) fn coalesce(&mut self, event: &RawGiftEvent, sequence_number: u64) {
        self.total_gift_count = self.total_gift_count.saturating_add(event.repeat_count);
        self.total_diamonds = self.total_diamonds.saturating_add(event.diamonds());
        self.donor_display_name = event.donor_display_name.clone();
        self.donor_avatar_url = event.donor_avatar_url.clone();
        self.gift_image_url = event.gift_image_url.clone();
        self.last_updated_at = event.received_at;
        self.sequence_number = sequence_number;
    }

    pub fn matches(&self, event: &RawGiftEvent) -> bool {
        self.donor_id == event.donor_id && self.gift_name == event.gift_name
    }
}
