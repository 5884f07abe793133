use crate::core::domain::donor::{top_donor, DonorTotals};
use crate::core::domain::gift::{AggregatedEvent, RawGiftEvent};
use crate::utils::error::RelayResult;
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

pub const DEFAULT_RECENT_CAPACITY: usize = 20;

/// What one [`Aggregator::apply`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedGift {
    /// The recent-events entry after the update.
    pub event: AggregatedEvent,
    /// The donor's totals after the update.
    pub donor: DonorTotals,
    /// Diamonds added by this gift.
    pub diamonds_delta: u64,
    /// True when the gift was folded into an entry already in the ring.
    pub coalesced: bool,
}

/// A consistent point-in-time copy of an aggregator's state.
#[derive(Debug, Clone, Default)]
pub struct AggregatorSnapshot {
    /// Recent events, most recently updated first.
    pub recent: Vec<AggregatedEvent>,
    /// Donor totals in first-seen order.
    pub donors: Vec<DonorTotals>,
    /// Highest sequence number handed out so far (0 if none).
    pub last_sequence: u64,
}

impl AggregatorSnapshot {
    pub fn top_donor(&self) -> Option<&DonorTotals> {
        top_donor(&self.donors)
    }
}

#[derive(Debug)]
struct AggregatorState {
    ring: VecDeque<AggregatedEvent>,
    donors: HashMap<String, DonorTotals>,
    last_sequence: u64,
}

impl AggregatorState {
    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }
}

/// Per-broadcaster aggregation state.
///
/// Holds the recent-events ring (capacity `K`, most recent first), running donor totals and the
/// sequence counter behind a single lock, so every apply and every snapshot sees all three in
/// agreement. The lock is never held across an await point.
#[derive(Debug)]
pub struct Aggregator {
    capacity: usize,
    state: RwLock<AggregatorState>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

impl Aggregator {
    /// Creates an aggregator whose ring holds at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RwLock::new(AggregatorState {
                ring: VecDeque::with_capacity(capacity + 1),
                donors: HashMap::new(),
                last_sequence: 0,
            }),
        }
    }

    /// Applies one gift.
    ///
    /// The donor's totals grow by `unit_diamond_value * repeat_count` and take the event's name
    /// and avatar. If the ring already holds an entry for the same donor and gift, that entry is
    /// coalesced, gets a fresh sequence number and moves to the head. Otherwise a new entry is
    /// pushed at the head and the tail is evicted once the ring exceeds its capacity. An evicted
    /// entry is never coalesced again.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedEvent` if the event fails validation. State is untouched in
    /// that case.
    pub fn apply(&self, event: &RawGiftEvent) -> RelayResult<AppliedGift> {
        event.validate()?;
        let delta = event.diamonds();

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let next_ordinal = state.donors.len() as u64;
        let donor = state
            .donors
            .entry(event.donor_id.clone())
            .or_insert_with(|| DonorTotals::new(&event.donor_id, next_ordinal));
        donor.cumulative_diamonds = donor.cumulative_diamonds.saturating_add(delta);
        donor.display_name = event.donor_display_name.clone();
        donor.avatar_url = event.donor_avatar_url.clone();
        let donor = donor.clone();

        let sequence = state.next_sequence();
        let position = state.ring.iter().position(|entry| entry.matches(event));
        let coalesced = position.is_some();

        let entry = match position.and_then(|index| state.ring.remove(index)) {
            Some(mut existing) => {
                existing.coalesce(event, sequence);
                existing
            }
            None => AggregatedEvent::open(event, sequence),
        };
        state.ring.push_front(entry.clone());
        state.ring.truncate(self.capacity);

        Ok(AppliedGift {
            event: entry,
            donor,
            diamonds_delta: delta,
            coalesced,
        })
    }

    /// Copies the ring, the donor totals and the sequence counter under one read lock.
    pub fn snapshot(&self) -> AggregatorSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut donors: Vec<DonorTotals> = state.donors.values().cloned().collect();
        donors.sort_by_key(|d| d.first_seen);

        AggregatorSnapshot {
            recent: state.ring.iter().cloned().collect(),
            donors,
            last_sequence: state.last_sequence,
        }
    }

    /// Donors ordered by diamonds descending, first-seen ascending on ties.
    pub fn top_donors(&self, limit: usize) -> Vec<DonorTotals> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut donors: Vec<DonorTotals> = state.donors.values().cloned().collect();
        drop(state);

        donors.sort_by(|a, b| {
            b.cumulative_diamonds
                .cmp(&a.cumulative_diamonds)
                .then(a.first_seen.cmp(&b.first_seen))
        });
        donors.truncate(limit);
        donors
    }

    pub fn donor(&self, donor_id: &str) -> Option<DonorTotals> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.donors.get(donor_id).cloned()
    }
}
