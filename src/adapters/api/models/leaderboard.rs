use crate::core::domain::donor::DonorTotals;
use serde::Serialize;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// One row of `/leaderboard`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub donor_id: String,
    pub display_name: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
    pub cumulative_diamonds: u64,
}

/// Ranks donors already sorted by the aggregator, starting at 1.
pub fn rank_donors(donors: Vec<DonorTotals>) -> Vec<LeaderboardEntry> {
    donors
        .into_iter()
        .enumerate()
        .map(|(index, donor)| LeaderboardEntry {
            rank: index + 1,
            donor_id: donor.donor_id,
            display_name: donor.display_name,
            avatar_url: donor.avatar_url,
            cumulative_diamonds: donor.cumulative_diamonds,
        })
        .collect()
}
