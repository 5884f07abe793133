use serde::{Deserialize, Serialize};

/// Running totals for one donor within a broadcaster session.
///
/// `cumulative_diamonds` only ever grows. `first_seen` orders donors by first appearance and
/// breaks ties on the leaderboard; it is not part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorTotals {
    pub donor_id: String,
    pub display_name: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
    pub cumulative_diamonds: u64,
    #[serde(skip)]
    pub first_seen: u64,
}

impl DonorTotals {
    pub(crate) fn new(donor_id: &str, first_seen: u64) -> Self {
        Self {
            donor_id: donor_id.to_string(),
            display_name: String::new(),
            avatar_url: String::new(),
            cumulative_diamonds: 0,
            first_seen,
        }
    }
}

/// Picks the leaderboard leader: most diamonds, earliest first-seen on ties.
pub fn top_donor<'a, I>(donors: I) -> Option<&'a DonorTotals>
where
    I: IntoIterator<Item = &'a DonorTotals>,
{
    donors.into_iter().min_by(|a, b| {
        b.cumulative_diamonds
            .cmp(&a.cumulative_diamonds)
            .then(a.first_seen.cmp(&b.first_seen))
    })
}
