pub mod api_response;
pub mod leaderboard;
pub mod query;
