pub mod live;
pub mod rank;

pub use live::LiveLeaderboard;
pub use rank::RankResolver;
