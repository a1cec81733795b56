pub mod error;
pub mod types;

pub use error::{Result, XpError};
pub use types::{
    BatchOutcome, EntityId, LeaderboardRow, LeaderboardVariant, LiveStats, ScoreDelta, ScoreRecord,
    TenantId, apply_delta,
};
