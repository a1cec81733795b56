// ============================================================================
// xpcache
// ============================================================================
//
// Write-behind score aggregation with live leaderboards.
//
//   increment ──► buffer (per-tenant hash) ──► sync engine ──► durable store
//                     │                                           │
//                     └────────────► live leaderboard ◄───────────┘
//

pub mod buffer;
pub mod config;
pub mod core;
pub mod facade;
pub mod leaderboard;
pub mod storage;
pub mod sync;

pub use buffer::{BufferKeys, BufferStore, InMemoryBufferStore, ScoreBuffer};
pub use config::XpConfig;
pub use core::{
    BatchOutcome, EntityId, LeaderboardRow, LeaderboardVariant, LiveStats, Result, ScoreDelta,
    ScoreRecord, TenantId, XpError,
};
pub use facade::XpService;
pub use leaderboard::{LiveLeaderboard, RankResolver};
pub use storage::{DurabilityMode, InMemoryScoreStore, ScoreStore};
pub use sync::{SyncEngine, SyncReport, SyncWorker};
