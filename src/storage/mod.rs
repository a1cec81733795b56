pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::ScoreStore;
pub use memory::InMemoryScoreStore;
pub use persistence::{DurabilityMode, PersistenceManager, WalEntry};
pub use table::ScoreTable;
