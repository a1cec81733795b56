pub mod engine;
pub mod worker;

pub use engine::{SyncEngine, SyncReport};
pub use worker::SyncWorker;
