pub mod engine;
pub mod keys;
pub mod memory;
pub mod writer;

pub use engine::BufferStore;
pub use keys::BufferKeys;
pub use memory::InMemoryBufferStore;
pub use writer::ScoreBuffer;
