pub mod board;
pub mod memory;
pub mod snapshot;

pub use board::ResultBoard;
pub use memory::{cosine_distance, MemoryPostStore, MemoryVectorStore};
pub use snapshot::StoreSnapshot;
