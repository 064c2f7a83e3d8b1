pub mod coordinator;
pub mod ranking;
pub mod search;

pub use coordinator::{rescan_posts, EmbedReport, PipelineCoordinator, RescanReport, RunOptions};
pub use ranking::{corpus_fingerprint, rank};
pub use search::{search, SearchFilter, SearchHit};
