//! Positional snapshot module
//!
//! Plans page-range chunks for a table and reads them through the
//! collaborator scanner as a lazy [`Stage`](crate::stream::Stage).

mod chunks;
mod stage;

pub use chunks::{ChunkPlan, PageRange};
pub use stage::SnapshotStage;
