//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `DedupStore`: append-only record of item URLs already handled
//! - `PaginationCursor`: page number and item offset within a traversal
//! - `Artifact` / `ArtifactState`: lifecycle of a downloaded file

mod artifact;
mod cursor;
mod dedup;

// Re-export main types
pub use artifact::{temporary_path, Artifact, ArtifactError, ArtifactState};
pub use cursor::{CursorParseError, PaginationCursor};
pub use dedup::DedupStore;
