//! Output module for committing finished artifacts
//!
//! This module handles:
//! - The sink interface and the local-directory sink
//! - Ownership and mode policy for committed files
//! - Metadata sidecar files

mod local;
mod nfo;
mod traits;

pub use local::LocalSink;
pub use nfo::{render_nfo, NfoWriter};
pub use traits::{PutOutcome, SidecarWriter, Sink, SinkError, SinkResult};
