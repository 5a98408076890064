//! Extraction module for Trawl
//!
//! This module turns fetched documents into records:
//! - Declarative field selectors, compiled at load time
//! - The extraction pipeline with ordered post-processing
//! - Metadata finalization (cross-field dedup, case normalization)

mod finalize;
mod pipeline;
mod record;
mod selector;

pub use finalize::{custom_title_case, CaseOverrides, FinalRecord, Finalizer, IgnoreFilter};
pub use pipeline::{extract_record, frame_targets, FrameDocuments, FrameTarget};
pub use record::{dedup_case_insensitive, is_multi_value, FieldValue, RawRecord, MULTI_VALUE_FIELDS};
pub use selector::{
    AttributeKind, FieldMap, FieldSelector, FieldSpec, PostProcess, Replacement, SelectorList,
    SelectorPath,
};
