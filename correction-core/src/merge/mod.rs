//! Fusion des corrections terrain

pub mod dedupe;
pub mod overlay;

pub use dedupe::{correction_fingerprint, dedupe_corrections, is_duplicate};
pub use overlay::{iso_timestamp, latest_correction, merge, merge_all};
