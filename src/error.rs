//! Error taxonomy.
//!
//! Every error carries enough context to name the offending field or offset.
//! The library never retries or swallows; absence of an optional table is
//! modeled with `Option`, not an error (see each accessor's doc comment).

use thiserror::Error;

use crate::offset::VirtualOffset;

/// Everything that can go wrong while reading a PE image.
#[derive(Debug, Error)]
pub enum PexpError {
    /// The DOS/NT signatures or optional-header magic don't match a PE image.
    #[error("invalid PE format: {0}")]
    InvalidFormat(String),

    /// A structural read came back short of the bytes it needed.
    #[error("malformed image: expected {expected} bytes at {offset:#x}, got {got}")]
    MalformedImage {
        offset: i64,
        expected: usize,
        got: usize,
    },

    /// An RVA or file offset has no containing section (or vice versa).
    #[error("invalid offset: {0:#x} does not translate within this image")]
    InvalidOffset(i64),

    /// The import data directory is absent or smaller than one descriptor.
    #[error("invalid import directory: {0}")]
    InvalidImportDirectory(String),

    /// A runtime function's unwind-data RVA does not translate.
    #[error("invalid unwind data offset: {0}")]
    InvalidUnwindOffset(VirtualOffset),

    /// An export's name ordinal is out of range of the name table.
    #[error("malformed export: name ordinal {ordinal} >= number_of_names {number_of_names}")]
    MalformedExport {
        ordinal: u32,
        number_of_names: u32,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PexpError>;
