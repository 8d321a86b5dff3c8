//! Error taxonomy shared by every pipeline module.
//!
//! The named variants are the failures callers are expected to match on;
//! `Database`/`Io`/`Extraction` carry infrastructure errors through the
//! same type so `?` works end to end.

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A study, document, structure, section, template, or version
    /// the caller named does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is valid in general but not against the entity's
    /// current state (ingest already in flight, restore of a non-archived
    /// document, resolving an already-resolved QC issue).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No extractor handles the uploaded file's type.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The text-generation provider errored, timed out, or returned an
    /// empty response. Always paired with a `success=false` log entry.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// A create-if-absent race persisted past its single retry.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    /// Configuration file could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A supported file could not be parsed (corrupt PDF, bad archive).
    /// Recovered by the ingestion engine into `index_status = "error"`.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
