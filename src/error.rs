//! Error types for store access, validation and chunk decoding.

use std::path::PathBuf;
use thiserror::Error;

use zarrs::array::{ArrayCreateError, ArrayError};
use zarrs::filesystem::FilesystemStoreCreateError;
use zarrs::group::GroupCreateError;
use zarrs::storage::{StorageError, StoreKeyError, StorePrefixError};

/// Errors raised while checking a store against the hyperspectral layout.
///
/// These are the "validation failure" kind: the caller decides whether to
/// proceed, and [`crate::validate_store`] folds them into a negative report.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The store path does not exist
    #[error("Store not found: {path:?}")]
    StoreNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// The requested group is not present in the store
    #[error("Group '{group}' not found in the Zarr store at {path:?}")]
    GroupNotFound {
        /// Group name
        group: String,
        /// Store path
        path: PathBuf,
    },

    /// None of the data array aliases exist in the group
    #[error("Could not find a data array. Searched for: {searched:?}")]
    MissingDataArray {
        /// Names that were tried
        searched: Vec<&'static str>,
    },

    /// None of the wavenumber array aliases exist in the group
    #[error("Could not find a wavenumber array. Searched for: {searched:?}")]
    MissingWavenumberArray {
        /// Names that were tried
        searched: Vec<&'static str>,
    },

    /// The data array is not stored as uint16
    #[error("Array dtype is '{found}', but 'uint16' is required")]
    DtypeMismatch {
        /// Declared data type name
        found: String,
    },

    /// Metadata could not be read, parsed or is out of range
    #[error("Invalid metadata: {0}")]
    Metadata(String),
}

/// Errors that can occur while opening, decoding or writing Zarr arrays.
#[derive(Error, Debug)]
pub enum ZarrError {
    /// I/O error during store access
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip archive error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// NumPy file could not be read
    #[error("NPY read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// NumPy file could not be written
    #[error("NPY write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// Pre-decompression check failed
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Metadata is missing or describes something unreadable
    #[error("Invalid metadata at '{key}': {message}")]
    Metadata {
        /// Store key or node path the problem was found at
        key: String,
        /// Description of the problem
        message: String,
    },

    /// An array could not be opened or created
    #[error("Array error: {0}")]
    ArrayCreate(#[from] ArrayCreateError),

    /// An array operation outside of chunk decoding failed
    #[error("Array error: {0}")]
    Array(#[from] ArrayError),

    /// A group could not be opened or created
    #[error("Group error: {0}")]
    GroupCreate(#[from] GroupCreateError),

    /// The underlying store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The filesystem store could not be set up
    #[error("Store error: {0}")]
    StoreCreate(#[from] FilesystemStoreCreateError),

    /// A store key was malformed
    #[error("Invalid store key: {0}")]
    StoreKey(#[from] StoreKeyError),

    /// A store prefix was malformed
    #[error("Invalid store prefix: {0}")]
    StorePrefix(#[from] StorePrefixError),

    /// A chunk failed to decode
    #[error("Failed to decode chunk '{key}': {source}")]
    Chunk {
        /// Store key of the failing chunk
        key: String,
        /// Underlying codec or storage failure
        source: ArrayError,
    },

    /// Requested element type differs from the stored type
    #[error("Data type mismatch: array stores {stored}, requested {requested}")]
    DataTypeMismatch {
        /// Stored data type name
        stored: String,
        /// Requested data type name
        requested: &'static str,
    },

    /// Array shapes disagree
    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Found shape
        found: Vec<usize>,
    },

    /// Destination buffer could not be allocated
    #[error("Cannot allocate {bytes} bytes for the decoded array")]
    Allocation {
        /// Requested size in bytes
        bytes: usize,
    },

    /// Store does not accept writes
    #[error("Store is read-only: {0}")]
    ReadOnly(String),

    /// Output store would replace an existing path
    #[error("Destination already exists: {0:?}")]
    DestinationExists(PathBuf),

    /// Dedicated decode thread pool could not be started
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Progress bar template was rejected
    #[error("Progress template error: {0}")]
    ProgressTemplate(#[from] indicatif::style::TemplateError),
}

impl ZarrError {
    /// Create a metadata error for the given key.
    pub fn metadata(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Wrap an array failure with the key of the chunk it happened in.
    pub fn chunk(key: impl Into<String>, source: ArrayError) -> Self {
        Self::Chunk {
            key: key.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ZarrError>;
