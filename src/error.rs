//! Error types for the archive engine.

use crate::types::{NameValue, Operator};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid item path: {0:?}")]
    InvalidPath(String),

    #[error("Invalid file path: {}", .0.display())]
    InvalidFilePath(PathBuf),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid operation {operator:?} on {path}")]
    InvalidOperation { path: String, operator: Operator },

    #[error("Invalid operator sequence for {path}: {last:?} followed by {next:?}")]
    InvalidOperatorSequence {
        path: String,
        last: Operator,
        next: Operator,
    },

    #[error("Invalid entry class type at offset {0}")]
    InvalidEntryClassType(u64),

    #[error("Invalid backing store class type at offset {0}")]
    InvalidBackingStoreClassType(u64),

    #[error("Invalid rights info")]
    InvalidRightsInfo,

    #[error("Invalid bits param: {0:#04x}")]
    InvalidBitsParam(u8),

    #[error("Invalid entry name table type: {0:#04x}")]
    InvalidNameTableType(u8),

    #[error("Invalid name table: {0}")]
    InvalidNameTable(String),

    #[error("Invalid item list: {0}")]
    InvalidItemList(String),

    #[error("Name value {0} has no counterpart between name table and item list")]
    InvalidNameValue(NameValue),

    #[error("Invalid next field of last entry: {0}")]
    InvalidNextField(u64),

    #[error("Invalid encoding chain: {0}")]
    InvalidEcs(String),

    #[error("Unknown codec tag: {0:#04x}")]
    UnknownCodec(u8),

    #[error("Cannot extract stream of {0}")]
    CannotExtract(String),

    #[error("No document is open")]
    NoDocument,

    #[error("{0} has not been parsed or created")]
    NotInitialized(&'static str),

    #[error("Value {value} does not fit in {width} bytes")]
    OffsetOverflow { value: u64, width: usize },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Archive is locked by another handle")]
    Locked,
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
