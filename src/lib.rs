//! # XDA
//!
//! A versioned, append-only binary archive. One file holds a chain of
//! immutable entries, each recording the changes made to a set of named
//! items since the previous one; item content lives in append-only backing
//! store blocks next to them.
//!
//! ## Core Concepts
//!
//! - **Items**: Paths like `\docs\readme.txt` with a history of NEW, APPEND,
//!   REPLACE and DELETE operations
//! - **Entries**: One per save, linked into a forward chain from the header
//! - **Tidy**: Unsaved operations collapse to the fewest records before a save
//! - **Save As**: Compacts the current content into a fresh single-entry file
//! - **Codec chains**: Per-payload transforms (deflate) named by tag bytes
//!
//! ## Example
//!
//! ```ignore
//! use xda::{Archive, Ecs};
//!
//! let mut archive = Archive::new();
//! archive.create("./notes.xda", 4)?;
//!
//! archive.insert_item("\\a.txt", b"hello".to_vec(), Ecs::raw())?;
//! archive.append_item("\\a.txt", b", world".to_vec(), Ecs::deflate())?;
//! archive.save(true, true)?;
//!
//! assert_eq!(archive.extract("\\a.txt")?, b"hello, world");
//! ```

pub mod archive;
pub mod binary;
pub mod codec;
pub mod document;
pub mod error;
pub mod format;
pub mod items;
pub mod tidy;
pub mod types;
pub mod views;

// Re-exports
pub use archive::{Archive, DEFAULT_BITS_PARAM};
pub use document::{Document, DocumentConfig, VerifyFailure, VerifyReport};
pub use error::{ArchiveError, Result};
pub use format::{EntryCompression, EntryInfo, Header};
pub use items::{History, HistoryState, Item, ItemSource};
pub use types::*;
pub use views::{DropReason, ViewConfig, ViewEvent, ViewHandle, ViewId, ViewManager};
