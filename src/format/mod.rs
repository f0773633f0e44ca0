//! On-disk layout of an archive file.
//!
//! A file is a header followed by an append-only sequence of backing store
//! blocks and entries. Entries form a forward linked chain starting at the
//! header's first entry offset; each entry points at the backing store block
//! holding its payloads. After the initial write only the header's entry
//! count and first entry offset, and the last entry's `next` field, are ever
//! rewritten.

pub mod backing;
pub mod entry;
pub mod header;

pub use backing::RecordFrame;
pub use entry::{EntryCompression, EntryInfo, EntryItem, ItemRecord, ParsedEntry};
pub use header::Header;
