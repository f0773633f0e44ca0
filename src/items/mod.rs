//! Item directory and history model.
//!
//! Every path maps to an ordered list of histories. A history is either
//! committed (its payload sits in a backing store block of the open file) or
//! pending (its payload is still in the caller-supplied source, read on the
//! next save).

mod directory;
mod history;
mod source;

pub use directory::{Item, ItemDirectory};
pub use history::{History, HistoryState};
pub use source::{ItemSource, SourceReader};
