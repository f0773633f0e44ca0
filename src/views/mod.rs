//! Change notifications for external views of an archive.
//!
//! A view (a tree view, an index, a UI) registers and receives one event per
//! change in the set of logically existing paths:
//! - a replay of NEW for every existing path, then `CaughtUp`
//! - NEW when an item is inserted, DELETE when it is deleted
//! - NEW for every path of an archive as it is opened, DELETE as it is closed
//!
//! Views sit behind bounded channels; a view that stops draining is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = archive.register_view(ViewConfig::default());
//!
//! loop {
//!     match handle.recv() {
//!         Ok(ViewEvent::Item { path, operator }) => println!("{:?} {}", operator, path),
//!         Ok(ViewEvent::CaughtUp) => println!("Now live!"),
//!         Ok(ViewEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::ViewManager;
pub use types::{DropReason, ViewConfig, ViewEvent, ViewHandle, ViewId};
