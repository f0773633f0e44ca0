//! View manager for broadcasting item changes.

use crate::types::Operator;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{DropReason, ViewConfig, ViewEvent, ViewHandle, ViewId};

/// Internal view state.
struct View {
    config: ViewConfig,
    sender: Sender<ViewEvent>,
}

impl View {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (the view will be dropped).
    fn try_send(&self, event: ViewEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    fn matches(&self, path: &str) -> bool {
        match &self.config.path_prefix {
            Some(prefix) => path.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

/// Registry of views and the broadcast side of their channels.
pub struct ViewManager {
    views: RwLock<HashMap<ViewId, View>>,
    next_id: AtomicU64,
}

impl ViewManager {
    pub fn new() -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a view, replay one NEW per path in `existing`, then send
    /// `CaughtUp`.
    ///
    /// A view whose buffer cannot hold the replay is dropped straight away.
    pub fn register<'a, I>(&self, config: ViewConfig, existing: I) -> ViewHandle
    where
        I: IntoIterator<Item = &'a String>,
    {
        let id = ViewId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let view = View { config, sender };

        // Replay under the write lock so no live event slips in before CaughtUp
        let mut views = self.views.write();
        let mut alive = true;
        for path in existing {
            if !view.matches(path) {
                continue;
            }
            let event = ViewEvent::Item {
                path: path.clone(),
                operator: Operator::New,
            };
            if !view.try_send(event) {
                alive = false;
                break;
            }
        }

        if alive && view.try_send(ViewEvent::CaughtUp) {
            views.insert(id, view);
        } else {
            let _ = view.sender.try_send(ViewEvent::Dropped {
                reason: DropReason::BufferOverflow,
            });
        }

        ViewHandle { id, receiver }
    }

    /// Unregister and clean up.
    pub fn unregister(&self, id: ViewId) {
        let mut views = self.views.write();
        if let Some(view) = views.remove(&id) {
            // Best effort
            let _ = view.sender.try_send(ViewEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn view_count(&self) -> usize {
        self.views.read().len()
    }

    /// Broadcast an existence change of `path`. Drops views that fail to
    /// receive it.
    pub fn broadcast(&self, path: &str, operator: Operator) {
        let event = ViewEvent::Item {
            path: path.to_string(),
            operator,
        };
        let mut to_remove = Vec::new();

        {
            let views = self.views.read();
            for (id, view) in views.iter() {
                if view.matches(path) && !view.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut views = self.views.write();
            for id in to_remove {
                if let Some(view) = views.remove(&id) {
                    let _ = view.sender.try_send(ViewEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for ViewManager {
    fn default() -> Self {
        Self::new()
    }
}
