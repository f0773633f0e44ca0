//! View types for item change notifications.

use crate::types::Operator;
use serde::{Deserialize, Serialize};

/// Configuration for a view.
#[derive(Clone, Debug)]
pub struct ViewConfig {
    /// Max buffered events before the view is dropped.
    /// Default: 1024
    pub buffer_size: usize,

    /// Only report paths starting with this prefix (None = all paths).
    pub path_prefix: Option<String>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            path_prefix: None,
        }
    }
}

impl ViewConfig {
    /// View restricted to one subtree.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }
}

/// Events delivered to views.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// A path came into existence (NEW) or stopped existing (DELETE).
    Item { path: String, operator: Operator },

    /// Finished replaying current state, now live.
    CaughtUp,

    /// The view was dropped.
    Dropped { reason: DropReason },
}

/// Why a view was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unregistered.
    Unsubscribed,
}

/// Unique identifier for a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewId(pub u64);

/// Receiving end of a view.
pub struct ViewHandle {
    pub id: ViewId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ViewEvent>,
}

impl ViewHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ViewEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ViewEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ViewEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<ViewEvent> {
        self.receiver.try_iter().collect()
    }
}
