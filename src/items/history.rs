//! One recorded mutation of an item.

use super::source::ItemSource;
use crate::format::RecordFrame;
use crate::types::{Ecs, Operator};

/// Where a history's content lives.
#[derive(Clone, Debug)]
pub enum HistoryState {
    /// Stored in a backing store block of the open file.
    Committed(RecordFrame),
    /// Not yet saved. DELETE histories carry no source.
    Pending(Option<ItemSource>),
}

#[derive(Clone, Debug)]
pub struct History {
    /// Entry that owns (or will own) this history.
    pub entry_no: u32,
    pub operator: Operator,
    pub ecs: Ecs,
    pub state: HistoryState,
}

impl History {
    pub fn committed(entry_no: u32, operator: Operator, frame: RecordFrame) -> Self {
        Self {
            entry_no,
            operator,
            ecs: frame.ecs.clone(),
            state: HistoryState::Committed(frame),
        }
    }

    pub fn pending(entry_no: u32, operator: Operator, ecs: Ecs, source: Option<ItemSource>) -> Self {
        Self {
            entry_no,
            operator,
            ecs,
            state: HistoryState::Pending(source),
        }
    }

    /// Whether this history was persisted by an entry before `generation`.
    pub fn is_committed_before(&self, generation: u32) -> bool {
        self.entry_no < generation && matches!(self.state, HistoryState::Committed(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, HistoryState::Pending(_))
    }

    pub fn frame(&self) -> Option<&RecordFrame> {
        match &self.state {
            HistoryState::Committed(frame) => Some(frame),
            HistoryState::Pending(_) => None,
        }
    }

    /// Swap the pending source for the frame it was written to.
    pub fn commit(&mut self, entry_no: u32, frame: RecordFrame) {
        self.entry_no = entry_no;
        self.ecs = frame.ecs.clone();
        self.state = HistoryState::Committed(frame);
    }
}
