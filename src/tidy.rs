//! Collapse an item's unsaved histories into the records a save writes.
//!
//! Histories committed by earlier entries are never touched. Everything
//! after the last committed history (the boundary) is pending and is
//! reduced to at most one DELETE, or one NEW/REPLACE followed by its
//! APPENDs. The operator of that base record is chosen by what the boundary
//! leaves on disk: REPLACE if the item exists there, NEW otherwise.

use crate::items::History;
use crate::types::Operator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TidyOutcome {
    /// Nothing ever reached disk and the item no longer exists; drop it.
    Remove,
    /// No records to write.
    Unchanged,
    /// Persist the histories from this index to the end.
    Schedule(usize),
}

/// Operator the base record must carry given the last committed operator.
fn base_operator(committed: Option<Operator>) -> Operator {
    match committed {
        Some(op) if op != Operator::Delete => Operator::Replace,
        _ => Operator::New,
    }
}

/// Reconcile `histories` for the save creating entry `generation`.
pub fn tidy_histories(histories: &mut Vec<History>, generation: u32) -> TidyOutcome {
    let Some(last) = histories.last() else {
        return TidyOutcome::Remove;
    };
    if last.is_committed_before(generation) {
        return TidyOutcome::Unchanged;
    }
    let last_operator = last.operator;
    let last_index = histories.len() - 1;

    let boundary = histories
        .iter()
        .rposition(|h| h.is_committed_before(generation));
    let committed_operator = boundary.map(|b| histories[b].operator);
    let start = boundary.map_or(0, |b| b + 1);

    match last_operator {
        Operator::Delete => match committed_operator {
            None => {
                histories.clear();
                TidyOutcome::Remove
            }
            Some(Operator::Delete) => {
                histories.truncate(start);
                TidyOutcome::Unchanged
            }
            Some(_) => {
                histories.drain(start..last_index);
                TidyOutcome::Schedule(start)
            }
        },
        Operator::New | Operator::Replace => {
            histories.drain(start..last_index);
            histories[start].operator = base_operator(committed_operator);
            TidyOutcome::Schedule(start)
        }
        Operator::Append => {
            let base = histories
                .iter()
                .rposition(|h| !(h.is_pending() && h.operator == Operator::Append));
            match base {
                Some(base) if histories[base].is_pending() => {
                    histories[base].operator = base_operator(committed_operator);
                    histories.drain(start..base);
                    TidyOutcome::Schedule(start)
                }
                // The appends extend content already on disk
                Some(base) => TidyOutcome::Schedule(base + 1),
                None => TidyOutcome::Schedule(start),
            }
        }
    }
}
