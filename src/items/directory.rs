//! In-memory directory of items and their histories.

use super::history::History;
use crate::error::{ArchiveError, Result};
use crate::format::RecordFrame;
use crate::tidy::{tidy_histories, TidyOutcome};
use crate::types::Operator;
use std::collections::{BTreeSet, HashMap};

/// A path and everything recorded against it, oldest first.
#[derive(Clone, Debug)]
pub struct Item {
    path: String,
    histories: Vec<History>,
}

impl Item {
    fn new(path: String) -> Self {
        Self {
            path,
            histories: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn histories(&self) -> &[History] {
        &self.histories
    }

    pub fn last_operator(&self) -> Option<Operator> {
        self.histories.last().map(|h| h.operator)
    }

    /// Logical existence: the last recorded operator is not DELETE.
    pub fn exists(&self) -> bool {
        matches!(self.last_operator(), Some(op) if op != Operator::Delete)
    }

    /// Index of the history the current content starts at: the latest
    /// NEW or REPLACE, followed only by APPENDs.
    pub fn content_start(&self) -> Result<usize> {
        match self.last_operator() {
            None | Some(Operator::Delete) => {
                return Err(ArchiveError::CannotExtract(self.path.clone()))
            }
            _ => {}
        }

        for (index, history) in self.histories.iter().enumerate().rev() {
            match history.operator {
                Operator::Append => continue,
                Operator::New | Operator::Replace => return Ok(index),
                Operator::Delete => break,
            }
        }
        Err(ArchiveError::Corruption(format!(
            "{} has appends with no base content",
            self.path
        )))
    }
}

/// Map from path to item, plus the set of paths touched since the last save.
#[derive(Debug, Default)]
pub struct ItemDirectory {
    items: HashMap<String, Item>,
    changed: BTreeSet<String>,
}

impl ItemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&Item> {
        self.items.get(path)
    }

    pub fn has_item(&self, path: &str) -> bool {
        self.items.get(path).map_or(false, Item::exists)
    }

    /// Paths whose last operator is not DELETE, sorted.
    pub fn existing_paths(&self) -> BTreeSet<String> {
        self.items
            .values()
            .filter(|item| item.exists())
            .map(|item| item.path.clone())
            .collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn changed_paths(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed.clear();
    }

    /// Check that `operator` may be applied to `path` now.
    ///
    /// NEW needs the item to be absent or deleted; everything else needs it
    /// to exist.
    pub fn check_operation(&self, path: &str, operator: Operator) -> Result<()> {
        let last = self.items.get(path).and_then(Item::last_operator);
        match (last, operator) {
            (None, Operator::New) => Ok(()),
            (None, _) => Err(ArchiveError::ItemNotFound(path.to_string())),
            (Some(Operator::Delete), Operator::New) => Ok(()),
            (Some(Operator::Delete), _) | (Some(_), Operator::New) => {
                Err(ArchiveError::InvalidOperation {
                    path: path.to_string(),
                    operator,
                })
            }
            (Some(_), _) => Ok(()),
        }
    }

    /// Record a pending mutation after checking it.
    pub fn record(&mut self, path: &str, history: History) -> Result<()> {
        self.check_operation(path, history.operator)?;
        self.items
            .entry(path.to_string())
            .or_insert_with(|| Item::new(path.to_string()))
            .histories
            .push(history);
        self.changed.insert(path.to_string());
        Ok(())
    }

    /// Apply the committed histories of one entry. Nothing is applied if
    /// any path violates the operator sequence rules.
    pub fn replay(&mut self, items: Vec<(String, Vec<History>)>) -> Result<()> {
        for (path, histories) in &items {
            let mut last = self.items.get(path).and_then(Item::last_operator);
            for history in histories {
                match last {
                    None if history.operator != Operator::New => {
                        return Err(ArchiveError::ItemNotFound(path.clone()))
                    }
                    Some(prev) if !prev.may_precede(history.operator) => {
                        return Err(ArchiveError::InvalidOperatorSequence {
                            path: path.clone(),
                            last: prev,
                            next: history.operator,
                        })
                    }
                    _ => {}
                }
                last = Some(history.operator);
            }
        }

        for (path, histories) in items {
            self.items
                .entry(path.clone())
                .or_insert_with(|| Item::new(path))
                .histories
                .extend(histories);
        }
        Ok(())
    }

    /// Reconcile every changed path for the save that will create entry
    /// `generation`. Returns, per path, the index of the first history to
    /// persist, in path order.
    pub fn tidy(&mut self, generation: u32) -> Vec<(String, usize)> {
        let mut scheduled = Vec::new();
        let mut removed = Vec::new();

        for path in &self.changed {
            let Some(item) = self.items.get_mut(path) else {
                continue;
            };
            match tidy_histories(&mut item.histories, generation) {
                TidyOutcome::Schedule(start) => scheduled.push((path.clone(), start)),
                TidyOutcome::Unchanged => {}
                TidyOutcome::Remove => removed.push(path.clone()),
            }
        }

        for path in removed {
            self.items.remove(&path);
        }
        scheduled
    }

    /// Mark one history as written by entry `entry_no`.
    pub(crate) fn commit_history(
        &mut self,
        path: &str,
        index: usize,
        entry_no: u32,
        frame: RecordFrame,
    ) {
        if let Some(history) = self
            .items
            .get_mut(path)
            .and_then(|item| item.histories.get_mut(index))
        {
            history.commit(entry_no, frame);
        }
    }
}
