//! An ordered list of displayed items, separated from rendering.
//!
//! Every mutation returns the [`ListChange`] describing it, so that a view can
//! redraw incrementally (or not at all) without the list knowing about it.
//! Positions outside of the list are programmer errors and panic.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Inserted { at: usize },
    RangeInserted { start: usize, count: usize },
    Removed { at: usize },
    RangeRemoved { start: usize, count: usize },
    Changed { at: usize },
    Moved { from: usize, to: usize },
    Reset,
}

impl ListChange {
    /// Where the item that was at `position` before this change is now.
    pub fn remap(&self, position: usize) -> Option<usize> {
        match *self {
            ListChange::Inserted { at } => Some(if position >= at { position + 1 } else { position }),
            ListChange::RangeInserted { start, count } => {
                Some(if position >= start { position + count } else { position })
            },
            ListChange::Removed { at } => match position {
                p if p == at => None,
                p if p > at => Some(p - 1),
                p => Some(p),
            },
            ListChange::RangeRemoved { start, count } => {
                if position < start {
                    Some(position)
                } else if position < start + count {
                    None
                } else {
                    Some(position - count)
                }
            },
            ListChange::Changed { .. } => Some(position),
            ListChange::Moved { from, to } => {
                if position == from {
                    Some(to)
                } else if from < to && position > from && position <= to {
                    Some(position - 1)
                } else if to < from && position >= to && position < from {
                    Some(position + 1)
                } else {
                    Some(position)
                }
            },
            ListChange::Reset => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemList<T> {
    items: Vec<T>,
}

impl<T> Default for ItemList<T> {
    fn default() -> Self {
        ItemList { items: Vec::new() }
    }
}

impl<T> ItemList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    fn check_position(&self, position: usize, len: usize) {
        assert!(position < len, "position {} out of range for a list of {} items", position, len);
    }

    pub fn push(&mut self, item: T) -> ListChange {
        self.items.push(item);
        ListChange::Inserted { at: self.items.len() - 1 }
    }

    pub fn insert(&mut self, at: usize, item: T) -> ListChange {
        self.check_position(at, self.items.len() + 1);
        self.items.insert(at, item);
        ListChange::Inserted { at }
    }

    pub fn insert_all<I: IntoIterator<Item = T>>(&mut self, at: usize, items: I) -> ListChange {
        self.check_position(at, self.items.len() + 1);
        let before = self.items.len();
        drop(self.items.splice(at..at, items));
        ListChange::RangeInserted { start: at, count: self.items.len() - before }
    }

    pub fn remove(&mut self, at: usize) -> ListChange {
        self.check_position(at, self.items.len());
        self.items.remove(at);
        ListChange::Removed { at }
    }

    /// Removes `range.start` (inclusive) up to `range.end` (exclusive).
    pub fn remove_range(&mut self, range: Range<usize>) -> ListChange {
        assert!(
            range.start <= range.end && range.end <= self.items.len(),
            "range {:?} out of range for a list of {} items", range, self.items.len(),
        );
        let start = range.start;
        let count = range.len();
        self.items.drain(range);
        ListChange::RangeRemoved { start, count }
    }

    pub fn clear(&mut self) -> ListChange {
        self.items.clear();
        ListChange::Reset
    }

    pub fn replace_all<I: IntoIterator<Item = T>>(&mut self, items: I) -> ListChange {
        self.items.clear();
        self.items.extend(items);
        ListChange::Reset
    }

    pub fn update(&mut self, at: usize, item: T) -> ListChange {
        self.check_position(at, self.items.len());
        self.items[at] = item;
        ListChange::Changed { at }
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> ListChange {
        self.check_position(from, self.items.len());
        self.check_position(to, self.items.len());
        let item = self.items.remove(from);
        self.items.insert(to, item);
        ListChange::Moved { from, to }
    }
}

/// The row shown as busy: requested on selection, shown once the work has started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Highlight {
    requested: Option<usize>,
    shown: Option<usize>,
}

impl Highlight {
    pub fn row(&self) -> Option<usize> {
        self.shown
    }

    pub fn request(&mut self, position: usize) {
        self.requested = Some(position);
    }

    /// Shows the requested row, if any.
    pub fn confirm(&mut self) {
        if let Some(position) = self.requested.take() {
            self.shown = Some(position);
        }
    }

    pub fn clear(&mut self) {
        self.requested = None;
        self.shown = None;
    }

    pub fn on_change(&mut self, change: ListChange) {
        self.requested = self.requested.and_then(|position| change.remap(position));
        self.shown = self.shown.and_then(|position| change.remap(position));
    }
}
