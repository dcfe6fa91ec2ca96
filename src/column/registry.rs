//! Weak, sorted cache of live link-list accessors for one column.
//!
//! Entries are kept sorted by origin row and hold only weak handles, so the
//! registry never extends an accessor's lifetime. Expired handles linger as
//! tombstones; they are reused in place where that preserves the sort order
//! and pruned opportunistically before structural changes.

use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::column::link_list::LinkList;

struct Entry {
    row: usize,
    list: Weak<LinkList>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.list.strong_count() == 0
    }
}

#[derive(Default)]
pub struct AccessorRegistry {
    entries: Vec<Entry>,
    contains_tombstones: bool,
}

impl AccessorRegistry {
    pub fn new() -> AccessorRegistry {
        AccessorRegistry::default()
    }

    /// Returns the live accessor for `row`, or installs the one produced by
    /// `create`. An expired slot at or next to the insertion point is reused
    /// in place to avoid shifting the vector.
    pub fn get_or_create<F: FnOnce() -> Rc<LinkList>>(
        &mut self,
        row: usize,
        create: F,
    ) -> Rc<LinkList> {
        self.validate();
        let i = self.entries.partition_point(|e| e.row < row);
        if let Some(entry) = self.entries.get(i) {
            if entry.row == row {
                if let Some(list) = entry.list.upgrade() {
                    debug_assert!(list.is_attached());
                    return list;
                }
                let list = create();
                self.entries[i] = Entry {
                    row,
                    list: Rc::downgrade(&list),
                };
                return list;
            }
            if entry.expired() {
                // Expired entry at the insertion point; overwriting keeps
                // the order intact without a shift.
                let list = create();
                self.entries[i] = Entry {
                    row,
                    list: Rc::downgrade(&list),
                };
                return list;
            }
        }
        if i > 0 && self.entries[i - 1].expired() {
            let list = create();
            self.entries[i - 1] = Entry {
                row,
                list: Rc::downgrade(&list),
            };
            return list;
        }
        let list = create();
        self.entries.insert(
            i,
            Entry {
                row,
                list: Rc::downgrade(&list),
            },
        );
        list
    }

    /// Shifts entries at or past `at` up by `n`.
    pub fn adj_insert_rows(&mut self, at: usize, n: usize, fix_ndx_in_parent: bool) {
        self.prune_tombstones();
        let start = self.entries.partition_point(|e| e.row < at);
        for entry in &mut self.entries[start..] {
            entry.row += n;
            match entry.list.upgrade() {
                Some(list) if fix_ndx_in_parent => list.set_origin_row(entry.row),
                Some(_) => {}
                None => self.contains_tombstones = true,
            }
        }
        self.validate();
    }

    /// Detaches accessors in `[at, at + n)`, removes their entries and
    /// shifts the survivors down. Returns the handles that were detached
    /// live.
    pub fn adj_erase_rows(
        &mut self,
        at: usize,
        n: usize,
        fix_ndx_in_parent: bool,
    ) -> SmallVec<[Rc<LinkList>; 2]> {
        self.prune_tombstones();
        let start = self.entries.partition_point(|e| e.row < at);
        let end = self.entries.partition_point(|e| e.row < at + n);
        let mut detached = SmallVec::new();
        for entry in &self.entries[start..end] {
            if let Some(list) = entry.list.upgrade() {
                list.detach();
                detached.push(list);
            }
        }
        for entry in &mut self.entries[end..] {
            entry.row -= n;
            match entry.list.upgrade() {
                Some(list) if fix_ndx_in_parent => list.set_origin_row(entry.row),
                Some(_) => {}
                None => self.contains_tombstones = true,
            }
        }
        self.entries.drain(start..end);
        self.validate();
        detached
    }

    /// Move-last-over adjustment: the accessor at `to` (if any) is detached,
    /// and the accessor at `from` is relocated to `to`, keeping the entries
    /// sorted. Returns the handle detached at `to`, if it was live.
    pub fn adj_move_over(
        &mut self,
        from: usize,
        to: usize,
        fix_ndx_in_parent: bool,
    ) -> Option<Rc<LinkList>> {
        self.prune_tombstones();
        let to_pos = self.entries.partition_point(|e| e.row < to);
        let to_exists = self.entries.get(to_pos).is_some_and(|e| e.row == to);
        let mut detached = None;
        if to_exists {
            if let Some(list) = self.entries[to_pos].list.upgrade() {
                list.detach();
                detached = Some(list);
            }
            self.entries[to_pos].list = Weak::new();
            self.contains_tombstones = true;
        }
        if from == to {
            self.validate();
            return detached;
        }
        let from_pos = self.entries.partition_point(|e| e.row < from);
        if self.entries.get(from_pos).is_some_and(|e| e.row == from) {
            let entry = self.entries.remove(from_pos);
            if let Some(list) = entry.list.upgrade() {
                if fix_ndx_in_parent {
                    list.set_origin_row(to);
                }
            }
            // The tombstone left at `to` (if any) must not shadow the
            // relocated entry.
            let stale = self.entries.partition_point(|e| e.row < to);
            if self.entries.get(stale).is_some_and(|e| e.row == to) {
                self.entries[stale] = Entry {
                    row: to,
                    list: entry.list,
                };
            } else {
                self.entries.insert(
                    stale,
                    Entry {
                        row: to,
                        list: entry.list,
                    },
                );
            }
        }
        self.validate();
        detached
    }

    /// Swap adjustment: live entries exchange rows (and their lists' cached
    /// rows); a single live entry is relocated, displacing any expired entry
    /// holding the other row.
    pub fn adj_swap(&mut self, a: usize, b: usize, fix_ndx_in_parent: bool) {
        self.prune_tombstones();
        let pos_a = self.entries.partition_point(|e| e.row < a);
        let pos_b = self.entries.partition_point(|e| e.row < b);
        let live_a = self
            .entries
            .get(pos_a)
            .filter(|e| e.row == a)
            .and_then(|e| e.list.upgrade());
        let live_b = self
            .entries
            .get(pos_b)
            .filter(|e| e.row == b)
            .and_then(|e| e.list.upgrade());
        match (live_a, live_b) {
            (Some(la), Some(lb)) => {
                if fix_ndx_in_parent {
                    la.set_origin_row(b);
                    lb.set_origin_row(a);
                }
                let wa = std::mem::replace(&mut self.entries[pos_a].list, Weak::new());
                let wb = std::mem::replace(&mut self.entries[pos_b].list, wa);
                self.entries[pos_a].list = wb;
            }
            (Some(list), None) => self.relocate_single(pos_a, b, list, fix_ndx_in_parent),
            (None, Some(list)) => self.relocate_single(pos_b, a, list, fix_ndx_in_parent),
            (None, None) => {}
        }
        self.validate();
    }

    fn relocate_single(
        &mut self,
        pos: usize,
        new_row: usize,
        list: Rc<LinkList>,
        fix_ndx_in_parent: bool,
    ) {
        if fix_ndx_in_parent {
            list.set_origin_row(new_row);
        }
        let entry = self.entries.remove(pos);
        let target = self.entries.partition_point(|e| e.row < new_row);
        if self.entries.get(target).is_some_and(|e| e.row == new_row) {
            debug_assert!(self.entries[target].expired());
            self.entries[target] = Entry {
                row: new_row,
                list: entry.list,
            };
        } else {
            self.entries.insert(
                target,
                Entry {
                    row: new_row,
                    list: entry.list,
                },
            );
        }
    }

    /// Detaches every live accessor and empties the registry.
    pub fn clear_root_table(&mut self) -> SmallVec<[Rc<LinkList>; 2]> {
        let mut detached = SmallVec::new();
        for entry in &self.entries {
            if let Some(list) = entry.list.upgrade() {
                list.detach();
                detached.push(list);
            }
        }
        self.entries.clear();
        self.contains_tombstones = false;
        detached
    }

    /// Best-effort removal of expired entries. New tombstones may appear at
    /// any time, so this guarantees nothing beyond shrinking the vector.
    pub fn prune_tombstones(&mut self) {
        if !self.contains_tombstones {
            return;
        }
        self.contains_tombstones = false;
        self.entries.retain(|e| !e.expired());
    }

    /// Live accessors currently registered, used by verification.
    pub fn live_accessors(&self) -> Vec<(usize, Rc<LinkList>)> {
        self.entries
            .iter()
            .filter_map(|e| e.list.upgrade().map(|l| (e.row, l)))
            .collect()
    }

    fn validate(&self) {
        debug_assert!(
            self.entries.windows(2).all(|w| w[0].row < w[1].row),
            "accessor registry out of order"
        );
    }
}
