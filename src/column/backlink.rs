//! Reciprocal side of every link and link-list column.
//!
//! Each slot holds the multiset of origin rows currently linking to that
//! target row, in a space-optimized tagged form: `0` is the empty multiset,
//! `(origin << 1) | 1` inlines a single origin, and any even nonzero value
//! is the ref of an integer sequence holding two or more origins. Refs are
//! 8-aligned, so the low bit cleanly discriminates the two forms.

use smallvec::SmallVec;

use crate::alloc::{Ref, SlabAlloc};
use crate::column::int_tree::IntTree;

pub struct BacklinkColumn {
    tree: IntTree,
    /// Table holding the origin column this backlink column mirrors.
    pub origin_table: usize,
    /// Index of the origin column within its table.
    pub origin_col: usize,
}

fn is_inline(value: u64) -> bool {
    value & 1 != 0
}

impl BacklinkColumn {
    pub fn new(
        alloc: &mut SlabAlloc,
        rows: usize,
        origin_table: usize,
        origin_col: usize,
    ) -> BacklinkColumn {
        let mut tree = IntTree::create(alloc);
        for _ in 0..rows {
            tree.push(alloc, 0);
        }
        BacklinkColumn {
            tree,
            origin_table,
            origin_col,
        }
    }

    pub fn size(&self, alloc: &SlabAlloc) -> usize {
        self.tree.size(alloc)
    }

    /// Grows the multiset at `target` by one occurrence of `origin`.
    pub fn add_backlink(&mut self, alloc: &mut SlabAlloc, target: usize, origin: usize) {
        let value = self.tree.get(alloc, target);
        if value == 0 {
            self.tree.set(alloc, target, (origin as u64) << 1 | 1);
            return;
        }
        if is_inline(value) {
            // Promote the inlined single origin to a sequence of two.
            let mut list = IntTree::create(alloc);
            list.push(alloc, value >> 1);
            list.push(alloc, origin as u64);
            self.tree.set(alloc, target, list.root_ref().0);
            return;
        }
        let mut list = IntTree::from_ref(Ref(value));
        list.push(alloc, origin as u64);
        if list.root_ref().0 != value {
            self.tree.set(alloc, target, list.root_ref().0);
        }
    }

    /// Removes exactly one occurrence of `origin` from the multiset at
    /// `target`. The occurrence must exist.
    pub fn remove_one_backlink(&mut self, alloc: &mut SlabAlloc, target: usize, origin: usize) {
        let value = self.tree.get(alloc, target);
        assert!(value != 0, "no backlink at row {target} to remove");
        if is_inline(value) {
            assert!(
                value >> 1 == origin as u64,
                "backlink at row {target} names origin {}, not {origin}",
                value >> 1
            );
            self.tree.set(alloc, target, 0);
            return;
        }
        let mut list = IntTree::from_ref(Ref(value));
        let ndx = list
            .find_first(alloc, origin as u64)
            .unwrap_or_else(|| panic!("backlink {origin} missing at row {target}"));
        list.erase(alloc, ndx);
        if list.size(alloc) == 1 {
            // Demote back to the inline form.
            let survivor = list.get(alloc, 0);
            list.destroy(alloc);
            self.tree.set(alloc, target, survivor << 1 | 1);
        } else if list.root_ref().0 != value {
            self.tree.set(alloc, target, list.root_ref().0);
        }
    }

    pub fn get_backlink_count(&self, alloc: &SlabAlloc, target: usize) -> usize {
        let value = self.tree.get(alloc, target);
        if value == 0 {
            0
        } else if is_inline(value) {
            1
        } else {
            IntTree::from_ref(Ref(value)).size(alloc)
        }
    }

    pub fn get_backlink(&self, alloc: &SlabAlloc, target: usize, ndx: usize) -> usize {
        let value = self.tree.get(alloc, target);
        assert!(value != 0, "no backlinks at row {target}");
        if is_inline(value) {
            assert!(ndx == 0, "backlink index {ndx} out of range");
            (value >> 1) as usize
        } else {
            IntTree::from_ref(Ref(value)).get(alloc, ndx) as usize
        }
    }

    /// Replaces one occurrence of `old_origin` with `new_origin`. Row motion
    /// calls this once per occurrence.
    pub fn update_backlink(
        &mut self,
        alloc: &mut SlabAlloc,
        target: usize,
        old_origin: usize,
        new_origin: usize,
    ) {
        let value = self.tree.get(alloc, target);
        assert!(value != 0, "no backlink at row {target} to update");
        if is_inline(value) {
            assert!(
                value >> 1 == old_origin as u64,
                "backlink at row {target} names origin {}, not {old_origin}",
                value >> 1
            );
            self.tree.set(alloc, target, (new_origin as u64) << 1 | 1);
            return;
        }
        let mut list = IntTree::from_ref(Ref(value));
        let ndx = list
            .find_first(alloc, old_origin as u64)
            .unwrap_or_else(|| panic!("backlink {old_origin} missing at row {target}"));
        list.set(alloc, ndx, new_origin as u64);
    }

    /// Exchanges origins `o1` and `o2` across the whole multiset at `target`.
    pub fn swap_backlinks(&mut self, alloc: &mut SlabAlloc, target: usize, o1: usize, o2: usize) {
        let value = self.tree.get(alloc, target);
        if value == 0 {
            return;
        }
        if is_inline(value) {
            let origin = (value >> 1) as usize;
            if origin == o1 {
                self.tree.set(alloc, target, (o2 as u64) << 1 | 1);
            } else if origin == o2 {
                self.tree.set(alloc, target, (o1 as u64) << 1 | 1);
            }
            return;
        }
        let mut list = IntTree::from_ref(Ref(value));
        let n = list.size(alloc);
        for i in 0..n {
            let origin = list.get(alloc, i) as usize;
            if origin == o1 {
                list.set(alloc, i, o2 as u64);
            } else if origin == o2 {
                list.set(alloc, i, o1 as u64);
            }
        }
    }

    /// Destroys every backlink multiset across `num_rows` rows without
    /// touching any forward link. Only valid when the caller has already
    /// broken the reciprocal links by other means.
    pub fn remove_all_backlinks(&mut self, alloc: &mut SlabAlloc, num_rows: usize) {
        for row in 0..num_rows {
            let value = self.tree.get(alloc, row);
            if value != 0 && !is_inline(value) {
                IntTree::from_ref(Ref(value)).destroy(alloc);
            }
            self.tree.set(alloc, row, 0);
        }
    }

    pub fn for_each_link<F: FnMut(usize)>(&self, alloc: &SlabAlloc, target: usize, mut f: F) {
        for origin in self.collect_links(alloc, target) {
            f(origin);
        }
    }

    /// Snapshot of the origins currently linking to `target`.
    pub fn collect_links(&self, alloc: &SlabAlloc, target: usize) -> SmallVec<[usize; 8]> {
        let mut out = SmallVec::new();
        let value = self.tree.get(alloc, target);
        if value == 0 {
            return out;
        }
        if is_inline(value) {
            out.push((value >> 1) as usize);
        } else {
            IntTree::from_ref(Ref(value)).for_each(alloc, |v| out.push(v as usize));
        }
        out
    }

    /// Frees the multiset storage at `target` and resets the slot.
    pub fn destroy_links(&mut self, alloc: &mut SlabAlloc, target: usize) {
        let value = self.tree.get(alloc, target);
        if value != 0 && !is_inline(value) {
            IntTree::from_ref(Ref(value)).destroy(alloc);
        }
        self.tree.set(alloc, target, 0);
    }

    pub fn insert_empty(&mut self, alloc: &mut SlabAlloc, at: usize, n: usize) {
        for i in 0..n {
            self.tree.insert(alloc, at + i, 0);
        }
    }

    pub fn storage_move_last_over(&mut self, alloc: &mut SlabAlloc, row: usize) {
        self.tree.move_last_over(alloc, row);
    }

    pub fn storage_swap(&mut self, alloc: &mut SlabAlloc, a: usize, b: usize) {
        let va = self.tree.get(alloc, a);
        let vb = self.tree.get(alloc, b);
        self.tree.set(alloc, a, vb);
        self.tree.set(alloc, b, va);
    }

    /// Drops all slots; multiset storage must already be gone.
    pub fn storage_clear(&mut self, alloc: &mut SlabAlloc) {
        self.tree.clear(alloc);
    }

    /// Frees all multiset storage and the column itself.
    pub fn destroy(mut self, alloc: &mut SlabAlloc) {
        let n = self.tree.size(alloc);
        self.remove_all_backlinks(alloc, n);
        self.tree.destroy(alloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(alloc: &mut SlabAlloc, rows: usize) -> BacklinkColumn {
        BacklinkColumn::new(alloc, rows, 0, 0)
    }

    #[test]
    fn single_backlink_is_inlined() {
        let mut alloc = SlabAlloc::new();
        let mut bl = col(&mut alloc, 3);
        let baseline = alloc.allocated();
        bl.add_backlink(&mut alloc, 1, 7);
        // No sequence allocated for a singleton.
        assert_eq!(alloc.allocated(), baseline);
        assert_eq!(bl.get_backlink_count(&alloc, 1), 1);
        assert_eq!(bl.get_backlink(&alloc, 1, 0), 7);
    }

    #[test]
    fn promotes_at_two_and_demotes_at_one() {
        let mut alloc = SlabAlloc::new();
        let mut bl = col(&mut alloc, 2);
        let baseline = alloc.allocated();
        bl.add_backlink(&mut alloc, 0, 3);
        bl.add_backlink(&mut alloc, 0, 9);
        assert!(alloc.allocated() > baseline);
        assert_eq!(bl.get_backlink_count(&alloc, 0), 2);
        assert_eq!(bl.get_backlink(&alloc, 0, 0), 3);
        assert_eq!(bl.get_backlink(&alloc, 0, 1), 9);

        bl.remove_one_backlink(&mut alloc, 0, 3);
        // The survivor is re-inlined and the sequence freed.
        assert_eq!(alloc.allocated(), baseline);
        assert_eq!(bl.get_backlink_count(&alloc, 0), 1);
        assert_eq!(bl.get_backlink(&alloc, 0, 0), 9);

        bl.remove_one_backlink(&mut alloc, 0, 9);
        assert_eq!(bl.get_backlink_count(&alloc, 0), 0);
    }

    #[test]
    fn duplicate_origins_are_a_multiset() {
        let mut alloc = SlabAlloc::new();
        let mut bl = col(&mut alloc, 1);
        for _ in 0..3 {
            bl.add_backlink(&mut alloc, 0, 4);
        }
        assert_eq!(bl.get_backlink_count(&alloc, 0), 3);
        bl.remove_one_backlink(&mut alloc, 0, 4);
        assert_eq!(bl.get_backlink_count(&alloc, 0), 2);
        assert_eq!(bl.collect_links(&alloc, 0).as_slice(), &[4, 4]);
    }

    #[test]
    fn update_replaces_one_occurrence() {
        let mut alloc = SlabAlloc::new();
        let mut bl = col(&mut alloc, 1);
        bl.add_backlink(&mut alloc, 0, 2);
        bl.add_backlink(&mut alloc, 0, 2);
        bl.update_backlink(&mut alloc, 0, 2, 5);
        assert_eq!(bl.collect_links(&alloc, 0).as_slice(), &[5, 2]);
    }

    #[test]
    fn swap_exchanges_all_occurrences() {
        let mut alloc = SlabAlloc::new();
        let mut bl = col(&mut alloc, 2);
        bl.add_backlink(&mut alloc, 0, 1);
        bl.add_backlink(&mut alloc, 0, 2);
        bl.add_backlink(&mut alloc, 0, 1);
        bl.swap_backlinks(&mut alloc, 0, 1, 2);
        assert_eq!(bl.collect_links(&alloc, 0).as_slice(), &[2, 1, 2]);
        // Inline slot swaps too.
        bl.add_backlink(&mut alloc, 1, 1);
        bl.swap_backlinks(&mut alloc, 1, 1, 2);
        assert_eq!(bl.collect_links(&alloc, 1).as_slice(), &[2]);
    }

    #[test]
    fn remove_all_backlinks_frees_sequences() {
        let mut alloc = SlabAlloc::new();
        let mut bl = col(&mut alloc, 4);
        let baseline = alloc.allocated();
        for row in 0..4 {
            bl.add_backlink(&mut alloc, row, 0);
            bl.add_backlink(&mut alloc, row, 1);
        }
        bl.remove_all_backlinks(&mut alloc, 4);
        assert_eq!(alloc.allocated(), baseline);
        for row in 0..4 {
            assert_eq!(bl.get_backlink_count(&alloc, row), 0);
        }
    }
}
