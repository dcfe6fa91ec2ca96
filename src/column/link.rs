//! Single-valued link column.
//!
//! Each slot is an integer in the shared tree: `0` is the null link, any
//! other value is `target_row + 1`. The wire offset keeps zero-filled fresh
//! rows reading as null. Reciprocal backlink maintenance and cascades are
//! orchestrated by the group, which calls the storage primitives here.

use crate::alloc::SlabAlloc;
use crate::column::int_tree::IntTree;
use crate::column::LinkStrength;

pub struct LinkColumn {
    tree: IntTree,
    /// Table the stored row indices point into.
    pub target_table: usize,
    /// Index of the reciprocal backlink column within the target table.
    pub backlink_col: usize,
    pub strength: LinkStrength,
}

fn encode(target: Option<usize>) -> u64 {
    match target {
        None => 0,
        Some(t) => t as u64 + 1,
    }
}

fn decode(value: u64) -> Option<usize> {
    if value == 0 {
        None
    } else {
        Some(value as usize - 1)
    }
}

impl LinkColumn {
    pub fn new(
        alloc: &mut SlabAlloc,
        rows: usize,
        target_table: usize,
        backlink_col: usize,
        strength: LinkStrength,
    ) -> LinkColumn {
        let mut tree = IntTree::create(alloc);
        for _ in 0..rows {
            tree.push(alloc, 0);
        }
        LinkColumn {
            tree,
            target_table,
            backlink_col,
            strength,
        }
    }

    pub fn size(&self, alloc: &SlabAlloc) -> usize {
        self.tree.size(alloc)
    }

    pub fn get_link(&self, alloc: &SlabAlloc, row: usize) -> Option<usize> {
        decode(self.tree.get(alloc, row))
    }

    pub fn is_null_link(&self, alloc: &SlabAlloc, row: usize) -> bool {
        self.tree.get(alloc, row) == 0
    }

    /// Raw slot write; backlink bookkeeping is the caller's job.
    pub fn set_raw(&mut self, alloc: &mut SlabAlloc, row: usize, target: Option<usize>) {
        self.tree.set(alloc, row, encode(target));
    }

    /// Clears the forward slot of a link whose reciprocal side is already
    /// gone. Asserts the slot indeed pointed at `old_target`.
    pub fn do_nullify_link(&mut self, alloc: &mut SlabAlloc, row: usize, old_target: usize) {
        debug_assert_eq!(
            self.tree.get(alloc, row),
            encode(Some(old_target)),
            "nullify of a link that does not point at row {old_target}"
        );
        self.tree.set(alloc, row, 0);
    }

    /// Retargets the forward slot from `old_target` to `new_target`.
    pub fn do_update_link(
        &mut self,
        alloc: &mut SlabAlloc,
        row: usize,
        old_target: usize,
        new_target: usize,
    ) {
        debug_assert_eq!(self.tree.get(alloc, row), encode(Some(old_target)));
        self.tree.set(alloc, row, encode(Some(new_target)));
    }

    /// Exchanges targets `t1` and `t2` in the forward slot, if it holds
    /// either.
    pub fn do_swap_link(&mut self, alloc: &mut SlabAlloc, row: usize, t1: usize, t2: usize) {
        let value = self.tree.get(alloc, row);
        if value == encode(Some(t1)) {
            self.tree.set(alloc, row, encode(Some(t2)));
        } else if value == encode(Some(t2)) {
            self.tree.set(alloc, row, encode(Some(t1)));
        }
    }

    pub fn insert_nulls(&mut self, alloc: &mut SlabAlloc, at: usize, n: usize) {
        for i in 0..n {
            self.tree.insert(alloc, at + i, 0);
        }
    }

    pub fn storage_erase(&mut self, alloc: &mut SlabAlloc, at: usize, n: usize) {
        for _ in 0..n {
            self.tree.erase(alloc, at);
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

    pub fn storage_clear(&mut self, alloc: &mut SlabAlloc) {
        self.tree.clear(alloc);
    }

    pub fn destroy(self, alloc: &mut SlabAlloc) {
        self.tree.destroy(alloc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_zero_on_the_wire() {
        let mut alloc = SlabAlloc::new();
        let mut col = LinkColumn::new(&mut alloc, 2, 0, 0, LinkStrength::Weak);
        assert!(col.is_null_link(&alloc, 0));
        assert_eq!(col.get_link(&alloc, 0), None);
        col.set_raw(&mut alloc, 0, Some(0));
        // Target 0 is stored as 1.
        assert_eq!(col.get_link(&alloc, 0), Some(0));
        assert!(!col.is_null_link(&alloc, 0));
        col.set_raw(&mut alloc, 0, None);
        assert!(col.is_null_link(&alloc, 0));
    }

    #[test]
    fn swap_link_handles_both_directions() {
        let mut alloc = SlabAlloc::new();
        let mut col = LinkColumn::new(&mut alloc, 3, 0, 0, LinkStrength::Weak);
        col.set_raw(&mut alloc, 0, Some(4));
        col.set_raw(&mut alloc, 1, Some(9));
        col.do_swap_link(&mut alloc, 0, 4, 9);
        col.do_swap_link(&mut alloc, 1, 4, 9);
        col.do_swap_link(&mut alloc, 2, 4, 9);
        assert_eq!(col.get_link(&alloc, 0), Some(9));
        assert_eq!(col.get_link(&alloc, 1), Some(4));
        assert_eq!(col.get_link(&alloc, 2), None);
    }
}
