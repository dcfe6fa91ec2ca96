//! Ordered multi-valued link column and its accessor object.
//!
//! Each slot in the column tree is either `0` (the degenerate, empty list)
//! or the root ref of a per-row integer sequence of target row indices.
//! External users hold reference-counted [`LinkList`] handles; the column's
//! registry keeps weak entries so lifetime always flows outward. A handle
//! whose row is removed is detached and every later operation on it fails
//! with [`TrellisError::DetachedAccessor`].

use std::cell::Cell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::alloc::{Ref, SlabAlloc};
use crate::cascade::CascadeState;
use crate::column::int_tree::IntTree;
use crate::column::registry::AccessorRegistry;
use crate::column::LinkStrength;
use crate::error::{Result, TrellisError};
use crate::group::Group;

pub struct LinkListColumn {
    tree: IntTree,
    /// Table the stored row indices point into.
    pub target_table: usize,
    /// Index of the reciprocal backlink column within the target table.
    pub backlink_col: usize,
    pub strength: LinkStrength,
    pub accessors: AccessorRegistry,
}

impl LinkListColumn {
    pub fn new(
        alloc: &mut SlabAlloc,
        rows: usize,
        target_table: usize,
        backlink_col: usize,
        strength: LinkStrength,
    ) -> LinkListColumn {
        let mut tree = IntTree::create(alloc);
        for _ in 0..rows {
            tree.push(alloc, 0);
        }
        LinkListColumn {
            tree,
            target_table,
            backlink_col,
            strength,
            accessors: AccessorRegistry::new(),
        }
    }

    pub fn size(&self, alloc: &SlabAlloc) -> usize {
        self.tree.size(alloc)
    }

    /// Root ref of the sequence at `row`; null for the degenerate list.
    pub fn get_as_ref(&self, alloc: &SlabAlloc, row: usize) -> Ref {
        Ref(self.tree.get(alloc, row))
    }

    pub fn set_row_ref(&mut self, alloc: &mut SlabAlloc, row: usize, r: Ref) {
        self.tree.set(alloc, row, r.0);
    }

    pub fn list_len(&self, alloc: &SlabAlloc, row: usize) -> usize {
        let r = self.get_as_ref(alloc, row);
        if r.is_null() {
            0
        } else {
            IntTree::from_ref(r).size(alloc)
        }
    }

    pub fn list_targets(&self, alloc: &SlabAlloc, row: usize) -> SmallVec<[usize; 8]> {
        let mut out = SmallVec::new();
        let r = self.get_as_ref(alloc, row);
        if !r.is_null() {
            IntTree::from_ref(r).for_each(alloc, |v| out.push(v as usize));
        }
        out
    }

    /// Frees the sequence at `row`, if any, leaving the slot null.
    pub fn destroy_row_list(&mut self, alloc: &mut SlabAlloc, row: usize) {
        let r = self.get_as_ref(alloc, row);
        if !r.is_null() {
            IntTree::from_ref(r).destroy(alloc);
            self.set_row_ref(alloc, row, Ref::NULL);
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

    /// Drops all slots; per-row sequences must already be gone.
    pub fn storage_clear(&mut self, alloc: &mut SlabAlloc) {
        self.tree.clear(alloc);
    }

    /// Frees every per-row sequence and the column tree itself.
    pub fn destroy(mut self, alloc: &mut SlabAlloc) {
        let rows = self.tree.size(alloc);
        for row in 0..rows {
            self.destroy_row_list(alloc, row);
        }
        self.tree.destroy(alloc);
    }
}

/// Long-lived handle to the link list of one origin row.
///
/// The handle stores only its identity; the sequence itself lives in the
/// column. Row motion patches the cached coordinates through the registry,
/// so a handle stays valid across arbitrary inserts, erases, moves and
/// swaps until its own row is removed.
pub struct LinkList {
    table: Cell<usize>,
    col: Cell<usize>,
    row: Cell<usize>,
    attached: Cell<bool>,
}

impl LinkList {
    pub(crate) fn new(table: usize, col: usize, row: usize) -> Rc<LinkList> {
        Rc::new(LinkList {
            table: Cell::new(table),
            col: Cell::new(col),
            row: Cell::new(row),
            attached: Cell::new(true),
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub fn origin_table(&self) -> usize {
        self.table.get()
    }

    pub fn origin_col(&self) -> usize {
        self.col.get()
    }

    pub fn origin_row(&self) -> usize {
        self.row.get()
    }

    pub(crate) fn set_origin_row(&self, row: usize) {
        self.row.set(row);
    }

    pub(crate) fn set_origin_table(&self, table: usize) {
        self.table.set(table);
    }

    pub(crate) fn set_origin_col(&self, col: usize) {
        self.col.set(col);
    }

    pub(crate) fn detach(&self) {
        self.attached.set(false);
    }

    pub fn len(&self, g: &Group) -> Result<usize> {
        g.list_len(self)
    }

    pub fn is_empty(&self, g: &Group) -> Result<bool> {
        Ok(self.len(g)? == 0)
    }

    pub fn get(&self, g: &Group, ndx: usize) -> Result<usize> {
        g.list_get(self, ndx)
    }

    pub fn find_first(&self, g: &Group, target: usize) -> Result<Option<usize>> {
        g.list_find_first(self, target)
    }

    pub fn targets(&self, g: &Group) -> Result<Vec<usize>> {
        g.list_targets(self)
    }

    /// Appends `target`, allocating the underlying sequence on first use.
    pub fn add(&self, g: &mut Group, target: usize) -> Result<()> {
        let len = self.len(g)?;
        g.list_insert(self, len, target)
    }

    pub fn insert(&self, g: &mut Group, ndx: usize, target: usize) -> Result<()> {
        g.list_insert(self, ndx, target)
    }

    /// Replaces position `ndx`, returning the old target. A strong column
    /// cascades from the old target if this released its last strong link.
    pub fn set(&self, g: &mut Group, ndx: usize, target: usize) -> Result<usize> {
        g.list_set(self, ndx, target)
    }

    /// Moves the entry at `from` to position `to`, rotating the entries in
    /// between.
    pub fn move_link(&self, g: &mut Group, from: usize, to: usize) -> Result<()> {
        g.list_move(self, from, to)
    }

    pub fn swap_links(&self, g: &mut Group, a: usize, b: usize) -> Result<()> {
        g.list_swap(self, a, b)
    }

    /// Erases position `ndx`, returning the old target.
    pub fn remove(&self, g: &mut Group, ndx: usize) -> Result<usize> {
        g.list_remove(self, ndx)
    }

    pub fn clear(&self, g: &mut Group) -> Result<()> {
        g.list_clear(self)
    }

    /// Removes the *target row* at position `ndx` from the target table;
    /// every link to it (including this one) disappears with the row.
    pub fn remove_target_row(&self, g: &mut Group, ndx: usize) -> Result<()> {
        g.list_remove_target_row(self, ndx)
    }

    pub fn remove_all_target_rows(&self, g: &mut Group) -> Result<()> {
        g.list_remove_all_target_rows(self)
    }
}

impl Group {
    /// Returns the link-list accessor for `(table, col, row)`, reusing the
    /// live handle if one exists.
    pub fn link_list(&mut self, table: usize, col: usize, row: usize) -> Rc<LinkList> {
        let size = self.tables[table].size();
        assert!(row < size, "row {row} out of range ({size})");
        self.tables[table]
            .list_col_mut(col)
            .accessors
            .get_or_create(row, || LinkList::new(table, col, row))
    }

    fn list_ctx(&self, list: &LinkList) -> Result<(usize, usize, usize)> {
        if !list.is_attached() {
            return Err(TrellisError::DetachedAccessor);
        }
        Ok((list.origin_table(), list.origin_col(), list.origin_row()))
    }

    pub(crate) fn list_len(&self, list: &LinkList) -> Result<usize> {
        let (t, c, row) = self.list_ctx(list)?;
        Ok(self.tables[t].list_col(c).list_len(&self.alloc, row))
    }

    pub(crate) fn list_get(&self, list: &LinkList, ndx: usize) -> Result<usize> {
        let (t, c, row) = self.list_ctx(list)?;
        let col = self.tables[t].list_col(c);
        let len = col.list_len(&self.alloc, row);
        if ndx >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: ndx, len });
        }
        let seq = IntTree::from_ref(col.get_as_ref(&self.alloc, row));
        Ok(seq.get(&self.alloc, ndx) as usize)
    }

    pub(crate) fn list_find_first(&self, list: &LinkList, target: usize) -> Result<Option<usize>> {
        let (t, c, row) = self.list_ctx(list)?;
        let col = self.tables[t].list_col(c);
        let r = col.get_as_ref(&self.alloc, row);
        if r.is_null() {
            return Ok(None);
        }
        Ok(IntTree::from_ref(r).find_first(&self.alloc, target as u64))
    }

    pub(crate) fn list_targets(&self, list: &LinkList) -> Result<Vec<usize>> {
        let (t, c, row) = self.list_ctx(list)?;
        Ok(self.tables[t]
            .list_col(c)
            .list_targets(&self.alloc, row)
            .into_vec())
    }

    pub(crate) fn list_insert(&mut self, list: &LinkList, ndx: usize, target: usize) -> Result<()> {
        let (t, c, row) = self.list_ctx(list)?;
        let (tt, bc, len) = {
            let col = self.tables[t].list_col(c);
            (
                col.target_table,
                col.backlink_col,
                col.list_len(&self.alloc, row),
            )
        };
        if ndx > len {
            return Err(TrellisError::LinkIndexOutOfRange { index: ndx, len });
        }
        let target_size = self.tables[tt].size();
        assert!(target < target_size, "target row {target} out of range ({target_size})");
        {
            let col = self.tables[t].list_col_mut(c);
            let r = col.get_as_ref(&self.alloc, row);
            let mut seq = if r.is_null() {
                IntTree::create(&mut self.alloc)
            } else {
                IntTree::from_ref(r)
            };
            seq.insert(&mut self.alloc, ndx, target as u64);
            col.set_row_ref(&mut self.alloc, row, seq.root_ref());
        }
        self.tables[tt]
            .backlink_col_mut(bc)
            .add_backlink(&mut self.alloc, target, row);
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.link_list_insert(t, c, row, ndx, target);
        }
        self.maybe_verify();
        Ok(())
    }

    pub(crate) fn list_set(&mut self, list: &LinkList, ndx: usize, target: usize) -> Result<usize> {
        let (t, c, row) = self.list_ctx(list)?;
        let (tt, bc, strength, len) = {
            let col = self.tables[t].list_col(c);
            (
                col.target_table,
                col.backlink_col,
                col.strength,
                col.list_len(&self.alloc, row),
            )
        };
        if ndx >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: ndx, len });
        }
        let target_size = self.tables[tt].size();
        assert!(target < target_size, "target row {target} out of range ({target_size})");
        let old = {
            let col = self.tables[t].list_col_mut(c);
            let mut seq = IntTree::from_ref(col.get_as_ref(&self.alloc, row));
            let old = seq.get(&self.alloc, ndx) as usize;
            seq.set(&mut self.alloc, ndx, target as u64);
            old
        };
        {
            let bl = self.tables[tt].backlink_col_mut(bc);
            bl.remove_one_backlink(&mut self.alloc, old, row);
            bl.add_backlink(&mut self.alloc, target, row);
        }
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.link_list_set(t, c, row, ndx, target);
        }
        if strength.is_strong() {
            self.cascade_on_strong_target_released(tt, old);
        }
        self.maybe_verify();
        Ok(old)
    }

    pub(crate) fn list_move(&mut self, list: &LinkList, from: usize, to: usize) -> Result<()> {
        let (t, c, row) = self.list_ctx(list)?;
        let len = self.tables[t].list_col(c).list_len(&self.alloc, row);
        if from >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: to, len });
        }
        if from == to {
            return Ok(());
        }
        {
            let col = self.tables[t].list_col_mut(c);
            let mut seq = IntTree::from_ref(col.get_as_ref(&self.alloc, row));
            let value = seq.get(&self.alloc, from);
            seq.erase(&mut self.alloc, from);
            seq.insert(&mut self.alloc, to, value);
            col.set_row_ref(&mut self.alloc, row, seq.root_ref());
        }
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.link_list_move(t, c, row, from, to);
        }
        self.maybe_verify();
        Ok(())
    }

    pub(crate) fn list_swap(&mut self, list: &LinkList, a: usize, b: usize) -> Result<()> {
        let (t, c, row) = self.list_ctx(list)?;
        let len = self.tables[t].list_col(c).list_len(&self.alloc, row);
        if a >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: a, len });
        }
        if b >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: b, len });
        }
        if a == b {
            return Ok(());
        }
        // Canonical order; downstream change logs rely on a single form.
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        {
            let col = self.tables[t].list_col_mut(c);
            let mut seq = IntTree::from_ref(col.get_as_ref(&self.alloc, row));
            let va = seq.get(&self.alloc, a);
            let vb = seq.get(&self.alloc, b);
            seq.set(&mut self.alloc, a, vb);
            seq.set(&mut self.alloc, b, va);
        }
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.link_list_swap(t, c, row, a, b);
        }
        self.maybe_verify();
        Ok(())
    }

    pub(crate) fn list_remove(&mut self, list: &LinkList, ndx: usize) -> Result<usize> {
        let (t, c, row) = self.list_ctx(list)?;
        let (tt, bc, strength, len) = {
            let col = self.tables[t].list_col(c);
            (
                col.target_table,
                col.backlink_col,
                col.strength,
                col.list_len(&self.alloc, row),
            )
        };
        if ndx >= len {
            return Err(TrellisError::LinkIndexOutOfRange { index: ndx, len });
        }
        let old = {
            let col = self.tables[t].list_col_mut(c);
            let mut seq = IntTree::from_ref(col.get_as_ref(&self.alloc, row));
            let old = seq.get(&self.alloc, ndx) as usize;
            seq.erase(&mut self.alloc, ndx);
            if seq.is_empty(&self.alloc) {
                // Last entry gone; the list reverts to its degenerate state.
                seq.destroy(&mut self.alloc);
                col.set_row_ref(&mut self.alloc, row, Ref::NULL);
            } else {
                col.set_row_ref(&mut self.alloc, row, seq.root_ref());
            }
            old
        };
        self.tables[tt]
            .backlink_col_mut(bc)
            .remove_one_backlink(&mut self.alloc, old, row);
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.link_list_erase(t, c, row, ndx);
        }
        if strength.is_strong() {
            self.cascade_on_strong_target_released(tt, old);
        }
        self.maybe_verify();
        Ok(old)
    }

    pub(crate) fn list_clear(&mut self, list: &LinkList) -> Result<()> {
        let (t, c, row) = self.list_ctx(list)?;
        let (tt, bc, strength) = {
            let col = self.tables[t].list_col(c);
            (col.target_table, col.backlink_col, col.strength)
        };
        let targets = {
            let col = self.tables[t].list_col(c);
            if col.get_as_ref(&self.alloc, row).is_null() {
                return Ok(());
            }
            col.list_targets(&self.alloc, row)
        };

        if !strength.is_strong() {
            for &target in &targets {
                self.tables[tt]
                    .backlink_col_mut(bc)
                    .remove_one_backlink(&mut self.alloc, target, row);
            }
            self.tables[t]
                .list_col_mut(c)
                .destroy_row_list(&mut self.alloc, row);
            if let Some(repl) = self.repl.as_deref_mut() {
                repl.link_list_clear(t, c, row);
            }
            self.maybe_verify();
            return Ok(());
        }

        // One aggregate cascade state covers the whole clear; the cleared
        // cell itself is excluded from traversal.
        let mut state = CascadeState::new();
        state.track_link_nullifications = self.cascade_handler.is_some();
        state.stop_on_link_list = Some((t, c, row));
        for &target in &targets {
            self.tables[tt]
                .backlink_col_mut(bc)
                .remove_one_backlink(&mut self.alloc, target, row);
            if self.num_strong_backlinks(tt, target) > 0 {
                continue;
            }
            let fresh = state.insert_row(tt, target);
            debug_assert!(fresh, "target scheduled twice during clear");
            self.cascade_break_backlinks_to(tt, target, &mut state);
        }
        self.tables[t]
            .list_col_mut(c)
            .destroy_row_list(&mut self.alloc, row);
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.link_list_clear(t, c, row);
        }
        self.notify_cascade(&state);
        self.remove_backlink_broken_rows(&state);
        self.maybe_verify();
        Ok(())
    }

    pub(crate) fn list_remove_target_row(&mut self, list: &LinkList, ndx: usize) -> Result<()> {
        let target = self.list_get(list, ndx)?;
        let tt = {
            let (t, c, _) = self.list_ctx(list)?;
            self.tables[t].list_col(c).target_table
        };
        // Removing the target row drops every link to it, including ours.
        self.move_last_over(tt, target);
        Ok(())
    }

    pub(crate) fn list_remove_all_target_rows(&mut self, list: &LinkList) -> Result<()> {
        self.list_ctx(list)?;
        loop {
            if !list.is_attached() {
                // The origin row itself went away through a cascade.
                break;
            }
            let len = self.list_len(list)?;
            if len == 0 {
                break;
            }
            let target = self.list_get(list, len - 1)?;
            let tt = {
                let (t, c, _) = self.list_ctx(list)?;
                self.tables[t].list_col(c).target_table
            };
            self.move_last_over(tt, target);
        }
        Ok(())
    }
}
