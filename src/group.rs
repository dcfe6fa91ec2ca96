//! The group: a set of tables sharing one slab, plus the orchestration of
//! every cross-column effect — backlink maintenance, row-motion
//! propagation, cascades, replication events and accessor bookkeeping.
//!
//! The group is single-threaded; mutating operations are synchronous and
//! complete before returning. Link-list cells are mutated through the
//! handles returned by [`Group::link_list`].

use smallvec::SmallVec;
use std::collections::BTreeSet;
use tracing::debug;

use crate::alloc::SlabAlloc;
use crate::cascade::{CascadeNotification, CascadeState};
use crate::column::int_tree::IntTree;
use crate::column::{BacklinkColumn, Column, LinkColumn, LinkListColumn, LinkStrength};
use crate::error::{Result, TrellisError};
use crate::repl::Replication;
use crate::table::Table;

/// Construction options for a [`Group`].
#[derive(Clone, Debug)]
pub struct GroupOptions {
    /// Slots to pre-reserve in the slab allocator.
    pub slab_capacity: usize,
    /// Run the full reciprocity check after every public mutation. Costly;
    /// meant for tests and debugging sessions.
    pub verify_after_mutation: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            slab_capacity: 0,
            verify_after_mutation: false,
        }
    }
}

impl GroupOptions {
    pub fn slab_capacity(mut self, slots: usize) -> Self {
        self.slab_capacity = slots;
        self
    }

    pub fn verify_after_mutation(mut self, on: bool) -> Self {
        self.verify_after_mutation = on;
        self
    }
}

/// Copyable per-column metadata snapshot, taken before mutations so borrow
/// scopes stay short.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ColMeta {
    Link {
        target_table: usize,
        backlink_col: usize,
        strong: bool,
    },
    List {
        target_table: usize,
        backlink_col: usize,
        strong: bool,
    },
    Backlink {
        origin_table: usize,
        origin_col: usize,
    },
}

pub struct Group {
    pub(crate) tables: Vec<Table>,
    pub(crate) alloc: SlabAlloc,
    pub(crate) repl: Option<Box<dyn Replication>>,
    pub(crate) cascade_handler: Option<Box<dyn FnMut(&CascadeNotification)>>,
    verify_on_mutate: bool,
}

impl Group {
    pub fn new() -> Group {
        Group::with_options(GroupOptions::default())
    }

    pub fn with_options(options: GroupOptions) -> Group {
        Group {
            tables: Vec::new(),
            alloc: SlabAlloc::with_capacity(options.slab_capacity),
            repl: None,
            cascade_handler: None,
            verify_on_mutate: options.verify_after_mutation,
        }
    }

    /// Installs the replication consumer for observable link operations.
    pub fn set_replication(&mut self, repl: Box<dyn Replication>) {
        self.repl = Some(repl);
    }

    /// Installs the cascade notification callback. While installed, cascade
    /// states also track weak-link nullifications.
    pub fn set_cascade_handler<F: FnMut(&CascadeNotification) + 'static>(&mut self, handler: F) {
        self.cascade_handler = Some(Box::new(handler));
    }

    pub fn clear_cascade_handler(&mut self) {
        self.cascade_handler = None;
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, t: usize) -> &Table {
        &self.tables[t]
    }

    pub fn table_size(&self, t: usize) -> usize {
        self.tables[t].size()
    }

    pub fn add_table(&mut self) -> usize {
        self.tables.push(Table::new());
        self.tables.len() - 1
    }

    pub(crate) fn col_meta(&self, t: usize, c: usize) -> ColMeta {
        match &self.tables[t].cols[c] {
            Column::Link(col) => ColMeta::Link {
                target_table: col.target_table,
                backlink_col: col.backlink_col,
                strong: col.strength.is_strong(),
            },
            Column::List(col) => ColMeta::List {
                target_table: col.target_table,
                backlink_col: col.backlink_col,
                strong: col.strength.is_strong(),
            },
            Column::Backlink(col) => ColMeta::Backlink {
                origin_table: col.origin_table,
                origin_col: col.origin_col,
            },
        }
    }

    pub(crate) fn maybe_verify(&self) {
        if self.verify_on_mutate {
            self.verify();
        }
    }

    // ---- schema ---------------------------------------------------------

    /// Adds a single-valued link column to `origin` pointing into `target`,
    /// together with its reciprocal backlink column. Returns the new
    /// column's index.
    pub fn add_link_column(
        &mut self,
        origin: usize,
        target: usize,
        strength: LinkStrength,
    ) -> usize {
        let origin_rows = self.tables[origin].size();
        let target_rows = self.tables[target].size();
        let col_ndx = self.tables[origin].cols.len();
        let bl_ndx = if origin == target {
            col_ndx + 1
        } else {
            self.tables[target].cols.len()
        };
        let link = LinkColumn::new(&mut self.alloc, origin_rows, target, bl_ndx, strength);
        self.tables[origin].cols.push(Column::Link(link));
        let bl = BacklinkColumn::new(&mut self.alloc, target_rows, origin, col_ndx);
        self.tables[target].cols.push(Column::Backlink(bl));
        col_ndx
    }

    /// Adds an ordered multi-valued link column; otherwise as
    /// [`Group::add_link_column`].
    pub fn add_link_list_column(
        &mut self,
        origin: usize,
        target: usize,
        strength: LinkStrength,
    ) -> usize {
        let origin_rows = self.tables[origin].size();
        let target_rows = self.tables[target].size();
        let col_ndx = self.tables[origin].cols.len();
        let bl_ndx = if origin == target {
            col_ndx + 1
        } else {
            self.tables[target].cols.len()
        };
        let list = LinkListColumn::new(&mut self.alloc, origin_rows, target, bl_ndx, strength);
        self.tables[origin].cols.push(Column::List(list));
        let bl = BacklinkColumn::new(&mut self.alloc, target_rows, origin, col_ndx);
        self.tables[target].cols.push(Column::Backlink(bl));
        col_ndx
    }

    /// Removes table `t`. Fails with [`TrellisError::CrossTableLinkTarget`]
    /// while another table still has link columns into it; links *from* `t`
    /// are broken first, cascading into other tables where strong links
    /// demand it.
    pub fn remove_table(&mut self, t: usize) -> Result<()> {
        for col in &self.tables[t].cols {
            if let Column::Backlink(bl) = col {
                if bl.origin_table != t {
                    return Err(TrellisError::CrossTableLinkTarget {
                        target_table: t,
                        origin_table: bl.origin_table,
                        origin_col: bl.origin_col,
                    });
                }
            }
        }
        debug!(table = t, "group.remove_table");

        let mut state = CascadeState::new();
        state.stop_on_table = Some(t);
        state.track_link_nullifications = self.cascade_handler.is_some();
        self.cascade_break_backlinks_to_all_rows(t, &mut state);
        self.notify_cascade(&state);
        self.remove_backlink_broken_rows(&state);

        // Reciprocal backlink columns living in other tables go away with
        // their origin column.
        let mut reciprocal: Vec<(usize, usize)> = Vec::new();
        for col in &self.tables[t].cols {
            match col {
                Column::Link(l) if l.target_table != t => {
                    reciprocal.push((l.target_table, l.backlink_col));
                }
                Column::List(l) if l.target_table != t => {
                    reciprocal.push((l.target_table, l.backlink_col));
                }
                _ => {}
            }
        }

        // Tear down the table's own storage, detaching live accessors.
        let mut destroyed: Vec<(usize, usize, usize)> = Vec::new();
        let cols = std::mem::take(&mut self.tables[t].cols);
        for (c, col) in cols.into_iter().enumerate() {
            match col {
                Column::Link(l) => l.destroy(&mut self.alloc),
                Column::List(mut l) => {
                    for list in l.accessors.clear_root_table() {
                        destroyed.push((t, c, list.origin_row()));
                    }
                    l.destroy(&mut self.alloc);
                }
                Column::Backlink(b) => b.destroy(&mut self.alloc),
            }
        }
        self.tables[t].size = 0;

        // Remove reciprocal columns, highest index first per table so the
        // recorded indices stay valid, fixing every reference into the
        // shifted column space.
        reciprocal.sort_by(|a, b| b.cmp(a));
        for (tt, bc) in reciprocal {
            let removed = self.tables[tt].cols.remove(bc);
            if let Column::Backlink(b) = removed {
                b.destroy(&mut self.alloc);
            }
            self.fix_col_indices_after_removal(tt, bc);
        }

        self.tables.remove(t);
        self.fix_table_indices_after_removal(t);

        if let Some(repl) = self.repl.as_deref_mut() {
            for (et, ec, erow) in destroyed {
                repl.on_link_list_destroyed(et, ec, erow);
            }
        }
        self.maybe_verify();
        Ok(())
    }

    fn fix_col_indices_after_removal(&mut self, table: usize, removed_col: usize) {
        for t in &mut self.tables {
            for col in &mut t.cols {
                match col {
                    Column::Link(l) if l.target_table == table && l.backlink_col > removed_col => {
                        l.backlink_col -= 1;
                    }
                    Column::List(l) if l.target_table == table && l.backlink_col > removed_col => {
                        l.backlink_col -= 1;
                    }
                    Column::Backlink(b)
                        if b.origin_table == table && b.origin_col > removed_col =>
                    {
                        b.origin_col -= 1;
                    }
                    _ => {}
                }
            }
        }
        // Live handles cache their column index too.
        for (c, col) in self.tables[table].cols.iter().enumerate() {
            if c < removed_col {
                continue;
            }
            if let Column::List(l) = col {
                for (_, list) in l.accessors.live_accessors() {
                    list.set_origin_col(c);
                }
            }
        }
    }

    fn fix_table_indices_after_removal(&mut self, removed_table: usize) {
        for t in &mut self.tables {
            for col in &mut t.cols {
                match col {
                    Column::Link(l) if l.target_table > removed_table => l.target_table -= 1,
                    Column::List(l) if l.target_table > removed_table => l.target_table -= 1,
                    Column::Backlink(b) if b.origin_table > removed_table => b.origin_table -= 1,
                    _ => {}
                }
            }
        }
        for (t, table) in self.tables.iter().enumerate().skip(removed_table) {
            for col in &table.cols {
                if let Column::List(l) = col {
                    for (_, list) in l.accessors.live_accessors() {
                        list.set_origin_table(t);
                    }
                }
            }
        }
    }

    // ---- row motion -----------------------------------------------------

    /// Appends `n` empty rows.
    pub fn add_rows(&mut self, t: usize, n: usize) {
        let size = self.tables[t].size();
        self.insert_rows(t, size, n);
    }

    /// Inserts `n` empty rows at `at`. Link-target tables only accept
    /// appends: a mid-table insert would shift target indices underneath
    /// every incoming link in the group.
    pub fn insert_rows(&mut self, t: usize, at: usize, n: usize) {
        let size = self.tables[t].size();
        assert!(at <= size, "insert position {at} out of range ({size})");
        assert!(
            at == size || !self.tables[t].is_link_target(),
            "rows can only be appended to a link target table"
        );
        if n == 0 {
            return;
        }
        let ncols = self.tables[t].cols.len();
        for c in 0..ncols {
            match self.col_meta(t, c) {
                ColMeta::Link {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    // Shifted origin rows re-home their backlinks, highest
                    // first so updated entries never collide with pending
                    // lookups.
                    for r in (at..size).rev() {
                        if let Some(target) =
                            self.tables[t].link_col(c).get_link(&self.alloc, r)
                        {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .update_backlink(&mut self.alloc, target, r, r + n);
                        }
                    }
                    self.tables[t].link_col_mut(c).insert_nulls(&mut self.alloc, at, n);
                }
                ColMeta::List {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    for r in (at..size).rev() {
                        let targets = self.tables[t].list_col(c).list_targets(&self.alloc, r);
                        for target in targets {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .update_backlink(&mut self.alloc, target, r, r + n);
                        }
                    }
                    self.tables[t].list_col_mut(c).insert_nulls(&mut self.alloc, at, n);
                    self.tables[t]
                        .list_col_mut(c)
                        .accessors
                        .adj_insert_rows(at, n, true);
                }
                ColMeta::Backlink { .. } => {
                    self.tables[t]
                        .backlink_col_mut(c)
                        .insert_empty(&mut self.alloc, at, n);
                }
            }
        }
        self.tables[t].size += n;
        self.maybe_verify();
    }

    /// Erases the contiguous row range `[at, at + n)` with full
    /// renumbering. Only valid on tables no link points into; row removal
    /// on link targets goes through [`Group::move_last_over`].
    pub fn erase_rows(&mut self, t: usize, at: usize, n: usize) {
        let size = self.tables[t].size();
        assert!(at + n <= size, "erase range {at}..{} out of range ({size})", at + n);
        assert!(
            !self.tables[t].is_link_target(),
            "erase_rows on a link target table; use move_last_over"
        );
        if n == 0 {
            return;
        }
        let mut state = CascadeState::new();
        state.track_link_nullifications = self.cascade_handler.is_some();
        for r in at..at + n {
            self.cascade_break_backlinks_to(t, r, &mut state);
        }
        self.notify_cascade(&state);

        let mut destroyed: Vec<(usize, usize, usize)> = Vec::new();
        let ncols = self.tables[t].cols.len();
        for c in 0..ncols {
            match self.col_meta(t, c) {
                ColMeta::Link {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    for r in at + n..size {
                        if let Some(target) =
                            self.tables[t].link_col(c).get_link(&self.alloc, r)
                        {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .update_backlink(&mut self.alloc, target, r, r - n);
                        }
                    }
                    self.tables[t].link_col_mut(c).storage_erase(&mut self.alloc, at, n);
                }
                ColMeta::List {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    for r in at..at + n {
                        // Backlinks of the erased rows were broken during
                        // traversal; only the sequences remain.
                        self.tables[t]
                            .list_col_mut(c)
                            .destroy_row_list(&mut self.alloc, r);
                    }
                    for r in at + n..size {
                        let targets = self.tables[t].list_col(c).list_targets(&self.alloc, r);
                        for target in targets {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .update_backlink(&mut self.alloc, target, r, r - n);
                        }
                    }
                    self.tables[t].list_col_mut(c).storage_erase(&mut self.alloc, at, n);
                    for list in self.tables[t]
                        .list_col_mut(c)
                        .accessors
                        .adj_erase_rows(at, n, true)
                    {
                        destroyed.push((t, c, list.origin_row()));
                    }
                }
                ColMeta::Backlink { .. } => {
                    unreachable!("link target tables cannot reach erase_rows")
                }
            }
        }
        self.tables[t].size -= n;
        if let Some(repl) = self.repl.as_deref_mut() {
            for (et, ec, erow) in destroyed {
                repl.on_link_list_destroyed(et, ec, erow);
            }
        }
        self.remove_backlink_broken_rows(&state);
        self.maybe_verify();
    }

    /// Erases one row. On link-target tables this is converted to
    /// [`Group::move_last_over`], the primary removal primitive.
    pub fn erase_row(&mut self, t: usize, row: usize) {
        if self.tables[t].is_link_target() {
            self.move_last_over(t, row);
        } else {
            self.erase_rows(t, row, 1);
        }
    }

    /// Removes `row` by moving the last row into its slot. Strong links out
    /// of the row may cascade further removals; weak links into it are
    /// nullified.
    pub fn move_last_over(&mut self, t: usize, row: usize) {
        self.remove_row_with_policy(t, row, true);
    }

    /// Removes `row` and, transitively, every row it links to that is left
    /// without strong backlinks — weak links contribute to the traversal
    /// too.
    pub fn remove_recursive(&mut self, t: usize, row: usize) {
        self.remove_row_with_policy(t, row, false);
    }

    fn remove_row_with_policy(&mut self, t: usize, row: usize, only_strong_links: bool) {
        let size = self.tables[t].size();
        assert!(row < size, "row {row} out of range ({size})");
        debug!(table = t, row, only_strong_links, "group.remove_row");
        let mut state = CascadeState::new();
        state.only_strong_links = only_strong_links;
        state.track_link_nullifications = self.cascade_handler.is_some();
        // The initiating row rides the cascade machinery only when incoming
        // links can exist; a pure origin table is removed from directly.
        let seeded = self.tables[t].is_link_target();
        if seeded {
            state.insert_row(t, row);
        }
        self.cascade_break_backlinks_to(t, row, &mut state);
        self.notify_cascade(&state);
        self.remove_backlink_broken_rows(&state);
        if !seeded {
            self.do_move_last_over(t, row, true);
        }
        self.maybe_verify();
    }

    /// Column-level move-last-over, shared by the public path and the
    /// cascade applier. `broken_reciprocal` means the removed row's own
    /// backlink contributions are already gone and must not be touched.
    pub(crate) fn do_move_last_over(&mut self, t: usize, row: usize, broken_reciprocal: bool) {
        let prior = self.tables[t].size();
        let last = prior - 1;
        let ncols = self.tables[t].cols.len();
        let mut destroyed: SmallVec<[(usize, usize, usize); 2]> = SmallVec::new();

        // Forward columns first: break or carry their own contributions.
        for c in 0..ncols {
            match self.col_meta(t, c) {
                ColMeta::Link {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    if !broken_reciprocal {
                        if let Some(target) =
                            self.tables[t].link_col(c).get_link(&self.alloc, row)
                        {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .remove_one_backlink(&mut self.alloc, target, row);
                        }
                    }
                    if row != last {
                        if let Some(target) =
                            self.tables[t].link_col(c).get_link(&self.alloc, last)
                        {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .update_backlink(&mut self.alloc, target, last, row);
                        }
                    }
                    self.tables[t]
                        .link_col_mut(c)
                        .storage_move_last_over(&mut self.alloc, row);
                }
                ColMeta::List {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    if !self.tables[t].list_col(c).get_as_ref(&self.alloc, row).is_null() {
                        if !broken_reciprocal {
                            let targets =
                                self.tables[t].list_col(c).list_targets(&self.alloc, row);
                            for target in targets {
                                self.tables[target_table]
                                    .backlink_col_mut(backlink_col)
                                    .remove_one_backlink(&mut self.alloc, target, row);
                            }
                        }
                        self.tables[t]
                            .list_col_mut(c)
                            .destroy_row_list(&mut self.alloc, row);
                    }
                    if row != last {
                        let targets = self.tables[t].list_col(c).list_targets(&self.alloc, last);
                        for target in targets {
                            self.tables[target_table]
                                .backlink_col_mut(backlink_col)
                                .update_backlink(&mut self.alloc, target, last, row);
                        }
                    }
                    self.tables[t]
                        .list_col_mut(c)
                        .storage_move_last_over(&mut self.alloc, row);
                    if let Some(list) = self.tables[t]
                        .list_col_mut(c)
                        .accessors
                        .adj_move_over(last, row, true)
                    {
                        destroyed.push((t, c, list.origin_row()));
                    }
                }
                ColMeta::Backlink { .. } => {}
            }
        }

        // Backlink columns second: nullify what still points at the removed
        // row, retarget what points at the moved row.
        for c in 0..ncols {
            if let ColMeta::Backlink {
                origin_table,
                origin_col,
            } = self.col_meta(t, c)
            {
                let origins = self.tables[t].backlink_col(c).collect_links(&self.alloc, row);
                self.tables[t]
                    .backlink_col_mut(c)
                    .destroy_links(&mut self.alloc, row);
                for origin in origins {
                    self.do_nullify_forward_link(origin_table, origin_col, origin, row);
                }
                if row != last {
                    let movers = self.tables[t].backlink_col(c).collect_links(&self.alloc, last);
                    for origin in movers {
                        self.do_update_forward_link(origin_table, origin_col, origin, last, row);
                    }
                }
                self.tables[t]
                    .backlink_col_mut(c)
                    .storage_move_last_over(&mut self.alloc, row);
            }
        }

        self.tables[t].size -= 1;
        if let Some(repl) = self.repl.as_deref_mut() {
            for (et, ec, erow) in destroyed {
                repl.on_link_list_destroyed(et, ec, erow);
            }
        }
    }

    /// Exchanges rows `a` and `b`, rewriting every forward link and
    /// backlink that references either.
    pub fn swap_rows(&mut self, t: usize, a: usize, b: usize) {
        let size = self.tables[t].size();
        assert!(a < size && b < size, "swap rows {a},{b} out of range ({size})");
        if a == b {
            return;
        }
        let ncols = self.tables[t].cols.len();

        // Forward columns: each distinct target sees exactly one backlink
        // swap, otherwise a list holding both rows would swap twice and
        // cancel out.
        for c in 0..ncols {
            match self.col_meta(t, c) {
                ColMeta::Link {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    let mut targets: SmallVec<[usize; 2]> = SmallVec::new();
                    for row in [a, b] {
                        if let Some(target) =
                            self.tables[t].link_col(c).get_link(&self.alloc, row)
                        {
                            if !targets.contains(&target) {
                                targets.push(target);
                            }
                        }
                    }
                    for target in targets {
                        self.tables[target_table]
                            .backlink_col_mut(backlink_col)
                            .swap_backlinks(&mut self.alloc, target, a, b);
                    }
                    self.tables[t].link_col_mut(c).storage_swap(&mut self.alloc, a, b);
                }
                ColMeta::List {
                    target_table,
                    backlink_col,
                    ..
                } => {
                    let mut targets: BTreeSet<usize> = BTreeSet::new();
                    for row in [a, b] {
                        for target in self.tables[t].list_col(c).list_targets(&self.alloc, row) {
                            targets.insert(target);
                        }
                    }
                    for target in targets {
                        self.tables[target_table]
                            .backlink_col_mut(backlink_col)
                            .swap_backlinks(&mut self.alloc, target, a, b);
                    }
                    self.tables[t].list_col_mut(c).storage_swap(&mut self.alloc, a, b);
                    self.tables[t].list_col_mut(c).accessors.adj_swap(a, b, true);
                }
                ColMeta::Backlink { .. } => {}
            }
        }

        // Backlink columns: incoming forward links retarget, once per
        // distinct origin.
        for c in 0..ncols {
            if let ColMeta::Backlink {
                origin_table,
                origin_col,
            } = self.col_meta(t, c)
            {
                let mut origins: BTreeSet<usize> = BTreeSet::new();
                for row in [a, b] {
                    for origin in self.tables[t].backlink_col(c).collect_links(&self.alloc, row) {
                        origins.insert(origin);
                    }
                }
                for origin in origins {
                    self.do_swap_forward_link(origin_table, origin_col, origin, a, b);
                }
                self.tables[t].backlink_col_mut(c).storage_swap(&mut self.alloc, a, b);
            }
        }
        self.maybe_verify();
    }

    /// Removes every row of `t`, breaking all reciprocal links and
    /// cascading into other tables where strong links demand it.
    pub fn clear_table(&mut self, t: usize) {
        debug!(table = t, size = self.tables[t].size(), "group.clear_table");
        let size = self.tables[t].size();
        let mut state = CascadeState::new();
        state.stop_on_table = Some(t);
        state.track_link_nullifications = self.cascade_handler.is_some();
        self.cascade_break_backlinks_to_all_rows(t, &mut state);
        self.notify_cascade(&state);
        self.remove_backlink_broken_rows(&state);

        let mut destroyed: Vec<(usize, usize, usize)> = Vec::new();
        let ncols = self.tables[t].cols.len();
        for c in 0..ncols {
            match self.col_meta(t, c) {
                ColMeta::Link { .. } => {
                    self.tables[t].link_col_mut(c).storage_clear(&mut self.alloc);
                }
                ColMeta::List { .. } => {
                    for row in 0..size {
                        self.tables[t]
                            .list_col_mut(c)
                            .destroy_row_list(&mut self.alloc, row);
                    }
                    self.tables[t].list_col_mut(c).storage_clear(&mut self.alloc);
                    for list in self.tables[t].list_col_mut(c).accessors.clear_root_table() {
                        destroyed.push((t, c, list.origin_row()));
                    }
                }
                ColMeta::Backlink {
                    origin_table,
                    origin_col,
                } => {
                    // Self-fed multisets were wiped during traversal; what
                    // remains are incoming links from other tables.
                    for row in 0..size {
                        let origins =
                            self.tables[t].backlink_col(c).collect_links(&self.alloc, row);
                        self.tables[t]
                            .backlink_col_mut(c)
                            .destroy_links(&mut self.alloc, row);
                        for origin in origins {
                            self.do_nullify_forward_link(origin_table, origin_col, origin, row);
                        }
                    }
                    self.tables[t]
                        .backlink_col_mut(c)
                        .storage_clear(&mut self.alloc);
                }
            }
        }
        self.tables[t].size = 0;
        if let Some(repl) = self.repl.as_deref_mut() {
            for (et, ec, erow) in destroyed {
                repl.on_link_list_destroyed(et, ec, erow);
            }
        }
        self.maybe_verify();
    }

    // ---- link column API ------------------------------------------------

    pub fn get_link(&self, t: usize, c: usize, row: usize) -> Option<usize> {
        self.tables[t].link_col(c).get_link(&self.alloc, row)
    }

    pub fn is_null_link(&self, t: usize, c: usize, row: usize) -> bool {
        self.tables[t].link_col(c).is_null_link(&self.alloc, row)
    }

    /// Sets the link at `(t, c, row)`, returning the old target. On a
    /// strong column, releasing the last strong link into the old target
    /// cascades from it.
    pub fn set_link(
        &mut self,
        t: usize,
        c: usize,
        row: usize,
        new_target: Option<usize>,
    ) -> Option<usize> {
        let ColMeta::Link {
            target_table,
            backlink_col,
            strong,
        } = self.col_meta(t, c)
        else {
            panic!("column {c} is not a link column");
        };
        let size = self.tables[t].size();
        assert!(row < size, "row {row} out of range ({size})");
        if let Some(nt) = new_target {
            let target_size = self.tables[target_table].size();
            assert!(nt < target_size, "target row {nt} out of range ({target_size})");
        }
        let old = self.tables[t].link_col(c).get_link(&self.alloc, row);
        if let Some(o) = old {
            self.tables[target_table]
                .backlink_col_mut(backlink_col)
                .remove_one_backlink(&mut self.alloc, o, row);
        }
        self.tables[t].link_col_mut(c).set_raw(&mut self.alloc, row, new_target);
        if let Some(nt) = new_target {
            self.tables[target_table]
                .backlink_col_mut(backlink_col)
                .add_backlink(&mut self.alloc, nt, row);
        }
        if let Some(repl) = self.repl.as_deref_mut() {
            repl.set_link(t, c, row, new_target);
        }
        if strong {
            if let Some(o) = old {
                self.cascade_on_strong_target_released(target_table, o);
            }
        }
        self.maybe_verify();
        old
    }

    /// Shorthand for `set_link(.., None)`.
    pub fn nullify_link(&mut self, t: usize, c: usize, row: usize) -> Option<usize> {
        self.set_link(t, c, row, None)
    }

    // ---- backlink reads -------------------------------------------------

    /// Total number of links into `(t, row)` across all origin columns.
    pub fn backlink_count(&self, t: usize, row: usize) -> usize {
        self.tables[t]
            .cols
            .iter()
            .filter_map(|col| match col {
                Column::Backlink(bl) => Some(bl.get_backlink_count(&self.alloc, row)),
                _ => None,
            })
            .sum()
    }

    /// Origin rows in `(origin_table, origin_col)` linking to `(t, row)`.
    pub fn backlinks_from(
        &self,
        t: usize,
        row: usize,
        origin_table: usize,
        origin_col: usize,
    ) -> Vec<usize> {
        for col in &self.tables[t].cols {
            if let Column::Backlink(bl) = col {
                if bl.origin_table == origin_table && bl.origin_col == origin_col {
                    return bl.collect_links(&self.alloc, row).into_vec();
                }
            }
        }
        panic!("no backlink column for origin ({origin_table}, {origin_col}) in table {t}");
    }

    // ---- forward-link primitives used by row motion and cascades --------

    pub(crate) fn do_nullify_forward_link(
        &mut self,
        origin_table: usize,
        origin_col: usize,
        origin_row: usize,
        old_target: usize,
    ) {
        match self.col_meta(origin_table, origin_col) {
            ColMeta::Link { .. } => {
                self.tables[origin_table]
                    .link_col_mut(origin_col)
                    .do_nullify_link(&mut self.alloc, origin_row, old_target);
                if let Some(repl) = self.repl.as_deref_mut() {
                    repl.set_link(origin_table, origin_col, origin_row, None);
                }
            }
            ColMeta::List { .. } => {
                let pos = {
                    let col = self.tables[origin_table].list_col_mut(origin_col);
                    let mut seq = IntTree::from_ref(col.get_as_ref(&self.alloc, origin_row));
                    let pos = seq
                        .find_first(&self.alloc, old_target as u64)
                        .unwrap_or_else(|| {
                            panic!(
                                "no link to row {old_target} in list at row {origin_row}"
                            )
                        });
                    seq.erase(&mut self.alloc, pos);
                    if seq.is_empty(&self.alloc) {
                        seq.destroy(&mut self.alloc);
                        col.set_row_ref(&mut self.alloc, origin_row, crate::alloc::Ref::NULL);
                    } else {
                        col.set_row_ref(&mut self.alloc, origin_row, seq.root_ref());
                    }
                    pos
                };
                if let Some(repl) = self.repl.as_deref_mut() {
                    repl.link_list_nullify(origin_table, origin_col, origin_row, pos);
                }
            }
            ColMeta::Backlink { .. } => unreachable!("backlink column as link origin"),
        }
    }

    pub(crate) fn do_update_forward_link(
        &mut self,
        origin_table: usize,
        origin_col: usize,
        origin_row: usize,
        old_target: usize,
        new_target: usize,
    ) {
        match self.col_meta(origin_table, origin_col) {
            ColMeta::Link { .. } => {
                self.tables[origin_table].link_col_mut(origin_col).do_update_link(
                    &mut self.alloc,
                    origin_row,
                    old_target,
                    new_target,
                );
            }
            ColMeta::List { .. } => {
                let col = self.tables[origin_table].list_col_mut(origin_col);
                let mut seq = IntTree::from_ref(col.get_as_ref(&self.alloc, origin_row));
                let pos = seq
                    .find_first(&self.alloc, old_target as u64)
                    .unwrap_or_else(|| {
                        panic!("no link to row {old_target} in list at row {origin_row}")
                    });
                seq.set(&mut self.alloc, pos, new_target as u64);
            }
            ColMeta::Backlink { .. } => unreachable!("backlink column as link origin"),
        }
    }

    pub(crate) fn do_swap_forward_link(
        &mut self,
        origin_table: usize,
        origin_col: usize,
        origin_row: usize,
        t1: usize,
        t2: usize,
    ) {
        match self.col_meta(origin_table, origin_col) {
            ColMeta::Link { .. } => {
                self.tables[origin_table].link_col_mut(origin_col).do_swap_link(
                    &mut self.alloc,
                    origin_row,
                    t1,
                    t2,
                );
            }
            ColMeta::List { .. } => {
                let col = self.tables[origin_table].list_col_mut(origin_col);
                let r = col.get_as_ref(&self.alloc, origin_row);
                if r.is_null() {
                    return;
                }
                let mut seq = IntTree::from_ref(r);
                let n = seq.size(&self.alloc);
                for i in 0..n {
                    let v = seq.get(&self.alloc, i) as usize;
                    if v == t1 {
                        seq.set(&mut self.alloc, i, t2 as u64);
                    } else if v == t2 {
                        seq.set(&mut self.alloc, i, t1 as u64);
                    }
                }
            }
            ColMeta::Backlink { .. } => unreachable!("backlink column as link origin"),
        }
    }

    // ---- verification ---------------------------------------------------

    /// Full structural check: every forward link matches exactly one
    /// backlink entry and vice versa, column sizes track table sizes, and
    /// live accessors agree with their registry. Panics on violation.
    pub fn verify(&self) {
        for (t, table) in self.tables.iter().enumerate() {
            let size = table.size();
            for (c, col) in table.cols.iter().enumerate() {
                match col {
                    Column::Link(l) => {
                        assert_eq!(l.size(&self.alloc), size, "link column {t}/{c} size");
                        self.verify_reciprocity(t, c, l.target_table, l.backlink_col);
                    }
                    Column::List(l) => {
                        assert_eq!(l.size(&self.alloc), size, "list column {t}/{c} size");
                        self.verify_reciprocity(t, c, l.target_table, l.backlink_col);
                        for (entry_row, list) in l.accessors.live_accessors() {
                            assert!(list.is_attached(), "registered accessor detached");
                            assert_eq!(list.origin_table(), t, "accessor table drifted");
                            assert_eq!(list.origin_col(), c, "accessor column drifted");
                            assert_eq!(list.origin_row(), entry_row, "accessor row drifted");
                            assert!(entry_row < size, "accessor row {entry_row} out of range");
                        }
                    }
                    Column::Backlink(bl) => {
                        assert_eq!(bl.size(&self.alloc), size, "backlink column {t}/{c} size");
                        match self.col_meta(bl.origin_table, bl.origin_col) {
                            ColMeta::Link {
                                target_table,
                                backlink_col,
                                ..
                            }
                            | ColMeta::List {
                                target_table,
                                backlink_col,
                                ..
                            } => {
                                assert_eq!(target_table, t, "backlink column {t}/{c} origin mismatch");
                                assert_eq!(backlink_col, c, "backlink column {t}/{c} index mismatch");
                            }
                            ColMeta::Backlink { .. } => {
                                panic!("backlink column {t}/{c} mirrors a backlink column")
                            }
                        }
                    }
                }
            }
        }
    }

    /// Forward and backward multisets of one column must agree entry for
    /// entry (invariant L1/L2).
    fn verify_reciprocity(&self, t: usize, c: usize, target_table: usize, backlink_col: usize) {
        let size = self.tables[t].size();
        let target_size = self.tables[target_table].size();
        let mut forward: Vec<(usize, usize)> = Vec::new();
        for row in 0..size {
            match &self.tables[t].cols[c] {
                Column::Link(l) => {
                    if let Some(target) = l.get_link(&self.alloc, row) {
                        assert!(target < target_size, "link {t}/{c}@{row} out of range");
                        forward.push((row, target));
                    }
                }
                Column::List(l) => {
                    for target in l.list_targets(&self.alloc, row) {
                        assert!(target < target_size, "link {t}/{c}@{row} out of range");
                        forward.push((row, target));
                    }
                }
                Column::Backlink(_) => unreachable!(),
            }
        }
        let mut backward: Vec<(usize, usize)> = Vec::new();
        let bl = self.tables[target_table].backlink_col(backlink_col);
        for target in 0..target_size {
            bl.for_each_link(&self.alloc, target, |origin| {
                assert!(origin < size, "backlink {target_table}/{backlink_col}@{target} out of range");
                backward.push((origin, target));
            });
        }
        forward.sort_unstable();
        backward.sort_unstable();
        assert_eq!(
            forward, backward,
            "reciprocity broken for column {t}/{c} against {target_table}/{backlink_col}"
        );
    }
}

impl Default for Group {
    fn default() -> Self {
        Group::new()
    }
}
