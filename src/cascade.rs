//! Cascade engine: computes and applies the transitive closure of row
//! removals triggered by a link mutation.
//!
//! The cascade is modeled as explicit data. Traversal walks the backlink
//! graph and accumulates a [`CascadeState`]; the state is reported through
//! the group's notification callback; only then are the scheduled rows
//! removed, each with `broken_reciprocal = true` so backlinks accounted for
//! during traversal are not touched twice. Because `rows` is a sorted,
//! deduplicated set and every recursion inserts before descending, the
//! traversal terminates on cyclic graphs.

use tracing::debug;

use crate::group::{ColMeta, Group};

/// One row scheduled for removal.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct CascadeRow {
    pub table: usize,
    pub row: usize,
}

/// One weak link that was (or is about to be) nullified.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NullifiedLink {
    pub origin_table: usize,
    pub origin_col: usize,
    pub origin_row: usize,
    pub old_target_row: usize,
}

/// Transient accumulator for a single user-triggered cascade.
pub struct CascadeState {
    /// Rows to be removed, sorted by `(table, row)` and deduplicated.
    pub rows: Vec<CascadeRow>,
    /// Nullified incoming links, recorded only when
    /// `track_link_nullifications` is set.
    pub links: Vec<NullifiedLink>,
    /// Table excluded from traversal; used by table removal.
    pub stop_on_table: Option<usize>,
    /// `(table, col, row)` of the link-list cell that originated a clear;
    /// traversal must not re-enter it.
    pub stop_on_link_list: Option<(usize, usize, usize)>,
    pub track_link_nullifications: bool,
    /// When set (the default), weak links never contribute rows to the
    /// traversal. `remove_recursive` clears it.
    pub only_strong_links: bool,
}

impl CascadeState {
    pub fn new() -> CascadeState {
        CascadeState {
            rows: Vec::new(),
            links: Vec::new(),
            stop_on_table: None,
            stop_on_link_list: None,
            track_link_nullifications: false,
            only_strong_links: true,
        }
    }

    pub(crate) fn contains_row(&self, table: usize, row: usize) -> bool {
        self.rows.binary_search(&CascadeRow { table, row }).is_ok()
    }

    /// Inserts in sorted position; returns false if already present.
    pub(crate) fn insert_row(&mut self, table: usize, row: usize) -> bool {
        let entry = CascadeRow { table, row };
        match self.rows.binary_search(&entry) {
            Ok(_) => false,
            Err(pos) => {
                self.rows.insert(pos, entry);
                true
            }
        }
    }
}

impl Default for CascadeState {
    fn default() -> Self {
        CascadeState::new()
    }
}

/// Aggregate effect of one top-level mutation, delivered to the group's
/// notification callback before any scheduled removal is applied. Advisory
/// only; the callback cannot veto.
#[derive(Clone, Debug)]
pub struct CascadeNotification {
    pub rows: Vec<CascadeRow>,
    pub links: Vec<NullifiedLink>,
}

impl Group {
    /// Total strong-link contributions into `(table, row)`.
    pub(crate) fn num_strong_backlinks(&self, table: usize, row: usize) -> usize {
        let mut n = 0;
        for col in &self.tables[table].cols {
            if let crate::column::Column::Backlink(bl) = col {
                if self.origin_is_strong(bl.origin_table, bl.origin_col) {
                    n += bl.get_backlink_count(&self.alloc, row);
                }
            }
        }
        n
    }

    fn origin_is_strong(&self, table: usize, col: usize) -> bool {
        match self.col_meta(table, col) {
            ColMeta::Link { strong, .. } | ColMeta::List { strong, .. } => strong,
            ColMeta::Backlink { .. } => panic!("backlink column cannot be a link origin"),
        }
    }

    /// Breaks every reciprocal backlink contributed by `(table, row)` and
    /// recurses into targets whose last strong link just disappeared. Called
    /// exactly once per row scheduled for removal.
    pub(crate) fn cascade_break_backlinks_to(
        &mut self,
        table: usize,
        row: usize,
        state: &mut CascadeState,
    ) {
        let ncols = self.tables[table].cols.len();
        for c in 0..ncols {
            match self.col_meta(table, c) {
                ColMeta::Link {
                    target_table,
                    backlink_col,
                    strong,
                } => {
                    let Some(target) = self.tables[table].link_col(c).get_link(&self.alloc, row)
                    else {
                        continue;
                    };
                    self.tables[target_table]
                        .backlink_col_mut(backlink_col)
                        .remove_one_backlink(&mut self.alloc, target, row);
                    if !strong && state.only_strong_links {
                        continue;
                    }
                    if state.stop_on_table == Some(target_table) {
                        continue;
                    }
                    self.check_cascade_break_backlinks_to(target_table, target, state);
                }
                ColMeta::List {
                    target_table,
                    backlink_col,
                    strong,
                } => {
                    if state.stop_on_link_list == Some((table, c, row)) {
                        continue;
                    }
                    let targets = self.tables[table].list_col(c).list_targets(&self.alloc, row);
                    for target in targets {
                        self.tables[target_table]
                            .backlink_col_mut(backlink_col)
                            .remove_one_backlink(&mut self.alloc, target, row);
                        if !strong && state.only_strong_links {
                            continue;
                        }
                        if state.stop_on_table == Some(target_table) {
                            continue;
                        }
                        self.check_cascade_break_backlinks_to(target_table, target, state);
                    }
                }
                ColMeta::Backlink {
                    origin_table,
                    origin_col,
                } => {
                    // Remaining incoming links will be nullified at apply
                    // time; record them now, while the multiset still exists.
                    if state.track_link_nullifications {
                        let origins =
                            self.tables[table].backlink_col(c).collect_links(&self.alloc, row);
                        for origin in origins {
                            state.links.push(NullifiedLink {
                                origin_table,
                                origin_col,
                                origin_row: origin,
                                old_target_row: row,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Whole-table variant used by `clear_table` and `remove_table`.
    pub(crate) fn cascade_break_backlinks_to_all_rows(
        &mut self,
        table: usize,
        state: &mut CascadeState,
    ) {
        let size = self.tables[table].size();
        let ncols = self.tables[table].cols.len();
        for c in 0..ncols {
            match self.col_meta(table, c) {
                ColMeta::Link {
                    target_table,
                    backlink_col,
                    strong,
                } => {
                    let target_size = self.tables[target_table].size();
                    self.tables[target_table]
                        .backlink_col_mut(backlink_col)
                        .remove_all_backlinks(&mut self.alloc, target_size);
                    if !strong {
                        continue;
                    }
                    if state.stop_on_table == Some(target_table) {
                        continue;
                    }
                    for row in 0..size {
                        if let Some(target) =
                            self.tables[table].link_col(c).get_link(&self.alloc, row)
                        {
                            self.check_cascade_break_backlinks_to(target_table, target, state);
                        }
                    }
                }
                ColMeta::List {
                    target_table,
                    backlink_col,
                    strong,
                } => {
                    let target_size = self.tables[target_table].size();
                    self.tables[target_table]
                        .backlink_col_mut(backlink_col)
                        .remove_all_backlinks(&mut self.alloc, target_size);
                    if !strong {
                        continue;
                    }
                    if state.stop_on_table == Some(target_table) {
                        continue;
                    }
                    for row in 0..size {
                        let targets =
                            self.tables[table].list_col(c).list_targets(&self.alloc, row);
                        for target in targets {
                            self.check_cascade_break_backlinks_to(target_table, target, state);
                        }
                    }
                }
                ColMeta::Backlink {
                    origin_table,
                    origin_col,
                } => {
                    if state.track_link_nullifications {
                        for row in 0..size {
                            let origins = self.tables[table]
                                .backlink_col(c)
                                .collect_links(&self.alloc, row);
                            for origin in origins {
                                state.links.push(NullifiedLink {
                                    origin_table,
                                    origin_col,
                                    origin_row: origin,
                                    old_target_row: row,
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    /// Schedules `(target_table, target_row)` for removal unless it is
    /// already scheduled or still held by a strong link, then recurses.
    pub(crate) fn check_cascade_break_backlinks_to(
        &mut self,
        target_table: usize,
        target_row: usize,
        state: &mut CascadeState,
    ) {
        if state.contains_row(target_table, target_row) {
            return;
        }
        if self.num_strong_backlinks(target_table, target_row) > 0 {
            return;
        }
        state.insert_row(target_table, target_row);
        debug!(table = target_table, row = target_row, "cascade.row_scheduled");
        self.cascade_break_backlinks_to(target_table, target_row, state);
    }

    /// Cascade entry point shared by `set_link`, link-list `set` and
    /// `remove`: the strong link into `(table, row)` was just released.
    pub(crate) fn cascade_on_strong_target_released(&mut self, table: usize, row: usize) {
        if self.num_strong_backlinks(table, row) > 0 {
            return;
        }
        let mut state = CascadeState::new();
        state.track_link_nullifications = self.cascade_handler.is_some();
        state.insert_row(table, row);
        self.cascade_break_backlinks_to(table, row, &mut state);
        self.notify_cascade(&state);
        self.remove_backlink_broken_rows(&state);
    }

    /// Delivers the aggregate notification, at most once per top-level
    /// mutation and always before the removals are applied.
    pub(crate) fn notify_cascade(&mut self, state: &CascadeState) {
        if let Some(handler) = self.cascade_handler.as_mut() {
            let notification = CascadeNotification {
                rows: state.rows.clone(),
                links: state.links.clone(),
            };
            handler(&notification);
        }
    }

    /// Applies the scheduled removals. Iteration runs over the stored order
    /// back to front so earlier removals cannot displace rows that are still
    /// scheduled; the reciprocal backlinks were already broken during
    /// traversal.
    pub(crate) fn remove_backlink_broken_rows(&mut self, state: &CascadeState) {
        for &CascadeRow { table, row } in state.rows.iter().rev() {
            debug!(table, row, "cascade.apply");
            self.do_move_last_over(table, row, true);
        }
    }
}
