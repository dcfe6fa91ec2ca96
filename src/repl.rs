//! Replication contract for the external change log.
//!
//! The group calls one method per observable link operation, after the
//! local primitive update has been performed and before any cascade the
//! operation induces is applied. Downstream consumers rely on seeing the
//! minimum-impact change first. All methods default to no-ops so consumers
//! implement only what they log.

/// Observer of link mutations. Identity triples are
/// `(origin_table, origin_col, origin_row)`.
pub trait Replication {
    fn set_link(&mut self, _table: usize, _col: usize, _row: usize, _target: Option<usize>) {}

    fn link_list_insert(
        &mut self,
        _table: usize,
        _col: usize,
        _row: usize,
        _link_ndx: usize,
        _target: usize,
    ) {
    }

    fn link_list_set(
        &mut self,
        _table: usize,
        _col: usize,
        _row: usize,
        _link_ndx: usize,
        _target: usize,
    ) {
    }

    fn link_list_move(&mut self, _table: usize, _col: usize, _row: usize, _from: usize, _to: usize) {
    }

    /// `a < b` always holds; swaps are canonicalized before emission.
    fn link_list_swap(&mut self, _table: usize, _col: usize, _row: usize, _a: usize, _b: usize) {}

    fn link_list_erase(&mut self, _table: usize, _col: usize, _row: usize, _link_ndx: usize) {}

    fn link_list_clear(&mut self, _table: usize, _col: usize, _row: usize) {}

    /// A single entry was removed because its target row went away.
    fn link_list_nullify(&mut self, _table: usize, _col: usize, _row: usize, _link_ndx: usize) {}

    /// A live accessor was permanently detached by the core.
    fn on_link_list_destroyed(&mut self, _table: usize, _col: usize, _row: usize) {}
}
