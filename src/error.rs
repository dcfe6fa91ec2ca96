use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrellisError>;

/// Reportable failures of the link core.
///
/// Structural invariant violations (a forward link without its reciprocal
/// backlink, or vice versa) are programmer errors and assert instead of
/// surfacing here; every variant below leaves the group untouched.
#[derive(Debug, Error)]
pub enum TrellisError {
    /// A link-list handle whose row was removed is used again.
    #[error("link list accessor is detached")]
    DetachedAccessor,
    /// A positional argument on a link-list operation is out of range.
    #[error("link index {index} out of range (len {len})")]
    LinkIndexOutOfRange { index: usize, len: usize },
    /// A table cannot be removed while another table links into it.
    #[error("table {target_table} is still the link target of column {origin_col} in table {origin_table}")]
    CrossTableLinkTarget {
        target_table: usize,
        origin_table: usize,
        origin_col: usize,
    },
}
