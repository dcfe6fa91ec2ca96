#![forbid(unsafe_code)]

//! Linked-row core of an embedded column-oriented database.
//!
//! The crate materializes and maintains relational links between rows of
//! tables in one group: single-valued link columns, ordered link-list
//! columns, the automatically maintained backlink columns that make
//! traversal and cascade deletion efficient, and the cascade engine itself.

pub mod alloc;
pub mod cascade;
pub mod column;
pub mod error;
pub mod group;
pub mod repl;
pub mod table;

pub use crate::cascade::{CascadeNotification, CascadeRow, NullifiedLink};
pub use crate::column::{LinkList, LinkStrength};
pub use crate::error::{Result, TrellisError};
pub use crate::group::{Group, GroupOptions};
pub use crate::repl::Replication;
pub use crate::table::Table;
