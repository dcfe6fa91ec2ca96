pub mod backlink;
pub mod int_tree;
pub mod link;
pub mod link_list;
pub mod registry;

pub use backlink::BacklinkColumn;
pub use int_tree::IntTree;
pub use link::LinkColumn;
pub use link_list::{LinkList, LinkListColumn};

/// Removal policy of a link column.
///
/// A strong link keeps its target alive: when the last strong link into a
/// row disappears, the row is removed by the cascade engine. A weak link is
/// merely nullified when its target goes away.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum LinkStrength {
    #[default]
    Weak,
    Strong,
}

impl LinkStrength {
    pub fn is_strong(self) -> bool {
        matches!(self, LinkStrength::Strong)
    }
}

/// One column of a table. Backlink columns sit after the user-facing link
/// columns of their table and are maintained entirely by the core.
pub enum Column {
    Link(LinkColumn),
    List(LinkListColumn),
    Backlink(BacklinkColumn),
}

impl Column {
    pub fn is_backlink(&self) -> bool {
        matches!(self, Column::Backlink(_))
    }
}
