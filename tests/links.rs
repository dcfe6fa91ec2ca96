use std::cell::RefCell;
use std::rc::Rc;

use trellis::{Group, LinkStrength, Replication, TrellisError};

#[derive(Default)]
struct EventLog {
    events: Rc<RefCell<Vec<String>>>,
}

impl Replication for EventLog {
    fn set_link(&mut self, table: usize, col: usize, row: usize, target: Option<usize>) {
        self.events
            .borrow_mut()
            .push(format!("set_link({table},{col},{row},{target:?})"));
    }

    fn link_list_insert(&mut self, table: usize, col: usize, row: usize, ndx: usize, target: usize) {
        self.events
            .borrow_mut()
            .push(format!("insert({table},{col},{row},{ndx},{target})"));
    }

    fn link_list_set(&mut self, table: usize, col: usize, row: usize, ndx: usize, target: usize) {
        self.events
            .borrow_mut()
            .push(format!("set({table},{col},{row},{ndx},{target})"));
    }

    fn link_list_move(&mut self, table: usize, col: usize, row: usize, from: usize, to: usize) {
        self.events
            .borrow_mut()
            .push(format!("move({table},{col},{row},{from},{to})"));
    }

    fn link_list_swap(&mut self, table: usize, col: usize, row: usize, a: usize, b: usize) {
        self.events
            .borrow_mut()
            .push(format!("swap({table},{col},{row},{a},{b})"));
    }

    fn link_list_erase(&mut self, table: usize, col: usize, row: usize, ndx: usize) {
        self.events
            .borrow_mut()
            .push(format!("erase({table},{col},{row},{ndx})"));
    }

    fn link_list_clear(&mut self, table: usize, col: usize, row: usize) {
        self.events
            .borrow_mut()
            .push(format!("clear({table},{col},{row})"));
    }

    fn link_list_nullify(&mut self, table: usize, col: usize, row: usize, ndx: usize) {
        self.events
            .borrow_mut()
            .push(format!("nullify({table},{col},{row},{ndx})"));
    }

    fn on_link_list_destroyed(&mut self, table: usize, col: usize, row: usize) {
        self.events
            .borrow_mut()
            .push(format!("destroyed({table},{col},{row})"));
    }
}

fn logged_group() -> (Group, Rc<RefCell<Vec<String>>>) {
    let mut g = Group::new();
    let events = Rc::new(RefCell::new(Vec::new()));
    g.set_replication(Box::new(EventLog {
        events: events.clone(),
    }));
    (g, events)
}

#[test]
fn link_column_null_translation() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 2);
    g.add_rows(b, 3);

    assert_eq!(g.get_link(a, c, 0), None);
    assert!(g.is_null_link(a, c, 0));
    assert_eq!(g.set_link(a, c, 0, Some(0)), None);
    assert_eq!(g.get_link(a, c, 0), Some(0));
    assert_eq!(g.set_link(a, c, 0, Some(2)), Some(0));
    assert_eq!(g.backlinks_from(b, 2, a, c), vec![0]);
    assert_eq!(g.backlink_count(b, 0), 0);
    assert_eq!(g.nullify_link(a, c, 0), Some(2));
    assert!(g.is_null_link(a, c, 0));
    g.verify();
}

#[test]
fn scenario_a_self_list_move_last_over() {
    let mut g = Group::new();
    let t = g.add_table();
    let c = g.add_link_list_column(t, t, LinkStrength::Weak);
    g.add_rows(t, 3);

    let l0 = g.link_list(t, c, 0);
    for target in [2, 1, 0] {
        l0.add(&mut g, target).unwrap();
    }
    let l2 = g.link_list(t, c, 2);
    l2.add(&mut g, 1).unwrap();

    g.move_last_over(t, 0);

    assert_eq!(g.table_size(t), 2);
    // The old row-0 list is gone and its accessor detached.
    assert!(!l0.is_attached());
    assert!(matches!(l0.len(&g), Err(TrellisError::DetachedAccessor)));
    // The row that was at index 2 now lives at index 0, list intact.
    assert!(l2.is_attached());
    assert_eq!(l2.origin_row(), 0);
    assert_eq!(l2.targets(&g).unwrap(), vec![1]);
    assert_eq!(g.backlinks_from(t, 1, t, c), vec![0]);
    g.verify();
}

#[test]
fn scenario_e_duplicate_targets_stay_a_multiset() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 4);

    let list = g.link_list(a, c, 0);
    for _ in 0..3 {
        list.add(&mut g, 3).unwrap();
    }
    assert_eq!(list.remove(&mut g, 1).unwrap(), 3);
    assert_eq!(list.targets(&g).unwrap(), vec![3, 3]);
    assert_eq!(g.backlinks_from(b, 3, a, c), vec![0, 0]);
    g.verify();
}

#[test]
fn scenario_f_swap_rows_with_shared_target() {
    let mut g = Group::new();
    let t = g.add_table();
    let c = g.add_link_list_column(t, t, LinkStrength::Weak);
    g.add_rows(t, 4);

    let la = g.link_list(t, c, 0);
    la.add(&mut g, 2).unwrap();
    la.add(&mut g, 3).unwrap();
    let lb = g.link_list(t, c, 1);
    lb.add(&mut g, 2).unwrap();

    let before = g.backlinks_from(t, 2, t, c);
    g.swap_rows(t, 0, 1);
    let mut after = g.backlinks_from(t, 2, t, c);
    after.sort_unstable();
    let mut expected = before;
    expected.sort_unstable();
    // Each origin appeared once and still appears once.
    assert_eq!(after, expected);
    assert_eq!(la.origin_row(), 1);
    assert_eq!(lb.origin_row(), 0);
    assert_eq!(la.targets(&g).unwrap(), vec![2, 3]);
    assert_eq!(lb.targets(&g).unwrap(), vec![2]);
    g.verify();
}

#[test]
fn list_insert_set_move_swap_remove() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 5);

    let list = g.link_list(a, c, 0);
    assert_eq!(list.len(&g).unwrap(), 0);
    assert!(list.is_empty(&g).unwrap());
    assert_eq!(list.find_first(&g, 0).unwrap(), None);

    list.add(&mut g, 0).unwrap();
    list.add(&mut g, 1).unwrap();
    list.insert(&mut g, 1, 4).unwrap();
    assert_eq!(list.targets(&g).unwrap(), vec![0, 4, 1]);

    assert_eq!(list.set(&mut g, 0, 2).unwrap(), 0);
    assert_eq!(list.targets(&g).unwrap(), vec![2, 4, 1]);
    assert_eq!(g.backlink_count(b, 0), 0);

    list.move_link(&mut g, 2, 0).unwrap();
    assert_eq!(list.targets(&g).unwrap(), vec![1, 2, 4]);

    list.swap_links(&mut g, 0, 2).unwrap();
    assert_eq!(list.targets(&g).unwrap(), vec![4, 2, 1]);

    assert_eq!(list.remove(&mut g, 1).unwrap(), 2);
    assert_eq!(list.targets(&g).unwrap(), vec![4, 1]);
    assert_eq!(list.find_first(&g, 1).unwrap(), Some(1));
    g.verify();
}

#[test]
fn emptied_list_reverts_to_degenerate_state() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 1);

    let list = g.link_list(a, c, 0);
    list.add(&mut g, 0).unwrap();
    assert_eq!(list.remove(&mut g, 0).unwrap(), 0);
    assert_eq!(list.len(&g).unwrap(), 0);
    assert_eq!(g.backlink_count(b, 0), 0);
    // The degenerate list is usable again.
    list.add(&mut g, 0).unwrap();
    assert_eq!(list.targets(&g).unwrap(), vec![0]);
    g.verify();
}

#[test]
fn out_of_range_positions_are_reported_and_harmless() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 2);

    let list = g.link_list(a, c, 0);
    list.add(&mut g, 0).unwrap();

    assert!(matches!(
        list.insert(&mut g, 2, 1),
        Err(TrellisError::LinkIndexOutOfRange { index: 2, len: 1 })
    ));
    assert!(matches!(
        list.set(&mut g, 1, 1),
        Err(TrellisError::LinkIndexOutOfRange { .. })
    ));
    assert!(matches!(
        list.move_link(&mut g, 0, 1),
        Err(TrellisError::LinkIndexOutOfRange { .. })
    ));
    assert!(matches!(
        list.swap_links(&mut g, 0, 3),
        Err(TrellisError::LinkIndexOutOfRange { .. })
    ));
    assert!(matches!(
        list.remove(&mut g, 1),
        Err(TrellisError::LinkIndexOutOfRange { .. })
    ));
    // Nothing changed.
    assert_eq!(list.targets(&g).unwrap(), vec![0]);
    assert_eq!(g.backlinks_from(b, 0, a, c), vec![0]);
    g.verify();
}

#[test]
fn accessor_registry_returns_live_handle() {
    let mut g = Group::new();
    let t = g.add_table();
    let c = g.add_link_list_column(t, t, LinkStrength::Weak);
    g.add_rows(t, 2);

    let first = g.link_list(t, c, 1);
    let second = g.link_list(t, c, 1);
    assert!(Rc::ptr_eq(&first, &second));

    drop(first);
    drop(second);
    let fresh = g.link_list(t, c, 1);
    assert_eq!(fresh.origin_row(), 1);
    assert!(fresh.is_attached());
}

#[test]
fn insert_rows_shifts_origins_and_accessors() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 2);
    g.add_rows(b, 1);

    let list = g.link_list(a, c, 1);
    list.add(&mut g, 0).unwrap();

    g.insert_rows(a, 0, 3);
    assert_eq!(g.table_size(a), 5);
    assert_eq!(list.origin_row(), 4);
    assert_eq!(g.backlinks_from(b, 0, a, c), vec![4]);
    assert_eq!(list.targets(&g).unwrap(), vec![0]);
    g.verify();
}

#[test]
fn erase_rows_renumbers_and_detaches() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 4);
    g.add_rows(b, 2);

    let doomed = g.link_list(a, c, 1);
    doomed.add(&mut g, 0).unwrap();
    let survivor = g.link_list(a, c, 3);
    survivor.add(&mut g, 1).unwrap();

    g.erase_rows(a, 0, 2);
    assert_eq!(g.table_size(a), 2);
    assert!(!doomed.is_attached());
    assert!(survivor.is_attached());
    assert_eq!(survivor.origin_row(), 1);
    assert_eq!(g.backlinks_from(b, 1, a, c), vec![1]);
    assert_eq!(g.backlink_count(b, 0), 0);
    g.verify();
}

#[test]
fn remove_target_row_drops_every_link_to_it() {
    let mut g = Group::new();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 3);

    let list = g.link_list(a, c, 0);
    for target in [1, 0, 1] {
        list.add(&mut g, target).unwrap();
    }
    list.remove_target_row(&mut g, 0).unwrap();
    // Row 1 of b is gone; both entries referring to it went with it.
    assert_eq!(g.table_size(b), 2);
    assert_eq!(list.targets(&g).unwrap(), vec![0]);
    g.verify();

    list.remove_all_target_rows(&mut g).unwrap();
    assert_eq!(list.len(&g).unwrap(), 0);
    assert_eq!(g.table_size(b), 1);
    g.verify();
}

#[test]
fn swap_is_canonicalized_in_the_event_stream() {
    let (mut g, events) = logged_group();
    let a = g.add_table();
    let b = g.add_table();
    let c = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 3);

    let list = g.link_list(a, c, 0);
    for target in [0, 1, 2] {
        list.add(&mut g, target).unwrap();
    }
    events.borrow_mut().clear();
    list.swap_links(&mut g, 2, 0).unwrap();
    assert_eq!(events.borrow().as_slice(), ["swap(0,0,0,0,2)"]);
    // Swapping an index with itself is a no-op and emits nothing.
    events.borrow_mut().clear();
    list.swap_links(&mut g, 1, 1).unwrap();
    assert!(events.borrow().is_empty());
}

#[test]
fn replication_sees_primitive_before_nullifications() {
    let (mut g, events) = logged_group();
    let a = g.add_table();
    let b = g.add_table();
    let cl = g.add_link_column(a, b, LinkStrength::Weak);
    let ll = g.add_link_list_column(a, b, LinkStrength::Weak);
    g.add_rows(a, 1);
    g.add_rows(b, 2);

    g.set_link(a, cl, 0, Some(0));
    let list = g.link_list(a, ll, 0);
    list.add(&mut g, 0).unwrap();
    events.borrow_mut().clear();

    // Removing b[0] nullifies both links into it.
    g.move_last_over(b, 0);
    let log = events.borrow();
    assert!(log.contains(&"set_link(0,0,0,None)".to_string()));
    assert!(log.contains(&format!("nullify(0,{ll},0,0)")));
    drop(log);
    assert_eq!(g.get_link(a, cl, 0), None);
    assert_eq!(list.len(&g).unwrap(), 0);
    g.verify();
}

#[test]
fn destroyed_event_fires_when_rows_vanish() {
    let (mut g, events) = logged_group();
    let t = g.add_table();
    let c = g.add_link_list_column(t, t, LinkStrength::Weak);
    g.add_rows(t, 2);

    let list = g.link_list(t, c, 0);
    list.add(&mut g, 1).unwrap();
    events.borrow_mut().clear();
    g.move_last_over(t, 0);
    assert!(events
        .borrow()
        .iter()
        .any(|e| e == &format!("destroyed({t},{c},0)")));
    assert!(!list.is_attached());
}
