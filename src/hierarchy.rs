//! Hierarchy engine: acyclic parent->child graphs with a materialized
//! reachability index.
//!
//! Each entity kind has its own DAG. Edge insertion is cycle-checked against
//! the closure index and updates it incrementally with the cross product
//! `(anc(parent) + parent) x (desc(child) + child)`. Edge removal rebuilds the
//! affected kind's closure from the edge table, since a removed edge may or
//! may not sever paths that other edges still provide (diamond merges).

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::entity::{EntityId, EntityKind, EntityRecord};
use crate::error::{AccessError, WardenResult};
use crate::store::{StoreResult, WriteTxn};

/// Insert a parent->child edge, rejecting cycles.
///
/// Returns `Ok(false)` if the edge already existed (idempotent insert). The
/// supremum can never be accepted as a child: it is an ancestor of every node
/// of its kind, so the cycle check always fires.
pub(crate) fn add_edge(
    txn: &WriteTxn,
    kind: EntityKind,
    parent: &EntityRecord,
    child: &EntityRecord,
) -> WardenResult<bool> {
    if parent.id == child.id || txn.is_ancestor(kind, parent.id, child.id)? {
        return Err(AccessError::CyclicEdge {
            parent: parent.ext_id.clone(),
            child: child.ext_id.clone(),
        }
        .into());
    }

    if !txn.insert_edge(kind, parent.id.get(), child.id.get())? {
        return Ok(false);
    }

    // Every ancestor of the parent (and the parent itself) now reaches every
    // descendant of the child (and the child itself).
    let mut above = txn.ancestors_of(kind, parent.id)?;
    above.push(parent.id.get());
    let mut below = txn.descendants_of(kind, child.id)?;
    below.push(child.id.get());

    for &ancestor in &above {
        for &node in &below {
            txn.insert_closure_pair(kind, node, ancestor)?;
        }
    }

    Ok(true)
}

/// Remove a parent->child edge. Absent edges are a no-op (`Ok(false)`).
pub(crate) fn remove_edge(
    txn: &WriteTxn,
    kind: EntityKind,
    parent: EntityId,
    child: EntityId,
) -> StoreResult<bool> {
    if !txn.remove_edge(kind, parent.get(), child.get())? {
        return Ok(false);
    }
    rebuild_closure(txn, kind)?;
    Ok(true)
}

/// Remove every edge touching `id`, without rebuilding the closure.
///
/// Callers that detach several entities batch a single
/// [`rebuild_closure`] afterwards.
pub(crate) fn remove_all_edges_of(
    txn: &WriteTxn,
    kind: EntityKind,
    id: EntityId,
) -> StoreResult<bool> {
    let mut changed = false;
    for child in txn.children_of(kind, id)? {
        changed |= txn.remove_edge(kind, id.get(), child)?;
    }
    for parent in txn.parents_of(kind, id)? {
        changed |= txn.remove_edge(kind, parent, id.get())?;
    }
    Ok(changed)
}

/// Recompute the reachability index of one kind from its edge table.
pub(crate) fn rebuild_closure(txn: &WriteTxn, kind: EntityKind) -> StoreResult<()> {
    txn.clear_closure(kind)?;

    let edges = txn.edges(kind)?;
    let mut graph: DiGraph<u64, ()> = DiGraph::new();
    let mut indices: HashMap<u64, NodeIndex> = HashMap::new();
    for &(parent, child) in &edges {
        let p = *indices.entry(parent).or_insert_with(|| graph.add_node(parent));
        let c = *indices.entry(child).or_insert_with(|| graph.add_node(child));
        graph.add_edge(p, c, ());
    }

    for (&start, &start_idx) in &indices {
        let mut dfs = Dfs::new(&graph, start_idx);
        while let Some(reached) = dfs.next(&graph) {
            if reached != start_idx {
                txn.insert_closure_pair(kind, graph[reached], start)?;
            }
        }
    }

    Ok(())
}

/// Make sure `node` has the supremum among its ancestors, attaching a direct
/// `supremum -> node` edge if it does not.
pub(crate) fn ensure_supremum_path(
    txn: &WriteTxn,
    kind: EntityKind,
    supremum: &EntityRecord,
    node: &EntityRecord,
) -> WardenResult<bool> {
    if node.id == supremum.id || txn.is_ancestor(kind, node.id, supremum.id)? {
        return Ok(false);
    }
    add_edge(txn, kind, supremum, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn record(txn: &WriteTxn, ext: &str) -> EntityRecord {
        let rec = EntityRecord {
            id: txn.allocate_id().unwrap(),
            ext_id: ext.to_string(),
            description: ext.to_string(),
            is_static: false,
        };
        txn.put_entity(EntityKind::Subject, &rec).unwrap();
        rec
    }

    fn ancestors(txn: &WriteTxn, id: EntityId) -> Vec<u64> {
        let mut v = txn.ancestors_of(EntityKind::Subject, id).unwrap();
        v.sort_unstable();
        v
    }

    #[test]
    fn self_loop_rejected() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let a = record(&txn, "a");
        let err = add_edge(&txn, EntityKind::Subject, &a, &a).unwrap_err();
        assert!(format!("{err}").contains("cycle"));
    }

    #[test]
    fn chain_builds_transitive_closure() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let a = record(&txn, "a");
        let b = record(&txn, "b");
        let c = record(&txn, "c");

        assert!(add_edge(&txn, EntityKind::Subject, &a, &b).unwrap());
        assert!(add_edge(&txn, EntityKind::Subject, &b, &c).unwrap());

        assert_eq!(ancestors(&txn, c.id), vec![a.id.get(), b.id.get()]);
        let mut below = txn.descendants_of(EntityKind::Subject, a.id).unwrap();
        below.sort_unstable();
        assert_eq!(below, vec![b.id.get(), c.id.get()]);
    }

    #[test]
    fn cycle_via_closure_rejected() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let a = record(&txn, "a");
        let b = record(&txn, "b");
        let c = record(&txn, "c");

        add_edge(&txn, EntityKind::Subject, &a, &b).unwrap();
        add_edge(&txn, EntityKind::Subject, &b, &c).unwrap();

        // c -> a would close the loop a -> b -> c -> a.
        let err = add_edge(&txn, EntityKind::Subject, &c, &a).unwrap_err();
        assert!(format!("{err}").contains("cycle"));
    }

    #[test]
    fn duplicate_edge_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let a = record(&txn, "a");
        let b = record(&txn, "b");

        assert!(add_edge(&txn, EntityKind::Subject, &a, &b).unwrap());
        assert!(!add_edge(&txn, EntityKind::Subject, &a, &b).unwrap());
        assert_eq!(ancestors(&txn, b.id), vec![a.id.get()]);
    }

    #[test]
    fn diamond_merge_deduplicates() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let top = record(&txn, "top");
        let left = record(&txn, "left");
        let right = record(&txn, "right");
        let bottom = record(&txn, "bottom");

        add_edge(&txn, EntityKind::Subject, &top, &left).unwrap();
        add_edge(&txn, EntityKind::Subject, &top, &right).unwrap();
        add_edge(&txn, EntityKind::Subject, &left, &bottom).unwrap();
        add_edge(&txn, EntityKind::Subject, &right, &bottom).unwrap();

        let mut expected = vec![top.id.get(), left.id.get(), right.id.get()];
        expected.sort_unstable();
        assert_eq!(ancestors(&txn, bottom.id), expected);
    }

    #[test]
    fn removal_preserves_remaining_paths() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let top = record(&txn, "top");
        let left = record(&txn, "left");
        let right = record(&txn, "right");
        let bottom = record(&txn, "bottom");

        add_edge(&txn, EntityKind::Subject, &top, &left).unwrap();
        add_edge(&txn, EntityKind::Subject, &top, &right).unwrap();
        add_edge(&txn, EntityKind::Subject, &left, &bottom).unwrap();
        add_edge(&txn, EntityKind::Subject, &right, &bottom).unwrap();

        // Severing one arm of the diamond keeps top reachable via the other.
        assert!(remove_edge(&txn, EntityKind::Subject, left.id, bottom.id).unwrap());
        let mut expected = vec![top.id.get(), right.id.get()];
        expected.sort_unstable();
        assert_eq!(ancestors(&txn, bottom.id), expected);

        // Severing the second arm disconnects bottom entirely.
        assert!(remove_edge(&txn, EntityKind::Subject, right.id, bottom.id).unwrap());
        assert!(ancestors(&txn, bottom.id).is_empty());
    }

    #[test]
    fn remove_absent_edge_is_noop() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let a = record(&txn, "a");
        let b = record(&txn, "b");
        assert!(!remove_edge(&txn, EntityKind::Subject, a.id, b.id).unwrap());
    }

    #[test]
    fn supremum_path_attached_once() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let sup = record(&txn, "*");
        let a = record(&txn, "a");
        let b = record(&txn, "b");

        assert!(ensure_supremum_path(&txn, EntityKind::Subject, &sup, &a).unwrap());
        assert!(!ensure_supremum_path(&txn, EntityKind::Subject, &sup, &a).unwrap());

        // b gains the supremum through a; no direct edge needed.
        add_edge(&txn, EntityKind::Subject, &a, &b).unwrap();
        assert!(!ensure_supremum_path(&txn, EntityKind::Subject, &sup, &b).unwrap());
        assert!(txn.parents_of(EntityKind::Subject, b.id).unwrap().contains(&a.id.get()));
        assert!(!txn.parents_of(EntityKind::Subject, b.id).unwrap().contains(&sup.id.get()));
    }

    #[test]
    fn supremum_never_accepted_as_child() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let sup = record(&txn, "*");
        let a = record(&txn, "a");

        ensure_supremum_path(&txn, EntityKind::Subject, &sup, &a).unwrap();
        let err = add_edge(&txn, EntityKind::Subject, &a, &sup).unwrap_err();
        assert!(format!("{err}").contains("cycle"));
    }

    #[test]
    fn remove_all_edges_detaches_node() {
        let store = Store::in_memory().unwrap();
        let txn = store.write().unwrap();
        let a = record(&txn, "a");
        let b = record(&txn, "b");
        let c = record(&txn, "c");

        add_edge(&txn, EntityKind::Subject, &a, &b).unwrap();
        add_edge(&txn, EntityKind::Subject, &b, &c).unwrap();

        assert!(remove_all_edges_of(&txn, EntityKind::Subject, b.id).unwrap());
        rebuild_closure(&txn, EntityKind::Subject).unwrap();

        assert!(ancestors(&txn, c.id).is_empty());
        assert!(txn.children_of(EntityKind::Subject, a.id).unwrap().is_empty());
    }
}
