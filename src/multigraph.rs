use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::operators::Node;
use crate::timestamp::Timestamp;

pub type NodeId = usize;
pub type EdgeKey = usize;

/// Tag on the two out-edges of an implication root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicationTag {
    Assumption,
    Conclusion,
}

/// Per-edge payload. The two colors are scratch state of the deletion
/// primitive and carry no meaning outside a colorization pass.
#[derive(Debug, Clone)]
pub struct EdgeAttrs {
    pub timestamp: Timestamp,
    pub implication: Option<ImplicationTag>,
    pub in_color: bool,
    pub out_color: bool,
}

impl EdgeAttrs {
    pub fn new(timestamp: Timestamp) -> Self {
        EdgeAttrs {
            timestamp,
            implication: None,
            in_color: false,
            out_color: false,
        }
    }

    pub fn with_tag(timestamp: Timestamp, tag: ImplicationTag) -> Self {
        EdgeAttrs {
            timestamp,
            implication: Some(tag),
            in_color: false,
            out_color: false,
        }
    }
}

/// Identifies one of possibly several parallel edges between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeRef {
    pub from: NodeId,
    pub to: NodeId,
    pub key: EdgeKey,
}

/// Labeled directed multigraph with value-interned nodes.
///
/// Nodes are value-semantic (see [`Node`]); the graph interns each distinct
/// value once and addresses it by a small integer id, so merging another
/// graph's edges reuses existing nodes with the same rendering. Iteration
/// orders are deterministic: ordered maps keyed by insertion-ordered ids.
#[derive(Debug, Clone, Default)]
pub struct ColorizableMultigraph {
    nodes: BTreeMap<NodeId, Node>,
    ids: HashMap<Node, NodeId>,
    out_edges: BTreeMap<NodeId, BTreeMap<(NodeId, EdgeKey), EdgeAttrs>>,
    in_edges: BTreeMap<NodeId, BTreeSet<(NodeId, EdgeKey)>>,
    next_id: NodeId,
}

impl ColorizableMultigraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out_edges.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn id_of(&self, node: &Node) -> Option<NodeId> {
        self.ids.get(node).copied()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Interns the node value, returning the existing id when the value is
    /// already present.
    pub fn ensure_node(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.ids.get(&node) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(node.clone(), id);
        self.nodes.insert(id, node);
        self.out_edges.insert(id, BTreeMap::new());
        self.in_edges.insert(id, BTreeSet::new());
        id
    }

    /// Adds a parallel-capable edge and returns its key.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, attrs: EdgeAttrs) -> EdgeKey {
        debug_assert!(self.has_node(from) && self.has_node(to));
        let key = self
            .out_edges
            .get(&from)
            .map(|m| {
                m.keys()
                    .filter(|(t, _)| *t == to)
                    .map(|(_, k)| k + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        self.out_edges
            .entry(from)
            .or_default()
            .insert((to, key), attrs);
        self.in_edges.entry(to).or_default().insert((from, key));
        key
    }

    pub fn remove_edge(&mut self, edge: EdgeRef) -> Option<EdgeAttrs> {
        let attrs = self
            .out_edges
            .get_mut(&edge.from)?
            .remove(&(edge.to, edge.key))?;
        if let Some(preds) = self.in_edges.get_mut(&edge.to) {
            preds.remove(&(edge.from, edge.key));
        }
        Some(attrs)
    }

    /// Removes a node together with every incident edge.
    pub fn remove_node(&mut self, id: NodeId) {
        let incoming: Vec<EdgeRef> = self.in_edge_refs(id).collect();
        for e in incoming {
            self.remove_edge(e);
        }
        let outgoing: Vec<EdgeRef> = self.out_edge_refs(id).collect();
        for e in outgoing {
            self.remove_edge(e);
        }
        if let Some(node) = self.nodes.remove(&id) {
            self.ids.remove(&node);
        }
        self.out_edges.remove(&id);
        self.in_edges.remove(&id);
    }

    pub fn edge_attrs(&self, edge: EdgeRef) -> Option<&EdgeAttrs> {
        self.out_edges.get(&edge.from)?.get(&(edge.to, edge.key))
    }

    pub fn edge_attrs_mut(&mut self, edge: EdgeRef) -> Option<&mut EdgeAttrs> {
        self.out_edges
            .get_mut(&edge.from)?
            .get_mut(&(edge.to, edge.key))
    }

    pub fn has_edge(&self, edge: EdgeRef) -> bool {
        self.edge_attrs(edge).is_some()
    }

    pub fn out_degree(&self, id: NodeId) -> usize {
        self.out_edges.get(&id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn in_degree(&self, id: NodeId) -> usize {
        self.in_edges.get(&id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn out_edge_refs(&self, id: NodeId) -> impl Iterator<Item = EdgeRef> + '_ {
        self.out_edges
            .get(&id)
            .into_iter()
            .flat_map(move |m| m.keys().map(move |(to, key)| EdgeRef {
                from: id,
                to: *to,
                key: *key,
            }))
    }

    pub fn in_edge_refs(&self, id: NodeId) -> impl Iterator<Item = EdgeRef> + '_ {
        self.in_edges
            .get(&id)
            .into_iter()
            .flat_map(move |s| s.iter().map(move |(from, key)| EdgeRef {
                from: *from,
                to: id,
                key: *key,
            }))
    }

    pub fn edge_refs(&self) -> impl Iterator<Item = EdgeRef> + '_ {
        self.out_edges.iter().flat_map(|(from, m)| {
            m.keys().map(move |(to, key)| EdgeRef {
                from: *from,
                to: *to,
                key: *key,
            })
        })
    }

    /// All simple paths from `src` to any destination, as edge sequences.
    /// When `src` itself is a destination the empty path is included, which
    /// is how a single-node graph exposes its root-to-leaf path.
    pub fn all_simple_edge_paths(
        &self,
        src: NodeId,
        dsts: &BTreeSet<NodeId>,
    ) -> Vec<Vec<EdgeRef>> {
        let mut paths = Vec::new();
        if !self.has_node(src) {
            return paths;
        }
        if dsts.contains(&src) {
            paths.push(Vec::new());
        }
        let mut stack = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(src);
        self.paths_dfs(src, dsts, &mut stack, &mut visited, &mut paths);
        paths
    }

    fn paths_dfs(
        &self,
        current: NodeId,
        dsts: &BTreeSet<NodeId>,
        stack: &mut Vec<EdgeRef>,
        visited: &mut HashSet<NodeId>,
        paths: &mut Vec<Vec<EdgeRef>>,
    ) {
        let successors: Vec<EdgeRef> = self.out_edge_refs(current).collect();
        for edge in successors {
            if visited.contains(&edge.to) {
                continue;
            }
            stack.push(edge);
            if dsts.contains(&edge.to) {
                paths.push(stack.clone());
            }
            visited.insert(edge.to);
            self.paths_dfs(edge.to, dsts, stack, visited, paths);
            visited.remove(&edge.to);
            stack.pop();
        }
    }

    pub fn reachable_from(&self, src: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = vec![src];
        while let Some(id) = queue.pop() {
            if !self.has_node(id) || !seen.insert(id) {
                continue;
            }
            for edge in self.out_edge_refs(id) {
                queue.push(edge.to);
            }
        }
        seen
    }

    /// Copy of the subgraph induced on `keep`: those nodes plus every edge
    /// whose endpoints both survive. Node ids are re-interned in the copy.
    pub fn induced_subgraph(&self, keep: &BTreeSet<NodeId>) -> ColorizableMultigraph {
        let mut sub = ColorizableMultigraph::new();
        for id in keep {
            if let Some(node) = self.node(*id) {
                sub.ensure_node(node.clone());
            }
        }
        for (from_id, targets) in &self.out_edges {
            if !keep.contains(from_id) {
                continue;
            }
            for ((to_id, _), attrs) in targets {
                if !keep.contains(to_id) {
                    continue;
                }
                let from = sub.ids[&self.nodes[from_id]];
                let to = sub.ids[&self.nodes[to_id]];
                let mut attrs = attrs.clone();
                attrs.in_color = false;
                attrs.out_color = false;
                sub.add_edge(from, to, attrs);
            }
        }
        sub
    }

    /// Copy restricted to the given edges and their endpoints.
    pub fn edge_subgraph(&self, edges: &[EdgeRef]) -> ColorizableMultigraph {
        let mut sub = ColorizableMultigraph::new();
        for edge in edges {
            if let Some(attrs) = self.edge_attrs(*edge) {
                let from = sub.ensure_node(self.nodes[&edge.from].clone());
                let to = sub.ensure_node(self.nodes[&edge.to].clone());
                let mut attrs = attrs.clone();
                attrs.in_color = false;
                attrs.out_color = false;
                sub.add_edge(from, to, attrs);
            }
        }
        sub
    }

    // ---- colorization: the deletion primitive ----

    /// Marks every edge on the path with both colors.
    pub fn colorize_path(&mut self, path: &[EdgeRef]) {
        for edge in path {
            if let Some(attrs) = self.edge_attrs_mut(*edge) {
                attrs.in_color = true;
                attrs.out_color = true;
            }
        }
    }

    fn node_in_colorized(&self, id: NodeId) -> bool {
        self.in_edge_refs(id)
            .all(|e| self.edge_attrs(e).is_some_and(|a| a.in_color))
    }

    fn node_out_colorized(&self, id: NodeId) -> bool {
        self.out_edge_refs(id)
            .all(|e| self.edge_attrs(e).is_some_and(|a| a.out_color))
    }

    /// Spreads colors to a fixpoint: a node whose in-edges are all in-colored
    /// passes in-color down to its out-edges, and a node whose out-edges are
    /// all out-colored passes out-color up to its in-edges. Nodes without
    /// in-edges respectively out-edges do not spread, so marking stays
    /// anchored to the colorized paths.
    pub fn build_colorization_scheme(&mut self) {
        loop {
            let mut changed = false;
            let ids: Vec<NodeId> = self.node_ids().collect();
            for id in ids {
                if self.in_degree(id) > 0 && self.node_in_colorized(id) {
                    let outs: Vec<EdgeRef> = self.out_edge_refs(id).collect();
                    for e in outs {
                        if let Some(attrs) = self.edge_attrs_mut(e) {
                            if !attrs.in_color {
                                attrs.in_color = true;
                                changed = true;
                            }
                        }
                    }
                }
                if self.out_degree(id) > 0 && self.node_out_colorized(id) {
                    let ins: Vec<EdgeRef> = self.in_edge_refs(id).collect();
                    for e in ins {
                        if let Some(attrs) = self.edge_attrs_mut(e) {
                            if !attrs.out_color {
                                attrs.out_color = true;
                                changed = true;
                            }
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Deletes every fully colorized edge whose tail is in-colorized and
    /// whose head is out-colorized (vacuously true for the root respectively
    /// the leaves), then drops the nodes the deletion orphaned. An edge still
    /// feeding an uncolorized parent or subtree survives, which is what keeps
    /// shared prefixes and shared suffixes intact.
    pub fn disconnect_fully_colorized_sub_dag(&mut self) {
        let doomed: Vec<EdgeRef> = self
            .edge_refs()
            .filter(|e| {
                let attrs = match self.edge_attrs(*e) {
                    Some(a) => a,
                    None => return false,
                };
                attrs.in_color
                    && attrs.out_color
                    && self.node_in_colorized(e.from)
                    && self.node_out_colorized(e.to)
            })
            .collect();
        let mut touched: BTreeSet<NodeId> = BTreeSet::new();
        for edge in &doomed {
            touched.insert(edge.from);
            touched.insert(edge.to);
            self.remove_edge(*edge);
        }
        for id in touched {
            if self.in_degree(id) == 0 && self.out_degree(id) == 0 {
                self.remove_node(id);
            }
        }
    }

    pub fn clear_colorization(&mut self) {
        let edges: Vec<EdgeRef> = self.edge_refs().collect();
        for e in edges {
            if let Some(attrs) = self.edge_attrs_mut(e) {
                attrs.in_color = false;
                attrs.out_color = false;
            }
        }
    }

    pub fn is_edge_colorized(&self, edge: EdgeRef) -> bool {
        self.edge_attrs(edge)
            .is_some_and(|a| a.in_color && a.out_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Node, PredicateArg};

    fn pred(name: &str) -> Node {
        Node::predicate(name, Vec::<PredicateArg>::new())
    }

    fn ts(t: i64) -> EdgeAttrs {
        EdgeAttrs::new(Timestamp::Absolute(t))
    }

    #[test]
    fn test_node_interning_reuses_ids() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("p"));
        let b = g.ensure_node(pred("p"));
        assert_eq!(a, b);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_parallel_edges_get_distinct_keys() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let b = g.ensure_node(pred("b"));
        let k0 = g.add_edge(a, b, ts(1));
        let k1 = g.add_edge(a, b, ts(2));
        assert_ne!(k0, k1);
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.out_degree(a), 2);
        assert_eq!(g.in_degree(b), 2);
    }

    #[test]
    fn test_remove_edge_keeps_sibling_keys() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let b = g.ensure_node(pred("b"));
        let k0 = g.add_edge(a, b, ts(1));
        let k1 = g.add_edge(a, b, ts(2));
        g.remove_edge(EdgeRef { from: a, to: b, key: k0 });
        assert!(g.has_edge(EdgeRef { from: a, to: b, key: k1 }));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_remove_node_detaches_edges() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let b = g.ensure_node(pred("b"));
        let c = g.ensure_node(pred("c"));
        g.add_edge(a, b, ts(1));
        g.add_edge(b, c, ts(2));
        g.remove_node(b);
        assert_eq!(g.edge_count(), 0);
        assert!(g.has_node(a) && g.has_node(c));
        assert!(g.id_of(&pred("b")).is_none());
    }

    #[test]
    fn test_simple_paths_enumeration() {
        let mut g = ColorizableMultigraph::new();
        let root = g.ensure_node(pred("root"));
        let mid = g.ensure_node(pred("mid"));
        let p = g.ensure_node(pred("p"));
        g.add_edge(root, mid, ts(1));
        g.add_edge(mid, p, ts(2));
        g.add_edge(root, p, ts(3));

        let paths = g.all_simple_edge_paths(root, &BTreeSet::from([p]));
        assert_eq!(paths.len(), 2);
        let lengths: Vec<usize> = paths.iter().map(|p| p.len()).collect();
        assert!(lengths.contains(&1) && lengths.contains(&2));
    }

    #[test]
    fn test_simple_paths_through_parallel_edges() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let b = g.ensure_node(pred("b"));
        g.add_edge(a, b, ts(1));
        g.add_edge(a, b, ts(2));
        let paths = g.all_simple_edge_paths(a, &BTreeSet::from([b]));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_empty_path_when_source_is_destination() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let paths = g.all_simple_edge_paths(a, &BTreeSet::from([a]));
        assert_eq!(paths, vec![Vec::new()]);
    }

    #[test]
    fn test_colorized_deletion_removes_exclusive_subtree() {
        // root -> and2 -> {q, r}, root -> p; deleting the and2 paths must
        // leave p untouched and drop and2, q, r.
        let mut g = ColorizableMultigraph::new();
        let root = g.ensure_node(pred("root"));
        let and2 = g.ensure_node(pred("and2"));
        let p = g.ensure_node(pred("p"));
        let q = g.ensure_node(pred("q"));
        let r = g.ensure_node(pred("r"));
        let e_keep = EdgeRef { from: root, to: p, key: g.add_edge(root, p, ts(1)) };
        let e1 = EdgeRef { from: root, to: and2, key: g.add_edge(root, and2, ts(2)) };
        let e2 = EdgeRef { from: and2, to: q, key: g.add_edge(and2, q, ts(3)) };
        let e3 = EdgeRef { from: and2, to: r, key: g.add_edge(and2, r, ts(4)) };

        g.colorize_path(&[e1, e2]);
        g.colorize_path(&[e1, e3]);
        g.build_colorization_scheme();
        g.disconnect_fully_colorized_sub_dag();
        g.clear_colorization();

        assert!(g.has_edge(e_keep));
        assert!(!g.has_node(and2));
        assert!(!g.has_node(q));
        assert!(!g.has_node(r));
        assert!(g.has_node(root));
    }

    #[test]
    fn test_colorized_deletion_keeps_shared_suffix() {
        // Two parents of mid; only the path through the first is removed, so
        // the mid -> leaf edge must survive.
        let mut g = ColorizableMultigraph::new();
        let root = g.ensure_node(pred("root"));
        let other = g.ensure_node(pred("other"));
        let mid = g.ensure_node(pred("mid"));
        let leaf = g.ensure_node(pred("leaf"));
        let e_root_other = EdgeRef { from: root, to: other, key: g.add_edge(root, other, ts(0)) };
        let e1 = EdgeRef { from: root, to: mid, key: g.add_edge(root, mid, ts(1)) };
        let e_shared = EdgeRef { from: other, to: mid, key: g.add_edge(other, mid, ts(2)) };
        let e2 = EdgeRef { from: mid, to: leaf, key: g.add_edge(mid, leaf, ts(3)) };

        g.colorize_path(&[e1, e2]);
        g.build_colorization_scheme();
        g.disconnect_fully_colorized_sub_dag();
        g.clear_colorization();

        assert!(!g.has_edge(e1));
        assert!(g.has_edge(e2), "shared suffix edge must survive");
        assert!(g.has_edge(e_shared));
        assert!(g.has_edge(e_root_other));
    }

    #[test]
    fn test_colorized_deletion_empties_single_path_graph() {
        let mut g = ColorizableMultigraph::new();
        let root = g.ensure_node(pred("not"));
        let leaf = g.ensure_node(pred("p"));
        let e = EdgeRef { from: root, to: leaf, key: g.add_edge(root, leaf, ts(1)) };

        g.colorize_path(&[e]);
        g.build_colorization_scheme();
        g.disconnect_fully_colorized_sub_dag();

        assert!(g.is_empty());
    }

    #[test]
    fn test_clear_colorization_resets_edges() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let b = g.ensure_node(pred("b"));
        let e = EdgeRef { from: a, to: b, key: g.add_edge(a, b, ts(1)) };
        g.colorize_path(&[e]);
        assert!(g.is_edge_colorized(e));
        g.clear_colorization();
        assert!(!g.is_edge_colorized(e));
    }

    #[test]
    fn test_induced_subgraph_copies_reachable_part() {
        let mut g = ColorizableMultigraph::new();
        let a = g.ensure_node(pred("a"));
        let b = g.ensure_node(pred("b"));
        let c = g.ensure_node(pred("c"));
        g.add_edge(a, b, ts(1));
        g.add_edge(b, c, ts(2));

        let reach = g.reachable_from(b);
        let sub = g.induced_subgraph(&reach);
        assert_eq!(sub.node_count(), 2);
        assert_eq!(sub.edge_count(), 1);
        assert!(sub.id_of(&pred("b")).is_some());
        assert!(sub.id_of(&pred("a")).is_none());
    }
}
