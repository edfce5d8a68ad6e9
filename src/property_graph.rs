use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;
use tracing::warn;

use crate::error::GraphError;
use crate::multigraph::{
    ColorizableMultigraph, EdgeAttrs, EdgeRef, ImplicationTag, NodeId,
};
use crate::operators::{Node, OperatorKind, OperatorNode, PredicateArg, SHOULD_NOT_HAPPEN};
use crate::time::{Tick, TimeSource};
use crate::timestamp::{Timestamp, sequence_matches};

/// A root-to-leaf path together with its timestamp, which is the oldest
/// timestamp of its edges. A single-node graph exposes one empty path whose
/// timestamp is the graph's pending stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedPath {
    pub edges: Vec<EdgeRef>,
    pub leaf: NodeId,
    pub timestamp: Timestamp,
}

/// One assignment of graph paths to the paths of a matched property graph.
#[derive(Debug, Clone)]
pub struct MatchCase {
    pub paths: Vec<TimedPath>,
    pub timestamps: Vec<Timestamp>,
}

/// Result of [`TimedPropertyGraph::find_equivalent_subgraphs`]: every valid
/// assignment of own paths to the other graph's root-to-leaf paths, with the
/// other-path axis sorted by timestamp ascending.
#[derive(Debug, Clone, Default)]
pub struct SubgraphMatches {
    pub cases: Vec<MatchCase>,
    pub matched_paths: Vec<TimedPath>,
    pub original_timestamps: Vec<Timestamp>,
}

impl SubgraphMatches {
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// A matched implication ready to be rewritten into a graph: the implication
/// (by copy), the paths of the target graph that form its assumption, and
/// their timestamps.
#[derive(Debug, Clone)]
pub struct ModusPonensApplication {
    pub implication: TimedPropertyGraph,
    pub case: MatchCase,
    predicate_renderings: BTreeSet<String>,
}

impl ModusPonensApplication {
    /// The first moment the assumption holds in full: the most recent of the
    /// matched path timestamps.
    pub fn assumption_moment(&self, now: Tick) -> Timestamp {
        self.case
            .timestamps
            .iter()
            .copied()
            .max_by(|a, b| a.cmp_at(b, now))
            .unwrap_or(Timestamp::Absolute(0))
    }

    /// Renderings of the predicate leaves this application rewrites.
    pub fn predicate_renderings(&self) -> &BTreeSet<String> {
        &self.predicate_renderings
    }

    /// Whether the matched paths still exist in `graph`. Applications become
    /// stale once another rewrite has consumed any of their edges.
    pub fn preconditions_hold(&self, graph: &TimedPropertyGraph) -> bool {
        self.case.paths.iter().all(|p| {
            if p.edges.is_empty() {
                graph.graph.has_node(p.leaf)
            } else {
                p.edges.iter().all(|e| graph.graph.has_edge(*e))
            }
        })
    }

    /// Stable textual identity used for deterministic tie-breaking.
    pub fn identity(&self) -> String {
        let mut parts: Vec<String> = self
            .case
            .paths
            .iter()
            .map(|p| format!("{}@{}", p.leaf, p.timestamp))
            .collect();
        parts.push(self.implication.describe());
        parts.join("|")
    }
}

/// A rewriting invariant re-asserted after every mutation of a graph.
pub trait ConstantProperty {
    fn apply(&self, graph: &mut TimedPropertyGraph);
}

/// Drops every root-to-leaf path through a predicate whose negation parity
/// contradicts the most recent path through that predicate: asserting a
/// predicate invalidates earlier assertions of its opposite.
pub struct NoPositiveAndNegativePredicatesSimultaneously;

impl ConstantProperty for NoPositiveAndNegativePredicatesSimultaneously {
    fn apply(&self, graph: &mut TimedPropertyGraph) {
        let now = graph.now();
        let predicate_ids: Vec<NodeId> = graph
            .graph
            .node_ids()
            .filter(|id| graph.graph.node(*id).is_some_and(Node::is_predicate))
            .collect();

        for pid in predicate_ids {
            if !graph.graph.has_node(pid) {
                continue;
            }
            let Some(root) = graph.root else { return };
            let mut paths = graph.timed_paths(root, &BTreeSet::from([pid]));
            if paths.len() < 2 {
                continue;
            }
            paths.sort_by(|a, b| b.timestamp.cmp_at(&a.timestamp, now));

            let lead_parity = graph.not_count(&paths[0]) % 2;
            let doomed: Vec<TimedPath> = paths
                .into_iter()
                .skip(1)
                .filter(|p| graph.not_count(p) % 2 != lead_parity)
                .collect();
            if doomed.is_empty() {
                continue;
            }
            graph.logically_remove_path_set(&doomed);
            graph.fix_orphan_operators();
        }
    }
}

/// A DAG of logical operators over timestamped predicate leaves.
///
/// The graph is rooted at its outermost operator; every edge carries a
/// timestamp, relative timestamps resolve against the graph's time source.
/// Property graphs are built once from predicate leaves with
/// [`logical_and`](Self::logical_and), [`logical_not`](Self::logical_not) and
/// [`implies`](Self::implies); the long-lived execution graph is rewritten
/// continuously through [`apply_modus_ponens`](Self::apply_modus_ponens).
#[derive(Clone)]
pub struct TimedPropertyGraph {
    graph: ColorizableMultigraph,
    root: Option<NodeId>,
    time_source: TimeSource,
    constant_properties: Vec<Rc<dyn ConstantProperty>>,
    label: Option<String>,
    // Stamp of a graph that has no edges to carry one yet.
    pending_timestamp: Option<Timestamp>,
}

impl fmt::Debug for TimedPropertyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedPropertyGraph")
            .field("label", &self.label)
            .field("root", &self.root.and_then(|r| self.graph.node(r)))
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

impl Default for TimedPropertyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TimedPropertyGraph {
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::global())
    }

    pub fn with_time_source(time_source: TimeSource) -> Self {
        TimedPropertyGraph {
            graph: ColorizableMultigraph::new(),
            root: None,
            time_source,
            constant_properties: Vec::new(),
            label: None,
            pending_timestamp: None,
        }
    }

    /// Single-predicate graph.
    pub fn predicate(name: impl Into<String>, args: Vec<PredicateArg>) -> Self {
        Self::predicate_with_source(name, args, TimeSource::global())
    }

    pub fn predicate_with_source(
        name: impl Into<String>,
        args: Vec<PredicateArg>,
        time_source: TimeSource,
    ) -> Self {
        let mut graph = Self::with_time_source(time_source);
        let id = graph.graph.ensure_node(Node::predicate(name, args));
        graph.root = Some(id);
        graph
    }

    /// The sentinel conclusion marking a state that must never be derived.
    pub fn should_not_happen() -> Self {
        Self::predicate(SHOULD_NOT_HAPPEN, Vec::new())
    }

    /// Canonical event predicate: a method was invoked.
    pub fn call(method: &str) -> Self {
        Self::predicate("call", vec![PredicateArg::Variable(method.to_string())])
    }

    /// Canonical event predicate: an object was passed to a method.
    pub fn called_by(method: &str) -> Self {
        Self::predicate("called_by", vec![PredicateArg::Variable(method.to_string())])
    }

    /// Canonical event predicate: a value was returned by a method.
    pub fn returned_by(method: &str) -> Self {
        Self::predicate(
            "returned_by",
            vec![PredicateArg::Variable(method.to_string())],
        )
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Diagnostic description: the label when one was set, otherwise the
    /// rendering of the root.
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match self.root.and_then(|r| self.graph.node(r)) {
            Some(node) => node.rendering(),
            None => "<empty>".to_string(),
        }
    }

    pub fn time_source(&self) -> &TimeSource {
        &self.time_source
    }

    pub fn add_constant_property(&mut self, property: Rc<dyn ConstantProperty>) {
        self.constant_properties.push(property);
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.root.and_then(|r| self.graph.node(r))
    }

    pub(crate) fn substrate(&self) -> &ColorizableMultigraph {
        &self.graph
    }

    /// Textual rendering of a node, for callers holding a path or leaf id.
    pub fn node_rendering(&self, id: NodeId) -> Option<String> {
        self.graph.node(id).map(Node::rendering)
    }

    pub fn get_copy(&self) -> Self {
        self.clone()
    }

    fn now(&self) -> Tick {
        self.time_source.now()
    }

    /// Leaves of the graph; predicate nodes by invariant.
    pub fn get_leaves(&self) -> Vec<NodeId> {
        self.graph
            .node_ids()
            .filter(|id| self.graph.out_degree(*id) == 0)
            .collect()
    }

    pub fn is_implication_graph(&self) -> bool {
        match self.root {
            Some(root) => {
                self.graph
                    .node(root)
                    .is_some_and(|n| n.is_operator(OperatorKind::Implies))
                    && self.graph.out_degree(root) > 1
            }
            None => false,
        }
    }

    /// The most recent timestamp carried by any edge, falling back to the
    /// pending stamp of an edgeless graph.
    pub fn most_recent_timestamp(&self) -> Option<Timestamp> {
        let now = self.now();
        self.graph
            .edge_refs()
            .filter_map(|e| self.graph.edge_attrs(e))
            .map(|a| a.timestamp)
            .max_by(|a, b| a.cmp_at(b, now))
            .or(self.pending_timestamp)
    }

    fn default_stamp(&self) -> Timestamp {
        self.most_recent_timestamp().unwrap_or(Timestamp::any_time())
    }

    /// Stamps every edge (or the pending stamp of an edgeless graph).
    /// Only legal before the graph is combined with another one.
    pub fn set_timestamp(&mut self, timestamp: Timestamp) -> Result<(), GraphError> {
        let combined = self.graph.node_ids().any(|id| {
            self.graph.node(id).is_some_and(|n| {
                n.is_operator(OperatorKind::And) || n.is_operator(OperatorKind::Implies)
            })
        });
        if combined {
            return Err(GraphError::InvalidTimestamp);
        }
        if self.graph.edge_count() == 0 {
            self.pending_timestamp = Some(timestamp);
            return Ok(());
        }
        let edges: Vec<EdgeRef> = self.graph.edge_refs().collect();
        for e in edges {
            if let Some(attrs) = self.graph.edge_attrs_mut(e) {
                attrs.timestamp = timestamp;
            }
        }
        Ok(())
    }

    // ---- construction operators ----

    fn link(&mut self, from: NodeId, to: NodeId, attrs: EdgeAttrs) {
        self.graph.add_edge(from, to, attrs);
        if self.root.is_none() || self.root == Some(to) {
            self.root = Some(from);
        }
    }

    /// Merges the other graph's nodes and edges into this one, returning the
    /// id mapping. Nodes are shared by value, so common predicates unify.
    fn absorb(&mut self, other: &TimedPropertyGraph) -> HashMap<NodeId, NodeId> {
        let mut map = HashMap::new();
        for id in other.graph.node_ids() {
            if let Some(node) = other.graph.node(id) {
                map.insert(id, self.graph.ensure_node(node.clone()));
            }
        }
        for e in other.graph.edge_refs() {
            if let Some(attrs) = other.graph.edge_attrs(e) {
                let mut attrs = attrs.clone();
                attrs.in_color = false;
                attrs.out_color = false;
                self.graph.add_edge(map[&e.from], map[&e.to], attrs);
            }
        }
        map
    }

    /// Conjoins the other graph under a fresh `AND` root. Without an explicit
    /// timestamp each new edge takes the most recent timestamp of its operand.
    pub fn logical_and(&mut self, other: &TimedPropertyGraph, timestamp: Option<Timestamp>) {
        if other.is_empty() {
            return;
        }
        let was_empty = self.is_empty();
        let own_stamp = timestamp.unwrap_or_else(|| self.default_stamp());
        let other_stamp = timestamp.unwrap_or_else(|| other.default_stamp());

        let own_root = self.root;
        let other_root = other.root;
        let own_render = own_root
            .and_then(|r| self.graph.node(r))
            .map(Node::rendering);
        let other_render = other_root
            .and_then(|r| other.graph.node(r))
            .map(Node::rendering);

        let map = self.absorb(other);

        match (own_root, other_root) {
            (Some(own_root), Some(other_root)) if !was_empty => {
                let (Some(own_render), Some(other_render)) = (own_render, other_render) else {
                    return;
                };
                let and_id = self
                    .graph
                    .ensure_node(Node::and_of(&own_render, &other_render));
                self.link(and_id, own_root, EdgeAttrs::new(own_stamp));
                self.link(and_id, map[&other_root], EdgeAttrs::new(other_stamp));
                self.pending_timestamp = None;
            }
            (_, Some(other_root)) => {
                self.root = Some(map[&other_root]);
                self.pending_timestamp = other.pending_timestamp;
            }
            _ => {}
        }

        self.apply_constant_properties();
    }

    /// Negates the graph by placing a `NOT` above the root. A double negation
    /// collapses away during normalization.
    pub fn logical_not(&mut self, timestamp: Option<Timestamp>) {
        let Some(root) = self.root else { return };
        let stamp = timestamp.unwrap_or_else(|| self.default_stamp());
        let Some(render) = self.graph.node(root).map(Node::rendering) else {
            return;
        };
        let not_id = self.graph.ensure_node(Node::not_of(&render));
        self.link(not_id, root, EdgeAttrs::new(stamp));
        self.pending_timestamp = None;
        self.fix_orphan_operators();
    }

    /// Turns this graph into the implication `self --> other`.
    pub fn implies(
        &mut self,
        other: &TimedPropertyGraph,
        timestamp: Option<Timestamp>,
    ) -> Result<(), GraphError> {
        let (Some(own_root), Some(other_root)) = (self.root, other.root) else {
            return Err(GraphError::EmptyImplication);
        };
        let assumption_stamp = timestamp.unwrap_or_else(|| self.default_stamp());
        let conclusion_stamp = timestamp.unwrap_or_else(|| other.default_stamp());

        let own_render = self
            .graph
            .node(own_root)
            .map(Node::rendering)
            .ok_or(GraphError::EmptyImplication)?;
        let other_render = other
            .graph
            .node(other_root)
            .map(Node::rendering)
            .ok_or(GraphError::EmptyImplication)?;

        let map = self.absorb(other);
        let impl_id = self
            .graph
            .ensure_node(Node::implies_of(&own_render, &other_render));
        self.link(
            impl_id,
            own_root,
            EdgeAttrs::with_tag(assumption_stamp, ImplicationTag::Assumption),
        );
        self.link(
            impl_id,
            map[&other_root],
            EdgeAttrs::with_tag(conclusion_stamp, ImplicationTag::Conclusion),
        );
        self.pending_timestamp = None;
        Ok(())
    }

    // ---- paths ----

    fn path_timestamp(&self, edges: &[EdgeRef]) -> Timestamp {
        let now = self.now();
        edges
            .iter()
            .filter_map(|e| self.graph.edge_attrs(*e))
            .map(|a| a.timestamp)
            .min_by(|a, b| a.cmp_at(b, now))
            .or(self.pending_timestamp)
            .unwrap_or(Timestamp::any_time())
    }

    fn timed_paths(&self, src: NodeId, dsts: &BTreeSet<NodeId>) -> Vec<TimedPath> {
        self.graph
            .all_simple_edge_paths(src, dsts)
            .into_iter()
            .map(|edges| {
                let leaf = edges.last().map(|e| e.to).unwrap_or(src);
                let timestamp = self.path_timestamp(&edges);
                TimedPath {
                    edges,
                    leaf,
                    timestamp,
                }
            })
            .collect()
    }

    /// All root-to-leaf paths.
    pub fn get_all_paths(&self) -> Vec<TimedPath> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        let leaves: BTreeSet<NodeId> = self.get_leaves().into_iter().collect();
        self.timed_paths(root, &leaves)
    }

    fn not_count(&self, path: &TimedPath) -> usize {
        path.edges
            .iter()
            .filter(|e| {
                self.graph
                    .node(e.from)
                    .is_some_and(|n| n.is_operator(OperatorKind::Not))
            })
            .count()
    }

    fn is_skippable(node: &Node) -> bool {
        node.operator_kind().is_some()
    }

    /// Two root-to-leaf paths logically match when they end at the same
    /// predicate, their negation parities agree, and walking from tail to
    /// head every non-skippable node in one has a logically equal counterpart
    /// in the other. Operator nodes are skippable.
    fn paths_logically_match(
        &self,
        own: &TimedPath,
        other_graph: &TimedPropertyGraph,
        other: &TimedPath,
    ) -> bool {
        if self.not_count(own) % 2 != other_graph.not_count(other) % 2 {
            return false;
        }
        if self.graph.node(own.leaf) != other_graph.graph.node(other.leaf) {
            return false;
        }

        let own_interior: Vec<&Node> = own
            .edges
            .iter()
            .rev()
            .filter_map(|e| self.graph.node(e.from))
            .filter(|n| !Self::is_skippable(n))
            .collect();
        let other_interior: Vec<&Node> = other
            .edges
            .iter()
            .rev()
            .filter_map(|e| other_graph.graph.node(e.from))
            .filter(|n| !Self::is_skippable(n))
            .collect();

        own_interior.len() == other_interior.len()
            && own_interior
                .iter()
                .zip(other_interior.iter())
                .all(|(a, b)| a == b)
    }

    // ---- subgraph containment ----

    /// Finds every combination of own root-to-leaf paths that logically and
    /// temporally forms the other graph.
    pub fn find_equivalent_subgraphs(&self, other: &TimedPropertyGraph) -> SubgraphMatches {
        let now = self.now();
        let (Some(own_root), Some(other_root)) = (self.root, other.root) else {
            return SubgraphMatches::default();
        };

        // Every leaf of the other graph must exist here by value.
        let other_leaves = other.get_leaves();
        let mut own_leaf_ids = BTreeSet::new();
        for leaf in &other_leaves {
            let Some(node) = other.graph.node(*leaf) else {
                return SubgraphMatches::default();
            };
            match self.graph.id_of(node) {
                Some(id) => {
                    own_leaf_ids.insert(id);
                }
                None => return SubgraphMatches::default(),
            }
        }

        let other_leaf_set: BTreeSet<NodeId> = other_leaves.into_iter().collect();
        let other_paths = other.timed_paths(other_root, &other_leaf_set);
        if other_paths.is_empty() {
            return SubgraphMatches::default();
        }
        let own_paths = self.timed_paths(own_root, &own_leaf_ids);

        let mut entries: Vec<(TimedPath, Vec<TimedPath>)> = Vec::new();
        for other_path in other_paths {
            let group: Vec<TimedPath> = own_paths
                .iter()
                .filter(|own_path| self.paths_logically_match(own_path, other, &other_path))
                .cloned()
                .collect();
            if group.is_empty() {
                return SubgraphMatches::default();
            }
            entries.push((other_path, group));
        }

        entries.sort_by(|a, b| a.0.timestamp.cmp_at(&b.0.timestamp, now));
        let matched_paths: Vec<TimedPath> = entries.iter().map(|(p, _)| p.clone()).collect();
        let original_timestamps: Vec<Timestamp> =
            matched_paths.iter().map(|p| p.timestamp).collect();

        let groups: Vec<Vec<TimedPath>> = entries.into_iter().map(|(_, g)| g).collect();
        let mut cases = Vec::new();
        for combo in groups.iter().map(|g| g.iter()).multi_cartesian_product() {
            let paths: Vec<TimedPath> = combo.into_iter().cloned().collect();
            let timestamps: Vec<Timestamp> = paths.iter().map(|p| p.timestamp).collect();
            if sequence_matches(&original_timestamps, &timestamps, now) {
                cases.push(MatchCase { paths, timestamps });
            }
        }

        SubgraphMatches {
            cases,
            matched_paths,
            original_timestamps,
        }
    }

    pub fn contains_property_graph(&self, other: &TimedPropertyGraph) -> bool {
        !self.find_equivalent_subgraphs(other).is_empty()
    }

    // ---- implication handling ----

    fn implication_edges(&self) -> Result<(EdgeRef, EdgeRef), GraphError> {
        let root = self.root.ok_or(GraphError::NotAnImplication)?;
        if !self
            .graph
            .node(root)
            .is_some_and(|n| n.is_operator(OperatorKind::Implies))
        {
            return Err(GraphError::NotAnImplication);
        }
        let mut assumption = None;
        let mut conclusion = None;
        for e in self.graph.out_edge_refs(root) {
            match self.graph.edge_attrs(e).and_then(|a| a.implication) {
                Some(ImplicationTag::Assumption) => assumption = Some(e),
                Some(ImplicationTag::Conclusion) => conclusion = Some(e),
                None => {}
            }
        }
        match (assumption, conclusion) {
            (Some(a), Some(c)) => Ok((a, c)),
            _ => Err(GraphError::NotAnImplication),
        }
    }

    fn inflate_from(&self, sub: ColorizableMultigraph) -> Result<TimedPropertyGraph, GraphError> {
        if sub.is_empty() {
            return Err(GraphError::RootlessSubgraph);
        }
        let roots: Vec<NodeId> = sub
            .node_ids()
            .filter(|id| sub.in_degree(*id) == 0)
            .collect();
        let [root] = roots[..] else {
            return Err(GraphError::RootlessSubgraph);
        };
        Ok(TimedPropertyGraph {
            graph: sub,
            root: Some(root),
            time_source: self.time_source.clone(),
            constant_properties: Vec::new(),
            label: self.label.clone(),
            pending_timestamp: None,
        })
    }

    /// Splits an implication-rooted graph into its assumption and conclusion
    /// parts, each inflated into a standalone graph. An edgeless part keeps
    /// its tag edge's timestamp as pending stamp.
    pub fn get_top_level_implication_subgraphs(
        &self,
    ) -> Result<(TimedPropertyGraph, TimedPropertyGraph), GraphError> {
        let (assumption_edge, conclusion_edge) = self.implication_edges()?;

        let mut parts = Vec::with_capacity(2);
        for edge in [assumption_edge, conclusion_edge] {
            let reachable = self.graph.reachable_from(edge.to);
            let mut part = self.inflate_from(self.graph.induced_subgraph(&reachable))?;
            if part.graph.edge_count() == 0 {
                part.pending_timestamp = self.graph.edge_attrs(edge).map(|a| a.timestamp);
            }
            parts.push(part);
        }
        let conclusion = parts.pop().ok_or(GraphError::RootlessSubgraph)?;
        let assumption = parts.pop().ok_or(GraphError::RootlessSubgraph)?;
        Ok((assumption, conclusion))
    }

    /// Swaps the assumption and conclusion tags of an implication root.
    pub fn switch_implication_parts(&mut self) -> Result<(), GraphError> {
        let (assumption_edge, conclusion_edge) = self.implication_edges()?;
        if let Some(attrs) = self.graph.edge_attrs_mut(assumption_edge) {
            attrs.implication = Some(ImplicationTag::Conclusion);
        }
        if let Some(attrs) = self.graph.edge_attrs_mut(conclusion_edge) {
            attrs.implication = Some(ImplicationTag::Assumption);
        }
        Ok(())
    }

    /// Whether the conclusion of this implication is the sentinel predicate.
    pub fn concludes_should_not_happen(&self) -> bool {
        let Ok((_, conclusion)) = self.get_top_level_implication_subgraphs() else {
            return false;
        };
        conclusion
            .root_node()
            .and_then(Node::as_predicate)
            .is_some_and(|p| p.name() == SHOULD_NOT_HAPPEN)
    }

    // ---- modus ponens ----

    /// One application per matching of the implication's assumption inside
    /// this graph. An empty or leafless assumption yields no applications.
    pub fn find_all_possible_modus_ponens(
        &self,
        implication: &TimedPropertyGraph,
    ) -> Result<Vec<ModusPonensApplication>, GraphError> {
        let (assumption, _) = implication.get_top_level_implication_subgraphs()?;
        let matches = self.find_equivalent_subgraphs(&assumption);
        Ok(matches
            .cases
            .into_iter()
            .map(|case| {
                let predicate_renderings = case
                    .paths
                    .iter()
                    .filter_map(|p| self.graph.node(p.leaf))
                    .map(Node::rendering)
                    .collect();
                ModusPonensApplication {
                    implication: implication.get_copy(),
                    case,
                    predicate_renderings,
                }
            })
            .collect())
    }

    /// Rewrites the matched assumption into the implication's conclusion:
    /// deletes the matched paths, grafts a copy of the conclusion with its
    /// relative timestamps rebound to the assumption moment, and reconnects
    /// it at the deepest node the matched paths share (the root when they
    /// share no prefix).
    pub fn apply_modus_ponens(
        &mut self,
        application: &ModusPonensApplication,
    ) -> Result<(), GraphError> {
        let now = self.now();
        let (_, mut conclusion) = application
            .implication
            .get_top_level_implication_subgraphs()?;

        let moment_stamp = application.assumption_moment(now);
        let moment = moment_stamp
            .absolute_value()
            .unwrap_or_else(|| moment_stamp.order_key(now).0);

        self.logically_remove_path_set(&application.case.paths);
        let conclusion_becomes_root = self.graph.is_empty();

        conclusion.rebind_relative_timestamps(moment);
        let conclusion_stamp = conclusion
            .most_recent_timestamp()
            .unwrap_or(Timestamp::Absolute(moment));
        let conclusion_root = conclusion.root.ok_or(GraphError::RootlessSubgraph)?;
        let map = self.absorb(&conclusion);
        let grafted_root = map[&conclusion_root];

        if conclusion_becomes_root {
            self.root = Some(grafted_root);
            self.pending_timestamp = conclusion.pending_timestamp;
        } else {
            let anchor = self
                .deepest_common_node(&application.case.paths)
                .or(self.root)
                .ok_or(GraphError::RootlessSubgraph)?;
            let anchor_render = self
                .graph
                .node(anchor)
                .map(Node::rendering)
                .ok_or(GraphError::RootlessSubgraph)?;
            let grafted_render = self
                .graph
                .node(grafted_root)
                .map(Node::rendering)
                .ok_or(GraphError::RootlessSubgraph)?;

            // Kept distinct from any structural twin already in the graph.
            let and_id = self
                .graph
                .ensure_node(Node::unique_and_of(&anchor_render, &grafted_render));

            let predecessors: Vec<EdgeRef> = self.graph.in_edge_refs(anchor).collect();
            for pe in predecessors {
                if let Some(attrs) = self.graph.remove_edge(pe) {
                    self.graph.add_edge(pe.from, and_id, attrs);
                }
            }
            let old_part_stamp = self.default_stamp();
            self.graph.add_edge(and_id, anchor, EdgeAttrs::new(old_part_stamp));
            self.graph
                .add_edge(and_id, grafted_root, EdgeAttrs::new(conclusion_stamp));
            if self.root == Some(anchor) {
                self.root = Some(and_id);
            }
            self.fix_orphan_operators();
        }

        self.apply_constant_properties();
        Ok(())
    }

    fn rebind_relative_timestamps(&mut self, moment: Tick) {
        let edges: Vec<EdgeRef> = self.graph.edge_refs().collect();
        for e in edges {
            if let Some(attrs) = self.graph.edge_attrs_mut(e) {
                if let Some(delta) = attrs.timestamp.relative_value() {
                    attrs.timestamp = Timestamp::Absolute(moment + delta);
                }
            }
        }
        if let Some(delta) = self.pending_timestamp.and_then(|t| t.relative_value()) {
            self.pending_timestamp = Some(Timestamp::Absolute(moment + delta));
        }
    }

    /// The deepest node still in the graph that all paths reach over a shared
    /// edge prefix; `None` when even the paths' head node is gone.
    fn deepest_common_node(&self, paths: &[TimedPath]) -> Option<NodeId> {
        let first = paths.first()?;
        if first.edges.is_empty() {
            return self.root;
        }
        let mut common = first.edges[0].from;
        if !self.graph.has_node(common) {
            return None;
        }
        let min_len = paths.iter().map(|p| p.edges.len()).min().unwrap_or(0);
        for i in 0..min_len {
            let edge = first.edges[i];
            let shared = paths.iter().all(|p| p.edges[i] == edge);
            if shared && self.graph.has_node(edge.to) {
                common = edge.to;
            } else {
                break;
            }
        }
        Some(common)
    }

    // ---- removal and normalization ----

    /// Removes a set of paths from the graph through edge colorization, so
    /// that structure shared with unmatched paths survives.
    fn logically_remove_path_set(&mut self, paths: &[TimedPath]) {
        if paths.is_empty() {
            return;
        }
        if paths.iter().any(|p| p.edges.is_empty()) {
            // An empty path stands for a single-node graph; removing it
            // consumes the node.
            if self.graph.edge_count() == 0 {
                if let Some(root) = self.root.take() {
                    self.graph.remove_node(root);
                }
                self.pending_timestamp = None;
            }
            return;
        }
        for p in paths {
            self.graph.colorize_path(&p.edges);
        }
        self.graph.build_colorization_scheme();
        self.graph.disconnect_fully_colorized_sub_dag();
        self.graph.clear_colorization();
        if self.graph.is_empty() {
            self.root = None;
            self.pending_timestamp = None;
        } else {
            self.repair_root();
        }
    }

    /// Restores a unique root after deletions. If the deletion split the
    /// graph into several components, they are rejoined under a fresh
    /// conjunction so everything stays reachable from one root.
    fn repair_root(&mut self) {
        if let Some(root) = self.root {
            if self.graph.has_node(root) {
                return;
            }
        }
        let heads: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|id| self.graph.in_degree(*id) == 0)
            .collect();
        match heads[..] {
            [] => self.root = None,
            [single] => self.root = Some(single),
            _ => {
                let renderings: Vec<String> = heads
                    .iter()
                    .filter_map(|id| self.graph.node(*id))
                    .map(Node::rendering)
                    .collect();
                let refs: Vec<&str> = renderings.iter().map(String::as_str).collect();
                let and_node = Node::Operator(OperatorNode::new_unique(OperatorKind::And, &refs));
                let and_id = self.graph.ensure_node(and_node);
                let stamp = self.default_stamp();
                for head in heads {
                    self.graph.add_edge(and_id, head, EdgeAttrs::new(stamp));
                }
                self.root = Some(and_id);
            }
        }
    }

    fn apply_constant_properties(&mut self) {
        let properties = std::mem::take(&mut self.constant_properties);
        for property in &properties {
            property.apply(self);
        }
        self.constant_properties = properties;
    }

    /// Merge of two edge payloads: values from the older edge win, leftover
    /// metadata from the newer one is retained.
    fn merge_retaining_older(&self, a: &EdgeAttrs, b: &EdgeAttrs) -> EdgeAttrs {
        let now = self.now();
        let (older, newer) = if a.timestamp.cmp_at(&b.timestamp, now).is_le() {
            (a, b)
        } else {
            (b, a)
        };
        EdgeAttrs {
            timestamp: older.timestamp,
            implication: older.implication.or(newer.implication),
            in_color: false,
            out_color: false,
        }
    }

    /// Restores the structural invariants after a mutation: no childless
    /// operators, no `AND` with fewer than two children, no consecutive
    /// `NOT` pair. Idempotent.
    fn fix_orphan_operators(&mut self) {
        self.prune_childless_operators();
        self.remove_orphan_and_operators();
        self.collapse_sequential_not_operators();
    }

    fn prune_childless_operators(&mut self) {
        loop {
            let doomed: Vec<NodeId> = self
                .graph
                .node_ids()
                .filter(|id| {
                    self.graph.out_degree(*id) == 0
                        && self
                            .graph
                            .node(*id)
                            .is_some_and(|n| n.operator_kind().is_some())
                })
                .collect();
            if doomed.is_empty() {
                break;
            }
            for id in doomed {
                if self.root == Some(id) {
                    self.root = None;
                }
                self.graph.remove_node(id);
            }
        }
        if self.root.is_none() && !self.graph.is_empty() {
            self.repair_root();
        }
    }

    fn remove_orphan_and_operators(&mut self) {
        loop {
            let orphan = self.graph.node_ids().find(|id| {
                self.graph
                    .node(*id)
                    .is_some_and(|n| n.is_operator(OperatorKind::And))
                    && self.graph.out_degree(*id) < 2
            });
            let Some(and_id) = orphan else { break };
            self.splice_out_operator(and_id);
        }
    }

    /// Removes a single-child operator by reconnecting its child to each of
    /// its parents, keeping metadata from the edge with the older timestamp.
    /// A root operator instead hands its edge data down to the child.
    fn splice_out_operator(&mut self, id: NodeId) {
        let Some(successor) = self.graph.out_edge_refs(id).next() else {
            if self.root == Some(id) {
                self.root = None;
            }
            self.graph.remove_node(id);
            return;
        };
        let Some(successor_attrs) = self.graph.edge_attrs(successor).cloned() else {
            return;
        };
        let child = successor.to;
        let predecessors: Vec<EdgeRef> = self.graph.in_edge_refs(id).collect();

        if predecessors.is_empty() {
            self.root = Some(child);
            self.graph.remove_node(id);
            self.propagate_attrs_down(child, &successor_attrs);
        } else {
            for pe in predecessors {
                if let Some(pred_attrs) = self.graph.edge_attrs(pe).cloned() {
                    let merged = self.merge_retaining_older(&pred_attrs, &successor_attrs);
                    self.graph.add_edge(pe.from, child, merged);
                }
            }
            self.graph.remove_node(id);
        }
    }

    fn collapse_sequential_not_operators(&mut self) {
        loop {
            let pair = self.graph.edge_refs().find(|e| {
                self.graph
                    .node(e.from)
                    .is_some_and(|n| n.is_operator(OperatorKind::Not))
                    && self
                        .graph
                        .node(e.to)
                        .is_some_and(|n| n.is_operator(OperatorKind::Not))
            });
            let Some(between) = pair else { break };
            self.collapse_not_pair(between);
        }
    }

    fn collapse_not_pair(&mut self, between: EdgeRef) {
        let upper = between.from;
        let lower = between.to;
        let Some(between_attrs) = self.graph.edge_attrs(between).cloned() else {
            return;
        };
        let Some(lower_out) = self.graph.out_edge_refs(lower).next() else {
            // A childless NOT pair; pruning handles the remains.
            self.graph.remove_node(upper);
            self.graph.remove_node(lower);
            self.prune_childless_operators();
            return;
        };
        let Some(lower_out_attrs) = self.graph.edge_attrs(lower_out).cloned() else {
            return;
        };
        let target = lower_out.to;
        let merged = self.merge_retaining_older(&between_attrs, &lower_out_attrs);
        let predecessors: Vec<EdgeRef> = self.graph.in_edge_refs(upper).collect();

        if predecessors.is_empty() {
            self.root = Some(target);
            self.graph.remove_node(upper);
            self.graph.remove_node(lower);
            self.propagate_attrs_down(target, &merged);
        } else {
            for pe in predecessors {
                if let Some(pred_attrs) = self.graph.edge_attrs(pe).cloned() {
                    let joined = self.merge_retaining_older(&pred_attrs, &merged);
                    self.graph.add_edge(pe.from, target, joined);
                }
            }
            self.graph.remove_node(upper);
            self.graph.remove_node(lower);
        }
    }

    /// When a spliced-out root's edge data has nowhere to go, fold it into
    /// the edges below the surviving node; an edgeless survivor keeps it as
    /// pending stamp.
    fn propagate_attrs_down(&mut self, node: NodeId, attrs: &EdgeAttrs) {
        let outs: Vec<EdgeRef> = self.graph.out_edge_refs(node).collect();
        if outs.is_empty() {
            self.pending_timestamp = Some(attrs.timestamp);
            return;
        }
        for e in outs {
            if let Some(deeper) = self.graph.edge_attrs(e).cloned() {
                let merged = self.merge_retaining_older(attrs, &deeper);
                if let Some(slot) = self.graph.edge_attrs_mut(e) {
                    *slot = merged;
                }
            }
        }
    }

    // ---- subgraph extraction ----

    /// The edge-subgraph of everything stamped as holding right now. Empty
    /// when nothing matches the present tick.
    pub fn get_present_time_subgraph(&self) -> Result<TimedPropertyGraph, GraphError> {
        let now = self.now();
        let probe = Timestamp::Absolute(now);
        let present: Vec<EdgeRef> = self
            .graph
            .edge_refs()
            .filter(|e| {
                self.graph
                    .edge_attrs(*e)
                    .is_some_and(|a| a.timestamp.matches(&probe, now))
            })
            .collect();

        if present.is_empty() {
            if self.graph.edge_count() == 0
                && self
                    .pending_timestamp
                    .is_some_and(|t| t.matches(&probe, now))
            {
                return Ok(self.get_copy());
            }
            return Ok(TimedPropertyGraph::with_time_source(self.time_source.clone()));
        }

        let mut subgraph = self.inflate_from(self.graph.edge_subgraph(&present))?;
        subgraph.fix_orphan_operators();
        Ok(subgraph)
    }

    /// One single-path graph per root-to-leaf path to each predicate leaf.
    pub fn get_basic_predicates(&self) -> Vec<TimedPropertyGraph> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        let mut result = Vec::new();
        let predicate_ids: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|id| self.graph.node(*id).is_some_and(Node::is_predicate))
            .collect();

        for pid in predicate_ids {
            for path in self.graph.all_simple_edge_paths(root, &BTreeSet::from([pid])) {
                let mut copy = self.get_copy();
                copy.retain_only_path(&path);
                copy.fix_orphan_operators();
                result.push(copy);
            }
        }
        result
    }

    /// Keeps only the edges on the given path prefix and on paths extending
    /// it to the leaves; everything else is removed.
    fn retain_only_path(&mut self, path: &[EdgeRef]) {
        let Some(last) = path.last() else {
            return;
        };
        let mut keep: BTreeSet<EdgeRef> = path.iter().copied().collect();
        let leaves: BTreeSet<NodeId> = self.get_leaves().into_iter().collect();
        for suffix in self.graph.all_simple_edge_paths(last.to, &leaves) {
            keep.extend(suffix);
        }
        let doomed: Vec<EdgeRef> = self
            .graph
            .edge_refs()
            .filter(|e| !keep.contains(e))
            .collect();
        for e in doomed {
            self.graph.remove_edge(e);
        }
        let isolated: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|id| self.graph.in_degree(*id) == 0 && self.graph.out_degree(*id) == 0)
            .filter(|id| Some(*id) != path.first().map(|e| e.from))
            .collect();
        for id in isolated {
            self.graph.remove_node(id);
        }
        self.repair_root();
    }

    /// Restamps the first equivalent occurrence of the given subgraph.
    pub fn update_subgraph_timestamp(
        &mut self,
        subgraph: &TimedPropertyGraph,
        timestamp: Timestamp,
    ) -> Result<(), GraphError> {
        let matches = self.find_equivalent_subgraphs(subgraph);
        if matches.cases.is_empty() {
            return Err(GraphError::SubgraphNotFound);
        }
        if matches.cases.len() > 1 {
            warn!(
                subgraph = %subgraph.describe(),
                cases = matches.cases.len(),
                "more than one match while updating subgraph timestamp; using the first"
            );
        }
        let case = &matches.cases[0];
        for path in &case.paths {
            if path.edges.is_empty() {
                self.pending_timestamp = Some(timestamp);
                continue;
            }
            for e in &path.edges {
                if let Some(attrs) = self.graph.edge_attrs_mut(*e) {
                    attrs.timestamp = timestamp;
                }
            }
        }
        Ok(())
    }

    /// Structural integrity check: unique root reaching every node, `AND`
    /// nodes with at least two children, single-child `NOT` nodes never
    /// stacked, tagged implication roots, predicate leaves.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.graph.is_empty() {
            return match self.root {
                None => Ok(()),
                Some(_) => Err("root set on an empty graph".to_string()),
            };
        }
        let root = self
            .root
            .ok_or_else(|| "graph has nodes but no root".to_string())?;
        if self.graph.in_degree(root) != 0 {
            return Err("root has incoming edges".to_string());
        }
        let reachable = self.graph.reachable_from(root);
        if reachable.len() != self.graph.node_count() {
            return Err(format!(
                "{} of {} nodes unreachable from root",
                self.graph.node_count() - reachable.len(),
                self.graph.node_count()
            ));
        }
        for id in self.graph.node_ids() {
            let Some(node) = self.graph.node(id) else {
                continue;
            };
            match node.operator_kind() {
                Some(OperatorKind::And) => {
                    if self.graph.out_degree(id) < 2 {
                        return Err(format!("AND node {} has fewer than two children", node));
                    }
                }
                Some(OperatorKind::Not) => {
                    if self.graph.out_degree(id) != 1 {
                        return Err(format!("NOT node {} does not have one child", node));
                    }
                    for e in self.graph.out_edge_refs(id) {
                        if self
                            .graph
                            .node(e.to)
                            .is_some_and(|n| n.is_operator(OperatorKind::Not))
                        {
                            return Err("consecutive NOT pair".to_string());
                        }
                    }
                }
                Some(OperatorKind::Implies) => {
                    if id == root {
                        self.implication_edges()
                            .map_err(|_| "implication root lacks tagged edges".to_string())?;
                        if self.graph.out_degree(root) != 2 {
                            return Err("implication root does not have two edges".to_string());
                        }
                    }
                }
                None => {
                    if self.graph.out_degree(id) != 0 {
                        return Err(format!("predicate {} is not a leaf", node));
                    }
                }
            }
        }
        Ok(())
    }

    /// Edges stamped strictly later than now; the outstanding obligations a
    /// monitor checks at teardown.
    pub fn future_stamped_leaves(&self) -> Vec<String> {
        let now = self.now();
        let mut future: BTreeSet<String> = BTreeSet::new();
        for e in self.graph.edge_refs() {
            let later = self
                .graph
                .edge_attrs(e)
                .and_then(|a| a.timestamp.absolute_value())
                .is_some_and(|t| t > now);
            if !later {
                continue;
            }
            for id in self.graph.reachable_from(e.to) {
                if let Some(node) = self.graph.node(id) {
                    if node.is_predicate() {
                        future.insert(node.rendering());
                    }
                }
            }
        }
        if let Some(t) = self.pending_timestamp.and_then(|t| t.absolute_value()) {
            if t > now {
                if let Some(node) = self.root_node() {
                    future.insert(node.rendering());
                }
            }
        }
        future.into_iter().collect()
    }
}
