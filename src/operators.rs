use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Predicate name of the sentinel conclusion a property uses to mark a state
/// that must never be derived.
pub const SHOULD_NOT_HAPPEN: &str = "should_not_happen";

static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

/// Argument of a predicate: an opaque monitored-variable symbol or a nested
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PredicateArg {
    Variable(String),
    Predicate(Box<PredicateNode>),
}

impl fmt::Display for PredicateArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateArg::Variable(name) => write!(f, "{}", name),
            PredicateArg::Predicate(p) => write!(f, "{}", p),
        }
    }
}

/// An atomic fact with a name and ordered arguments. Two predicate nodes are
/// the same node exactly when their textual renderings coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredicateNode {
    name: String,
    args: Vec<PredicateArg>,
}

impl PredicateNode {
    pub fn new(name: impl Into<String>, args: Vec<PredicateArg>) -> Self {
        PredicateNode {
            name: name.into(),
            args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[PredicateArg] {
        &self.args
    }

    pub fn rendering(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PredicateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let rendered = format!("{}({})", self.name, args);
        write!(f, "{}", rendered.replace(' ', "_"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatorKind {
    And,
    Not,
    Implies,
}

impl OperatorKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            OperatorKind::And => "AND",
            OperatorKind::Not => "NOT",
            OperatorKind::Implies => "-->",
        }
    }

    /// Operand order is significant only for implication.
    fn order_matters(&self) -> bool {
        matches!(self, OperatorKind::Implies)
    }
}

/// A logical operator node. Identity derives from the renderings of its
/// operands, so two operators over the same operands are one node; a node
/// built with [`OperatorNode::new_unique`] opts out and stays distinct even
/// from structural twins, which rewrites rely on when they splice a fresh
/// conjunction into a graph that may already contain its lookalike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorNode {
    kind: OperatorKind,
    rendering: String,
    unique: Option<u64>,
}

impl OperatorNode {
    pub fn new(kind: OperatorKind, operands: &[&str]) -> Self {
        OperatorNode {
            kind,
            rendering: Self::render(kind, operands),
            unique: None,
        }
    }

    pub fn new_unique(kind: OperatorKind, operands: &[&str]) -> Self {
        OperatorNode {
            kind,
            rendering: Self::render(kind, operands),
            unique: Some(NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed)),
        }
    }

    fn render(kind: OperatorKind, operands: &[&str]) -> String {
        let mut parts: Vec<&str> = operands.to_vec();
        if !kind.order_matters() {
            parts.sort_unstable();
        }
        if parts.len() == 1 {
            format!("{}{}", kind.symbol(), parts[0])
        } else {
            parts.join(kind.symbol())
        }
    }

    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    pub fn rendering(&self) -> &str {
        &self.rendering
    }

    pub fn is_unique(&self) -> bool {
        self.unique.is_some()
    }

    /// Operators act the same way when they share kind and operand set.
    pub fn logically_matches(&self, other: &OperatorNode) -> bool {
        self.kind == other.kind && self.rendering == other.rendering
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rendering)
    }
}

/// A node of a timed property graph: a logical operator or a predicate leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Operator(OperatorNode),
    Predicate(PredicateNode),
}

impl Node {
    pub fn and_of(left: &str, right: &str) -> Node {
        Node::Operator(OperatorNode::new(OperatorKind::And, &[left, right]))
    }

    pub fn unique_and_of(left: &str, right: &str) -> Node {
        Node::Operator(OperatorNode::new_unique(OperatorKind::And, &[left, right]))
    }

    pub fn not_of(operand: &str) -> Node {
        Node::Operator(OperatorNode::new(OperatorKind::Not, &[operand]))
    }

    pub fn implies_of(assumption: &str, conclusion: &str) -> Node {
        Node::Operator(OperatorNode::new(
            OperatorKind::Implies,
            &[assumption, conclusion],
        ))
    }

    pub fn predicate(name: impl Into<String>, args: Vec<PredicateArg>) -> Node {
        Node::Predicate(PredicateNode::new(name, args))
    }

    pub fn operator_kind(&self) -> Option<OperatorKind> {
        match self {
            Node::Operator(op) => Some(op.kind()),
            Node::Predicate(_) => None,
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self, Node::Predicate(_))
    }

    pub fn is_operator(&self, kind: OperatorKind) -> bool {
        self.operator_kind() == Some(kind)
    }

    pub fn as_predicate(&self) -> Option<&PredicateNode> {
        match self {
            Node::Predicate(p) => Some(p),
            Node::Operator(_) => None,
        }
    }

    pub fn rendering(&self) -> String {
        self.to_string()
    }

    /// Rendering guaranteed distinct between forced-unique twins, for export
    /// formats that need one id per node.
    pub fn export_id(&self) -> String {
        match self {
            Node::Operator(OperatorNode {
                rendering,
                unique: Some(id),
                ..
            }) => format!("{}#{}", rendering, id),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Operator(op) => write!(f, "{}", op.rendering()),
            Node::Predicate(p) => write!(f, "{}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> PredicateArg {
        PredicateArg::Variable(name.to_string())
    }

    #[test]
    fn test_predicate_rendering() {
        let p = PredicateNode::new("call", vec![var("acquire")]);
        assert_eq!(p.rendering(), "call(acquire)");
    }

    #[test]
    fn test_predicate_rendering_replaces_spaces() {
        let p = PredicateNode::new("returned by", vec![var("m")]);
        assert_eq!(p.rendering(), "returned_by(m)");
    }

    #[test]
    fn test_predicate_identity_is_rendering() {
        let a = PredicateNode::new("p", vec![var("x"), var("y")]);
        let b = PredicateNode::new("p", vec![var("x"), var("y")]);
        let c = PredicateNode::new("p", vec![var("y"), var("x")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nested_predicate_argument() {
        let inner = PredicateNode::new("q", vec![var("x")]);
        let outer = PredicateNode::new("p", vec![PredicateArg::Predicate(Box::new(inner))]);
        assert_eq!(outer.rendering(), "p(q(x))");
    }

    #[test]
    fn test_and_operand_order_irrelevant() {
        let a = Node::and_of("p(x)", "q(y)");
        let b = Node::and_of("q(y)", "p(x)");
        assert_eq!(a, b);
        assert_eq!(a.rendering(), "p(x)ANDq(y)");
    }

    #[test]
    fn test_implies_operand_order_significant() {
        let a = Node::implies_of("p(x)", "q(y)");
        let b = Node::implies_of("q(y)", "p(x)");
        assert_ne!(a, b);
    }

    #[test]
    fn test_not_rendering_prefixes_symbol() {
        let n = Node::not_of("p(x)");
        assert_eq!(n.rendering(), "NOTp(x)");
    }

    #[test]
    fn test_unique_operators_stay_distinct() {
        let a = Node::unique_and_of("p(x)", "q(y)");
        let b = Node::unique_and_of("p(x)", "q(y)");
        let plain = Node::and_of("p(x)", "q(y)");
        assert_ne!(a, b);
        assert_ne!(a, plain);
        assert_eq!(a.rendering(), plain.rendering());
        assert_ne!(a.export_id(), b.export_id());
    }
}
