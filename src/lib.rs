//! Theorem-proving engine for runtime program-behavior monitoring.
//!
//! Temporal formulas are represented as timed property graphs: DAGs of
//! logical operators over timestamped predicate leaves. Observed events are
//! conjoined into a long-lived execution graph; declared properties of the
//! form assumption --> conclusion are matched against it and applied through
//! modus ponens as a graph rewrite. A property concluding in the
//! should-not-happen sentinel reports a violation the moment its assumption
//! is derivable.

pub mod error;
pub mod export;
pub mod monitor;
pub mod multigraph;
pub mod operators;
pub mod property_graph;
pub mod prover;
pub mod time;
pub mod timestamp;

pub use error::{GraphError, ProverError};
pub use monitor::RuntimeMonitor;
pub use multigraph::{ColorizableMultigraph, EdgeAttrs, EdgeRef, ImplicationTag, NodeId};
pub use operators::{
    Node, OperatorKind, OperatorNode, PredicateArg, PredicateNode, SHOULD_NOT_HAPPEN,
};
pub use property_graph::{
    ConstantProperty, MatchCase, ModusPonensApplication,
    NoPositiveAndNegativePredicatesSimultaneously, SubgraphMatches, TimedPath,
    TimedPropertyGraph,
};
pub use prover::{
    BetterNextTheoremSelector, HybridNextTheoremSelector, NextTheoremSelector, ProofReport,
    ProofStep, ProverConfig, ProverStats, RandomNextTheoremSelector, TerminationReason,
    TheoremProver,
};
pub use time::{Tick, TimeSource};
pub use timestamp::{Timestamp, sequence_matches};
