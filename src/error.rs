use thiserror::Error;

use crate::property_graph::TimedPropertyGraph;

/// Graph-level failures, distinguishable by the caller.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("implication requires a non-empty assumption and conclusion")]
    EmptyImplication,

    #[error("no equivalent subgraph found")]
    SubgraphNotFound,

    #[error("operation requires an implication-rooted graph")]
    NotAnImplication,

    #[error("timestamps can only be set on a graph that has not been combined yet")]
    InvalidTimestamp,

    #[error("subgraph has no unique root node")]
    RootlessSubgraph,
}

/// Failures surfacing from a proving session.
#[derive(Debug, Error)]
pub enum ProverError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A property derived its forbidden conclusion. Carries the violated
    /// property and a snapshot of the execution graph at detection time.
    #[error("property does not hold: {}", property.describe())]
    PropertyNotHolds {
        property: Box<TimedPropertyGraph>,
        snapshot: Box<TimedPropertyGraph>,
    },
}
