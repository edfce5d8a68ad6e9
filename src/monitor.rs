use std::rc::Rc;

use tracing::debug;

use crate::error::{GraphError, ProverError};
use crate::property_graph::{
    NoPositiveAndNegativePredicatesSimultaneously, TimedPropertyGraph,
};
use crate::prover::{NextTheoremSelector, ProverConfig, TheoremProver};
use crate::time::{Tick, TimeSource};
use crate::timestamp::Timestamp;

/// Accumulates observed events into an execution graph and re-proves the
/// declared properties after every event.
///
/// Each event is a single-predicate graph. It is stamped with the next tick
/// of the monitor's time source; if the execution graph already expects the
/// predicate at a future moment (a conclusion produced by an earlier
/// rewrite), the event discharges that expectation by restamping it instead
/// of conjoining a new copy. [`finalize`](Self::finalize) performs the
/// teardown check: an expectation still pending in the future means an
/// event that was promised never happened.
pub struct RuntimeMonitor<S: NextTheoremSelector> {
    execution: TimedPropertyGraph,
    properties: Vec<TimedPropertyGraph>,
    prover: TheoremProver<S>,
    time_source: TimeSource,
}

impl<S: NextTheoremSelector> RuntimeMonitor<S> {
    pub fn new(properties: Vec<TimedPropertyGraph>, selector: S) -> Self {
        Self::with_time_source(properties, selector, TimeSource::global())
    }

    pub fn with_time_source(
        properties: Vec<TimedPropertyGraph>,
        selector: S,
        time_source: TimeSource,
    ) -> Self {
        let mut execution = TimedPropertyGraph::with_time_source(time_source.clone());
        execution.add_constant_property(Rc::new(NoPositiveAndNegativePredicatesSimultaneously));
        RuntimeMonitor {
            execution,
            properties,
            prover: TheoremProver::with_config(selector, ProverConfig::default()),
            time_source,
        }
    }

    pub fn execution(&self) -> &TimedPropertyGraph {
        &self.execution
    }

    /// Observes one event: stamps it, folds it into the execution graph, and
    /// re-proves every property. Returns the tick assigned to the event.
    pub fn add_event(&mut self, event: &TimedPropertyGraph) -> Result<Tick, ProverError> {
        let tick = self.time_source.stamp_and_increment();

        if self.discharge_expectation(event, tick)? {
            debug!(event = %event.describe(), tick, "event discharged a pending expectation");
        } else {
            let mut stamped = event.get_copy();
            stamped.set_timestamp(Timestamp::Absolute(tick))?;
            self.execution.logical_and(&stamped, None);
        }

        self.prover
            .prove_set_of_properties(&self.properties, &mut self.execution)?;
        Ok(tick)
    }

    /// Restamps a matching future-stamped occurrence of the event predicate,
    /// if one exists. Only future occurrences qualify; past assertions of the
    /// same predicate are separate facts, not expectations.
    fn discharge_expectation(
        &mut self,
        event: &TimedPropertyGraph,
        tick: Tick,
    ) -> Result<bool, ProverError> {
        let mut probe = event.get_copy();
        probe.set_timestamp(Timestamp::Interval {
            lo: tick,
            hi: Tick::MAX,
        })?;
        match self
            .execution
            .update_subgraph_timestamp(&probe, Timestamp::Absolute(tick))
        {
            Ok(()) => Ok(true),
            Err(GraphError::SubgraphNotFound) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    /// Teardown check: proves once more, then reports a violation if any
    /// promised event is still outstanding in the future.
    pub fn finalize(mut self) -> Result<TimedPropertyGraph, ProverError> {
        self.prover
            .prove_set_of_properties(&self.properties, &mut self.execution)?;

        let outstanding = self.execution.future_stamped_leaves();
        if outstanding.is_empty() {
            return Ok(self.execution);
        }

        // The violated property is the one whose conclusion promised an
        // outstanding predicate.
        let property = self
            .properties
            .iter()
            .find(|p| {
                p.get_top_level_implication_subgraphs()
                    .map(|(_, conclusion)| {
                        conclusion.get_leaves().iter().any(|id| {
                            conclusion
                                .node_rendering(*id)
                                .is_some_and(|r| outstanding.contains(&r))
                        })
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .unwrap_or_else(|| {
                self.properties
                    .first()
                    .cloned()
                    .unwrap_or_else(TimedPropertyGraph::new)
            });

        Err(ProverError::PropertyNotHolds {
            property: Box::new(property),
            snapshot: Box::new(self.execution.get_copy()),
        })
    }
}
