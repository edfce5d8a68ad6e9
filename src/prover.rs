use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::error::ProverError;
use crate::property_graph::{ModusPonensApplication, TimedPropertyGraph};
use crate::time::Tick;
use crate::timestamp::Timestamp;

/// One applied rewrite, remembered for the rest of the proving session.
#[derive(Debug, Clone)]
pub struct ProofStep {
    pub implication_description: String,
    pub predicates: BTreeSet<String>,
    pub moment: Timestamp,
}

impl ProofStep {
    fn from_application(application: &ModusPonensApplication, now: Tick) -> Self {
        ProofStep {
            implication_description: application.implication.describe(),
            predicates: application.predicate_renderings().clone(),
            moment: application.assumption_moment(now),
        }
    }
}

/// Strategy choosing which of several applicable rewrites to perform next.
/// Returns an index into `applications`, or `None` to stop rewriting with
/// the current property.
pub trait NextTheoremSelector {
    fn select_next(
        &mut self,
        graph: &TimedPropertyGraph,
        applications: &[ModusPonensApplication],
        goal: &TimedPropertyGraph,
        history: &[ProofStep],
    ) -> Option<usize>;
}

/// Deterministic selector: prefers the application whose assumption holds
/// earliest, breaking ties towards candidates touching the fewest predicates
/// already rewritten this session, then by stable textual identity.
#[derive(Debug, Default)]
pub struct BetterNextTheoremSelector;

impl NextTheoremSelector for BetterNextTheoremSelector {
    fn select_next(
        &mut self,
        graph: &TimedPropertyGraph,
        applications: &[ModusPonensApplication],
        _goal: &TimedPropertyGraph,
        history: &[ProofStep],
    ) -> Option<usize> {
        let now = graph.time_source().now();
        let rewritten: BTreeSet<&String> =
            history.iter().flat_map(|s| s.predicates.iter()).collect();

        applications
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| {
                let moment_order = a
                    .assumption_moment(now)
                    .cmp_at(&b.assumption_moment(now), now);
                let reuse = |app: &ModusPonensApplication| {
                    app.predicate_renderings()
                        .iter()
                        .filter(|p| rewritten.contains(p))
                        .count()
                };
                moment_order
                    .then_with(|| reuse(a).cmp(&reuse(b)))
                    .then_with(|| a.identity().cmp(&b.identity()))
                    .then(ia.cmp(&ib))
            })
            .map(|(i, _)| i)
    }
}

/// Uniform random selector, the baseline the deterministic one is compared
/// against.
#[derive(Debug)]
pub struct RandomNextTheoremSelector {
    rng: StdRng,
}

impl RandomNextTheoremSelector {
    pub fn new() -> Self {
        RandomNextTheoremSelector {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        RandomNextTheoremSelector {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomNextTheoremSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl NextTheoremSelector for RandomNextTheoremSelector {
    fn select_next(
        &mut self,
        _graph: &TimedPropertyGraph,
        applications: &[ModusPonensApplication],
        _goal: &TimedPropertyGraph,
        _history: &[ProofStep],
    ) -> Option<usize> {
        if applications.is_empty() {
            return None;
        }
        Some(self.rng.gen_range(0..applications.len()))
    }
}

/// Tries the deterministic choice first; when that application's matched
/// paths are no longer present in the graph, defers to the wrapped ranker.
pub struct HybridNextTheoremSelector<R: NextTheoremSelector> {
    deterministic: BetterNextTheoremSelector,
    ranker: R,
}

impl<R: NextTheoremSelector> HybridNextTheoremSelector<R> {
    pub fn new(ranker: R) -> Self {
        HybridNextTheoremSelector {
            deterministic: BetterNextTheoremSelector,
            ranker,
        }
    }
}

impl<R: NextTheoremSelector> NextTheoremSelector for HybridNextTheoremSelector<R> {
    fn select_next(
        &mut self,
        graph: &TimedPropertyGraph,
        applications: &[ModusPonensApplication],
        goal: &TimedPropertyGraph,
        history: &[ProofStep],
    ) -> Option<usize> {
        if let Some(choice) = self
            .deterministic
            .select_next(graph, applications, goal, history)
        {
            if applications[choice].preconditions_hold(graph) {
                return Some(choice);
            }
        }
        self.ranker.select_next(graph, applications, goal, history)
    }
}

/// Configuration for a proving session.
#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// Maximum number of rewrites per property before forced termination.
    pub max_iterations: Option<usize>,

    /// Whether to track detailed statistics during execution.
    pub track_statistics: bool,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            max_iterations: Some(10_000),
            track_statistics: false,
        }
    }
}

impl ProverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set maximum rewrites per property.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Builder method: enable unlimited rewrites.
    pub fn unlimited_iterations(mut self) -> Self {
        self.max_iterations = None;
        self
    }

    /// Builder method: enable statistics tracking.
    pub fn with_statistics(mut self) -> Self {
        self.track_statistics = true;
        self
    }
}

/// Statistics collected while proving.
#[derive(Debug, Default, Clone)]
pub struct ProverStats {
    /// Properties examined.
    pub properties_checked: usize,

    /// Candidate applications seen across all rounds.
    pub candidates_seen: usize,

    /// Rewrites actually applied.
    pub applications_performed: usize,

    /// Rounds in which the selector declined every candidate.
    pub selector_stops: usize,
}

/// Outcome of one [`TheoremProver::prove_set_of_properties`] call.
#[derive(Debug, Clone)]
pub struct ProofReport {
    pub stats: Option<ProverStats>,
    pub termination: TerminationReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// No property has an applicable rewrite left.
    Exhausted,

    /// The per-property iteration bound was reached.
    MaxIterationsReached,
}

/// Drives modus ponens over an execution graph: for each property, keep
/// finding applications of its assumption, let the selector pick one, and
/// rewrite, until nothing applies. Deriving a property whose conclusion is
/// the should-not-happen sentinel aborts with [`ProverError::PropertyNotHolds`].
pub struct TheoremProver<S: NextTheoremSelector> {
    selector: S,
    config: ProverConfig,
    history: Vec<ProofStep>,
}

impl Default for TheoremProver<BetterNextTheoremSelector> {
    fn default() -> Self {
        TheoremProver::new(BetterNextTheoremSelector)
    }
}

impl<S: NextTheoremSelector> TheoremProver<S> {
    pub fn new(selector: S) -> Self {
        TheoremProver {
            selector,
            config: ProverConfig::default(),
            history: Vec::new(),
        }
    }

    pub fn with_config(selector: S, config: ProverConfig) -> Self {
        TheoremProver {
            selector,
            config,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ProofStep] {
        &self.history
    }

    pub fn prove_set_of_properties(
        &mut self,
        properties: &[TimedPropertyGraph],
        execution: &mut TimedPropertyGraph,
    ) -> Result<ProofReport, ProverError> {
        let mut stats = ProverStats::default();
        let mut termination = TerminationReason::Exhausted;

        for property in properties {
            stats.properties_checked += 1;
            let mut iterations = 0usize;
            loop {
                if let Some(max) = self.config.max_iterations {
                    if iterations >= max {
                        debug!(property = %property.describe(), "iteration bound reached");
                        termination = TerminationReason::MaxIterationsReached;
                        break;
                    }
                }
                iterations += 1;

                let applications = execution.find_all_possible_modus_ponens(property)?;
                if applications.is_empty() {
                    break;
                }
                stats.candidates_seen += applications.len();

                let chosen = self.selector.select_next(
                    execution,
                    &applications,
                    property,
                    &self.history,
                );
                let Some(index) = chosen else {
                    stats.selector_stops += 1;
                    break;
                };

                if property.concludes_should_not_happen() {
                    return Err(ProverError::PropertyNotHolds {
                        property: Box::new(property.get_copy()),
                        snapshot: Box::new(execution.get_copy()),
                    });
                }

                let application = &applications[index];
                trace!(
                    property = %property.describe(),
                    candidates = applications.len(),
                    chosen = index,
                    "applying modus ponens"
                );
                execution.apply_modus_ponens(application)?;
                let now = execution.time_source().now();
                self.history
                    .push(ProofStep::from_application(application, now));
                stats.applications_performed += 1;
            }
        }

        Ok(ProofReport {
            stats: self.config.track_statistics.then_some(stats),
            termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_graph::TimedPropertyGraph;
    use crate::time::TimeSource;

    fn stamped(name: &str, t: Tick, source: &TimeSource) -> TimedPropertyGraph {
        let mut g =
            TimedPropertyGraph::predicate_with_source(name, Vec::new(), source.clone());
        g.set_timestamp(Timestamp::Absolute(t))
            .expect("fresh predicate accepts a stamp");
        g
    }

    fn any_stamped(name: &str, source: &TimeSource) -> TimedPropertyGraph {
        let mut g =
            TimedPropertyGraph::predicate_with_source(name, Vec::new(), source.clone());
        g.set_timestamp(Timestamp::any_time())
            .expect("fresh predicate accepts a stamp");
        g
    }

    fn implication(
        assumption: TimedPropertyGraph,
        conclusion: TimedPropertyGraph,
    ) -> TimedPropertyGraph {
        let mut property = assumption;
        property.implies(&conclusion, None).expect("non-empty sides");
        property
    }

    #[test]
    fn test_prover_applies_simple_implication() {
        let source = TimeSource::new();
        let mut execution = stamped("a", 1, &source);
        execution.logical_and(&stamped("b", 2, &source), None);

        let property = implication(any_stamped("a", &source), any_stamped("c", &source));

        let mut prover = TheoremProver::new(BetterNextTheoremSelector);
        prover
            .prove_set_of_properties(std::slice::from_ref(&property), &mut execution)
            .expect("no sentinel conclusion involved");

        assert!(execution.contains_property_graph(&any_stamped("c", &source)));
        assert!(!execution.contains_property_graph(&any_stamped("a", &source)));
        assert!(execution.contains_property_graph(&any_stamped("b", &source)));
        assert_eq!(prover.history().len(), 1);
    }

    #[test]
    fn test_prover_reports_violation_before_applying() {
        let source = TimeSource::new();
        let mut execution = stamped("a", 1, &source);
        execution.logical_and(&stamped("b", 2, &source), None);

        let mut property = implication(
            any_stamped("a", &source),
            TimedPropertyGraph::should_not_happen(),
        );
        property.set_label("a must never hold");

        let mut prover = TheoremProver::new(BetterNextTheoremSelector);
        let err = prover
            .prove_set_of_properties(std::slice::from_ref(&property), &mut execution)
            .expect_err("sentinel conclusion must violate");

        match err {
            ProverError::PropertyNotHolds { property, snapshot } => {
                assert_eq!(property.describe(), "a must never hold");
                assert!(snapshot.contains_property_graph(&any_stamped("a", &source)));
            }
            other => panic!("unexpected error: {other}"),
        }
        // The execution graph itself is untouched by the violating property.
        assert!(execution.contains_property_graph(&any_stamped("a", &source)));
    }

    #[test]
    fn test_no_applications_terminates_quietly() {
        let source = TimeSource::new();
        let mut execution = stamped("x", 1, &source);
        let property = implication(any_stamped("a", &source), any_stamped("c", &source));

        let mut prover = TheoremProver::new(BetterNextTheoremSelector);
        let report = prover
            .prove_set_of_properties(std::slice::from_ref(&property), &mut execution)
            .expect("nothing to apply");
        assert_eq!(report.termination, TerminationReason::Exhausted);
        assert!(prover.history().is_empty());
    }

    #[test]
    fn test_better_selector_prefers_oldest_assumption() {
        let source = TimeSource::new();
        let mut execution = stamped("a", 5, &source);
        execution.logical_and(&stamped("a", 9, &source), None);

        let property = implication(any_stamped("a", &source), any_stamped("c", &source));
        let applications = execution
            .find_all_possible_modus_ponens(&property)
            .expect("property is an implication");
        assert!(applications.len() >= 2);

        let mut selector = BetterNextTheoremSelector;
        let index = selector
            .select_next(&execution, &applications, &property, &[])
            .expect("candidates exist");
        let moment = applications[index].assumption_moment(source.now());
        assert_eq!(moment.absolute_value(), Some(5));
    }

    #[test]
    fn test_random_selector_is_seed_deterministic() {
        let source = TimeSource::new();
        let mut execution = stamped("a", 1, &source);
        execution.logical_and(&stamped("a", 2, &source), None);
        let property = implication(any_stamped("a", &source), any_stamped("c", &source));
        let applications = execution
            .find_all_possible_modus_ponens(&property)
            .expect("property is an implication");

        let mut first = RandomNextTheoremSelector::with_seed(7);
        let mut second = RandomNextTheoremSelector::with_seed(7);
        assert_eq!(
            first.select_next(&execution, &applications, &property, &[]),
            second.select_next(&execution, &applications, &property, &[])
        );
    }

    #[test]
    fn test_hybrid_falls_back_on_stale_choice() {
        let source = TimeSource::new();
        let mut execution = stamped("a", 1, &source);
        execution.logical_and(&stamped("b", 2, &source), None);
        let property = implication(any_stamped("a", &source), any_stamped("c", &source));
        let applications = execution
            .find_all_possible_modus_ponens(&property)
            .expect("property is an implication");

        // Invalidate the matched paths by rewriting the graph first.
        let mut prover = TheoremProver::new(BetterNextTheoremSelector);
        prover
            .prove_set_of_properties(std::slice::from_ref(&property), &mut execution)
            .expect("rewrite succeeds");

        struct Marker {
            called: bool,
        }
        impl NextTheoremSelector for Marker {
            fn select_next(
                &mut self,
                _graph: &TimedPropertyGraph,
                applications: &[ModusPonensApplication],
                _goal: &TimedPropertyGraph,
                _history: &[ProofStep],
            ) -> Option<usize> {
                self.called = true;
                (!applications.is_empty()).then_some(0)
            }
        }

        let mut hybrid = HybridNextTheoremSelector::new(Marker { called: false });
        hybrid.select_next(&execution, &applications, &property, &[]);
        assert!(hybrid.ranker.called, "stale choice must defer to the ranker");
    }

    #[test]
    fn test_statistics_tracking() {
        let source = TimeSource::new();
        let mut execution = stamped("a", 1, &source);
        execution.logical_and(&stamped("b", 2, &source), None);
        let property = implication(any_stamped("a", &source), any_stamped("c", &source));

        let mut prover = TheoremProver::with_config(
            BetterNextTheoremSelector,
            ProverConfig::new().with_statistics(),
        );
        let report = prover
            .prove_set_of_properties(std::slice::from_ref(&property), &mut execution)
            .expect("rewrite succeeds");
        let stats = report.stats.expect("statistics were requested");
        assert_eq!(stats.properties_checked, 1);
        assert_eq!(stats.applications_performed, 1);
        assert!(stats.candidates_seen >= 1);
    }
}
