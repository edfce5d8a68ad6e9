use timeprop::{TimeSource, TimedPropertyGraph, Timestamp};

fn predicate(name: &str, source: &TimeSource) -> TimedPropertyGraph {
    TimedPropertyGraph::predicate_with_source(name, Vec::new(), source.clone())
}

fn stamped(name: &str, t: i64, source: &TimeSource) -> TimedPropertyGraph {
    let mut g = predicate(name, source);
    g.set_timestamp(Timestamp::Absolute(t)).unwrap();
    g
}

fn any_stamped(name: &str, source: &TimeSource) -> TimedPropertyGraph {
    let mut g = predicate(name, source);
    g.set_timestamp(Timestamp::any_time()).unwrap();
    g
}

#[test]
fn test_and_commutativity_yields_matching_graphs() {
    let source = TimeSource::new();
    let mut left = stamped("p", 1, &source);
    left.logical_and(&stamped("q", 1, &source), None);

    let mut right = stamped("q", 1, &source);
    right.logical_and(&stamped("p", 1, &source), None);

    assert!(left.contains_property_graph(&right));
    assert!(right.contains_property_graph(&left));
}

#[test]
fn test_commuted_assumption_still_applies() {
    // Property assumption and(p, q); execution asserts q first, p second.
    let source = TimeSource::new();
    let mut execution = stamped("q", 1, &source);
    execution.logical_and(&stamped("p", 2, &source), None);

    let mut assumption = any_stamped("p", &source);
    assumption.logical_and(&any_stamped("q", &source), None);
    let mut property = assumption;
    property.implies(&any_stamped("r", &source), None).unwrap();

    let applications = execution.find_all_possible_modus_ponens(&property).unwrap();
    assert!(!applications.is_empty());
}

#[test]
fn test_double_negation_is_observationally_equivalent() {
    let source = TimeSource::new();
    let mut doubled = stamped("p", 1, &source);
    doubled.logical_not(None);
    doubled.logical_not(None);

    let plain = stamped("p", 1, &source);
    assert!(doubled.contains_property_graph(&plain));
    assert!(plain.contains_property_graph(&doubled));
    assert_eq!(doubled.node_count(), 1);
}

#[test]
fn test_parity_must_agree() {
    let source = TimeSource::new();
    let mut execution = stamped("p", 1, &source);
    execution.logical_and(&stamped("q", 2, &source), None);

    let mut negated = any_stamped("p", &source);
    negated.logical_not(None);
    assert!(!execution.contains_property_graph(&negated));
}

#[test]
fn test_negated_branch_matches_negated_probe() {
    let source = TimeSource::new();
    let mut not_p = stamped("p", 1, &source);
    not_p.logical_not(None);
    let mut execution = not_p;
    execution.logical_and(&stamped("q", 2, &source), None);

    let mut negated_probe = any_stamped("p", &source);
    negated_probe.logical_not(None);

    assert!(execution.contains_property_graph(&negated_probe));
    assert!(!execution.contains_property_graph(&any_stamped("p", &source)));
    assert!(execution.contains_property_graph(&any_stamped("q", &source)));
}

#[test]
fn test_matching_skips_interleaved_conjunctions() {
    // Execution and(and(p, q), r) still contains the flat pattern and(p, r).
    let source = TimeSource::new();
    let mut inner = stamped("p", 1, &source);
    inner.logical_and(&stamped("q", 2, &source), None);
    let mut execution = inner;
    execution.logical_and(&stamped("r", 3, &source), None);

    let mut pattern = any_stamped("p", &source);
    pattern.logical_and(&any_stamped("r", &source), None);

    assert!(execution.contains_property_graph(&pattern));
}

#[test]
fn test_timestamp_window_filters_matches() {
    let source = TimeSource::new();
    let mut execution = stamped("p", 9, &source);
    execution.logical_and(&stamped("q", 10, &source), None);

    let mut early_window = predicate("p", &source);
    early_window
        .set_timestamp(Timestamp::Interval { lo: 0, hi: 5 })
        .unwrap();
    assert!(!execution.contains_property_graph(&early_window));

    let mut late_window = predicate("p", &source);
    late_window
        .set_timestamp(Timestamp::Interval { lo: 5, hi: 20 })
        .unwrap();
    assert!(execution.contains_property_graph(&late_window));
}

#[test]
fn test_containment_stable_under_normalization() {
    let source = TimeSource::new();
    let mut execution = stamped("p", 1, &source);
    execution.logical_and(&stamped("q", 2, &source), None);
    let mut wrapped = execution.get_copy();
    wrapped.logical_not(None);
    wrapped.logical_not(None);

    let probe = any_stamped("p", &source);
    assert_eq!(
        execution.contains_property_graph(&probe),
        wrapped.contains_property_graph(&probe)
    );
}

#[test]
fn test_all_match_cases_are_enumerated() {
    // Two occurrences of p grouped under one root give two cases for a
    // single-predicate pattern.
    let source = TimeSource::new();
    let mut execution = stamped("p", 1, &source);
    execution.logical_and(&stamped("p", 2, &source), None);

    let matches = execution.find_equivalent_subgraphs(&any_stamped("p", &source));
    assert_eq!(matches.cases.len(), 2);
    let moments: Vec<Option<i64>> = matches
        .cases
        .iter()
        .map(|c| c.timestamps[0].absolute_value())
        .collect();
    assert!(moments.contains(&Some(1)));
    assert!(moments.contains(&Some(2)));
}

#[test]
fn test_get_basic_predicates_covers_all_leaves() {
    let source = TimeSource::new();
    let mut execution = stamped("p", 1, &source);
    execution.logical_and(&stamped("q", 2, &source), None);
    let mut not_r = stamped("r", 3, &source);
    not_r.logical_not(None);
    execution.logical_and(&not_r, None);

    let basics = execution.get_basic_predicates();
    assert_eq!(basics.len(), 3);
    for basic in &basics {
        basic.check_invariants().unwrap();
        assert_eq!(basic.get_all_paths().len(), 1);
    }
}
