use guardlog::{
    parse_formula, Event, ExecutionError, GuardError, PolicyKind, Runtime, RuntimeConfig, SimulateConstraints,
    ValidationError,
};

fn topology() -> Runtime {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.create_policy("reach", PolicyKind::Materialized).unwrap();
    runtime.insert("link(1, 2) link(2, 3)", "nova").unwrap();
    runtime
        .insert(
            "path(x, y) :- nova:link(x, y)
             path(x, z) :- path(x, y), nova:link(y, z)",
            "reach",
        )
        .unwrap();
    runtime
}

fn snapshot(runtime: &Runtime) -> Vec<(String, Vec<String>)> {
    runtime
        .policy_names()
        .into_iter()
        .map(|name| {
            let formulas = runtime.rules(&name).unwrap().iter().map(ToString::to_string).collect();
            (name, formulas)
        })
        .collect()
}

#[test]
fn simulate_sees_hypothetical_inserts_and_deletes() {
    let runtime = topology();
    let before = snapshot(&runtime);

    let rows = runtime
        .simulate(
            "path(1, x)",
            "reach",
            vec![
                Event::insert("nova", parse_formula("link(3, 4)").unwrap()),
                Event::delete("nova", parse_formula("link(1, 2)").unwrap()),
                Event::insert("nova", parse_formula("link(1, 3)").unwrap()),
            ],
        )
        .unwrap();
    assert_eq!(rows, vec!["path(1, 3)", "path(1, 4)"]);

    assert_eq!(snapshot(&runtime), before);
    assert_eq!(runtime.select("path(1, x)", "reach").unwrap(), vec!["path(1, 2)", "path(1, 3)"]);
}

#[test]
fn simulate_with_hypothetical_rule() {
    let runtime = topology();
    let rows = runtime
        .simulate(
            "back(x, y)",
            "reach",
            vec![Event::insert("reach", parse_formula("back(y, x) :- path(x, y)").unwrap())],
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(runtime.select("back(x, y)", "reach").unwrap().is_empty());
}

#[test]
fn simulate_update_sequence() {
    let runtime = topology();
    let rows = runtime.simulate_text("path(x, 3)", "reach", "nova:link-(2, 3)").unwrap();
    assert!(rows.is_empty());
    assert_eq!(runtime.select("path(x, 3)", "reach").unwrap().len(), 2);
}

#[test]
fn failing_simulation_leaves_state_untouched() {
    let runtime = topology();
    let before = snapshot(&runtime);
    let err = runtime
        .simulate(
            "path(x, y)",
            "reach",
            vec![
                Event::insert("nova", parse_formula("link(9, 9)").unwrap()),
                Event::insert("nova", parse_formula("link(1, 2, 3)").unwrap()),
            ],
        )
        .unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::ArityMismatch { .. })));
    assert_eq!(snapshot(&runtime), before);

    let err = runtime.simulate_text("path(x, y)", "missing", "").unwrap_err();
    assert!(matches!(err, GuardError::Execution(ExecutionError::PolicyNotFound { .. })));
}

#[test]
fn simulate_limits_are_enforced() {
    let config = RuntimeConfig {
        simulate: SimulateConstraints {
            max_events: 1,
            max_theories: 64,
        },
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::with_config(config).unwrap();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    let err = runtime
        .simulate_text("nova:link(x, y)", "classification", "nova:link+(1, 2) nova:link+(2, 3)")
        .unwrap_err();
    assert!(matches!(
        err,
        GuardError::Execution(ExecutionError::SimulationLimitExceeded { .. })
    ));
}

#[test]
fn simulate_in_nonrecursive_policy_over_materialized_source() {
    let mut runtime = topology();
    runtime.insert("long(x) :- reach:path(1, x), not nova:link(1, x)", "classification").unwrap();
    assert_eq!(runtime.select("long(x)", "classification").unwrap(), vec!["long(3)"]);
    let rows = runtime.simulate_text("long(x)", "classification", "nova:link+(3, 4)").unwrap();
    assert_eq!(rows, vec!["long(3)", "long(4)"]);
    assert_eq!(runtime.select("long(x)", "classification").unwrap(), vec!["long(3)"]);
}
