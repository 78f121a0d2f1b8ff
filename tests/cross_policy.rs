use guardlog::{ExecutionError, GuardError, PolicyKind, Runtime, ValidationError};

#[test]
fn reference_resolves_once_the_defining_policy_exists() {
    let mut runtime = Runtime::new();
    runtime.insert("error(x) :- nova:server(x, \"error\")", "classification").unwrap();
    assert!(runtime.select("error(x)", "classification").unwrap().is_empty());

    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.insert("server(1, \"error\") server(2, \"active\")", "nova").unwrap();
    assert_eq!(runtime.select("error(x)", "classification").unwrap(), vec!["error(1)"]);
}

#[test]
fn unqualified_table_resolves_to_first_definer_by_name() {
    let mut runtime = Runtime::new();
    runtime.create_policy("zeta", PolicyKind::Database).unwrap();
    runtime.create_policy("alpha", PolicyKind::Database).unwrap();
    runtime.insert("host(\"z\")", "zeta").unwrap();
    runtime.insert("seen(x) :- host(x)", "classification").unwrap();
    assert_eq!(runtime.select("seen(x)", "classification").unwrap(), vec!["seen(\"z\")"]);

    runtime.insert("host(\"a\")", "alpha").unwrap();
    assert_eq!(runtime.select("seen(x)", "classification").unwrap(), vec!["seen(\"a\")"]);
}

#[test]
fn local_definition_shadows_other_policies() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.insert("host(1)", "nova").unwrap();
    runtime.insert("host(2) seen(x) :- host(x)", "classification").unwrap();
    assert_eq!(runtime.select("seen(x)", "classification").unwrap(), vec!["seen(2)"]);
    assert_eq!(runtime.select("nova:host(x)", "classification").unwrap(), vec!["nova:host(1)"]);
}

#[test]
fn materialized_chain_settles_in_dependency_order() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.create_policy("topology", PolicyKind::Materialized).unwrap();
    runtime.create_policy("report", PolicyKind::Materialized).unwrap();
    runtime
        .insert(
            "reach(x, y) :- nova:link(x, y)
             reach(x, z) :- reach(x, y), nova:link(y, z)",
            "topology",
        )
        .unwrap();
    runtime.insert("far(y) :- topology:reach(1, y), not nova:link(1, y)", "report").unwrap();

    runtime.insert("link(1, 2) link(2, 3) link(3, 4)", "nova").unwrap();
    assert_eq!(runtime.select("far(x)", "report").unwrap(), vec!["far(3)", "far(4)"]);

    runtime.delete("link(2, 3)", "nova").unwrap();
    assert!(runtime.select("far(x)", "report").unwrap().is_empty());

    runtime.insert("link(1, 3)", "nova").unwrap();
    assert_eq!(runtime.select("far(x)", "report").unwrap(), vec!["far(4)"]);
}

#[test]
fn nonrecursive_reads_through_materialized() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.create_policy("topology", PolicyKind::Materialized).unwrap();
    runtime.insert("link(1, 2) link(2, 3)", "nova").unwrap();
    runtime
        .insert(
            "reach(x, y) :- nova:link(x, y)
             reach(x, z) :- reach(x, y), reach(y, z)",
            "topology",
        )
        .unwrap();
    runtime.insert("from_one(y) :- topology:reach(1, y)", "classification").unwrap();
    assert_eq!(
        runtime.select("from_one(y)", "classification").unwrap(),
        vec!["from_one(2)", "from_one(3)"]
    );
}

#[test]
fn cross_policy_cycles_are_rejected() {
    let mut runtime = Runtime::new();
    runtime.create_policy("left", PolicyKind::NonRecursive).unwrap();
    runtime.create_policy("right", PolicyKind::NonRecursive).unwrap();
    runtime.insert("p(x) :- right:q(x)", "left").unwrap();
    let err = runtime.insert("q(x) :- left:p(x)", "right").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::PolicyCycle { .. })));

    // The same cycle through an unqualified reference.
    let err = runtime.insert("q(x) :- p(x)", "right").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::PolicyCycle { .. })));
    assert!(runtime.rules("right").unwrap().is_empty());
}

#[test]
fn referenced_policy_cannot_be_deleted() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.insert("server(1)", "nova").unwrap();
    runtime.insert("seen(x) :- server(x)", "classification").unwrap();

    let err = runtime.delete_policy("nova").unwrap_err();
    let GuardError::Execution(ExecutionError::PolicyInUse { dependents, .. }) = err else {
        panic!("expected PolicyInUse");
    };
    assert_eq!(dependents, vec!["classification".to_string()]);

    runtime.delete("seen(x) :- server(x)", "classification").unwrap();
    runtime.delete_policy("nova").unwrap();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    assert!(runtime.select("nova:server(x)", "classification").unwrap().is_empty());
}
