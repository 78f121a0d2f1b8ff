use guardlog::{
    parse_formula, Event, ExecutionError, GuardError, Literal, PolicyKind, Rule, Runtime, RuntimeConfig, Term,
    ValidationError, Variable,
};

fn runtime_with(policies: &[(&str, PolicyKind)]) -> Runtime {
    let mut runtime = Runtime::new();
    for (name, kind) in policies {
        runtime.create_policy(name, *kind).unwrap();
    }
    runtime
}

#[test]
fn insert_delete_round_trip_reports_only_real_changes() {
    let mut runtime = runtime_with(&[("nova", PolicyKind::Database)]);

    let changes = runtime.insert("server(1) server(2) server(1)", "nova").unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes.inserted().count(), 2);

    let changes = runtime.insert("server(2) server(3)", "nova").unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes.iter().next().unwrap().formula.to_string(), "server(3)");

    let changes = runtime.delete("server(3) server(9)", "nova").unwrap();
    assert_eq!(changes.deleted().count(), 1);
    assert_eq!(runtime.select("server(x)", "nova").unwrap(), vec!["server(1)", "server(2)"]);
}

#[test]
fn insert_then_delete_in_one_batch_is_a_no_op() {
    let mut runtime = runtime_with(&[("nova", PolicyKind::Database)]);
    let fact = parse_formula("server(1)").unwrap();
    let changes = runtime
        .update(vec![Event::insert("nova", fact.clone()), Event::delete("nova", fact)])
        .unwrap();
    assert!(changes.is_empty());
    assert!(runtime.select("server(x)", "nova").unwrap().is_empty());
}

#[test]
fn unsafe_rule_rejects_whole_batch() {
    let mut runtime = Runtime::new();
    runtime.insert("q(1)", "classification").unwrap();

    // r(y) :- q(z) cannot come from the parser, which rejects it up front.
    let unsafe_rule = Rule::new(
        Literal::new("r", vec![Term::Var(Variable::new(0, "y"))]),
        vec![Literal::new("q", vec![Term::Var(Variable::new(1, "z"))])],
    );
    let batch = vec![
        Event::insert("classification", parse_formula("q(2)").unwrap()),
        Event::insert("classification", parse_formula("p(x) :- q(x)").unwrap()),
        Event::insert("classification", unsafe_rule),
    ];
    let err = runtime.update(batch).unwrap_err();
    let GuardError::Validation(ValidationError::Batch { index, source }) = err else {
        panic!("expected batch error");
    };
    assert_eq!(index, 2);
    assert!(matches!(*source, ValidationError::Unsafe { .. }));

    assert_eq!(runtime.select("q(x)", "classification").unwrap(), vec!["q(1)"]);
    assert_eq!(runtime.rules("classification").unwrap().len(), 1);
}

#[test]
fn syntax_and_arity_errors_are_validation_errors() {
    let mut runtime = Runtime::new();
    let err = runtime.insert("p(1", "classification").unwrap_err();
    assert!(matches!(err, GuardError::Validation(ValidationError::Syntax { .. })));

    runtime.insert("p(1)", "classification").unwrap();
    let err = runtime.insert("p(1, 2)", "classification").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::ArityMismatch { .. })));
    let err = runtime.insert("q(x) :- p(x, y)", "classification").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::ArityMismatch { .. })));
}

#[test]
fn nonrecursive_policy_rejects_recursion() {
    let mut runtime = Runtime::new();
    runtime.insert("p(x) :- q(x)", "classification").unwrap();
    let err = runtime.insert("q(x) :- p(x)", "classification").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::Recursive { .. })));
}

#[test]
fn fact_stores_reject_rules() {
    let mut runtime = Runtime::new();
    let err = runtime.insert("p(x) :- q(x)", "action").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::RuleInFactStore { .. })));
}

#[test]
fn materialized_policy_supports_stratified_negation() {
    let mut runtime = runtime_with(&[("nova", PolicyKind::Database), ("audit", PolicyKind::Materialized)]);
    runtime.insert("server(1) server(2) server(3) tagged(2)", "nova").unwrap();
    runtime
        .insert(
            "untagged(x) :- nova:server(x), not nova:tagged(x)
             alarm(x) :- untagged(x)",
            "audit",
        )
        .unwrap();
    assert_eq!(runtime.select("alarm(x)", "audit").unwrap(), vec!["alarm(1)", "alarm(3)"]);

    runtime.insert("tagged(1)", "nova").unwrap();
    assert_eq!(runtime.select("alarm(x)", "audit").unwrap(), vec!["alarm(3)"]);

    let err = runtime.insert("a(x) :- nova:server(x), not b(x) b(x) :- a(x)", "audit").unwrap_err();
    assert!(matches!(err.validation_root(), Some(ValidationError::Unstratifiable { .. })));
}

#[test]
fn builtins_cannot_be_deleted_or_recreated() {
    let mut runtime = Runtime::new();
    for name in ["classification", "action"] {
        assert!(matches!(
            runtime.delete_policy(name),
            Err(GuardError::Execution(ExecutionError::BuiltinPolicy { .. }))
        ));
        assert!(matches!(
            runtime.create_policy(name, PolicyKind::NonRecursive),
            Err(GuardError::Execution(ExecutionError::PolicyAlreadyExists { .. }))
        ));
    }
}

#[test]
fn policy_metadata_is_listed() {
    let mut runtime = Runtime::new();
    let id = runtime.create_policy_with("neutron", "net", PolicyKind::Database).unwrap();
    let info = runtime.policy("neutron").unwrap();
    assert_eq!(info.id, id);
    assert_eq!(info.abbreviation, "net");
    assert_eq!(info.kind, PolicyKind::Database);
    assert_eq!(runtime.policies().len(), 3);
    assert!(matches!(
        runtime.policy("missing"),
        Err(GuardError::Execution(ExecutionError::PolicyNotFound { .. }))
    ));
}

#[test]
fn unknown_target_and_query_policy() {
    let mut runtime = Runtime::new();
    assert!(matches!(
        runtime.insert("p(1)", "missing"),
        Err(GuardError::Execution(ExecutionError::PolicyNotFound { .. }))
    ));
    assert!(matches!(
        runtime.select("p(x)", "missing"),
        Err(GuardError::Execution(ExecutionError::PolicyNotFound { .. }))
    ));
}

#[test]
fn headed_query_and_conjunction() {
    let mut runtime = Runtime::new();
    runtime.insert("p(1, 2) p(2, 3) q(2)", "classification").unwrap();
    assert_eq!(runtime.select("p(x, y), q(y)", "classification").unwrap(), vec!["p(1, 2), q(2)"]);
    assert_eq!(runtime.select("ans(x) :- p(x, y), q(y)", "classification").unwrap(), vec!["ans(1)"]);
    assert_eq!(runtime.select_text("p(x, y)", "classification").unwrap(), "p(1, 2) p(2, 3)");
}

#[test]
fn custom_builtin_names() {
    let config = RuntimeConfig {
        classification_policy: "rules".to_string(),
        action_policy: "acts".to_string(),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::with_config(config).unwrap();
    assert_eq!(runtime.policy_names(), vec!["acts", "rules"]);
}
