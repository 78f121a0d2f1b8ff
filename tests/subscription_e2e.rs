use std::sync::{Arc, Mutex};
use std::time::Duration;

use guardlog::{tuple, DeltaNotification, ExecutionError, Fact, GuardError, PolicyKind, Runtime, RuntimeConfig};

fn recorder() -> (Arc<Mutex<Vec<DeltaNotification>>>, impl FnMut(&DeltaNotification) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |n: &DeltaNotification| sink.lock().unwrap().push(n.clone()))
}

#[test]
fn one_notification_per_batch_with_net_delta() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.insert("server(1)", "nova").unwrap();
    let (seen, callback) = recorder();
    runtime.subscribe("nova", "server", callback);

    runtime.insert("server(2) server(3)", "nova").unwrap();
    runtime.delete("server(1)", "nova").unwrap();
    runtime.insert("flavor(1)", "nova").unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].added, vec![tuple([2]), tuple([3])]);
    assert!(seen[0].removed.is_empty());
    assert_eq!(seen[1].removed, vec![tuple([1])]);
    assert!(seen[0].sequence < seen[1].sequence);
}

#[test]
fn no_op_batch_notifies_nobody() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    let (seen, callback) = recorder();
    runtime.subscribe("nova", "server", callback);
    runtime.insert("server(1)", "nova").unwrap();
    runtime.delete("server(1)", "nova").unwrap();
    runtime.insert("server(1)", "nova").unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3);

    let changes = runtime.insert("server(1)", "nova").unwrap();
    assert!(changes.is_empty());
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[test]
fn derived_table_subscription() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.create_policy("audit", PolicyKind::Materialized).unwrap();
    runtime.insert("bad(x) :- nova:server(x, \"error\")", "audit").unwrap();
    let stream = runtime.subscribe_stream("audit", "bad");

    runtime.insert("server(1, \"error\") server(2, \"active\")", "nova").unwrap();
    let first = stream.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(first.added_literals()[0].to_string(), "bad(1)");

    // A change that leaves the derived table alone sends nothing.
    runtime.insert("server(3, \"active\")", "nova").unwrap();
    assert!(stream.try_recv().unwrap().is_none());

    let err = stream.recv_timeout(Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, GuardError::Execution(ExecutionError::Timeout { .. })));
}

#[test]
fn nonrecursive_table_subscription() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.insert("bad(x) :- nova:server(x, \"error\")", "classification").unwrap();
    let (seen, callback) = recorder();
    runtime.subscribe("classification", "bad", callback);
    runtime.insert("server(7, \"error\")", "nova").unwrap();
    assert_eq!(seen.lock().unwrap()[0].added, vec![tuple([7])]);
}

#[test]
fn full_stream_drops_and_counts() {
    let config = RuntimeConfig {
        stream_capacity: 1,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::with_config(config).unwrap();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    let stream = runtime.subscribe_stream("nova", "server");
    runtime.insert("server(1)", "nova").unwrap();
    runtime.insert("server(2)", "nova").unwrap();
    assert_eq!(runtime.dropped_notifications(), 1);
    assert_eq!(stream.drain().len(), 1);
}

#[test]
fn unsubscribe_stops_delivery() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    let (seen, callback) = recorder();
    let id = runtime.subscribe("nova", "server", callback);
    assert!(runtime.unsubscribe(id));
    assert!(!runtime.unsubscribe(id));
    runtime.insert("server(1)", "nova").unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn initialize_tables_moves_baseline_without_notifying() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    let (seen, callback) = recorder();
    runtime.subscribe("nova", "server", callback);
    runtime
        .initialize_tables(&["server"], vec![Fact::new("server", [1]), Fact::new("server", [2])], "nova")
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());

    runtime.delete("server(1)", "nova").unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].removed, vec![tuple([1])]);
}

#[test]
fn deleting_a_policy_reports_removals() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.insert("server(1)", "nova").unwrap();
    let stream = runtime.subscribe_stream("nova", "server");
    runtime.delete_policy("nova").unwrap();
    let notification = stream.try_recv().unwrap().unwrap();
    assert_eq!(notification.removed, vec![tuple([1])]);
}

#[test]
fn simulate_never_notifies() {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    let stream = runtime.subscribe_stream("nova", "server");
    let rows = runtime.simulate_text("nova:server(x)", "classification", "nova:server+(1)").unwrap();
    assert_eq!(rows, vec!["nova:server(1)"]);
    assert!(stream.try_recv().unwrap().is_none());
}
