use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use guardlog::{Event, Fact, PolicyKind, Runtime};

fn inventory(hosts: i64, kind: PolicyKind) -> Runtime {
    let mut runtime = Runtime::new();
    runtime.create_policy("nova", PolicyKind::Database).unwrap();
    runtime.create_policy("neutron", PolicyKind::Database).unwrap();
    runtime.create_policy("audit", kind).unwrap();

    let networks = (hosts / 8).max(1);
    let servers: Vec<Event> = (0..hosts)
        .map(|h| Event::insert("nova", Fact::new("server", [h, h % networks]).to_literal()))
        .collect();
    let zones: Vec<Event> = (0..networks)
        .map(|n| Event::insert("neutron", Fact::new("zone", [n, n % 4]).to_literal()))
        .collect();
    runtime.update(servers).unwrap();
    runtime.update(zones).unwrap();
    runtime
        .insert("placed(h, z) :- nova:server(h, n), neutron:zone(n, z)", "audit")
        .unwrap();
    runtime
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");
    for hosts in [1_000i64, 4_000, 16_000] {
        let runtime = inventory(hosts, PolicyKind::NonRecursive);
        group.throughput(Throughput::Elements(hosts as u64));
        group.bench_with_input(BenchmarkId::new("nonrecursive_select", hosts), &runtime, |b, rt| {
            b.iter(|| rt.select("placed(h, z)", "audit").unwrap());
        });
    }
    group.finish();
}

fn bench_incremental_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialized_update");
    for hosts in [1_000i64, 8_000] {
        let mut runtime = inventory(hosts, PolicyKind::Materialized);
        let mut next = hosts;
        group.bench_function(BenchmarkId::new("insert_delete", hosts), |b| {
            b.iter(|| {
                let text = format!("server({next}, 0)");
                runtime.insert(&text, "nova").unwrap();
                runtime.delete(&text, "nova").unwrap();
                next += 1;
            });
        });
    }
    group.finish();
}

fn bench_simulate(c: &mut Criterion) {
    let runtime = inventory(4_000, PolicyKind::Materialized);
    c.bench_function("simulate_one_insert", |b| {
        b.iter(|| {
            runtime
                .simulate_text("placed(h, 0)", "audit", "nova:server+(999999, 0)")
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_join, bench_incremental_update, bench_simulate);
criterion_main!(benches);
