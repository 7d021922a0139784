//! # Capability Wiring Benchmarks
//!
//! | Path | Hot because | Target |
//! |------|-------------|--------|
//! | Registry lookup | every workflow step resolves its capability | < 1µs |
//! | Wiring plan | runs on every snapshot change | < 10ms for 100 DONs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cw_01_capability_registry::CapabilityRegistry;
use cw_02_launcher::domain::{connection_set, plan_consumers, DonRoles};
use cw_02_launcher::testing::{
    don_info, random_hashed_id, random_peer, random_peers, MockTarget, SnapshotBuilder,
};
use shared_types::{Capability, CapabilityType, TopologySnapshot};

// ============================================================================
// Registry
// ============================================================================

fn bench_registry_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cw-01-registry");

    for size in [10, 100, 1000] {
        let registry = CapabilityRegistry::new();
        for i in 0..size {
            registry
                .add(Capability::Executable(MockTarget::new(&format!(
                    "target-{i}@1.0.0"
                ))))
                .unwrap();
        }
        let lookup = format!("target-{}@1.0.0", size / 2);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("get_executable", size), &lookup, |b, id| {
            b.iter(|| black_box(registry.get_executable(id).is_ok()))
        });
    }

    group.finish();
}

// ============================================================================
// Planning
// ============================================================================

/// Local node in workflow DON 1 and `dons` capability DONs with two
/// capabilities each.
fn wide_snapshot(dons: u32) -> (TopologySnapshot, shared_types::PeerId) {
    let local = random_peer();
    let mut builder = SnapshotBuilder::new().don(don_info(1, &[local], true, true, &[]));

    for id in 2..dons + 2 {
        let trigger = random_hashed_id();
        let target = random_hashed_id();
        builder = builder
            .capability(trigger, &format!("trigger-{id}"), "1.0.0", CapabilityType::Trigger)
            .capability(target, &format!("target-{id}"), "1.0.0", CapabilityType::Target)
            .don(don_info(id, &random_peers(7), true, false, &[trigger, target]));
    }
    (builder.build(), local)
}

fn bench_consumer_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("cw-02-planning");

    for dons in [10, 100] {
        let (snapshot, local) = wide_snapshot(dons);

        group.throughput(Throughput::Elements(u64::from(dons)));
        group.bench_with_input(BenchmarkId::new("plan_consumers", dons), &snapshot, |b, s| {
            b.iter(|| {
                let roles = DonRoles::classify(s, local);
                let planned = plan_consumers(s, &roles).unwrap();
                black_box(connection_set(&roles, &planned).len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry_lookup, bench_consumer_planning);
criterion_main!(benches);
