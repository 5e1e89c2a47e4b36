//! # Frame Sync Benchmark
//!
//! Cost of one simulation/presentation frame pair with signal listeners,
//! deferred actions and phased deletions in flight.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use triad_core::{PhasedDelete, SignalTime, SignalType, TripleBufferCoordinator};

struct Payload(#[allow(dead_code)] Vec<u8>);

impl PhasedDelete for Payload {}

fn bench_frame_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_pair");

    for listeners in [0, 4, 32] {
        let coordinator = TripleBufferCoordinator::new();
        for time in [SignalTime::PreUpdateNoLock, SignalTime::PostUpdateNoLock] {
            for priority in 0..listeners {
                coordinator.connect(SignalType::SimulationComplete, time, move |ids| {
                    black_box(ids.current_simulation);
                }, priority);
            }
        }

        group.bench_with_input(BenchmarkId::new("listeners", listeners), &listeners, |b, _| {
            b.iter(|| {
                coordinator.complete_simulation_frame();
                coordinator.begin_presentation_frame();
            });
        });
    }

    group.finish();
}

fn bench_phased_deletion(c: &mut Criterion) {
    let mut group = c.benchmark_group("phased_deletion");

    for per_frame in [1, 64, 1_024] {
        let coordinator = TripleBufferCoordinator::new();
        group.bench_with_input(BenchmarkId::new("objects_per_frame", per_frame), &per_frame, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    coordinator.enqueue_deletion(Payload(vec![0; 64]));
                }
                coordinator.schedule_rendering_action(|| {});
                coordinator.complete_simulation_frame();
                coordinator.begin_presentation_frame();
            });
        });
        coordinator.purge_cleanup();
    }

    group.finish();
}

criterion_group!(benches, bench_frame_pair, bench_phased_deletion);
criterion_main!(benches);
