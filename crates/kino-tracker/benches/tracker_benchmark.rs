//! Benchmark tests for kino-tracker operations
//!
//! Run with: cargo bench -p kino-tracker

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use kino_tracker::ads::{AdSchedule, AvailEntry};
use kino_tracker::replay::ScriptedPlayer;
use kino_tracker::{CanonicalEvent, ContentTracker, Emitter, MemorySink, PlayerEventKind, TrackerConfig};

// ============================================================================
// Helpers
// ============================================================================

/// One 30s avail every five minutes
fn create_schedule(avails: usize) -> AdSchedule {
    AdSchedule::new(
        (0..avails)
            .map(|i| AvailEntry::new(format!("avail-{i}"), i as f64 * 300.0, 30.0))
            .collect(),
    )
}

// ============================================================================
// Schedule scanning
// ============================================================================

fn bench_schedule_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_scan");

    for avails in [4, 32, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(avails), &avails, |b, &avails| {
            b.iter_batched(
                || create_schedule(avails),
                |mut schedule| {
                    let end = avails as f64 * 300.0;
                    let mut t = 0.0;
                    while t < end {
                        black_box(schedule.scan(t));
                        t += 0.25;
                    }
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

// ============================================================================
// Emission
// ============================================================================

fn bench_emitter(c: &mut Criterion) {
    c.bench_function("emit_content_event", |b| {
        let sink = MemorySink::new();
        let mut emitter = Emitter::new(Arc::new(sink.clone()));
        b.iter(|| {
            let seq = emitter.emit(
                "kino-tracker",
                black_box(CanonicalEvent::Pause),
                kino_tracker::Attributes::Content(Default::default()),
            );
            if seq % 10_000 == 0 {
                sink.clear();
            }
            seq
        })
    });
}

fn bench_time_update(c: &mut Criterion) {
    c.bench_function("content_time_update", |b| {
        let player = Arc::new(ScriptedPlayer::new("https://cdn.example.com/movie.mp4"));
        player.set_duration(Some(3600.0));
        let sink = MemorySink::new();
        let mut tracker =
            ContentTracker::new(player.clone(), Arc::new(sink.clone()), TrackerConfig::default())
                .unwrap();
        let mut t = 0.0;

        b.iter(|| {
            t += 0.25;
            player.set_current_time(t);
            tracker.handle_event(black_box(PlayerEventKind::TimeUpdate));
            if sink.len() > 10_000 {
                sink.clear();
            }
        })
    });
}

criterion_group!(benches, bench_schedule_scan, bench_emitter, bench_time_update);
criterion_main!(benches);
