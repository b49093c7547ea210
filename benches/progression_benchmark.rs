use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use lifeos_progression::config::ProgressionRules;
use lifeos_progression::db::MemoryStore;
use lifeos_progression::models::UserProgression;
use lifeos_progression::services::{level, streak, ProgressionEngine};
use lifeos_progression::time_utils::SystemClock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;
use std::sync::Arc;

fn benchmark_level_curve(c: &mut Criterion) {
    // One sample from each band
    let samples: Vec<u64> = vec![0, 4_999, 12_345, 69_999, 99_999];

    c.bench_function("level_for_xp", |b| {
        b.iter(|| {
            for xp in &samples {
                black_box(level::level_for_xp(black_box(*xp)));
            }
        })
    });
}

fn benchmark_streak_evaluation(c: &mut Criterion) {
    let rules = ProgressionRules::default();
    let mut rng = StdRng::seed_from_u64(7);
    // Sunday morning after a Saturday login
    let now = Utc.with_ymd_and_hms(2024, 1, 21, 8, 0, 0).unwrap();
    let yesterday = now - Duration::hours(20);

    c.bench_function("streak_evaluate_consecutive", |b| {
        b.iter(|| {
            streak::evaluate(
                black_box(Some(yesterday)),
                black_box(13),
                now,
                rules.day_offset,
                &mut rng,
            )
        })
    });
}

fn benchmark_plan_pass(c: &mut Criterion) {
    let engine = ProgressionEngine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
        ProgressionRules::default(),
    );
    let now = Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap();

    let mut group = c.benchmark_group("plan_pass");

    let consecutive = UserProgression {
        xp: 2_400,
        level: 13,
        streak: 6,
        last_login: Some(now - Duration::days(1)),
        ..UserProgression::new("bench")
    };
    group.bench_function("consecutive_day", |b| {
        b.iter(|| engine.plan_pass(black_box(&consecutive), now))
    });

    let corrupted = UserProgression {
        streak: 5_000,
        ..consecutive.clone()
    };
    group.bench_function("corrupted", |b| {
        b.iter(|| engine.plan_pass(black_box(&corrupted), now))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_level_curve,
    benchmark_streak_evaluation,
    benchmark_plan_pass
);
criterion_main!(benches);
