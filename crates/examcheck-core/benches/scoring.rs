use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use examcheck_core::context::{Context, ContextKind, Language};
use examcheck_core::coverage::Coverage;
use examcheck_core::exam::ExamConfiguration;
use examcheck_core::expected::build_expected;
use examcheck_core::question::{Dimensions, QuestionSet};
use examcheck_core::result::Origin;
use examcheck_core::settings::{Settings, Workarounds};

fn ctx(seed: u64) -> Context {
    Context::new(
        ContextKind::Regression { seed },
        Settings::default(),
        Workarounds::default(),
        Language::En,
    )
}

fn answers(set: &QuestionSet, ctx: &mut Context) -> BTreeMap<String, Dimensions> {
    set.questions
        .iter()
        .map(|q| (q.title().to_string(), q.random_answer(ctx).dimensions))
        .collect()
}

fn bench_random_answer(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_answer");
    let set = QuestionSet::demo();

    for question in &set.questions {
        let mut ctx = ctx(73939133);
        group.bench_function(question.kind().to_string(), |b| {
            b.iter(|| question.random_answer(black_box(&mut ctx)))
        });
    }

    group.finish();
}

fn bench_expected_result(c: &mut Criterion) {
    let mut group = c.benchmark_group("expected_result");
    let set = QuestionSet::demo();
    let config = ExamConfiguration::default();
    let mut ctx = ctx(1);
    let answers = answers(&set, &mut ctx);

    group.bench_function("build_expected", |b| {
        b.iter(|| build_expected(Origin::Recorded, black_box(&answers), &set, &config, &ctx))
    });

    let recorded = build_expected(Origin::Recorded, &answers, &set, &config, &ctx).unwrap();
    let workarounds = Workarounds::default();
    group.bench_function("check_against", |b| {
        b.iter(|| recorded.compare(black_box(&recorded), &workarounds))
    });

    group.finish();
}

fn bench_coverage(c: &mut Criterion) {
    let mut group = c.benchmark_group("coverage");
    let set = QuestionSet::demo();
    let ctx = ctx(2);

    group.bench_function("initialize", |b| {
        b.iter(|| {
            let mut coverage = Coverage::new();
            set.initialize_coverage(&mut coverage, &ctx);
            coverage
        })
    });

    let mut coverage = Coverage::new();
    set.initialize_coverage(&mut coverage, &ctx);
    group.bench_function("percentage", |b| b.iter(|| black_box(&coverage).percentage()));

    group.finish();
}

criterion_group!(
    benches,
    bench_random_answer,
    bench_expected_result,
    bench_coverage
);
criterion_main!(benches);
