//! Benchmarks for aingle_rules
//!
//! Run with: cargo bench -p aingle_rules

use aingle_rules::{
    fields, CompareOp, EngineConfig, FactStore, Pattern, PatternMatcher, Rule, RuleEngine, RuleSet,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn tiered_rules() -> RuleSet {
    let mut rules = RuleSet::new("bench");
    for k in 1..=5 {
        rules.add(
            Rule::named(format!("tier_{}", k))
                .priority(k)
                .when(Pattern::new().eq("tier", k))
                .when_none(Pattern::new().gt("deadline", 0))
                .build(),
        );
    }
    rules.add(
        Rule::named("fan_out")
            .when(Pattern::new().eq("kind", "seed"))
            .then(|ctx| {
                for k in 1..=5 {
                    ctx.assert_fact(fields! { "tier" => k })?;
                }
                Ok(())
            })
            .build(),
    );
    rules
}

fn bench_post(c: &mut Criterion) {
    let mut group = c.benchmark_group("post");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("cascade", size), size, |b, &size| {
            b.iter(|| {
                let mut engine =
                    RuleEngine::with_config("bench", tiered_rules(), EngineConfig::default())
                        .unwrap();
                for _ in 0..size {
                    engine.post(black_box(fields! { "kind" => "seed" })).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let rule = Rule::named("pair")
        .when(Pattern::new().gt("order", 0).with_alias("o"))
        .when(Pattern::new().compare_to("for_order", CompareOp::Eq, "o", "order"))
        .build();

    let mut group = c.benchmark_group("join");

    for size in [100, 500].iter() {
        let mut store = FactStore::new("bench");
        for i in 0..*size {
            store.assert(fields! { "order" => i + 1 }).unwrap();
            store.assert(fields! { "for_order" => i + 1 }).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("two_patterns", size), &store, |b, store| {
            b.iter(|| PatternMatcher::new(black_box(store)).match_rule(0, &rule));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_post, bench_join);
criterion_main!(benches);
