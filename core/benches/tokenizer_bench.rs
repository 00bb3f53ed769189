use bm25_core::tokenizer::tokenize;
use criterion::{criterion_group, criterion_main, Criterion};

const NARRATIVE: &str = "During the takeoff roll at approximately 110 knots, the flight crew observed a \
large flock of birds crossing the runway. Multiple bird strikes were felt on the nose and left wing; \
the captain elected to continue the takeoff. Engine parameters remained normal, and after consultation \
with ATC the aircraft returned to the departure airport for an uneventful landing.";

fn bench_tokenize(c: &mut Criterion) {
    c.bench_function("tokenize_narrative", |b| b.iter(|| tokenize(NARRATIVE)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
