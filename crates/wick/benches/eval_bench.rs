use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wick::{parse, Evaluator, Host, NoRandom, Value};

struct BenchHost;

impl Host for BenchHost {
    fn lookup(&self, path: &[String]) -> Value {
        // Cheap synthetic state: meters are numeric, flags boolean.
        match path.first().map(String::as_str) {
            Some("meters") => Value::Num(45.0),
            Some("flags") => Value::Bool(true),
            _ => Value::Null,
        }
    }

    fn has_item(&self, _item: &str) -> bool {
        true
    }
}

fn bench_parse(c: &mut Criterion) {
    let src = "meters.alex.trust >= 40 and (flags.curfew or has('key')) and \
               clamp(meters.alex.desire + 5, 0, 100) > 20";

    c.bench_function("parse_guard_expression", |b| {
        b.iter(|| parse(black_box(src)).unwrap())
    });
}

fn bench_eval(c: &mut Criterion) {
    let expr = parse(
        "meters.alex.trust >= 40 and (flags.curfew or has('key')) and \
         clamp(meters.alex.desire + 5, 0, 100) > 20",
    )
    .unwrap();

    c.bench_function("eval_guard_expression", |b| {
        b.iter(|| {
            let mut draws = NoRandom;
            Evaluator::new(&BenchHost, &mut draws).eval(black_box(&expr))
        })
    });
}

fn bench_eval_deep_arithmetic(c: &mut Criterion) {
    // A longer arithmetic chain, still within the default depth cap.
    let src = "1 + 2 * 3 - 4 / 2 + meters.a.b * 2 + meters.c.d / 4 - 1 < 1000";
    let expr = parse(src).unwrap();

    c.bench_function("eval_arithmetic_chain", |b| {
        b.iter(|| {
            let mut draws = NoRandom;
            Evaluator::new(&BenchHost, &mut draws).eval(black_box(&expr))
        })
    });
}

criterion_group!(benches, bench_parse, bench_eval, bench_eval_deep_arithmetic);
criterion_main!(benches);
