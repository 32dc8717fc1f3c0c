use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eddy_jsonpath::{extract, parse, Matcher};
use serde_json::json;

fn parse_benchmark(c: &mut Criterion) {
    c.bench_function("parse simple path", |b| {
        b.iter(|| parse(black_box("a.b.c")))
    });

    c.bench_function("parse complex path", |b| {
        b.iter(|| parse(black_box("rows[_key == \"abc\"].cells[0:10]..title")))
    });
}

fn match_benchmark(c: &mut Criterion) {
    let doc = json!({
        "rows": (0..100)
            .map(|i| json!({"_key": format!("k{i}"), "cells": [i, i + 1, i + 2]}))
            .collect::<Vec<_>>(),
    });

    let expr = parse("rows[_key == \"k50\"].cells[-1]").unwrap();
    c.bench_function("match constraint over 100 rows", |b| {
        b.iter(|| {
            let matcher = Matcher::from_expr(black_box(&expr));
            matcher.match_probe(&&doc)
        })
    });

    c.bench_function("extract recursive descent", |b| {
        b.iter(|| extract(black_box(".._key"), &doc))
    });
}

criterion_group!(benches, parse_benchmark, match_benchmark);
criterion_main!(benches);
