//! Criterion benchmarks for the retrieval hot paths.
//!
//! Benchmarks:
//! 1. Forward fill on a year of daily bars across the full A-share universe
//! 2. Zero fill on the same matrix
//! 3. Matrix construction (label maps) and label lookup

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use marketvault_core::fill::{forward_fill, forward_fill_in_place, zero_fill, Matrix};
use marketvault_core::MatrixTable;

// ── Helpers ──────────────────────────────────────────────────────────

/// `rows × cols` with roughly one cell in seven missing, in runs.
fn make_sparse(rows: usize, cols: usize) -> Matrix {
    let data = (0..rows)
        .map(|i| {
            (0..cols)
                .map(|j| {
                    if (i * 31 + j * 17) % 7 == 0 || (j % 50 == 0 && i < 20) {
                        f64::NAN
                    } else {
                        10.0 + (i as f64 * 0.05).sin() + j as f64 * 0.01
                    }
                })
                .collect()
        })
        .collect();
    Matrix::from_rows(data).unwrap()
}

// ── 1. Forward Fill ──────────────────────────────────────────────────

fn bench_forward_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_fill");

    for &cols in &[500, 5000] {
        let m = make_sparse(250, cols);
        group.bench_with_input(BenchmarkId::new("250_dates", cols), &cols, |b, _| {
            b.iter(|| forward_fill(black_box(&m)))
        });
    }

    let m = make_sparse(250, 5000);
    group.bench_function("in_place_250x5000", |b| {
        b.iter_batched(
            || m.clone(),
            |mut m| forward_fill_in_place(black_box(&mut m)),
            criterion::BatchSize::LargeInput,
        )
    });

    group.finish();
}

// ── 2. Zero Fill ─────────────────────────────────────────────────────

fn bench_zero_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("zero_fill");
    let m = make_sparse(250, 5000);
    group.bench_function("250x5000", |b| b.iter(|| zero_fill(black_box(&m))));
    group.finish();
}

// ── 3. Matrix Construction ───────────────────────────────────────────

fn bench_matrix_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_table");
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let timeline: Vec<NaiveDate> = start.iter_days().take(250).collect();
    let symbols: Vec<String> = (0..5000).map(|i| format!("{i:06}")).collect();
    let m = make_sparse(250, 5000);

    group.bench_function("new_250x5000", |b| {
        b.iter(|| {
            MatrixTable::new(
                "cn_stock_em_daily_adj_close",
                timeline.clone(),
                symbols.clone(),
                m.clone(),
            )
            .unwrap()
        })
    });

    let table = MatrixTable::new("t", timeline.clone(), symbols.clone(), m).unwrap();
    group.bench_function("lookup_by_label", |b| {
        b.iter(|| table.get(black_box(timeline[125]), black_box("002500")))
    });

    group.finish();
}

criterion_group!(benches, bench_forward_fill, bench_zero_fill, bench_matrix_table);
criterion_main!(benches);
