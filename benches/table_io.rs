use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bq_toolkit::query::{fill_template, Variables};
use bq_toolkit::table_io::{load_table, save_table, LoadOptions, SaveOptions};
use bq_toolkit::warehouse::converters::outcome_to_batch;
use bq_toolkit::warehouse::{ColumnInfo, QueryOutcome};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tempfile::TempDir;

fn generate_batch(count: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("score", DataType::Float64, false),
        Field::new("active", DataType::Boolean, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(0..count as i64)),
        Arc::new(StringArray::from_iter_values(
            (0..count).map(|i| format!("name_{}", i)),
        )),
        Arc::new(Float64Array::from_iter_values(
            (0..count).map(|i| i as f64 * 1.5),
        )),
        Arc::new(BooleanArray::from_iter((0..count).map(|i| Some(i % 2 == 0)))),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

fn generate_outcome(count: usize) -> QueryOutcome {
    let column = |name: &str, data_type: &str| ColumnInfo {
        name: name.to_string(),
        data_type: data_type.to_string(),
    };
    QueryOutcome {
        columns: vec![
            column("id", "INT64"),
            column("name", "STRING"),
            column("score", "FLOAT64"),
            column("active", "BOOL"),
        ],
        rows: (0..count)
            .map(|i| {
                vec![
                    json!(i.to_string()),
                    json!(format!("name_{}", i)),
                    json!((i as f64 * 1.5).to_string()),
                    json!(if i % 2 == 0 { "true" } else { "false" }),
                ]
            })
            .collect(),
        ..Default::default()
    }
}

fn bench_save_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_io");
    let dir = TempDir::new().unwrap();

    for format in ["csv", "parquet", "arrow", "json"] {
        for row_count in [1_000, 10_000] {
            let batch = generate_batch(row_count);
            let path = dir.path().join(format!("bench_{}.{}", row_count, format));

            group.bench_with_input(
                BenchmarkId::new(format!("save_{}", format), row_count),
                &batch,
                |b, batch| b.iter(|| save_table(black_box(batch), &path, &SaveOptions::default()).unwrap()),
            );

            save_table(&batch, &path, &SaveOptions::default()).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("load_{}", format), row_count),
                &path,
                |b, path| b.iter(|| black_box(load_table(path, &LoadOptions::default()).unwrap())),
            );
        }
    }

    group.finish();
}

fn bench_result_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_conversion");

    for row_count in [100, 1_000, 10_000] {
        let outcome = generate_outcome(row_count);
        group.bench_with_input(
            BenchmarkId::new("outcome_to_batch", row_count),
            &outcome,
            |b, outcome| b.iter(|| black_box(outcome_to_batch(outcome).unwrap())),
        );
    }

    group.finish();
}

fn bench_fill_template(c: &mut Criterion) {
    let template = "SELECT * FROM `{project}.{dataset}.orders` WHERE day = '{day}' {limit}\n".repeat(50);
    let variables: Variables = [
        ("project", "analytics"),
        ("dataset", "sales"),
        ("day", "2024-01-31"),
        ("limit", "LIMIT 100"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    c.bench_function("fill_template", |b| {
        b.iter(|| black_box(fill_template(black_box(&template), &variables)))
    });
}

criterion_group!(
    benches,
    bench_save_load,
    bench_result_conversion,
    bench_fill_template
);
criterion_main!(benches);
