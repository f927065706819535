/// Benchmarks for chart formatting.
use chartist::formatter::{self, FormatOptions};
use chartist::models::{Format, PercentageMode};
use chartist::series::{count_rows, field_slice, sum_field, AggregatorMap, SliceMap};
use chartist::types::{GroupedDataset, Row};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

/// Synthetic data: `groups` groups of `rows` rows, spread over `categories` sub-slice values.
fn get_test_data(groups: usize, rows: usize, categories: usize) -> GroupedDataset {
    let mut grouped = GroupedDataset::new();
    for group in 0..groups {
        for row in 0..rows {
            let row: Row = serde_json::from_value(json!({
                "group": format!("group {group}"),
                "category": format!("category {}", (group + row) % categories),
                "value": row,
            }))
            .unwrap();
            grouped.push(format!("group {group}"), row);
        }
    }
    grouped
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut slices = SliceMap::new();
    slices.insert("Category".to_string(), field_slice("category"));
    let mut aggregators = AggregatorMap::new();
    aggregators.insert("Default".to_string(), count_rows());
    aggregators.insert("Sum".to_string(), sum_field("value"));

    for (groups, rows, categories) in [(10, 100, 5), (100, 100, 20), (100, 1000, 50)] {
        let grouped = get_test_data(groups, rows, categories);
        let cases = [
            ("pie", Format::Pie, None, PercentageMode::None),
            ("bar", Format::Bar, Some("Category"), PercentageMode::None),
            ("bar_total", Format::Bar, Some("Category"), PercentageMode::Total),
            ("line_xaxis", Format::Line, Some("Category"), PercentageMode::XaxisGroup),
        ];
        for (case, format, chart_slice, percentage_mode) in cases {
            let options = FormatOptions {
                aggregator: "Sum".to_string(),
                chart_slice: chart_slice.map(String::from),
                percentage_mode,
                max_groups: Some(50),
                ..FormatOptions::new(format)
            };
            let name = format!("format_{case}({groups}, {rows}, {categories})");
            c.bench_function(&name, |b| {
                b.iter(|| {
                    formatter::format(
                        black_box(&grouped),
                        black_box(&options),
                        &slices,
                        &aggregators,
                    )
                })
            });
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
