//! Planning benchmarks: layout + sequencing + timeline compile, no rasterising.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use codereel::layout::FontMetrics;
use codereel::lexer::Language;
use codereel::pipeline::prepare_from_source;
use codereel::schema::{RenderConfig, RevealGroup};
use codereel::sequencer::DuplicatePolicy;
use codereel::source::extract_lines;

fn synthetic_source(lines: usize) -> String {
    let mut out = String::new();
    for index in 0..lines {
        match index % 4 {
            0 => out.push_str(&format!("fn step_{index}(value: u32) -> u32 {{\n")),
            1 => out.push_str("    // accumulate\n"),
            2 => out.push_str(&format!("    value.wrapping_mul({index}) + 0x1f\n")),
            _ => out.push_str("}\n"),
        }
    }
    out
}

fn bench_prepare(c: &mut Criterion) {
    let source = synthetic_source(400);
    let mut group = c.benchmark_group("prepare_render");
    group.sample_size(30);

    for (name, groups) in [
        ("all_remaining_400", vec![RevealGroup::AllRemaining]),
        (
            "explicit_and_split_400",
            vec![
                RevealGroup::Explicit((1..=40).collect()),
                RevealGroup::Split(120),
                RevealGroup::Explicit((200..=260).collect()),
                RevealGroup::AllRemaining,
            ],
        ),
    ] {
        let mut config = RenderConfig::new("bench.rs", 1, 400);
        config.line_groups = groups;
        group.bench_function(name, |b| {
            b.iter(|| {
                let text = extract_lines(&source, Language::Rust, &config).expect("extract");
                let metrics = FontMetrics::default();
                black_box(
                    prepare_from_source(&config, text, metrics, DuplicatePolicy::Skip)
                        .expect("prepare"),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_prepare);
criterion_main!(benches);
