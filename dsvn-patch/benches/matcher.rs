//! Hunk matching on targets of growing size, with the hunk at its recorded
//! line and displaced so the fallback scans run.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dsvn_patch::PatchFile;
use dsvn_patch::lines::TargetContent;
use dsvn_patch::matcher::match_hunks;
use dsvn_wc::translate::{EolStyle, KeywordMap};
use std::io::Cursor;

fn target_text(lines: usize, shift: usize) -> Vec<u8> {
    let mut text = String::new();
    for i in 0..shift {
        text.push_str(&format!("inserted {}\n", i));
    }
    for i in 1..=lines {
        text.push_str(&format!("fn line_{}() {{}}\n", i));
    }
    text.into_bytes()
}

fn patch_at(line: usize) -> String {
    format!(
        "--- f.rs\n+++ f.rs\n@@ -{l},3 +{l},3 @@\n fn line_{a}() {{}}\n-fn line_{b}() {{}}\n+fn renamed() {{}}\n fn line_{c}() {{}}\n",
        l = line,
        a = line,
        b = line + 1,
        c = line + 2
    )
}

fn matcher_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_hunks");

    for lines in [1_000, 10_000, 50_000] {
        let hunk_line = lines / 2;
        let patch = PatchFile::from_bytes(patch_at(hunk_line).as_bytes())
            .next_patch(false, false)
            .unwrap();

        for (name, shift) in [("in_place", 0), ("shifted", 25)] {
            let text = target_text(lines, shift);
            group.bench_with_input(BenchmarkId::new(name, lines), &text, |b, text| {
                b.iter(|| {
                    let mut content = TargetContent::new(Cursor::new(text.clone()), EolStyle::None, KeywordMap::new());
                    let infos = match_hunks(Some(&mut content), &patch.hunks, 2, false, None).unwrap();
                    black_box(infos[0].matched_line)
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, matcher_benchmarks);
criterion_main!(benches);
