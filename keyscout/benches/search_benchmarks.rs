use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyscout::guard::PatternGuard;
use keyscout::{AllowedRoots, EngineConfig, SearchEngine, SearchRequest};
use std::fs::File;
use std::io::Write;
use std::num::NonZeroUsize;
use tempfile::tempdir;

fn create_test_files(
    dir: &tempfile::TempDir,
    file_count: usize,
    lines_per_file: usize,
) -> std::io::Result<()> {
    for i in 0..file_count {
        let file_path = dir.path().join(format!("test_{}.txt", i));
        let mut file = File::create(file_path)?;
        for j in 0..lines_per_file {
            writeln!(file, "Line {} in file {}: TODO implement this", j, i)?;
            writeln!(file, "Another line {} in file {}: nothing special", j, i)?;
            writeln!(file, "FIXME: This is a bug in file {} line {}", i, j)?;
        }
    }
    Ok(())
}

fn engine(dir: &tempfile::TempDir, threads: usize) -> SearchEngine {
    let config = EngineConfig {
        thread_count: NonZeroUsize::new(threads).unwrap(),
        ..Default::default()
    };
    SearchEngine::new(config, AllowedRoots::new([dir.path()])).unwrap()
}

fn request(dir: &tempfile::TempDir, keyword: &str) -> SearchRequest {
    SearchRequest::new(keyword, vec![dir.path().display().to_string()])
}

fn bench_literal_keyword(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_test_files(&dir, 10, 100).unwrap();
    let engine = engine(&dir, 1);

    let mut group = c.benchmark_group("Literal Keyword Search");
    group.sample_size(10);

    let sensitive = request(&dir, "TODO");
    group.bench_function("search_todo", |b| {
        b.iter(|| engine.execute(black_box(&sensitive)).unwrap());
    });

    let insensitive = request(&dir, "todo").case_insensitive(true);
    group.bench_function("search_todo_case_insensitive", |b| {
        b.iter(|| engine.execute(black_box(&insensitive)).unwrap());
    });

    group.finish();
}

fn bench_regex_pattern(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_test_files(&dir, 10, 100).unwrap();
    let engine = engine(&dir, 1);

    let mut group = c.benchmark_group("Regex Pattern Search");
    group.sample_size(10);

    let regex = request(&dir, r"FIXME:.*bug.*line \d+").use_regex(true);
    group.bench_function("search_fixme_regex", |b| {
        b.iter(|| engine.execute(black_box(&regex)).unwrap());
    });

    group.finish();
}

fn bench_thread_scaling(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    create_test_files(&dir, 200, 20).unwrap();

    let mut group = c.benchmark_group("Thread Scaling");
    group.sample_size(10);

    for &threads in &[1, 2, 4, 8] {
        let engine = engine(&dir, threads);
        let request = request(&dir, "TODO");
        group.bench_function(format!("threads_{}", threads), |b| {
            b.iter(|| engine.execute(black_box(&request)).unwrap());
        });
    }

    group.finish();
}

fn bench_pattern_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pattern Guard");

    let patterns = [r"FIXME:.*bug.*line \d+", r"(a+)+", r"\b\w+@\w+\.com\b"];
    for (i, pattern) in patterns.iter().enumerate() {
        group.bench_function(format!("validate_{}", i), |b| {
            b.iter(|| {
                let _ = PatternGuard::validate(black_box(pattern), true);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_literal_keyword,
    bench_regex_pattern,
    bench_thread_scaling,
    bench_pattern_guard
);
criterion_main!(benches);
