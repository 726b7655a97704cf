//! Performance benchmarks for directory browsing.
//!
//! These benchmarks measure the request hot paths of the file server:
//! - HTML listing rendering
//! - Path resolution of a populated directory

use agent::files::{render_listing, DirectoryBrowser, DirectoryEntry, EntryKind};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn entries(count: usize) -> Vec<DirectoryEntry> {
    (0..count)
        .map(|i| {
            let (name, kind, size) = if i % 8 == 0 {
                (format!("folder {}", i), EntryKind::Directory, 0)
            } else {
                (format!("clip_{:04}.mp4", i), EntryKind::File, (i as u64) * 4096)
            };
            DirectoryEntry {
                rel_path: format!("media/{}", name),
                name,
                kind,
                size,
            }
        })
        .collect()
}

/// Benchmark listing rendering for directories of increasing size.
fn bench_render_listing(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_listing");

    for count in [10usize, 100, 1000] {
        let listing = entries(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("open", count), &listing, |b, listing| {
            b.iter(|| render_listing(black_box("media"), black_box(listing), None, None));
        });
        group.bench_with_input(BenchmarkId::new("token", count), &listing, |b, listing| {
            b.iter(|| {
                render_listing(
                    black_box("media"),
                    black_box(listing),
                    None,
                    Some("0123456789abcdef0123456789abcdef"),
                )
            });
        });
    }

    group.finish();
}

/// Benchmark resolving a directory with a few hundred files.
fn bench_resolve_directory(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    for i in 0..250 {
        std::fs::write(dir.path().join(format!("file_{:03}.txt", i)), b"x").expect("write file");
    }
    std::fs::create_dir(dir.path().join("nested")).expect("create dir");

    let browser = DirectoryBrowser::new(dir.path());
    c.bench_function("resolve_directory_250", |b| {
        b.iter(|| browser.resolve(black_box("/")).expect("resolve"));
    });
}

criterion_group!(benches, bench_render_listing, bench_resolve_directory);
criterion_main!(benches);
