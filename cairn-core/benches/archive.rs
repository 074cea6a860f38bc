use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use cairn_core::archive::{self, ArchiveFormat};
use std::fs;
use std::io;
use std::path::PathBuf;
use tempfile::TempDir;

fn create_tree(files: usize, size: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("node_modules");

    for i in 0..files {
        let pkg = root.join(format!("pkg-{}", i % 50));
        fs::create_dir_all(&pkg).unwrap();
        let content: Vec<u8> = (0..size).map(|j| ((i + j) % 251) as u8).collect();
        fs::write(pkg.join(format!("file-{}.js", i)), content).unwrap();
    }

    dir
}

fn bench_create(c: &mut Criterion) {
    let tree = create_tree(500, 4096);
    let sources = vec![PathBuf::from("node_modules")];

    let mut group = c.benchmark_group("archive_create");
    group.throughput(Throughput::Bytes(500 * 4096));

    for format in [ArchiveFormat::Tar, ArchiveFormat::Gzip, ArchiveFormat::Zstd] {
        let codec = archive::from_format(format, tree.path(), -1).unwrap();
        group.bench_function(format.as_str(), |b| {
            b.iter(|| {
                let written = codec
                    .create(black_box(&sources), &mut io::sink(), false)
                    .unwrap();
                black_box(written);
            });
        });
    }

    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let tree = create_tree(500, 4096);
    let sources = vec![PathBuf::from("node_modules")];

    let mut group = c.benchmark_group("archive_extract");
    group.throughput(Throughput::Bytes(500 * 4096));

    for format in [ArchiveFormat::Tar, ArchiveFormat::Gzip, ArchiveFormat::Zstd] {
        let mut packed = Vec::new();
        archive::from_format(format, tree.path(), -1)
            .unwrap()
            .create(&sources, &mut packed, false)
            .unwrap();

        group.bench_function(format.as_str(), |b| {
            b.iter(|| {
                let out = TempDir::new().unwrap();
                let codec = archive::from_format(format, out.path(), -1).unwrap();
                let written = codec
                    .extract(PathBuf::from("node_modules").as_path(), &mut packed.as_slice())
                    .unwrap();
                black_box(written);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_create, bench_extract);
criterion_main!(benches);
