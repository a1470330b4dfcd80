use academic_crawler::ledger::Ledger;
use academic_crawler::url_utils::{normalize_url, url_identity};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

fn bench_record(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::open(dir.path().join("bench.redb"), true).unwrap();
    let mut i = 0u64;

    c.bench_function("ledger_record_new", |b| {
        b.iter(|| {
            i += 1;
            let url = format!("https://www.ics.uci.edu/page{}", i);
            black_box(ledger.record(&url_identity(&url), &url).unwrap())
        })
    });
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_lookup");

    for entries in [100, 1_000, 10_000] {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("bench.redb"), true).unwrap();
        for i in 0..entries {
            let url = format!("https://www.cs.uci.edu/p{}", i);
            ledger.record(&url_identity(&url), &url).unwrap();
        }
        let key = url_identity("https://www.cs.uci.edu/p42");

        group.bench_with_input(BenchmarkId::new("contains", entries), &key, |b, key| {
            b.iter(|| black_box(ledger.contains(key).unwrap()))
        });
    }

    group.finish();
}

fn bench_identity(c: &mut Criterion) {
    c.bench_function("normalize_and_identity", |b| {
        b.iter(|| {
            let normalized = normalize_url(black_box("HTTPS://WWW.Stat.UCI.edu/people/faculty/?sort=asc#top")).unwrap();
            black_box(url_identity(&normalized))
        })
    });
}

criterion_group!(benches, bench_record, bench_lookup, bench_identity);
criterion_main!(benches);
