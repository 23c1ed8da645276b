use bazi_core::{BirthInput, RecordFormat};
use bazi_store::{CacheConfig, CacheManager, Lookup, MemoryStore, SqliteStore};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_get_hit(c: &mut Criterion) {
    let birth = BirthInput::parse("1990-01-01", "12:30", 116.4).unwrap();
    let mut cache = CacheManager::open(MemoryStore::new(), CacheConfig::default()).unwrap();
    cache
        .get_or_calculate(&birth, Some("me"), RecordFormat::Dual, false)
        .unwrap();
    let lookup = Lookup::Nickname("me".into());
    c.bench_function("cache_get_hit", |b| {
        b.iter(|| cache.get(black_box(&lookup), RecordFormat::Chinese).unwrap())
    });
}

fn bench_put_sqlite(c: &mut Criterion) {
    let birth = BirthInput::parse("1990-01-01", "12:30", 116.4).unwrap();
    let store = SqliteStore::open_in_memory().unwrap();
    let mut cache = CacheManager::open(store, CacheConfig::default()).unwrap();
    c.bench_function("cache_refresh_sqlite", |b| {
        b.iter(|| {
            cache
                .get_or_calculate(black_box(&birth), None, RecordFormat::Dual, true)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_get_hit, bench_put_sqlite);
criterion_main!(benches);
