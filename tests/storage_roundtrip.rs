//! 表级装载、重开与多版本读写

use olap_pack_storage::common::{ColumnKind, PACK_CAPACITY};
use olap_pack_storage::dpn::Stats;
use olap_pack_storage::table::{ColumnDef, TableStore};
use olap_pack_storage::{EngineConfig, EngineError, Value};

const ROWS: usize = 150_000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn defs() -> Vec<ColumnDef> {
    vec![
        ColumnDef::int(0, "qty"),
        ColumnDef::real(1, "price"),
        ColumnDef::varchar(2, "sku", 8),
    ]
}

fn qty(i: usize) -> Value<'static> {
    if i % 11 == 0 { Value::Null } else { Value::Int(3 * i as i64 - 1000) }
}

fn price(i: usize) -> Value<'static> {
    Value::Real(i as f64 * 0.5)
}

fn sku(i: usize) -> Value<'static> {
    if i % 13 == 0 { Value::Null } else { Value::Str(format!("k{:05}", i % 500).into_bytes()) }
}

fn load(dir: &std::path::Path, cfg: &EngineConfig) -> TableStore {
    let mut t = TableStore::create(dir, 7, defs(), cfg).unwrap();
    let cols: [(u32, fn(usize) -> Value<'static>); 3] = [(0, qty), (1, price), (2, sku)];
    for (id, make) in cols {
        let vals: Vec<Value> = (0..ROWS).map(make).collect();
        assert_eq!(t.column_mut(id).unwrap().append_values(&vals, 1).unwrap(), vec![0, 1, 2]);
    }
    assert_eq!(t.commit(1).unwrap(), 1);
    t
}

#[test]
fn bulk_load_survives_reopen() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::default();
    drop(load(tmp.path(), &cfg));

    let t = TableStore::open(tmp.path(), &cfg).unwrap();
    assert_eq!(t.id(), 7);
    assert_eq!(t.definitions(), defs().as_slice());
    assert_eq!(t.version(), 1);

    let gens: [fn(usize) -> Value<'static>; 3] = [qty, price, sku];
    for (col, make) in t.columns().zip(gens) {
        assert_eq!(col.pack_count(), 3);
        for p in 0..3u32 {
            let pack = col.read_pack(p).unwrap();
            let first = p as usize * PACK_CAPACITY;
            let rows = (ROWS - first).min(PACK_CAPACITY);
            assert_eq!(pack.nr(), rows);
            for i in [0, 1, 11, rows / 2, rows - 1] {
                assert_eq!(pack.get_value(i).into_owned(), make(first + i), "column {:?} row {}", col.kind(), first + i);
            }
        }
    }
}

#[test]
fn descriptors_carry_pack_statistics() {
    let tmp = tempfile::tempdir().unwrap();
    let t = load(tmp.path(), &EngineConfig::default());

    let ints = t.column(0).unwrap();
    for p in 0..3usize {
        let range = p * PACK_CAPACITY..((p + 1) * PACK_CAPACITY).min(ROWS);
        let live: Vec<i64> = range.clone().filter_map(|i| qty(i).as_i64()).collect();
        let d = ints.dpn(p as u32).unwrap();
        assert_eq!(d.nr as usize, range.len());
        assert_eq!(d.nn as usize, range.len() - live.len());
        assert_eq!(d.stats, Stats::Int {
            min: *live.iter().min().unwrap(),
            max: *live.iter().max().unwrap(),
            sum: live.iter().sum(),
        });
    }

    let reals = t.column(1).unwrap().dpn(2).unwrap();
    match reals.stats {
        Stats::Real { min, max, .. } => {
            assert_eq!(min, (2 * PACK_CAPACITY) as f64 * 0.5);
            assert_eq!(max, (ROWS - 1) as f64 * 0.5);
        }
        other => panic!("real column carries {other:?}"),
    }

    let strs = t.column(2).unwrap();
    assert_eq!(strs.kind(), ColumnKind::Str);
    assert!(strs.dpns().iter().all(|d| d.maxlen == 6));
}

#[test]
fn scan_tasks_cover_every_row_once() {
    let tmp = tempfile::tempdir().unwrap();
    let t = load(tmp.path(), &EngineConfig::default());
    let col = t.column(0).unwrap();

    for workers in 1..=4 {
        let (packs, tasks) = col.scan_tasks(2, workers);
        assert_eq!(packs, vec![0, 1, 2]);
        assert_eq!(tasks.len(), workers.min(3));
        let mut next = 0;
        let mut tuples = 0u64;
        for task in &tasks {
            assert_eq!(task.start_pack, next);
            assert_eq!(task.tuples_before, tuples);
            assert!(task.pack_count() > 0);
            next = task.end_pack;
            tuples += (task.start_pack..task.end_pack).map(|p| col.dpn(packs[p as usize]).unwrap().nr as u64).sum::<u64>();
        }
        assert_eq!(next, 3);
        assert_eq!(tuples, ROWS as u64);
    }
}

#[test]
fn writers_clone_commit_and_roll_back() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::default();
    {
        let mut t = load(tmp.path(), &cfg);

        let col = t.column_mut(0).unwrap();
        let mut child = col.clone_for_write(1, 50).unwrap();
        assert_eq!(child.coordinate().pack, 3);
        child.update_value(0, &Value::Int(-1)).unwrap();
        col.write_pack(&mut child).unwrap();
        assert!(matches!(col.dpn(3).unwrap().stats, Stats::Int { min: -1, .. }));
        assert_eq!(t.commit(50).unwrap(), 2);

        let col = t.column_mut(0).unwrap();
        col.clone_for_write(2, 60).unwrap();
        assert_eq!(col.resolve(2, 60).unwrap(), 4);
        assert_eq!(t.rollback(60).unwrap(), 1);
        // 没有改动的提交不推进版本
        assert_eq!(t.commit(61).unwrap(), 2);
    }

    let t = TableStore::open(tmp.path(), &cfg).unwrap();
    assert_eq!(t.version(), 2);
    let col = t.column(0).unwrap();
    assert_eq!(col.visible_packs(49), vec![0, 1, 2]);
    assert_eq!(col.visible_packs(61), vec![0, 3, 2]);

    let before = col.read_pack(col.resolve(1, 49).unwrap()).unwrap();
    let after = col.read_pack(col.resolve(1, 61).unwrap()).unwrap();
    assert_eq!(before.get_value(0), qty(PACK_CAPACITY));
    assert_eq!(after.get_value(0), Value::Int(-1));
    assert_eq!(after.get_value(1), qty(PACK_CAPACITY + 1));

    assert!(matches!(t.column(9), Err(EngineError::ColumnNotFound(9))));
    assert!(matches!(col.read_pack(4), Err(EngineError::UnusedPack(4))));
}

#[test]
fn uncompressed_tables_read_back_identically() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = EngineConfig { compression_level: 0, enable_filters: false, ..Default::default() };
    drop(load(tmp.path(), &raw));
    let t = TableStore::open(tmp.path(), &raw).unwrap();
    let pack = t.column(2).unwrap().read_pack(1).unwrap();
    for i in (0..PACK_CAPACITY).step_by(997) {
        assert_eq!(pack.get_value(i).into_owned(), sku(PACK_CAPACITY + i));
    }
}
