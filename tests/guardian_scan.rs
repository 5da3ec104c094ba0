//! 多线程扫描：CTask 划分 + VcPackGuardian 加锁 + PackCache 取数

use std::sync::Arc;

use olap_pack_storage::cache::{PackCache, PackLoader};
use olap_pack_storage::common::{PackCoordinate, PACK_CAPACITY};
use olap_pack_storage::guardian::{GuardianStrategy, MiIterator, PackSource, VcPackGuardian, WorkerId};
use olap_pack_storage::table::{ColumnDef, TableStore};
use olap_pack_storage::{EngineConfig, Value};

const TABLE: u32 = 3;
const ROWS:  usize = 4 * PACK_CAPACITY + 37_856;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(dir: &std::path::Path, cfg: &EngineConfig) -> Arc<TableStore> {
    let mut t = TableStore::create(dir, TABLE, vec![ColumnDef::int(0, "a"), ColumnDef::real(1, "b")], cfg).unwrap();
    let a: Vec<Value> = (0..ROWS)
        .map(|i| if i % 5 == 0 { Value::Null } else { Value::Int(i as i64) })
        .collect();
    let b: Vec<Value> = (0..ROWS).map(|i| Value::Real((i % 100) as f64)).collect();
    t.column_mut(0).unwrap().append_values(&a, 1).unwrap();
    t.column_mut(1).unwrap().append_values(&b, 1).unwrap();
    assert_eq!(t.commit(1).unwrap(), 1);
    Arc::new(t)
}

fn pc(column: u32, pack: u32) -> PackCoordinate {
    PackCoordinate::new(TABLE, column, pack)
}

#[test]
fn parallel_scan_sums_every_row_once() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::default();
    let table = build(tmp.path(), &cfg);
    let loader: Arc<dyn PackLoader> = table.clone();
    let cache = Arc::new(PackCache::new(loader, &cfg));
    let source: Arc<dyn PackSource> = cache.clone();
    let guardian = VcPackGuardian::new(source, GuardianStrategy::LockOneThread, vec![(TABLE, 0), (TABLE, 1)]);

    let (packs, tasks) = table.column(0).unwrap().scan_tasks(2, 3);
    assert_eq!(table.column(1).unwrap().visible_packs(2), packs);
    guardian.initialize(tasks.len());
    assert_eq!(tasks.len(), 3);

    let partials: Vec<(i64, f64)> = std::thread::scope(|s| {
        let handles: Vec<_> = tasks.iter()
            .map(|task| {
                let (guardian, cache, packs) = (&guardian, &cache, &packs);
                s.spawn(move || {
                    let scan = guardian.scan(WorkerId(task.task_id as u32));
                    let (mut ints, mut reals) = (0i64, 0f64);
                    for &p in &packs[task.start_pack as usize..task.end_pack as usize] {
                        scan.lock_packrow(&[Some(p), Some(p)]).unwrap();
                        assert_eq!(guardian.held(scan.worker()), vec![Some(p), Some(p)]);
                        let a = cache.get(pc(0, p)).unwrap();
                        let b = cache.get(pc(1, p)).unwrap();
                        assert_eq!(a.nr(), b.nr());
                        for i in 0..a.nr() {
                            ints += a.get_value(i).as_i64().unwrap_or(0);
                            reals += b.get_value(i).as_f64().unwrap_or(0.0);
                        }
                    }
                    (ints, reals)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let ints: i64 = partials.iter().map(|p| p.0).sum();
    let reals: f64 = partials.iter().map(|p| p.1).sum();
    let expect_ints: i64 = (0..ROWS as i64).filter(|i| i % 5 != 0).sum();
    let expect_reals: f64 = (0..ROWS).map(|i| (i % 100) as f64).sum();
    assert_eq!(ints, expect_ints);
    assert_eq!(reals, expect_reals);

    let st = cache.stats();
    assert_eq!(st.locked, 0);
    assert_eq!(st.loads, 10);
    assert_eq!(st.cached, 10);
}

#[test]
fn dropping_the_guardian_releases_held_packs() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::default();
    let table = build(tmp.path(), &cfg);
    let cache = Arc::new(PackCache::new(table, &cfg));
    {
        let guardian = VcPackGuardian::new(cache.clone(), GuardianStrategy::LockOne, vec![(TABLE, 0), (TABLE, 1)]);
        guardian.lock_packrow(&MiIterator::new(WorkerId(0), vec![Some(0), None])).unwrap();
        guardian.lock_packrow(&MiIterator::new(WorkerId(1), vec![Some(2), Some(4)])).unwrap();
        // LockOne 下所有线程共用一张登记表：pack 0 已被换成 pack 2
        assert_eq!(guardian.held(WorkerId(0)), vec![Some(2), Some(4)]);
        assert_eq!(cache.lock_count(pc(0, 0)), 0);
        assert_eq!(cache.stats().locked, 2);
    }
    assert_eq!(cache.stats().locked, 0);
}

#[test]
fn missing_packs_surface_as_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::default();
    let table = build(tmp.path(), &cfg);
    let cache = Arc::new(PackCache::new(table, &cfg));
    let guardian = VcPackGuardian::new(cache.clone(), GuardianStrategy::LockOneThread, vec![(TABLE, 0)]);

    let scan = guardian.scan(WorkerId(9));
    assert!(scan.lock_packrow(&[Some(99)]).is_err());
    assert_eq!(guardian.held(WorkerId(9)), vec![None]);
    scan.lock_packrow(&[Some(1)]).unwrap();
    assert_eq!(cache.lock_count(pc(0, 1)), 1);
    drop(scan);
    assert_eq!(cache.lock_count(pc(0, 1)), 0);
}
