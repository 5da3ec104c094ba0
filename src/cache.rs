//! 已解压 pack 的缓存
//!
//! 以 `PackCoordinate` 为键保存 `Arc<Pack>`，每项带锁计数：被锁住的 pack 不会被淘汰。
//! 加载（读盘 + 解压）在缓存互斥锁之外完成；两个线程同时加载同一 pack 时，
//! 后到者直接复用先插入的那份。

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::{PackCoordinate, Result};
use crate::config::{CachingLevel, EngineConfig};
use crate::guardian::PackSource;
use crate::pack::Pack;

/// 按坐标取得 pack 的底层存储
pub trait PackLoader: Send + Sync {
    fn load_pack(&self, pc: PackCoordinate) -> Result<Pack>;
}

#[derive(Debug)]
struct Entry {
    pack:     Arc<Pack>,
    locks:    usize,
    last_use: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PackCoordinate, Entry>,
    tick:    u64,
    loads:   u64,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub cached: usize,
    pub locked: usize,
    pub loads:  u64,
}

pub struct PackCache {
    loader: Arc<dyn PackLoader>,
    cfg:    EngineConfig,
    state:  Mutex<CacheState>,
}

impl PackCache {
    pub fn new(loader: Arc<dyn PackLoader>, cfg: &EngineConfig) -> Self {
        Self { loader, cfg: cfg.clone(), state: Mutex::new(CacheState::default()) }
    }

    /// 已缓存的 pack；不改变锁计数
    pub fn get(&self, pc: PackCoordinate) -> Option<Arc<Pack>> {
        let mut st = self.state.lock();
        st.tick += 1;
        let tick = st.tick;
        st.entries.get_mut(&pc).map(|e| {
            e.last_use = tick;
            Arc::clone(&e.pack)
        })
    }

    /// 取得 pack，必要时加载；不加锁，可能随时被淘汰
    pub fn fetch(&self, pc: PackCoordinate) -> Result<Arc<Pack>> {
        if let Some(p) = self.get(pc) {
            return Ok(p);
        }
        let pack = Arc::new(self.loader.load_pack(pc)?);
        let mut st = self.state.lock();
        st.loads += 1;
        let pack = self.insert_locked(&mut st, pc, pack, 0);
        self.evict_locked(&mut st);
        Ok(pack)
    }

    fn insert_locked(&self, st: &mut CacheState, pc: PackCoordinate, pack: Arc<Pack>, locks: usize) -> Arc<Pack> {
        st.tick += 1;
        let tick = st.tick;
        let e = st.entries.entry(pc).or_insert(Entry { pack, locks: 0, last_use: tick });
        e.locks += locks;
        e.last_use = tick;
        Arc::clone(&e.pack)
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state.lock();
        CacheStats {
            cached: st.entries.len(),
            locked: st.entries.values().filter(|e| e.locks > 0).count(),
            loads:  st.loads,
        }
    }

    pub fn lock_count(&self, pc: PackCoordinate) -> usize {
        self.state.lock().entries.get(&pc).map_or(0, |e| e.locks)
    }

    /// 淘汰未锁定的 pack（最久未用者优先）
    fn evict_locked(&self, st: &mut CacheState) {
        let target = match self.cfg.caching_level {
            CachingLevel::Aggressive => return,
            CachingLevel::None => 0,
            CachingLevel::Normal => {
                if st.entries.len() <= self.cfg.cache_max_packs {
                    return;
                }
                self.cfg.cache_low_watermark()
            }
        };
        let mut victims: Vec<(u64, PackCoordinate)> = st.entries.iter()
            .filter(|(_, e)| e.locks == 0)
            .map(|(pc, e)| (e.last_use, *pc))
            .collect();
        victims.sort_unstable();
        let excess = st.entries.len().saturating_sub(target);
        for (_, pc) in victims.into_iter().take(excess) {
            st.entries.remove(&pc);
        }
        if st.entries.len() > self.cfg.cache_max_packs {
            log::warn!("pack cache over limit: {} packs, all locked", st.entries.len());
        }
    }

    /// 清空所有未锁定的 pack
    pub fn release_unlocked(&self) {
        self.state.lock().entries.retain(|_, e| e.locks > 0);
    }
}

impl PackSource for PackCache {
    fn lock_pack(&self, pc: PackCoordinate) -> Result<()> {
        {
            let mut st = self.state.lock();
            st.tick += 1;
            let tick = st.tick;
            if let Some(e) = st.entries.get_mut(&pc) {
                e.locks += 1;
                e.last_use = tick;
                return Ok(());
            }
        }
        let pack = Arc::new(self.loader.load_pack(pc)?);
        let mut st = self.state.lock();
        st.loads += 1;
        self.insert_locked(&mut st, pc, pack, 1);
        self.evict_locked(&mut st);
        Ok(())
    }

    fn unlock_pack(&self, pc: PackCoordinate) {
        let mut st = self.state.lock();
        match st.entries.get_mut(&pc) {
            Some(e) if e.locks > 0 => e.locks -= 1,
            _ => {
                log::warn!("unlock of pack {pc} that is not locked");
                return;
            }
        }
        self.evict_locked(&mut st);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use crate::common::{ColumnKind, EngineError};
    use crate::value::Value;

    /// 每次加载都现造一个单行 pack，值为 pack 序号
    #[derive(Default)]
    struct SyntheticLoader {
        loads: AtomicU64,
    }

    impl PackLoader for SyntheticLoader {
        fn load_pack(&self, pc: PackCoordinate) -> Result<Pack> {
            if pc.pack == u32::MAX {
                return Err(EngineError::PackNotFound(pc.pack));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            let mut p = Pack::create(ColumnKind::Int, pc, 1);
            p.append_value(&Value::Int(pc.pack as i64))?;
            Ok(p)
        }
    }

    fn cache(cfg: EngineConfig) -> (Arc<SyntheticLoader>, PackCache) {
        let loader = Arc::new(SyntheticLoader::default());
        let cache = PackCache::new(loader.clone(), &cfg);
        (loader, cache)
    }

    fn pc(pack: u32) -> PackCoordinate { PackCoordinate::new(1, 0, pack) }

    #[test]
    fn locked_packs_are_loaded_once() {
        let (loader, c) = cache(EngineConfig::default());
        c.lock_pack(pc(3)).unwrap();
        c.lock_pack(pc(3)).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(c.lock_count(pc(3)), 2);
        assert_eq!(c.get(pc(3)).unwrap().get_value(0), Value::Int(3));
        c.unlock_pack(pc(3));
        c.unlock_pack(pc(3));
        c.unlock_pack(pc(3));
        assert_eq!(c.lock_count(pc(3)), 0);
    }

    #[test]
    fn eviction_spares_locked_packs() {
        let cfg = EngineConfig { cache_max_packs: 4, cache_release_threshold: 50, ..Default::default() };
        let (_, c) = cache(cfg);
        c.lock_pack(pc(0)).unwrap();
        for p in 1..5 {
            c.fetch(pc(p)).unwrap();
        }
        // 5 > 4：淘汰到 2 个，最久未用的未锁定 pack 先走
        let st = c.stats();
        assert_eq!((st.cached, st.locked), (2, 1));
        assert!(c.get(pc(0)).is_some());
        assert!(c.get(pc(4)).is_some());
    }

    #[test]
    fn no_caching_drops_on_unlock() {
        let cfg = EngineConfig { caching_level: CachingLevel::None, ..Default::default() };
        let (loader, c) = cache(cfg);
        c.lock_pack(pc(1)).unwrap();
        assert!(c.get(pc(1)).is_some());
        c.unlock_pack(pc(1));
        assert!(c.get(pc(1)).is_none());
        c.lock_pack(pc(1)).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_errors_leave_no_entry() {
        let (_, c) = cache(EngineConfig::default());
        assert!(c.lock_pack(pc(u32::MAX)).is_err());
        assert_eq!(c.stats(), CacheStats::default());
    }

    #[test]
    fn shared_packs_across_threads() {
        let (loader, c) = cache(EngineConfig::default());
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for p in 0..32 {
                        c.lock_pack(pc(p)).unwrap();
                        assert_eq!(c.get(pc(p)).unwrap().get_value(0), Value::Int(p as i64));
                        c.unlock_pack(pc(p));
                    }
                });
            }
        });
        let st = c.stats();
        assert_eq!((st.cached, st.locked), (32, 0));
        // 并发首次加载可能重复，但缓存里每个坐标只保留一份
        assert!(loader.loads.load(Ordering::SeqCst) >= 32);
    }
}
