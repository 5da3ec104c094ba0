//! 虚拟列 pack 守护者（VcPackGuardian）
//!
//! 多个工作线程扫描同一虚拟列时，每个线程在每个维度上至多持有一个已解压 pack，
//! 只有游标移到另一个 pack 时才释放旧的，避免同一 pack 被反复解压。
//!
//! - `LockOne`：所有线程共享一张“每维最后持有的 pack”表，适合单扫描者
//! - `LockOneThread`：每个 `WorkerId` 一张表
//!
//! 互斥锁只保护这些登记表；对 `PackSource` 的加锁/解锁（可能触发加载解压）
//! 总是在锁外进行，pack 加锁成功后才登记。

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::{ColumnId, PackCoordinate, PackIndex, Result, TableId};

/// 由调度方分配的工作线程标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianStrategy {
    LockOne,
    LockOneThread,
}

/// 被守护的 pack 来源（通常是 `PackCache`）；加锁期间 pack 不得被淘汰
pub trait PackSource: Send + Sync {
    fn lock_pack(&self, pc: PackCoordinate) -> Result<()>;
    fn unlock_pack(&self, pc: PackCoordinate);
}

/// 多维迭代器的当前位置：每维一个 pack 序号，`None` 表示该维当前无行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiIterator {
    pub worker: WorkerId,
    pub packs:  Vec<Option<PackIndex>>,
}

impl MiIterator {
    pub fn new(worker: WorkerId, packs: Vec<Option<PackIndex>>) -> Self {
        Self { worker, packs }
    }
}

type Slots = Vec<Option<PackIndex>>;

#[derive(Debug, Default)]
struct Bookkeeping {
    initialized: bool,
    threads:     usize,
    shared:      Slots,
    per_worker:  HashMap<WorkerId, Slots>,
}

pub struct VcPackGuardian {
    source:   Arc<dyn PackSource>,
    strategy: GuardianStrategy,
    /// 每一维对应的 (表, 列)
    dims:     Vec<(TableId, ColumnId)>,
    state:    Mutex<Bookkeeping>,
}

impl VcPackGuardian {
    pub fn new(source: Arc<dyn PackSource>, strategy: GuardianStrategy, dims: Vec<(TableId, ColumnId)>) -> Self {
        Self { source, strategy, dims, state: Mutex::new(Bookkeeping::default()) }
    }

    pub fn strategy(&self) -> GuardianStrategy { self.strategy }
    pub fn dims(&self)     -> usize            { self.dims.len() }

    fn coord(&self, dim: usize, pack: PackIndex) -> PackCoordinate {
        let (table, column) = self.dims[dim];
        PackCoordinate::new(table, column, pack)
    }

    /// 按预计线程数建立登记表；重复调用只会扩大预留
    pub fn initialize(&self, no_th: usize) {
        let mut st = self.state.lock();
        Self::initialize_locked(&mut st, self.dims.len(), no_th);
    }

    fn initialize_locked(st: &mut Bookkeeping, dims: usize, no_th: usize) {
        if st.initialized && st.threads >= no_th {
            return;
        }
        if !st.initialized {
            st.shared = vec![None; dims];
        }
        st.per_worker.reserve(no_th.saturating_sub(st.per_worker.len()));
        st.threads = st.threads.max(no_th);
        st.initialized = true;
        log::debug!("pack guardian initialized: dims={dims} threads={no_th}");
    }

    /// 让迭代器当前所在的每个 pack 处于加锁状态，并释放该线程此前在对应维上持有的 pack
    ///
    /// 只有加锁成功的 pack 才写入登记表，登记表中的每一项都恰好对应来源上的一次加锁。
    pub fn lock_packrow(&self, iter: &MiIterator) -> Result<()> {
        assert_eq!(iter.packs.len(), self.dims.len(), "iterator dimension count does not match guardian");

        let wanted: Vec<(usize, PackCoordinate)> = {
            let mut st = self.state.lock();
            Self::initialize_locked(&mut st, self.dims.len(), 1);
            let slots = self.slots_mut(&mut st, iter.worker);
            iter.packs.iter()
                .zip(slots.iter())
                .enumerate()
                .filter_map(|(dim, (&want, &held))| match want {
                    Some(p) if want != held => Some((dim, self.coord(dim, p))),
                    _ => None,
                })
                .collect()
        };
        if wanted.is_empty() {
            return Ok(());
        }

        let results: Vec<_> = wanted.into_iter()
            .map(|(dim, pc)| (dim, pc, self.source.lock_pack(pc)))
            .collect();

        // 登记新 pack；被替换掉的旧项以及重复的加锁在锁外归还
        let mut to_unlock = Vec::new();
        let mut first_err = None;
        {
            let mut st = self.state.lock();
            let slots = self.slots_mut(&mut st, iter.worker);
            for (dim, pc, res) in results {
                match res {
                    Ok(()) => match slots[dim].replace(pc.pack) {
                        Some(old) if old == pc.pack => to_unlock.push(pc),
                        Some(old) => to_unlock.push(self.coord(dim, old)),
                        None => {}
                    },
                    Err(e) => {
                        log::warn!("guardian: lock of pack {pc} failed: {e}");
                        if let Some(old) = slots[dim].take() {
                            to_unlock.push(self.coord(dim, old));
                        }
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        for pc in to_unlock {
            self.source.unlock_pack(pc);
        }
        first_err.map_or(Ok(()), Err)
    }

    fn slots_mut<'a>(&self, st: &'a mut Bookkeeping, worker: WorkerId) -> &'a mut Slots {
        match self.strategy {
            GuardianStrategy::LockOne => &mut st.shared,
            GuardianStrategy::LockOneThread => {
                let dims = self.dims.len();
                st.per_worker.entry(worker).or_insert_with(|| vec![None; dims])
            }
        }
    }

    /// 该线程当前持有的 pack（`LockOne` 下为共享表）
    pub fn held(&self, worker: WorkerId) -> Vec<Option<PackIndex>> {
        let st = self.state.lock();
        match self.strategy {
            GuardianStrategy::LockOne => st.shared.clone(),
            GuardianStrategy::LockOneThread => st.per_worker.get(&worker).cloned().unwrap_or_default(),
        }
    }

    /// 释放该线程持有的全部 pack；`LockOne` 下释放共享表。未持有任何 pack 时为空操作
    pub fn unlock_all_for(&self, worker: WorkerId) {
        let released: Vec<PackCoordinate> = {
            let mut st = self.state.lock();
            let slots = match self.strategy {
                GuardianStrategy::LockOne => Some(&mut st.shared),
                GuardianStrategy::LockOneThread => st.per_worker.get_mut(&worker),
            };
            match slots {
                Some(slots) => slots.iter_mut()
                    .enumerate()
                    .filter_map(|(dim, s)| s.take().map(|p| self.coord(dim, p)))
                    .collect(),
                None => Vec::new(),
            }
        };
        for pc in released {
            self.source.unlock_pack(pc);
        }
    }

    /// 释放所有线程持有的全部 pack
    pub fn unlock_all(&self) {
        let released: Vec<PackCoordinate> = {
            let mut st = self.state.lock();
            let st = &mut *st;
            std::iter::once(&mut st.shared)
                .chain(st.per_worker.values_mut())
                .flat_map(|slots| slots.iter_mut().enumerate())
                .filter_map(|(dim, s)| s.take().map(|p| self.coord(dim, p)))
                .collect()
        };
        if !released.is_empty() {
            log::debug!("guardian releasing {} packs", released.len());
        }
        for pc in released {
            self.source.unlock_pack(pc);
        }
    }

    /// 开始一次扫描；返回的句柄在离开作用域时释放该线程的全部 pack
    pub fn scan(&self, worker: WorkerId) -> ScanGuard<'_> {
        ScanGuard { guardian: self, worker }
    }
}

impl Drop for VcPackGuardian {
    fn drop(&mut self) {
        self.unlock_all();
    }
}

/// 单个工作线程的扫描句柄
pub struct ScanGuard<'g> {
    guardian: &'g VcPackGuardian,
    worker:   WorkerId,
}

impl ScanGuard<'_> {
    pub fn worker(&self) -> WorkerId { self.worker }

    /// 移动到新的一行（各维 pack 序号）
    pub fn lock_packrow(&self, packs: &[Option<PackIndex>]) -> Result<()> {
        self.guardian.lock_packrow(&MiIterator::new(self.worker, packs.to_vec()))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.guardian.unlock_all_for(self.worker);
    }
}
