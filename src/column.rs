//! 列存储目录
//!
//! 每列一个目录：
//! ```text
//! columns/<id>/
//! ├── META        magic "PACKCOL\0" | version (u32) | kind (u8) | width (u32)
//! │               | table (u32) | column (u32) | CRC32 (u32)
//! ├── DN          DPN 数组，每条 80 字节，下标即 pack 序号
//! ├── DATA        只追加的 pack blob，由 DPN 的 addr/len 定位
//! ├── KN
//! ├── dict/
//! ├── filters/{bloom,cmap,hist}/   仅在启用过滤器时创建
//! └── v/
//! ```
//! 版本链：根 pack 的 `base` 指向自己；写事务把可见版本复制为 `local` 子 pack
//! （`base` = 父），提交时父 pack 的 `xmax` 置为事务号、子 pack 转为已提交。

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::common::{
    ColumnId, ColumnKind, EngineError, PackCoordinate, PackIndex, Result, TableId, TxnId, PACK_CAPACITY, TX_INFINITE,
};
use crate::config::EngineConfig;
use crate::dpn::{Dpn, DPN_SIZE};
use crate::pack::Pack;
use crate::task::CTask;
use crate::value::Value;

pub const COLUMN_MAGIC:   &[u8; 8] = b"PACKCOL\0";
pub const COLUMN_VERSION: u32      = 1;

const META_LEN: usize = 8 + 4 + 1 + 4 + 4 + 4 + 4;

const META_FILE:   &str = "META";
const DN_FILE:     &str = "DN";
const DN_TMP_FILE: &str = "DN.tmp";
const DATA_FILE:   &str = "DATA";
const KN_FILE:     &str = "KN";
const DICT_DIR:    &str = "dict";
const VERSION_DIR: &str = "v";
const FILTER_DIRS: [&str; 3] = ["filters/bloom", "filters/cmap", "filters/hist"];

// ── ColumnMeta ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMeta {
    pub table:  TableId,
    pub column: ColumnId,
    pub kind:   ColumnKind,
    /// 字符串列的最大宽度，数值列为 0
    pub width:  u32,
}

impl ColumnMeta {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(META_LEN);
        out.extend_from_slice(COLUMN_MAGIC);
        out.write_u32::<LittleEndian>(COLUMN_VERSION)?;
        out.write_u8(self.kind.to_u8())?;
        out.write_u32::<LittleEndian>(self.width)?;
        out.write_u32::<LittleEndian>(self.table)?;
        out.write_u32::<LittleEndian>(self.column)?;
        let crc = crc32fast::hash(&out);
        out.write_u32::<LittleEndian>(crc)?;
        Ok(out)
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != META_LEN || &data[..8] != COLUMN_MAGIC {
            return Err(EngineError::Corrupted("column META: bad magic".into()));
        }
        let mut cur = Cursor::new(&data[8..]);
        let version = cur.read_u32::<LittleEndian>()?;
        if version != COLUMN_VERSION {
            return Err(EngineError::VersionMismatch {
                file: META_FILE.into(), found: version, expected: COLUMN_VERSION,
            });
        }
        let kind_byte = cur.read_u8()?;
        let width  = cur.read_u32::<LittleEndian>()?;
        let table  = cur.read_u32::<LittleEndian>()?;
        let column = cur.read_u32::<LittleEndian>()?;
        let crc    = cur.read_u32::<LittleEndian>()?;
        if crc32fast::hash(&data[..META_LEN - 4]) != crc {
            return Err(EngineError::ChecksumMismatch(META_FILE.into()));
        }
        let kind = ColumnKind::from_u8(kind_byte)
            .ok_or_else(|| EngineError::Corrupted(format!("column META: kind {kind_byte}")))?;
        Ok(Self { table, column, kind, width })
    }
}

// ── ColumnStore ───────────────────────────────────────────────────────────────

pub struct ColumnStore {
    dir:  PathBuf,
    meta: ColumnMeta,
    cfg:  EngineConfig,
    dpns: Vec<Dpn>,
    data: Mutex<File>,
}

impl ColumnStore {
    /// 新建列目录；`META` 已存在时失败
    pub fn create(dir: impl AsRef<Path>, meta: ColumnMeta, cfg: &EngineConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut f = OpenOptions::new().write(true).create_new(true).open(dir.join(META_FILE))?;
        f.write_all(&meta.serialize()?)?;
        f.sync_all()?;

        File::create(dir.join(DN_FILE))?;
        File::create(dir.join(KN_FILE))?;
        fs::create_dir_all(dir.join(DICT_DIR))?;
        fs::create_dir_all(dir.join(VERSION_DIR))?;
        if cfg.enable_filters {
            for sub in FILTER_DIRS {
                fs::create_dir_all(dir.join(sub))?;
            }
        }
        let data = Self::open_data(&dir)?;
        log::info!("created column {}.{} ({:?}) at {}", meta.table, meta.column, meta.kind, dir.display());
        Ok(Self { dir, meta, cfg: cfg.clone(), dpns: Vec::new(), data: Mutex::new(data) })
    }

    /// 打开已有列；残留的未提交 pack 会被回滚
    pub fn open(dir: impl AsRef<Path>, cfg: &EngineConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = ColumnMeta::deserialize(&fs::read(dir.join(META_FILE))?)?;

        let dn = fs::read(dir.join(DN_FILE))?;
        if dn.len() % DPN_SIZE != 0 {
            return Err(EngineError::Corrupted(format!(
                "{}: DN length {} is not a multiple of {DPN_SIZE}", dir.display(), dn.len(),
            )));
        }
        let mut dpns: Vec<Dpn> = dn.chunks_exact(DPN_SIZE).map(Dpn::from_bytes).collect::<Result<_>>()?;

        let data = Self::open_data(&dir)?;
        let data_len = data.metadata()?.len();
        for (i, d) in dpns.iter_mut().enumerate() {
            if d.used && d.addr + d.len as u64 > data_len {
                return Err(EngineError::Corrupted(format!("pack {i} lies beyond end of DATA")));
            }
            if d.used && d.local {
                log::warn!("column {}.{}: dropping uncommitted pack {i} of txn {}", meta.table, meta.column, d.xmin);
                *d = Dpn::unused();
            }
        }
        log::info!("opened column {}.{}: {} packs, {} bytes of data", meta.table, meta.column, dpns.len(), data_len);
        Ok(Self { dir, meta, cfg: cfg.clone(), dpns, data: Mutex::new(data) })
    }

    fn open_data(dir: &Path) -> Result<File> {
        Ok(OpenOptions::new().read(true).append(true).create(true).open(dir.join(DATA_FILE))?)
    }

    pub fn dir(&self)        -> &Path        { &self.dir }
    pub fn meta(&self)       -> &ColumnMeta  { &self.meta }
    pub fn kind(&self)       -> ColumnKind   { self.meta.kind }
    pub fn dpns(&self)       -> &[Dpn]       { &self.dpns }
    pub fn pack_count(&self) -> usize        { self.dpns.len() }

    pub fn dpn(&self, index: PackIndex) -> Result<&Dpn> {
        self.dpns.get(index as usize).ok_or(EngineError::PackNotFound(index))
    }

    fn coord(&self, index: PackIndex) -> PackCoordinate {
        PackCoordinate::new(self.meta.table, self.meta.column, index)
    }

    /// 下一个追加位置上的空 pack
    pub fn new_pack(&self, xmin: TxnId) -> Pack {
        Pack::create(self.meta.kind, self.coord(self.dpns.len() as PackIndex), xmin)
    }

    // ── 读 ────────────────────────────────────────────────────────────────────

    pub fn read_pack(&self, index: PackIndex) -> Result<Pack> {
        let dpn = self.dpn(index)?.clone();
        if !dpn.used {
            return Err(EngineError::UnusedPack(index));
        }
        let mut blob = vec![0u8; dpn.len as usize];
        {
            let mut f = self.data.lock();
            f.seek(SeekFrom::Start(dpn.addr))?;
            f.read_exact(&mut blob)?;
        }
        Pack::load(self.meta.kind, self.coord(index), dpn, &blob)
    }

    /// 逻辑 pack `index` 对事务 `reader` 可见的物理版本
    pub fn resolve(&self, index: PackIndex, reader: TxnId) -> Result<PackIndex> {
        let mut cur = index;
        loop {
            if let Some(own) = self.local_child(cur, reader) {
                return Ok(own);
            }
            let d = self.dpn(cur)?;
            if d.visible_to(reader) {
                return Ok(cur);
            }
            // 沿已提交的后继版本前进
            let next = self.dpns.iter().enumerate().position(|(j, s)| {
                j as PackIndex != cur && s.used && !s.local && s.base == cur && s.xmin == d.xmax
            });
            match next {
                Some(j) => cur = j as PackIndex,
                None    => return Err(EngineError::PackNotFound(index)),
            }
        }
    }

    fn local_child(&self, parent: PackIndex, txn: TxnId) -> Option<PackIndex> {
        self.dpns.iter()
            .position(|d| d.used && d.local && d.base == parent && d.xmin == txn)
            .map(|j| j as PackIndex)
    }

    /// 对 `reader` 可见的全部逻辑 pack（按根 pack 顺序）对应的物理序号
    pub fn visible_packs(&self, reader: TxnId) -> Vec<PackIndex> {
        self.dpns.iter()
            .enumerate()
            .filter(|(i, d)| d.used && d.base == *i as PackIndex)
            .filter_map(|(i, _)| self.resolve(i as PackIndex, reader).ok())
            .collect()
    }

    /// 按 `reader` 的快照划分并行扫描，返回可见 pack 的物理序号与任务列表；
    /// 任务区间是前者的下标，已被取代的旧版本不参与划分
    pub fn scan_tasks(&self, reader: TxnId, workers: usize) -> (Vec<PackIndex>, Vec<CTask>) {
        let packs = self.visible_packs(reader);
        let dpns: Vec<Dpn> = packs.iter().map(|&p| self.dpns[p as usize].clone()).collect();
        let tasks = CTask::split(&dpns, workers);
        (packs, tasks)
    }

    // ── 写 ────────────────────────────────────────────────────────────────────

    fn store(&mut self, pack: &mut Pack) -> Result<Dpn> {
        if pack.kind() != self.meta.kind {
            return Err(EngineError::TypeMismatch(format!(
                "{:?} pack written to {:?} column {}", pack.kind(), self.meta.kind, self.meta.column,
            )));
        }
        if self.meta.kind == ColumnKind::Str && self.meta.width > 0 && pack.dpn().maxlen > self.meta.width {
            return Err(EngineError::TypeMismatch(format!(
                "string of {} bytes in column {} of width {}", pack.dpn().maxlen, self.meta.column, self.meta.width,
            )));
        }
        let blob = pack.save(&self.cfg)?;
        // 地址取 DATA 的实际末尾，之前写失败残留的字节成为不可达空间
        let addr = {
            let mut f = self.data.lock();
            let addr = f.seek(SeekFrom::End(0))?;
            f.write_all(&blob)?;
            addr
        };

        let dpn = pack.dpn_mut();
        dpn.addr   = addr;
        dpn.len    = blob.len() as u32;
        dpn.synced = true;
        Ok(dpn.clone())
    }

    /// 把新 pack 追加为属于 `xmin` 事务的 local 根 pack，返回其序号；提交前对其它事务不可见
    pub fn append_pack(&mut self, pack: &mut Pack) -> Result<PackIndex> {
        let index = self.dpns.len() as PackIndex;
        assert_eq!(pack.coordinate(), self.coord(index), "appended pack must sit at the next slot");
        let dpn = pack.dpn_mut();
        dpn.base  = index;
        dpn.local = true;
        let dpn = self.store(pack)?;
        self.dpns.push(dpn);
        Ok(index)
    }

    /// 批量装载：按 pack 容量切分后逐个追加，返回新 pack 的序号
    pub fn append_values(&mut self, values: &[Value<'_>], txn: TxnId) -> Result<Vec<PackIndex>> {
        let mut appended = Vec::with_capacity(values.len().div_ceil(PACK_CAPACITY));
        for chunk in values.chunks(PACK_CAPACITY) {
            let mut pack = self.new_pack(txn);
            for v in chunk {
                pack.append_value(v)?;
            }
            appended.push(self.append_pack(&mut pack)?);
        }
        log::debug!("column {}.{}: loaded {} rows into {} packs", self.meta.table, self.meta.column, values.len(), appended.len());
        Ok(appended)
    }

    /// 重写一个本事务的 local pack
    pub fn write_pack(&mut self, pack: &mut Pack) -> Result<()> {
        let index = pack.coordinate().pack;
        let slot = self.dpn(index)?;
        if !slot.used {
            return Err(EngineError::UnusedPack(index));
        }
        if !slot.local || !pack.dpn().local {
            return Err(EngineError::ReadOnlyPack(index));
        }
        let dpn = self.store(pack)?;
        self.dpns[index as usize] = dpn;
        Ok(())
    }

    /// 取得事务 `txn` 可写的逻辑 pack `index`：已有 local 副本时直接返回，否则复制可见版本
    pub fn clone_for_write(&mut self, index: PackIndex, txn: TxnId) -> Result<Pack> {
        let visible = self.resolve(index, txn)?;
        if self.dpn(visible)?.local {
            return self.read_pack(visible);
        }
        // 同一版本只允许一个事务持有 local 副本
        let holder = self.dpns.iter().enumerate().find(|(j, d)| {
            *j as PackIndex != visible && d.used && d.local && d.base == visible && d.xmin != txn
        });
        if let Some((_, d)) = holder {
            return Err(EngineError::PackLocked { pack: index, owner: d.xmin });
        }
        if self.dpn(visible)?.xmax != TX_INFINITE {
            return Err(EngineError::WriteConflict(index));
        }
        let parent = self.read_pack(visible)?;
        let child_index = self.dpns.len() as PackIndex;
        let mut child = parent.clone_to(self.coord(child_index), txn);
        let dpn = self.store(&mut child)?;
        self.dpns.push(dpn);
        log::debug!("txn {txn}: pack {} cloned to {}", parent.coordinate(), child.coordinate());
        Ok(child)
    }

    /// 提交 `txn` 的全部 local pack，返回提交的 pack 数
    ///
    /// 追加的根 pack 直接转为已提交；副本把父版本的 xmax 设为 `txn`。
    /// 任一父版本已被其它事务取代时整体拒绝，不改动任何 DPN。
    pub fn commit(&mut self, txn: TxnId) -> Result<usize> {
        let children: Vec<usize> = (0..self.dpns.len())
            .filter(|&j| self.dpns[j].used && self.dpns[j].local && self.dpns[j].xmin == txn)
            .collect();
        for &j in &children {
            let parent = self.dpns[j].base;
            if parent as usize != j && self.dpn(parent)?.xmax != TX_INFINITE {
                return Err(EngineError::WriteConflict(parent));
            }
        }
        for &j in &children {
            let parent = self.dpns[j].base as usize;
            if parent != j {
                self.dpns[parent].xmax = txn;
            }
            self.dpns[j].local = false;
        }
        if !children.is_empty() {
            self.flush()?;
            log::info!("column {}.{}: txn {txn} committed {} packs", self.meta.table, self.meta.column, children.len());
        }
        Ok(children.len())
    }

    /// 丢弃 `txn` 的全部 local pack；DATA 中的 blob 成为不可达空间
    pub fn rollback(&mut self, txn: TxnId) -> Result<usize> {
        let mut dropped = 0;
        for d in self.dpns.iter_mut().filter(|d| d.used && d.local && d.xmin == txn) {
            *d = Dpn::unused();
            dropped += 1;
        }
        if dropped > 0 {
            self.flush()?;
            log::info!("column {}.{}: txn {txn} rolled back {dropped} packs", self.meta.table, self.meta.column);
        }
        Ok(dropped)
    }

    /// DATA 刷盘后经 `DN.tmp` + rename 原子替换 DN
    pub fn flush(&self) -> Result<()> {
        self.data.lock().sync_data()?;
        let tmp = self.dir.join(DN_TMP_FILE);
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            for d in &self.dpns {
                d.write_to(&mut w)?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(DN_FILE))?;
        Ok(())
    }

    /// 按 DN 中的顺序逐条返回 DPN 报告（检查工具用）
    pub fn report(&self) -> Result<Vec<String>> {
        let mut r = BufReader::new(File::open(self.dir.join(DN_FILE))?);
        let mut lines = Vec::new();
        let mut rec = [0u8; DPN_SIZE];
        loop {
            match r.read_exact(&mut rec) {
                Ok(()) => lines.push(Dpn::from_bytes(&rec)?.report()),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(lines)
    }
}
