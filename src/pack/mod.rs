//! Pack：一列中至多 65 536 行的数据块
//!
//! 磁盘上每个 pack 是 DATA 文件中的一段 blob，由其 DPN 的 `addr/len` 定位：
//! ```text
//! ┌──────────────────────────────────┐
//! │ CRC32     (u32 LE)  覆盖其后全部  │
//! │ kind      (u8)                   │
//! │ null_len  (u32 LE)               │
//! │ data_len  (u32 LE)               │
//! │ null 位图 (原始或压缩)            │  全空/全非空时为空
//! │ data      (原始或压缩)            │  null 已剔除
//! └──────────────────────────────────┘
//! ```
//! 压缩与否由 DPN 的 `null_compressed / data_compressed` 决定；DPN 是权威状态，
//! 内存中的解压缓冲只是缓存。

pub mod int;
pub mod string;

use std::io::{Cursor, Read};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{
    ColumnKind, EngineError, PackCoordinate, Result, TxnId,
};
use crate::compression::nulls;
use crate::config::EngineConfig;
use crate::dpn::Dpn;
use crate::value::Value;

pub use int::{PackInt, PackValues};
pub use string::PackStr;

const BLOB_HEADER_LEN: usize = 13;

// ── NullMask ──────────────────────────────────────────────────────────────────

/// 每行一位，1 = NULL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullMask {
    bits: Vec<u8>,
    len:  usize,
}

impl NullMask {
    pub fn new(len: usize, all_null: bool) -> Self {
        let fill = if all_null { 0xFF } else { 0 };
        let mut m = Self { bits: vec![fill; (len + 7) / 8], len };
        m.clear_tail();
        m
    }

    pub fn from_bytes(bits: Vec<u8>, len: usize) -> Result<Self> {
        if bits.len() != (len + 7) / 8 {
            return Err(EngineError::Corrupted(format!(
                "null mask of {} bytes for {len} rows", bits.len(),
            )));
        }
        let mut m = Self { bits, len };
        m.clear_tail();
        Ok(m)
    }

    fn clear_tail(&mut self) {
        if self.len % 8 != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= (1u8 << (self.len % 8)) - 1;
            }
        }
    }

    pub fn len(&self)      -> usize { self.len }
    pub fn is_empty(&self) -> bool  { self.len == 0 }
    pub fn as_bytes(&self) -> &[u8] { &self.bits }

    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.bits[i >> 3] & (1 << (i & 7)) != 0
    }

    pub fn set(&mut self, i: usize, is_null: bool) {
        debug_assert!(i < self.len);
        if is_null {
            self.bits[i >> 3] |= 1 << (i & 7);
        } else {
            self.bits[i >> 3] &= !(1 << (i & 7));
        }
    }

    pub fn push(&mut self, is_null: bool) {
        if self.len % 8 == 0 {
            self.bits.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, is_null);
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

// ── null 位图存取 ─────────────────────────────────────────────────────────────

/// 返回 `(bytes, compressed)`；全空或全非空时不存位图
pub(crate) fn save_nulls(mask: &NullMask, nn: usize, cfg: &EngineConfig, no_compress: bool) -> (Vec<u8>, bool) {
    if nn == 0 || nn == mask.len() {
        return (Vec::new(), false);
    }
    if cfg.compression_enabled() && !no_compress {
        match nulls::compress(mask.as_bytes(), mask.len()) {
            Ok(packed) if packed.len() < mask.as_bytes().len() => return (packed, true),
            Ok(_)  => {}
            Err(e) => log::debug!("null mask stored raw: {e}"),
        }
    }
    (mask.as_bytes().to_vec(), false)
}

pub(crate) fn load_nulls(bytes: &[u8], compressed: bool, nr: usize, nn: usize) -> Result<NullMask> {
    let mask = if nn == 0 {
        NullMask::new(nr, false)
    } else if nn == nr {
        NullMask::new(nr, true)
    } else if compressed {
        NullMask::from_bytes(nulls::decompress(bytes, nr)?, nr)?
    } else {
        NullMask::from_bytes(bytes.to_vec(), nr)?
    };
    if mask.count() != nn {
        return Err(EngineError::Corrupted(format!(
            "null mask has {} nulls, dpn says {nn}", mask.count(),
        )));
    }
    Ok(mask)
}

// ── blob 封装 ─────────────────────────────────────────────────────────────────

pub(crate) fn write_blob(kind: ColumnKind, nulls: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(BLOB_HEADER_LEN - 4 + nulls.len() + data.len());
    body.write_u8(kind.to_u8())?;
    body.write_u32::<LittleEndian>(nulls.len() as u32)?;
    body.write_u32::<LittleEndian>(data.len() as u32)?;
    body.extend_from_slice(nulls);
    body.extend_from_slice(data);

    let mut blob = Vec::with_capacity(body.len() + 4);
    blob.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// 校验并拆分 blob，返回 `(nulls, data)`
pub(crate) fn read_blob(blob: &[u8], kind: ColumnKind, coord: PackCoordinate) -> Result<(Vec<u8>, Vec<u8>)> {
    if blob.len() < BLOB_HEADER_LEN {
        return Err(EngineError::Corrupted(format!("pack {coord}: blob too short")));
    }
    let mut cur = Cursor::new(blob);
    let stored_crc = cur.read_u32::<LittleEndian>()?;
    if crc32fast::hash(&blob[4..]) != stored_crc {
        return Err(EngineError::ChecksumMismatch(format!("pack {coord}")));
    }
    let stored_kind = cur.read_u8()?;
    if ColumnKind::from_u8(stored_kind) != Some(kind) {
        return Err(EngineError::Corrupted(format!(
            "pack {coord}: blob kind {stored_kind}, column is {kind:?}",
        )));
    }
    let null_len = cur.read_u32::<LittleEndian>()? as usize;
    let data_len = cur.read_u32::<LittleEndian>()? as usize;
    if BLOB_HEADER_LEN + null_len + data_len != blob.len() {
        return Err(EngineError::Corrupted(format!("pack {coord}: section lengths")));
    }
    let mut nulls = vec![0u8; null_len];
    cur.read_exact(&mut nulls)?;
    let mut data = vec![0u8; data_len];
    cur.read_exact(&mut data)?;
    Ok((nulls, data))
}

// ── Pack ──────────────────────────────────────────────────────────────────────

/// 封闭的 pack 变体集合
#[derive(Debug, Clone)]
pub enum Pack {
    Int(PackInt),
    Str(PackStr),
}

impl Pack {
    /// 事务 `xmin` 新建的空 pack
    pub fn create(kind: ColumnKind, coord: PackCoordinate, xmin: TxnId) -> Self {
        match kind {
            ColumnKind::Int  => Self::Int(PackInt::new(coord, false, xmin)),
            ColumnKind::Real => Self::Int(PackInt::new(coord, true, xmin)),
            ColumnKind::Str  => Self::Str(PackStr::new(coord, xmin)),
        }
    }

    /// 由 DPN 与 DATA 中的 blob 解压出 pack
    pub fn load(kind: ColumnKind, coord: PackCoordinate, dpn: Dpn, blob: &[u8]) -> Result<Self> {
        if !dpn.used {
            return Err(EngineError::UnusedPack(coord.pack));
        }
        dpn.check()?;
        log::debug!("loading pack {coord}: nr={} nn={} len={}", dpn.nr, dpn.nn, dpn.len);
        match kind {
            ColumnKind::Int | ColumnKind::Real => {
                if dpn.is_real() != (kind == ColumnKind::Real) {
                    return Err(EngineError::Corrupted(format!("pack {coord}: stats kind")));
                }
                Ok(Self::Int(PackInt::load(coord, dpn, blob)?))
            }
            ColumnKind::Str => Ok(Self::Str(PackStr::load(coord, dpn, blob)?)),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Int(p) if p.is_real() => ColumnKind::Real,
            Self::Int(_) => ColumnKind::Int,
            Self::Str(_) => ColumnKind::Str,
        }
    }

    pub fn coordinate(&self) -> PackCoordinate {
        match self {
            Self::Int(p) => p.coordinate(),
            Self::Str(p) => p.coordinate(),
        }
    }

    pub fn dpn(&self) -> &Dpn {
        match self {
            Self::Int(p) => p.dpn(),
            Self::Str(p) => p.dpn(),
        }
    }

    pub(crate) fn dpn_mut(&mut self) -> &mut Dpn {
        match self {
            Self::Int(p) => p.dpn_mut(),
            Self::Str(p) => p.dpn_mut(),
        }
    }

    pub fn nr(&self) -> usize { self.dpn().nr as usize }
    pub fn nn(&self) -> usize { self.dpn().nn as usize }

    pub fn is_null(&self, i: usize) -> bool {
        match self {
            Self::Int(p) => p.is_null(i),
            Self::Str(p) => p.is_null(i),
        }
    }

    pub fn get_value(&self, i: usize) -> Value<'_> {
        match self {
            Self::Int(p) => p.get_value(i),
            Self::Str(p) => p.get_value(i),
        }
    }

    pub fn append_value(&mut self, v: &Value<'_>) -> Result<()> {
        match self {
            Self::Int(p) => p.append_value(v),
            Self::Str(p) => p.append_value(v),
        }
    }

    /// 原地修改第 `i` 行；`i >= nr` 会 panic
    pub fn update_value(&mut self, i: usize, v: &Value<'_>) -> Result<()> {
        match self {
            Self::Int(p) => p.update_value(i, v),
            Self::Str(p) => p.update_value(i, v),
        }
    }

    /// 压缩并生成 blob；同时更新 DPN 的压缩标志与 `len`
    pub fn save(&mut self, cfg: &EngineConfig) -> Result<Vec<u8>> {
        match self {
            Self::Int(p) => p.save(cfg),
            Self::Str(p) => p.save(cfg),
        }
    }

    /// 在 `pc` 处生成写时复制的子 pack（`local`，`base` 指向本 pack）
    pub fn clone_to(&self, pc: PackCoordinate, txn: TxnId) -> Self {
        match self {
            Self::Int(p) => Self::Int(p.clone_to(pc, txn)),
            Self::Str(p) => Self::Str(p.clone_to(pc, txn)),
        }
    }

    /// 内存占用估计，供缓存淘汰使用
    pub fn memory_size(&self) -> usize {
        match self {
            Self::Int(p) => p.memory_size(),
            Self::Str(p) => p.memory_size(),
        }
    }
}

/// 子 pack 的 DPN：local、指向父 pack、尚未落盘
pub(crate) fn child_dpn(parent: &Dpn, parent_coord: PackCoordinate, txn: TxnId) -> Dpn {
    Dpn {
        local:      true,
        synced:     false,
        base:       parent_coord.pack,
        addr:       0,
        len:        0,
        xmin:       txn,
        xmax:       crate::common::TX_INFINITE,
        tagged_ptr: 0,
        ..parent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_mask_push_get_count() {
        let mut m = NullMask::default();
        for i in 0..20 {
            m.push(i % 3 == 0);
        }
        assert_eq!(m.len(), 20);
        assert_eq!(m.count(), 7);
        assert!(m.get(18) && !m.get(19));
        m.set(18, false);
        assert_eq!(m.count(), 6);
        assert_eq!(NullMask::new(13, true).count(), 13);
    }

    #[test]
    fn blob_detects_corruption() {
        let coord = PackCoordinate::new(1, 2, 3);
        let blob = write_blob(ColumnKind::Int, &[1, 2], &[3, 4, 5]).unwrap();
        let (n, d) = read_blob(&blob, ColumnKind::Int, coord).unwrap();
        assert_eq!((n.as_slice(), d.as_slice()), (&[1u8, 2][..], &[3u8, 4, 5][..]));

        let mut bad = blob.clone();
        *bad.last_mut().unwrap() ^= 1;
        assert!(matches!(read_blob(&bad, ColumnKind::Int, coord), Err(EngineError::ChecksumMismatch(_))));
        assert!(matches!(read_blob(&blob, ColumnKind::Str, coord), Err(EngineError::Corrupted(_))));
        assert!(read_blob(&blob[..8], ColumnKind::Int, coord).is_err());
    }

    #[test]
    fn nulls_are_checked_against_dpn_count() {
        let mut m = NullMask::new(10, false);
        m.set(4, true);
        let cfg = EngineConfig::default();
        let (bytes, compressed) = save_nulls(&m, 1, &cfg, false);
        assert!(!compressed);
        assert_eq!(load_nulls(&bytes, compressed, 10, 1).unwrap(), m);
        assert!(load_nulls(&bytes, compressed, 10, 2).is_err());
        assert_eq!(save_nulls(&m, 0, &cfg, false).0.len(), 0);
    }
}
