//! 数值 pack（整数 / 双精度）
//!
//! 整数以“相对 pack 最小值的偏移”存放，宽度（1/2/4/8 字节）按值域选择，
//! 值域变化时整体换宽（`expand_or_shrink`）；null 行占位为 0。
//! 双精度直接存 `f64`。保存时剔除 null 后再压缩，加载时解压并插回 null。

use byteorder::{ByteOrder, LittleEndian};
use crate::common::{ColumnKind, EngineError, PackCoordinate, Result, TxnId, PACK_CAPACITY};
use crate::compression::{lz4_compress, lz4_decompress, num};
use crate::config::EngineConfig;
use crate::dpn::{Dpn, Stats};
use crate::value::Value;
use super::{child_dpn, load_nulls, read_blob, save_nulls, write_blob, NullMask};

/// 无损容纳 `0..=range` 所需的最小字节宽度
pub fn value_size(range: u64) -> usize {
    if range <= u8::MAX as u64 {
        1
    } else if range <= u16::MAX as u64 {
        2
    } else if range <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

// ── PackValues ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PackValues {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    Real(Vec<f64>),
}

impl PackValues {
    pub fn zeroed(width: usize, len: usize) -> Self {
        match width {
            1 => Self::U8(vec![0; len]),
            2 => Self::U16(vec![0; len]),
            4 => Self::U32(vec![0; len]),
            _ => Self::U64(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(v)   => v.len(),
            Self::U16(v)  => v.len(),
            Self::U32(v)  => v.len(),
            Self::U64(v)  => v.len(),
            Self::Real(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// 每个元素的字节宽度
    pub fn width(&self) -> usize {
        match self {
            Self::U8(_)  => 1,
            Self::U16(_) => 2,
            Self::U32(_) => 4,
            Self::U64(_) | Self::Real(_) => 8,
        }
    }

    /// 整数偏移；浮点返回其位模式
    pub fn get_u64(&self, i: usize) -> u64 {
        match self {
            Self::U8(v)   => v[i] as u64,
            Self::U16(v)  => v[i] as u64,
            Self::U32(v)  => v[i] as u64,
            Self::U64(v)  => v[i],
            Self::Real(v) => v[i].to_bits(),
        }
    }

    pub fn set_u64(&mut self, i: usize, x: u64) {
        match self {
            Self::U8(v)   => v[i] = x as u8,
            Self::U16(v)  => v[i] = x as u16,
            Self::U32(v)  => v[i] = x as u32,
            Self::U64(v)  => v[i] = x,
            Self::Real(v) => v[i] = f64::from_bits(x),
        }
    }

    pub fn push_u64(&mut self, x: u64) {
        match self {
            Self::U8(v)   => v.push(x as u8),
            Self::U16(v)  => v.push(x as u16),
            Self::U32(v)  => v.push(x as u32),
            Self::U64(v)  => v.push(x),
            Self::Real(v) => v.push(f64::from_bits(x)),
        }
    }

    fn get_f64(&self, i: usize) -> f64 {
        f64::from_bits(self.get_u64(i))
    }

    /// 换到能容纳 `0..=range` 的最小宽度；调用方保证现有偏移都不超过 `range`
    pub fn expand_or_shrink(&mut self, range: u64) {
        if matches!(self, Self::Real(_)) {
            return;
        }
        let width = value_size(range);
        if width == self.width() {
            return;
        }
        let mut resized = Self::zeroed(width, self.len());
        for i in 0..self.len() {
            resized.set_u64(i, self.get_u64(i));
        }
        *self = resized;
    }
}

// ── PackInt ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PackInt {
    coord: PackCoordinate,
    dpn:   Dpn,
    data:  PackValues,
    nulls: NullMask,
}

impl PackInt {
    pub fn new(coord: PackCoordinate, is_real: bool, xmin: TxnId) -> Self {
        let data = if is_real { PackValues::Real(Vec::new()) } else { PackValues::U8(Vec::new()) };
        Self { coord, dpn: Dpn::new_pack(is_real, xmin), data, nulls: NullMask::default() }
    }

    pub fn coordinate(&self) -> PackCoordinate { self.coord }
    pub fn dpn(&self)        -> &Dpn           { &self.dpn }
    pub fn values(&self)     -> &PackValues    { &self.data }
    pub fn is_real(&self)    -> bool           { self.dpn.is_real() }

    pub(crate) fn dpn_mut(&mut self) -> &mut Dpn { &mut self.dpn }

    fn kind(&self) -> ColumnKind {
        if self.is_real() { ColumnKind::Real } else { ColumnKind::Int }
    }

    fn rows(&self) -> usize { self.dpn.nr as usize }

    fn check_row(&self, i: usize) {
        assert!(i < self.rows(), "row {i} out of range for pack {} ({} rows)", self.coord, self.rows());
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.check_row(i);
        self.nulls.get(i)
    }

    /// 整数值域 `max - min`
    fn range(&self) -> u64 {
        match self.dpn.stats {
            Stats::Int { min, max, .. } if self.dpn.nr > self.dpn.nn => max.wrapping_sub(min) as u64,
            _ => 0,
        }
    }

    fn int_min(&self) -> i64 {
        match self.dpn.stats {
            Stats::Int { min, .. } => min,
            Stats::Real { .. }     => 0,
        }
    }

    fn int_at(&self, i: usize) -> i64 {
        self.int_min().wrapping_add(self.data.get_u64(i) as i64)
    }

    pub fn get_value(&self, i: usize) -> Value<'static> {
        self.check_row(i);
        if self.nulls.get(i) {
            Value::Null
        } else if self.is_real() {
            Value::Real(self.data.get_f64(i))
        } else {
            Value::Int(self.int_at(i))
        }
    }

    /// 类型检查；返回值的原始位（整数或 f64 位模式），`None` 表示 NULL
    fn accept(&self, v: &Value<'_>) -> Result<Option<u64>> {
        match (v, self.is_real()) {
            (Value::Null, _)        => Ok(None),
            (Value::Int(x), false)  => Ok(Some(*x as u64)),
            (Value::Real(x), true)  => Ok(Some(x.to_bits())),
            _ => Err(EngineError::TypeMismatch(format!(
                "{} value for {} pack {}",
                v.kind_name(), if self.is_real() { "real" } else { "int" }, self.coord,
            ))),
        }
    }

    // ── 追加 / 修改 ───────────────────────────────────────────────────────────

    pub fn append_value(&mut self, v: &Value<'_>) -> Result<()> {
        if self.rows() >= PACK_CAPACITY {
            return Err(EngineError::PackFull);
        }
        let x = self.accept(v)?;
        let had_values = self.dpn.nr > self.dpn.nn;
        let i = self.rows();
        self.nulls.push(true);
        self.data.push_u64(0);
        self.dpn.nr += 1;
        self.dpn.nn += 1;
        if let Some(bits) = x {
            self.nulls.set(i, false);
            self.dpn.nn -= 1;
            self.include(i, bits, had_values);
        }
        self.dpn.synced = false;
        Ok(())
    }

    /// 原地修改第 `i` 行；`i >= nr` 会 panic，类型不符返回错误
    pub fn update_value(&mut self, i: usize, v: &Value<'_>) -> Result<()> {
        self.check_row(i);
        let x = self.accept(v)?;
        self.dpn.synced = false;

        if !self.nulls.get(i) {
            let old = self.data.get_u64(i);
            let old = if self.is_real() { old } else { self.int_at(i) as u64 };
            self.nulls.set(i, true);
            self.dpn.nn += 1;
            self.data.set_u64(i, 0);
            self.after_removal(old);
        }
        if let Some(bits) = x {
            let had_values = self.dpn.nr > self.dpn.nn;
            self.nulls.set(i, false);
            self.dpn.nn -= 1;
            self.include(i, bits, had_values);
        }
        Ok(())
    }

    /// 第 `i` 行已标记为非空；把值写入并扩展统计
    fn include(&mut self, i: usize, bits: u64, had_values: bool) {
        match self.dpn.stats {
            Stats::Real { min, max, sum } => {
                let x = f64::from_bits(bits);
                self.dpn.stats = if had_values {
                    Stats::Real { min: min.min(x), max: max.max(x), sum: sum + x }
                } else {
                    Stats::Real { min: x, max: x, sum: x }
                };
                self.data.set_u64(i, bits);
            }
            Stats::Int { min, max, sum } => {
                let x = bits as i64;
                if !had_values {
                    self.dpn.stats = Stats::Int { min: x, max: x, sum: x };
                    self.data = PackValues::zeroed(1, self.rows());
                    return;
                }
                let (new_min, new_max) = (min.min(x), max.max(x));
                self.data.expand_or_shrink(new_max.wrapping_sub(new_min) as u64);
                if new_min < min {
                    let delta = min.wrapping_sub(new_min) as u64;
                    for j in 0..self.rows() {
                        if !self.nulls.get(j) && j != i {
                            self.data.set_u64(j, self.data.get_u64(j) + delta);
                        }
                    }
                }
                self.dpn.stats = Stats::Int { min: new_min, max: new_max, sum: sum.wrapping_add(x) };
                self.data.set_u64(i, x.wrapping_sub(new_min) as u64);
            }
        }
    }

    /// 去掉一个值后维护统计；去掉的是极值时整体重算
    fn after_removal(&mut self, old: u64) {
        if self.dpn.nr == self.dpn.nn {
            self.dpn.stats = Stats::empty(self.is_real());
            if !self.is_real() {
                self.data = PackValues::zeroed(1, self.rows());
            }
            return;
        }
        match self.dpn.stats {
            Stats::Real { min, max, sum } => {
                let x = f64::from_bits(old);
                if x == min || x == max {
                    self.recompute_stats();
                } else {
                    self.dpn.stats = Stats::Real { min, max, sum: sum - x };
                }
            }
            Stats::Int { min, max, sum } => {
                let x = old as i64;
                if x == min || x == max {
                    self.recompute_stats();
                } else {
                    self.dpn.stats = Stats::Int { min, max, sum: sum.wrapping_sub(x) };
                }
            }
        }
    }

    /// 从现有非空值重算 min/max/sum；整数按新最小值重定基并收缩宽度
    fn recompute_stats(&mut self) {
        let rows: Vec<usize> = (0..self.rows()).filter(|&j| !self.nulls.get(j)).collect();
        if rows.is_empty() {
            self.dpn.stats = Stats::empty(self.is_real());
            return;
        }
        if self.is_real() {
            let vals: Vec<f64> = rows.iter().map(|&j| self.data.get_f64(j)).collect();
            self.dpn.stats = Stats::Real {
                min: vals.iter().copied().fold(f64::INFINITY, f64::min),
                max: vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                sum: vals.iter().sum(),
            };
            return;
        }
        let vals: Vec<i64> = rows.iter().map(|&j| self.int_at(j)).collect();
        let min = vals.iter().copied().min().unwrap_or(0);
        let max = vals.iter().copied().max().unwrap_or(0);
        let sum = vals.iter().fold(0i64, |s, &v| s.wrapping_add(v));
        let mut data = PackValues::zeroed(value_size(max.wrapping_sub(min) as u64), self.rows());
        for (&j, &v) in rows.iter().zip(&vals) {
            data.set_u64(j, v.wrapping_sub(min) as u64);
        }
        self.data = data;
        self.dpn.stats = Stats::Int { min, max, sum };
    }

    // ── 保存 ──────────────────────────────────────────────────────────────────

    pub fn save(&mut self, cfg: &EngineConfig) -> Result<Vec<u8>> {
        self.dpn.check()?;
        let (nr, nn) = (self.rows(), self.dpn.nn as usize);
        if !self.is_real() {
            self.data.expand_or_shrink(self.range());
        }
        let compress = cfg.compression_enabled() && !self.dpn.no_compress;
        let (null_bytes, null_compressed) = save_nulls(&self.nulls, nn, cfg, self.dpn.no_compress);

        let (data, data_compressed) = if nr == nn {
            (Vec::new(), false)
        } else if self.is_real() {
            self.remove_nulls_real(cfg, compress)?
        } else {
            self.remove_nulls_and_compress(compress)
        };

        self.dpn.null_compressed = null_compressed;
        self.dpn.data_compressed = data_compressed;
        let blob = write_blob(self.kind(), &null_bytes, &data)?;
        self.dpn.len = blob.len() as u32;
        log::debug!(
            "saved pack {}: nr={nr} nn={nn} width={} blob={}B compressed={}/{}",
            self.coord, self.data.width(), blob.len(), null_compressed, data_compressed,
        );
        Ok(blob)
    }

    fn non_null_rows(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.rows()).filter(|&j| !self.nulls.get(j))
    }

    fn remove_nulls_and_compress(&self, compress: bool) -> (Vec<u8>, bool) {
        let offsets: Vec<u64> = self.non_null_rows().map(|j| self.data.get_u64(j)).collect();
        let maxv  = self.range();
        let width = value_size(maxv);
        if compress {
            match num::compress(&offsets, maxv) {
                Ok(packed) if packed.len() < offsets.len() * width => return (packed, true),
                Ok(_)  => {}
                Err(e) => log::warn!("pack {}: numeric codec failed ({e}), storing raw", self.coord),
            }
        }
        let mut raw = Vec::with_capacity(offsets.len() * width);
        for o in offsets {
            raw.extend_from_slice(&o.to_le_bytes()[..width]);
        }
        (raw, false)
    }

    fn remove_nulls_real(&self, cfg: &EngineConfig, compress: bool) -> Result<(Vec<u8>, bool)> {
        let mut raw = Vec::with_capacity((self.rows() - self.dpn.nn as usize) * 8);
        for j in self.non_null_rows() {
            raw.extend_from_slice(&self.data.get_f64(j).to_le_bytes());
        }
        if compress && cfg.lz4_enabled() {
            let packed = lz4_compress(&raw)?;
            if packed.len() < raw.len() {
                return Ok((packed, true));
            }
        }
        Ok((raw, false))
    }

    // ── 加载 ──────────────────────────────────────────────────────────────────

    pub fn load(coord: PackCoordinate, dpn: Dpn, blob: &[u8]) -> Result<Self> {
        let kind = if dpn.is_real() { ColumnKind::Real } else { ColumnKind::Int };
        let (null_bytes, data_bytes) = read_blob(blob, kind, coord)?;
        let (nr, nn) = (dpn.nr as usize, dpn.nn as usize);
        let nulls   = load_nulls(&null_bytes, dpn.null_compressed, nr, nn)?;
        let present = nr - nn;
        let corrupt = |what: &str| EngineError::Corrupted(format!("pack {coord}: {what}"));

        let data = match dpn.stats {
            Stats::Real { .. } => {
                let raw = if dpn.data_compressed {
                    lz4_decompress(&data_bytes, present * 8)?
                } else {
                    data_bytes
                };
                if raw.len() != present * 8 {
                    return Err(corrupt("real payload length"));
                }
                let mut vals = raw.chunks_exact(8).map(LittleEndian::read_f64);
                let mut out = vec![0.0f64; nr];
                for (j, slot) in out.iter_mut().enumerate() {
                    if !nulls.get(j) {
                        *slot = vals.next().ok_or_else(|| corrupt("missing value"))?;
                    }
                }
                PackValues::Real(out)
            }
            Stats::Int { min, max, .. } => {
                if present > 0 && max < min {
                    return Err(corrupt("min > max"));
                }
                let maxv = if present > 0 { max.wrapping_sub(min) as u64 } else { 0 };
                let offsets = if dpn.data_compressed {
                    let (m, vals) = num::decompress(&data_bytes, present)?;
                    if m != maxv || vals.len() != present {
                        return Err(corrupt("numeric payload header"));
                    }
                    vals
                } else {
                    let width = value_size(maxv);
                    if data_bytes.len() != present * width {
                        return Err(corrupt("raw payload length"));
                    }
                    data_bytes.chunks_exact(width).map(|c| LittleEndian::read_uint(c, width)).collect()
                };
                Self::decompress_and_insert_nulls(&offsets, &nulls, maxv)
                    .ok_or_else(|| corrupt("offset above range"))?
            }
        };
        Ok(Self { coord, dpn, data, nulls })
    }

    fn decompress_and_insert_nulls(offsets: &[u64], nulls: &NullMask, maxv: u64) -> Option<PackValues> {
        let mut data = PackValues::zeroed(value_size(maxv), nulls.len());
        let mut it = offsets.iter();
        for j in 0..nulls.len() {
            if !nulls.get(j) {
                let &o = it.next()?;
                if o > maxv {
                    return None;
                }
                data.set_u64(j, o);
            }
        }
        Some(data)
    }

    // ── 写时复制 ──────────────────────────────────────────────────────────────

    pub fn clone_to(&self, pc: PackCoordinate, txn: TxnId) -> Self {
        Self {
            coord: pc,
            dpn:   child_dpn(&self.dpn, self.coord, txn),
            data:  self.data.clone(),
            nulls: self.nulls.clone(),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.data.len() * self.data.width() + self.nulls.as_bytes().len()
    }
}
