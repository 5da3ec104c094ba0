//! 字符串 pack
//!
//! 每行一个字节串，null 行在内存中为空串并由 null 位图区分。
//! 保存时 data 段首字节为编码方式：
//! ```text
//! 0  原始     每个非空值: len (u32 LE) + 字节
//! 1  字典     dict_len (u32 LE) + TextStat 表 + 数值压缩的码序列
//! 2  lz4      raw_len (u32 LE) + lz4(原始格式)
//! ```
//! 字典编码只在最长值不超过 `MAX_TEXT_WIDTH` 时尝试，取较小者。

use std::io::{Cursor, Read};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{ColumnKind, EngineError, PackCoordinate, Result, TxnId, PACK_CAPACITY};
use crate::compression::text_stat::{TextStat, MAX_TEXT_WIDTH};
use crate::compression::{lz4_compress, lz4_decompress, num};
use crate::config::EngineConfig;
use crate::dpn::{Dpn, Stats};
use crate::value::Value;
use super::{child_dpn, load_nulls, read_blob, save_nulls, write_blob, NullMask};

const MODE_RAW:  u8 = 0;
const MODE_DICT: u8 = 1;
const MODE_LZ4:  u8 = 2;

#[derive(Debug, Clone)]
pub struct PackStr {
    coord:  PackCoordinate,
    dpn:    Dpn,
    values: Vec<Vec<u8>>,
    nulls:  NullMask,
}

impl PackStr {
    pub fn new(coord: PackCoordinate, xmin: TxnId) -> Self {
        Self { coord, dpn: Dpn::new_pack(false, xmin), values: Vec::new(), nulls: NullMask::default() }
    }

    pub fn coordinate(&self) -> PackCoordinate { self.coord }
    pub fn dpn(&self)        -> &Dpn           { &self.dpn }

    pub(crate) fn dpn_mut(&mut self) -> &mut Dpn { &mut self.dpn }

    fn rows(&self) -> usize { self.dpn.nr as usize }

    fn check_row(&self, i: usize) {
        assert!(i < self.rows(), "row {i} out of range for pack {} ({} rows)", self.coord, self.rows());
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.check_row(i);
        self.nulls.get(i)
    }

    /// 返回借用 pack 缓冲区的视图
    pub fn get_value(&self, i: usize) -> Value<'_> {
        self.check_row(i);
        if self.nulls.get(i) {
            Value::Null
        } else {
            Value::StrView(&self.values[i])
        }
    }

    fn accept(&self, v: &Value<'_>) -> Result<Option<Vec<u8>>> {
        match v {
            Value::Null => Ok(None),
            Value::Str(_) | Value::StrView(_) => Ok(v.as_bytes().map(<[u8]>::to_vec)),
            _ => Err(EngineError::TypeMismatch(format!(
                "{} value for string pack {}", v.kind_name(), self.coord,
            ))),
        }
    }

    /// 总字节数记在 `sum`，最长值记在 `maxlen`
    fn refresh_stats(&mut self) {
        let mut total = 0i64;
        let mut maxlen = 0usize;
        for (j, v) in self.values.iter().enumerate() {
            if !self.nulls.get(j) {
                total += v.len() as i64;
                maxlen = maxlen.max(v.len());
            }
        }
        self.dpn.stats  = Stats::Int { min: 0, max: 0, sum: total };
        self.dpn.maxlen = maxlen as u32;
    }

    pub fn append_value(&mut self, v: &Value<'_>) -> Result<()> {
        if self.rows() >= PACK_CAPACITY {
            return Err(EngineError::PackFull);
        }
        let x = self.accept(v)?;
        self.nulls.push(x.is_none());
        match x {
            Some(bytes) => {
                self.dpn.maxlen = self.dpn.maxlen.max(bytes.len() as u32);
                if let Stats::Int { sum, .. } = &mut self.dpn.stats {
                    *sum += bytes.len() as i64;
                }
                self.values.push(bytes);
            }
            None => {
                self.dpn.nn += 1;
                self.values.push(Vec::new());
            }
        }
        self.dpn.nr += 1;
        self.dpn.synced = false;
        Ok(())
    }

    /// 原地修改第 `i` 行；`i >= nr` 会 panic
    pub fn update_value(&mut self, i: usize, v: &Value<'_>) -> Result<()> {
        self.check_row(i);
        let x = self.accept(v)?;
        let was_null = self.nulls.get(i);
        match x {
            Some(bytes) => {
                if was_null {
                    self.dpn.nn -= 1;
                }
                self.nulls.set(i, false);
                self.values[i] = bytes;
            }
            None => {
                if !was_null {
                    self.dpn.nn += 1;
                }
                self.nulls.set(i, true);
                self.values[i].clear();
            }
        }
        self.refresh_stats();
        self.dpn.synced = false;
        Ok(())
    }

    // ── 保存 ──────────────────────────────────────────────────────────────────

    pub fn save(&mut self, cfg: &EngineConfig) -> Result<Vec<u8>> {
        self.dpn.check()?;
        let nn = self.dpn.nn as usize;
        let compress = cfg.compression_enabled() && !self.dpn.no_compress;
        let (null_bytes, null_compressed) = save_nulls(&self.nulls, nn, cfg, self.dpn.no_compress);

        let present: Vec<&[u8]> = (0..self.rows())
            .filter(|&j| !self.nulls.get(j))
            .map(|j| self.values[j].as_slice())
            .collect();
        let (data, data_compressed) = if present.is_empty() {
            (Vec::new(), false)
        } else {
            self.encode_values(&present, cfg, compress)?
        };

        self.dpn.null_compressed = null_compressed;
        self.dpn.data_compressed = data_compressed;
        let blob = write_blob(ColumnKind::Str, &null_bytes, &data)?;
        self.dpn.len = blob.len() as u32;
        log::debug!(
            "saved string pack {}: nr={} nn={nn} maxlen={} blob={}B mode={}",
            self.coord, self.dpn.nr, self.dpn.maxlen, blob.len(), data.first().copied().unwrap_or(MODE_RAW),
        );
        Ok(blob)
    }

    fn encode_values(&self, present: &[&[u8]], cfg: &EngineConfig, compress: bool) -> Result<(Vec<u8>, bool)> {
        let mut raw = vec![MODE_RAW];
        for v in present {
            raw.write_u32::<LittleEndian>(v.len() as u32)?;
            raw.extend_from_slice(v);
        }
        if !compress {
            return Ok((raw, false));
        }

        let mut best: Option<Vec<u8>> = None;
        if self.dpn.maxlen as usize <= MAX_TEXT_WIDTH {
            match Self::encode_dict(present, self.dpn.maxlen as usize) {
                Ok(Some(dict)) => best = Some(dict),
                Ok(None)       => {}
                Err(e) => log::warn!("pack {}: text dictionary failed ({e}), trying lz4", self.coord),
            }
        }
        if cfg.lz4_enabled() {
            let mut packed = vec![MODE_LZ4];
            packed.write_u32::<LittleEndian>((raw.len() - 1) as u32)?;
            packed.extend_from_slice(&lz4_compress(&raw[1..])?);
            if best.as_ref().map_or(true, |b| packed.len() < b.len()) {
                best = Some(packed);
            }
        }
        Ok(match best {
            Some(b) if b.len() < raw.len() => (b, true),
            _ => (raw, false),
        })
    }

    /// 样本含 0 字节等无法建表时返回 `Ok(None)`
    fn encode_dict(present: &[&[u8]], width: usize) -> Result<Option<Vec<u8>>> {
        let mut ts = TextStat::new(width);
        for v in present {
            if !ts.add_string(v) {
                return Ok(None);
            }
        }
        if !ts.check_if_create_possible() {
            return Ok(None);
        }
        ts.create_encoding()?;
        let mut codes = Vec::with_capacity(present.len());
        for v in present {
            match ts.encode(v, false)? {
                Some(c) => codes.push(c),
                None    => return Ok(None),
            }
        }
        let table = ts.serialize()?;
        let mut out = vec![MODE_DICT];
        out.write_u32::<LittleEndian>(table.len() as u32)?;
        out.extend_from_slice(&table);
        out.extend_from_slice(&num::compress(&codes, ts.max_code())?);
        Ok(Some(out))
    }

    // ── 加载 ──────────────────────────────────────────────────────────────────

    pub fn load(coord: PackCoordinate, dpn: Dpn, blob: &[u8]) -> Result<Self> {
        let (null_bytes, data) = read_blob(blob, ColumnKind::Str, coord)?;
        let (nr, nn) = (dpn.nr as usize, dpn.nn as usize);
        let nulls   = load_nulls(&null_bytes, dpn.null_compressed, nr, nn)?;
        let present = if nr == nn { Vec::new() } else { Self::decode_values(&data, nr - nn, coord)? };

        let mut it = present.into_iter();
        let mut values = Vec::with_capacity(nr);
        for j in 0..nr {
            if nulls.get(j) {
                values.push(Vec::new());
            } else {
                values.push(it.next().ok_or_else(|| EngineError::Corrupted(format!("pack {coord}: missing value")))?);
            }
        }
        let mut pack = Self { coord, dpn, values, nulls };
        let (maxlen, stats) = (pack.dpn.maxlen, pack.dpn.stats);
        pack.refresh_stats();
        if pack.dpn.maxlen != maxlen || pack.dpn.stats != stats {
            return Err(EngineError::Corrupted(format!("pack {coord}: string stats disagree with data")));
        }
        Ok(pack)
    }

    fn decode_values(data: &[u8], count: usize, coord: PackCoordinate) -> Result<Vec<Vec<u8>>> {
        let corrupt = |what: &str| EngineError::Corrupted(format!("pack {coord}: {what}"));
        let (&mode, body) = data.split_first().ok_or_else(|| corrupt("empty string payload"))?;
        let values = match mode {
            MODE_RAW => Self::decode_raw(body)?,
            MODE_LZ4 => {
                let mut cur = Cursor::new(body);
                let raw_len = cur.read_u32::<LittleEndian>()? as usize;
                Self::decode_raw(&lz4_decompress(&body[4..], raw_len)?)?
            }
            MODE_DICT => {
                let mut cur = Cursor::new(body);
                let table_len = cur.read_u32::<LittleEndian>()? as usize;
                let table = body.get(4..4 + table_len).ok_or_else(|| corrupt("dictionary truncated"))?;
                let (mut ts, used) = TextStat::deserialize(table)?;
                if used != table_len {
                    return Err(corrupt("dictionary length"));
                }
                let (maxv, codes) = num::decompress(&body[4 + table_len..], count)?;
                if maxv != ts.max_code() {
                    return Err(corrupt("dictionary code range"));
                }
                ts.prepare_decode()?;
                codes.into_iter().map(|c| ts.decode(c).map_err(EngineError::from)).collect::<Result<Vec<_>>>()?
            }
            other => return Err(corrupt(&format!("unknown string encoding {other}"))),
        };
        if values.len() != count {
            return Err(corrupt("value count"));
        }
        Ok(values)
    }

    fn decode_raw(body: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut cur = Cursor::new(body);
        let mut out = Vec::new();
        while (cur.position() as usize) < body.len() {
            let len = cur.read_u32::<LittleEndian>()? as usize;
            let mut v = vec![0u8; len];
            cur.read_exact(&mut v)?;
            out.push(v);
        }
        Ok(out)
    }

    // ── 写时复制 ──────────────────────────────────────────────────────────────

    pub fn clone_to(&self, pc: PackCoordinate, txn: TxnId) -> Self {
        Self {
            coord:  pc,
            dpn:    child_dpn(&self.dpn, self.coord, txn),
            values: self.values.clone(),
            nulls:  self.nulls.clone(),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.values.iter().map(Vec::len).sum::<usize>()
            + self.values.len() * std::mem::size_of::<Vec<u8>>()
            + self.nulls.as_bytes().len()
    }
}
