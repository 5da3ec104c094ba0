//! 整数 pack 压缩
//!
//! 输入为相对 pack 最小值的偏移（`0..=maxv`），null 已被剔除。
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ mode   (u8)                  │  0 = 常量, 1 = 均匀, 2 = 字典 + 区间编码
//! │ count  (u32 LE)              │
//! │ maxv   (u64 LE)              │
//! │ payload (位流)               │
//! └──────────────────────────────┘
//! ```
//!
//! 字典模式载荷：`ndist`(16 位) | 各不同值(均匀编码) | 各频率(14 位) | 区间编码流。
//! 不同值个数用 [`Hash64`] 统计，超过 [`DICT_LIMIT`] 时只用均匀编码；
//! 两种都可用时取较短者。

use std::io::{Cursor, Read};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::bitstream::BitStream;
use crate::common::{CprsErr, CprsResult};
use crate::compression::arith::{bits_needed, ArithCoder, FreqTable};
use crate::hash64::Hash64;

/// 字典模式允许的最多不同值
pub const DICT_LIMIT: usize = 1024;

const HEADER_LEN: usize = 13;
const FREQ_BITS:  u32   = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Const   = 0,
    Uniform = 1,
    Dict    = 2,
}

impl Mode {
    fn from_u8(v: u8) -> CprsResult<Self> {
        match v {
            0 => Ok(Self::Const),
            1 => Ok(Self::Uniform),
            2 => Ok(Self::Dict),
            _ => Err(CprsErr::Version),
        }
    }
}

fn header(mode: Mode, count: usize, maxv: u64) -> CprsResult<Vec<u8>> {
    let count = u32::try_from(count).map_err(|_| CprsErr::BadParams)?;
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.write_u8(mode as u8).map_err(|_| CprsErr::Other)?;
    out.write_u32::<LittleEndian>(count).map_err(|_| CprsErr::Other)?;
    out.write_u64::<LittleEndian>(maxv).map_err(|_| CprsErr::Other)?;
    Ok(out)
}

// ── 压缩 ──────────────────────────────────────────────────────────────────────

pub fn compress(values: &[u64], maxv: u64) -> CprsResult<Vec<u8>> {
    if values.iter().any(|&v| v > maxv) {
        return Err(CprsErr::BadParams);
    }
    if maxv == 0 {
        return header(Mode::Const, values.len(), 0);
    }

    let uniform = compress_uniform(values, maxv)?;
    let best = match compress_dict(values, maxv) {
        Ok(Some(dict)) if dict.len() < uniform.len() => {
            log::trace!("num: dict {} bytes < uniform {} bytes", dict.len(), uniform.len());
            (Mode::Dict, dict)
        }
        Ok(_) => (Mode::Uniform, uniform),
        Err(e) => {
            log::debug!("num: dictionary coding rejected ({e}), using uniform");
            (Mode::Uniform, uniform)
        }
    };

    let mut out = header(best.0, values.len(), maxv)?;
    out.extend_from_slice(&best.1);
    Ok(out)
}

fn compress_uniform(values: &[u64], maxv: u64) -> CprsResult<Vec<u8>> {
    let mut bs = BitStream::with_len_bits(values.len() * bits_needed(maxv) as usize);
    for &v in values {
        ArithCoder::encode_uniform(&mut bs, v, maxv, None)?;
    }
    Ok(bs.finish())
}

/// 不同值过多时返回 `Ok(None)`
fn compress_dict(values: &[u64], maxv: u64) -> CprsResult<Option<Vec<u8>>> {
    let mut seen = Hash64::new(DICT_LIMIT);
    let mut distinct = Vec::new();
    for &v in values {
        if seen.len() == DICT_LIMIT && !seen.find(v) {
            return Ok(None);
        }
        if seen.insert(v) {
            distinct.push(v);
        }
    }
    distinct.sort_unstable();

    let mut counts  = vec![0u64; distinct.len()];
    let mut symbols = Vec::with_capacity(values.len());
    for &v in values {
        let s = distinct.binary_search(&v).map_err(|_| CprsErr::Other)?;
        counts[s] += 1;
        symbols.push(s as u32);
    }
    let table = FreqTable::from_counts(&counts)?;

    let vbits = bits_needed(maxv) as usize;
    let bound = 16 + distinct.len() * (vbits + FREQ_BITS as usize) + values.len() * 17 + 64;
    let mut bs = BitStream::with_len_bits(bound);
    bs.put_bits(distinct.len() as u64, 16)?;
    for &v in &distinct {
        ArithCoder::encode_uniform(&mut bs, v, maxv, None)?;
    }
    for s in 0..table.symbols() {
        bs.put_bits(table.freq(s) as u64, FREQ_BITS)?;
    }
    ArithCoder::new().compress(&mut bs, &symbols, table.cum())?;
    Ok(Some(bs.finish()))
}

// ── 解压 ──────────────────────────────────────────────────────────────────────

/// 返回 `(maxv, values)`；头部记录的个数必须等于 `expected`，否则在分配前即报错
pub fn decompress(data: &[u8], expected: usize) -> CprsResult<(u64, Vec<u64>)> {
    if data.len() < HEADER_LEN {
        return Err(CprsErr::Corrupted);
    }
    let mut cur = Cursor::new(data);
    let mode  = Mode::from_u8(cur.read_u8().map_err(|_| CprsErr::Corrupted)?)?;
    let count = cur.read_u32::<LittleEndian>().map_err(|_| CprsErr::Corrupted)? as usize;
    let maxv  = cur.read_u64::<LittleEndian>().map_err(|_| CprsErr::Corrupted)?;
    if count != expected {
        return Err(CprsErr::Corrupted);
    }
    let mut payload = Vec::new();
    cur.read_to_end(&mut payload).map_err(|_| CprsErr::Corrupted)?;
    let mut bs = BitStream::from_bytes(payload.as_slice());

    let values = match mode {
        Mode::Const => vec![0u64; count],
        Mode::Uniform => (0..count)
            .map(|_| ArithCoder::decode_uniform(&mut bs, maxv, None))
            .collect::<CprsResult<Vec<u64>>>()?,
        Mode::Dict => {
            let ndist = bs.get_bits(16)? as usize;
            if ndist == 0 || ndist > DICT_LIMIT {
                return Err(CprsErr::Corrupted);
            }
            let distinct = (0..ndist)
                .map(|_| ArithCoder::decode_uniform(&mut bs, maxv, None))
                .collect::<CprsResult<Vec<u64>>>()?;
            let mut cum = Vec::with_capacity(ndist + 1);
            cum.push(0u32);
            for _ in 0..ndist {
                let f = bs.get_bits(FREQ_BITS)? as u32;
                cum.push(cum[cum.len() - 1] + f);
            }
            let mut symbols = vec![0u32; count];
            ArithCoder::new()
                .decompress(&mut symbols, &mut bs, &cum)
                .map_err(|e| if e == CprsErr::BadParams { CprsErr::Corrupted } else { e })?;
            symbols.into_iter().map(|s| distinct[s as usize]).collect()
        }
    };
    Ok((maxv, values))
}
