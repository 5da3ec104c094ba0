//! null 位图压缩
//!
//! 两符号（非 null / null）静态模型的区间编码。输出：
//! `f0 (u16 LE) | f1 (u16 LE) | 区间编码流`。
//! 输出缓冲只比原始位图多 64 位，放不下即返回 `BufferOverrun`，
//! 调用方据此改存原始位图。

use crate::bitstream::BitStream;
use crate::common::{CprsErr, CprsResult};
use crate::compression::arith::{ArithCoder, FreqTable};

pub fn compress(bitmap: &[u8], len: usize) -> CprsResult<Vec<u8>> {
    let mut src = BitStream::new(bitmap, len)?;
    let mut symbols = Vec::with_capacity(len);
    let mut nulls = 0u64;
    for _ in 0..len {
        let b = src.get_bit()?;
        nulls += b as u64;
        symbols.push(b as u32);
    }
    if nulls == 0 || nulls == len as u64 {
        // 全空或全非空不需要位图
        return Err(CprsErr::BadParams);
    }
    let table = FreqTable::from_counts(&[len as u64 - nulls, nulls])?;

    let mut out = BitStream::with_len_bits(len + 64);
    ArithCoder::new().compress(&mut out, &symbols, table.cum())?;

    let mut res = Vec::with_capacity(4 + out.used_bytes());
    res.extend_from_slice(&(table.freq(0) as u16).to_le_bytes());
    res.extend_from_slice(&(table.freq(1) as u16).to_le_bytes());
    res.extend_from_slice(&out.finish());
    Ok(res)
}

pub fn decompress(data: &[u8], len: usize) -> CprsResult<Vec<u8>> {
    if data.len() < 4 {
        return Err(CprsErr::Corrupted);
    }
    let f0 = u16::from_le_bytes([data[0], data[1]]) as u32;
    let f1 = u16::from_le_bytes([data[2], data[3]]) as u32;
    let cum = [0, f0, f0 + f1];

    let mut src = BitStream::from_bytes(&data[4..]);
    let mut symbols = vec![0u32; len];
    ArithCoder::new()
        .decompress(&mut symbols, &mut src, &cum)
        .map_err(|e| if e == CprsErr::BadParams { CprsErr::Corrupted } else { e })?;

    let mut out = BitStream::with_len_bits(len);
    for s in symbols {
        out.put_bit(s as u8)?;
    }
    Ok(out.into_inner())
}
