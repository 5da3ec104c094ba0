//! Pack 编解码器
//!
//! - [`arith`]    ：16 位区间编码 + 均匀位打包
//! - [`num`]      ：整数 pack 压缩（字典 + 区间编码 / 均匀编码二选一）
//! - [`nulls`]    ：null 位图压缩
//! - [`text_stat`]：定长字符串的逐位置字典编码
//! - 本文件：LZ4 块压缩，用于浮点 pack 与原始字符串载荷

pub mod arith;
pub mod num;
pub mod nulls;
pub mod text_stat;

use crate::common::{CprsErr, CprsResult};

pub fn lz4_compress(data: &[u8]) -> CprsResult<Vec<u8>> {
    lz4::block::compress(data, None, false).map_err(|e| {
        log::warn!("lz4 compress failed: {e}");
        CprsErr::Other
    })
}

pub fn lz4_decompress(data: &[u8], uncompressed_len: usize) -> CprsResult<Vec<u8>> {
    let size = i32::try_from(uncompressed_len).map_err(|_| CprsErr::BadParams)?;
    let out  = lz4::block::decompress(data, Some(size)).map_err(|_| CprsErr::Corrupted)?;
    if out.len() != uncompressed_len {
        return Err(CprsErr::Corrupted);
    }
    Ok(out)
}
