//! 按位寻址的读写缓冲区，所有编解码器的基础
//!
//! 第 `i` 位位于 `buf[i >> 3]` 的 `1 << (i & 7)`；多位字段按高位在前写入。
//! 缓冲区声明长度（位）之外的任何访问都返回 [`CprsErr::BufferOverrun`]，
//! 不会被静默截断。

use crate::common::{CprsErr, CprsResult};

pub struct BitStream<B> {
    buf: B,
    /// 声明长度（位）
    len: usize,
    /// 读写游标（位）
    pos: usize,
}

impl<B: AsRef<[u8]>> BitStream<B> {
    /// 在 `buf` 上建立长度为 `len_bits` 位的流；超出底层缓冲区即失败
    pub fn new(buf: B, len_bits: usize) -> CprsResult<Self> {
        if len_bits > buf.as_ref().len() * 8 {
            return Err(CprsErr::BufferOverrun);
        }
        Ok(Self { buf, len: len_bits, pos: 0 })
    }

    /// 整个缓冲区都可用
    pub fn from_bytes(buf: B) -> Self {
        let len = buf.as_ref().len() * 8;
        Self { buf, len, pos: 0 }
    }

    pub fn len(&self)       -> usize { self.len }
    pub fn is_empty(&self)  -> bool  { self.len == 0 }
    pub fn pos(&self)       -> usize { self.pos }
    pub fn remaining(&self) -> usize { self.len - self.pos }

    pub fn set_pos(&mut self, pos: usize) -> CprsResult<()> {
        if pos > self.len {
            return Err(CprsErr::BufferOverrun);
        }
        self.pos = pos;
        Ok(())
    }

    pub fn get_bit(&mut self) -> CprsResult<u8> {
        if self.pos >= self.len {
            return Err(CprsErr::BufferOverrun);
        }
        let bit = (self.buf.as_ref()[self.pos >> 3] >> (self.pos & 7)) & 1;
        self.pos += 1;
        Ok(bit)
    }

    /// 读取 `nbits`（<= 64）位，高位在前
    pub fn get_bits(&mut self, nbits: u32) -> CprsResult<u64> {
        if nbits > 64 {
            return Err(CprsErr::BadParams);
        }
        if self.pos + nbits as usize > self.len {
            return Err(CprsErr::BufferOverrun);
        }
        let mut v = 0u64;
        for _ in 0..nbits {
            v = (v << 1) | self.get_bit()? as u64;
        }
        Ok(v)
    }

    /// 已写入部分占用的字节数
    pub fn used_bytes(&self) -> usize {
        (self.pos + 7) / 8
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BitStream<B> {
    pub fn put_bit(&mut self, bit: u8) -> CprsResult<()> {
        if self.pos >= self.len {
            return Err(CprsErr::BufferOverrun);
        }
        let mask = 1u8 << (self.pos & 7);
        let byte = &mut self.buf.as_mut()[self.pos >> 3];
        if bit != 0 { *byte |= mask } else { *byte &= !mask }
        self.pos += 1;
        Ok(())
    }

    /// 写入 `val` 的低 `nbits`（<= 64）位，高位在前
    pub fn put_bits(&mut self, val: u64, nbits: u32) -> CprsResult<()> {
        if nbits > 64 {
            return Err(CprsErr::BadParams);
        }
        if self.pos + nbits as usize > self.len {
            return Err(CprsErr::BufferOverrun);
        }
        for i in (0..nbits).rev() {
            self.put_bit(((val >> i) & 1) as u8)?;
        }
        Ok(())
    }

    /// 清零半开区间 `[begin, end)` 内的位；两端可能是不完整字节
    pub fn zero_bits(&mut self, begin: usize, end: usize) -> CprsResult<()> {
        if begin > end {
            return Err(CprsErr::BadParams);
        }
        if end > self.len {
            return Err(CprsErr::BufferOverrun);
        }
        if begin == end {
            return Ok(());
        }
        let buf = self.buf.as_mut();
        let (first, last) = (begin >> 3, (end - 1) >> 3);
        let lo = begin & 7;
        let hi = (end - 1) & 7;

        if first == last {
            let clear = ((0xFFu16 << lo) & (0xFFu16 >> (7 - hi))) as u8;
            buf[first] &= !clear;
            return Ok(());
        }
        buf[first] &= ((1u16 << lo) - 1) as u8;
        buf[first + 1..last].fill(0);
        buf[last] &= !((0xFFu16 >> (7 - hi)) as u8);
        Ok(())
    }
}

impl BitStream<Vec<u8>> {
    /// 分配一个全零、长度为 `len_bits` 位的写缓冲
    pub fn with_len_bits(len_bits: usize) -> Self {
        Self { buf: vec![0u8; (len_bits + 7) / 8], len: len_bits, pos: 0 }
    }

    /// 截断到已写入的字节并返回
    pub fn finish(mut self) -> Vec<u8> {
        let used = self.used_bytes();
        self.buf.truncate(used);
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_msb_first() {
        let mut bs = BitStream::with_len_bits(64);
        bs.put_bits(0b101, 3).unwrap();
        bs.put_bits(0xABCD, 16).unwrap();
        bs.put_bit(1).unwrap();
        assert_eq!(bs.pos(), 20);
        let bytes = bs.finish();
        assert_eq!(bytes.len(), 3);

        let mut rd = BitStream::from_bytes(bytes.as_slice());
        assert_eq!(rd.get_bits(3).unwrap(), 0b101);
        assert_eq!(rd.get_bits(16).unwrap(), 0xABCD);
        assert_eq!(rd.get_bit().unwrap(), 1);
    }

    #[test]
    fn put_bit_overwrites_dirty_buffer() {
        let mut bs = BitStream::from_bytes(vec![0xFFu8]);
        bs.put_bits(0, 4).unwrap();
        assert_eq!(bs.as_bytes()[0], 0xF0);
    }

    #[test]
    fn overrun_is_detected() {
        assert_eq!(BitStream::new(vec![0u8; 1], 9).err(), Some(CprsErr::BufferOverrun));

        let mut bs = BitStream::new(vec![0u8; 2], 10).unwrap();
        bs.put_bits(0x3FF, 10).unwrap();
        assert_eq!(bs.put_bit(1), Err(CprsErr::BufferOverrun));
        assert_eq!(bs.set_pos(11), Err(CprsErr::BufferOverrun));

        bs.set_pos(4).unwrap();
        assert_eq!(bs.get_bits(7), Err(CprsErr::BufferOverrun));
        // 失败的读取不移动游标
        assert_eq!(bs.pos(), 4);
    }

    #[test]
    fn zero_bits_within_one_byte() {
        let mut bs = BitStream::from_bytes(vec![0xFFu8, 0xFF]);
        bs.zero_bits(2, 6).unwrap();
        assert_eq!(bs.as_bytes(), &[0b1100_0011, 0xFF]);
    }

    #[test]
    fn zero_bits_spanning_bytes() {
        let mut bs = BitStream::from_bytes(vec![0xFFu8; 4]);
        bs.zero_bits(3, 27).unwrap();
        assert_eq!(bs.as_bytes(), &[0b0000_0111, 0, 0, 0b1111_1000]);

        let mut bs = BitStream::from_bytes(vec![0xFFu8; 3]);
        bs.zero_bits(8, 16).unwrap();
        assert_eq!(bs.as_bytes(), &[0xFF, 0, 0xFF]);
    }

    #[test]
    fn zero_bits_edges() {
        let mut bs = BitStream::new(vec![0xFFu8; 2], 12).unwrap();
        bs.zero_bits(5, 5).unwrap();
        assert_eq!(bs.as_bytes(), &[0xFF, 0xFF]);
        assert_eq!(bs.zero_bits(4, 13), Err(CprsErr::BufferOverrun));
        assert_eq!(bs.zero_bits(6, 5), Err(CprsErr::BadParams));
        bs.zero_bits(0, 12).unwrap();
        assert_eq!(bs.as_bytes(), &[0x00, 0xF0]);
    }
}
