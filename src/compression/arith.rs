//! 区间（算术）编码 + 均匀位打包
//!
//! 16 位工作精度：`low/high/code` 均为 16 位状态，
//! 区间跨越中点两侧时记录下溢位并在下一次确定高位时补发。
//! 累积频率表总和必须 < 16384，保证重整后区间宽度（>= 2^14 + 1）
//! 能为每个非零频率符号分出非空子区间。

use crate::bitstream::BitStream;
use crate::common::{CprsErr, CprsResult};

const TOP:            u32 = 0xFFFF;
const HALF:           u32 = 0x8000;
const QUARTER:        u32 = 0x4000;
const THREE_QUARTERS: u32 = 0xC000;

/// 累积频率总和的上限（不含）
pub const MAX_TOTAL: u32 = 1 << 14;

/// 表示 `0..=maxval` 所需的最少位数；`maxval == 0` 时为 0
pub fn bits_needed(maxval: u64) -> u32 {
    64 - maxval.leading_zeros()
}

// ── 累积频率表 ────────────────────────────────────────────────────────────────

/// 由原始计数缩放得到的合法累积频率表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreqTable {
    cum: Vec<u32>,
}

impl FreqTable {
    /// 计数总和超过上限时等比缩放，出现过的符号频率至少为 1
    pub fn from_counts(counts: &[u64]) -> CprsResult<Self> {
        let nonzero = counts.iter().filter(|&&c| c > 0).count() as u64;
        let limit   = (MAX_TOTAL - 1) as u64;
        if nonzero == 0 || nonzero > limit {
            return Err(CprsErr::BadParams);
        }
        let sum: u64 = counts.iter().sum();
        let mut cum = Vec::with_capacity(counts.len() + 1);
        cum.push(0u32);
        let mut acc = 0u32;
        for &c in counts {
            let f = if c == 0 {
                0
            } else if sum <= limit {
                c as u32
            } else {
                ((c as u128 * (limit - nonzero) as u128 / sum as u128) as u32).max(1)
            };
            acc += f;
            cum.push(acc);
        }
        Ok(Self { cum })
    }

    pub fn cum(&self)   -> &[u32] { &self.cum }
    pub fn total(&self) -> u32    { self.cum.last().copied().unwrap_or(0) }
    pub fn symbols(&self) -> usize { self.cum.len() - 1 }

    pub fn freq(&self, sym: usize) -> u32 {
        self.cum[sym + 1] - self.cum[sym]
    }
}

/// 校验累积频率表，返回总和
fn check_table(cum: &[u32]) -> CprsResult<u32> {
    if cum.len() < 2 || cum[0] != 0 {
        return Err(CprsErr::BadParams);
    }
    if cum.windows(2).any(|w| w[0] > w[1]) {
        return Err(CprsErr::BadParams);
    }
    let total = cum[cum.len() - 1];
    if total == 0 || total >= MAX_TOTAL {
        return Err(CprsErr::BadParams);
    }
    Ok(total)
}

// ── ArithCoder ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ArithCoder {
    low:            u32,
    high:           u32,
    code:           u32,
    underflow_bits: u32,
}

impl Default for ArithCoder {
    fn default() -> Self { Self::new() }
}

impl ArithCoder {
    pub fn new() -> Self {
        Self { low: 0, high: TOP, code: 0, underflow_bits: 0 }
    }

    // ── 编码 ──────────────────────────────────────────────────────────────────

    pub fn init_compress(&mut self) {
        *self = Self::new();
    }

    fn emit<B: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self, dest: &mut BitStream<B>, bit: u8,
    ) -> CprsResult<()> {
        dest.put_bit(bit)?;
        while self.underflow_bits > 0 {
            dest.put_bit(bit ^ 1)?;
            self.underflow_bits -= 1;
        }
        Ok(())
    }

    /// 将当前区间缩到 `[lo, hi) / total` 并移出已确定的高位
    pub fn encode_symbol<B: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        dest:  &mut BitStream<B>,
        lo:    u32,
        hi:    u32,
        total: u32,
    ) -> CprsResult<()> {
        if lo >= hi || hi > total {
            return Err(CprsErr::BadParams);
        }
        let range = self.high - self.low + 1;
        self.high = self.low + range * hi / total - 1;
        self.low += range * lo / total;

        loop {
            if self.high < HALF {
                self.emit(dest, 0)?;
            } else if self.low >= HALF {
                self.emit(dest, 1)?;
                self.low  -= HALF;
                self.high -= HALF;
            } else if self.low >= QUARTER && self.high < THREE_QUARTERS {
                self.underflow_bits += 1;
                self.low  -= QUARTER;
                self.high -= QUARTER;
            } else {
                break;
            }
            self.low  <<= 1;
            self.high = (self.high << 1) | 1;
        }
        Ok(())
    }

    /// 输出足以区分最终区间的两位（含挂起的下溢位）
    pub fn end_compress<B: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self, dest: &mut BitStream<B>,
    ) -> CprsResult<()> {
        self.underflow_bits += 1;
        let bit = if self.low < QUARTER { 0 } else { 1 };
        self.emit(dest, bit)
    }

    /// 对符号序列做区间编码；`cum[s]..cum[s+1]` 为符号 `s` 的子区间
    pub fn compress<B: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        dest:    &mut BitStream<B>,
        symbols: &[u32],
        cum:     &[u32],
    ) -> CprsResult<()> {
        let total = check_table(cum)?;
        self.init_compress();
        for &s in symbols {
            let s = s as usize;
            if s + 1 >= cum.len() {
                return Err(CprsErr::BadParams);
            }
            self.encode_symbol(dest, cum[s], cum[s + 1], total)?;
        }
        self.end_compress(dest)
    }

    pub fn compress_bytes<B: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        dest: &mut BitStream<B>,
        src:  &[u8],
        cum:  &[u32],
    ) -> CprsResult<()> {
        let symbols: Vec<u32> = src.iter().map(|&b| b as u32).collect();
        self.compress(dest, &symbols, cum)
    }

    // ── 解码 ──────────────────────────────────────────────────────────────────

    /// 流尾之后按 0 补齐（编码端结束时只保证前缀可区分）
    fn next_bit<B: AsRef<[u8]>>(src: &mut BitStream<B>) -> CprsResult<u32> {
        if src.remaining() == 0 {
            return Ok(0);
        }
        Ok(src.get_bit()? as u32)
    }

    pub fn init_decompress<B: AsRef<[u8]>>(&mut self, src: &mut BitStream<B>) -> CprsResult<()> {
        *self = Self::new();
        for _ in 0..16 {
            self.code = (self.code << 1) | Self::next_bit(src)?;
        }
        Ok(())
    }

    /// 当前 code 在 `[0, total)` 中对应的计数值
    pub fn get_count(&self, total: u32) -> CprsResult<u32> {
        if self.code < self.low || self.code > self.high {
            return Err(CprsErr::Corrupted);
        }
        let range = self.high - self.low + 1;
        let count = ((self.code - self.low + 1) * total - 1) / range;
        if count >= total {
            return Err(CprsErr::Corrupted);
        }
        Ok(count)
    }

    pub fn remove_symbol<B: AsRef<[u8]>>(
        &mut self,
        src:   &mut BitStream<B>,
        lo:    u32,
        hi:    u32,
        total: u32,
    ) -> CprsResult<()> {
        let range = self.high - self.low + 1;
        self.high = self.low + range * hi / total - 1;
        self.low += range * lo / total;

        loop {
            let shift = if self.high < HALF {
                0
            } else if self.low >= HALF {
                HALF
            } else if self.low >= QUARTER && self.high < THREE_QUARTERS {
                QUARTER
            } else {
                break;
            };
            self.low  -= shift;
            self.high -= shift;
            self.code = self.code.checked_sub(shift).ok_or(CprsErr::Corrupted)?;

            self.low  <<= 1;
            self.high = (self.high << 1) | 1;
            self.code = (self.code << 1) | Self::next_bit(src)?;
        }
        Ok(())
    }

    /// 解出 `dest.len()` 个符号
    pub fn decompress<B: AsRef<[u8]>>(
        &mut self,
        dest: &mut [u32],
        src:  &mut BitStream<B>,
        cum:  &[u32],
    ) -> CprsResult<()> {
        let total = check_table(cum)?;
        self.init_decompress(src)?;
        for out in dest.iter_mut() {
            let count = self.get_count(total)?;
            // 最后一个满足 cum[s] <= count 的 s；零频率符号被跳过
            let s = cum.partition_point(|&c| c <= count) - 1;
            self.remove_symbol(src, cum[s], cum[s + 1], total)?;
            *out = s as u32;
        }
        Ok(())
    }

    pub fn decompress_bytes<B: AsRef<[u8]>>(
        &mut self,
        dest: &mut [u8],
        src:  &mut BitStream<B>,
        cum:  &[u32],
    ) -> CprsResult<()> {
        let mut symbols = vec![0u32; dest.len()];
        self.decompress(&mut symbols, src, cum)?;
        for (d, s) in dest.iter_mut().zip(symbols) {
            *d = u8::try_from(s).map_err(|_| CprsErr::Corrupted)?;
        }
        Ok(())
    }

    // ── 均匀编码 ──────────────────────────────────────────────────────────────

    fn uniform_width(maxval: u64, bitmax: Option<u32>) -> CprsResult<u32> {
        let need = bits_needed(maxval);
        match bitmax {
            None => Ok(need),
            Some(b) if b <= 64 && b >= need => Ok(b),
            Some(_) => Err(CprsErr::BadParams),
        }
    }

    /// 以 `bitmax` 位（缺省为表示 `maxval` 的最少位数）写入 `val`
    pub fn encode_uniform<B: AsRef<[u8]> + AsMut<[u8]>>(
        dest:   &mut BitStream<B>,
        val:    u64,
        maxval: u64,
        bitmax: Option<u32>,
    ) -> CprsResult<()> {
        if val > maxval {
            return Err(CprsErr::BadParams);
        }
        let width = Self::uniform_width(maxval, bitmax)?;
        dest.put_bits(val, width)
    }

    pub fn decode_uniform<B: AsRef<[u8]>>(
        src:    &mut BitStream<B>,
        maxval: u64,
        bitmax: Option<u32>,
    ) -> CprsResult<u64> {
        let width = Self::uniform_width(maxval, bitmax)?;
        let val   = src.get_bits(width)?;
        if val > maxval {
            return Err(CprsErr::Corrupted);
        }
        Ok(val)
    }
}
