//! 定长上限字符串的逐位置字典编码（TextStat）
//!
//! 对每个字符位置收集出现过的字节集合，字符串在其长度处记录结束标记（字节 0）。
//! 每个位置按字节值升序分配稠密码 `0..d`，位宽 `ceil(log2(d))`，`d <= 1` 时为 0 位。
//! 各位置码从位置 0 起左移拼接为一个整数；总位宽上限 63 位，保证装进一个 `u64`。
//! 结束标记的码总是 0，因此编码值的大小顺序与字节串字典序一致。
//!
//! 生命周期：收集 → `create_encoding` → 编码 → `prepare_decode` → 解码。
//! 转入解码模式不可逆，之后再次 `create_encoding` 会失败。

use crate::common::{CprsErr, CprsResult};

/// 参与字典编码的最大字符串宽度
pub const MAX_TEXT_WIDTH: usize = 48;
/// 编码总位宽上限
pub const MAX_CODE_BITS: u32 = 63;

const ILLEGAL: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableMode {
    Collecting,
    Encoding,
    Decoding,
}

#[derive(Debug, Clone)]
pub struct TextStat {
    width:        usize,
    /// 位置 × 字节 的出现标记
    chars_found:  Vec<[bool; 256]>,
    /// 位置 × 字节 → 码；`ILLEGAL` 表示该字节在此位置从未出现
    encode_table: Vec<[u8; 256]>,
    /// 位置 × 码 → 字节（仅解码模式）
    decode_table: Vec<Vec<u8>>,
    len_table:    Vec<u8>,
    max_code:     u64,
    /// 样本中出现过 0 字节或超宽字符串
    rejected:     bool,
    mode:         TableMode,
}

impl TextStat {
    pub fn new(width: usize) -> Self {
        let width = width.min(MAX_TEXT_WIDTH);
        Self {
            width,
            chars_found:  vec![[false; 256]; width],
            encode_table: Vec::new(),
            decode_table: Vec::new(),
            len_table:    vec![0; width],
            max_code:     0,
            rejected:     false,
            mode:         TableMode::Collecting,
        }
    }

    pub fn width(&self)     -> usize { self.width }
    pub fn len_table(&self) -> &[u8] { &self.len_table }
    pub fn max_code(&self)  -> u64   { self.max_code }

    pub fn total_bits(&self) -> u32 {
        self.len_table.iter().map(|&b| b as u32).sum()
    }

    // ── 收集 ──────────────────────────────────────────────────────────────────

    fn reject(&mut self) -> bool {
        self.rejected = true;
        false
    }

    /// 记录 `pos` 处出现 `ch`；0 字节或越界会使整个样本被拒绝
    pub fn add_char(&mut self, ch: u8, pos: usize) -> bool {
        if self.mode != TableMode::Collecting || ch == 0 || pos >= self.width {
            return self.reject();
        }
        self.chars_found[pos][ch as usize] = true;
        true
    }

    /// 记录长度为 `len` 的字符串（满宽字符串不需要结束标记）
    pub fn add_len(&mut self, len: usize) -> bool {
        if self.mode != TableMode::Collecting || len > self.width {
            return self.reject();
        }
        if len < self.width {
            self.chars_found[len][0] = true;
        }
        true
    }

    pub fn add_string(&mut self, s: &[u8]) -> bool {
        if s.len() > self.width {
            return self.reject();
        }
        for (pos, &ch) in s.iter().enumerate() {
            if !self.add_char(ch, pos) {
                return false;
            }
        }
        self.add_len(s.len())
    }

    fn distinct_at(&self, pos: usize) -> usize {
        self.chars_found[pos].iter().filter(|&&f| f).count()
    }

    fn width_for(distinct: usize) -> u8 {
        if distinct <= 1 {
            0
        } else {
            (usize::BITS - (distinct - 1).leading_zeros()) as u8
        }
    }

    /// 不修改状态地检查能否建表
    pub fn check_if_create_possible(&self) -> bool {
        if self.rejected || self.mode == TableMode::Decoding {
            return false;
        }
        let mut total = 0u32;
        for pos in 0..self.width {
            let d = self.distinct_at(pos);
            if d > ILLEGAL as usize {
                return false;
            }
            total += Self::width_for(d) as u32;
        }
        total <= MAX_CODE_BITS
    }

    pub fn create_encoding(&mut self) -> CprsResult<()> {
        if !self.check_if_create_possible() {
            return Err(CprsErr::BadParams);
        }
        self.encode_table = vec![[ILLEGAL; 256]; self.width];
        for pos in 0..self.width {
            let mut code = 0u8;
            for ch in 0..256usize {
                if self.chars_found[pos][ch] {
                    self.encode_table[pos][ch] = code;
                    code += 1;
                }
            }
            self.len_table[pos] = Self::width_for(code as usize);
        }
        let total = self.total_bits();
        self.max_code = if total == 0 { 0 } else { (1u64 << total) - 1 };
        self.mode = TableMode::Encoding;
        Ok(())
    }

    // ── 编码 ──────────────────────────────────────────────────────────────────

    /// 返回 `Ok(None)` 表示值中有某字节在其位置上从未出现（或长度从未出现）。
    /// `round_up` 时末尾未用位置填最大码，使截断值排在所有同前缀值之后。
    pub fn encode(&self, value: &[u8], round_up: bool) -> CprsResult<Option<u64>> {
        if self.mode != TableMode::Encoding {
            return Err(CprsErr::BadParams);
        }
        if value.len() > self.width {
            return Ok(None);
        }
        let mut code = 0u64;
        for pos in 0..self.width {
            let bits = self.len_table[pos] as u32;
            let c = if pos < value.len() {
                match self.encode_table[pos][value[pos] as usize] {
                    ILLEGAL => return Ok(None),
                    c       => c as u64,
                }
            } else if round_up {
                (1u64 << bits) - 1
            } else if pos == value.len() {
                match self.encode_table[pos][0] {
                    ILLEGAL => return Ok(None),
                    c       => c as u64,
                }
            } else {
                0
            };
            code = (code << bits) + c;
        }
        Ok(Some(code))
    }

    // ── 解码 ──────────────────────────────────────────────────────────────────

    /// 由编码表生成解码表；之后只能解码
    pub fn prepare_decode(&mut self) -> CprsResult<()> {
        match self.mode {
            TableMode::Decoding   => return Ok(()),
            TableMode::Collecting => return Err(CprsErr::BadParams),
            TableMode::Encoding   => {}
        }
        self.decode_table = self.encode_table.iter()
            .map(|row| {
                let mut dec = Vec::new();
                for (ch, &c) in row.iter().enumerate() {
                    if c != ILLEGAL {
                        debug_assert_eq!(c as usize, dec.len());
                        dec.push(ch as u8);
                    }
                }
                dec
            })
            .collect();
        self.encode_table.clear();
        self.mode = TableMode::Decoding;
        Ok(())
    }

    pub fn decode(&self, code: u64) -> CprsResult<Vec<u8>> {
        if self.mode != TableMode::Decoding {
            return Err(CprsErr::BadParams);
        }
        let mut rest = code;
        let mut decoded: Vec<Option<u8>> = vec![None; self.width];
        for pos in (0..self.width).rev() {
            let bits = self.len_table[pos] as u32;
            let k = (rest & ((1u64 << bits) - 1)) as usize;
            rest >>= bits;
            decoded[pos] = self.decode_table[pos].get(k).copied();
        }
        if rest != 0 {
            return Err(CprsErr::Corrupted);
        }
        let mut out = Vec::with_capacity(self.width);
        for d in decoded {
            match d {
                Some(0)  => break,
                Some(ch) => out.push(ch),
                None     => return Err(CprsErr::Corrupted),
            }
        }
        Ok(out)
    }

    // ── 持久化 ────────────────────────────────────────────────────────────────

    /// `width (u8) | 每位置: d (u8) + d 个字节`；仅在建表后可用
    pub fn serialize(&self) -> CprsResult<Vec<u8>> {
        if self.mode == TableMode::Collecting {
            return Err(CprsErr::BadParams);
        }
        let mut out = vec![self.width as u8];
        for pos in 0..self.width {
            let chars: Vec<u8> = (0..256usize)
                .filter(|&ch| self.chars_found[pos][ch])
                .map(|ch| ch as u8)
                .collect();
            out.push(chars.len() as u8);
            out.extend_from_slice(&chars);
        }
        Ok(out)
    }

    /// 重建出与序列化时相同的编码表（编码模式），返回消耗的字节数
    pub fn deserialize(data: &[u8]) -> CprsResult<(Self, usize)> {
        let width = *data.first().ok_or(CprsErr::Corrupted)? as usize;
        if width > MAX_TEXT_WIDTH {
            return Err(CprsErr::Corrupted);
        }
        let mut ts = Self::new(width);
        let mut p = 1usize;
        for pos in 0..width {
            let d = *data.get(p).ok_or(CprsErr::Corrupted)? as usize;
            let chars = data.get(p + 1..p + 1 + d).ok_or(CprsErr::Corrupted)?;
            for &ch in chars {
                let ok = if ch == 0 { ts.add_len(pos) } else { ts.add_char(ch, pos) };
                if !ok {
                    return Err(CprsErr::Corrupted);
                }
            }
            p += 1 + d;
        }
        ts.create_encoding().map_err(|_| CprsErr::Corrupted)?;
        Ok((ts, p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn build(width: usize, samples: &[&[u8]]) -> TextStat {
        let mut ts = TextStat::new(width);
        for s in samples {
            assert!(ts.add_string(s));
        }
        ts.create_encoding().unwrap();
        ts
    }

    #[test]
    fn one_varying_position_costs_two_bits() {
        let samples: [&[u8]; 3] = [b"abcd", b"xbcd", b"ybcd"];
        let mut ts = build(4, &samples);
        assert_eq!(ts.len_table(), &[2, 0, 0, 0]);
        assert_eq!(ts.max_code(), 3);

        let codes: Vec<u64> = samples.iter()
            .map(|s| ts.encode(s, false).unwrap().unwrap())
            .collect();
        assert_eq!(codes, vec![0, 1, 2]);

        ts.prepare_decode().unwrap();
        for (s, c) in samples.iter().zip(codes) {
            assert_eq!(ts.decode(c).unwrap(), s.to_vec());
        }
    }

    #[test]
    fn random_samples_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        let alphabet = b"aeiouXYZ";
        let samples: Vec<Vec<u8>> = (0..500)
            .map(|_| {
                let n = rng.random_range(0..=6);
                (0..n).map(|_| alphabet[rng.random_range(0..alphabet.len())]).collect()
            })
            .collect();

        let mut ts = TextStat::new(6);
        for s in &samples {
            assert!(ts.add_string(s));
        }
        assert!(ts.check_if_create_possible());
        ts.create_encoding().unwrap();
        assert!(ts.total_bits() <= MAX_CODE_BITS);

        let codes: Vec<u64> = samples.iter()
            .map(|s| ts.encode(s, false).unwrap().unwrap())
            .collect();
        // 编码保持字典序
        for (a, ca) in samples.iter().zip(&codes) {
            for (b, cb) in samples.iter().zip(&codes).take(50) {
                assert_eq!(a.cmp(b), ca.cmp(cb));
            }
        }
        ts.prepare_decode().unwrap();
        for (s, c) in samples.iter().zip(codes) {
            assert_eq!(&ts.decode(c).unwrap(), s);
        }
    }

    #[test]
    fn unseen_byte_encodes_to_none() {
        let ts = build(3, &[b"ab", b"ac", b"abc"]);
        assert_eq!(ts.encode(b"zb", false).unwrap(), None);
        assert_eq!(ts.encode(b"abz", false).unwrap(), None);
        // 长度 1 从未出现：位置 1 没有结束标记
        assert_eq!(ts.encode(b"a", false).unwrap(), None);
        assert_eq!(ts.encode(b"abcd", false).unwrap(), None);
    }

    #[test]
    fn round_up_sorts_after_every_extension() {
        let ts = build(3, &[b"ab", b"ac", b"abc", b"b"]);
        let hi_a = ts.encode(b"a", true).unwrap().unwrap();
        for s in [&b"ab"[..], b"ac", b"abc"] {
            assert!(ts.encode(s, false).unwrap().unwrap() <= hi_a);
        }
        assert!(ts.encode(b"b", false).unwrap().unwrap() > hi_a);
    }

    #[test]
    fn zero_byte_and_overlong_strings_reject_sample() {
        let mut ts = TextStat::new(4);
        assert!(ts.add_string(b"ok"));
        assert!(!ts.add_string(b"n\0l"));
        assert!(!ts.check_if_create_possible());
        assert_eq!(ts.create_encoding(), Err(CprsErr::BadParams));

        let mut ts = TextStat::new(2);
        assert!(!ts.add_string(b"abc"));
        assert!(!ts.check_if_create_possible());
    }

    #[test]
    fn too_many_total_bits_is_not_creatable() {
        // 32 个位置 × 4 种字节 = 64 位 > 63
        let mut ts = TextStat::new(32);
        for ch in [b'a', b'b', b'c', b'd'] {
            assert!(ts.add_string(&[ch; 32]));
        }
        assert!(!ts.check_if_create_possible());
        let before = ts.len_table().to_vec();
        assert!(ts.create_encoding().is_err());
        assert_eq!(ts.len_table(), &before[..]);
    }

    #[test]
    fn too_many_symbols_at_one_position_is_not_creatable() {
        let mut ts = TextStat::new(2);
        for ch in 1..=255u8 {
            assert!(ts.add_string(&[ch]));
        }
        // 255 个字节 + 位置 1 的结束标记 → 位置 0 正好 255 种
        assert!(ts.check_if_create_possible());
        assert!(ts.add_len(0));
        assert!(!ts.check_if_create_possible());
    }

    #[test]
    fn decode_mode_is_irreversible() {
        let mut ts = build(2, &[b"ab", b"b"]);
        assert!(ts.decode(0).is_err());
        ts.prepare_decode().unwrap();
        assert_eq!(ts.create_encoding(), Err(CprsErr::BadParams));
        assert_eq!(ts.encode(b"ab", false), Err(CprsErr::BadParams));
        assert!(!ts.add_string(b"a"));
    }

    #[test]
    fn serialized_dictionary_rebuilds_same_codes() {
        let samples: [&[u8]; 4] = [b"red", b"green", b"blue", b"cyan"];
        let ts = build(5, &samples);
        let bytes = ts.serialize().unwrap();
        let (mut copy, used) = TextStat::deserialize(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(copy.len_table(), ts.len_table());
        for s in samples {
            assert_eq!(copy.encode(s, false).unwrap(), ts.encode(s, false).unwrap());
        }
        copy.prepare_decode().unwrap();
        let c = ts.encode(b"blue", false).unwrap().unwrap();
        assert_eq!(copy.decode(c).unwrap(), b"blue".to_vec());
    }
}
