//! DPN（Data Pack Node）：每个 pack 一条定长描述记录
//!
//! 记录格式（80 字节，小端）：
//! ```text
//! ┌────────┬──────────────────────────────────────────────┐
//! │ 0      │ flags (u8)  used/local/synced/null_compressed │
//! │        │             data_compressed/no_compress/real  │
//! │ 1..4   │ reserved                                      │
//! │ 4      │ base    (u32)                                 │
//! │ 8      │ addr    (u64)  DATA 文件内偏移                │
//! │ 16     │ len     (u32)  blob 字节数                    │
//! │ 20     │ nr      (u32)  行数                           │
//! │ 24     │ nn      (u32)  null 数                        │
//! │ 28     │ maxlen  (u32)                                 │
//! │ 32     │ xmin    (u64)                                 │
//! │ 40     │ xmax    (u64)                                 │
//! │ 48     │ min     (i64 / f64)                           │
//! │ 56     │ max     (i64 / f64)                           │
//! │ 64     │ sum     (i64 / f64)                           │
//! │ 72     │ tagged_ptr，运行期字段，落盘恒为 0            │
//! └────────┴──────────────────────────────────────────────┘
//! ```
//! `used = false` 的记录没有有效统计，读者必须跳过。

use std::io::{Read, Write};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::common::{EngineError, PackIndex, Result, TxnId, PACK_CAPACITY, TX_INFINITE};

pub const DPN_SIZE: usize = 80;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct DpnFlags: u8 {
        const USED            = 0b0000_0001;
        const LOCAL           = 0b0000_0010;
        const SYNCED          = 0b0000_0100;
        const NULL_COMPRESSED = 0b0000_1000;
        const DATA_COMPRESSED = 0b0001_0000;
        const NO_COMPRESS     = 0b0010_0000;
        /// min/max/sum 按 f64 解释
        const REAL            = 0b0100_0000;
    }
}

// ── 统计信息 ──────────────────────────────────────────────────────────────────

/// 预聚合统计；仅当 `nr > nn` 时有效
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stats {
    Int  { min: i64, max: i64, sum: i64 },
    Real { min: f64, max: f64, sum: f64 },
}

impl Stats {
    pub fn empty(is_real: bool) -> Self {
        if is_real {
            Self::Real { min: 0.0, max: 0.0, sum: 0.0 }
        } else {
            Self::Int { min: 0, max: 0, sum: 0 }
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real { .. })
    }

    fn raw(&self) -> [u64; 3] {
        match *self {
            Self::Int  { min, max, sum } => [min as u64, max as u64, sum as u64],
            Self::Real { min, max, sum } => [min.to_bits(), max.to_bits(), sum.to_bits()],
        }
    }

    fn from_raw(is_real: bool, raw: [u64; 3]) -> Self {
        if is_real {
            Self::Real {
                min: f64::from_bits(raw[0]),
                max: f64::from_bits(raw[1]),
                sum: f64::from_bits(raw[2]),
            }
        } else {
            Self::Int { min: raw[0] as i64, max: raw[1] as i64, sum: raw[2] as i64 }
        }
    }
}

// ── Dpn ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Dpn {
    pub used:            bool,
    /// 属于未提交的写事务 `xmin`
    pub local:           bool,
    /// 内存副本与磁盘一致
    pub synced:          bool,
    pub null_compressed: bool,
    pub data_compressed: bool,
    pub no_compress:     bool,
    /// 根 pack 指向自身，写时复制出的版本指向其父版本
    pub base:            PackIndex,
    pub addr:            u64,
    pub len:             u32,
    pub nr:              u32,
    pub nn:              u32,
    pub xmin:            TxnId,
    pub xmax:            TxnId,
    pub stats:           Stats,
    pub maxlen:          u32,
    pub tagged_ptr:      u64,
}

impl Dpn {
    /// 空槽位
    pub fn unused() -> Self {
        Self {
            used: false, local: false, synced: true,
            null_compressed: false, data_compressed: false, no_compress: false,
            base: 0, addr: 0, len: 0, nr: 0, nn: 0,
            xmin: 0, xmax: TX_INFINITE,
            stats: Stats::empty(false),
            maxlen: 0, tagged_ptr: 0,
        }
    }

    /// 事务 `xmin` 新建的空 pack
    pub fn new_pack(is_real: bool, xmin: TxnId) -> Self {
        Self {
            used: true,
            synced: false,
            xmin,
            stats: Stats::empty(is_real),
            ..Self::unused()
        }
    }

    pub fn is_real(&self)   -> bool { self.stats.is_real() }
    pub fn all_nulls(&self) -> bool { self.nr == self.nn }

    /// 统计信息是否可用于谓词下推
    pub fn has_stats(&self) -> bool {
        self.used && self.nr > self.nn
    }

    /// 对事务 `txn` 是否可见：local 副本只对拥有者可见
    pub fn visible_to(&self, txn: TxnId) -> bool {
        if !self.used {
            return false;
        }
        if self.local {
            return self.xmin == txn;
        }
        self.xmin <= txn && txn < self.xmax
    }

    pub fn check(&self) -> Result<()> {
        if self.nn > self.nr || self.nr as usize > PACK_CAPACITY {
            return Err(EngineError::Corrupted(format!(
                "dpn counts out of range: nr={} nn={}", self.nr, self.nn,
            )));
        }
        Ok(())
    }

    fn flags(&self) -> DpnFlags {
        let mut f = DpnFlags::empty();
        f.set(DpnFlags::USED,            self.used);
        f.set(DpnFlags::LOCAL,           self.local);
        f.set(DpnFlags::SYNCED,          self.synced);
        f.set(DpnFlags::NULL_COMPRESSED, self.null_compressed);
        f.set(DpnFlags::DATA_COMPRESSED, self.data_compressed);
        f.set(DpnFlags::NO_COMPRESS,     self.no_compress);
        f.set(DpnFlags::REAL,            self.is_real());
        f
    }

    // ── 序列化 ────────────────────────────────────────────────────────────────

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.flags().bits())?;
        w.write_all(&[0u8; 3])?;
        w.write_u32::<LittleEndian>(self.base)?;
        w.write_u64::<LittleEndian>(self.addr)?;
        w.write_u32::<LittleEndian>(self.len)?;
        w.write_u32::<LittleEndian>(self.nr)?;
        w.write_u32::<LittleEndian>(self.nn)?;
        w.write_u32::<LittleEndian>(self.maxlen)?;
        w.write_u64::<LittleEndian>(self.xmin)?;
        w.write_u64::<LittleEndian>(self.xmax)?;
        for v in self.stats.raw() {
            w.write_u64::<LittleEndian>(v)?;
        }
        w.write_u64::<LittleEndian>(0)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let raw_flags = r.read_u8()?;
        let flags = DpnFlags::from_bits(raw_flags)
            .ok_or_else(|| EngineError::Corrupted(format!("unknown dpn flags {raw_flags:#04x}")))?;
        let mut reserved = [0u8; 3];
        r.read_exact(&mut reserved)?;

        let base   = r.read_u32::<LittleEndian>()?;
        let addr   = r.read_u64::<LittleEndian>()?;
        let len    = r.read_u32::<LittleEndian>()?;
        let nr     = r.read_u32::<LittleEndian>()?;
        let nn     = r.read_u32::<LittleEndian>()?;
        let maxlen = r.read_u32::<LittleEndian>()?;
        let xmin   = r.read_u64::<LittleEndian>()?;
        let xmax   = r.read_u64::<LittleEndian>()?;
        let mut raw = [0u64; 3];
        for v in raw.iter_mut() {
            *v = r.read_u64::<LittleEndian>()?;
        }
        let _tagged_ptr = r.read_u64::<LittleEndian>()?;

        let dpn = Self {
            used:            flags.contains(DpnFlags::USED),
            local:           flags.contains(DpnFlags::LOCAL),
            synced:          flags.contains(DpnFlags::SYNCED),
            null_compressed: flags.contains(DpnFlags::NULL_COMPRESSED),
            data_compressed: flags.contains(DpnFlags::DATA_COMPRESSED),
            no_compress:     flags.contains(DpnFlags::NO_COMPRESS),
            base, addr, len, nr, nn, xmin, xmax,
            stats: Stats::from_raw(flags.contains(DpnFlags::REAL), raw),
            maxlen,
            tagged_ptr: 0,
        };
        dpn.check()?;
        Ok(dpn)
    }

    pub fn to_bytes(&self) -> Result<[u8; DPN_SIZE]> {
        let mut out = [0u8; DPN_SIZE];
        self.write_to(&mut &mut out[..])?;
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < DPN_SIZE {
            return Err(EngineError::Corrupted(format!("short dpn record: {} bytes", data.len())));
        }
        Self::read_from(&mut &data[..DPN_SIZE])
    }

    /// 检查工具的输出格式：按字段声明顺序以分号分隔
    pub fn report(&self) -> String {
        let (min, max, sum) = match self.stats {
            Stats::Int  { min, max, sum } => (min.to_string(), max.to_string(), sum.to_string()),
            Stats::Real { min, max, sum } => (min.to_string(), max.to_string(), sum.to_string()),
        };
        format!(
            "{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{}",
            self.used as u8, self.local as u8, self.synced as u8,
            self.null_compressed as u8, self.data_compressed as u8, self.no_compress as u8,
            self.base, self.addr, self.len, self.nr, self.nn,
            self.xmin, self.xmax, min, max, sum, self.maxlen,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dpn {
        Dpn {
            local: true,
            null_compressed: true,
            base: 7,
            addr: 1 << 40,
            len: 4096,
            nr: 65_536,
            nn: 12,
            xmax: 99,
            stats: Stats::Int { min: -5, max: 1 << 50, sum: 12345 },
            maxlen: 8,
            tagged_ptr: 0xdead_beef,
            ..Dpn::new_pack(false, 42)
        }
    }

    #[test]
    fn record_is_fixed_size_and_round_trips() {
        let d = sample();
        let bytes = d.to_bytes().unwrap();
        assert_eq!(bytes.len(), DPN_SIZE);
        let back = Dpn::from_bytes(&bytes).unwrap();
        // tagged_ptr 不落盘
        assert_eq!(back, Dpn { tagged_ptr: 0, ..d });
    }

    #[test]
    fn real_stats_keep_their_interpretation() {
        let d = Dpn {
            nr: 3,
            stats: Stats::Real { min: -1.5, max: 2.25, sum: 0.75 },
            ..Dpn::new_pack(true, 1)
        };
        let back = Dpn::from_bytes(&d.to_bytes().unwrap()).unwrap();
        assert!(back.is_real());
        assert_eq!(back.stats, d.stats);
    }

    #[test]
    fn report_lists_fields_in_order() {
        let r = sample().report();
        let fields: Vec<&str> = r.split(';').collect();
        assert_eq!(fields.len(), 17);
        assert_eq!(&fields[..6], &["1", "1", "0", "1", "0", "0"]);
        assert_eq!(fields[6], "7");
        assert_eq!(fields[9], "65536");
        assert_eq!(fields[13], "-5");
    }

    #[test]
    fn corrupt_records_are_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0] = 0x80;
        assert!(matches!(Dpn::from_bytes(&bytes), Err(EngineError::Corrupted(_))));

        let bad = Dpn { nr: 2, nn: 3, ..Dpn::new_pack(false, 1) };
        let bytes = bad.to_bytes().unwrap();
        assert!(Dpn::from_bytes(&bytes).is_err());
        assert!(Dpn::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn visibility_follows_ownership_and_bounds() {
        assert!(!Dpn::unused().visible_to(5));
        assert!(!Dpn::unused().has_stats());

        let committed = Dpn { xmax: 10, ..Dpn::new_pack(false, 3) };
        assert!(committed.visible_to(3) && committed.visible_to(9));
        assert!(!committed.visible_to(2) && !committed.visible_to(10));

        let local = Dpn { local: true, ..Dpn::new_pack(false, 8) };
        assert!(local.visible_to(8));
        assert!(!local.visible_to(9));
    }
}
