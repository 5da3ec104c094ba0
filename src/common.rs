//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

pub type TableId   = u32;
pub type ColumnId  = u32;
pub type PackIndex = u32;
/// 事务号；`TX_INFINITE` 表示“尚未被删除”
pub type TxnId     = u64;

pub const TX_INFINITE: TxnId = u64::MAX;

/// 每个 Pack 最多容纳的行数（2^16）
pub const PACK_CAPACITY: usize = 1 << 16;

// ── PackCoordinate ────────────────────────────────────────────────────────────

/// 全局唯一定位一个 Pack：(表, 列, pack 序号)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackCoordinate {
    pub table:  TableId,
    pub column: ColumnId,
    pub pack:   PackIndex,
}

impl PackCoordinate {
    pub fn new(table: TableId, column: ColumnId, pack: PackIndex) -> Self {
        Self { table, column, pack }
    }

    /// 同一列上的另一个 pack
    pub fn with_pack(self, pack: PackIndex) -> Self {
        Self { pack, ..self }
    }
}

impl std::fmt::Display for PackCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.table, self.column, self.pack)
    }
}

// ── 列类型 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// 定点整数（含日期/时间等可映射为 i64 的类型）
    Int,
    /// 双精度浮点
    Real,
    /// 定长上限的字节串
    Str,
}

impl ColumnKind {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Int  => 0,
            Self::Real => 1,
            Self::Str  => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Int),
            1 => Some(Self::Real),
            2 => Some(Self::Str),
            _ => None,
        }
    }
}

// ── 压缩错误 ──────────────────────────────────────────────────────────────────

/// 编解码器统一错误码；任何非成功结果对当前 pack 都是致命的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CprsErr {
    #[error("buffer overrun")]
    BufferOverrun,
    #[error("bad parameters")]
    BadParams,
    #[error("checksum mismatch")]
    Checksum,
    #[error("unsupported format version")]
    Version,
    #[error("corrupted data")]
    Corrupted,
    #[error("allocation failure")]
    OutOfMemory,
    #[error("unclassified codec failure")]
    Other,
}

pub type CprsResult<T> = std::result::Result<T, CprsErr>;

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("compression error: {0}")]
    Compression(#[from] CprsErr),
    #[error("checksum mismatch in {0}")]
    ChecksumMismatch(String),
    #[error("version mismatch in {file}: found {found}, expected {expected}")]
    VersionMismatch { file: String, found: u32, expected: u32 },
    #[error("corrupted: {0}")]
    Corrupted(String),
    #[error("pack not found: {0}")]
    PackNotFound(PackIndex),
    #[error("pack slot {0} is not in use")]
    UnusedPack(PackIndex),
    #[error("value type does not match pack type: {0}")]
    TypeMismatch(String),
    #[error("pack is full ({PACK_CAPACITY} rows)")]
    PackFull,
    #[error("pack {0} is committed; clone it before writing")]
    ReadOnlyPack(PackIndex),
    #[error("pack {pack} has an uncommitted copy owned by transaction {owner}")]
    PackLocked { pack: PackIndex, owner: TxnId },
    #[error("pack {0} already has a newer committed version")]
    WriteConflict(PackIndex),
    #[error("column not found: {0}")]
    ColumnNotFound(ColumnId),
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
