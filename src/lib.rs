//! # olap-pack-storage
//!
//! 以 pack 为单位的列式存储核心：每列按至多 65 536 行切成 pack，
//! 每个 pack 有一条 80 字节的 DPN 描述记录（MVCC 可见性、min/max/sum、压缩标志），
//! 数据经区间编码 / 均匀位打包 / 逐位置字典编码压缩后追加到列的 DATA 文件。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  TableStore   TABLE_DESC / VERSION / columns/<id>/       │
//! │     │                                                    │
//! │  ColumnStore  META / DN (Dpn × N) / DATA / dict / v ...  │
//! │     │  append_pack / read_pack / clone_for_write / commit│
//! │     │                                                    │
//! │   Pack ── Int(PackInt)  偏移数组 U8/U16/U32/U64 | f64    │
//! │        └─ Str(PackStr)  TextStat 字典 | 原始 | lz4        │
//! │     │                                                    │
//! │   compression                                            │
//! │     ├─ num        字典 + 区间编码 / 均匀位打包           │
//! │     ├─ nulls      null 位图的二元区间编码                 │
//! │     ├─ arith      16 位区间编码器（ArithCoder）           │
//! │     └─ text_stat  逐位置字典                              │
//! │   BitStream / Hash64                                     │
//! └──────────────────────────────────────────────────────────┘
//!
//!  扫描线程 ──► VcPackGuardian ──► PackCache (PackSource) ──► TableStore (PackLoader)
//!               每线程每维至多持有一个 pack        CTask 划分 pack 区间
//! ```

// ── 基础 ──────────────────────────────────────────────────────────────────────
pub mod common;
pub mod config;
pub mod value;
pub mod bitstream;
pub mod hash64;

// ── 编解码 ────────────────────────────────────────────────────────────────────
pub mod compression;

// ── Pack 与描述记录 ───────────────────────────────────────────────────────────
pub mod dpn;
pub mod pack;

// ── 磁盘布局 ──────────────────────────────────────────────────────────────────
pub mod column;
pub mod table;

// ── 并发扫描 ──────────────────────────────────────────────────────────────────
pub mod cache;
pub mod guardian;
pub mod task;

pub use common::{EngineError, PackCoordinate, Result};
pub use config::EngineConfig;
pub use pack::Pack;
pub use value::Value;
