//! 表目录与列集合
//!
//! ```text
//! <table>/
//! ├── TABLE_DESC   magic "PACKTBL\0" | version (u32) | table (u32) | ncols (u32)
//! │                | 每列: id (u32) kind (u8) width (u32) name_len (u16) name | CRC32 (u32)
//! ├── VERSION      当前表版本 (u64)，经 VERSION.tmp + rename 写入
//! └── columns/<id>/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::cache::PackLoader;
use crate::column::{ColumnMeta, ColumnStore};
use crate::common::{ColumnId, ColumnKind, EngineError, PackCoordinate, Result, TableId, TxnId};
use crate::config::EngineConfig;
use crate::pack::Pack;

pub const TABLE_MAGIC:   &[u8; 8] = b"PACKTBL\0";
pub const TABLE_VERSION: u32      = 1;

const DESC_FILE:        &str = "TABLE_DESC";
const VERSION_FILE:     &str = "VERSION";
const VERSION_TMP_FILE: &str = "VERSION.tmp";
const COLUMNS_DIR:      &str = "columns";

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub id:    ColumnId,
    pub name:  String,
    pub kind:  ColumnKind,
    /// 字符串最大字节长度
    pub width: u32,
}

impl ColumnDef {
    pub fn int(id: ColumnId, name: &str) -> Self {
        Self { id, name: name.into(), kind: ColumnKind::Int, width: 0 }
    }
    pub fn real(id: ColumnId, name: &str) -> Self {
        Self { id, name: name.into(), kind: ColumnKind::Real, width: 0 }
    }
    pub fn varchar(id: ColumnId, name: &str, max_len: u32) -> Self {
        Self { id, name: name.into(), kind: ColumnKind::Str, width: max_len }
    }
}

// ── TABLE_DESC ────────────────────────────────────────────────────────────────

fn serialize_desc(table: TableId, defs: &[ColumnDef]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(TABLE_MAGIC);
    out.write_u32::<LittleEndian>(TABLE_VERSION)?;
    out.write_u32::<LittleEndian>(table)?;
    out.write_u32::<LittleEndian>(defs.len() as u32)?;
    for d in defs {
        out.write_u32::<LittleEndian>(d.id)?;
        out.write_u8(d.kind.to_u8())?;
        out.write_u32::<LittleEndian>(d.width)?;
        out.write_u16::<LittleEndian>(d.name.len() as u16)?;
        out.extend_from_slice(d.name.as_bytes());
    }
    let crc = crc32fast::hash(&out);
    out.write_u32::<LittleEndian>(crc)?;
    Ok(out)
}

fn deserialize_desc(data: &[u8]) -> Result<(TableId, Vec<ColumnDef>)> {
    let corrupt = |what: &str| EngineError::Corrupted(format!("{DESC_FILE}: {what}"));
    if data.len() < 8 + 4 + 4 + 4 + 4 || &data[..8] != TABLE_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let mut cur = Cursor::new(&data[8..]);
    let version = cur.read_u32::<LittleEndian>()?;
    if version != TABLE_VERSION {
        return Err(EngineError::VersionMismatch {
            file: DESC_FILE.into(), found: version, expected: TABLE_VERSION,
        });
    }
    let (body, crc) = data.split_at(data.len() - 4);
    if crc32fast::hash(body) != LittleEndian::read_u32(crc) {
        return Err(EngineError::ChecksumMismatch(DESC_FILE.into()));
    }
    let table = cur.read_u32::<LittleEndian>()?;
    let ncols = cur.read_u32::<LittleEndian>()?;
    let mut defs = Vec::with_capacity(ncols as usize);
    for _ in 0..ncols {
        let id    = cur.read_u32::<LittleEndian>()?;
        let kind  = cur.read_u8()?;
        let width = cur.read_u32::<LittleEndian>()?;
        let len   = cur.read_u16::<LittleEndian>()? as usize;
        let mut name = vec![0u8; len];
        cur.read_exact(&mut name)?;
        defs.push(ColumnDef {
            id,
            name:  String::from_utf8(name).map_err(|_| corrupt("column name is not utf-8"))?,
            kind:  ColumnKind::from_u8(kind).ok_or_else(|| corrupt("column kind"))?,
            width,
        });
    }
    Ok((table, defs))
}

// ── TableStore ────────────────────────────────────────────────────────────────

pub struct TableStore {
    dir:     PathBuf,
    id:      TableId,
    defs:    Vec<ColumnDef>,
    columns: BTreeMap<ColumnId, ColumnStore>,
    version: u64,
}

impl TableStore {
    pub fn create(dir: impl AsRef<Path>, id: TableId, defs: Vec<ColumnDef>, cfg: &EngineConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(COLUMNS_DIR))?;
        if dir.join(DESC_FILE).exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already holds a table", dir.display()),
            ).into());
        }
        let mut columns = BTreeMap::new();
        for d in &defs {
            let meta = ColumnMeta { table: id, column: d.id, kind: d.kind, width: d.width };
            if columns.insert(d.id, ColumnStore::create(Self::column_dir(&dir, d.id), meta, cfg)?).is_some() {
                return Err(EngineError::Corrupted(format!("duplicate column id {}", d.id)));
            }
        }
        fs::write(dir.join(DESC_FILE), serialize_desc(id, &defs)?)?;
        let table = Self { dir, id, defs, columns, version: 0 };
        table.write_version()?;
        log::info!("created table {id} with {} columns", table.defs.len());
        Ok(table)
    }

    pub fn open(dir: impl AsRef<Path>, cfg: &EngineConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (id, defs) = deserialize_desc(&fs::read(dir.join(DESC_FILE))?)?;
        let version = Self::read_version(&dir)?;

        let mut columns = BTreeMap::new();
        for d in &defs {
            let col = ColumnStore::open(Self::column_dir(&dir, d.id), cfg)?;
            let m = col.meta();
            if (m.table, m.column, m.kind, m.width) != (id, d.id, d.kind, d.width) {
                return Err(EngineError::Corrupted(format!(
                    "column {} META disagrees with {DESC_FILE}", d.id,
                )));
            }
            columns.insert(d.id, col);
        }
        log::info!("opened table {id} at version {version}");
        Ok(Self { dir, id, defs, columns, version })
    }

    fn column_dir(dir: &Path, id: ColumnId) -> PathBuf {
        dir.join(COLUMNS_DIR).join(id.to_string())
    }

    fn read_version(dir: &Path) -> Result<u64> {
        let raw = fs::read(dir.join(VERSION_FILE))?;
        if raw.len() != 8 {
            return Err(EngineError::Corrupted(format!("{VERSION_FILE}: {} bytes", raw.len())));
        }
        Ok(LittleEndian::read_u64(&raw))
    }

    fn write_version(&self) -> Result<()> {
        let tmp = self.dir.join(VERSION_TMP_FILE);
        let mut buf = Vec::with_capacity(8);
        buf.write_u64::<LittleEndian>(self.version)?;
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, self.dir.join(VERSION_FILE))?;
        Ok(())
    }

    pub fn id(&self)          -> TableId      { self.id }
    pub fn version(&self)     -> u64          { self.version }
    pub fn definitions(&self) -> &[ColumnDef] { &self.defs }

    pub fn column(&self, id: ColumnId) -> Result<&ColumnStore> {
        self.columns.get(&id).ok_or(EngineError::ColumnNotFound(id))
    }

    pub fn column_mut(&mut self, id: ColumnId) -> Result<&mut ColumnStore> {
        self.columns.get_mut(&id).ok_or(EngineError::ColumnNotFound(id))
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnStore> {
        self.columns.values()
    }

    /// 提交所有列上 `txn` 的写入；有改动时表版本加一
    pub fn commit(&mut self, txn: TxnId) -> Result<u64> {
        let mut committed = 0;
        for col in self.columns.values_mut() {
            committed += col.commit(txn)?;
        }
        if committed > 0 {
            self.version += 1;
            self.write_version()?;
            log::info!("table {}: txn {txn} committed as version {}", self.id, self.version);
        }
        Ok(self.version)
    }

    pub fn rollback(&mut self, txn: TxnId) -> Result<usize> {
        let mut dropped = 0;
        for col in self.columns.values_mut() {
            dropped += col.rollback(txn)?;
        }
        Ok(dropped)
    }

    pub fn flush(&self) -> Result<()> {
        for col in self.columns.values() {
            col.flush()?;
        }
        self.write_version()
    }
}

impl PackLoader for TableStore {
    fn load_pack(&self, pc: PackCoordinate) -> Result<Pack> {
        if pc.table != self.id {
            return Err(EngineError::ColumnNotFound(pc.column));
        }
        self.column(pc.column)?.read_pack(pc.pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn defs() -> Vec<ColumnDef> {
        vec![ColumnDef::int(0, "id"), ColumnDef::real(1, "price"), ColumnDef::varchar(2, "code", 8)]
    }

    #[test]
    fn create_then_open() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::default();
        {
            let mut t = TableStore::create(tmp.path(), 42, defs(), &cfg).unwrap();
            t.column_mut(0).unwrap().append_values(&[Value::Int(1), Value::Int(2)], 1).unwrap();
            t.column_mut(2).unwrap().append_values(&[Value::from("ab"), Value::Null], 1).unwrap();
            assert_eq!(t.commit(1).unwrap(), 1);
            t.flush().unwrap();
        }
        assert!(tmp.path().join("VERSION").exists());
        assert!(!tmp.path().join("VERSION.tmp").exists());
        assert!(tmp.path().join("columns/2/DN").exists());

        let t = TableStore::open(tmp.path(), &cfg).unwrap();
        assert_eq!((t.id(), t.version()), (42, 1));
        assert_eq!(t.definitions(), defs().as_slice());
        let p = t.load_pack(PackCoordinate::new(42, 2, 0)).unwrap();
        assert_eq!(p.get_value(0), Value::StrView(b"ab"));
        assert!(p.is_null(1));
        assert!(matches!(t.column(9), Err(EngineError::ColumnNotFound(9))));
    }

    #[test]
    fn commit_bumps_version() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::default();
        let mut t = TableStore::create(tmp.path(), 1, defs(), &cfg).unwrap();
        t.column_mut(0).unwrap().append_values(&[Value::Int(5)], 1).unwrap();
        // 事务 2 没有改动，版本不变
        assert_eq!(t.commit(2).unwrap(), 0);
        assert_eq!(t.commit(1).unwrap(), 1);

        let mut p = t.column_mut(0).unwrap().clone_for_write(0, 2).unwrap();
        p.update_value(0, &Value::Int(6)).unwrap();
        t.column_mut(0).unwrap().write_pack(&mut p).unwrap();
        assert_eq!(t.commit(2).unwrap(), 2);
        drop(t);

        let t = TableStore::open(tmp.path(), &cfg).unwrap();
        assert_eq!(t.version(), 2);
        let col = t.column(0).unwrap();
        assert_eq!(col.read_pack(col.resolve(0, 3).unwrap()).unwrap().get_value(0), Value::Int(6));
        assert_eq!(col.read_pack(col.resolve(0, 1).unwrap()).unwrap().get_value(0), Value::Int(5));
    }

    #[test]
    fn damaged_desc_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::default();
        TableStore::create(tmp.path(), 1, defs(), &cfg).unwrap();
        let path = tmp.path().join("TABLE_DESC");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 6;
        raw[last] ^= 0x20;
        fs::write(&path, &raw).unwrap();
        assert!(matches!(TableStore::open(tmp.path(), &cfg), Err(EngineError::ChecksumMismatch(_))));

        raw[8] = 2;
        fs::write(&path, &raw).unwrap();
        assert!(matches!(TableStore::open(tmp.path(), &cfg), Err(EngineError::VersionMismatch { found: 2, .. })));
        assert!(TableStore::create(tmp.path(), 1, defs(), &cfg).is_err());
    }
}
