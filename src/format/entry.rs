//! Entries: the immutable snapshot nodes of the version chain.
//!
//! Layout at `position`:
//!
//! ```text
//! "C.En" | entryLength:u32 | bsOffset:bits | next:bits | compress:u8
//!        | checksum:[u8;16] | nameTableLength:u32 | name table | item list
//! ```
//!
//! The checksum is an MD5 digest over the name table bytes followed by the
//! item list bytes, as they sit on disk (after optional compression).

use crate::binary::{
    read_name_value, read_sized, read_u32, read_u8, write_name_value, write_sized, write_u32,
};
use crate::codec::{deflate_bytes, inflate_bytes};
use crate::error::{ArchiveError, Result};
use crate::types::{
    validate_item_path, BitsParam, EntryDigest, NameValue, Operator, OPERATOR_END, OPERATOR_MASK,
};
use md5::{Digest, Md5};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Class tag opening every entry.
pub const ENTRY_CLASS_TYPE: &[u8; 4] = b"C.En";

/// Longest name table path on disk, NUL included.
const MAX_NAME_BYTES: usize = 256;

const COMPRESS_NAME_TABLE: u8 = 0x01;
const COMPRESS_ITEM_LIST: u8 = 0x02;
const COMPRESS_UNDEFINED: u8 = 0xfc;

/// Length of every field except the two tables.
pub fn fixed_len(bits: BitsParam) -> u64 {
    // tag + length + bsOffset + next + compress + checksum + nameTableLength
    (4 + 4 + 2 * bits.width() + 1 + 16 + 4) as u64
}

/// Offset of the `next` field relative to the entry position.
fn next_field_offset(bits: BitsParam) -> u64 {
    (4 + 4 + bits.width()) as u64
}

/// Which of an entry's tables are deflated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EntryCompression {
    pub name_table: bool,
    pub item_list: bool,
}

impl EntryCompression {
    pub fn new(name_table: bool, item_list: bool) -> Self {
        Self {
            name_table,
            item_list,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & COMPRESS_UNDEFINED != 0 {
            return Err(ArchiveError::Corruption(format!(
                "undefined compress bits {:#04x}",
                byte
            )));
        }
        Ok(Self {
            name_table: byte & COMPRESS_NAME_TABLE != 0,
            item_list: byte & COMPRESS_ITEM_LIST != 0,
        })
    }

    pub fn as_byte(self) -> u8 {
        let mut byte = 0;
        if self.name_table {
            byte |= COMPRESS_NAME_TABLE;
        }
        if self.item_list {
            byte |= COMPRESS_ITEM_LIST;
        }
        byte
    }
}

/// Fixed fields of a parsed or written entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    /// 1-based position in the chain.
    pub index: u32,
    pub position: u64,
    pub length: u32,
    pub bs_offset: u64,
    /// Offset of the following entry, 0 at the chain end.
    pub next: u64,
    pub compression: EntryCompression,
    pub checksum: EntryDigest,
    pub name_table_length: u32,
    pub item_list_length: u32,
    pub name_count: u32,
}

/// One item-list record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemRecord {
    pub operator: Operator,
    /// Offset of the backing store record, relative to the entry's `bs_offset`.
    pub offset: u64,
}

/// One path and its records within an entry, as written or parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryItem {
    pub path: String,
    pub records: Vec<ItemRecord>,
}

/// An entry with its tables cross-referenced into per-path record lists,
/// in name table order.
#[derive(Clone, Debug)]
pub struct ParsedEntry {
    pub info: EntryInfo,
    pub items: Vec<EntryItem>,
}

/// An entry's fixed fields plus its tables exactly as stored.
pub struct RawEntry {
    pub info: EntryInfo,
    pub name_table: Vec<u8>,
    pub item_list: Vec<u8>,
}

impl RawEntry {
    pub fn digest(&self) -> EntryDigest {
        digest_tables(&self.name_table, &self.item_list)
    }
}

fn digest_tables(name_table: &[u8], item_list: &[u8]) -> EntryDigest {
    let mut hasher = Md5::new();
    hasher.update(name_table);
    hasher.update(item_list);
    EntryDigest(hasher.finalize().into())
}

/// Read an entry's fixed fields and raw tables without interpreting them.
pub fn read_raw_entry<R: Read + Seek>(
    reader: &mut R,
    bits: BitsParam,
    position: u64,
    index: u32,
) -> Result<RawEntry> {
    reader.seek(SeekFrom::Start(position))?;

    let mut tag = [0u8; 4];
    reader.read_exact(&mut tag)?;
    if &tag != ENTRY_CLASS_TYPE {
        return Err(ArchiveError::InvalidEntryClassType(position));
    }

    let length = read_u32(reader)?;
    let bs_offset = read_sized(reader, bits)?;
    let next = read_sized(reader, bits)?;
    let compression = EntryCompression::from_byte(read_u8(reader)?)?;
    let mut checksum = [0u8; 16];
    reader.read_exact(&mut checksum)?;
    let name_table_length = read_u32(reader)?;

    let tables_len = (length as u64)
        .checked_sub(fixed_len(bits))
        .and_then(|rest| rest.checked_sub(name_table_length as u64))
        .ok_or_else(|| {
            ArchiveError::Corruption(format!(
                "entry at {} has length {} shorter than its fields",
                position, length
            ))
        })?;
    let item_list_length = tables_len as u32;

    let name_table = read_table(reader, name_table_length, position)?;
    let item_list = read_table(reader, item_list_length, position)?;

    Ok(RawEntry {
        info: EntryInfo {
            index,
            position,
            length,
            bs_offset,
            next,
            compression,
            checksum: EntryDigest(checksum),
            name_table_length,
            item_list_length,
            name_count: 0,
        },
        name_table,
        item_list,
    })
}

/// Read `len` table bytes. The buffer only grows as bytes arrive, so a
/// damaged length field cannot force a huge allocation.
fn read_table<R: Read>(reader: &mut R, len: u32, position: u64) -> Result<Vec<u8>> {
    let mut table = Vec::new();
    (&mut *reader).take(len as u64).read_to_end(&mut table)?;
    if table.len() as u64 != len as u64 {
        return Err(ArchiveError::Corruption(format!(
            "entry at {} ends after {} of {} table bytes",
            position,
            table.len(),
            len
        )));
    }
    Ok(table)
}

/// Parse the entry at `position` and cross-reference its tables.
pub fn parse_entry<R: Read + Seek>(
    reader: &mut R,
    bits: BitsParam,
    position: u64,
    index: u32,
) -> Result<ParsedEntry> {
    let raw = read_raw_entry(reader, bits, position, index)?;
    let mut info = raw.info;

    let name_table = if info.compression.name_table {
        inflate_bytes(&raw.name_table)
            .map_err(|e| ArchiveError::InvalidNameTable(format!("inflate failed: {}", e)))?
    } else {
        raw.name_table
    };
    let item_list = if info.compression.item_list {
        inflate_bytes(&raw.item_list)
            .map_err(|e| ArchiveError::InvalidItemList(format!("inflate failed: {}", e)))?
    } else {
        raw.item_list
    };

    let names = parse_name_table(&name_table)?;
    let mut records = parse_item_list(&item_list, bits)?;
    info.name_count = names.len() as u32;

    // Every row must meet at least one record and every record a row
    let mut items = Vec::with_capacity(names.len());
    for (name_value, path) in names {
        let item_records = records
            .remove(&name_value)
            .ok_or(ArchiveError::InvalidNameValue(name_value))?;
        items.push(EntryItem {
            path,
            records: item_records,
        });
    }
    if let Some(orphan) = records.keys().next() {
        return Err(ArchiveError::InvalidNameValue(*orphan));
    }

    Ok(ParsedEntry { info, items })
}

fn parse_name_table(bytes: &[u8]) -> Result<Vec<(NameValue, String)>> {
    let invalid = |e: io::Error| ArchiveError::InvalidNameTable(e.to_string());
    let mut cursor = Cursor::new(bytes);

    let count = read_u32(&mut cursor).map_err(invalid)?;
    let mut names = Vec::new();
    let mut seen_values = HashSet::new();
    let mut seen_paths = HashSet::new();

    for _ in 0..count {
        let name_value = read_name_value(&mut cursor).map_err(invalid)?;
        let path = read_name(&mut cursor)?;
        if !seen_values.insert(name_value) {
            return Err(ArchiveError::InvalidNameTable(format!(
                "duplicate name value {}",
                name_value
            )));
        }
        if !seen_paths.insert(path.clone()) {
            return Err(ArchiveError::InvalidNameTable(format!(
                "duplicate path {}",
                path
            )));
        }
        names.push((name_value, path));
    }

    if (cursor.position() as usize) != bytes.len() {
        return Err(ArchiveError::InvalidNameTable(format!(
            "{} trailing bytes",
            bytes.len() - cursor.position() as usize
        )));
    }
    Ok(names)
}

fn read_name(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_u8(cursor).map_err(|_| {
            ArchiveError::InvalidNameTable("unterminated path".into())
        })?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        if bytes.len() >= MAX_NAME_BYTES {
            return Err(ArchiveError::InvalidNameTable(format!(
                "path longer than {} bytes",
                MAX_NAME_BYTES - 1
            )));
        }
    }

    let path = String::from_utf8(bytes)
        .map_err(|_| ArchiveError::InvalidNameTable("path is not UTF-8".into()))?;
    validate_item_path(&path)
        .map_err(|_| ArchiveError::InvalidNameTable(format!("bad path {:?}", path)))?;
    Ok(path)
}

fn parse_item_list(bytes: &[u8], bits: BitsParam) -> Result<HashMap<NameValue, Vec<ItemRecord>>> {
    let truncated = |_: io::Error| ArchiveError::InvalidItemList("missing end record".into());
    let mut cursor = Cursor::new(bytes);
    let mut records: HashMap<NameValue, Vec<ItemRecord>> = HashMap::new();

    loop {
        let op_byte = read_u8(&mut cursor).map_err(truncated)?;
        let offset = read_sized(&mut cursor, bits).map_err(truncated)?;
        let name_value = read_name_value(&mut cursor).map_err(truncated)?;

        if op_byte & OPERATOR_MASK == OPERATOR_END {
            if offset != 0 || name_value != NameValue::END {
                return Err(ArchiveError::InvalidItemList(format!(
                    "malformed end record ({}, {})",
                    offset, name_value
                )));
            }
            break;
        }

        let operator = Operator::from_byte(op_byte).ok_or_else(|| {
            ArchiveError::InvalidItemList(format!("unknown operator {:#04x}", op_byte))
        })?;
        records
            .entry(name_value)
            .or_default()
            .push(ItemRecord { operator, offset });
    }

    if (cursor.position() as usize) != bytes.len() {
        return Err(ArchiveError::InvalidItemList(
            "bytes after end record".into(),
        ));
    }
    Ok(records)
}

fn encode_name_table(items: &[EntryItem]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_u32(&mut out, items.len() as u32)?;
    for (i, item) in items.iter().enumerate() {
        write_name_value(&mut out, NameValue::from_counter(i as u32 + 1))?;
        out.extend_from_slice(item.path.as_bytes());
        out.push(0);
    }
    Ok(out)
}

fn encode_item_list(items: &[EntryItem], bits: BitsParam) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let name_value = NameValue::from_counter(i as u32 + 1);
        for record in &item.records {
            out.push(record.operator.as_byte());
            write_sized(&mut out, bits, record.offset)?;
            write_name_value(&mut out, name_value)?;
        }
    }
    out.push(OPERATOR_END);
    write_sized(&mut out, bits, 0)?;
    write_name_value(&mut out, NameValue::END)?;
    Ok(out)
}

/// Append a new entry at the end of the file. Name values are assigned
/// sequentially from 1 in `items` order.
pub fn write_entry<W: Write + Seek>(
    writer: &mut W,
    bits: BitsParam,
    index: u32,
    bs_offset: u64,
    compression: EntryCompression,
    items: &[EntryItem],
) -> Result<EntryInfo> {
    let mut name_table = encode_name_table(items)?;
    let mut item_list = encode_item_list(items, bits)?;
    if compression.name_table {
        name_table = deflate_bytes(&name_table)?;
    }
    if compression.item_list {
        item_list = deflate_bytes(&item_list)?;
    }
    let checksum = digest_tables(&name_table, &item_list);

    let total = fixed_len(bits) + name_table.len() as u64 + item_list.len() as u64;
    let length = u32::try_from(total).map_err(|_| ArchiveError::OffsetOverflow {
        value: total,
        width: 4,
    })?;

    let position = writer.seek(SeekFrom::End(0))?;
    writer.write_all(ENTRY_CLASS_TYPE)?;
    write_u32(writer, length)?;
    write_sized(writer, bits, bs_offset)?;
    write_sized(writer, bits, 0)?;
    writer.write_all(&[compression.as_byte()])?;
    writer.write_all(&checksum.0)?;
    write_u32(writer, name_table.len() as u32)?;
    writer.write_all(&name_table)?;
    writer.write_all(&item_list)?;

    Ok(EntryInfo {
        index,
        position,
        length,
        bs_offset,
        next: 0,
        compression,
        checksum,
        name_table_length: name_table.len() as u32,
        item_list_length: item_list.len() as u32,
        name_count: items.len() as u32,
    })
}

/// Point the entry at `position` to its successor.
pub fn write_back_next<W: Write + Seek>(
    writer: &mut W,
    bits: BitsParam,
    position: u64,
    next: u64,
) -> Result<()> {
    writer.seek(SeekFrom::Start(position + next_field_offset(bits)))?;
    write_sized(writer, bits, next)
}
