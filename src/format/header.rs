//! File header: version, field width and the head of the entry chain.

use crate::binary::{read_sized, read_u32, read_u8, write_sized, write_u32};
use crate::error::{ArchiveError, Result};
use crate::types::{BitsParam, NameTableType};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom, Write};

/// Tag opening the rights info block.
pub const RIGHTS_INFO: &[u8; 4] = b"@XDA";

/// Rights info block length; only the leading tag is checked.
const RIGHTS_INFO_LEN: usize = 14;

/// Offset of the entry count field.
pub const ENTRY_COUNT_OFFSET: u64 = 16;

/// Offset of the first entry offset field.
pub const FIRST_ENTRY_OFFSET: u64 = 22;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Header {
    pub major_version: u8,
    pub minor_version: u8,
    pub entry_count: u32,
    pub name_table_type: NameTableType,
    pub bits_param: BitsParam,
    /// Unset until the first entry is written.
    pub first_entry_offset: Option<u64>,
}

impl Header {
    /// Build a header for a new file.
    pub fn create(major: u8, minor: u8, name_table_type: u8, bits_param: u8) -> Result<Self> {
        Ok(Self {
            major_version: major,
            minor_version: minor,
            entry_count: 0,
            name_table_type: NameTableType::new(name_table_type)?,
            bits_param: BitsParam::from_byte(bits_param)?,
            first_entry_offset: None,
        })
    }

    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;

        let mut rights = [0u8; RIGHTS_INFO_LEN];
        reader.read_exact(&mut rights)?;
        if &rights[..RIGHTS_INFO.len()] != RIGHTS_INFO {
            return Err(ArchiveError::InvalidRightsInfo);
        }

        let major_version = read_u8(reader)?;
        let minor_version = read_u8(reader)?;
        let entry_count = read_u32(reader)?;
        let name_table_type = NameTableType::new(read_u8(reader)?)?;
        let bits_param = BitsParam::from_byte(read_u8(reader)?)?;

        let raw_offset = read_sized(reader, bits_param)?;
        let first_entry_offset = if raw_offset == bits_param.max_value() {
            None
        } else {
            Some(raw_offset)
        };

        if entry_count > 0 && first_entry_offset.is_none() {
            return Err(ArchiveError::Corruption(format!(
                "header counts {} entries but has no first entry",
                entry_count
            )));
        }

        Ok(Self {
            major_version,
            minor_version,
            entry_count,
            name_table_type,
            bits_param,
            first_entry_offset,
        })
    }

    /// Write the whole header at the start of the file.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        writer.seek(SeekFrom::Start(0))?;

        let mut rights = [0u8; RIGHTS_INFO_LEN];
        rights[..RIGHTS_INFO.len()].copy_from_slice(RIGHTS_INFO);
        writer.write_all(&rights)?;

        writer.write_all(&[self.major_version, self.minor_version])?;
        write_u32(writer, self.entry_count)?;
        writer.write_all(&[self.name_table_type.as_byte(), self.bits_param.as_byte()])?;
        self.write_first_entry_field(writer)
    }

    /// Total header length in bytes.
    pub fn encoded_len(&self) -> u64 {
        FIRST_ENTRY_OFFSET + self.bits_param.width() as u64
    }

    /// Rewrite the entry count in place, updating `self` only once the
    /// write went through.
    pub fn write_back_entry_count<W: Write + Seek>(&mut self, writer: &mut W, count: u32) -> Result<()> {
        writer.seek(SeekFrom::Start(ENTRY_COUNT_OFFSET))?;
        write_u32(writer, count)?;
        self.entry_count = count;
        Ok(())
    }

    /// Rewrite the first entry offset in place.
    pub fn write_back_first_entry_offset<W: Write + Seek>(
        &mut self,
        writer: &mut W,
        offset: u64,
    ) -> Result<()> {
        // All-ones is reserved for "unset"
        if offset >= self.bits_param.max_value() {
            return Err(ArchiveError::OffsetOverflow {
                value: offset,
                width: self.bits_param.width(),
            });
        }
        writer.seek(SeekFrom::Start(FIRST_ENTRY_OFFSET))?;
        write_sized(writer, self.bits_param, offset)?;
        self.first_entry_offset = Some(offset);
        Ok(())
    }

    fn write_first_entry_field<W: Write>(&self, writer: &mut W) -> Result<()> {
        let raw = self
            .first_entry_offset
            .unwrap_or_else(|| self.bits_param.max_value());
        write_sized(writer, self.bits_param, raw)
    }
}
