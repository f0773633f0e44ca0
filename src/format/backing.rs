//! Backing store blocks: framed payload records owned by one entry.
//!
//! A block starts with `C.BS`; each record is
//! `checksum:u8 | length:bits | ecs..0xff | payload`.

use crate::binary::{copy_buffered, read_sized, read_u8, read_until_flag, write_sized, CountingWriter};
use crate::error::{ArchiveError, Result};
use crate::types::{BitsParam, Ecs, ECS_CAPACITY, ECS_END_FLAG};
use std::io::{Read, Seek, SeekFrom, Write};

/// Class tag opening every backing store block.
pub const BS_CLASS_TYPE: &[u8; 4] = b"C.BS";

/// Location and framing of one stored payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFrame {
    /// Absolute offset of the checksum byte.
    pub position: u64,
    /// Stored payload length.
    pub length: u64,
    pub checksum: u8,
    pub ecs: Ecs,
}

impl RecordFrame {
    /// Frame of a DELETE record, which carries no payload.
    pub fn placeholder(position: u64) -> Self {
        Self {
            position,
            length: 0,
            checksum: 0,
            ecs: Ecs::raw(),
        }
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self, bits: BitsParam) -> u64 {
        self.position + 1 + bits.width() as u64 + self.ecs.len() as u64
    }
}

/// Open a new block at the end of the file. Returns its offset.
pub fn begin_segment<W: Write + Seek>(writer: &mut W) -> Result<u64> {
    let offset = writer.seek(SeekFrom::End(0))?;
    writer.write_all(BS_CLASS_TYPE)?;
    Ok(offset)
}

/// Check that a block tag sits at `offset`.
pub fn check_segment<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut tag = [0u8; 4];
    reader.read_exact(&mut tag)?;
    if &tag != BS_CLASS_TYPE {
        return Err(ArchiveError::InvalidBackingStoreClassType(offset));
    }
    Ok(())
}

/// Append one record whose payload is read from `stored`, which must already
/// be in the form `ecs` describes.
///
/// The checksum and length are written as zeros first and backfilled once
/// the payload has been copied.
pub fn write_record<W, R>(
    writer: &mut W,
    bits: BitsParam,
    ecs: &Ecs,
    stored: &mut R,
    buffer_size: usize,
) -> Result<RecordFrame>
where
    W: Write + Seek,
    R: Read + ?Sized,
{
    let position = writer.seek(SeekFrom::End(0))?;
    writer.write_all(&[0u8])?;
    write_sized(writer, bits, 0)?;
    writer.write_all(ecs.as_bytes())?;

    let mut counting = CountingWriter::new(&mut *writer);
    copy_buffered(stored, &mut counting, buffer_size)?;
    let length = counting.count();
    let checksum = counting.checksum();

    writer.seek(SeekFrom::Start(position))?;
    writer.write_all(&[checksum])?;
    write_sized(writer, bits, length)?;
    writer.seek(SeekFrom::End(0))?;

    Ok(RecordFrame {
        position,
        length,
        checksum,
        ecs: ecs.clone(),
    })
}

/// Append the empty record written for a DELETE.
pub fn write_placeholder<W: Write + Seek>(writer: &mut W, bits: BitsParam) -> Result<RecordFrame> {
    let position = writer.seek(SeekFrom::End(0))?;
    writer.write_all(&[0u8])?;
    write_sized(writer, bits, 0)?;
    writer.write_all(&[ECS_END_FLAG])?;
    Ok(RecordFrame::placeholder(position))
}

/// Read the framing of the record at `position`, leaving the reader at the
/// first payload byte.
pub fn read_frame<R: Read + Seek>(reader: &mut R, bits: BitsParam, position: u64) -> Result<RecordFrame> {
    reader.seek(SeekFrom::Start(position))?;
    let checksum = read_u8(reader)?;
    let length = read_sized(reader, bits)?;
    let ecs = match read_until_flag(reader, ECS_END_FLAG, ECS_CAPACITY)? {
        Some(bytes) => Ecs::new(bytes)?,
        None => {
            return Err(ArchiveError::InvalidEcs(format!(
                "no terminator within {} bytes at offset {}",
                ECS_CAPACITY, position
            )))
        }
    };

    Ok(RecordFrame {
        position,
        length,
        checksum,
        ecs,
    })
}
