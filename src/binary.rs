//! Little-endian field I/O shared by the header, entry and backing store codecs.

use crate::error::{ArchiveError, Result};
use crate::types::{BitsParam, NameValue};
use std::io::{self, Read, Write};

pub fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read an integer whose width is fixed by the archive's bits param.
pub fn read_sized<R: Read>(reader: &mut R, bits: BitsParam) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes[..bits.width()])?;
    Ok(u64::from_le_bytes(bytes))
}

/// Write an integer at the archive's field width.
///
/// Fails with `OffsetOverflow` rather than truncating.
pub fn write_sized<W: Write>(writer: &mut W, bits: BitsParam, value: u64) -> Result<()> {
    let bytes = sized_bytes(bits, value)?;
    writer.write_all(&bytes[..bits.width()])?;
    Ok(())
}

fn sized_bytes(bits: BitsParam, value: u64) -> Result<[u8; 8]> {
    if value > bits.max_value() {
        return Err(ArchiveError::OffsetOverflow {
            value,
            width: bits.width(),
        });
    }
    Ok(value.to_le_bytes())
}

pub fn read_name_value<R: Read>(reader: &mut R) -> io::Result<NameValue> {
    let mut bytes = [0u8; 16];
    reader.read_exact(&mut bytes)?;
    Ok(NameValue::from_bytes(bytes))
}

pub fn write_name_value<W: Write>(writer: &mut W, value: NameValue) -> io::Result<()> {
    writer.write_all(&value.to_bytes())
}

/// Read bytes up to and including `flag`. Returns `None` if `capacity`
/// bytes are consumed without seeing it.
pub fn read_until_flag<R: Read>(
    reader: &mut R,
    flag: u8,
    capacity: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut out = Vec::with_capacity(capacity);
    while out.len() < capacity {
        let byte = read_u8(reader)?;
        out.push(byte);
        if byte == flag {
            return Ok(Some(out));
        }
    }
    Ok(None)
}

/// XOR of every byte, the backing store payload checksum.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Copy `reader` into `writer` through a scratch buffer of `buffer_size`
/// bytes, returning the number of bytes copied.
pub fn copy_buffered<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}

/// Writer adapter that counts bytes and keeps a running XOR checksum.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
    checksum: u8,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            count: 0,
            checksum: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        self.checksum ^= xor_checksum(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
