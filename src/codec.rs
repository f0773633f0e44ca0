//! Codec chains for stored payloads.
//!
//! An encoding chain spec lists codec tags outermost first. Encoding wraps
//! the source from the last tag back to the first, so the first tag is the
//! transform applied last; decoding peels them off in the same order.

use crate::binary::copy_buffered;
use crate::error::{ArchiveError, Result};
use crate::types::Ecs;
use flate2::Compression;
use std::io::{self, Read, Write};
use tracing::warn;

/// zlib-wrapped deflate.
pub const DEFLATE_TAG: u8 = 0x02;

/// Whether a codec tag has a transform behind it.
pub fn is_known_tag(tag: u8) -> bool {
    tag == DEFLATE_TAG
}

/// Reject or report tags with no transform. In lenient mode those tags are
/// passed through untouched.
pub fn check_ecs(ecs: &Ecs, strict: bool) -> Result<()> {
    for &tag in ecs.tags() {
        if is_known_tag(tag) {
            continue;
        }
        if strict {
            return Err(ArchiveError::UnknownCodec(tag));
        }
        warn!("passing unknown codec tag {:#04x} through", tag);
    }
    Ok(())
}

/// A source read through zero or more encoders.
pub enum Encoded<R: Read> {
    Plain(R),
    Deflate(Box<flate2::read::ZlibEncoder<Encoded<R>>>),
}

impl<R: Read> Read for Encoded<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Encoded::Plain(inner) => inner.read(buf),
            Encoded::Deflate(inner) => inner.read(buf),
        }
    }
}

/// Wrap `source` so that reading it yields the stored form described by `ecs`.
pub fn encode_reader<R: Read>(source: R, ecs: &Ecs, strict: bool) -> Result<Encoded<R>> {
    check_ecs(ecs, strict)?;
    let mut chain = Encoded::Plain(source);
    for &tag in ecs.tags().iter().rev() {
        if tag == DEFLATE_TAG {
            chain = Encoded::Deflate(Box::new(flate2::read::ZlibEncoder::new(
                chain,
                Compression::default(),
            )));
        }
    }
    Ok(chain)
}

/// A destination written through zero or more decoders.
pub enum Decoded<W: Write> {
    Plain(W),
    Inflate(Box<flate2::write::ZlibDecoder<Decoded<W>>>),
}

impl<W: Write> Decoded<W> {
    /// Flush every decoder in the chain and hand back the destination.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Decoded::Plain(inner) => Ok(inner),
            Decoded::Inflate(decoder) => (*decoder).finish()?.finish(),
        }
    }
}

impl<W: Write> Write for Decoded<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Decoded::Plain(inner) => inner.write(buf),
            Decoded::Inflate(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Decoded::Plain(inner) => inner.flush(),
            Decoded::Inflate(inner) => inner.flush(),
        }
    }
}

/// Wrap `dest` so that writing stored bytes into it yields the original content.
pub fn decode_writer<W: Write>(dest: W, ecs: &Ecs, strict: bool) -> Result<Decoded<W>> {
    check_ecs(ecs, strict)?;
    let mut chain = Decoded::Plain(dest);
    for &tag in ecs.tags().iter().rev() {
        if tag == DEFLATE_TAG {
            chain = Decoded::Inflate(Box::new(flate2::write::ZlibDecoder::new(chain)));
        }
    }
    Ok(chain)
}

/// Deflate a whole buffer, used for compressed name tables and item lists.
pub fn deflate_bytes(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn inflate_bytes(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Decode a complete stored payload held in memory.
pub fn decode_bytes(stored: &[u8], ecs: &Ecs, strict: bool, buffer_size: usize) -> Result<Vec<u8>> {
    let mut decoder = decode_writer(Vec::new(), ecs, strict)?;
    copy_buffered(&mut io::Cursor::new(stored), &mut decoder, buffer_size)?;
    Ok(decoder.finish()?)
}
