//! Core types for the archive format.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Low nibble of an item-list operator byte.
pub const OPERATOR_MASK: u8 = 0x0f;

/// Operator byte of the item-list end sentinel.
pub const OPERATOR_END: u8 = 0x0f;

/// Terminator of every encoding chain spec.
pub const ECS_END_FLAG: u8 = 0xff;

/// Longest encoding chain spec accepted, terminator included.
pub const ECS_CAPACITY: usize = 16;

/// Longest item path in bytes, not counting the NUL terminator on disk.
pub const MAX_PATH_BYTES: usize = 255;

/// A recorded mutation against an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    New,
    Append,
    Replace,
    Delete,
}

impl Operator {
    /// Decode an operator byte. Only the low nibble is significant.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & OPERATOR_MASK {
            0x01 => Some(Operator::New),
            0x02 => Some(Operator::Append),
            0x03 => Some(Operator::Replace),
            0x04 => Some(Operator::Delete),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Operator::New => 0x01,
            Operator::Append => 0x02,
            Operator::Replace => 0x03,
            Operator::Delete => 0x04,
        }
    }

    /// Whether `next` may be recorded directly after `self` in a history.
    ///
    /// DELETE may only be followed by NEW, and NEW may not follow NEW.
    pub fn may_precede(self, next: Operator) -> bool {
        !matches!(
            (self, next),
            (Operator::Delete, Operator::Append)
                | (Operator::Delete, Operator::Replace)
                | (Operator::Delete, Operator::Delete)
                | (Operator::New, Operator::New)
        )
    }
}

/// Width in bytes of every offset and length field in one archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitsParam {
    Two,
    Four,
    Eight,
}

impl BitsParam {
    /// Decode a bits param byte. 0x00 is the legacy spelling of 2.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 | 0x02 => Ok(BitsParam::Two),
            0x04 => Ok(BitsParam::Four),
            0x08 => Ok(BitsParam::Eight),
            other => Err(ArchiveError::InvalidBitsParam(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        self.width() as u8
    }

    pub fn width(self) -> usize {
        match self {
            BitsParam::Two => 2,
            BitsParam::Four => 4,
            BitsParam::Eight => 8,
        }
    }

    /// Largest value a field of this width can hold.
    pub fn max_value(self) -> u64 {
        match self {
            BitsParam::Two => u16::MAX as u64,
            BitsParam::Four => u32::MAX as u64,
            BitsParam::Eight => u64::MAX,
        }
    }
}

impl Default for BitsParam {
    fn default() -> Self {
        BitsParam::Four
    }
}

/// Entry name table type recorded in the header (0x00 or 0x08).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameTableType(u8);

impl NameTableType {
    pub fn new(byte: u8) -> Result<Self> {
        match byte {
            0x00 | 0x08 => Ok(NameTableType(byte)),
            other => Err(ArchiveError::InvalidNameTableType(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }
}

impl Default for NameTableType {
    fn default() -> Self {
        NameTableType(0x00)
    }
}

/// Identifier linking a name table row to its item-list records within one entry.
///
/// Stored on disk as the byte reverse of its little-endian encoding, i.e.
/// big-endian. The per-save counter occupies the leading four stored bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameValue(pub u128);

impl NameValue {
    /// Name value of the item-list end sentinel (0x7f then fifteen 0xff).
    pub const END: NameValue = NameValue(u128::MAX >> 1);

    pub fn from_counter(counter: u32) -> Self {
        NameValue((counter as u128) << 96)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NameValue(u128::from_be_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for NameValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameValue({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for NameValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

/// Encoding chain spec: codec tags followed by the 0xff terminator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ecs(Vec<u8>);

impl Ecs {
    /// Validate a caller-supplied chain. The terminator must be the last
    /// byte and may not appear anywhere else.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        match bytes.iter().position(|b| *b == ECS_END_FLAG) {
            None => Err(ArchiveError::InvalidEcs("missing 0xff terminator".into())),
            Some(pos) if pos + 1 != bytes.len() => Err(ArchiveError::InvalidEcs(format!(
                "terminator at {} of {} bytes",
                pos,
                bytes.len()
            ))),
            Some(_) if bytes.len() > ECS_CAPACITY => Err(ArchiveError::InvalidEcs(format!(
                "{} bytes exceeds capacity of {}",
                bytes.len(),
                ECS_CAPACITY
            ))),
            Some(_) => Ok(Ecs(bytes)),
        }
    }

    /// Payload stored as-is.
    pub fn raw() -> Self {
        Ecs(vec![ECS_END_FLAG])
    }

    /// Payload deflated once.
    pub fn deflate() -> Self {
        Ecs(vec![crate::codec::DEFLATE_TAG, ECS_END_FLAG])
    }

    /// Codec tags without the terminator, outermost first.
    pub fn tags(&self) -> &[u8] {
        &self.0[..self.0.len() - 1]
    }

    pub fn is_raw(&self) -> bool {
        self.tags().is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for Ecs {
    fn default() -> Self {
        Ecs::raw()
    }
}

impl fmt::Debug for Ecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ecs({})", hex::encode(&self.0))
    }
}

/// MD5 digest over an entry's name table and item list bytes.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryDigest(pub [u8; 16]);

impl EntryDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for EntryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryDigest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for EntryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Check an item path: one or more `\segment` (or `/segment`) groups whose
/// segments are non-empty and free of reserved characters.
pub fn validate_item_path(path: &str) -> Result<()> {
    let invalid = || ArchiveError::InvalidPath(path.to_string());

    if path.is_empty() || path.len() > MAX_PATH_BYTES {
        return Err(invalid());
    }

    let mut chars = path.chars();
    match chars.next() {
        Some('\\') | Some('/') => {}
        _ => return Err(invalid()),
    }

    let mut segment_len = 0usize;
    for c in chars {
        match c {
            '\\' | '/' => {
                if segment_len == 0 {
                    return Err(invalid());
                }
                segment_len = 0;
            }
            '\t' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => return Err(invalid()),
            _ => segment_len += 1,
        }
    }

    if segment_len == 0 {
        return Err(invalid());
    }
    Ok(())
}
