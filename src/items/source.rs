//! Content sources for pending histories.

use crate::error::{ArchiveError, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Where a pending history's content will be read from at save time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemSource {
    /// A file on disk, read when the history is persisted.
    File(PathBuf),
    /// An in-memory buffer.
    Buffer(Vec<u8>),
}

impl ItemSource {
    /// Reference a file. It must exist and must not be a directory.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(ItemSource::File(path.to_path_buf())),
            _ => Err(ArchiveError::InvalidFilePath(path.to_path_buf())),
        }
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        ItemSource::Buffer(data.into())
    }

    /// Open a fresh reader over the content.
    pub fn open(&self) -> Result<SourceReader<'_>> {
        match self {
            ItemSource::File(path) => {
                let file = File::open(path)
                    .map_err(|_| ArchiveError::InvalidFilePath(path.clone()))?;
                Ok(SourceReader::File(BufReader::new(file)))
            }
            ItemSource::Buffer(data) => Ok(SourceReader::Buffer(data.as_slice())),
        }
    }
}

impl From<Vec<u8>> for ItemSource {
    fn from(data: Vec<u8>) -> Self {
        ItemSource::Buffer(data)
    }
}

impl From<&[u8]> for ItemSource {
    fn from(data: &[u8]) -> Self {
        ItemSource::Buffer(data.to_vec())
    }
}

pub enum SourceReader<'a> {
    File(BufReader<File>),
    Buffer(&'a [u8]),
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::File(reader) => reader.read(buf),
            SourceReader::Buffer(slice) => slice.read(buf),
        }
    }
}
