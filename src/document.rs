//! Document: one open archive file and its commit engine.
//!
//! Mutations only touch the in-memory item directory. `save` tidies the
//! pending histories, appends a backing store block and an entry, then
//! back-patches the previous entry's `next` and the header. `save_as` writes
//! a fresh single-entry file holding only the current content.

use crate::binary::{copy_buffered, CountingWriter};
use crate::codec;
use crate::error::{ArchiveError, Result};
use crate::format::entry::{self, EntryCompression, EntryInfo, EntryItem, ItemRecord};
use crate::format::{backing, Header, RecordFrame};
use crate::items::{History, HistoryState, Item, ItemDirectory, ItemSource};
use crate::types::{validate_item_path, BitsParam, Ecs, Operator};
use crate::views::{ViewConfig, ViewHandle, ViewId, ViewManager};
use fs2::FileExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for documents.
#[derive(Clone, Debug)]
pub struct DocumentConfig {
    /// Versions written into new headers.
    pub major_version: u8,
    pub minor_version: u8,

    /// Entry name table type written into new headers (0x00 or 0x08).
    pub name_table_type: u8,

    /// Fail on codec tags with no transform instead of passing them through.
    pub strict_codecs: bool,

    /// On open, stop at the last readable entry instead of failing.
    pub recover_partial_chain: bool,

    /// fsync after every save and save-as.
    pub sync_on_save: bool,

    /// Scratch buffer size for stream copies.
    pub copy_buffer_size: usize,

    /// Bytes an append fragment is decoded into memory before spilling to disk.
    pub spool_threshold: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            major_version: 1,
            minor_version: 0,
            name_table_type: 0x00,
            strict_codecs: false,
            recover_partial_chain: false,
            sync_on_save: true,
            copy_buffer_size: 64 * 1024,
            spool_threshold: 1024 * 1024,
        }
    }
}

/// One problem found by [`Document::verify`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyFailure {
    /// File offset of the entry or record at fault.
    pub position: u64,
    pub problem: String,
}

/// Result of [`Document::verify`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyReport {
    pub entries_checked: usize,
    pub records_checked: usize,
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, position: u64, problem: impl Into<String>) {
        self.failures.push(VerifyFailure {
            position,
            problem: problem.into(),
        });
    }
}

/// An open archive file.
pub struct Document {
    path: PathBuf,
    config: DocumentConfig,
    file: File,
    header: Header,
    entries: Vec<EntryInfo>,
    items: ItemDirectory,
    views: Arc<ViewManager>,
}

impl Document {
    /// Create (or truncate) an archive at `path`.
    ///
    /// Nothing is written until the first save.
    pub fn create(
        path: impl AsRef<Path>,
        bits_param: u8,
        config: DocumentConfig,
        views: Arc<ViewManager>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = Header::create(
            config.major_version,
            config.minor_version,
            config.name_table_type,
            bits_param,
        )?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        acquire_lock(&file)?;
        file.set_len(0)?;

        debug!(path = %path.display(), bits = header.bits_param.width(), "created document");

        Ok(Self {
            path,
            config,
            file,
            header,
            entries: Vec::new(),
            items: ItemDirectory::new(),
            views,
        })
    }

    /// Open an existing archive and replay its entry chain.
    pub fn open(
        path: impl AsRef<Path>,
        config: DocumentConfig,
        views: Arc<ViewManager>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ArchiveError::InvalidFilePath(path.clone()),
                _ => ArchiveError::Io(e),
            })?;
        acquire_lock(&file)?;

        let header = Header::parse(&mut file)?;
        let mut doc = Self {
            path,
            config,
            file,
            header,
            entries: Vec::new(),
            items: ItemDirectory::new(),
            views,
        };

        if doc.config.recover_partial_chain {
            doc.recover_chain();
        } else {
            doc.load_chain()?;
        }

        for path in doc.items.existing_paths() {
            doc.views.broadcast(&path, Operator::New);
        }
        Ok(doc)
    }

    /// Walk exactly `entry_count` entries; the last must end the chain.
    fn load_chain(&mut self) -> Result<()> {
        let expected = self.header.entry_count;
        let mut position = self.header.first_entry_offset;

        for index in 1..=expected {
            let pos = position.ok_or_else(|| {
                ArchiveError::Corruption(format!(
                    "chain ends after {} of {} entries",
                    index - 1,
                    expected
                ))
            })?;
            let info = self.load_entry(pos, index)?;

            position = if index == expected {
                if info.next != 0 {
                    return Err(ArchiveError::InvalidNextField(info.next));
                }
                None
            } else if info.next <= pos {
                return Err(ArchiveError::Corruption(format!(
                    "entry {} links back to {}",
                    index, info.next
                )));
            } else {
                Some(info.next)
            };
            self.entries.push(info);
        }
        Ok(())
    }

    /// Walk the chain by its `next` links while entries replay cleanly.
    fn recover_chain(&mut self) {
        let mut position = self.header.first_entry_offset;
        let mut index = 1u32;

        while let Some(pos) = position {
            match self.load_entry(pos, index) {
                Ok(info) => {
                    position = (info.next > pos).then_some(info.next);
                    self.entries.push(info);
                    index += 1;
                }
                Err(e) => {
                    warn!(index, position = pos, error = %e, "skipping unreadable tail of entry chain");
                    break;
                }
            }
        }

        let recovered = self.entries.len() as u32;
        if recovered != self.header.entry_count {
            warn!(
                header = self.header.entry_count,
                recovered, "entry count differs from readable chain"
            );
        }
        self.header.entry_count = recovered;
        if recovered == 0 {
            self.header.first_entry_offset = None;
        }
    }

    fn load_entry(&mut self, position: u64, index: u32) -> Result<EntryInfo> {
        let bits = self.header.bits_param;
        let parsed = entry::parse_entry(&mut self.file, bits, position, index)?;
        let bs_offset = parsed.info.bs_offset;
        backing::check_segment(&mut self.file, bs_offset)?;

        let mut items = Vec::with_capacity(parsed.items.len());
        for item in parsed.items {
            let mut histories = Vec::with_capacity(item.records.len());
            for record in item.records {
                let record_position = bs_offset.checked_add(record.offset).ok_or_else(|| {
                    ArchiveError::InvalidItemList(format!("offset {} overflows", record.offset))
                })?;
                let frame = match record.operator {
                    Operator::Delete => RecordFrame::placeholder(record_position),
                    _ => backing::read_frame(&mut self.file, bits, record_position)?,
                };
                histories.push(History::committed(index, record.operator, frame));
            }
            items.push((item.path, histories));
        }
        self.items.replay(items)?;

        debug!(
            index,
            position,
            items = parsed.info.name_count,
            "replayed entry"
        );
        Ok(parsed.info)
    }

    /// Release the file lock. Unsaved changes are discarded.
    ///
    /// Views receive DELETE for every path that existed, pending ones
    /// included, so a view kept across documents never holds stale paths.
    pub fn close(self) -> Result<()> {
        let pending = self.items.changed_paths().len();
        if pending > 0 {
            warn!(pending, path = %self.path.display(), "discarding unsaved changes");
        }
        for path in self.items.existing_paths() {
            self.views.broadcast(&path, Operator::Delete);
        }
        self.file.unlock()?;
        Ok(())
    }

    // --- Accessors ---

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    pub fn item(&self, path: &str) -> Option<&Item> {
        self.items.get(path)
    }

    /// Whether `path` logically exists. Malformed paths are an error
    /// rather than simply absent.
    pub fn has_item(&self, path: &str) -> Result<bool> {
        validate_item_path(path)?;
        Ok(self.items.has_item(path))
    }

    pub fn existing_paths(&self) -> BTreeSet<String> {
        self.items.existing_paths()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.items.changed_paths().is_empty()
    }

    /// Entry number the next save will create.
    fn generation(&self) -> u32 {
        self.header.entry_count + 1
    }

    // --- Mutations ---

    pub fn insert_item(&mut self, path: &str, source: ItemSource, ecs: Ecs) -> Result<()> {
        self.record(path, Operator::New, ecs, Some(source))?;
        self.views.broadcast(path, Operator::New);
        Ok(())
    }

    pub fn replace_item(&mut self, path: &str, source: ItemSource, ecs: Ecs) -> Result<()> {
        self.record(path, Operator::Replace, ecs, Some(source))
    }

    pub fn append_item(&mut self, path: &str, source: ItemSource, ecs: Ecs) -> Result<()> {
        self.record(path, Operator::Append, ecs, Some(source))
    }

    pub fn delete_item(&mut self, path: &str) -> Result<()> {
        self.record(path, Operator::Delete, Ecs::raw(), None)?;
        self.views.broadcast(path, Operator::Delete);
        Ok(())
    }

    fn record(
        &mut self,
        path: &str,
        operator: Operator,
        ecs: Ecs,
        source: Option<ItemSource>,
    ) -> Result<()> {
        validate_item_path(path)?;
        if self.config.strict_codecs {
            codec::check_ecs(&ecs, true)?;
        }
        let history = History::pending(self.generation(), operator, ecs, source);
        self.items.record(path, history)
    }

    // --- Commit ---

    /// Persist pending changes as a new entry. Returns `None` when tidying
    /// leaves nothing to write.
    pub fn save(
        &mut self,
        compress_name_table: bool,
        compress_item_list: bool,
    ) -> Result<Option<EntryInfo>> {
        // A saved file always carries a header, even with no entries
        if self.header.entry_count == 0 {
            self.header.write(&mut self.file)?;
        }

        let generation = self.generation();
        let scheduled = self.items.tidy(generation);
        if scheduled.is_empty() {
            self.items.clear_changed();
            if self.config.sync_on_save {
                self.file.sync_all()?;
            }
            debug!(generation, "nothing to save");
            return Ok(None);
        }

        let bits = self.header.bits_param;

        let bs_offset = backing::begin_segment(&mut self.file)?;
        let mut entry_items = Vec::with_capacity(scheduled.len());
        let mut written = Vec::new();

        for (path, start) in &scheduled {
            let item = self
                .items
                .get(path)
                .ok_or_else(|| ArchiveError::ItemNotFound(path.clone()))?;

            let mut records = Vec::new();
            for (index, history) in item.histories().iter().enumerate().skip(*start) {
                let frame = write_pending(&mut self.file, bits, history, &self.config)?;
                records.push(ItemRecord {
                    operator: history.operator,
                    offset: frame.position - bs_offset,
                });
                written.push((path.clone(), index, frame));
            }
            entry_items.push(EntryItem {
                path: path.clone(),
                records,
            });
        }

        let compression = EntryCompression::new(compress_name_table, compress_item_list);
        let info = entry::write_entry(
            &mut self.file,
            bits,
            generation,
            bs_offset,
            compression,
            &entry_items,
        )?;

        if let Some(last) = self.entries.last_mut() {
            entry::write_back_next(&mut self.file, bits, last.position, info.position)?;
            last.next = info.position;
        }
        if self.header.entry_count == 0 {
            self.header
                .write_back_first_entry_offset(&mut self.file, info.position)?;
        }
        self.header.write_back_entry_count(&mut self.file, generation)?;
        if self.config.sync_on_save {
            self.file.sync_all()?;
        }

        for (path, index, frame) in written {
            self.items.commit_history(&path, index, generation, frame);
        }
        self.items.clear_changed();
        self.entries.push(info.clone());

        info!(
            index = info.index,
            position = info.position,
            items = info.name_count,
            compress = info.compression.as_byte(),
            "saved entry"
        );
        Ok(Some(info))
    }

    /// Write the current content of every existing item into a new
    /// single-entry archive at `target`. This document is left as it was,
    /// pending changes included.
    pub fn save_as(
        &mut self,
        target: impl AsRef<Path>,
        bits_param: u8,
        compress_name_table: bool,
        compress_item_list: bool,
    ) -> Result<Option<EntryInfo>> {
        let target = target.as_ref();
        if same_file(&self.path, target) {
            return Err(ArchiveError::InvalidFilePath(target.to_path_buf()));
        }

        let mut header = Header::create(
            self.header.major_version,
            self.header.minor_version,
            self.header.name_table_type.as_byte(),
            bits_param,
        )?;
        let bits = header.bits_param;

        let mut dest = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(target)?;
        acquire_lock(&dest)?;
        dest.set_len(0)?;
        header.write(&mut dest)?;

        let bs_offset = backing::begin_segment(&mut dest)?;
        let mut entry_items = Vec::new();
        let source_bits = self.header.bits_param;

        for path in self.items.existing_paths() {
            let item = self
                .items
                .get(&path)
                .ok_or_else(|| ArchiveError::ItemNotFound(path.clone()))?;
            let start = item.content_start()?;

            let mut records = Vec::new();
            for (i, history) in item.histories()[start..].iter().enumerate() {
                let frame = match &history.state {
                    HistoryState::Committed(frame) => copy_committed(
                        &mut self.file,
                        source_bits,
                        frame,
                        &mut dest,
                        bits,
                        self.config.copy_buffer_size,
                    )?,
                    HistoryState::Pending(_) => write_pending(&mut dest, bits, history, &self.config)?,
                };
                // A fresh chain must introduce every path with NEW
                let operator = if i == 0 {
                    Operator::New
                } else {
                    Operator::Append
                };
                records.push(ItemRecord {
                    operator,
                    offset: frame.position - bs_offset,
                });
            }
            entry_items.push(EntryItem { path, records });
        }

        if entry_items.is_empty() {
            if self.config.sync_on_save {
                dest.sync_all()?;
            }
            info!(target = %target.display(), "saved empty archive copy");
            return Ok(None);
        }

        let compression = EntryCompression::new(compress_name_table, compress_item_list);
        let info = entry::write_entry(&mut dest, bits, 1, bs_offset, compression, &entry_items)?;
        header.write_back_first_entry_offset(&mut dest, info.position)?;
        header.write_back_entry_count(&mut dest, 1)?;
        if self.config.sync_on_save {
            dest.sync_all()?;
        }

        info!(
            target = %target.display(),
            position = info.position,
            items = info.name_count,
            bits = bits.width(),
            "saved archive copy"
        );
        Ok(Some(info))
    }

    // --- Extraction ---

    /// Write the current content of `path` into `dest`, decoding every
    /// fragment. Returns the number of bytes written.
    pub fn extract_item_stream<W: Write + ?Sized>(&mut self, path: &str, dest: &mut W) -> Result<u64> {
        validate_item_path(path)?;
        let item = self
            .items
            .get(path)
            .ok_or_else(|| ArchiveError::ItemNotFound(path.to_string()))?;
        let start = item.content_start()?;
        let fragments = &item.histories()[start..];
        let bits = self.header.bits_param;

        if let [only] = fragments {
            return write_decoded(&mut self.file, bits, only, dest, &self.config);
        }

        // Fragments may carry different chains, so each is decoded on its own
        let mut total = 0u64;
        for fragment in fragments {
            total += if fragment.ecs.is_raw() {
                write_decoded(&mut self.file, bits, fragment, dest, &self.config)?
            } else {
                let mut spool = tempfile::spooled_tempfile(self.config.spool_threshold);
                write_decoded(&mut self.file, bits, fragment, &mut spool, &self.config)?;
                spool.seek(SeekFrom::Start(0))?;
                copy_buffered(&mut spool, dest, self.config.copy_buffer_size)?
            };
        }
        Ok(total)
    }

    // --- Verification ---

    /// Re-read every entry and committed payload and check their digests
    /// and checksums. The file is not modified.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        let bits = self.header.bits_param;
        let mut report = VerifyReport::default();

        for info in &self.entries {
            report.entries_checked += 1;
            match entry::read_raw_entry(&mut self.file, bits, info.position, info.index) {
                Ok(raw) if raw.digest() != raw.info.checksum => report.fail(
                    info.position,
                    format!("entry {} digest mismatch", info.index),
                ),
                Ok(_) => {}
                Err(e) => report.fail(info.position, format!("entry {}: {}", info.index, e)),
            }
            if let Err(e) = backing::check_segment(&mut self.file, info.bs_offset) {
                report.fail(info.bs_offset, e.to_string());
            }
        }

        for item in self.items.items() {
            for history in item.histories() {
                let Some(frame) = history.frame() else {
                    continue;
                };
                if history.operator == Operator::Delete {
                    continue;
                }
                report.records_checked += 1;
                match payload_checksum(&mut self.file, bits, frame, self.config.copy_buffer_size) {
                    Ok((length, _)) if length != frame.length => report.fail(
                        frame.position,
                        format!("{}: payload truncated at {} of {} bytes", item.path(), length, frame.length),
                    ),
                    Ok((_, checksum)) if checksum != frame.checksum => report.fail(
                        frame.position,
                        format!("{}: payload checksum mismatch", item.path()),
                    ),
                    Ok(_) => {}
                    Err(e) => report.fail(frame.position, format!("{}: {}", item.path(), e)),
                }
            }
        }

        report.failures.sort_by_key(|f| f.position);
        Ok(report)
    }

    // --- Views ---

    /// Register a view; it first receives NEW for every existing path.
    pub fn register_view(&self, config: ViewConfig) -> ViewHandle {
        self.views.register(config, &self.items.existing_paths())
    }

    pub fn unregister_view(&self, id: ViewId) {
        self.views.unregister(id);
    }
}

fn acquire_lock(file: &File) -> Result<()> {
    file.try_lock_exclusive().map_err(|_| ArchiveError::Locked)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Append a pending history's record to `dest`, encoding its source.
fn write_pending(
    dest: &mut File,
    bits: BitsParam,
    history: &History,
    config: &DocumentConfig,
) -> Result<RecordFrame> {
    if history.operator == Operator::Delete {
        return backing::write_placeholder(dest, bits);
    }
    match &history.state {
        HistoryState::Pending(Some(source)) => {
            let mut encoded =
                codec::encode_reader(source.open()?, &history.ecs, config.strict_codecs)?;
            backing::write_record(dest, bits, &history.ecs, &mut encoded, config.copy_buffer_size)
        }
        HistoryState::Pending(None) => Err(ArchiveError::Corruption(format!(
            "pending {:?} has no content",
            history.operator
        ))),
        HistoryState::Committed(frame) => Err(ArchiveError::Corruption(format!(
            "record at {} is already committed",
            frame.position
        ))),
    }
}

/// Copy a committed record's stored bytes into `dest` without decoding.
fn copy_committed(
    origin: &mut File,
    origin_bits: BitsParam,
    frame: &RecordFrame,
    dest: &mut File,
    dest_bits: BitsParam,
    buffer_size: usize,
) -> Result<RecordFrame> {
    origin.seek(SeekFrom::Start(frame.payload_offset(origin_bits)))?;
    let mut stored = (&mut *origin).take(frame.length);
    let copied = backing::write_record(dest, dest_bits, &frame.ecs, &mut stored, buffer_size)?;
    if copied.length != frame.length {
        return Err(ArchiveError::Corruption(format!(
            "record at {} truncated at {} of {} bytes",
            frame.position, copied.length, frame.length
        )));
    }
    Ok(copied)
}

/// Write one history's original content into `dest`.
fn write_decoded<W: Write + ?Sized>(
    file: &mut File,
    bits: BitsParam,
    history: &History,
    dest: &mut W,
    config: &DocumentConfig,
) -> Result<u64> {
    match &history.state {
        HistoryState::Committed(frame) => {
            file.seek(SeekFrom::Start(frame.payload_offset(bits)))?;
            let mut stored = (&mut *file).take(frame.length);
            let mut decoder =
                codec::decode_writer(CountingWriter::new(dest), &frame.ecs, config.strict_codecs)?;
            copy_buffered(&mut stored, &mut decoder, config.copy_buffer_size)?;
            if stored.limit() > 0 {
                return Err(ArchiveError::Corruption(format!(
                    "record at {} is truncated",
                    frame.position
                )));
            }
            Ok(decoder.finish()?.count())
        }
        // Pending content is still in its original form
        HistoryState::Pending(Some(source)) => {
            Ok(copy_buffered(&mut source.open()?, dest, config.copy_buffer_size)?)
        }
        HistoryState::Pending(None) => Err(ArchiveError::CannotExtract(format!(
            "pending {:?} has no content",
            history.operator
        ))),
    }
}

/// Length and XOR checksum of a stored payload as it sits on disk.
fn payload_checksum(
    file: &mut File,
    bits: BitsParam,
    frame: &RecordFrame,
    buffer_size: usize,
) -> Result<(u64, u8)> {
    file.seek(SeekFrom::Start(frame.payload_offset(bits)))?;
    let mut stored = (&mut *file).take(frame.length);
    let mut counting = CountingWriter::new(io::sink());
    copy_buffered(&mut stored, &mut counting, buffer_size)?;
    Ok((counting.count(), counting.checksum()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn views() -> Arc<ViewManager> {
        Arc::new(ViewManager::new())
    }

    fn create(dir: &TempDir, bits: u8) -> Document {
        Document::create(dir.path().join("test.xda"), bits, DocumentConfig::default(), views())
            .unwrap()
    }

    fn reopen(doc: Document) -> Document {
        let path = doc.path().to_path_buf();
        doc.close().unwrap();
        Document::open(path, DocumentConfig::default(), views()).unwrap()
    }

    fn extract(doc: &mut Document, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        doc.extract_item_stream(path, &mut out).unwrap();
        out
    }

    fn bytes(data: &[u8]) -> ItemSource {
        ItemSource::bytes(data.to_vec())
    }

    /// Records of the last entry, read straight from disk.
    fn last_entry_records(doc: &mut Document) -> Vec<EntryItem> {
        let info = doc.entries().last().unwrap().clone();
        let bits = doc.header().bits_param;
        entry::parse_entry(&mut doc.file, bits, info.position, info.index)
            .unwrap()
            .items
    }

    // --- Save and Open ---

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\a.txt", bytes(b"hello"), Ecs::raw()).unwrap();

        let info = doc.save(false, false).unwrap().unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(doc.header().entry_count, 1);
        assert_eq!(doc.header().first_entry_offset, Some(info.position));

        let mut doc = reopen(doc);
        assert_eq!(doc.entries().len(), 1);
        assert_eq!(extract(&mut doc, "\\a.txt"), b"hello");
        assert_eq!(
            doc.existing_paths().into_iter().collect::<Vec<_>>(),
            vec!["\\a.txt"]
        );
    }

    #[test]
    fn test_empty_save_writes_header() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 2);
        assert_eq!(fs::metadata(doc.path()).unwrap().len(), 0);

        assert!(doc.save(true, true).unwrap().is_none());
        let header_len = doc.header().encoded_len();
        assert_eq!(fs::metadata(doc.path()).unwrap().len(), header_len);

        let doc = reopen(doc);
        assert_eq!(doc.header().entry_count, 0);
        assert_eq!(doc.header().first_entry_offset, None);
        assert_eq!(doc.header().bits_param, BitsParam::Two);
        assert!(doc.entries().is_empty());
    }

    #[test]
    fn test_net_zero_save_reopens_empty() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\a", bytes(b"gone"), Ecs::raw()).unwrap();
        doc.delete_item("\\a").unwrap();
        assert!(doc.save(false, false).unwrap().is_none());

        let mut doc = reopen(doc);
        assert!(doc.existing_paths().is_empty());

        // The first real entry still lands after the header
        doc.insert_item("\\b", bytes(b"kept"), Ecs::raw()).unwrap();
        let info = doc.save(false, false).unwrap().unwrap();
        let mut doc = reopen(doc);
        assert_eq!(doc.header().first_entry_offset, Some(info.position));
        assert_eq!(extract(&mut doc, "\\b"), b"kept");
    }

    #[test]
    fn test_chain_of_entries() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);

        doc.insert_item("\\a", bytes(b"one"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();
        doc.insert_item("\\b", bytes(b"two"), Ecs::deflate()).unwrap();
        doc.save(true, false).unwrap();
        doc.replace_item("\\a", bytes(b"three"), Ecs::raw()).unwrap();
        doc.delete_item("\\b").unwrap();
        doc.save(false, true).unwrap();

        let first_next = doc.entries()[0].next;
        assert_eq!(first_next, doc.entries()[1].position);

        let mut doc = reopen(doc);
        assert_eq!(doc.header().entry_count, 3);
        assert_eq!(doc.entries()[0].next, first_next);
        assert_eq!(doc.entries()[2].next, 0);
        assert_eq!(extract(&mut doc, "\\a"), b"three");
        assert!(!doc.has_item("\\b").unwrap());
        assert!(matches!(
            doc.extract_item_stream("\\b", &mut Vec::new()),
            Err(ArchiveError::CannotExtract(_))
        ));
    }

    #[test]
    fn test_append_across_saves_and_codecs() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 8);

        doc.insert_item("\\log", bytes(b"AAA"), Ecs::deflate()).unwrap();
        doc.save(false, false).unwrap();
        doc.append_item("\\log", bytes(b"BBB"), Ecs::raw()).unwrap();
        doc.append_item("\\log", bytes(b"CCC"), Ecs::deflate()).unwrap();

        // Pending fragments extract before saving
        assert_eq!(extract(&mut doc, "\\log"), b"AAABBBCCC");

        doc.save(false, false).unwrap();
        let records = last_entry_records(&mut doc);
        let ops: Vec<_> = records[0].records.iter().map(|r| r.operator).collect();
        assert_eq!(ops, vec![Operator::Append, Operator::Append]);

        let mut doc = reopen(doc);
        assert_eq!(extract(&mut doc, "\\log"), b"AAABBBCCC");
    }

    #[test]
    fn test_delete_then_insert_writes_single_new() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);

        doc.insert_item("\\p", bytes(b"first"), Ecs::raw()).unwrap();
        doc.delete_item("\\p").unwrap();
        doc.insert_item("\\p", bytes(b"second"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();

        let records = last_entry_records(&mut doc);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].records.len(), 1);
        assert_eq!(records[0].records[0].operator, Operator::New);
        assert_eq!(extract(&mut doc, "\\p"), b"second");
    }

    #[test]
    fn test_net_zero_churn_saves_nothing() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);

        doc.insert_item("\\tmp", bytes(b"x"), Ecs::raw()).unwrap();
        doc.delete_item("\\tmp").unwrap();
        assert!(doc.save(false, false).unwrap().is_none());
        assert!(doc.item("\\tmp").is_none());
        assert!(!doc.has_pending_changes());
    }

    #[test]
    fn test_replace_after_reopen_is_replace() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\r", bytes(b"v1"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();

        let mut doc = reopen(doc);
        doc.delete_item("\\r").unwrap();
        doc.insert_item("\\r", bytes(b"v2"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();

        let records = last_entry_records(&mut doc);
        assert_eq!(records[0].records[0].operator, Operator::Replace);

        let mut doc = reopen(doc);
        assert_eq!(extract(&mut doc, "\\r"), b"v2");
    }

    // --- Save As ---

    #[test]
    fn test_save_as_compacts() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);

        doc.insert_item("\\a", bytes(b"old"), Ecs::raw()).unwrap();
        doc.insert_item("\\gone", bytes(b"x"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();
        doc.replace_item("\\a", bytes(b"new"), Ecs::deflate()).unwrap();
        doc.append_item("\\a", bytes(b"+tail"), Ecs::raw()).unwrap();
        doc.delete_item("\\gone").unwrap();
        doc.save(false, false).unwrap();
        doc.insert_item("\\pending", bytes(b"unsaved"), Ecs::deflate()).unwrap();

        let target = dir.path().join("copy.xda");
        let info = doc.save_as(&target, 2, true, true).unwrap().unwrap();
        assert_eq!(info.index, 1);
        assert!(info.compression.name_table && info.compression.item_list);
        assert!(doc.has_pending_changes());

        let mut copy = Document::open(&target, DocumentConfig::default(), views()).unwrap();
        assert_eq!(copy.header().entry_count, 1);
        assert_eq!(copy.header().bits_param, BitsParam::Two);
        assert_eq!(copy.existing_paths(), doc.existing_paths());
        assert_eq!(extract(&mut copy, "\\a"), b"new+tail");
        assert_eq!(extract(&mut copy, "\\pending"), b"unsaved");
        assert_eq!(copy.item("\\a").unwrap().histories().len(), 2);
        assert!(copy.verify().unwrap().is_ok());
    }

    #[test]
    fn test_save_as_empty() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\a", bytes(b"x"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();
        doc.delete_item("\\a").unwrap();

        let target = dir.path().join("empty.xda");
        assert!(doc.save_as(&target, 4, false, false).unwrap().is_none());

        let copy = Document::open(&target, DocumentConfig::default(), views()).unwrap();
        assert_eq!(copy.header().entry_count, 0);
        assert_eq!(copy.header().first_entry_offset, None);
        assert!(copy.existing_paths().is_empty());
    }

    #[test]
    fn test_save_as_onto_itself() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        let path = doc.path().to_path_buf();
        assert!(matches!(
            doc.save_as(&path, 4, false, false),
            Err(ArchiveError::InvalidFilePath(_))
        ));
    }

    // --- Verification ---

    #[test]
    fn test_verify_detects_payload_damage() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\a", bytes(b"pristine payload"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();

        let report = doc.verify().unwrap();
        assert!(report.is_ok());
        assert_eq!(report.entries_checked, 1);
        assert_eq!(report.records_checked, 1);

        let frame = doc.item("\\a").unwrap().histories()[0].frame().unwrap().clone();
        let offset = frame.payload_offset(BitsParam::Four);
        doc.file.seek(SeekFrom::Start(offset)).unwrap();
        doc.file.write_all(b"P").unwrap();

        let report = doc.verify().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].position, frame.position);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records_checked"], 1);
    }

    // --- Locking and Views ---

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\a", bytes(b"x"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();

        let second = Document::open(doc.path(), DocumentConfig::default(), views());
        assert!(matches!(second, Err(ArchiveError::Locked)));

        let path = doc.path().to_path_buf();
        doc.close().unwrap();
        assert!(Document::open(path, DocumentConfig::default(), views()).is_ok());
    }

    #[test]
    fn test_open_broadcasts_existing_paths() {
        let dir = TempDir::new().unwrap();
        let mut doc = create(&dir, 4);
        doc.insert_item("\\a", bytes(b"x"), Ecs::raw()).unwrap();
        doc.insert_item("\\b", bytes(b"y"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();
        let path = doc.path().to_path_buf();
        doc.close().unwrap();

        let manager = views();
        let handle = manager.register(ViewConfig::default(), &Vec::new());
        let _doc = Document::open(&path, DocumentConfig::default(), Arc::clone(&manager)).unwrap();

        let events = handle.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            crate::views::ViewEvent::Item { path, operator: Operator::New } if path == "\\a"
        ));
    }

    #[test]
    fn test_close_broadcasts_deletes() {
        let dir = TempDir::new().unwrap();
        let manager = views();
        let mut doc = Document::create(
            dir.path().join("a.xda"),
            4,
            DocumentConfig::default(),
            Arc::clone(&manager),
        )
        .unwrap();
        doc.insert_item("\\saved", bytes(b"x"), Ecs::raw()).unwrap();
        doc.save(false, false).unwrap();
        doc.insert_item("\\pending", bytes(b"y"), Ecs::raw()).unwrap();

        let handle = doc.register_view(ViewConfig::default());
        handle.drain();
        doc.close().unwrap();

        let deleted: Vec<String> = handle
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                crate::views::ViewEvent::Item {
                    path,
                    operator: Operator::Delete,
                } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec!["\\pending", "\\saved"]);
    }

    #[test]
    fn test_strict_codecs_reject_unknown_tag() {
        let dir = TempDir::new().unwrap();
        let config = DocumentConfig {
            strict_codecs: true,
            ..Default::default()
        };
        let mut doc = Document::create(dir.path().join("s.xda"), 4, config, views()).unwrap();
        let ecs = Ecs::new(vec![0x10, 0xff]).unwrap();
        assert!(matches!(
            doc.insert_item("\\a", bytes(b"x"), ecs),
            Err(ArchiveError::UnknownCodec(0x10))
        ));
        assert!(doc.item("\\a").is_none());
    }
}
