//! Archive: the programmatic surface over at most one open document.

use crate::document::{Document, DocumentConfig, VerifyReport};
use crate::error::{ArchiveError, Result};
use crate::format::{EntryInfo, Header};
use crate::items::ItemSource;
use crate::types::{BitsParam, Ecs};
use crate::views::{ViewConfig, ViewHandle, ViewId, ViewManager};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Bits param used by [`Archive::create_default`].
pub const DEFAULT_BITS_PARAM: u8 = 4;

/// Holds the open document, if any, and the views that outlive it.
pub struct Archive {
    config: DocumentConfig,
    document: Option<Document>,
    views: Arc<ViewManager>,
}

impl Archive {
    pub fn new() -> Self {
        Self::with_config(DocumentConfig::default())
    }

    pub fn with_config(config: DocumentConfig) -> Self {
        Self {
            config,
            document: None,
            views: Arc::new(ViewManager::new()),
        }
    }

    fn doc(&self) -> Result<&Document> {
        self.document.as_ref().ok_or(ArchiveError::NoDocument)
    }

    fn doc_mut(&mut self) -> Result<&mut Document> {
        self.document.as_mut().ok_or(ArchiveError::NoDocument)
    }

    fn header(&self) -> Result<&Header> {
        self.document
            .as_ref()
            .map(Document::header)
            .ok_or(ArchiveError::NotInitialized("header"))
    }

    // --- Lifecycle ---

    /// Create a new archive file, closing any open one first.
    pub fn create(&mut self, path: impl AsRef<Path>, bits_param: u8) -> Result<()> {
        self.close()?;
        let doc = Document::create(path, bits_param, self.config.clone(), Arc::clone(&self.views))?;
        self.document = Some(doc);
        Ok(())
    }

    pub fn create_default(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.create(path, DEFAULT_BITS_PARAM)
    }

    /// Open an archive file, closing any open one first.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.close()?;
        let doc = Document::open(path, self.config.clone(), Arc::clone(&self.views))?;
        self.document = Some(doc);
        Ok(())
    }

    /// Close the open document, discarding unsaved changes. Closing with
    /// nothing open is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.document.take() {
            Some(doc) => doc.close(),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    // --- Mutations ---

    pub fn insert_item(&mut self, path: &str, source: impl Into<ItemSource>, ecs: Ecs) -> Result<()> {
        self.doc_mut()?.insert_item(path, source.into(), ecs)
    }

    pub fn replace_item(&mut self, path: &str, source: impl Into<ItemSource>, ecs: Ecs) -> Result<()> {
        self.doc_mut()?.replace_item(path, source.into(), ecs)
    }

    pub fn append_item(&mut self, path: &str, source: impl Into<ItemSource>, ecs: Ecs) -> Result<()> {
        self.doc_mut()?.append_item(path, source.into(), ecs)
    }

    pub fn delete_item(&mut self, path: &str) -> Result<()> {
        self.doc_mut()?.delete_item(path)
    }

    // --- Commit ---

    pub fn save(&mut self, compress_name_table: bool, compress_item_list: bool) -> Result<Option<EntryInfo>> {
        self.doc_mut()?.save(compress_name_table, compress_item_list)
    }

    /// Save with both tables compressed.
    pub fn save_default(&mut self) -> Result<Option<EntryInfo>> {
        self.save(true, true)
    }

    pub fn save_as(
        &mut self,
        path: impl AsRef<Path>,
        bits_param: u8,
        compress_name_table: bool,
        compress_item_list: bool,
    ) -> Result<Option<EntryInfo>> {
        self.doc_mut()?
            .save_as(path, bits_param, compress_name_table, compress_item_list)
    }

    // --- Reads ---

    pub fn extract_item_stream<W: Write + ?Sized>(&mut self, path: &str, dest: &mut W) -> Result<u64> {
        self.doc_mut()?.extract_item_stream(path, dest)
    }

    /// Current content of `path` in memory.
    pub fn extract(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.extract_item_stream(path, &mut out)?;
        Ok(out)
    }

    pub fn all_logically_existing_paths(&self) -> Result<BTreeSet<String>> {
        Ok(self.doc()?.existing_paths())
    }

    pub fn has_item(&self, path: &str) -> Result<bool> {
        self.doc()?.has_item(path)
    }

    pub fn entries(&self) -> Result<&[EntryInfo]> {
        Ok(self.doc()?.entries())
    }

    pub fn verify(&mut self) -> Result<VerifyReport> {
        self.doc_mut()?.verify()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    // --- Header ---

    pub fn major_version(&self) -> Result<u8> {
        Ok(self.header()?.major_version)
    }

    pub fn minor_version(&self) -> Result<u8> {
        Ok(self.header()?.minor_version)
    }

    pub fn bits_param(&self) -> Result<BitsParam> {
        Ok(self.header()?.bits_param)
    }

    pub fn entry_count(&self) -> Result<u32> {
        Ok(self.header()?.entry_count)
    }

    // --- Views ---

    /// Register a view. With a document open it first receives NEW for
    /// every existing path; either way it then receives `CaughtUp`.
    pub fn register_view(&self, config: ViewConfig) -> ViewHandle {
        match &self.document {
            Some(doc) => doc.register_view(config),
            None => self.views.register(config, &BTreeSet::new()),
        }
    }

    pub fn unregister_view(&self, id: ViewId) {
        self.views.unregister(id);
    }
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}
