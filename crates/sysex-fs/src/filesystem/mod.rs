//! Filesystem view of device storage.
//!
//! Each dialect exposes one [`FsOperations`] table per storage area (presets,
//! samples, programs...). Tables are immutable statics bound to the backend by
//! the handshake. Callers go through the helpers in [`operations`], which
//! resolve `/<fs-name>/<id>[:<name>]` paths to a table and check that the
//! operation is supported before calling it.

pub mod operations;
pub mod path;

pub use operations::{
    clear, copy, delete, download, download_path, info, item_path, list, list_sorted, mkdir, move_item, rename, swap,
    upload, upload_path,
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::backend::Backend;
use crate::errors::BackendError;
use crate::job_control::JobControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    File,
    Directory,
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: u32,
    pub name: String,
    pub kind: ItemKind,
    /// Size in bytes, `None` when the device does not report it.
    pub size: Option<u64>,
}

impl Item {
    pub fn file(id: u32, name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ItemKind::File,
            size,
        }
    }

    pub fn directory(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ItemKind::Directory,
            size: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }
}

/// Lazy, forward-only listing of one directory.
///
/// Borrows the backend it came from, so it cannot outlive the connection.
pub struct ItemIterator<'a> {
    inner: Box<dyn Iterator<Item = Item> + Send + 'a>,
}

impl<'a> ItemIterator<'a> {
    pub fn new(iter: impl Iterator<Item = Item> + Send + 'a) -> Self {
        Self { inner: Box::new(iter) }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }
}

impl Iterator for ItemIterator<'_> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        self.inner.next()
    }
}

impl fmt::Debug for ItemIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemIterator").finish_non_exhaustive()
    }
}

bitflags! {
    /// Behavior flags of a filesystem table.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FsOptions: u32 {
        /// Transfers are a single exchange, progress jumps from 0 to 1.
        const SINGLE_OP = 1;
        /// Items live in numbered slots: paths carry ids, not names.
        const SLOT_STORAGE = 1 << 1;
        /// Listings must be sorted by id.
        const SORT_BY_ID = 1 << 2;
        /// Listings must be sorted by name.
        const SORT_BY_NAME = 1 << 3;
    }
}

bitflags! {
    /// Operations a filesystem table implements.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FsCapabilities: u32 {
        const LIST = 1;
        const DOWNLOAD = 1 << 1;
        const UPLOAD = 1 << 2;
        const RENAME = 1 << 3;
        const MOVE = 1 << 4;
        const COPY = 1 << 5;
        const SWAP = 1 << 6;
        const DELETE = 1 << 7;
        const MKDIR = 1 << 8;
        const CLEAR = 1 << 9;
    }
}

/// Named filesystem operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FsOperation {
    List,
    Download,
    Upload,
    Rename,
    Move,
    Copy,
    Swap,
    Delete,
    Mkdir,
    Clear,
}

impl FsOperation {
    pub const ALL: [FsOperation; 10] = [
        Self::List,
        Self::Download,
        Self::Upload,
        Self::Rename,
        Self::Move,
        Self::Copy,
        Self::Swap,
        Self::Delete,
        Self::Mkdir,
        Self::Clear,
    ];

    /// Accepts command names and their short aliases ("ls", "dl", "mv"...).
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "ls" | "list" => Self::List,
            "dl" | "download" => Self::Download,
            "ul" | "upload" => Self::Upload,
            "rename" => Self::Rename,
            "mv" | "move" => Self::Move,
            "cp" | "copy" => Self::Copy,
            "sw" | "swap" => Self::Swap,
            "rm" | "rmdir" | "delete" => Self::Delete,
            "mkdir" => Self::Mkdir,
            "cl" | "clear" => Self::Clear,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Swap => "swap",
            Self::Delete => "delete",
            Self::Mkdir => "mkdir",
            Self::Clear => "clear",
        }
    }

    pub fn capability(self) -> FsCapabilities {
        match self {
            Self::List => FsCapabilities::LIST,
            Self::Download => FsCapabilities::DOWNLOAD,
            Self::Upload => FsCapabilities::UPLOAD,
            Self::Rename => FsCapabilities::RENAME,
            Self::Move => FsCapabilities::MOVE,
            Self::Copy => FsCapabilities::COPY,
            Self::Swap => FsCapabilities::SWAP,
            Self::Delete => FsCapabilities::DELETE,
            Self::Mkdir => FsCapabilities::MKDIR,
            Self::Clear => FsCapabilities::CLEAR,
        }
    }
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations on one filesystem of one dialect.
///
/// Paths handed to the table are relative to the filesystem root: `/` for the
/// root directory, `/12:Lead` for an item. Dialect state is reached through
/// [`Backend::data`].
pub trait FsOperations: Sync {
    /// Filesystem id bit, unique within the dialect.
    fn id(&self) -> u32;

    /// Path segment, for example "preset".
    fn name(&self) -> &'static str;

    /// Label for presentation layers, for example "Presets".
    fn gui_name(&self) -> &'static str;

    /// File extension of downloaded items, without the dot.
    fn extension(&self) -> &'static str;

    fn max_name_len(&self) -> usize;

    fn options(&self) -> FsOptions;

    fn capabilities(&self) -> FsCapabilities;

    // ========================================
    // Required: every filesystem can be listed
    // ========================================

    /// Lists a directory. `NotADirectory` when `dir` is not one.
    fn read_dir<'a>(&self, backend: &'a Backend, dir: &str) -> Result<ItemIterator<'a>, BackendError>;

    // ========================================
    // Optional: default to NotSupported
    // ========================================

    fn download(&self, backend: &Backend, path: &str, job: &JobControl) -> Result<Vec<u8>, BackendError> {
        let _ = (backend, path, job);
        Err(BackendError::not_supported(FsOperation::Download.name()))
    }

    fn upload(&self, backend: &Backend, path: &str, data: &[u8], job: &JobControl) -> Result<(), BackendError> {
        let _ = (backend, path, data, job);
        Err(BackendError::not_supported(FsOperation::Upload.name()))
    }

    fn rename(&self, backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
        let _ = (backend, src, dst);
        Err(BackendError::not_supported(FsOperation::Rename.name()))
    }

    fn move_item(&self, backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
        let _ = (backend, src, dst);
        Err(BackendError::not_supported(FsOperation::Move.name()))
    }

    fn copy(&self, backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
        let _ = (backend, src, dst);
        Err(BackendError::not_supported(FsOperation::Copy.name()))
    }

    fn swap(&self, backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
        let _ = (backend, src, dst);
        Err(BackendError::not_supported(FsOperation::Swap.name()))
    }

    fn delete(&self, backend: &Backend, path: &str) -> Result<(), BackendError> {
        let _ = (backend, path);
        Err(BackendError::not_supported(FsOperation::Delete.name()))
    }

    fn mkdir(&self, backend: &Backend, path: &str) -> Result<(), BackendError> {
        let _ = (backend, path);
        Err(BackendError::not_supported(FsOperation::Mkdir.name()))
    }

    fn clear(&self, backend: &Backend, path: &str) -> Result<(), BackendError> {
        let _ = (backend, path);
        Err(BackendError::not_supported(FsOperation::Clear.name()))
    }

    // ========================================
    // Paths and local files
    // ========================================

    /// Device-specific slot label, for example "[3:1]".
    fn slot(&self, backend: &Backend, item: &Item) -> Option<String> {
        let _ = (backend, item);
        None
    }

    /// Destination path on the device for a local file.
    fn upload_path(&self, backend: &Backend, dst_dir: &str, local_name: &str, next_index: &mut u32) -> String {
        let _ = backend;
        path::upload_path(self.options(), dst_dir, local_name, next_index)
    }

    /// Local path for a downloaded item, looked up in `items` by the id in `src_path`.
    fn download_path(
        &self,
        backend: &Backend,
        items: ItemIterator<'_>,
        dst_dir: &Path,
        src_path: &str,
    ) -> Result<PathBuf, BackendError> {
        let _ = backend;
        let item = path::find_item(items, src_path)?;
        Ok(path::download_path(dst_dir, &item, self.extension()))
    }

    fn load(&self, path: &Path) -> Result<Vec<u8>, BackendError> {
        Ok(std::fs::read(path)?)
    }

    fn save(&self, path: &Path, data: &[u8]) -> Result<(), BackendError> {
        Ok(std::fs::write(path, data)?)
    }
}
