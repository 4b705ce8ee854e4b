//! Virtual filesystem: opens logical paths either from the OS filesystem
//! or from an in-process mount of an uncompressed archive.
//!
//! ## Mount precedence
//!
//! `open` checks the real filesystem first, then mounted archives in
//! reverse mount order (the most recently mounted archive shadows
//! earlier ones). Archive contents are read-only: `rename` and write
//! access only ever touch the real filesystem.

mod archive;
mod source;

pub use archive::{open_archive, Archive, ArchiveEntry};
pub use source::{ByteSource, FileSource, SliceSource, Whence};

use std::fs::File;
use std::path::Path;

use crate::error::{Error, Result};

/// An opaque logical path. Resolution against mounts is [`FileSystem`]'s
/// job; the path carries no meaning on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPath(String);

impl LogicalPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LogicalPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LogicalPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Virtual filesystem: a real-disk root plus zero or more mounted
/// archives.
///
/// Mutating the mount table (`mount_archive`/`unmount`) must be
/// externally serialized with concurrent `open` calls by the caller; the
/// mount table itself is not internally synchronized, the same
/// read-mostly contract the design spec assigns it.
#[derive(Default)]
pub struct FileSystem {
    mounts: Vec<Archive>,
}

impl FileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    /// Opens a logical path, trying the real filesystem first and then
    /// mounted archives in reverse mount order.
    ///
    /// `lockable` only matters for archive-backed sources: it requests a
    /// shared, mutex-guarded view so concurrent readers over the same
    /// archive don't race. Real-filesystem opens ignore it.
    pub fn open(&self, path: &LogicalPath, lockable: bool) -> Result<Box<dyn ByteSource>> {
        let disk_path = Path::new(path.as_str());
        if disk_path.is_file() {
            let file = File::open(disk_path)?;
            return Ok(Box::new(FileSource::new(file)?));
        }

        for archive in self.mounts.iter().rev() {
            if let Some(entry) = archive.entry(path.as_str()) {
                return archive.open_entry(entry, lockable);
            }
        }

        Err(Error::NotFound(path.as_str().to_string()))
    }

    /// Mounts an archive, making its entries openable as logical paths.
    pub fn mount_archive(&mut self, archive: Archive) {
        self.mounts.push(archive);
    }

    /// Removes the most recently mounted archive whose entries came from
    /// `source_path`, if any.
    pub fn unmount(&mut self, source_path: &str) {
        if let Some(idx) = self
            .mounts
            .iter()
            .rposition(|a| a.source_path() == Some(source_path))
        {
            self.mounts.remove(idx);
        }
    }

    /// Real-filesystem existence check. Archive contents never shadow
    /// this: a path backed only by an archive returns `false` here even
    /// though `open` would succeed for it (the name refers to disk
    /// presence specifically, matching `rename`'s disk-only scope).
    #[must_use]
    pub fn exists(&self, path: &LogicalPath) -> bool {
        Path::new(path.as_str()).exists()
    }

    /// Renames a real-filesystem path. Archive contents are read-only
    /// and are never a valid target or source of this call.
    pub fn rename(&self, from: &LogicalPath, to: &LogicalPath) -> Result<()> {
        std::fs::rename(from.as_str(), to.as_str())?;
        Ok(())
    }
}

