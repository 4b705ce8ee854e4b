//! Uncompressed-archive support: walks a ZIP-family central directory at
//! the end of the archive and exposes each stored (uncompressed) entry
//! as an openable sub-range of the archive's own [`ByteSource`].
//!
//! Compressed entries are recognized (their central-directory record is
//! still read, so `Archive::entry` can report them) but refused at open
//! time with [`Error::UnsupportedCompression`] — decompression is out of
//! scope here, same as JPEG decoding in [`crate::schema`].

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;

use super::source::{ByteSource, FileSource, SliceSource, Whence};
use crate::error::{Error, Result};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_DIR_SIGNATURE: u32 = 0x0201_4b50;
const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

const EOCD_FIXED_SIZE: usize = 22;
const CENTRAL_DIR_FIXED_SIZE: usize = 46;
const LOCAL_HEADER_FIXED_SIZE: usize = 30;

const COMPRESSION_STORED: u16 = 0;

/// One entry in an archive's central directory.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    /// Offset of this entry's local file header within the archive.
    local_header_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
}

/// An opened, indexed uncompressed archive.
///
/// Cloning is cheap: entries and the shared parent source are both
/// reference-counted, so mounting the same archive under multiple
/// `FileSystem`s (or re-mounting after `unmount`) does not re-read the
/// central directory.
#[derive(Clone)]
pub struct Archive {
    parent: Arc<Mutex<Box<dyn ByteSource>>>,
    lockable: bool,
    entries: Arc<HashMap<String, ArchiveEntry>>,
    source_path: Option<String>,
}

impl Archive {
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    pub(crate) fn open_entry(
        &self,
        entry: &ArchiveEntry,
        lockable: bool,
    ) -> Result<Box<dyn ByteSource>> {
        if entry.compression_method != COMPRESSION_STORED {
            return Err(Error::UnsupportedCompression {
                entry: PathBuf::from(&entry.name),
                method: entry.compression_method,
            });
        }

        let data_offset = {
            let mut parent = self.parent.lock();
            local_header_data_offset(parent.as_mut(), entry.local_header_offset)?
        };

        Ok(Box::new(SliceSource::new(
            self.parent.clone(),
            self.lockable || lockable,
            data_offset,
            entry.compressed_size,
        )))
    }
}

/// Opens an archive from a path on the real filesystem.
pub fn open_archive(path: impl AsRef<Path>) -> Result<Archive> {
    let file = File::open(path.as_ref())?;
    let source: Box<dyn ByteSource> = Box::new(FileSource::new(file)?);
    open_archive_from_source(source, false, Some(path.as_ref().display().to_string()))
}

/// Opens an archive from an already-opened [`ByteSource`], e.g. one
/// returned by [`super::FileSystem::open`] with `lockable: true`.
pub fn open_archive_from_source(
    mut source: Box<dyn ByteSource>,
    lockable: bool,
    source_path: Option<String>,
) -> Result<Archive> {
    let entries = read_central_directory(source.as_mut())?;
    Ok(Archive {
        parent: Arc::new(Mutex::new(source)),
        lockable,
        entries: Arc::new(entries),
        source_path,
    })
}

fn read_central_directory(source: &mut dyn ByteSource) -> Result<HashMap<String, ArchiveEntry>> {
    let file_size = source.size()?;
    let eocd_offset = find_eocd(source, file_size)?;

    let mut eocd_buf = [0u8; EOCD_FIXED_SIZE];
    source.seek(eocd_offset as i64, Whence::Start)?;
    source.read_exact(&mut eocd_buf)?;

    let num_entries = LittleEndian::read_u16(&eocd_buf[10..12]) as usize;
    let cd_offset = LittleEndian::read_u32(&eocd_buf[16..20]) as u64;

    let mut entries = HashMap::with_capacity(num_entries);
    source.seek(cd_offset as i64, Whence::Start)?;

    for _ in 0..num_entries {
        let mut header = [0u8; CENTRAL_DIR_FIXED_SIZE];
        source.read_exact(&mut header)?;
        let signature = LittleEndian::read_u32(&header[0..4]);
        if signature != CENTRAL_DIR_SIGNATURE {
            return Err(Error::Corrupt(
                "malformed central directory record".to_string(),
            ));
        }

        let compression_method = LittleEndian::read_u16(&header[10..12]);
        let compressed_size = LittleEndian::read_u32(&header[20..24]) as u64;
        let uncompressed_size = LittleEndian::read_u32(&header[24..28]) as u64;
        let name_len = LittleEndian::read_u16(&header[28..30]) as usize;
        let extra_len = LittleEndian::read_u16(&header[30..32]) as usize;
        let comment_len = LittleEndian::read_u16(&header[32..34]) as usize;
        let local_header_offset = LittleEndian::read_u32(&header[42..46]) as u64;

        let mut name_buf = vec![0u8; name_len];
        source.read_exact(&mut name_buf)?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();

        skip(source, extra_len + comment_len)?;

        entries.insert(
            name.clone(),
            ArchiveEntry {
                name,
                local_header_offset,
                compressed_size,
                uncompressed_size,
                compression_method,
            },
        );
    }

    Ok(entries)
}

/// Scans backward from the end of the file for the end-of-central-directory
/// signature. Archive comments are assumed short enough (or absent, as for
/// every archive this crate writes itself) that a bounded backward scan
/// finds it without reading the whole file.
fn find_eocd(source: &mut dyn ByteSource, file_size: u64) -> Result<u64> {
    const MAX_COMMENT_LEN: u64 = 65536;
    let scan_start = file_size.saturating_sub(EOCD_FIXED_SIZE as u64 + MAX_COMMENT_LEN);
    let scan_len = (file_size - scan_start) as usize;

    let mut buf = vec![0u8; scan_len];
    source.seek(scan_start as i64, Whence::Start)?;
    source.read_exact(&mut buf)?;

    for start in (0..=buf.len().saturating_sub(EOCD_FIXED_SIZE)).rev() {
        if LittleEndian::read_u32(&buf[start..start + 4]) == EOCD_SIGNATURE {
            return Ok(scan_start + start as u64);
        }
    }

    Err(Error::Corrupt(
        "end-of-central-directory record not found".to_string(),
    ))
}

fn local_header_data_offset(source: &mut dyn ByteSource, local_header_offset: u64) -> Result<u64> {
    let mut header = [0u8; LOCAL_HEADER_FIXED_SIZE];
    source.seek(local_header_offset as i64, Whence::Start)?;
    source.read_exact(&mut header)?;

    let signature = LittleEndian::read_u32(&header[0..4]);
    if signature != LOCAL_HEADER_SIGNATURE {
        return Err(Error::Corrupt("malformed local file header".to_string()));
    }

    let name_len = LittleEndian::read_u16(&header[26..28]) as u64;
    let extra_len = LittleEndian::read_u16(&header[28..30]) as u64;

    Ok(local_header_offset + LOCAL_HEADER_FIXED_SIZE as u64 + name_len + extra_len)
}

fn skip(source: &mut dyn ByteSource, len: usize) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let mut remaining = len;
    let mut scratch = [0u8; 256];
    while remaining > 0 {
        let n = remaining.min(scratch.len());
        source.read_exact(&mut scratch[..n])?;
        remaining -= n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_stored_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut local_offsets = Vec::new();

        for (name, data) in entries {
            local_offsets.push(out.len() as u32);
            let crc = crc32fast_placeholder(data);

            out.extend_from_slice(&LOCAL_HEADER_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&COMPRESSION_STORED.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // mod time
            out.extend_from_slice(&0u16.to_le_bytes()); // mod date
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra len
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(data);
        }

        let cd_start = out.len() as u32;

        for ((name, data), local_offset) in entries.iter().zip(local_offsets.iter()) {
            let crc = crc32fast_placeholder(data);
            central.extend_from_slice(&CENTRAL_DIR_SIGNATURE.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // version made by
            central.extend_from_slice(&20u16.to_le_bytes()); // version needed
            central.extend_from_slice(&0u16.to_le_bytes()); // flags
            central.extend_from_slice(&COMPRESSION_STORED.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra len
            central.extend_from_slice(&0u16.to_le_bytes()); // comment len
            central.extend_from_slice(&0u16.to_le_bytes()); // disk number
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&local_offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        out.extend_from_slice(&central);

        let cd_size = central.len() as u32;
        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number
        out.extend_from_slice(&0u16.to_le_bytes()); // disk with cd
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_start.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len

        out
    }

    // Entry CRC values aren't checked by this reader (the container
    // frame CRC in `container` is what integrity-checks record data);
    // any stable value works for round-trip tests.
    fn crc32fast_placeholder(_data: &[u8]) -> u32 {
        0
    }

    #[test]
    fn mounts_and_reads_stored_entries() {
        let bytes = write_stored_zip(&[("a.txt", b"hello"), ("dir/b.bin", b"world!!")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zip");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();

        let archive = open_archive(&path).unwrap();
        assert_eq!(archive.entries().count(), 2);

        let entry = archive.entry("a.txt").unwrap().clone();
        let mut source = archive.open_entry(&entry, false).unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let n = source.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn mounted_via_filesystem_shadows_nothing_on_disk() {
        let bytes = write_stored_zip(&[("only-in-zip.txt", b"zipped")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zip");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();

        let mut fs = super::super::FileSystem::new();
        fs.mount_archive(open_archive(&path).unwrap());

        let mut source = fs
            .open(&super::super::LogicalPath::new("only-in-zip.txt"), false)
            .unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 16];
        loop {
            let n = source.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(buf, b"zipped");
    }
}
