// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An [`EntrySource`] over a tarball, optionally compressed with gzip, bzip2
//! or xz.

use crate::attr;
use crate::attr::FileType;
use crate::install::ArchiveEntry;
use crate::install::EntryKind;
use crate::install::EntrySource;
use crate::time::UnixTime;
use std::cell::Cell;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;
use tar::EntryType;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// The compression of a tarball, detected from its first bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(GZIP_MAGIC) {
            Self::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            Self::Bzip2
        } else if magic.starts_with(XZ_MAGIC) {
            Self::Xz
        } else {
            Self::None
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        })
    }
}

/// Counts the bytes read from the compressed stream.
struct CountingReader<R> {
    inner: R,
    count: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.set(self.count.get() + n as u64);
        Ok(n)
    }
}

type Reader = Box<dyn Read>;

/// An opened tarball.
pub struct Tarball {
    archive: tar::Archive<Reader>,
    compression: Compression,
    consumed: Rc<Cell<u64>>,
    total: Option<u64>,
}

impl Tarball {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        Self::from_reader(file, Some(total))
    }

    /// Wraps a tarball stream of `total` bytes, if known.
    pub fn from_reader(reader: impl Read + 'static, total: Option<u64>) -> io::Result<Self> {
        let consumed = Rc::new(Cell::new(0));
        let mut reader = BufReader::new(CountingReader {
            inner: reader,
            count: consumed.clone(),
        });

        let compression = Compression::detect(reader.fill_buf()?);
        let reader: Reader = match compression {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::bufread::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::bufread::XzDecoder::new(reader)),
        };

        tracing::debug!(%compression, total, "opened tarball");
        Ok(Self {
            archive: tar::Archive::new(reader),
            compression,
            consumed,
            total,
        })
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Returns the entries of the tarball. May only be called once.
    pub fn entries(&mut self) -> io::Result<TarballSource<'_>> {
        Ok(TarballSource {
            entries: self.archive.entries()?,
            current: None,
            consumed: self.consumed.clone(),
            total: self.total,
        })
    }
}

/// The entries of a [`Tarball`].
pub struct TarballSource<'a> {
    entries: tar::Entries<'a, Reader>,
    current: Option<tar::Entry<'a, Reader>>,
    consumed: Rc<Cell<u64>>,
    total: Option<u64>,
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn utf8(bytes: &[u8], what: &str) -> io::Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| invalid_data(format!("{what} {:?} is not UTF-8", String::from_utf8_lossy(bytes))))
}

fn id(value: u64, what: &str) -> io::Result<u32> {
    value
        .try_into()
        .map_err(|_| invalid_data(format!("{what} {value} is out of range")))
}

/// Parses a PAX time, in seconds with an optional fraction. Times before the
/// epoch are not supported.
fn parse_pax_time(value: &str) -> Option<UnixTime> {
    let (seconds, fraction) = value.split_once('.').unwrap_or((value, ""));
    let seconds = seconds.parse().ok()?;
    if !fraction.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = &fraction[..fraction.len().min(9)];
    let nanoseconds = if digits.is_empty() {
        0
    } else {
        digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32)
    };

    Some(UnixTime::new(seconds, nanoseconds))
}

fn gnu_time(time: io::Result<u64>) -> Option<UnixTime> {
    time.ok()
        .filter(|&seconds| seconds != 0)
        .map(|seconds| UnixTime::new(seconds, 0))
}

fn map_entry(entry: &mut tar::Entry<'_, Reader>) -> io::Result<Option<ArchiveEntry>> {
    let path = utf8(&entry.path_bytes(), "path")?;
    let link_target = || -> io::Result<String> {
        let target = entry
            .link_name_bytes()
            .ok_or_else(|| invalid_data(format!("link {path} has no target")))?;
        utf8(&target, "link target")
    };

    let entry_type = entry.header().entry_type();
    let (kind, file_type) = match entry_type {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
            (EntryKind::Regular, FileType::Regular)
        }
        EntryType::Directory => (EntryKind::Directory, FileType::Directory),
        EntryType::Symlink => (EntryKind::Symlink(link_target()?), FileType::Symlink),
        EntryType::Link => (EntryKind::HardLink(link_target()?), FileType::Regular),
        EntryType::Char => (EntryKind::Special, FileType::CharDevice),
        EntryType::Block => (EntryKind::Special, FileType::BlockDevice),
        EntryType::Fifo => (EntryKind::Special, FileType::Fifo),
        EntryType::XGlobalHeader => {
            tracing::warn!("skipping PAX global header");
            return Ok(None);
        }
        other => {
            tracing::warn!(%path, entry_type = ?other, "skipping unsupported archive entry");
            return Ok(None);
        }
    };

    let header = entry.header();
    let rdev = if file_type.is_device() {
        attr::make_dev(
            header.device_major()?.unwrap_or(0),
            header.device_minor()?.unwrap_or(0),
        )
    } else {
        0
    };

    let mut archive_entry = ArchiveEntry {
        mode: (header.mode()? & 0o7777) | file_type.mode_bits(),
        uid: id(header.uid()?, "uid")?,
        gid: id(header.gid()?, "gid")?,
        rdev,
        mtime: UnixTime::new(header.mtime()?, 0),
        atime: header.as_gnu().and_then(|gnu| gnu_time(gnu.atime())),
        ctime: header.as_gnu().and_then(|gnu| gnu_time(gnu.ctime())),
        ..ArchiveEntry::new(path, kind, 0)
    };

    if let Some(extensions) = entry.pax_extensions()? {
        for extension in extensions {
            let extension = extension?;
            let (Ok(key), Ok(value)) = (extension.key(), extension.value()) else {
                continue;
            };

            let slot = match key {
                "mtime" => &mut archive_entry.mtime,
                "atime" => archive_entry.atime.insert(UnixTime::default()),
                "ctime" => archive_entry.ctime.insert(UnixTime::default()),
                _ => continue,
            };

            *slot = parse_pax_time(value)
                .ok_or_else(|| invalid_data(format!("invalid PAX {key} {value:?}")))?;
        }
    }

    Ok(Some(archive_entry))
}

impl EntrySource for TarballSource<'_> {
    fn next_entry(&mut self) -> io::Result<Option<ArchiveEntry>> {
        self.current = None;
        for entry in self.entries.by_ref() {
            let mut entry = entry?;
            if let Some(archive_entry) = map_entry(&mut entry)? {
                self.current = Some(entry);
                return Ok(Some(archive_entry));
            }
        }

        Ok(None)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.current {
            Some(entry) => entry.read(buf),
            None => Ok(0),
        }
    }

    fn position(&self) -> u64 {
        self.consumed.get()
    }

    fn total_size(&self) -> Option<u64> {
        self.total
    }
}
