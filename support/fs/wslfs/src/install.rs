// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Replays the entries of a Linux filesystem archive into a [`RootFs`].
//!
//! Entries are applied strictly in archive order. A hard link whose target
//! has not been created yet is deferred until the archive is drained. The
//! first failure aborts the replay and leaves the partially populated root in
//! place.

use crate::attr::UnixAttr;
use crate::attr::LX_ATTRIBUTE_VERSION;
use crate::native::NativeFs;
use crate::time::UnixTime;
use crate::Error;
use crate::RootFs;
use std::io;
use std::io::Read;
use std::ops::ControlFlow;
use thiserror::Error;

/// The kind of an archive entry, with its link target for links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    /// A regular file whose content follows the entry.
    Regular,
    Symlink(String),
    /// A hard link to an earlier (or, in malformed archives, later) entry.
    HardLink(String),
    /// A fifo, character or block device, or socket.
    Special,
}

/// One entry of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// The path as stored in the archive.
    pub path: String,
    pub kind: EntryKind,
    /// The full `st_mode`, including the file type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub mtime: UnixTime,
    /// Defaults to `mtime` when the archive does not record it.
    pub atime: Option<UnixTime>,
    /// Defaults to `mtime` when the archive does not record it.
    pub ctime: Option<UnixTime>,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, kind: EntryKind, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind,
            mode,
            uid: 0,
            gid: 0,
            rdev: 0,
            mtime: UnixTime::default(),
            atime: None,
            ctime: None,
        }
    }

    pub fn attr(&self) -> UnixAttr {
        UnixAttr {
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            atime: self.atime.unwrap_or(self.mtime),
            mtime: self.mtime,
            ctime: self.ctime.unwrap_or(self.mtime),
            version: LX_ATTRIBUTE_VERSION,
        }
    }
}

/// A sequence of archive entries, such as a tarball.
pub trait EntrySource {
    /// Advances to the next entry, discarding any unread content of the
    /// current one.
    fn next_entry(&mut self) -> io::Result<Option<ArchiveEntry>>;

    /// Reads content of the current entry. Returns 0 at the end of the entry.
    fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// The number of bytes of the underlying archive consumed so far.
    fn position(&self) -> u64;

    /// The size of the underlying archive, if known.
    fn total_size(&self) -> Option<u64> {
        None
    }
}

/// Reads the content of the current entry of a source.
struct EntryData<'a, S: ?Sized>(&'a mut S);

impl<S: EntrySource + ?Sized> Read for EntryData<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read_data(buf)
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to read archive")]
    Archive(#[source] io::Error),
    #[error("failed to install {path}")]
    Entry {
        path: String,
        #[source]
        source: Error,
    },
    #[error("failed to write the contents of {path}")]
    Content {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("archive path {0:?} leaves the root")]
    UnsafePath(String),
    #[error("install cancelled")]
    Cancelled,
}

/// Reported after every archive entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Entries processed so far, including skipped ones.
    pub entries: u64,
    pub archive_bytes: u64,
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub hard_links: u64,
    pub special_files: u64,
    /// Entries naming the root itself.
    pub skipped: u64,
    /// Hard links created after the rest of the archive.
    pub deferred_links: u64,
    /// Bytes of file content written.
    pub bytes: u64,
}

/// Converts an archive path to an absolute path within the root.
///
/// A leading `./` becomes `/` and a leading slash is added if missing.
/// Trailing slashes are dropped.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = match path.strip_prefix("./") {
        Some(rest) => format!("/{rest}"),
        None if path.starts_with('/') => path.to_owned(),
        None => format!("/{path}"),
    };

    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

fn is_root(path: &str) -> bool {
    matches!(path, "/" | "." | "/.")
}

fn check_path(path: String) -> Result<String, InstallError> {
    if path.split('/').any(|component| component == "..") {
        return Err(InstallError::UnsafePath(path));
    }

    Ok(path)
}

type ProgressFn<'a> = dyn FnMut(&Progress) -> ControlFlow<()> + 'a;

/// Replays archives into a root filesystem.
pub struct Installer<'a, N: NativeFs> {
    rootfs: &'a RootFs<N>,
    on_progress: Option<Box<ProgressFn<'a>>>,
}

impl<'a, N: NativeFs> Installer<'a, N> {
    pub fn new(rootfs: &'a RootFs<N>) -> Self {
        Self {
            rootfs,
            on_progress: None,
        }
    }

    /// Sets a callback run after every entry. Returning
    /// [`ControlFlow::Break`] stops the replay with
    /// [`InstallError::Cancelled`].
    pub fn on_progress(
        &mut self,
        on_progress: impl FnMut(&Progress) -> ControlFlow<()> + 'a,
    ) -> &mut Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    /// Replays every entry of `source`.
    pub fn replay<S: EntrySource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<InstallSummary, InstallError> {
        let mut summary = InstallSummary::default();
        let mut deferred = Vec::new();
        let mut entries = 0;

        while let Some(entry) = source.next_entry().map_err(InstallError::Archive)? {
            self.replay_entry(source, entry, &mut deferred, &mut summary)?;
            entries += 1;

            if let Some(on_progress) = &mut self.on_progress {
                let progress = Progress {
                    entries,
                    archive_bytes: source.position(),
                    total_bytes: source.total_size(),
                };

                if on_progress(&progress).is_break() {
                    tracing::info!(entries, "install cancelled");
                    return Err(InstallError::Cancelled);
                }
            }
        }

        for (path, target) in deferred {
            tracing::debug!(%path, %target, "creating deferred hard link");
            self.rootfs
                .create_hard_link(&path, &target)
                .map_err(|source| InstallError::Entry { path, source })?;

            summary.hard_links += 1;
            summary.deferred_links += 1;
        }

        tracing::info!(
            root = self.rootfs.root(),
            entries,
            directories = summary.directories,
            files = summary.files,
            symlinks = summary.symlinks,
            hard_links = summary.hard_links,
            "install complete"
        );

        Ok(summary)
    }

    fn replay_entry<S: EntrySource + ?Sized>(
        &self,
        source: &mut S,
        entry: ArchiveEntry,
        deferred: &mut Vec<(String, String)>,
        summary: &mut InstallSummary,
    ) -> Result<(), InstallError> {
        let path = normalize_path(&entry.path);
        if is_root(&path) {
            summary.skipped += 1;
            return Ok(());
        }

        let path = check_path(path)?;
        tracing::debug!(%path, kind = ?entry.kind, mode = entry.mode, "replaying entry");

        let attr = entry.attr();
        let result = match &entry.kind {
            EntryKind::HardLink(target) => {
                let target = check_path(normalize_path(target))?;
                match self.rootfs.create_hard_link(&path, &target) {
                    Ok(()) => {
                        summary.hard_links += 1;
                        Ok(())
                    }
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(%path, %target, "deferring hard link");
                        deferred.push((path, target));
                        return Ok(());
                    }
                    Err(err) => Err(err),
                }
            }
            EntryKind::Directory => self.rootfs.create_directory(&path, &attr).map(|()| {
                summary.directories += 1;
            }),
            EntryKind::Symlink(target) => {
                self.rootfs.create_symlink(&path, target, &attr).map(|()| {
                    summary.symlinks += 1;
                })
            }
            EntryKind::Regular | EntryKind::Special => {
                let mut file = self
                    .rootfs
                    .create_file(&path, &attr)
                    .map_err(|source| InstallError::Entry {
                        path: path.clone(),
                        source,
                    })?;

                let written = io::copy(&mut EntryData(source), &mut file)
                    .map_err(|source| InstallError::Content {
                        path: path.clone(),
                        source,
                    })?;

                summary.bytes += written;
                if entry.kind == EntryKind::Special {
                    summary.special_files += 1;
                } else {
                    summary.files += 1;
                }

                Ok(())
            }
        };

        result.map_err(|source| InstallError::Entry { path, source })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attr;
    use crate::attr::S_IFBLK;
    use crate::attr::S_IFDIR;
    use crate::attr::S_IFIFO;
    use crate::attr::S_IFLNK;
    use crate::attr::S_IFMT;
    use crate::attr::S_IFREG;
    use crate::memfs::MemFs;
    use crate::reparse;
    use crate::reparse::LxSymlinkTarget;
    use crate::FormatKind;
    use crate::RootFsOptions;

    /// An in-memory entry source.
    pub(crate) struct VecSource {
        entries: std::vec::IntoIter<(ArchiveEntry, Vec<u8>)>,
        data: io::Cursor<Vec<u8>>,
        position: u64,
        total: u64,
    }

    impl VecSource {
        pub(crate) fn new(entries: Vec<(ArchiveEntry, Vec<u8>)>) -> Self {
            let total = entries.iter().map(|(_, data)| data.len() as u64).sum();
            Self {
                entries: entries.into_iter(),
                data: io::Cursor::new(Vec::new()),
                position: 0,
                total,
            }
        }
    }

    impl EntrySource for VecSource {
        fn next_entry(&mut self) -> io::Result<Option<ArchiveEntry>> {
            let remaining = self.data.get_ref().len() as u64 - self.data.position();
            self.position += remaining;
            Ok(self.entries.next().map(|(entry, data)| {
                self.data = io::Cursor::new(data);
                entry
            }))
        }

        fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            self.position += n as u64;
            Ok(n)
        }

        fn position(&self) -> u64 {
            self.position
        }

        fn total_size(&self) -> Option<u64> {
            Some(self.total)
        }
    }

    fn dir(path: &str) -> (ArchiveEntry, Vec<u8>) {
        (ArchiveEntry::new(path, EntryKind::Directory, S_IFDIR | 0o755), Vec::new())
    }

    fn file(path: &str, data: &[u8]) -> (ArchiveEntry, Vec<u8>) {
        (
            ArchiveEntry::new(path, EntryKind::Regular, S_IFREG | 0o644),
            data.to_vec(),
        )
    }

    fn symlink(path: &str, target: &str) -> (ArchiveEntry, Vec<u8>) {
        (
            ArchiveEntry::new(path, EntryKind::Symlink(target.into()), S_IFLNK | 0o777),
            Vec::new(),
        )
    }

    fn hard_link(path: &str, target: &str) -> (ArchiveEntry, Vec<u8>) {
        (
            ArchiveEntry::new(path, EntryKind::HardLink(target.into()), S_IFREG | 0o644),
            Vec::new(),
        )
    }

    fn new_root(format: FormatKind) -> RootFs<MemFs> {
        let fs = MemFs::new();
        fs.create_dir_all(r"\\?\C:\distros").unwrap();
        RootFs::create(fs, r"C:\distros\test", Some(format), &RootFsOptions::new()).unwrap()
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_path("./usr/bin"), "/usr/bin");
        assert_eq!(normalize_path("usr/bin/"), "/usr/bin");
        assert_eq!(normalize_path("/etc//"), "/etc");
        assert_eq!(normalize_path("./"), "/");
        assert_eq!(normalize_path("."), "/.");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn end_to_end() {
        let rootfs = new_root(FormatKind::WslFs);
        let mut source = VecSource::new(vec![
            dir("/a"),
            file("a/b.txt", b"hi"),
            symlink("./a/c", "b.txt"),
            hard_link("/a/d", "/a/b.txt"),
        ]);

        let summary = Installer::new(&rootfs).replay(&mut source).unwrap();
        assert_eq!(
            summary,
            InstallSummary {
                directories: 1,
                files: 1,
                symlinks: 1,
                hard_links: 1,
                bytes: 2,
                ..Default::default()
            }
        );

        assert!(rootfs.same_file("/a/b.txt", "/a/d").unwrap());
        assert_eq!(rootfs.get_attr("/a").unwrap().mode & S_IFMT, S_IFDIR);

        let link = rootfs.open_file("/a/c").unwrap();
        let buffer = rootfs.native().get_reparse_point(&link).unwrap();
        assert_eq!(
            reparse::parse_lx_symlink(&buffer).unwrap(),
            LxSymlinkTarget::Inline("b.txt".into())
        );

        let mut contents = String::new();
        rootfs
            .open_file("/a/d")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hi");
    }

    #[test]
    fn default_times() {
        let rootfs = new_root(FormatKind::LxFs);
        let (mut entry, data) = file("/f", b"");
        entry.mtime = UnixTime::new(1_500_000_000, 5);
        entry.ctime = Some(UnixTime::new(1_500_000_100, 0));
        Installer::new(&rootfs)
            .replay(&mut VecSource::new(vec![(entry, data)]))
            .unwrap();

        let attr = rootfs.get_attr("/f").unwrap();
        assert_eq!(attr.atime, UnixTime::new(1_500_000_000, 5));
        assert_eq!(attr.mtime, UnixTime::new(1_500_000_000, 5));
        assert_eq!(attr.ctime, UnixTime::new(1_500_000_100, 0));
    }

    #[test]
    fn skips_root_entries() {
        let rootfs = new_root(FormatKind::LxFs);
        let mut source = VecSource::new(vec![dir("./"), dir("."), dir("/"), dir("./etc")]);
        let summary = Installer::new(&rootfs).replay(&mut source).unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.directories, 1);
        assert_eq!(rootfs.get_attr("/etc").unwrap().mode, S_IFDIR | 0o755);
    }

    #[test]
    fn special_files() {
        let rootfs = new_root(FormatKind::WslFs);
        let (mut sda, _) = file("/dev/sda", b"");
        sda.kind = EntryKind::Special;
        sda.mode = S_IFBLK | 0o660;
        sda.rdev = attr::make_dev(8, 0);
        let (mut fifo, _) = file("/dev/initctl", b"");
        fifo.kind = EntryKind::Special;
        fifo.mode = S_IFIFO | 0o600;

        let summary = Installer::new(&rootfs)
            .replay(&mut VecSource::new(vec![
                dir("/dev"),
                (sda, Vec::new()),
                (fifo, Vec::new()),
            ]))
            .unwrap();

        assert_eq!(summary.special_files, 2);
        assert_eq!(rootfs.get_attr("/dev/sda").unwrap().rdev, attr::make_dev(8, 0));
    }

    #[test]
    fn deferred_hard_link() {
        let rootfs = new_root(FormatKind::LxFs);
        let mut source = VecSource::new(vec![hard_link("/x", "/y"), file("/y", b"late")]);
        let summary = Installer::new(&rootfs).replay(&mut source).unwrap();
        assert_eq!(summary.hard_links, 1);
        assert_eq!(summary.deferred_links, 1);
        assert!(rootfs.same_file("/x", "/y").unwrap());
    }

    #[test]
    fn deferred_hard_link_missing() {
        let rootfs = new_root(FormatKind::LxFs);
        let mut source = VecSource::new(vec![hard_link("/x", "/missing"), file("/y", b"")]);
        let err = Installer::new(&rootfs).replay(&mut source).unwrap_err();
        assert!(matches!(
            err,
            InstallError::Entry { path, source } if path == "/x" && source.is_not_found()
        ));
        assert!(rootfs.native().exists(&rootfs.native_path("/y")));
    }

    #[test]
    fn first_failure_aborts() {
        let rootfs = new_root(FormatKind::WslFs);
        let mut source = VecSource::new(vec![
            file("/f", b"one"),
            file("/f", b"two"),
            file("/g", b"three"),
        ]);

        let err = Installer::new(&rootfs).replay(&mut source).unwrap_err();
        assert!(matches!(
            err,
            InstallError::Entry { path, source } if path == "/f" && source.is_already_exists()
        ));
        assert!(!rootfs.native().exists(&rootfs.native_path("/g")));
        assert_eq!(
            rootfs.native().contents(&rootfs.native_path("/f")).unwrap(),
            b"one"
        );
    }

    #[test]
    fn rejects_unsafe_paths() {
        let rootfs = new_root(FormatKind::WslFs);
        let err = Installer::new(&rootfs)
            .replay(&mut VecSource::new(vec![file("../evil", b"")]))
            .unwrap_err();
        assert!(matches!(err, InstallError::UnsafePath(path) if path == "/../evil"));

        let err = Installer::new(&rootfs)
            .replay(&mut VecSource::new(vec![hard_link("/x", "a/../../etc/passwd")]))
            .unwrap_err();
        assert!(matches!(err, InstallError::UnsafePath(_)));
    }

    #[test]
    fn progress_and_cancel() {
        let rootfs = new_root(FormatKind::LxFs);
        let mut seen = Vec::new();
        let err = Installer::new(&rootfs)
            .on_progress(|progress| {
                seen.push(*progress);
                if progress.entries == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .replay(&mut VecSource::new(vec![
                file("/a", b"12345"),
                file("/b", b"678"),
                file("/c", b"9"),
            ]))
            .unwrap_err();

        assert!(matches!(err, InstallError::Cancelled));
        assert_eq!(
            seen,
            [
                Progress {
                    entries: 1,
                    archive_bytes: 5,
                    total_bytes: Some(9),
                },
                Progress {
                    entries: 2,
                    archive_bytes: 8,
                    total_bytes: Some(9),
                },
            ]
        );
        assert!(!rootfs.native().exists(&rootfs.native_path("/c")));
    }
}
