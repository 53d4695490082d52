// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Cmd;
use anyhow::Context;
use std::ops::ControlFlow;
use std::path::PathBuf;
use wslfs::install::Installer;
use wslfs::memfs::MemFs;
use wslfs::tarball::Tarball;
use wslfs::FileType;
use wslfs::FormatKind;
use wslfs::NativeFs;
use wslfs::RootFs;
use wslfs::RootFsOptions;
use wslfs::UnixTime;

/// Log install progress every this many entries.
const PROGRESS_INTERVAL: u64 = 1000;

#[cfg(windows)]
fn native() -> anyhow::Result<wslfs::WindowsFs> {
    Ok(wslfs::WindowsFs::new())
}

#[cfg(not(windows))]
fn native() -> anyhow::Result<MemFs> {
    anyhow::bail!("this command requires Windows; use `install --dry-run` elsewhere")
}

/// Resolves `root` against the current directory. Extended-length paths
/// cannot be relative.
fn absolute_root(root: &str) -> anyhow::Result<String> {
    std::path::absolute(root)
        .with_context(|| format!("failed to resolve {root}"))?
        .into_os_string()
        .into_string()
        .map_err(|_| anyhow::anyhow!("{root} is not a valid Unicode path"))
}

fn open_root(root: &str) -> anyhow::Result<RootFs<impl NativeFs>> {
    let native = native()?;
    let root = absolute_root(root)?;
    RootFs::open(native, &root, &RootFsOptions::new())
        .with_context(|| format!("failed to open root filesystem {root}"))
}

/// Print the on-disk format of a root filesystem.
#[derive(clap::Parser)]
pub struct Detect {
    /// The root directory.
    root: String,
}

impl Cmd for Detect {
    fn run(self) -> anyhow::Result<()> {
        let native = native()?;
        let root = wslfs::path::extended_length_path(&absolute_root(&self.root)?);
        println!("{}", wslfs::format::detect(&native, &root));
        Ok(())
    }
}

/// Create a root filesystem and extract a tarball into it.
#[derive(clap::Parser)]
pub struct Install {
    /// The tarball to install, optionally compressed with gzip, bzip2 or xz.
    tarball: PathBuf,

    /// The root directory to create.
    root: String,

    /// The on-disk format. Defaults to wslfs when the OS supports it.
    #[clap(long)]
    format: Option<FormatKind>,

    /// Semicolon separated options, such as `case=off` or
    /// `trustee=BUILTIN\Users`.
    #[clap(long)]
    options: Option<String>,

    /// Replay the tarball into memory without touching the disk.
    #[clap(long)]
    dry_run: bool,
}

impl Install {
    fn install<N: NativeFs>(
        &self,
        native: N,
        root: &str,
        options: &RootFsOptions,
    ) -> anyhow::Result<()> {
        let mut tarball = Tarball::open(&self.tarball)
            .with_context(|| format!("failed to open {}", self.tarball.display()))?;

        let rootfs = RootFs::create(native, root, self.format, options)
            .with_context(|| format!("failed to create root filesystem {root}"))?;

        tracing::info!(
            tarball = %self.tarball.display(),
            root = rootfs.root(),
            format = %rootfs.format(),
            compression = %tarball.compression(),
            "installing"
        );

        let mut source = tarball.entries().context("failed to read tarball")?;
        let summary = Installer::new(&rootfs)
            .on_progress(|progress| {
                if progress.entries % PROGRESS_INTERVAL == 0 {
                    let percent = progress
                        .total_bytes
                        .filter(|&total| total != 0)
                        .map(|total| progress.archive_bytes * 100 / total);

                    tracing::info!(entries = progress.entries, percent, "installing");
                }

                ControlFlow::Continue(())
            })
            .replay(&mut source)
            .with_context(|| format!("failed to install {}", self.tarball.display()))?;

        println!(
            "installed {} directories, {} files, {} symlinks, {} hard links and {} special files ({} bytes) into {}",
            summary.directories,
            summary.files,
            summary.symlinks,
            summary.hard_links,
            summary.special_files,
            summary.bytes,
            rootfs.root(),
        );

        Ok(())
    }
}

impl Cmd for Install {
    fn run(self) -> anyhow::Result<()> {
        let options = self
            .options
            .as_deref()
            .map(RootFsOptions::from_option_string)
            .unwrap_or_default();

        if self.dry_run {
            let fs = MemFs::new();
            let root = wslfs::path::extended_length_path(&self.root);
            if let Some((parent, _)) = root.rsplit_once(wslfs::path::SEPARATOR) {
                fs.create_dir_all(parent)
                    .with_context(|| format!("failed to create {parent} in memory"))?;
            }

            return self.install(fs, &self.root, &options);
        }

        let native = native()?;
        self.install(native, &absolute_root(&self.root)?, &options)
    }
}

fn format_time(time: UnixTime) -> String {
    format!("{}.{:09}", time.seconds, time.nanoseconds)
}

/// Print the Unix attributes of a path within a root filesystem.
#[derive(clap::Parser)]
pub struct Stat {
    /// The root directory.
    root: String,

    /// The absolute Unix path, such as `/etc/passwd`.
    path: String,
}

impl Cmd for Stat {
    fn run(self) -> anyhow::Result<()> {
        let rootfs = open_root(&self.root)?;
        let attr = rootfs
            .get_attr(&self.path)
            .with_context(|| format!("failed to stat {}", self.path))?;

        let file_type = match attr.file_type() {
            Some(FileType::Directory) => "directory",
            Some(FileType::Regular) => "regular file",
            Some(FileType::Symlink) => "symbolic link",
            Some(FileType::CharDevice) => "character device",
            Some(FileType::BlockDevice) => "block device",
            Some(FileType::Fifo) => "fifo",
            Some(FileType::Socket) => "socket",
            None => "unknown",
        };

        println!("  Path: {}", self.path);
        println!("Native: {}", rootfs.native_path(&self.path));
        println!("  Type: {file_type}");
        println!("  Mode: {:06o}", attr.mode);
        println!("   Uid: {}", attr.uid);
        println!("   Gid: {}", attr.gid);
        if attr.file_type().is_some_and(FileType::is_device) {
            println!(
                "Device: {},{}",
                wslfs::attr::dev_major(attr.rdev),
                wslfs::attr::dev_minor(attr.rdev)
            );
        }
        println!("Access: {}", format_time(attr.atime));
        println!("Modify: {}", format_time(attr.mtime));
        println!("Change: {}", format_time(attr.ctime));
        Ok(())
    }
}

/// Print the target of a symlink within a root filesystem.
#[derive(clap::Parser)]
pub struct Readlink {
    /// The root directory.
    root: String,

    /// The absolute Unix path of the symlink.
    path: String,
}

impl Cmd for Readlink {
    fn run(self) -> anyhow::Result<()> {
        let rootfs = open_root(&self.root)?;
        let target = rootfs
            .read_symlink(&self.path)
            .with_context(|| format!("failed to read symlink {}", self.path))?;

        println!("{target}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_root_is_resolved() {
        let cwd = std::env::current_dir().unwrap();
        let root = absolute_root("distro").unwrap();
        assert_eq!(PathBuf::from(root), cwd.join("distro"));
    }
}
