// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The LxFs and WslFs on-disk formats.
//!
//! LxFs keeps all Unix attributes in one packed `LXATTRB` extended attribute
//! and stores symlink targets as file data. WslFs splits the owner and mode
//! into `$LXUID`, `$LXGID` and `$LXMOD`, keeps the times in the native NTFS
//! timestamps, and marks symlinks and special files with LX reparse tags.

use crate::attr::FileType;
use crate::attr::LxAttrb;
use crate::attr::LxDev;
use crate::attr::UnixAttr;
use crate::attr::LX_ATTRIBUTE_VERSION;
use crate::ea::get_ea;
use crate::ea::set_ea;
use crate::error::AttrError;
use crate::error::Error;
use crate::native::FileBasicInfo;
use crate::native::NativeFs;
use crate::native::OpenMode;
use crate::path;
use crate::reparse;
use crate::reparse::LxSymlinkTarget;
use crate::reparse::ReparseError;
use crate::time::UnixTime;
use std::fmt;
use std::fmt::Display;
use std::io::Read;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;
use zerocopy::LittleEndian;
use zerocopy::U32;

pub const LXATTRB: &str = "LXATTRB";
pub const LXUID: &str = "$LXUID";
pub const LXGID: &str = "$LXGID";
pub const LXMOD: &str = "$LXMOD";
pub const LXDEV: &str = "$LXDEV";

/// The on-disk format of a root filesystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// Not a WSL root filesystem.
    Invalid,
    LxFs,
    WslFs,
}

impl FormatKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::LxFs => "lxfs",
            Self::WslFs => "wslfs",
        }
    }
}

impl Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown filesystem format {0:?}, expected lxfs or wslfs")]
pub struct ParseFormatError(String);

impl FromStr for FormatKind {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lxfs" => Ok(Self::LxFs),
            "wslfs" => Ok(Self::WslFs),
            _ => Err(ParseFormatError(s.to_owned())),
        }
    }
}

/// Probes the extended attributes of `root` to find its format.
///
/// WslFs is checked first, because a WslFs root may still carry a stale
/// `LXATTRB`. A root with no extended attributes at all is an ordinary
/// directory. Any other failure is logged as a warning; all of these yield
/// [`FormatKind::Invalid`].
pub fn detect<N: NativeFs>(native: &N, root: &str) -> FormatKind {
    let file = match native.open(root, OpenMode::BackupRead) {
        Ok(file) => file,
        Err(err) => {
            tracing::debug!(
                root,
                error = &err as &dyn std::error::Error,
                "cannot open root"
            );
            return FormatKind::Invalid;
        }
    };

    match get_ea::<N, U32<LittleEndian>>(native, &file, LXUID) {
        Ok(_) => return FormatKind::WslFs,
        Err(err) if err.is_invalid() => {}
        Err(err) => {
            tracing::warn!(
                root,
                error = &err as &dyn std::error::Error,
                "failed to probe WslFs attributes"
            );
            return FormatKind::Invalid;
        }
    }

    match get_ea::<N, LxAttrb>(native, &file, LXATTRB) {
        Ok(_) => FormatKind::LxFs,
        Err(err) if err.is_invalid() => {
            tracing::debug!(root, "no WSL attributes on root");
            FormatKind::Invalid
        }
        Err(err) => {
            tracing::warn!(
                root,
                error = &err as &dyn std::error::Error,
                "failed to probe LxFs attributes"
            );
            FormatKind::Invalid
        }
    }
}

/// The per-format half of the translation layer.
pub(crate) trait FormatCodec<N: NativeFs> {
    fn kind(&self) -> FormatKind;

    fn encode_path(&self, path: &str) -> String {
        path::encode_path(self.kind(), path)
    }

    fn decode_path(&self, native: &str) -> String {
        path::decode_path(self.kind(), native)
    }

    fn get_attr(&self, native: &N, file: &N::File) -> Result<UnixAttr, Error>;

    fn set_attr(&self, native: &N, file: &N::File, attr: &UnixAttr) -> Result<(), Error>;

    /// Marks a new fifo, device or socket.
    fn mark_special(
        &self,
        _native: &N,
        _file: &N::File,
        _path: &str,
        _file_type: FileType,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn write_symlink(
        &self,
        native: &N,
        file: &mut N::File,
        path: &str,
        target: &str,
    ) -> Result<(), Error>;

    fn read_symlink(&self, native: &N, file: &mut N::File, path: &str) -> Result<String, Error>;
}

/// Returns the strategy for `kind`.
pub(crate) fn codec<N: NativeFs>(kind: FormatKind) -> &'static dyn FormatCodec<N> {
    match kind {
        FormatKind::Invalid => &Raw,
        FormatKind::LxFs => &LxFs,
        FormatKind::WslFs => &WslFs,
    }
}

fn read_target(file: &mut impl Read, path: &str) -> Result<String, Error> {
    let mut target = String::new();
    file.read_to_string(&mut target).map_err(|source| Error::Io {
        operation: "read symlink",
        path: path.to_owned(),
        source,
    })?;

    Ok(target)
}

fn reparse_error(path: &str, target: &str, err: ReparseError) -> Error {
    match err {
        ReparseError::TooLarge(_) => Error::SymlinkTooLong {
            path: path.to_owned(),
            len: target.len(),
        },
        source => Error::Reparse {
            path: path.to_owned(),
            source,
        },
    }
}

/// A root without a known format. Names are not escaped and attributes are
/// unavailable.
struct Raw;

impl<N: NativeFs> FormatCodec<N> for Raw {
    fn kind(&self) -> FormatKind {
        FormatKind::Invalid
    }

    fn get_attr(&self, _native: &N, _file: &N::File) -> Result<UnixAttr, Error> {
        Err(Error::InvalidFormat)
    }

    fn set_attr(&self, _native: &N, _file: &N::File, _attr: &UnixAttr) -> Result<(), Error> {
        Err(Error::InvalidFormat)
    }

    fn write_symlink(
        &self,
        _native: &N,
        _file: &mut N::File,
        _path: &str,
        _target: &str,
    ) -> Result<(), Error> {
        Err(Error::InvalidFormat)
    }

    fn read_symlink(&self, _native: &N, _file: &mut N::File, _path: &str) -> Result<String, Error> {
        Err(Error::InvalidFormat)
    }
}

struct LxFs;

impl<N: NativeFs> FormatCodec<N> for LxFs {
    fn kind(&self) -> FormatKind {
        FormatKind::LxFs
    }

    fn get_attr(&self, native: &N, file: &N::File) -> Result<UnixAttr, Error> {
        let record = get_ea::<N, LxAttrb>(native, file, LXATTRB)?;
        Ok(UnixAttr::from(&record))
    }

    fn set_attr(&self, native: &N, file: &N::File, attr: &UnixAttr) -> Result<(), Error> {
        let mut record = LxAttrb::from(attr);
        record.version = LX_ATTRIBUTE_VERSION.into();
        set_ea(native, file, LXATTRB, &record)?;
        Ok(())
    }

    fn write_symlink(
        &self,
        _native: &N,
        file: &mut N::File,
        path: &str,
        target: &str,
    ) -> Result<(), Error> {
        file.write_all(target.as_bytes())
            .map_err(|source| Error::Io {
                operation: "write symlink target to",
                path: path.to_owned(),
                source,
            })
    }

    fn read_symlink(&self, _native: &N, file: &mut N::File, path: &str) -> Result<String, Error> {
        read_target(file, path)
    }
}

struct WslFs;

impl WslFs {
    fn get_u32<N: NativeFs>(native: &N, file: &N::File, name: &str) -> Result<u32, AttrError> {
        Ok(get_ea::<N, U32<LittleEndian>>(native, file, name)?.get())
    }

    fn set_u32<N: NativeFs>(
        native: &N,
        file: &N::File,
        name: &str,
        value: u32,
    ) -> Result<(), AttrError> {
        set_ea(native, file, name, &U32::<LittleEndian>::new(value))
    }
}

impl<N: NativeFs> FormatCodec<N> for WslFs {
    fn kind(&self) -> FormatKind {
        FormatKind::WslFs
    }

    fn get_attr(&self, native: &N, file: &N::File) -> Result<UnixAttr, Error> {
        let uid = Self::get_u32(native, file, LXUID)?;
        let gid = Self::get_u32(native, file, LXGID)?;
        let mode = Self::get_u32(native, file, LXMOD)?;
        let info = native
            .query_basic_info(file)
            .map_err(AttrError::QueryInfo)?;

        let rdev = if FileType::from_mode(mode).is_some_and(FileType::is_device) {
            match get_ea::<N, LxDev>(native, file, LXDEV) {
                Ok(dev) => dev.rdev(),
                Err(err) if err.is_invalid() => 0,
                Err(err) => return Err(err.into()),
            }
        } else {
            0
        };

        Ok(UnixAttr {
            mode,
            uid,
            gid,
            rdev,
            atime: UnixTime::from_nt(info.last_access_time),
            mtime: UnixTime::from_nt(info.last_write_time),
            ctime: UnixTime::from_nt(info.change_time),
            version: LX_ATTRIBUTE_VERSION,
        })
    }

    fn set_attr(&self, native: &N, file: &N::File, attr: &UnixAttr) -> Result<(), Error> {
        Self::set_u32(native, file, LXUID, attr.uid)?;
        Self::set_u32(native, file, LXGID, attr.gid)?;
        Self::set_u32(native, file, LXMOD, attr.mode)?;
        if attr.file_type().is_some_and(FileType::is_device) {
            set_ea(native, file, LXDEV, &LxDev::from_rdev(attr.rdev))?;
        }

        // The creation time slot also carries the change time.
        let ctime = attr.ctime.to_nt();
        let info = FileBasicInfo {
            creation_time: ctime,
            last_access_time: attr.atime.to_nt(),
            last_write_time: attr.mtime.to_nt(),
            change_time: ctime,
            file_attributes: 0,
        };

        native
            .set_basic_info(file, &info)
            .map_err(AttrError::SetInfo)?;

        Ok(())
    }

    fn mark_special(
        &self,
        native: &N,
        file: &N::File,
        path: &str,
        file_type: FileType,
    ) -> Result<(), Error> {
        let Some(tag) = reparse::special_file_tag(file_type) else {
            return Ok(());
        };

        let buffer = reparse::reparse_buffer(tag, &[]).map_err(|source| Error::Reparse {
            path: path.to_owned(),
            source,
        })?;

        native
            .set_reparse_point(file, &buffer)
            .map_err(|err| Error::native("set reparse point on", path, err))
    }

    fn write_symlink(
        &self,
        native: &N,
        file: &mut N::File,
        path: &str,
        target: &str,
    ) -> Result<(), Error> {
        let buffer =
            reparse::lx_symlink_buffer(target).map_err(|err| reparse_error(path, target, err))?;

        native
            .set_reparse_point(file, &buffer)
            .map_err(|err| Error::native("set reparse point on", path, err))
    }

    fn read_symlink(&self, native: &N, file: &mut N::File, path: &str) -> Result<String, Error> {
        let buffer = native
            .get_reparse_point(file)
            .map_err(|err| Error::native("get reparse point of", path, err))?;

        match reparse::parse_lx_symlink(&buffer).map_err(|err| reparse_error(path, "", err))? {
            LxSymlinkTarget::Inline(target) => Ok(target),
            LxSymlinkTarget::FileData => read_target(file, path),
        }
    }
}
