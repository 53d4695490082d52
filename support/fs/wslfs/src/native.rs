// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The native filesystem primitives the translation layer is built on.
//!
//! [`NativeFs`] is implemented by `WindowsFs` on Windows and
//! by [`crate::memfs::MemFs`], an in-memory model of the NTFS behavior the
//! layer depends on.

use std::fmt;
use std::fmt::Display;
use std::io;
use thiserror::Error;

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_BUFFER_OVERFLOW: i32 = 0x8000_0005_u32 as i32;
pub const STATUS_INVALID_PARAMETER: i32 = 0xC000_000D_u32 as i32;
pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
pub const STATUS_OBJECT_NAME_NOT_FOUND: i32 = 0xC000_0034_u32 as i32;
pub const STATUS_OBJECT_NAME_COLLISION: i32 = 0xC000_0035_u32 as i32;
pub const STATUS_OBJECT_PATH_NOT_FOUND: i32 = 0xC000_003A_u32 as i32;
pub const STATUS_EAS_NOT_SUPPORTED: i32 = 0xC000_004F_u32 as i32;
pub const STATUS_NO_EAS_ON_FILE: i32 = 0xC000_0052_u32 as i32;
pub const STATUS_NOT_A_REPARSE_POINT: i32 = 0xC000_0275_u32 as i32;
pub const STATUS_IO_REPARSE_DATA_INVALID: i32 = 0xC000_0278_u32 as i32;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;

pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_PATH_NOT_FOUND: u32 = 3;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_FILE_EXISTS: u32 = 80;
pub const ERROR_ALREADY_EXISTS: u32 = 183;

/// A failed native call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    /// An NT API returned a failure status.
    #[error("NTSTATUS {0:#010x}")]
    Status(i32),
    /// A Win32 API failed with this error code.
    #[error("Win32 error {0}")]
    Win32(u32),
    /// An I/O error with no native code attached.
    #[error("{0}")]
    Io(io::ErrorKind),
}

impl NativeError {
    pub fn is_already_exists(&self) -> bool {
        match *self {
            Self::Status(status) => status == STATUS_OBJECT_NAME_COLLISION,
            Self::Win32(code) => code == ERROR_ALREADY_EXISTS || code == ERROR_FILE_EXISTS,
            Self::Io(kind) => kind == io::ErrorKind::AlreadyExists,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match *self {
            Self::Status(status) => {
                status == STATUS_OBJECT_NAME_NOT_FOUND || status == STATUS_OBJECT_PATH_NOT_FOUND
            }
            Self::Win32(code) => code == ERROR_FILE_NOT_FOUND || code == ERROR_PATH_NOT_FOUND,
            Self::Io(kind) => kind == io::ErrorKind::NotFound,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        match *self {
            Self::Status(status) => status == STATUS_ACCESS_DENIED,
            Self::Win32(code) => code == ERROR_ACCESS_DENIED,
            Self::Io(kind) => kind == io::ErrorKind::PermissionDenied,
        }
    }
}

impl From<io::Error> for NativeError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::Win32(code as u32),
            None => Self::Io(err.kind()),
        }
    }
}

/// Checks an NTSTATUS, treating warnings and errors as failures.
///
/// Informational statuses (other than success) are accepted.
pub fn check_status(status: i32) -> Result<(), NativeError> {
    if status < 0 {
        Err(NativeError::Status(status))
    } else {
        Ok(())
    }
}

/// How [`NativeFs::open`] opens a path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new non-directory file for writing. Fails if the name exists.
    ///
    /// An existing reparse point at the name is not followed.
    CreateNew,
    /// Open an existing non-directory entry for reading, without following a
    /// reparse point.
    Existing,
    /// Open an existing entry with backup semantics, so directories can be
    /// opened. The handle may write attributes and the security descriptor.
    Backup,
    /// Like [`OpenMode::Backup`], but the handle may only read attributes,
    /// extended attributes and the security descriptor.
    BackupRead,
}

/// The native timestamps and attributes of a file, in NT time format.
///
/// In [`NativeFs::set_basic_info`] a zero field leaves the current value
/// untouched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FileBasicInfo {
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_write_time: i64,
    pub change_time: i64,
    pub file_attributes: u32,
}

/// The principal granted access when a directory's ACL must be patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Trustee {
    /// The user the process runs as.
    #[default]
    CurrentUser,
    /// A named account or group, resolved by the security subsystem.
    Name(String),
}

impl Display for Trustee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentUser => f.write_str("CURRENT_USER"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Native filesystem calls used by the translation layer.
///
/// Paths are absolute native paths, as produced by
/// [`RootFs::native_path`](crate::RootFs::native_path). Handles are owned
/// values closed on drop.
pub trait NativeFs: 'static {
    /// An open file or directory.
    type File: io::Read + io::Write;

    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::File, NativeError>;

    /// Creates a directory. Fails with an "already exists" error if the name
    /// is taken.
    fn create_directory(&self, path: &str) -> Result<(), NativeError>;

    /// Creates `link` as a new name for the existing file `target`.
    fn create_hard_link(&self, link: &str, target: &str) -> Result<(), NativeError>;

    /// Queries extended attributes.
    ///
    /// `ea_list` holds `FILE_GET_EA_INFORMATION` records; the result is written
    /// to `buffer` as `FILE_FULL_EA_INFORMATION` records. A single entry is
    /// returned and the scan is restarted.
    fn query_ea(&self, file: &Self::File, ea_list: &[u8], buffer: &mut [u8])
    -> Result<(), NativeError>;

    /// Sets extended attributes from `FILE_FULL_EA_INFORMATION` records.
    fn set_ea(&self, file: &Self::File, buffer: &[u8]) -> Result<(), NativeError>;

    fn query_basic_info(&self, file: &Self::File) -> Result<FileBasicInfo, NativeError>;

    fn set_basic_info(&self, file: &Self::File, info: &FileBasicInfo) -> Result<(), NativeError>;

    /// Sets or clears the per-directory case sensitivity flag.
    fn set_case_sensitive(&self, file: &Self::File, enable: bool) -> Result<(), NativeError>;

    /// Adds an ACE granting `trustee` the right to delete children of the
    /// directory, inherited by subdirectories.
    fn grant_delete_child(&self, file: &Self::File, trustee: &Trustee) -> Result<(), NativeError>;

    /// Sets a reparse point from a `REPARSE_DATA_BUFFER`.
    fn set_reparse_point(&self, file: &Self::File, buffer: &[u8]) -> Result<(), NativeError>;

    /// Returns the file's `REPARSE_DATA_BUFFER`.
    fn get_reparse_point(&self, file: &Self::File) -> Result<Vec<u8>, NativeError>;

    /// Returns an identifier unique to the underlying file on its volume.
    /// Hard links to the same file share the identifier.
    fn file_id(&self, file: &Self::File) -> Result<u64, NativeError>;

    /// Whether the host supports the WslFs format, and so new roots should
    /// use it.
    fn supports_wslfs(&self) -> bool;
}
