// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unix inode attributes and their packed on-disk records.

use crate::time::UnixTime;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::LittleEndian;
use zerocopy::U16;
use zerocopy::U32;
use zerocopy::U64;

pub const S_IFIFO: u32 = 0x1000;
pub const S_IFCHR: u32 = 0x2000;
pub const S_IFDIR: u32 = 0x4000;
pub const S_IFBLK: u32 = 0x6000;
pub const S_IFREG: u32 = 0x8000;
pub const S_IFLNK: u32 = 0xa000;
pub const S_IFSOCK: u32 = 0xc000;
pub const S_IFMT: u32 = 0xf000;

/// The attribute record version written by current producers.
pub const LX_ATTRIBUTE_VERSION: u16 = 1;

/// The type of a Unix file, taken from the `S_IFMT` bits of its mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    Fifo,
    CharDevice,
    Directory,
    BlockDevice,
    Regular,
    Symlink,
    Socket,
}

impl FileType {
    /// Returns the file type encoded in `mode`, or `None` if the type bits do
    /// not name exactly one of the seven Unix file types.
    pub fn from_mode(mode: u32) -> Option<Self> {
        let file_type = match mode & S_IFMT {
            S_IFIFO => Self::Fifo,
            S_IFCHR => Self::CharDevice,
            S_IFDIR => Self::Directory,
            S_IFBLK => Self::BlockDevice,
            S_IFREG => Self::Regular,
            S_IFLNK => Self::Symlink,
            S_IFSOCK => Self::Socket,
            _ => return None,
        };

        Some(file_type)
    }

    /// The `S_IFMT` bits for this type.
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::Fifo => S_IFIFO,
            Self::CharDevice => S_IFCHR,
            Self::Directory => S_IFDIR,
            Self::BlockDevice => S_IFBLK,
            Self::Regular => S_IFREG,
            Self::Symlink => S_IFLNK,
            Self::Socket => S_IFSOCK,
        }
    }

    /// Whether the type is a device node, which carries a device number.
    pub fn is_device(self) -> bool {
        matches!(self, Self::CharDevice | Self::BlockDevice)
    }
}

/// The Unix attributes of a single file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnixAttr {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub atime: UnixTime,
    pub mtime: UnixTime,
    pub ctime: UnixTime,
    pub version: u16,
}

impl UnixAttr {
    /// Creates attributes with the given owner and mode and all times at the
    /// Unix epoch.
    pub fn new(mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            mode,
            uid,
            gid,
            rdev: 0,
            atime: UnixTime::default(),
            mtime: UnixTime::default(),
            ctime: UnixTime::default(),
            version: LX_ATTRIBUTE_VERSION,
        }
    }

    pub fn with_times(mut self, atime: UnixTime, mtime: UnixTime, ctime: UnixTime) -> Self {
        self.atime = atime;
        self.mtime = mtime;
        self.ctime = ctime;
        self
    }

    pub fn with_rdev(mut self, rdev: u32) -> Self {
        self.rdev = rdev;
        self
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }
}

/// Builds a 32-bit Linux device number from its major and minor parts.
pub fn make_dev(major: u32, minor: u32) -> u32 {
    ((major & 0xfff) << 8) | (minor & 0xff) | ((minor & 0xfff00) << 12)
}

pub fn dev_major(dev: u32) -> u32 {
    (dev >> 8) & 0xfff
}

pub fn dev_minor(dev: u32) -> u32 {
    (dev & 0xff) | ((dev >> 12) & 0xfff00)
}

/// The packed attribute record stored in the `LXATTRB` extended attribute.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct LxAttrb {
    pub flags: U16<LittleEndian>,
    pub version: U16<LittleEndian>,
    pub mode: U32<LittleEndian>,
    pub uid: U32<LittleEndian>,
    pub gid: U32<LittleEndian>,
    pub rdev: U32<LittleEndian>,
    pub atime_nsec: U32<LittleEndian>,
    pub mtime_nsec: U32<LittleEndian>,
    pub ctime_nsec: U32<LittleEndian>,
    pub atime: U64<LittleEndian>,
    pub mtime: U64<LittleEndian>,
    pub ctime: U64<LittleEndian>,
}

static_assertions::const_assert_eq!(size_of::<LxAttrb>(), 56);

impl From<&UnixAttr> for LxAttrb {
    fn from(attr: &UnixAttr) -> Self {
        Self {
            flags: U16::new(0),
            version: attr.version.into(),
            mode: attr.mode.into(),
            uid: attr.uid.into(),
            gid: attr.gid.into(),
            rdev: attr.rdev.into(),
            atime_nsec: attr.atime.nanoseconds.into(),
            mtime_nsec: attr.mtime.nanoseconds.into(),
            ctime_nsec: attr.ctime.nanoseconds.into(),
            atime: attr.atime.seconds.into(),
            mtime: attr.mtime.seconds.into(),
            ctime: attr.ctime.seconds.into(),
        }
    }
}

impl From<&LxAttrb> for UnixAttr {
    fn from(record: &LxAttrb) -> Self {
        Self {
            mode: record.mode.get(),
            uid: record.uid.get(),
            gid: record.gid.get(),
            rdev: record.rdev.get(),
            atime: UnixTime::new(record.atime.get(), record.atime_nsec.get()),
            mtime: UnixTime::new(record.mtime.get(), record.mtime_nsec.get()),
            ctime: UnixTime::new(record.ctime.get(), record.ctime_nsec.get()),
            version: record.version.get(),
        }
    }
}

/// The device number stored in the `$LXDEV` extended attribute.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct LxDev {
    pub major: U32<LittleEndian>,
    pub minor: U32<LittleEndian>,
}

impl LxDev {
    pub fn from_rdev(rdev: u32) -> Self {
        Self {
            major: dev_major(rdev).into(),
            minor: dev_minor(rdev).into(),
        }
    }

    pub fn rdev(&self) -> u32 {
        make_dev(self.major.get(), self.minor.get())
    }
}
