// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `REPARSE_DATA_BUFFER` payloads for LX symlinks and special files.

use crate::attr::FileType;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::LittleEndian;
use zerocopy::U16;
use zerocopy::U32;

pub const IO_REPARSE_TAG_LX_SYMLINK: u32 = 0xA000001D;
pub const IO_REPARSE_TAG_AF_UNIX: u32 = 0x80000023;
pub const IO_REPARSE_TAG_LX_FIFO: u32 = 0x80000024;
pub const IO_REPARSE_TAG_LX_CHR: u32 = 0x80000025;
pub const IO_REPARSE_TAG_LX_BLK: u32 = 0x80000026;

pub const MAXIMUM_REPARSE_DATA_BUFFER_SIZE: usize = 16 * 1024;

/// Leads the data of every LX symlink reparse point written here. Readers
/// require this exact value.
pub const LX_SYMLINK_DISCRIMINANT: u32 = 2;

/// An LX symlink with this discriminant keeps its target in the file data.
const LX_SYMLINK_DISCRIMINANT_FILE_DATA: u32 = 1;

const LX_PATH_MAX: usize = 4096;

/// The generic `REPARSE_DATA_BUFFER` header.
#[repr(C)]
#[derive(Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ReparseHeader {
    pub tag: U32<LittleEndian>,
    pub data_length: U16<LittleEndian>,
    pub reserved: U16<LittleEndian>,
}

pub const REPARSE_DATA_BUFFER_HEADER_SIZE: usize = size_of::<ReparseHeader>();

#[derive(Debug, Error)]
pub enum ReparseError {
    #[error("reparse data is {0} bytes, more than the filesystem allows")]
    TooLarge(usize),
    #[error("reparse data buffer is malformed")]
    Malformed,
    #[error("unexpected reparse tag {0:#x}")]
    UnexpectedTag(u32),
    #[error("unknown LX symlink discriminant {0}")]
    UnknownDiscriminant(u32),
    #[error("symlink target is not valid UTF-8")]
    NotUtf8,
}

/// Builds a reparse data buffer with the given tag and data.
pub fn reparse_buffer(tag: u32, data: &[u8]) -> Result<Vec<u8>, ReparseError> {
    let total = REPARSE_DATA_BUFFER_HEADER_SIZE + data.len();
    if total > MAXIMUM_REPARSE_DATA_BUFFER_SIZE {
        return Err(ReparseError::TooLarge(total));
    }

    let header = ReparseHeader {
        tag: tag.into(),
        data_length: (data.len() as u16).into(),
        reserved: U16::new(0),
    };

    let mut buffer = Vec::with_capacity(total);
    buffer.extend_from_slice(header.as_bytes());
    buffer.extend_from_slice(data);
    Ok(buffer)
}

/// Splits a reparse data buffer into its tag and data.
pub fn parse_reparse_buffer(buffer: &[u8]) -> Result<(u32, &[u8]), ReparseError> {
    let (header, rest) =
        ReparseHeader::ref_from_prefix(buffer).map_err(|_| ReparseError::Malformed)?;

    let data = rest
        .get(..header.data_length.get() as usize)
        .ok_or(ReparseError::Malformed)?;

    Ok((header.tag.get(), data))
}

/// Builds the reparse point for an LX symlink pointing at `target`.
pub fn lx_symlink_buffer(target: &str) -> Result<Vec<u8>, ReparseError> {
    let mut data = Vec::with_capacity(size_of::<u32>() + target.len());
    data.extend_from_slice(&LX_SYMLINK_DISCRIMINANT.to_le_bytes());
    data.extend_from_slice(target.as_bytes());
    reparse_buffer(IO_REPARSE_TAG_LX_SYMLINK, &data)
}

/// The target of an LX symlink reparse point.
#[derive(Debug, PartialEq, Eq)]
pub enum LxSymlinkTarget {
    /// The target is stored in the reparse data.
    Inline(String),
    /// The target is the content of the file.
    FileData,
}

/// Parses an LX symlink reparse point.
pub fn parse_lx_symlink(buffer: &[u8]) -> Result<LxSymlinkTarget, ReparseError> {
    let (tag, data) = parse_reparse_buffer(buffer)?;
    if tag != IO_REPARSE_TAG_LX_SYMLINK {
        return Err(ReparseError::UnexpectedTag(tag));
    }

    let (discriminant, target) =
        U32::<LittleEndian>::read_from_prefix(data).map_err(|_| ReparseError::Malformed)?;

    match discriminant.get() {
        LX_SYMLINK_DISCRIMINANT => {
            if target.len() > LX_PATH_MAX {
                return Err(ReparseError::Malformed);
            }

            let target = std::str::from_utf8(target).map_err(|_| ReparseError::NotUtf8)?;
            Ok(LxSymlinkTarget::Inline(target.to_owned()))
        }
        LX_SYMLINK_DISCRIMINANT_FILE_DATA if target.is_empty() => Ok(LxSymlinkTarget::FileData),
        other => Err(ReparseError::UnknownDiscriminant(other)),
    }
}

/// Returns the reparse tag marking a special file of type `file_type`, if it
/// is one.
pub fn special_file_tag(file_type: FileType) -> Option<u32> {
    match file_type {
        FileType::Fifo => Some(IO_REPARSE_TAG_LX_FIFO),
        FileType::CharDevice => Some(IO_REPARSE_TAG_LX_CHR),
        FileType::BlockDevice => Some(IO_REPARSE_TAG_LX_BLK),
        FileType::Socket => Some(IO_REPARSE_TAG_AF_UNIX),
        FileType::Directory | FileType::Regular | FileType::Symlink => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlink_layout() {
        let buffer = lx_symlink_buffer("b.txt").unwrap();
        assert_eq!(&buffer[..4], &IO_REPARSE_TAG_LX_SYMLINK.to_le_bytes());
        assert_eq!(&buffer[4..6], &9u16.to_le_bytes());
        assert_eq!(&buffer[6..8], &[0, 0]);
        assert_eq!(&buffer[8..12], &[2, 0, 0, 0]);
        assert_eq!(&buffer[12..], b"b.txt");
        assert_eq!(
            parse_lx_symlink(&buffer).unwrap(),
            LxSymlinkTarget::Inline("b.txt".into())
        );
    }

    #[test]
    fn symlink_limits() {
        let max = MAXIMUM_REPARSE_DATA_BUFFER_SIZE - REPARSE_DATA_BUFFER_HEADER_SIZE - 4;
        assert!(lx_symlink_buffer(&"a".repeat(max)).is_ok());
        assert!(matches!(
            lx_symlink_buffer(&"a".repeat(max + 1)),
            Err(ReparseError::TooLarge(_))
        ));
    }

    #[test]
    fn file_data_symlink() {
        let buffer = reparse_buffer(IO_REPARSE_TAG_LX_SYMLINK, &1u32.to_le_bytes()).unwrap();
        assert_eq!(
            parse_lx_symlink(&buffer).unwrap(),
            LxSymlinkTarget::FileData
        );
    }

    #[test]
    fn rejects_other_payloads() {
        let fifo = reparse_buffer(IO_REPARSE_TAG_LX_FIFO, &[]).unwrap();
        assert!(matches!(
            parse_lx_symlink(&fifo),
            Err(ReparseError::UnexpectedTag(IO_REPARSE_TAG_LX_FIFO))
        ));

        let unknown = reparse_buffer(IO_REPARSE_TAG_LX_SYMLINK, &7u32.to_le_bytes()).unwrap();
        assert!(matches!(
            parse_lx_symlink(&unknown),
            Err(ReparseError::UnknownDiscriminant(7))
        ));

        let mut truncated = lx_symlink_buffer("target").unwrap();
        truncated.pop();
        assert!(matches!(
            parse_lx_symlink(&truncated),
            Err(ReparseError::Malformed)
        ));
    }

    #[test]
    fn special_tags() {
        assert_eq!(special_file_tag(FileType::Fifo), Some(IO_REPARSE_TAG_LX_FIFO));
        assert_eq!(special_file_tag(FileType::Socket), Some(IO_REPARSE_TAG_AF_UNIX));
        assert_eq!(special_file_tag(FileType::Regular), None);
    }
}
