// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Extended attribute buffers in the layout used by `NtQueryEaFile` and
//! `NtSetEaFile`, and typed access to single attributes.

use crate::error::AttrError;
use crate::native::NativeError;
use crate::native::NativeFs;
use crate::native::STATUS_BUFFER_OVERFLOW;
use crate::native::STATUS_NO_EAS_ON_FILE;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::LittleEndian;
use zerocopy::U16;
use zerocopy::U32;

/// The longest EA name NTFS accepts.
pub const EA_NAME_MAX: usize = 255;

/// `FILE_GET_EA_INFORMATION`, without the trailing name.
#[repr(C)]
#[derive(Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct GetEaHeader {
    next_entry_offset: U32<LittleEndian>,
    name_length: u8,
}

/// `FILE_FULL_EA_INFORMATION`, without the trailing name and value.
#[repr(C)]
#[derive(Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct FullEaHeader {
    next_entry_offset: U32<LittleEndian>,
    flags: u8,
    name_length: u8,
    value_length: U16<LittleEndian>,
}

/// One attribute from a `FILE_FULL_EA_INFORMATION` buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct EaEntry<'a> {
    pub flags: u8,
    pub name: &'a str,
    pub value: &'a [u8],
}

fn check_name(name: &str) -> Result<u8, AttrError> {
    if name.is_empty() || name.len() > EA_NAME_MAX || !name.bytes().all(|c| c.is_ascii() && c != 0)
    {
        return Err(AttrError::InvalidName(name.to_owned()));
    }

    Ok(name.len() as u8)
}

/// Returns the size of a single `FILE_FULL_EA_INFORMATION` record.
pub fn full_ea_size(name_len: usize, value_len: usize) -> usize {
    size_of::<FullEaHeader>() + name_len + 1 + value_len
}

/// Builds a `FILE_GET_EA_INFORMATION` list naming one attribute.
pub fn get_ea_list(name: &str) -> Result<Vec<u8>, AttrError> {
    let header = GetEaHeader {
        next_entry_offset: U32::new(0),
        name_length: check_name(name)?,
    };

    let mut buffer = Vec::with_capacity(size_of::<GetEaHeader>() + name.len() + 1);
    buffer.extend_from_slice(header.as_bytes());
    buffer.extend_from_slice(name.as_bytes());
    buffer.push(0);
    Ok(buffer)
}

/// Builds a `FILE_FULL_EA_INFORMATION` buffer. Entries after the first start
/// on a 4-byte boundary.
pub fn full_ea_buffer(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, AttrError> {
    let mut buffer = Vec::new();
    let mut previous = None;
    for &(name, value) in entries {
        let name_length = check_name(name)?;
        let value_length: u16 = value
            .len()
            .try_into()
            .map_err(|_| AttrError::ValueTooLarge(name.to_owned()))?;

        if let Some(previous) = previous {
            buffer.resize(buffer.len().next_multiple_of(4), 0);
            let offset = (buffer.len() - previous) as u32;
            buffer[previous..previous + 4].copy_from_slice(&offset.to_le_bytes());
        }

        previous = Some(buffer.len());
        let header = FullEaHeader {
            next_entry_offset: U32::new(0),
            flags: 0,
            name_length,
            value_length: value_length.into(),
        };

        buffer.extend_from_slice(header.as_bytes());
        buffer.extend_from_slice(name.as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(value);
    }

    Ok(buffer)
}

/// Walks a chain of records, where each record starts with its next entry
/// offset.
fn walk<'a>(
    buffer: &'a [u8],
    mut f: impl FnMut(&'a [u8]) -> Result<(), AttrError>,
) -> Result<(), AttrError> {
    let mut offset = 0;
    loop {
        let record = buffer.get(offset..).ok_or(AttrError::Malformed)?;
        f(record)?;
        let (next, _) = U32::<LittleEndian>::read_from_prefix(record)
            .map_err(|_| AttrError::Malformed)?;

        match next.get() as usize {
            0 => break Ok(()),
            next => offset += next,
        }
    }
}

fn name_at(record: &[u8], start: usize, len: usize) -> Result<&str, AttrError> {
    let name = record.get(start..start + len).ok_or(AttrError::Malformed)?;
    if record.get(start + len) != Some(&0) {
        return Err(AttrError::Malformed);
    }

    std::str::from_utf8(name).map_err(|_| AttrError::Malformed)
}

/// Parses a `FILE_GET_EA_INFORMATION` list into attribute names.
pub fn parse_get_ea_list(buffer: &[u8]) -> Result<Vec<&str>, AttrError> {
    let mut names = Vec::new();
    walk(buffer, |record| {
        let (header, _) =
            GetEaHeader::ref_from_prefix(record).map_err(|_| AttrError::Malformed)?;

        names.push(name_at(
            record,
            size_of::<GetEaHeader>(),
            header.name_length as usize,
        )?);

        Ok(())
    })?;

    Ok(names)
}

/// Parses a `FILE_FULL_EA_INFORMATION` buffer.
pub fn parse_full_ea(buffer: &[u8]) -> Result<Vec<EaEntry<'_>>, AttrError> {
    let mut entries = Vec::new();
    walk(buffer, |record| {
        let (header, _) =
            FullEaHeader::ref_from_prefix(record).map_err(|_| AttrError::Malformed)?;

        let name_length = header.name_length as usize;
        let name = name_at(record, size_of::<FullEaHeader>(), name_length)?;
        let value_start = full_ea_size(name_length, 0);
        let value = record
            .get(value_start..value_start + header.value_length.get() as usize)
            .ok_or(AttrError::Malformed)?;

        entries.push(EaEntry {
            flags: header.flags,
            name,
            value,
        });

        Ok(())
    })?;

    Ok(entries)
}

/// Reads the fixed-size value of the extended attribute `name`.
///
/// Returns [`AttrError::Invalid`] if the attribute is missing or holds a
/// value of a different size, and [`AttrError::Query`] if the query itself
/// fails.
pub fn get_ea<N: NativeFs, T: FromBytes>(
    native: &N,
    file: &N::File,
    name: &str,
) -> Result<T, AttrError> {
    let invalid = || AttrError::Invalid {
        name: name.to_owned(),
        expected: size_of::<T>(),
    };

    let ea_list = get_ea_list(name)?;
    let mut buffer = vec![0; full_ea_size(name.len(), size_of::<T>())];
    match native.query_ea(file, &ea_list, &mut buffer) {
        Ok(()) => {}
        // The stored value is larger than T, or the file has no extended
        // attributes at all.
        Err(NativeError::Status(STATUS_BUFFER_OVERFLOW | STATUS_NO_EAS_ON_FILE)) => {
            return Err(invalid())
        }
        Err(source) => {
            return Err(AttrError::Query {
                name: name.to_owned(),
                source,
            })
        }
    }

    let entries = parse_full_ea(&buffer)?;
    let entry = entries.first().ok_or(AttrError::Malformed)?;
    if !entry.name.eq_ignore_ascii_case(name) {
        return Err(AttrError::Malformed);
    }

    // NTFS reports a missing attribute as a zero-length value.
    T::read_from_bytes(entry.value).map_err(|_| invalid())
}

/// Writes `value` to the extended attribute `name`.
pub fn set_ea<N: NativeFs, T: IntoBytes + Immutable>(
    native: &N,
    file: &N::File,
    name: &str,
    value: &T,
) -> Result<(), AttrError> {
    let buffer = full_ea_buffer(&[(name, value.as_bytes())])?;
    native.set_ea(file, &buffer).map_err(|source| AttrError::Set {
        name: name.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_list_layout() {
        let list = get_ea_list("$LXUID").unwrap();
        assert_eq!(list, b"\0\0\0\0\x06$LXUID\0");
        assert_eq!(parse_get_ea_list(&list).unwrap(), ["$LXUID"]);
    }

    #[test]
    fn full_layout() {
        let buffer = full_ea_buffer(&[("$LXMOD", &0o100644u32.to_le_bytes()[..])]).unwrap();
        assert_eq!(buffer.len(), full_ea_size(6, 4));
        assert_eq!(&buffer[..8], &[0, 0, 0, 0, 0, 6, 4, 0]);
        assert_eq!(&buffer[8..15], b"$LXMOD\0");
        assert_eq!(&buffer[15..], &0o100644u32.to_le_bytes());

        let entries = parse_full_ea(&buffer).unwrap();
        assert_eq!(
            entries,
            [EaEntry {
                flags: 0,
                name: "$LXMOD",
                value: &0o100644u32.to_le_bytes(),
            }]
        );
    }

    #[test]
    fn chained_entries() {
        let buffer =
            full_ea_buffer(&[("$LXUID", &[1, 0, 0, 0][..]), ("$LXGID", &[2, 0, 0, 0][..])])
                .unwrap();

        // 19 bytes rounded up to 20.
        assert_eq!(&buffer[..4], &20u32.to_le_bytes());
        let entries = parse_full_ea(&buffer).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "$LXGID");
        assert_eq!(entries[1].value, &[2, 0, 0, 0]);
    }

    #[test]
    fn bad_names() {
        assert!(matches!(get_ea_list(""), Err(AttrError::InvalidName(_))));
        assert!(matches!(
            get_ea_list(&"A".repeat(256)),
            Err(AttrError::InvalidName(_))
        ));
        assert!(matches!(get_ea_list("A\0B"), Err(AttrError::InvalidName(_))));
        assert!(get_ea_list(&"A".repeat(255)).is_ok());
    }

    #[test]
    fn value_too_large() {
        let value = vec![0; 0x10000];
        assert!(matches!(
            full_ea_buffer(&[("BIG", &value[..])]),
            Err(AttrError::ValueTooLarge(_))
        ));
    }

    #[test]
    fn truncated() {
        let buffer = full_ea_buffer(&[("$LXUID", &[1, 0, 0, 0][..])]).unwrap();
        assert!(matches!(
            parse_full_ea(&buffer[..buffer.len() - 1]),
            Err(AttrError::Malformed)
        ));
        assert!(matches!(parse_full_ea(&buffer[..3]), Err(AttrError::Malformed)));
    }
}
