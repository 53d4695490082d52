// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Translation between Unix paths and NTFS-legal native paths.
//!
//! NTFS rejects control characters and `< > : " \ | *` in file names. LxFs
//! escapes these (and `#`, its escape character) as `#XXXX`; WslFs maps them
//! into the private use area at `0xF000`.

use crate::format::FormatKind;
use std::fmt::Write;

/// The native path separator.
pub const SEPARATOR: char = '\\';

const EXTENDED_PREFIX: &str = r"\\?\";
const EXTENDED_UNC_PREFIX: &str = r"\\?\UNC\";
const PUA_BASE: u32 = 0xf000;
const LXFS_ESCAPE: char = '#';

/// Returns true if `ch` cannot appear unescaped in a native file name.
pub fn needs_escape(ch: char) -> bool {
    matches!(
        ch,
        '\u{1}'..='\u{1f}' | '<' | '>' | ':' | '"' | '\\' | '|' | '*' | LXFS_ESCAPE
    )
}

/// Appends the native encoding of the Unix path character `ch` to `out`.
pub fn encode_char(format: FormatKind, ch: char, out: &mut String) {
    if ch == '/' {
        out.push(SEPARATOR);
        return;
    }

    if !needs_escape(ch) {
        out.push(ch);
        return;
    }

    match format {
        FormatKind::LxFs => {
            let _ = write!(out, "{LXFS_ESCAPE}{:04X}", ch as u32);
        }
        FormatKind::WslFs => {
            // Every escaped character is below 0x80, so this stays in the PUA.
            out.extend(char::from_u32(ch as u32 | PUA_BASE));
        }
        FormatKind::Invalid => out.push(ch),
    }
}

/// Encodes a Unix path relative to the root, dropping its leading slash.
pub fn encode_path(format: FormatKind, path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut encoded = String::with_capacity(path.len());
    for ch in path.chars() {
        encode_char(format, ch, &mut encoded);
    }

    encoded
}

fn decode_lxfs_escape(digits: &str) -> Option<char> {
    if digits.len() != 4 || !digits.bytes().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    u32::from_str_radix(digits, 16)
        .ok()
        .and_then(char::from_u32)
        .filter(|&ch| needs_escape(ch))
}

/// Decodes a root-relative native path back into its Unix form, without a
/// leading slash.
pub fn decode_path(format: FormatKind, native: &str) -> String {
    let mut decoded = String::with_capacity(native.len());
    let mut rest = native;
    while let Some(ch) = rest.chars().next() {
        rest = &rest[ch.len_utf8()..];
        match (format, ch) {
            (_, SEPARATOR) => decoded.push('/'),
            (FormatKind::LxFs, LXFS_ESCAPE) => {
                match rest.get(..4).and_then(decode_lxfs_escape) {
                    Some(unescaped) => {
                        decoded.push(unescaped);
                        rest = &rest[4..];
                    }
                    None => decoded.push(ch),
                }
            }
            (FormatKind::WslFs, _) => {
                let code = ch as u32;
                match char::from_u32(code & 0xff) {
                    Some(unescaped) if code & !0xff == PUA_BASE && needs_escape(unescaped) => {
                        decoded.push(unescaped)
                    }
                    _ => decoded.push(ch),
                }
            }
            _ => decoded.push(ch),
        }
    }

    decoded
}

/// Normalizes a root directory path to its extended-length form, so that
/// native path length limits do not apply below it.
pub fn extended_length_path(root: &str) -> String {
    let root = root.replace('/', r"\");
    let trimmed = root.trim_end_matches(SEPARATOR);
    let root = if trimmed.is_empty() || trimmed.ends_with(':') {
        root.as_str()
    } else {
        trimmed
    };

    if root.starts_with(EXTENDED_PREFIX) {
        root.to_owned()
    } else if let Some(share) = root.strip_prefix(r"\\") {
        format!("{EXTENDED_UNC_PREFIX}{share}")
    } else {
        format!("{EXTENDED_PREFIX}{root}")
    }
}

/// Joins an encoded root-relative path onto a root. An empty relative path
/// names the root itself.
pub fn join(root: &str, relative: &str) -> String {
    if relative.is_empty() {
        root.to_owned()
    } else if root.ends_with(SEPARATOR) {
        format!("{root}{relative}")
    } else {
        format!("{root}{SEPARATOR}{relative}")
    }
}
