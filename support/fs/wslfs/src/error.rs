// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::native::NativeError;
use crate::reparse::ReparseError;
use std::io;
use thiserror::Error;

/// An error reading or writing the Unix attributes of a file.
#[derive(Debug, Error)]
pub enum AttrError {
    #[error("invalid extended attribute name {0:?}")]
    InvalidName(String),
    #[error("extended attribute {0} value is too large")]
    ValueTooLarge(String),
    #[error("failed to query extended attribute {name}")]
    Query {
        name: String,
        #[source]
        source: NativeError,
    },
    #[error("failed to set extended attribute {name}")]
    Set {
        name: String,
        #[source]
        source: NativeError,
    },
    /// The attribute is missing or its value has the wrong size.
    ///
    /// Format detection relies on telling this apart from query failures.
    #[error("extended attribute {name} is missing or is not {expected} bytes")]
    Invalid { name: String, expected: usize },
    #[error("malformed extended attribute buffer")]
    Malformed,
    #[error("failed to query file basic information")]
    QueryInfo(#[source] NativeError),
    #[error("failed to set file basic information")]
    SetInfo(#[source] NativeError),
}

impl AttrError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// An error from a root filesystem operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{path} is not a recognized WSL root filesystem")]
    UnknownFormat { path: String },
    #[error("operation requires an LxFs or WslFs root")]
    InvalidFormat,
    #[error(transparent)]
    Attribute(#[from] AttrError),
    #[error("mode {mode:#o} is not valid for {operation}")]
    Precondition { operation: &'static str, mode: u32 },
    #[error("failed to {operation} {path}")]
    Native {
        operation: &'static str,
        path: String,
        #[source]
        source: NativeError,
    },
    #[error("failed to {operation} {path}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid symlink {path}")]
    Reparse {
        path: String,
        #[source]
        source: ReparseError,
    },
    #[error("symlink target for {path} is too long ({len} bytes)")]
    SymlinkTooLong { path: String, len: usize },
}

impl Error {
    pub(crate) fn native(operation: &'static str, path: &str, source: NativeError) -> Self {
        Self::Native {
            operation,
            path: path.to_owned(),
            source,
        }
    }

    /// Returns the native error behind this error, if any.
    pub fn native_error(&self) -> Option<NativeError> {
        match self {
            Self::Native { source, .. } => Some(*source),
            Self::Attribute(
                AttrError::Query { source, .. }
                | AttrError::Set { source, .. }
                | AttrError::QueryInfo(source)
                | AttrError::SetInfo(source),
            ) => Some(*source),
            _ => None,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.native_error().is_some_and(|e| e.is_already_exists())
    }

    pub fn is_not_found(&self) -> bool {
        self.native_error().is_some_and(|e| e.is_not_found())
    }
}
