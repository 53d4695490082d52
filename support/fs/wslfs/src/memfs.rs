// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory model of the NTFS behavior the translation layer relies on.
//!
//! Extended attributes, reparse points, hard links and the per-directory case
//! sensitivity flag behave as they do on NTFS, including the status codes
//! returned on failure. Directories can be set up to deny the case
//! sensitivity flag, the way a restrictive ACL does.

use crate::ea;
use crate::native::FileBasicInfo;
use crate::native::NativeError;
use crate::native::NativeFs;
use crate::native::OpenMode;
use crate::native::Trustee;
use crate::native::STATUS_ACCESS_DENIED;
use crate::native::STATUS_BUFFER_OVERFLOW;
use crate::native::STATUS_EAS_NOT_SUPPORTED;
use crate::native::STATUS_INVALID_PARAMETER;
use crate::native::STATUS_IO_REPARSE_DATA_INVALID;
use crate::native::STATUS_NO_EAS_ON_FILE;
use crate::native::STATUS_NOT_A_REPARSE_POINT;
use crate::native::STATUS_OBJECT_NAME_COLLISION;
use crate::native::STATUS_OBJECT_NAME_NOT_FOUND;
use crate::native::STATUS_OBJECT_PATH_NOT_FOUND;
use crate::reparse;
use crate::time::UnixTime;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

const STATUS_FILE_IS_A_DIRECTORY: i32 = 0xC000_00BA_u32 as i32;

const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;

/// The number of characters in `\\?\`, whose separators do not delimit
/// directories.
const PREFIX_LEN: usize = 4;

/// Controls whether a directory accepts the case sensitivity flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CaseSensitivityPolicy {
    #[default]
    Allowed,
    /// Denied until some trustee is granted the delete child right.
    DeniedUntilGranted,
    /// Always denied.
    Denied,
}

#[derive(Debug)]
struct Node {
    directory: bool,
    data: Vec<u8>,
    eas: BTreeMap<String, Vec<u8>>,
    basic: FileBasicInfo,
    reparse: Option<Vec<u8>>,
    case_sensitive: bool,
    case_policy: CaseSensitivityPolicy,
    grants: Vec<Trustee>,
    read_only: bool,
}

impl Node {
    fn new(directory: bool) -> Self {
        let now = UnixTime::now().to_nt();
        Self {
            directory,
            data: Vec::new(),
            eas: BTreeMap::new(),
            basic: FileBasicInfo {
                creation_time: now,
                last_access_time: now,
                last_write_time: now,
                change_time: now,
                file_attributes: if directory {
                    FILE_ATTRIBUTE_DIRECTORY
                } else {
                    FILE_ATTRIBUTE_ARCHIVE
                },
            },
            reparse: None,
            case_sensitive: false,
            case_policy: CaseSensitivityPolicy::Allowed,
            grants: Vec::new(),
            read_only: false,
        }
    }
}

#[derive(Debug)]
struct State {
    names: BTreeMap<String, usize>,
    nodes: Vec<Node>,
    supports_wslfs: bool,
    fail_ea_queries: bool,
}

impl State {
    fn lookup(&self, path: &str) -> Result<usize, NativeError> {
        self.names
            .get(path)
            .copied()
            .ok_or(NativeError::Status(STATUS_OBJECT_NAME_NOT_FOUND))
    }

    /// Checks that `path` can be created.
    fn check_new(&self, path: &str) -> Result<(), NativeError> {
        if self.names.contains_key(path) {
            return Err(NativeError::Status(STATUS_OBJECT_NAME_COLLISION));
        }

        let parent = match path.rfind('\\') {
            Some(i) if i >= PREFIX_LEN => &path[..i],
            _ => return Ok(()),
        };

        match self.names.get(parent) {
            Some(&node) if self.nodes[node].directory => Ok(()),
            _ => Err(NativeError::Status(STATUS_OBJECT_PATH_NOT_FOUND)),
        }
    }

    fn insert(&mut self, path: &str, directory: bool) -> usize {
        let node = self.nodes.len();
        self.nodes.push(Node::new(directory));
        self.names.insert(path.to_owned(), node);
        node
    }
}

/// An in-memory [`NativeFs`].
///
/// Clones share the same file tree.
#[derive(Debug, Clone)]
pub struct MemFs {
    state: Arc<Mutex<State>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

/// An open file in a [`MemFs`].
#[derive(Debug)]
pub struct MemFile {
    fs: MemFs,
    node: usize,
    position: usize,
    /// Whether data, attributes, reparse data and the ACL may be changed
    /// through this handle.
    writable: bool,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                names: BTreeMap::new(),
                nodes: Vec::new(),
                supports_wslfs: true,
                fail_ea_queries: false,
            })),
        }
    }

    /// Sets whether new roots should use WslFs.
    pub fn set_supports_wslfs(&self, supported: bool) {
        self.state.lock().supports_wslfs = supported;
    }

    /// Makes every extended attribute query fail with an I/O status.
    pub fn fail_ea_queries(&self, fail: bool) {
        self.state.lock().fail_ea_queries = fail;
    }

    /// Creates a directory and all of its missing parents.
    pub fn create_dir_all(&self, path: &str) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        let ends = path
            .match_indices('\\')
            .map(|(i, _)| i)
            .filter(|&i| i > PREFIX_LEN)
            .chain(std::iter::once(path.len()));

        for end in ends {
            let dir = &path[..end];
            match state.names.get(dir) {
                Some(&node) if state.nodes[node].directory => {}
                Some(_) => return Err(NativeError::Status(STATUS_OBJECT_NAME_COLLISION)),
                None => {
                    state.insert(dir, true);
                }
            }
        }

        Ok(())
    }

    /// Makes an entry readable but not writable by the caller, the way an ACL
    /// granting only read access does.
    pub fn set_read_only(&self, path: &str, read_only: bool) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        let node = state.lookup(path)?;
        state.nodes[node].read_only = read_only;
        Ok(())
    }

    /// Sets the case sensitivity policy of an existing directory.
    pub fn set_case_sensitivity_policy(
        &self,
        path: &str,
        policy: CaseSensitivityPolicy,
    ) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        let node = state.lookup(path)?;
        state.nodes[node].case_policy = policy;
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().names.contains_key(path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        let state = self.state.lock();
        state
            .names
            .get(path)
            .is_some_and(|&node| state.nodes[node].directory)
    }

    /// Returns the data of a file.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let &node = state.names.get(path)?;
        Some(state.nodes[node].data.clone())
    }

    /// Returns whether a directory has the case sensitivity flag set.
    pub fn is_case_sensitive(&self, path: &str) -> Option<bool> {
        let state = self.state.lock();
        let &node = state.names.get(path)?;
        Some(state.nodes[node].case_sensitive)
    }

    /// Returns the trustees granted the delete child right on a directory.
    pub fn grants(&self, path: &str) -> Vec<Trustee> {
        let state = self.state.lock();
        state
            .names
            .get(path)
            .map(|&node| state.nodes[node].grants.clone())
            .unwrap_or_default()
    }

    fn with_node<R>(
        &self,
        file: &MemFile,
        f: impl FnOnce(&mut Node) -> Result<R, NativeError>,
    ) -> Result<R, NativeError> {
        let mut state = self.state.lock();
        f(&mut state.nodes[file.node])
    }

    /// Runs `f` on the node of a handle opened for metadata writes.
    fn with_writable_node<R>(
        &self,
        file: &MemFile,
        f: impl FnOnce(&mut Node) -> Result<R, NativeError>,
    ) -> Result<R, NativeError> {
        if !file.writable {
            return Err(NativeError::Status(STATUS_ACCESS_DENIED));
        }

        self.with_node(file, f)
    }

    fn with_directory<R>(
        &self,
        file: &MemFile,
        f: impl FnOnce(&mut Node) -> Result<R, NativeError>,
    ) -> Result<R, NativeError> {
        self.with_writable_node(file, |node| {
            if !node.directory {
                return Err(NativeError::Status(STATUS_INVALID_PARAMETER));
            }

            f(node)
        })
    }
}

impl NativeFs for MemFs {
    type File = MemFile;

    fn open(&self, path: &str, mode: OpenMode) -> Result<MemFile, NativeError> {
        let mut state = self.state.lock();
        let (node, writable) = match mode {
            OpenMode::CreateNew => {
                state.check_new(path)?;
                (state.insert(path, false), true)
            }
            OpenMode::Existing => {
                let node = state.lookup(path)?;
                if state.nodes[node].directory {
                    return Err(NativeError::Status(STATUS_FILE_IS_A_DIRECTORY));
                }

                (node, false)
            }
            OpenMode::Backup => {
                let node = state.lookup(path)?;
                if state.nodes[node].read_only {
                    return Err(NativeError::Status(STATUS_ACCESS_DENIED));
                }

                (node, true)
            }
            OpenMode::BackupRead => (state.lookup(path)?, false),
        };

        Ok(MemFile {
            fs: self.clone(),
            node,
            position: 0,
            writable,
        })
    }

    fn create_directory(&self, path: &str) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.check_new(path)?;
        state.insert(path, true);
        Ok(())
    }

    fn create_hard_link(&self, link: &str, target: &str) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        let node = state.lookup(target)?;
        if state.nodes[node].directory {
            return Err(NativeError::Status(STATUS_FILE_IS_A_DIRECTORY));
        }

        state.check_new(link)?;
        state.names.insert(link.to_owned(), node);
        Ok(())
    }

    fn query_ea(
        &self,
        file: &MemFile,
        ea_list: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), NativeError> {
        if self.state.lock().fail_ea_queries {
            return Err(NativeError::Status(STATUS_EAS_NOT_SUPPORTED));
        }

        let names = ea::parse_get_ea_list(ea_list)
            .map_err(|_| NativeError::Status(STATUS_INVALID_PARAMETER))?;
        let name = names
            .first()
            .ok_or(NativeError::Status(STATUS_INVALID_PARAMETER))?
            .to_ascii_uppercase();

        let value = self.with_node(file, |node| {
            if node.eas.is_empty() {
                return Err(NativeError::Status(STATUS_NO_EAS_ON_FILE));
            }

            Ok(node.eas.get(&name).cloned().unwrap_or_default())
        })?;

        // NTFS returns a missing attribute as an entry with no value.
        let result = ea::full_ea_buffer(&[(name.as_str(), value.as_slice())])
            .map_err(|_| NativeError::Status(STATUS_INVALID_PARAMETER))?;

        let out = buffer
            .get_mut(..result.len())
            .ok_or(NativeError::Status(STATUS_BUFFER_OVERFLOW))?;

        out.copy_from_slice(&result);
        Ok(())
    }

    fn set_ea(&self, file: &MemFile, buffer: &[u8]) -> Result<(), NativeError> {
        let entries =
            ea::parse_full_ea(buffer).map_err(|_| NativeError::Status(STATUS_INVALID_PARAMETER))?;

        self.with_writable_node(file, |node| {
            for entry in entries {
                let name = entry.name.to_ascii_uppercase();
                if entry.value.is_empty() {
                    node.eas.remove(&name);
                } else {
                    node.eas.insert(name, entry.value.to_vec());
                }
            }

            Ok(())
        })
    }

    fn query_basic_info(&self, file: &MemFile) -> Result<FileBasicInfo, NativeError> {
        self.with_node(file, |node| Ok(node.basic))
    }

    fn set_basic_info(&self, file: &MemFile, info: &FileBasicInfo) -> Result<(), NativeError> {
        fn update<T: Default + PartialEq + Copy>(current: &mut T, new: T) {
            if new != T::default() {
                *current = new;
            }
        }

        self.with_writable_node(file, |node| {
            let basic = &mut node.basic;
            update(&mut basic.creation_time, info.creation_time);
            update(&mut basic.last_access_time, info.last_access_time);
            update(&mut basic.last_write_time, info.last_write_time);
            update(&mut basic.change_time, info.change_time);
            update(&mut basic.file_attributes, info.file_attributes);
            Ok(())
        })
    }

    fn set_case_sensitive(&self, file: &MemFile, enable: bool) -> Result<(), NativeError> {
        self.with_directory(file, |node| {
            let denied = match node.case_policy {
                CaseSensitivityPolicy::Allowed => false,
                CaseSensitivityPolicy::DeniedUntilGranted => node.grants.is_empty(),
                CaseSensitivityPolicy::Denied => true,
            };

            if denied {
                return Err(NativeError::Status(STATUS_ACCESS_DENIED));
            }

            node.case_sensitive = enable;
            Ok(())
        })
    }

    fn grant_delete_child(&self, file: &MemFile, trustee: &Trustee) -> Result<(), NativeError> {
        self.with_directory(file, |node| {
            node.grants.push(trustee.clone());
            Ok(())
        })
    }

    fn set_reparse_point(&self, file: &MemFile, buffer: &[u8]) -> Result<(), NativeError> {
        let (_, data) = reparse::parse_reparse_buffer(buffer)
            .map_err(|_| NativeError::Status(STATUS_IO_REPARSE_DATA_INVALID))?;

        if buffer.len() != reparse::REPARSE_DATA_BUFFER_HEADER_SIZE + data.len()
            || buffer.len() > reparse::MAXIMUM_REPARSE_DATA_BUFFER_SIZE
        {
            return Err(NativeError::Status(STATUS_IO_REPARSE_DATA_INVALID));
        }

        self.with_writable_node(file, |node| {
            node.reparse = Some(buffer.to_vec());
            Ok(())
        })
    }

    fn get_reparse_point(&self, file: &MemFile) -> Result<Vec<u8>, NativeError> {
        self.with_node(file, |node| {
            node.reparse
                .clone()
                .ok_or(NativeError::Status(STATUS_NOT_A_REPARSE_POINT))
        })
    }

    fn file_id(&self, file: &MemFile) -> Result<u64, NativeError> {
        Ok(file.node as u64)
    }

    fn supports_wslfs(&self) -> bool {
        self.state.lock().supports_wslfs
    }
}

impl io::Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.fs.state.lock();
        let node = &state.nodes[self.node];
        if node.directory {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        let available = node.data.get(self.position..).unwrap_or_default();
        let len = available.len().min(buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        drop(state);
        self.position += len;
        Ok(len)
    }
}

impl io::Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::ErrorKind::PermissionDenied.into());
        }

        let mut state = self.fs.state.lock();
        let node = &mut state.nodes[self.node];
        if node.directory {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        let end = self.position + buf.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }

        node.data[self.position..end].copy_from_slice(buf);
        drop(state);
        self.position = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
