// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`NativeFs`] on NTFS, through the NT and Win32 APIs.

#![expect(unsafe_code)]

use crate::native::check_status;
use crate::native::FileBasicInfo;
use crate::native::NativeError;
use crate::native::NativeFs;
use crate::native::OpenMode;
use crate::native::Trustee;
use crate::native::STATUS_INVALID_PARAMETER;
use crate::reparse::MAXIMUM_REPARSE_DATA_BUFFER_SIZE;
use ntapi::ntioapi;
use ntapi::ntrtl;
use std::ffi;
use std::fs;
use std::fs::File;
use std::mem;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::ptr;
use winapi::shared::minwindef::DWORD;
use winapi::shared::ntdef;
use winapi::shared::winerror;
use winapi::um::accctrl;
use winapi::um::aclapi;
use winapi::um::winbase;
use winapi::um::winioctl;
use winapi::um::winnt;

/// Case sensitivity was introduced alongside WslFs, in Windows 10 1809.
const WSLFS_MINIMUM_BUILD: u32 = 17763;

const FILE_CS_FLAG_CASE_SENSITIVE_DIR: u32 = 0x1;

const SHARE_ALL: u32 = winnt::FILE_SHARE_READ | winnt::FILE_SHARE_WRITE | winnt::FILE_SHARE_DELETE;

// Attribute and security descriptor updates on an existing entry.
const BACKUP_ACCESS: u32 = winnt::GENERIC_READ
    | winnt::FILE_WRITE_ATTRIBUTES
    | winnt::FILE_WRITE_EA
    | winnt::READ_CONTROL
    | winnt::WRITE_DAC;

// Attribute and security descriptor queries, which need no write access.
const BACKUP_READ_ACCESS: u32 =
    winnt::FILE_READ_ATTRIBUTES | winnt::FILE_READ_EA | winnt::READ_CONTROL;

/// The Windows implementation of [`NativeFs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsFs;

impl WindowsFs {
    pub fn new() -> Self {
        Self
    }
}

fn raw_handle(file: &File) -> winnt::HANDLE {
    file.as_raw_handle().cast()
}

/// Maps a file information struct to the class passed to
/// `NtQueryInformationFile` and `NtSetInformationFile`.
trait FileInformationClass: Sized {
    fn file_information_class() -> ntioapi::FILE_INFORMATION_CLASS;

    fn as_ptr_len(&self) -> (*const u8, usize) {
        (ptr::from_ref::<Self>(self).cast::<u8>(), size_of::<Self>())
    }

    fn as_ptr_len_mut(&mut self) -> (*mut u8, usize) {
        (ptr::from_mut::<Self>(self).cast::<u8>(), size_of::<Self>())
    }
}

impl FileInformationClass for ntioapi::FILE_BASIC_INFORMATION {
    fn file_information_class() -> ntioapi::FILE_INFORMATION_CLASS {
        ntioapi::FileBasicInformation
    }
}

impl FileInformationClass for ntioapi::FILE_CASE_SENSITIVE_INFORMATION {
    fn file_information_class() -> ntioapi::FILE_INFORMATION_CLASS {
        ntioapi::FileCaseSensitiveInformation
    }
}

impl FileInformationClass for ntioapi::FILE_INTERNAL_INFORMATION {
    fn file_information_class() -> ntioapi::FILE_INFORMATION_CLASS {
        ntioapi::FileInternalInformation
    }
}

fn buffer_len(len: usize) -> Result<u32, NativeError> {
    len.try_into()
        .map_err(|_| NativeError::Status(STATUS_INVALID_PARAMETER))
}

fn query_information_file<T: FileInformationClass>(file: &File) -> Result<T, NativeError> {
    // SAFETY: The information classes used here are plain data.
    let mut info: T = unsafe { mem::zeroed() };
    let (buf, len) = info.as_ptr_len_mut();
    let len = buffer_len(len)?;

    // SAFETY: Calling NtQueryInformationFile as documented, with a buffer the
    // size of the class's struct.
    unsafe {
        let mut iosb = mem::zeroed();
        check_status(ntioapi::NtQueryInformationFile(
            raw_handle(file),
            &mut iosb,
            buf.cast(),
            len,
            T::file_information_class(),
        ))?;
    }

    Ok(info)
}

fn set_information_file<T: FileInformationClass>(file: &File, info: &T) -> Result<(), NativeError> {
    let (buf, len) = info.as_ptr_len();
    let len = buffer_len(len)?;

    // SAFETY: Calling NtSetInformationFile as documented. The buffer is only
    // read.
    unsafe {
        let mut iosb = mem::zeroed();
        check_status(ntioapi::NtSetInformationFile(
            raw_handle(file),
            &mut iosb,
            buf.cast_mut().cast(),
            len,
            T::file_information_class(),
        ))
    }
}

fn large_integer(value: &ntdef::LARGE_INTEGER) -> i64 {
    // SAFETY: Every bit pattern is a valid i64.
    unsafe { *value.QuadPart() }
}

fn set_large_integer(target: &mut ntdef::LARGE_INTEGER, value: i64) {
    // SAFETY: Writing the full width of the union.
    unsafe { *target.QuadPart_mut() = value }
}

/// Frees a buffer allocated by the security APIs.
struct LocalFreeGuard(*mut ffi::c_void);

impl Drop for LocalFreeGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: The pointer was allocated with LocalAlloc by the API that
            // returned it and is freed once.
            unsafe { winbase::LocalFree(self.0.cast()) };
        }
    }
}

fn check_win32(code: DWORD) -> Result<(), NativeError> {
    if code == winerror::ERROR_SUCCESS {
        Ok(())
    } else {
        Err(NativeError::Win32(code))
    }
}

impl NativeFs for WindowsFs {
    type File = File;

    fn open(&self, path: &str, mode: OpenMode) -> Result<File, NativeError> {
        let mut options = fs::OpenOptions::new();
        options.share_mode(SHARE_ALL);
        match mode {
            OpenMode::CreateNew => {
                options
                    .write(true)
                    .create_new(true)
                    .access_mode(winnt::GENERIC_READ | winnt::GENERIC_WRITE)
                    .custom_flags(winbase::FILE_FLAG_OPEN_REPARSE_POINT);
            }
            OpenMode::Existing => {
                options
                    .read(true)
                    .access_mode(winnt::GENERIC_READ)
                    .custom_flags(winbase::FILE_FLAG_OPEN_REPARSE_POINT);
            }
            OpenMode::Backup => {
                options.read(true).access_mode(BACKUP_ACCESS).custom_flags(
                    winbase::FILE_FLAG_BACKUP_SEMANTICS | winbase::FILE_FLAG_OPEN_REPARSE_POINT,
                );
            }
            OpenMode::BackupRead => {
                options.read(true).access_mode(BACKUP_READ_ACCESS).custom_flags(
                    winbase::FILE_FLAG_BACKUP_SEMANTICS | winbase::FILE_FLAG_OPEN_REPARSE_POINT,
                );
            }
        }

        Ok(options.open(path)?)
    }

    fn create_directory(&self, path: &str) -> Result<(), NativeError> {
        Ok(fs::create_dir(path)?)
    }

    fn create_hard_link(&self, link: &str, target: &str) -> Result<(), NativeError> {
        Ok(fs::hard_link(target, link)?)
    }

    fn query_ea(&self, file: &File, ea_list: &[u8], buffer: &mut [u8]) -> Result<(), NativeError> {
        let list_len = buffer_len(ea_list.len())?;
        let len = buffer_len(buffer.len())?;

        // SAFETY: Calling NtQueryEaFile as documented. The EA list is only
        // read and the output buffer is valid for its length.
        unsafe {
            let mut iosb = mem::zeroed();
            check_status(ntioapi::NtQueryEaFile(
                raw_handle(file),
                &mut iosb,
                buffer.as_mut_ptr().cast(),
                len,
                ntdef::TRUE,
                ea_list.as_ptr().cast_mut().cast(),
                list_len,
                ptr::null_mut(),
                ntdef::TRUE,
            ))
        }
    }

    fn set_ea(&self, file: &File, buffer: &[u8]) -> Result<(), NativeError> {
        let len = buffer_len(buffer.len())?;

        // SAFETY: Calling NtSetEaFile as documented. The buffer is only read.
        unsafe {
            let mut iosb = mem::zeroed();
            check_status(ntioapi::NtSetEaFile(
                raw_handle(file),
                &mut iosb,
                buffer.as_ptr().cast_mut().cast(),
                len,
            ))
        }
    }

    fn query_basic_info(&self, file: &File) -> Result<FileBasicInfo, NativeError> {
        let info = query_information_file::<ntioapi::FILE_BASIC_INFORMATION>(file)?;
        Ok(FileBasicInfo {
            creation_time: large_integer(&info.CreationTime),
            last_access_time: large_integer(&info.LastAccessTime),
            last_write_time: large_integer(&info.LastWriteTime),
            change_time: large_integer(&info.ChangeTime),
            file_attributes: info.FileAttributes,
        })
    }

    fn set_basic_info(&self, file: &File, info: &FileBasicInfo) -> Result<(), NativeError> {
        // SAFETY: FILE_BASIC_INFORMATION is plain data; zero means unchanged.
        let mut basic: ntioapi::FILE_BASIC_INFORMATION = unsafe { mem::zeroed() };
        set_large_integer(&mut basic.CreationTime, info.creation_time);
        set_large_integer(&mut basic.LastAccessTime, info.last_access_time);
        set_large_integer(&mut basic.LastWriteTime, info.last_write_time);
        set_large_integer(&mut basic.ChangeTime, info.change_time);
        basic.FileAttributes = info.file_attributes;
        set_information_file(file, &basic)
    }

    fn set_case_sensitive(&self, file: &File, enable: bool) -> Result<(), NativeError> {
        let info = ntioapi::FILE_CASE_SENSITIVE_INFORMATION {
            Flags: if enable {
                FILE_CS_FLAG_CASE_SENSITIVE_DIR
            } else {
                0
            },
        };

        set_information_file(file, &info)
    }

    fn grant_delete_child(&self, file: &File, trustee: &Trustee) -> Result<(), NativeError> {
        let name = widestring::U16CString::from_str(trustee.to_string())
            .map_err(|_| NativeError::Status(STATUS_INVALID_PARAMETER))?;

        let mut dacl = ptr::null_mut();
        let mut descriptor = ptr::null_mut();

        // SAFETY: Calling GetSecurityInfo as documented. The returned DACL
        // points into the descriptor, which is freed by the guard.
        let _descriptor = unsafe {
            check_win32(aclapi::GetSecurityInfo(
                raw_handle(file),
                accctrl::SE_FILE_OBJECT,
                winnt::DACL_SECURITY_INFORMATION,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut dacl,
                ptr::null_mut(),
                &mut descriptor,
            ))?;

            LocalFreeGuard(descriptor.cast())
        };

        // SAFETY: EXPLICIT_ACCESS_W is plain data, filled in below.
        let mut access: accctrl::EXPLICIT_ACCESS_W = unsafe { mem::zeroed() };
        let mut new_dacl = ptr::null_mut();

        // SAFETY: The trustee name outlives the explicit access entry, which is
        // only used by SetEntriesInAclW below. The new ACL is freed by the
        // guard after it is applied.
        let _new_dacl = unsafe {
            aclapi::BuildExplicitAccessWithNameW(
                &mut access,
                name.as_ptr().cast_mut(),
                winnt::FILE_DELETE_CHILD,
                accctrl::GRANT_ACCESS,
                winnt::CONTAINER_INHERIT_ACE.into(),
            );

            check_win32(aclapi::SetEntriesInAclW(
                1,
                &mut access,
                dacl,
                &mut new_dacl,
            ))?;

            LocalFreeGuard(new_dacl.cast())
        };

        // SAFETY: Calling SetSecurityInfo as documented with the ACL built
        // above.
        unsafe {
            check_win32(aclapi::SetSecurityInfo(
                raw_handle(file),
                accctrl::SE_FILE_OBJECT,
                winnt::DACL_SECURITY_INFORMATION,
                ptr::null_mut(),
                ptr::null_mut(),
                new_dacl,
                ptr::null_mut(),
            ))
        }
    }

    fn set_reparse_point(&self, file: &File, buffer: &[u8]) -> Result<(), NativeError> {
        let len = buffer_len(buffer.len())?;

        // SAFETY: Calling NtFsControlFile as documented. The input buffer is
        // only read.
        unsafe {
            let mut iosb = mem::zeroed();
            check_status(ntioapi::NtFsControlFile(
                raw_handle(file),
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                &mut iosb,
                winioctl::FSCTL_SET_REPARSE_POINT,
                buffer.as_ptr().cast_mut().cast(),
                len,
                ptr::null_mut(),
                0,
            ))
        }
    }

    fn get_reparse_point(&self, file: &File) -> Result<Vec<u8>, NativeError> {
        let mut buffer = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE];
        let len = buffer_len(buffer.len())?;

        // SAFETY: Calling NtFsControlFile as documented. The output buffer is
        // valid for its length.
        let written = unsafe {
            let mut iosb: ntioapi::IO_STATUS_BLOCK = mem::zeroed();
            check_status(ntioapi::NtFsControlFile(
                raw_handle(file),
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                &mut iosb,
                winioctl::FSCTL_GET_REPARSE_POINT,
                ptr::null_mut(),
                0,
                buffer.as_mut_ptr().cast(),
                len,
            ))?;

            iosb.Information
        };

        buffer.truncate(written);
        Ok(buffer)
    }

    fn file_id(&self, file: &File) -> Result<u64, NativeError> {
        let info = query_information_file::<ntioapi::FILE_INTERNAL_INFORMATION>(file)?;
        Ok(large_integer(&info.IndexNumber) as u64)
    }

    fn supports_wslfs(&self) -> bool {
        // SAFETY: RTL_OSVERSIONINFOW is plain data.
        let mut version: winnt::RTL_OSVERSIONINFOW = unsafe { mem::zeroed() };
        version.dwOSVersionInfoSize = size_of::<winnt::RTL_OSVERSIONINFOW>() as u32;

        // SAFETY: Calling RtlGetVersion with a sized version struct.
        let status = unsafe { ntrtl::RtlGetVersion(&mut version) };
        if let Err(err) = check_status(status) {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "failed to query the OS version"
            );
            return false;
        }

        version.dwBuildNumber >= WSLFS_MINIMUM_BUILD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatKind;
    use crate::RootFs;
    use crate::RootFsOptions;
    use crate::UnixAttr;
    use std::io::Write;

    struct TestEnv {
        _dir: tempfile::TempDir,
        rootfs: RootFs<WindowsFs>,
    }

    impl TestEnv {
        fn new(format: FormatKind) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("root");
            let mut options = RootFsOptions::new();
            // Temporary directories may live on a volume without per-directory
            // case sensitivity.
            options.case_sensitive_dirs(false);
            let rootfs =
                RootFs::create(WindowsFs::new(), root.to_str().unwrap(), Some(format), &options)
                    .unwrap();

            Self { _dir: dir, rootfs }
        }
    }

    #[test]
    fn file_round_trip() {
        for format in [FormatKind::LxFs, FormatKind::WslFs] {
            let env = TestEnv::new(format);
            let attr = UnixAttr::new(0o100644, 1000, 1000);
            let mut file = env.rootfs.create_file("/a:b", &attr).unwrap();
            file.write_all(b"data").unwrap();
            drop(file);

            let read = env.rootfs.get_attr("/a:b").unwrap();
            assert_eq!((read.mode, read.uid, read.gid), (0o100644, 1000, 1000));
        }
    }

    #[test]
    fn wslfs_symlink() {
        let env = TestEnv::new(FormatKind::WslFs);
        env.rootfs
            .create_symlink("/link", "target", &UnixAttr::new(0o120777, 0, 0))
            .unwrap();
        assert_eq!(env.rootfs.read_symlink("/link").unwrap(), "target");
    }

    #[test]
    fn hard_link_ids() {
        let env = TestEnv::new(FormatKind::LxFs);
        drop(
            env.rootfs
                .create_file("/t", &UnixAttr::new(0o100644, 0, 0))
                .unwrap(),
        );
        env.rootfs.create_hard_link("/l", "/t").unwrap();
        assert!(env.rootfs.same_file("/l", "/t").unwrap());
    }
}
