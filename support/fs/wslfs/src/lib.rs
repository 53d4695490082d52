// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The wslfs crate lays out a Linux file system tree on NTFS the way the
//! Windows Subsystem for Linux expects to find it.
//!
//! Unix modes, owners, times, symlinks and special files are stored with one
//! of the two on-disk formats used by WSL: LxFs, used by older releases of
//! Windows, and WslFs. The format of an existing root is detected from the
//! extended attributes on its root directory.
//!
//! All native calls go through a [`NativeFs`] implementation: [`WindowsFs`]
//! on Windows, or the in-memory [`memfs::MemFs`].

pub mod attr;
pub mod ea;
mod error;
pub mod format;
pub mod install;
pub mod memfs;
pub mod native;
pub mod path;
pub mod reparse;
pub mod tarball;
pub mod time;
#[cfg(windows)]
mod windows;

pub use attr::FileType;
pub use attr::UnixAttr;
pub use error::AttrError;
pub use error::Error;
pub use format::FormatKind;
pub use native::NativeError;
pub use native::NativeFs;
pub use native::Trustee;
pub use time::UnixTime;
#[cfg(windows)]
pub use windows::WindowsFs;

use format::FormatCodec;
use native::OpenMode;
use std::fmt;

/// A directory holding a WSL root filesystem.
///
/// Paths passed to the methods are absolute Unix paths within the root, such
/// as `/usr/bin/env`. They are translated to native paths with the name
/// escaping of the root's format. No handles are kept open between calls.
pub struct RootFs<N: NativeFs> {
    native: N,
    root: String,
    codec: &'static dyn FormatCodec<N>,
    options: RootFsOptions,
}

impl<N: NativeFs> fmt::Debug for RootFs<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootFs")
            .field("root", &self.root)
            .field("format", &self.format())
            .field("options", &self.options)
            .finish()
    }
}

fn check_type(
    operation: &'static str,
    attr: &UnixAttr,
    allowed: impl FnOnce(FileType) -> bool,
) -> Result<FileType, Error> {
    match attr.file_type() {
        Some(file_type) if allowed(file_type) => Ok(file_type),
        _ => Err(Error::Precondition {
            operation,
            mode: attr.mode,
        }),
    }
}

impl<N: NativeFs> RootFs<N> {
    /// Opens an existing root filesystem, detecting its format.
    ///
    /// Fails with [`Error::UnknownFormat`] if `root` is not a WSL root.
    pub fn open(native: N, root: &str, options: &RootFsOptions) -> Result<Self, Error> {
        let root = path::extended_length_path(root);
        match format::detect(&native, &root) {
            FormatKind::Invalid => Err(Error::UnknownFormat { path: root }),
            kind => {
                tracing::debug!(root, format = %kind, "opened root filesystem");
                Ok(Self::bind(native, root, kind, options))
            }
        }
    }

    /// Creates a new root filesystem.
    ///
    /// If `format` is `None`, WslFs is used when the native layer supports it
    /// and LxFs otherwise. The root directory is created if needed and given
    /// the attributes of a directory owned by root with mode `0755`.
    pub fn create(
        native: N,
        root: &str,
        format: Option<FormatKind>,
        options: &RootFsOptions,
    ) -> Result<Self, Error> {
        let kind = match format {
            Some(FormatKind::Invalid) => return Err(Error::InvalidFormat),
            Some(kind) => kind,
            None if native.supports_wslfs() => FormatKind::WslFs,
            None => FormatKind::LxFs,
        };

        let rootfs = Self::bind(native, path::extended_length_path(root), kind, options);
        let now = UnixTime::now();
        let attr = UnixAttr::new(attr::S_IFDIR | 0o755, 0, 0).with_times(now, now, now);
        rootfs.create_directory("/", &attr)?;
        tracing::info!(root = %rootfs.root, format = %kind, "created root filesystem");
        Ok(rootfs)
    }

    /// Binds to `root` with a known format, without probing it.
    ///
    /// With [`FormatKind::Invalid`] the root is a raw view: names are not
    /// escaped and only hard links can be created.
    pub fn with_format(native: N, root: &str, format: FormatKind, options: &RootFsOptions) -> Self {
        Self::bind(native, path::extended_length_path(root), format, options)
    }

    fn bind(native: N, root: String, kind: FormatKind, options: &RootFsOptions) -> Self {
        Self {
            native,
            root,
            codec: format::codec(kind),
            options: options.clone(),
        }
    }

    pub fn format(&self) -> FormatKind {
        self.codec.kind()
    }

    /// The root directory, in extended-length form.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn options(&self) -> &RootFsOptions {
        &self.options
    }

    /// Returns the native path of the Unix path `path`.
    pub fn native_path(&self, path: &str) -> String {
        path::join(&self.root, &self.codec.encode_path(path))
    }

    /// Returns the Unix path of a native path below the root, or `None` if
    /// `native` is outside the root.
    pub fn unix_path(&self, native: &str) -> Option<String> {
        let relative = native.strip_prefix(self.root.as_str())?;
        let relative = match relative.strip_prefix(path::SEPARATOR) {
            Some(relative) => relative,
            None if relative.is_empty() || self.root.ends_with(path::SEPARATOR) => relative,
            None => return None,
        };

        Some(format!("/{}", self.codec.decode_path(relative)))
    }

    fn require_format(&self) -> Result<(), Error> {
        match self.format() {
            FormatKind::Invalid => Err(Error::InvalidFormat),
            FormatKind::LxFs | FormatKind::WslFs => Ok(()),
        }
    }

    fn open_native(&self, path: &str, mode: OpenMode) -> Result<(String, N::File), Error> {
        let native_path = self.native_path(path);
        let file = self
            .native
            .open(&native_path, mode)
            .map_err(|err| Error::native("open", &native_path, err))?;

        Ok((native_path, file))
    }

    /// Reads the Unix attributes of any entry, including directories.
    pub fn get_attr(&self, path: &str) -> Result<UnixAttr, Error> {
        let (_, file) = self.open_native(path, OpenMode::BackupRead)?;
        self.codec.get_attr(&self.native, &file)
    }

    /// Replaces the Unix attributes of any entry, including directories.
    pub fn set_attr(&self, path: &str, attr: &UnixAttr) -> Result<(), Error> {
        let (_, file) = self.open_native(path, OpenMode::Backup)?;
        self.codec.set_attr(&self.native, &file, attr)
    }

    /// Creates a new non-directory entry and sets its attributes.
    ///
    /// Fails if the name already exists, even if it is a reparse point. The
    /// returned handle is open for writing the file's data.
    pub fn create_file(&self, path: &str, attr: &UnixAttr) -> Result<N::File, Error> {
        let file_type = check_type("create_file", attr, |t| t != FileType::Directory)?;
        self.require_format()?;
        let (native_path, file) = self.open_native(path, OpenMode::CreateNew)?;
        self.codec.set_attr(&self.native, &file, attr)?;
        self.codec
            .mark_special(&self.native, &file, &native_path, file_type)?;

        Ok(file)
    }

    /// Opens an existing entry for reading. Reparse points are not followed.
    pub fn open_file(&self, path: &str) -> Result<N::File, Error> {
        let (_, file) = self.open_native(path, OpenMode::Existing)?;
        Ok(file)
    }

    /// Creates a directory, or updates one that already exists, and makes it
    /// case sensitive.
    ///
    /// Fails with an "already exists" error if the name is taken by something
    /// other than a directory.
    pub fn create_directory(&self, path: &str, attr: &UnixAttr) -> Result<(), Error> {
        check_type("create_directory", attr, |t| t == FileType::Directory)?;
        self.require_format()?;
        let native_path = self.native_path(path);
        match self.native.create_directory(&native_path) {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(Error::native("create directory", &native_path, err)),
        }

        let dir = self
            .native
            .open(&native_path, OpenMode::Backup)
            .map_err(|err| Error::native("open", &native_path, err))?;

        let info = self
            .native
            .query_basic_info(&dir)
            .map_err(|err| Error::native("query the attributes of", &native_path, err))?;

        if info.file_attributes & native::FILE_ATTRIBUTE_DIRECTORY == 0 {
            return Err(Error::native(
                "create directory",
                &native_path,
                NativeError::Status(native::STATUS_OBJECT_NAME_COLLISION),
            ));
        }

        self.codec.set_attr(&self.native, &dir, attr)?;
        if self.options.case_sensitive_dirs {
            self.set_case_sensitive(&dir, &native_path)?;
        }

        Ok(())
    }

    /// Sets the case sensitivity flag. If the directory's ACL denies it, the
    /// configured trustee is granted the delete child right and the flag is
    /// set once more.
    fn set_case_sensitive(&self, dir: &N::File, native_path: &str) -> Result<(), Error> {
        match self.native.set_case_sensitive(dir, true) {
            Ok(()) => return Ok(()),
            Err(err) if err.is_access_denied() => {}
            Err(err) => return Err(Error::native("set case sensitivity on", native_path, err)),
        }

        tracing::debug!(
            path = native_path,
            trustee = %self.options.trustee,
            "granting delete child access to set case sensitivity"
        );

        self.native
            .grant_delete_child(dir, &self.options.trustee)
            .map_err(|err| Error::native("update the ACL of", native_path, err))?;

        self.native
            .set_case_sensitive(dir, true)
            .map_err(|err| Error::native("set case sensitivity on", native_path, err))
    }

    /// Creates a symlink at `path` pointing to `target`.
    pub fn create_symlink(&self, path: &str, target: &str, attr: &UnixAttr) -> Result<(), Error> {
        check_type("create_symlink", attr, |t| t == FileType::Symlink)?;
        self.require_format()?;
        let mut file = self.create_file(path, attr)?;
        let native_path = self.native_path(path);
        self.codec
            .write_symlink(&self.native, &mut file, &native_path, target)
    }

    /// Returns the target of the symlink at `path`.
    pub fn read_symlink(&self, path: &str) -> Result<String, Error> {
        let (native_path, mut file) = self.open_native(path, OpenMode::Existing)?;
        self.codec
            .read_symlink(&self.native, &mut file, &native_path)
    }

    /// Creates `path` as a hard link to the existing file `target`.
    pub fn create_hard_link(&self, path: &str, target: &str) -> Result<(), Error> {
        let native_path = self.native_path(path);
        let native_target = self.native_path(target);
        self.native
            .create_hard_link(&native_path, &native_target)
            .map_err(|err| Error::native("create hard link", &native_path, err))
    }

    /// Returns whether two paths name the same underlying file.
    pub fn same_file(&self, a: &str, b: &str) -> Result<bool, Error> {
        let (path_a, a) = self.open_native(a, OpenMode::BackupRead)?;
        let (path_b, b) = self.open_native(b, OpenMode::BackupRead)?;
        let id_a = self
            .native
            .file_id(&a)
            .map_err(|err| Error::native("query the file id of", &path_a, err))?;
        let id_b = self
            .native
            .file_id(&b)
            .map_err(|err| Error::native("query the file id of", &path_b, err))?;

        Ok(id_a == id_b)
    }
}

/// Options controlling how a [`RootFs`] creates entries.
#[derive(Debug, Clone)]
pub struct RootFsOptions {
    case_sensitive_dirs: bool,
    trustee: Trustee,
}

impl Default for RootFsOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RootFsOptions {
    /// Creates options with case sensitive directories, patching ACLs for the
    /// current user when needed.
    pub fn new() -> Self {
        Self {
            case_sensitive_dirs: true,
            trustee: Trustee::CurrentUser,
        }
    }

    /// Parses a semicolon separated list of options of the form
    /// `case=dir;trustee=BUILTIN\Users`.
    ///
    /// Unrecognized options are logged and ignored.
    pub fn from_option_string(option_string: &str) -> Self {
        let mut options = Self::new();
        for next in option_string.split(';') {
            if next.is_empty() {
                continue;
            }

            let (keyword, value) = match next.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (next, None),
            };

            match keyword {
                "case" => match value {
                    Some("dir") => {
                        options.case_sensitive_dirs(true);
                    }
                    Some("off") => {
                        options.case_sensitive_dirs(false);
                    }
                    Some(value) => tracing::warn!(value, "Unrecognized 'case' option"),
                    None => tracing::warn!("'case' option requires value"),
                },
                "trustee" => match value {
                    Some("") | None => tracing::warn!("'trustee' option requires value"),
                    Some(value) if value.eq_ignore_ascii_case("CURRENT_USER") => {
                        options.trustee(Trustee::CurrentUser);
                    }
                    Some(value) => {
                        options.trustee(Trustee::Name(value.to_owned()));
                    }
                },
                _ => tracing::warn!(keyword, "Unrecognized option"),
            }
        }

        options
    }

    /// Set whether new directories are made case sensitive.
    pub fn case_sensitive_dirs(&mut self, case_sensitive_dirs: bool) -> &mut Self {
        self.case_sensitive_dirs = case_sensitive_dirs;
        self
    }

    /// Set the principal granted access when a directory's ACL blocks setting
    /// its case sensitivity.
    pub fn trustee(&mut self, trustee: Trustee) -> &mut Self {
        self.trustee = trustee;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::S_IFCHR;
    use crate::attr::S_IFDIR;
    use crate::attr::S_IFIFO;
    use crate::attr::S_IFLNK;
    use crate::attr::S_IFREG;
    use crate::memfs::CaseSensitivityPolicy;
    use crate::memfs::MemFs;
    use crate::reparse::LxSymlinkTarget;
    use std::io::Read;
    use std::io::Write;

    const ROOT: &str = r"C:\wsl\distro";
    const NATIVE_ROOT: &str = r"\\?\C:\wsl\distro";

    struct TestEnv {
        fs: MemFs,
        rootfs: RootFs<MemFs>,
    }

    impl TestEnv {
        fn new(format: FormatKind) -> Self {
            Self::with_options(format, &RootFsOptions::new())
        }

        fn with_options(format: FormatKind, options: &RootFsOptions) -> Self {
            let fs = MemFs::new();
            fs.create_dir_all(r"\\?\C:\wsl").unwrap();
            let rootfs = RootFs::create(fs.clone(), ROOT, Some(format), options).unwrap();
            Self { fs, rootfs }
        }

        fn native(&self, path: &str) -> String {
            self.rootfs.native_path(path)
        }
    }

    fn file_attr(mode: u32) -> UnixAttr {
        UnixAttr::new(mode, 1000, 1000).with_times(
            UnixTime::new(1_700_000_000, 100),
            UnixTime::new(1_700_000_001, 200),
            UnixTime::new(1_700_000_002, 300),
        )
    }

    #[test]
    fn create_root() {
        for format in [FormatKind::LxFs, FormatKind::WslFs] {
            let env = TestEnv::new(format);
            assert_eq!(env.rootfs.root(), NATIVE_ROOT);
            assert_eq!(env.rootfs.format(), format);
            let attr = env.rootfs.get_attr("/").unwrap();
            assert_eq!(attr.mode, S_IFDIR | 0o755);
            assert_eq!((attr.uid, attr.gid), (0, 0));
            assert_eq!(env.fs.is_case_sensitive(NATIVE_ROOT), Some(true));

            let reopened = RootFs::open(env.fs.clone(), ROOT, &RootFsOptions::new()).unwrap();
            assert_eq!(reopened.format(), format);
        }
    }

    #[test]
    fn create_picks_format() {
        let fs = MemFs::new();
        fs.create_dir_all(r"\\?\C:\a").unwrap();
        let rootfs = RootFs::create(fs.clone(), r"C:\a\new", None, &RootFsOptions::new()).unwrap();
        assert_eq!(rootfs.format(), FormatKind::WslFs);

        fs.set_supports_wslfs(false);
        let rootfs = RootFs::create(fs, r"C:\a\old", None, &RootFsOptions::new()).unwrap();
        assert_eq!(rootfs.format(), FormatKind::LxFs);
    }

    #[test]
    fn open_unknown_root() {
        let fs = MemFs::new();
        fs.create_dir_all(NATIVE_ROOT).unwrap();
        let err = RootFs::open(fs, ROOT, &RootFsOptions::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownFormat { path } if path == NATIVE_ROOT));
    }

    #[test]
    fn paths() {
        let env = TestEnv::new(FormatKind::WslFs);
        assert_eq!(env.native("/"), NATIVE_ROOT);
        assert_eq!(env.native("/a/b:c"), format!("{NATIVE_ROOT}\\a\\b\u{f03a}c"));
        assert_eq!(
            env.rootfs.unix_path(&env.native("/a/b:c")).as_deref(),
            Some("/a/b:c")
        );
        assert_eq!(env.rootfs.unix_path(NATIVE_ROOT).as_deref(), Some("/"));
        assert_eq!(env.rootfs.unix_path(r"\\?\C:\wsl\distro2\x"), None);

        let env = TestEnv::new(FormatKind::LxFs);
        assert_eq!(env.native("/a/b:c"), format!("{NATIVE_ROOT}\\a\\b#003Ac"));
    }

    #[test]
    fn create_file_round_trip() {
        for format in [FormatKind::LxFs, FormatKind::WslFs] {
            let env = TestEnv::new(format);
            let attr = file_attr(S_IFREG | 0o644);
            let mut file = env.rootfs.create_file("/hello", &attr).unwrap();
            file.write_all(b"hello world").unwrap();
            drop(file);

            assert_eq!(env.rootfs.get_attr("/hello").unwrap(), attr);
            let mut contents = String::new();
            env.rootfs
                .open_file("/hello")
                .unwrap()
                .read_to_string(&mut contents)
                .unwrap();
            assert_eq!(contents, "hello world");
        }
    }

    #[test]
    fn create_file_exists() {
        let env = TestEnv::new(FormatKind::WslFs);
        let attr = file_attr(S_IFREG | 0o644);
        env.rootfs.create_file("/f", &attr).unwrap();
        let err = env.rootfs.create_file("/f", &attr).unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
        assert!(err.is_already_exists());
    }

    #[test]
    fn create_file_rejects_modes() {
        let env = TestEnv::new(FormatKind::LxFs);
        for mode in [0o644, S_IFDIR | 0o755, 0o170644] {
            let err = env.rootfs.create_file("/x", &file_attr(mode)).unwrap_err();
            assert!(matches!(err, Error::Precondition { .. }), "{mode:o}");
        }

        assert!(!env.fs.exists(&env.native("/x")));
    }

    #[test]
    fn create_directory_twice() {
        for format in [FormatKind::LxFs, FormatKind::WslFs] {
            let env = TestEnv::new(format);
            let first = file_attr(S_IFDIR | 0o700);
            env.rootfs.create_directory("/d", &first).unwrap();

            let second = UnixAttr::new(S_IFDIR | 0o755, 5, 6);
            env.rootfs.create_directory("/d", &second).unwrap();
            assert_eq!(env.rootfs.get_attr("/d").unwrap().mode, S_IFDIR | 0o755);
            assert_eq!(env.rootfs.get_attr("/d").unwrap().uid, 5);
            assert_eq!(env.fs.is_case_sensitive(&env.native("/d")), Some(true));
        }
    }

    #[test]
    fn create_directory_over_file() {
        for case_sensitive_dirs in [false, true] {
            let mut options = RootFsOptions::new();
            options.case_sensitive_dirs(case_sensitive_dirs);
            let env = TestEnv::with_options(FormatKind::WslFs, &options);
            let attr = file_attr(S_IFREG | 0o644);
            drop(env.rootfs.create_file("/x", &attr).unwrap());

            let err = env
                .rootfs
                .create_directory("/x", &file_attr(S_IFDIR | 0o755))
                .unwrap_err();
            assert!(err.is_already_exists());
            assert!(!env.fs.is_directory(&env.native("/x")));
            assert_eq!(env.rootfs.get_attr("/x").unwrap(), attr);
        }
    }

    #[test]
    fn queries_on_read_only_root() {
        for format in [FormatKind::LxFs, FormatKind::WslFs] {
            let env = TestEnv::new(format);
            drop(env.rootfs.create_file("/f", &file_attr(S_IFREG | 0o644)).unwrap());
            env.fs.set_read_only(NATIVE_ROOT, true).unwrap();
            env.fs.set_read_only(&env.native("/f"), true).unwrap();

            let rootfs = RootFs::open(env.fs.clone(), ROOT, &RootFsOptions::new()).unwrap();
            assert_eq!(rootfs.format(), format);
            assert_eq!(rootfs.get_attr("/").unwrap().mode, S_IFDIR | 0o755);
            assert_eq!(rootfs.get_attr("/f").unwrap().mode, S_IFREG | 0o644);
            assert!(rootfs.same_file("/f", "/f").unwrap());

            let err = rootfs
                .set_attr("/f", &file_attr(S_IFREG | 0o600))
                .unwrap_err();
            assert!(err
                .native_error()
                .is_some_and(|err| err.is_access_denied()));
        }
    }

    #[test]
    fn create_directory_rejects_file_mode() {
        let env = TestEnv::new(FormatKind::WslFs);
        let err = env
            .rootfs
            .create_directory("/d", &file_attr(S_IFREG | 0o644))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Precondition {
                operation: "create_directory",
                ..
            }
        ));
    }

    #[test]
    fn create_directory_missing_parent() {
        let env = TestEnv::new(FormatKind::WslFs);
        let err = env
            .rootfs
            .create_directory("/a/b", &file_attr(S_IFDIR | 0o755))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn case_sensitivity_acl_retry() {
        let env = TestEnv::new(FormatKind::WslFs);
        let path = env.native("/locked");
        env.fs.create_directory(&path).unwrap();
        env.fs
            .set_case_sensitivity_policy(&path, CaseSensitivityPolicy::DeniedUntilGranted)
            .unwrap();

        env.rootfs
            .create_directory("/locked", &file_attr(S_IFDIR | 0o755))
            .unwrap();
        assert_eq!(env.fs.is_case_sensitive(&path), Some(true));
        assert_eq!(env.fs.grants(&path), [Trustee::CurrentUser]);
    }

    #[test]
    fn case_sensitivity_acl_retry_fails_once() {
        let mut options = RootFsOptions::new();
        options.trustee(Trustee::Name("BUILTIN\\Users".into()));
        let env = TestEnv::with_options(FormatKind::WslFs, &options);
        let path = env.native("/locked");
        env.fs.create_directory(&path).unwrap();
        env.fs
            .set_case_sensitivity_policy(&path, CaseSensitivityPolicy::Denied)
            .unwrap();

        let err = env
            .rootfs
            .create_directory("/locked", &file_attr(S_IFDIR | 0o755))
            .unwrap_err();
        assert!(err.native_error().unwrap().is_access_denied());
        assert_eq!(
            env.fs.grants(&path),
            [Trustee::Name("BUILTIN\\Users".into())]
        );
    }

    #[test]
    fn case_sensitivity_disabled() {
        let mut options = RootFsOptions::new();
        options.case_sensitive_dirs(false);
        let env = TestEnv::with_options(FormatKind::LxFs, &options);
        env.rootfs
            .create_directory("/d", &file_attr(S_IFDIR | 0o755))
            .unwrap();
        assert_eq!(env.fs.is_case_sensitive(&env.native("/d")), Some(false));
    }

    #[test]
    fn wslfs_symlink() {
        let env = TestEnv::new(FormatKind::WslFs);
        let attr = file_attr(S_IFLNK | 0o777);
        env.rootfs
            .create_symlink("/link", "../target", &attr)
            .unwrap();

        assert_eq!(env.rootfs.read_symlink("/link").unwrap(), "../target");
        assert_eq!(env.rootfs.get_attr("/link").unwrap(), attr);

        let file = env.rootfs.open_file("/link").unwrap();
        let buffer = env.fs.get_reparse_point(&file).unwrap();
        assert_eq!(&buffer[8..12], &[2, 0, 0, 0]);
        assert_eq!(
            reparse::parse_lx_symlink(&buffer).unwrap(),
            LxSymlinkTarget::Inline("../target".into())
        );
    }

    #[test]
    fn lxfs_symlink() {
        let env = TestEnv::new(FormatKind::LxFs);
        let attr = file_attr(S_IFLNK | 0o777);
        env.rootfs
            .create_symlink("/link", "/usr/bin/python3", &attr)
            .unwrap();

        assert_eq!(
            env.fs.contents(&env.native("/link")).unwrap(),
            b"/usr/bin/python3"
        );
        assert_eq!(
            env.rootfs.read_symlink("/link").unwrap(),
            "/usr/bin/python3"
        );
    }

    #[test]
    fn symlink_rejects_modes() {
        let env = TestEnv::new(FormatKind::WslFs);
        let err = env
            .rootfs
            .create_symlink("/l", "t", &file_attr(S_IFREG | 0o777))
            .unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[test]
    fn symlink_too_long() {
        let env = TestEnv::new(FormatKind::WslFs);
        let target = "a".repeat(reparse::MAXIMUM_REPARSE_DATA_BUFFER_SIZE);
        let err = env
            .rootfs
            .create_symlink("/l", &target, &file_attr(S_IFLNK | 0o777))
            .unwrap_err();
        assert!(matches!(err, Error::SymlinkTooLong { len, .. } if len == target.len()));
    }

    #[test]
    fn raw_root() {
        let env = TestEnv::new(FormatKind::WslFs);
        let raw = RootFs::with_format(
            env.fs.clone(),
            ROOT,
            FormatKind::Invalid,
            &RootFsOptions::new(),
        );
        assert_eq!(raw.native_path("/a:b"), format!("{NATIVE_ROOT}\\a:b"));
        assert!(matches!(
            raw.create_symlink("/l", "t", &file_attr(S_IFLNK | 0o777)),
            Err(Error::InvalidFormat)
        ));
        assert!(matches!(
            raw.create_file("/f", &file_attr(S_IFREG | 0o644)),
            Err(Error::InvalidFormat)
        ));
        assert!(!env.fs.exists(&env.native("/l")));
        assert!(matches!(
            RootFs::create(env.fs.clone(), ROOT, Some(FormatKind::Invalid), &RootFsOptions::new()),
            Err(Error::InvalidFormat)
        ));
    }

    #[test]
    fn hard_links() {
        for format in [FormatKind::LxFs, FormatKind::WslFs] {
            let env = TestEnv::new(format);
            let err = env.rootfs.create_hard_link("/l", "/t").unwrap_err();
            assert!(err.is_not_found());

            let attr = file_attr(S_IFREG | 0o600);
            env.rootfs.create_file("/t", &attr).unwrap();
            env.rootfs.create_hard_link("/l", "/t").unwrap();
            assert!(env.rootfs.same_file("/l", "/t").unwrap());
            assert_eq!(
                env.rootfs.get_attr("/l").unwrap(),
                env.rootfs.get_attr("/t").unwrap()
            );
        }
    }

    #[test]
    fn wslfs_special_files() {
        let env = TestEnv::new(FormatKind::WslFs);
        let fifo = file_attr(S_IFIFO | 0o644);
        let file = env.rootfs.create_file("/fifo", &fifo).unwrap();
        let (tag, _) =
            reparse::parse_reparse_buffer(&env.fs.get_reparse_point(&file).unwrap()).unwrap();
        assert_eq!(tag, reparse::IO_REPARSE_TAG_LX_FIFO);

        let rdev = attr::make_dev(1, 3);
        let null = file_attr(S_IFCHR | 0o666).with_rdev(rdev);
        env.rootfs.create_file("/null", &null).unwrap();
        assert_eq!(env.rootfs.get_attr("/null").unwrap(), null);
    }

    #[test]
    fn lxfs_special_files() {
        let env = TestEnv::new(FormatKind::LxFs);
        let rdev = attr::make_dev(1, 3);
        let null = file_attr(S_IFCHR | 0o666).with_rdev(rdev);
        let file = env.rootfs.create_file("/null", &null).unwrap();
        assert!(env.fs.get_reparse_point(&file).is_err());
        assert_eq!(env.rootfs.get_attr("/null").unwrap(), null);
    }

    #[test]
    fn options_from_string() {
        let options = RootFsOptions::from_option_string("case=off;trustee=BUILTIN\\Users;bogus");
        assert!(!options.case_sensitive_dirs);
        assert_eq!(options.trustee, Trustee::Name("BUILTIN\\Users".into()));

        let options = RootFsOptions::from_option_string("trustee=current_user;case=dir;case=xyz");
        assert!(options.case_sensitive_dirs);
        assert_eq!(options.trustee, Trustee::CurrentUser);

        let options = RootFsOptions::from_option_string("");
        assert!(options.case_sensitive_dirs);
    }
}
