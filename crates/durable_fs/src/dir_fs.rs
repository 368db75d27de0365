//! A directory handle that confines all paths to a root directory.

use fs_err as fs;
use std::{
    fmt, io,
    path::{Component, Path, PathBuf},
};

/// An error that is returned when a path cannot be used relative to a [`DirFs`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path contains a `..` component.
    #[error("path '{}' refers to a parent directory", .0.display())]
    ParentComponent(PathBuf),

    /// The path starts with a platform specific prefix like a drive letter.
    #[error("path '{}' contains a platform prefix", .0.display())]
    Prefix(PathBuf),
}

impl From<PathError> for io::Error {
    fn from(err: PathError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// The type of a directory entry as seen without following symbolic links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A directory.
    Directory,
    /// A regular file.
    File,
    /// A symbolic link.
    Symlink,
    /// Anything else, for instance a socket, a fifo or a device.
    Other,
}

impl EntryKind {
    /// Classifies a file type.
    pub fn of(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::Other
        }
    }

    fn symbol(self) -> char {
        match self {
            EntryKind::Directory => 'd',
            EntryKind::File => '-',
            EntryKind::Symlink => 'l',
            EntryKind::Other => '?',
        }
    }
}

/// The kind and permission bits of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryMode {
    /// The type of the entry.
    pub kind: EntryKind,
    /// The permission bits, e.g. `0o755`.
    pub permissions: u32,
}

impl EntryMode {
    /// Reads the mode from the metadata of an entry.
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            kind: EntryKind::of(metadata.file_type()),
            permissions: permission_bits(metadata),
        }
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.symbol())?;
        for shift in [6u32, 3, 0] {
            let bits = (self.permissions >> shift) & 0o7;
            let r = if bits & 0o4 != 0 { 'r' } else { '-' };
            let w = if bits & 0o2 != 0 { 'w' } else { '-' };
            let x = if bits & 0o1 != 0 { 'x' } else { '-' };
            write!(f, "{r}{w}{x}")?;
        }
        Ok(())
    }
}

/// Returns the permission bits of an entry.
#[cfg(unix)]
pub fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

/// Returns the permission bits of an entry. Only the read-only flag is known on this platform.
#[cfg(not(unix))]
pub fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    let base = if metadata.is_dir() { 0o777 } else { 0o666 };
    if metadata.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}

/// A handle to a directory on the local filesystem.
///
/// Every path passed to a `DirFs` is interpreted relative to its root. A leading `/` is stripped,
/// `.` components are ignored and `..` components or platform prefixes are rejected with a
/// [`PathError`] before any I/O happens. Sub handles created with [`DirFs::sub`] are plain views
/// and do not own any OS resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// Constructs a handle rooted at the given directory. The directory does not need to exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory of this handle.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a handle rooted at `path` below the root of this handle.
    pub fn sub(&self, path: impl AsRef<Path>) -> Result<DirFs, PathError> {
        Ok(DirFs {
            root: self.resolve(path)?,
        })
    }

    /// Normalizes a path into a plain relative path without `.`, `/` or `..` components. The
    /// empty path refers to the root.
    pub fn normalize(path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let path = path.as_ref();
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => return Err(PathError::ParentComponent(path.to_path_buf())),
                Component::Prefix(_) => return Err(PathError::Prefix(path.to_path_buf())),
            }
        }
        Ok(normalized)
    }

    /// Returns the absolute location of `path` below the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let relative = Self::normalize(path)?;
        if relative.as_os_str().is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(relative))
        }
    }

    /// Returns the path of `absolute` relative to the root, or `None` if it lies outside of it.
    pub fn relative<'a>(&self, absolute: &'a Path) -> Option<&'a Path> {
        absolute.strip_prefix(&self.root).ok()
    }

    /// Creates the directory and all of its missing ancestors.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)?)
    }

    /// Creates a single directory with the given permission bits, subject to the umask. Fails if
    /// it already exists.
    pub fn create_dir(&self, path: impl AsRef<Path>, permissions: u32) -> io::Result<()> {
        let path = self.resolve(path)?;
        let mut builder = std::fs::DirBuilder::new();
        set_dir_mode(&mut builder, permissions);
        builder
            .create(&path)
            .map_err(|err| with_path(err, "create directory", &path))
    }

    /// Creates a new file opened for reading and writing. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if the file exists.
    pub fn create_new_file(&self, path: impl AsRef<Path>, permissions: u32) -> io::Result<fs::File> {
        let mut options = std::fs::OpenOptions::new();
        options.read(true).write(true).create_new(true);
        set_open_mode(&mut options, permissions);
        open_with(&options, self.resolve(path)?)
    }

    /// Opens a file for reading and writing, creating it if it does not exist. An existing file is
    /// neither truncated nor moved to its end.
    pub fn open_or_create_file(
        &self,
        path: impl AsRef<Path>,
        permissions: u32,
    ) -> io::Result<fs::File> {
        let mut options = std::fs::OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        set_open_mode(&mut options, permissions);
        open_with(&options, self.resolve(path)?)
    }

    /// Creates or truncates a file for writing.
    pub fn create_file(&self, path: impl AsRef<Path>) -> io::Result<fs::File> {
        fs::File::create(self.resolve(path)?)
    }

    /// Opens a file for reading.
    pub fn open_file(&self, path: impl AsRef<Path>) -> io::Result<fs::File> {
        fs::File::open(self.resolve(path)?)
    }

    /// Removes a file.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }

    /// Removes a file or a directory including all of its contents. Removing something that does
    /// not exist is not an error.
    pub fn remove_all(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = self.resolve(path)?;
        let result = match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(err) => Err(err),
        };
        match result {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }

    /// Renames `from` to `to`, replacing `to` if it is a file.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)
    }

    /// Returns the metadata of an entry without following symbolic links.
    pub fn symlink_metadata(&self, path: impl AsRef<Path>) -> io::Result<std::fs::Metadata> {
        fs::symlink_metadata(self.resolve(path)?)
    }

    /// Returns true if an entry exists at the path. Dangling symbolic links exist.
    pub fn exists(&self, path: impl AsRef<Path>) -> io::Result<bool> {
        match self.symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Sets the permission bits of an entry.
    pub fn set_permissions(&self, path: impl AsRef<Path>, permissions: u32) -> io::Result<()> {
        set_permission_bits(&self.resolve(path)?, permissions)
    }

    /// Changes the owner and/or the group of an entry. `None` leaves the value unchanged.
    #[cfg(unix)]
    pub fn chown(
        &self,
        path: impl AsRef<Path>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> io::Result<()> {
        let path = self.resolve(path)?;
        std::os::unix::fs::chown(&path, uid, gid).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("failed to change owner of `{}`: {err}", path.display()),
            )
        })
    }

    /// Changing ownership is not supported on this platform.
    #[cfg(not(unix))]
    pub fn chown(
        &self,
        path: impl AsRef<Path>,
        _uid: Option<u32>,
        _gid: Option<u32>,
    ) -> io::Result<()> {
        let path = self.resolve(path)?;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot change owner of `{}` on this platform", path.display()),
        ))
    }

    /// Returns the names of the entries in a directory in sorted order.
    pub fn read_dir_names(&self, path: impl AsRef<Path>) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.resolve(path)?)?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Returns a walker over `path` and everything below it. Parents are visited before their
    /// children, siblings in file name order and symbolic links are not followed.
    pub fn walk(&self, path: impl AsRef<Path>) -> Result<walkdir::WalkDir, PathError> {
        Ok(walkdir::WalkDir::new(self.resolve(path)?)
            .follow_links(false)
            .sort_by_file_name())
    }
}

fn set_permission_bits(path: &Path, permissions: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(permissions & 0o7777))
    }

    #[cfg(not(unix))]
    {
        let mut current = fs::metadata(path)?.permissions();
        current.set_readonly(permissions & 0o222 == 0);
        fs::set_permissions(path, current)
    }
}

#[cfg(unix)]
fn set_open_mode(options: &mut std::fs::OpenOptions, permissions: u32) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(permissions & 0o7777);
}

#[cfg(not(unix))]
fn set_open_mode(_options: &mut std::fs::OpenOptions, _permissions: u32) {}

#[cfg(unix)]
fn set_dir_mode(builder: &mut std::fs::DirBuilder, permissions: u32) {
    use std::os::unix::fs::DirBuilderExt;
    builder.mode(permissions & 0o7777);
}

#[cfg(not(unix))]
fn set_dir_mode(_builder: &mut std::fs::DirBuilder, _permissions: u32) {}

/// Adds the path to an error of a std call, the same way `fs_err` does, keeping its kind.
fn with_path(err: io::Error, action: &str, path: &Path) -> io::Error {
    io::Error::new(
        err.kind(),
        format!("failed to {action} `{}`: {err}", path.display()),
    )
}

/// Opens `path` with std `OpenOptions` and wraps the result into an `fs_err` file.
fn open_with(options: &std::fs::OpenOptions, path: PathBuf) -> io::Result<fs::File> {
    match options.open(&path) {
        Ok(file) => Ok(fs::File::from_parts(file, path)),
        Err(err) => Err(with_path(err, "open file", &path)),
    }
}
