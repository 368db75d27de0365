//! Copying whole directory trees, or selected entries of them, between two [`DirFs`] handles.

use durable_stream::{is_cancelled, Cancellable, CancellationToken, Cancelled};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    buffer_pool::{copy_with_buffer, BufferPool},
    dir_fs::{permission_bits, DirFs, EntryKind, PathError},
    error::ErrorKind,
};

/// A function that returns the permission bits to use for a relative path instead of the bits of
/// the source entry, or `None` to keep them.
pub type PermissionOverride = Arc<dyn Fn(&Path) -> Option<u32> + Send + Sync>;

/// Determines what happens when a copy or a comparison encounters something other than a
/// directory or a regular file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NonRegularFiles {
    /// Fail with a bad input error.
    #[default]
    Error,

    /// Skip the entry.
    Skip,
}

/// Options that control [`copy_fs`], [`copy_paths`] and [`crate::equal`].
#[derive(Clone, Default)]
pub struct CopyOptions {
    /// How symbolic links, sockets and other special entries are treated.
    pub non_regular_files: NonRegularFiles,

    /// Overrides the permission bits of individual paths. An overridden path is always chmod-ed,
    /// even if `no_chmod` is set.
    pub permission_override: Option<PermissionOverride>,

    /// When true the permission bits of the source are not copied and newly created entries keep
    /// the permissions they were created with.
    pub no_chmod: bool,

    /// Checked between entries and while copying file contents.
    pub cancellation: Option<CancellationToken>,

    /// The buffers used to copy file contents.
    pub buffers: BufferPool,
}

impl fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOptions")
            .field("non_regular_files", &self.non_regular_files)
            .field(
                "permission_override",
                &self.permission_override.as_ref().map(|_| ".."),
            )
            .field("no_chmod", &self.no_chmod)
            .field("cancellation", &self.cancellation)
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl CopyOptions {
    /// Sets how non-regular entries are treated.
    pub fn with_non_regular_files(self, non_regular_files: NonRegularFiles) -> Self {
        Self {
            non_regular_files,
            ..self
        }
    }

    /// Overrides the permission bits of the paths for which `f` returns a value.
    pub fn with_permission_override(
        self,
        f: impl Fn(&Path) -> Option<u32> + Send + Sync + 'static,
    ) -> Self {
        Self {
            permission_override: Some(Arc::new(f)),
            ..self
        }
    }

    /// Disables copying of permission bits.
    pub fn with_no_chmod(self, no_chmod: bool) -> Self {
        Self { no_chmod, ..self }
    }

    /// Makes the copy observe the given cancellation token.
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self
        }
    }

    /// Uses the given pool for copy buffers.
    pub fn with_buffers(self, buffers: BufferPool) -> Self {
        Self { buffers, ..self }
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), Cancelled> {
        match &self.cancellation {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Returns the permission bits the destination of `path` should end up with, or `None` if the
    /// permission bits should not be touched.
    pub(crate) fn target_permissions(&self, path: &Path, source_permissions: u32) -> Option<u32> {
        match self
            .permission_override
            .as_ref()
            .and_then(|override_fn| override_fn(path))
        {
            Some(permissions) => Some(permissions),
            None if self.no_chmod => None,
            None => Some(source_permissions),
        }
    }
}

/// An error that can occur while copying a tree.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// A path could not be used relative to one of the handles.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The source tree could not be traversed.
    #[error("failed to walk the source tree")]
    Walk(#[source] walkdir::Error),

    /// The metadata of a source entry could not be read.
    #[error("failed to read metadata of '{}'", .0.display())]
    Metadata(PathBuf, #[source] io::Error),

    /// The source contains an entry that is not a directory or a regular file.
    #[error("'{}' is not a directory or a regular file", .0.display())]
    NonRegularFile(PathBuf),

    /// A directory could not be created at the destination.
    #[error("failed to create directory '{}'", .0.display())]
    CreateDirectory(PathBuf, #[source] io::Error),

    /// A file could not be opened.
    #[error("failed to open '{}'", .0.display())]
    Open(PathBuf, #[source] io::Error),

    /// The contents of a file could not be copied.
    #[error("failed to copy the contents of '{}'", .0.display())]
    CopyContent(PathBuf, #[source] io::Error),

    /// The permission bits of a destination entry could not be set.
    #[error("failed to set the permissions of '{}'", .0.display())]
    Chmod(PathBuf, #[source] io::Error),

    /// A copied file could not be flushed to disk.
    #[error("failed to sync '{}'", .0.display())]
    Sync(PathBuf, #[source] io::Error),

    /// A directory could not be listed.
    #[error("failed to read directory '{}'", .0.display())]
    ReadDirectory(PathBuf, #[source] io::Error),

    /// An entry could not be removed.
    #[error("failed to remove '{}'", .0.display())]
    Remove(PathBuf, #[source] io::Error),

    /// The copy was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl CopyError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CopyError::InvalidPath(_) | CopyError::NonRegularFile(_) => ErrorKind::BadInput,
            CopyError::Cancelled(_) => ErrorKind::Cancelled,
            CopyError::CopyContent(_, err) => ErrorKind::of_io(err),
            CopyError::Walk(_)
            | CopyError::Metadata(..)
            | CopyError::CreateDirectory(..)
            | CopyError::Open(..)
            | CopyError::Chmod(..)
            | CopyError::Sync(..)
            | CopyError::ReadDirectory(..)
            | CopyError::Remove(..) => ErrorKind::Filesystem,
        }
    }
}

/// Copies everything below the root of `source` into the root of `destination`.
///
/// Entries are visited parent before children and siblings in file name order. Directories are
/// created together with their missing ancestors and then receive the permission bits of their
/// source. Regular files are created or truncated, filled, given their permission bits, synced
/// and closed before the next entry is visited. Non-regular entries are handled according to
/// [`CopyOptions::non_regular_files`].
///
/// The copy is not atomic: if it fails or is cancelled, the destination contains everything that
/// was copied so far. Use [`crate::SafeWriteOptions::safe_write_tree`] to publish a tree
/// atomically.
pub fn copy_fs(
    destination: &DirFs,
    source: &DirFs,
    options: &CopyOptions,
) -> Result<(), CopyError> {
    let mut buffer = options.buffers.acquire();

    for entry in source.walk("")?.min_depth(1) {
        options.check_cancelled()?;

        let entry = entry.map_err(CopyError::Walk)?;
        let relative = source.relative(entry.path()).unwrap_or(entry.path());
        let metadata = entry
            .metadata()
            .map_err(|err| CopyError::Metadata(entry.path().to_path_buf(), err.into()))?;

        copy_entry(destination, source, relative, &metadata, options, &mut buffer)?;
    }

    Ok(())
}

/// Copies the listed entries of `source` into `destination`. Missing parent directories of each
/// entry are created at the destination. Listing a directory copies only the directory itself,
/// not its contents.
pub fn copy_paths<P: AsRef<Path>>(
    destination: &DirFs,
    source: &DirFs,
    paths: impl IntoIterator<Item = P>,
    options: &CopyOptions,
) -> Result<(), CopyError> {
    let mut buffer = options.buffers.acquire();

    for path in paths {
        options.check_cancelled()?;

        let relative = DirFs::normalize(path)?;
        if let Some(parent) = relative.parent() {
            destination
                .create_dir_all(parent)
                .map_err(|err| CopyError::CreateDirectory(parent.to_path_buf(), err))?;
        }

        let metadata = source
            .symlink_metadata(&relative)
            .map_err(|err| CopyError::Metadata(relative.clone(), err))?;

        copy_entry(destination, source, &relative, &metadata, options, &mut buffer)?;
    }

    Ok(())
}

/// Removes every entry inside the directory at `path`, leaving the directory itself in place.
pub fn clean_dir(fs: &DirFs, path: impl AsRef<Path>) -> Result<(), CopyError> {
    let path = DirFs::normalize(path)?;
    let names = fs
        .read_dir_names(&path)
        .map_err(|err| CopyError::ReadDirectory(path.clone(), err))?;
    for name in names {
        let entry = path.join(name);
        fs.remove_all(&entry)
            .map_err(|err| CopyError::Remove(entry.clone(), err))?;
    }
    Ok(())
}

fn copy_entry(
    destination: &DirFs,
    source: &DirFs,
    relative: &Path,
    metadata: &std::fs::Metadata,
    options: &CopyOptions,
    buffer: &mut [u8],
) -> Result<(), CopyError> {
    let permissions = options.target_permissions(relative, permission_bits(metadata));
    let chmod = |permissions: Option<u32>| -> Result<(), CopyError> {
        match permissions {
            Some(permissions) => destination
                .set_permissions(relative, permissions)
                .map_err(|err| CopyError::Chmod(relative.to_path_buf(), err)),
            None => Ok(()),
        }
    };

    match EntryKind::of(metadata.file_type()) {
        EntryKind::Directory => {
            destination
                .create_dir_all(relative)
                .map_err(|err| CopyError::CreateDirectory(relative.to_path_buf(), err))?;
            chmod(permissions)
        }
        EntryKind::File => {
            let mut reader = source
                .open_file(relative)
                .map_err(|err| CopyError::Open(relative.to_path_buf(), err))?;
            let mut writer = destination
                .create_file(relative)
                .map_err(|err| CopyError::Open(relative.to_path_buf(), err))?;
            chmod(permissions)?;

            let copied = match &options.cancellation {
                Some(token) => copy_with_buffer(
                    &mut Cancellable::new(&mut reader, token.clone()),
                    &mut writer,
                    buffer,
                ),
                None => copy_with_buffer(&mut reader, &mut writer, buffer),
            };
            match copied {
                Ok(_) => {}
                Err(err) if is_cancelled(&err) => return Err(CopyError::Cancelled(Cancelled)),
                Err(err) => return Err(CopyError::CopyContent(relative.to_path_buf(), err)),
            }

            writer
                .sync_all()
                .map_err(|err| CopyError::Sync(relative.to_path_buf(), err))
        }
        EntryKind::Symlink | EntryKind::Other => match options.non_regular_files {
            NonRegularFiles::Error => Err(CopyError::NonRegularFile(relative.to_path_buf())),
            NonRegularFiles::Skip => {
                tracing::debug!("skipping non-regular entry '{}'", relative.display());
                Ok(())
            }
        },
    }
}
