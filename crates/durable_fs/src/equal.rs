//! Comparing two directory trees by structure, permission bits and file contents.

use durable_stream::Cancelled;
use std::{
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
};

use crate::{
    copy::{CopyOptions, NonRegularFiles},
    dir_fs::{DirFs, EntryKind, EntryMode, PathError},
    error::ErrorKind,
};

/// A single difference found by [`equal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// The entry kind or the permission bits differ.
    Mode {
        /// The path relative to the roots of the trees.
        path: PathBuf,
        /// The mode of the entry in the destination tree.
        destination: EntryMode,
        /// The mode the entry is expected to have according to the source tree.
        source: EntryMode,
    },

    /// The contents of a regular file differ. If the sizes are equal the bytes differ.
    FileContent {
        /// The path relative to the roots of the trees.
        path: PathBuf,
        /// The size of the file in the destination tree.
        destination_size: u64,
        /// The size of the file in the source tree.
        source_size: u64,
    },

    /// The names of the entries of a directory differ.
    DirectoryContent {
        /// The path relative to the roots of the trees.
        path: PathBuf,
        /// The sorted entry names in the destination tree.
        destination: Vec<String>,
        /// The sorted entry names in the source tree.
        source: Vec<String>,
    },
}

impl Mismatch {
    /// Returns the path at which the trees differ.
    pub fn path(&self) -> &Path {
        match self {
            Mismatch::Mode { path, .. }
            | Mismatch::FileContent { path, .. }
            | Mismatch::DirectoryContent { path, .. } => path,
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Mode {
                path,
                destination,
                source,
            } => write!(
                f,
                "{}: mode {destination} differs from {source}",
                path.display()
            ),
            Mismatch::FileContent {
                path,
                destination_size,
                source_size,
            } if destination_size == source_size => {
                write!(f, "{}: file contents differ", path.display())
            }
            Mismatch::FileContent {
                path,
                destination_size,
                source_size,
            } => write!(
                f,
                "{}: file size {destination_size} differs from {source_size}",
                path.display()
            ),
            Mismatch::DirectoryContent {
                path,
                destination,
                source,
            } => write!(
                f,
                "{}: directory entries [{}] differ from [{}]",
                path.display(),
                destination.join(", "),
                source.join(", ")
            ),
        }
    }
}

/// The result of comparing two trees with [`equal`]. The trees are equal if there are no
/// mismatches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EqualityReport {
    /// Every difference that was found, in walk order.
    pub mismatches: Vec<Mismatch>,
}

impl EqualityReport {
    /// Returns true if no differences were found.
    pub fn is_equal(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for EqualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mismatches.is_empty() {
            return write!(f, "trees are equal");
        }
        for (idx, mismatch) in self.mismatches.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{mismatch}")?;
        }
        Ok(())
    }
}

/// An error that prevented [`equal`] from completing the comparison.
#[derive(Debug, thiserror::Error)]
pub enum EqualError {
    /// A path could not be used relative to one of the handles.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The destination tree could not be traversed.
    #[error("failed to walk the destination tree")]
    Walk(#[source] walkdir::Error),

    /// The metadata of an entry could not be read.
    #[error("failed to read metadata of '{}'", .0.display())]
    Metadata(PathBuf, #[source] io::Error),

    /// A directory could not be listed.
    #[error("failed to read directory '{}'", .0.display())]
    ReadDirectory(PathBuf, #[source] io::Error),

    /// A file could not be read.
    #[error("failed to read '{}'", .0.display())]
    Read(PathBuf, #[source] io::Error),

    /// The destination contains an entry that is not a directory or a regular file.
    #[error("'{}' is not a directory or a regular file", .0.display())]
    NonRegularFile(PathBuf),

    /// The comparison was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl EqualError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EqualError::InvalidPath(_) | EqualError::NonRegularFile(_) => ErrorKind::BadInput,
            EqualError::Cancelled(_) => ErrorKind::Cancelled,
            EqualError::Walk(_)
            | EqualError::Metadata(..)
            | EqualError::ReadDirectory(..)
            | EqualError::Read(..) => ErrorKind::Filesystem,
        }
    }
}

/// Compares the tree below `destination` with the tree below `source`.
///
/// The destination tree is walked. For every entry except the root the entry kind and the
/// permission bits are compared, where the expected permission bits are taken from
/// [`CopyOptions::permission_override`] if it returns a value. With [`CopyOptions::no_chmod`]
/// set, permission bits that are not overridden are not compared. Directories (including the
/// root) are compared by their sorted entry names, regular files by size and then byte by byte.
///
/// An entry that only exists in the destination is reported through the entry names of its
/// parent and is not descended into. All differences are collected, the comparison never stops
/// at the first one.
pub fn equal(
    destination: &DirFs,
    source: &DirFs,
    options: &CopyOptions,
) -> Result<EqualityReport, EqualError> {
    let mut report = EqualityReport::default();
    let mut walker = destination.walk("")?.into_iter();

    while let Some(entry) = walker.next() {
        options.check_cancelled()?;

        let entry = entry.map_err(EqualError::Walk)?;
        let relative = destination
            .relative(entry.path())
            .unwrap_or(entry.path())
            .to_path_buf();
        let is_root = entry.depth() == 0;

        let destination_metadata = entry
            .metadata()
            .map_err(|err| EqualError::Metadata(relative.clone(), err.into()))?;
        let destination_mode = EntryMode::from_metadata(&destination_metadata);

        if matches!(destination_mode.kind, EntryKind::Symlink | EntryKind::Other) {
            match options.non_regular_files {
                NonRegularFiles::Error => return Err(EqualError::NonRegularFile(relative)),
                NonRegularFiles::Skip => continue,
            }
        }

        let source_metadata = match source.symlink_metadata(&relative) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !is_root => {
                // Already reported by the entry names of the parent directory.
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            Err(err) => return Err(EqualError::Metadata(relative, err)),
        };
        let mut source_mode = EntryMode::from_metadata(&source_metadata);

        if !is_root {
            if destination_mode.kind != source_mode.kind {
                report.mismatches.push(Mismatch::Mode {
                    path: relative,
                    destination: destination_mode,
                    source: source_mode,
                });
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            match options.target_permissions(&relative, source_mode.permissions) {
                Some(expected) => source_mode.permissions = expected,
                None => source_mode.permissions = destination_mode.permissions,
            }
            if destination_mode != source_mode {
                report.mismatches.push(Mismatch::Mode {
                    path: relative.clone(),
                    destination: destination_mode,
                    source: source_mode,
                });
            }
        }

        match destination_mode.kind {
            EntryKind::Directory => {
                let destination_names = destination
                    .read_dir_names(&relative)
                    .map_err(|err| EqualError::ReadDirectory(relative.clone(), err))?;
                let source_names = source
                    .read_dir_names(&relative)
                    .map_err(|err| EqualError::ReadDirectory(relative.clone(), err))?;
                if destination_names != source_names {
                    report.mismatches.push(Mismatch::DirectoryContent {
                        path: relative,
                        destination: destination_names,
                        source: source_names,
                    });
                }
            }
            EntryKind::File => {
                let destination_size = destination_metadata.len();
                let source_size = source_metadata.len();
                if destination_size != source_size
                    || !same_contents(destination, source, &relative, destination_size, options)?
                {
                    report.mismatches.push(Mismatch::FileContent {
                        path: relative,
                        destination_size,
                        source_size,
                    });
                }
            }
            EntryKind::Symlink | EntryKind::Other => {}
        }
    }

    Ok(report)
}

/// Compares the contents of two files of equal size through two pooled buffers.
fn same_contents(
    destination: &DirFs,
    source: &DirFs,
    relative: &Path,
    size: u64,
    options: &CopyOptions,
) -> Result<bool, EqualError> {
    if size == 0 {
        return Ok(true);
    }

    let read_error = |err| EqualError::Read(relative.to_path_buf(), err);
    let mut destination_file = destination.open_file(relative).map_err(read_error)?;
    let mut source_file = source.open_file(relative).map_err(read_error)?;

    let mut destination_buffer = options.buffers.acquire();
    let mut source_buffer = options.buffers.acquire();

    let mut remaining = size;
    while remaining > 0 {
        options.check_cancelled()?;

        let chunk = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(destination_buffer.len());
        let destination_chunk = &mut destination_buffer[..chunk];
        let source_chunk = &mut source_buffer[..chunk];
        destination_file
            .read_exact(destination_chunk)
            .map_err(read_error)?;
        source_file.read_exact(source_chunk).map_err(read_error)?;

        if destination_chunk != source_chunk {
            return Ok(false);
        }
        remaining -= chunk as u64;
    }

    Ok(true)
}
