//! Standing up a project directory from an archive.

use durable_fs::{clean_dir, copy_fs, CopyError, CopyOptions, DirFs, ErrorKind, PathError};
use std::{
    fmt, io,
    path::{Component, Path, PathBuf},
};

use crate::{
    materialize::{materialize_paths, MaterializeError},
    schema::{validate_local_path, validate_schema_pair, PathSchema, SchemaError},
};

/// The prefix of the temporary directories created by [`ProjectDir::prepare`].
pub const PROJECT_TEMP_DIR_PREFIX: &str = "durable-project-";

/// A read-only tree that holds a project, together with the location of its manifest.
#[derive(Debug, Clone)]
pub struct ProjectArchive {
    /// The tree that is copied into the project directory.
    pub archive: DirFs,

    /// The path of the manifest (for instance `compose.yml`) relative to the archive root.
    pub manifest_path: PathBuf,
}

/// Options for [`ProjectDir::prepare`].
#[derive(Debug, Clone, Default)]
pub struct ProjectDirOptions {
    /// The root of the project directory. It must be an existing directory. If `None`, a fresh
    /// directory is created in the temporary directory of the system. That directory is not
    /// removed automatically.
    pub dir: Option<PathBuf>,

    /// The directory, relative to the root, that receives the archive.
    pub archive_prefix: Option<PathBuf>,

    /// If set, a failed preparation removes a freshly created root or clears the archive
    /// destination inside a caller provided root.
    pub clean_on_error: bool,

    /// The options used to copy the archive and the initial content.
    pub copy_options: CopyOptions,
}

impl ProjectDirOptions {
    /// Sets the root of the project directory.
    pub fn with_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..self
        }
    }

    /// Copies the archive below `prefix` instead of the root.
    pub fn with_archive_prefix(self, prefix: impl Into<PathBuf>) -> Self {
        Self {
            archive_prefix: Some(prefix.into()),
            ..self
        }
    }

    /// Sets whether a failed preparation cleans up after itself.
    pub fn with_clean_on_error(self, clean_on_error: bool) -> Self {
        Self {
            clean_on_error,
            ..self
        }
    }

    /// Sets the options used for copying.
    pub fn with_copy_options(self, copy_options: CopyOptions) -> Self {
        Self {
            copy_options,
            ..self
        }
    }
}

/// An error that occurred while preparing a project directory.
#[derive(Debug, thiserror::Error)]
pub enum ProjectDirError {
    /// The schema, the manifest path or the archive prefix is malformed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A path cannot be used relative to the project root.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The given root could not be inspected.
    #[error("failed to inspect the project directory '{}'", .0.display())]
    InspectDirectory(PathBuf, #[source] io::Error),

    /// The given root is not a directory.
    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// A fresh root could not be created.
    #[error("failed to create a temporary project directory")]
    CreateTempDir(#[source] io::Error),

    /// The archive destination could not be created.
    #[error("failed to create '{}'", .0.display())]
    CreateDirectory(PathBuf, #[source] io::Error),

    /// The archive could not be copied.
    #[error("failed to copy the archive")]
    CopyArchive(#[source] CopyError),

    /// The manifest does not exist in the archive.
    #[error("the manifest '{}' could not be found in the archive", .0.display())]
    ManifestMissing(PathBuf, #[source] io::Error),

    /// The schema could not be materialized.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

impl ProjectDirError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectDirError::Schema(_)
            | ProjectDirError::InvalidPath(_)
            | ProjectDirError::InspectDirectory(..)
            | ProjectDirError::NotADirectory(_)
            | ProjectDirError::ManifestMissing(..) => ErrorKind::BadInput,
            ProjectDirError::CreateTempDir(_) | ProjectDirError::CreateDirectory(..) => {
                ErrorKind::Filesystem
            }
            ProjectDirError::CopyArchive(err) => err.kind(),
            ProjectDirError::Materialize(err) => err.kind(),
        }
    }
}

/// A directory that holds a project copied from an archive together with a set of
/// sub-directories described by a path schema.
///
/// A project without additional directories uses an empty
/// [`crate::DynamicPathSchema`].
pub struct ProjectDir<S: PathSchema> {
    dir: PathBuf,
    manifest_path: PathBuf,
    paths: S,
    handles: S::Handles,
}

impl<S> fmt::Debug for ProjectDir<S>
where
    S: PathSchema + fmt::Debug,
    S::Handles: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectDir")
            .field("dir", &self.dir)
            .field("manifest_path", &self.manifest_path)
            .field("paths", &self.paths)
            .field("handles", &self.handles)
            .finish()
    }
}

fn is_empty_path(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::CurDir))
}

impl<S: PathSchema> ProjectDir<S> {
    /// Prepares a project directory.
    ///
    /// The archive is copied into the root (or below [`ProjectDirOptions::archive_prefix`]),
    /// the manifest is checked to exist and the directories of `paths` are created below the
    /// root, optionally seeded from `initial_content`. All inputs are validated before anything is
    /// written.
    pub fn prepare(
        archive: ProjectArchive,
        paths: S,
        initial_content: Option<&S::Contents>,
        options: &ProjectDirOptions,
    ) -> Result<Self, ProjectDirError> {
        validate_local_path("manifest_path", &archive.manifest_path)?;
        let archive_prefix = options
            .archive_prefix
            .as_deref()
            .filter(|prefix| !is_empty_path(prefix));
        if let Some(prefix) = archive_prefix {
            validate_local_path("archive_prefix", prefix)?;
        }
        validate_schema_pair(&paths, initial_content)?;

        let (dir, created) = match &options.dir {
            Some(dir) => {
                let metadata = fs_err::metadata(dir)
                    .map_err(|err| ProjectDirError::InspectDirectory(dir.clone(), err))?;
                if !metadata.is_dir() {
                    return Err(ProjectDirError::NotADirectory(dir.clone()));
                }
                (dir.clone(), false)
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix(PROJECT_TEMP_DIR_PREFIX)
                    .tempdir()
                    .map_err(ProjectDirError::CreateTempDir)?
                    .keep();
                (dir, true)
            }
        };

        let root = DirFs::new(&dir);
        let archive_dir = match archive_prefix {
            Some(prefix) => root.sub(prefix)?,
            None => root.clone(),
        };

        let result = Self::populate(
            &root,
            &archive_dir,
            &archive,
            &paths,
            initial_content,
            &options.copy_options,
        );
        match result {
            Ok(handles) => {
                tracing::debug!("prepared project directory '{}'", dir.display());
                Ok(Self {
                    manifest_path: archive_dir.root().join(&archive.manifest_path),
                    dir,
                    paths,
                    handles,
                })
            }
            Err(err) => {
                if options.clean_on_error {
                    clean_up(&dir, &archive_dir, created);
                }
                Err(err)
            }
        }
    }

    fn populate(
        root: &DirFs,
        archive_dir: &DirFs,
        archive: &ProjectArchive,
        paths: &S,
        initial_content: Option<&S::Contents>,
        copy_options: &CopyOptions,
    ) -> Result<S::Handles, ProjectDirError> {
        archive_dir
            .create_dir_all("")
            .map_err(|err| ProjectDirError::CreateDirectory(archive_dir.root().to_path_buf(), err))?;
        copy_fs(archive_dir, &archive.archive, copy_options)
            .map_err(ProjectDirError::CopyArchive)?;

        archive_dir
            .symlink_metadata(&archive.manifest_path)
            .map_err(|err| ProjectDirError::ManifestMissing(archive.manifest_path.clone(), err))?;

        Ok(materialize_paths(root, paths, initial_content, copy_options)?)
    }

    /// Returns the root of the project directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the absolute path of the manifest.
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Returns the path schema the directory was prepared with.
    pub fn paths(&self) -> &S {
        &self.paths
    }

    /// Returns the handles of the directories of the path schema.
    pub fn handles(&self) -> &S::Handles {
        &self.handles
    }

    /// Returns the handles, dropping everything else.
    pub fn into_handles(self) -> S::Handles {
        self.handles
    }
}

fn clean_up(dir: &Path, archive_dir: &DirFs, created: bool) {
    let result = if created {
        fs_err::remove_dir_all(dir)
    } else {
        clean_dir(archive_dir, "").map_err(io::Error::other)
    };
    if let Err(err) = result {
        tracing::warn!(
            "failed to clean up project directory '{}': {err}",
            dir.display()
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::DynamicPathSchema;
    use assert_matches::assert_matches;

    fn archive() -> (tempfile::TempDir, ProjectArchive) {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("compose.yml"), b"services: {}\n").unwrap();
        let archive = ProjectArchive {
            archive: DirFs::new(dir.path()),
            manifest_path: PathBuf::from("compose.yml"),
        };
        (dir, archive)
    }

    #[test]
    fn test_prepare_into_given_dir_with_prefix() {
        let (_archive_dir, archive) = archive();
        let dir = tempfile::tempdir().unwrap();
        let options = ProjectDirOptions::default()
            .with_dir(dir.path())
            .with_archive_prefix("project");

        let project =
            ProjectDir::prepare(archive, DynamicPathSchema::default(), None, &options).unwrap();
        assert_eq!(project.dir(), dir.path());
        assert_eq!(
            project.manifest_path(),
            dir.path().join("project/compose.yml")
        );
        assert!(project.manifest_path().is_file());
    }

    #[test]
    fn test_missing_manifest() {
        let (_archive_dir, mut archive) = archive();
        archive.manifest_path = PathBuf::from("docker-compose.yml");
        let dir = tempfile::tempdir().unwrap();
        let options = ProjectDirOptions::default()
            .with_dir(dir.path())
            .with_clean_on_error(true);

        let err = ProjectDir::prepare(archive, DynamicPathSchema::default(), None, &options)
            .unwrap_err();
        assert_matches!(err, ProjectDirError::ManifestMissing(..));
        assert_eq!(err.kind(), ErrorKind::BadInput);
        assert!(fs_err::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_invalid_inputs_are_rejected_early() {
        let (_archive_dir, mut archive) = archive();
        archive.manifest_path = PathBuf::from("../compose.yml");
        let err = ProjectDir::prepare(
            archive,
            DynamicPathSchema::default(),
            None,
            &ProjectDirOptions::default(),
        )
        .unwrap_err();
        assert_matches!(err, ProjectDirError::Schema(SchemaError::NonLocalPath { field, .. }) if field == "manifest_path");

        let (_archive_dir, archive) = self::archive();
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ProjectDir::prepare(
            archive,
            DynamicPathSchema::default(),
            None,
            &ProjectDirOptions::default().with_dir(file.path()),
        )
        .unwrap_err();
        assert_matches!(err, ProjectDirError::NotADirectory(_));
    }
}
