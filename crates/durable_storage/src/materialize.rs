//! Creating the directories of a path schema and seeding them with initial content.

use durable_fs::{copy_fs, CopyError, CopyOptions, DirFs, ErrorKind, PathError};
use std::{io, path::PathBuf};

use crate::schema::{
    validate_field_names, validate_schema_pair, ContentSchema, HandleSchema, PathSchema,
    SchemaError,
};

/// An error that occurred while materializing a schema.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// The schemas are malformed. Nothing was written.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A path could not be used relative to the base directory.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The directory of a field could not be created.
    #[error("failed to create the directory '{}' of field '{field}'", .path.display())]
    CreateDirectory {
        /// The name of the field.
        field: String,
        /// The path of the directory relative to the base.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The initial content of a field could not be copied.
    #[error("failed to copy the initial content of field '{field}'")]
    Copy {
        /// The name of the field.
        field: String,
        /// The underlying error.
        #[source]
        source: CopyError,
    },
}

impl MaterializeError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaterializeError::Schema(err) => err.kind(),
            MaterializeError::InvalidPath(_) => ErrorKind::BadInput,
            MaterializeError::CreateDirectory { .. } => ErrorKind::Filesystem,
            MaterializeError::Copy { source, .. } => source.kind(),
        }
    }
}

/// Creates `base/<path>` for every field of `paths` and returns handles rooted at those
/// directories.
///
/// If `initial_content` is given, the tree of every field that holds a source is copied into the
/// matching handle, fields without a source stay empty. Both schemas are validated before any
/// directory is created.
///
/// The directories are created and filled one after another, a failure leaves everything that
/// was created so far in place.
pub fn materialize_paths<S: PathSchema>(
    base: &DirFs,
    paths: &S,
    initial_content: Option<&S::Contents>,
    options: &CopyOptions,
) -> Result<S::Handles, MaterializeError> {
    validate_schema_pair(paths, initial_content)?;
    let handles = paths.bind(base)?;

    for (field, path) in paths.paths() {
        base.create_dir_all(path)
            .map_err(|source| MaterializeError::CreateDirectory {
                field: field.to_string(),
                path: PathBuf::from(path),
                source,
            })?;
        tracing::trace!("created directory '{path}' for field '{field}'");
    }

    if let Some(contents) = initial_content {
        copy_contents(&handles, contents, options)?;
    }

    Ok(handles)
}

/// Copies every present field of `contents` into the handle with the same name.
///
/// The field names of both schemas must be identical, fields of `contents` without a source are
/// skipped.
pub fn copy_contents<H, C>(
    handles: &H,
    contents: &C,
    options: &CopyOptions,
) -> Result<(), MaterializeError>
where
    H: HandleSchema + ?Sized,
    C: ContentSchema + ?Sized,
{
    validate_field_names(handles, contents)?;

    let bound = handles.handles();
    for (field, source) in contents.contents() {
        let Some(source) = source else {
            continue;
        };
        let Some((_, destination)) = bound.iter().find(|(name, _)| *name == field) else {
            return Err(SchemaError::MissingField(field.to_string()).into());
        };
        copy_fs(destination, source, options).map_err(|source| MaterializeError::Copy {
            field: field.to_string(),
            source,
        })?;
        tracing::debug!(
            "copied initial content of '{field}' into '{}'",
            destination.root().display()
        );
    }

    Ok(())
}
