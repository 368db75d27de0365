//! Named sets of directories: a path schema maps field names to relative paths, the matching
//! handle schema maps the same names to [`DirFs`] handles and the content schema to optional
//! source trees.
//!
//! Static schemas are declared with [`crate::path_schema!`], schemas that are only known at
//! runtime use [`DynamicPathSchema`], [`DynamicHandleSchema`] and [`DynamicContentSchema`].

use durable_fs::{DirFs, ErrorKind, PathError};
use std::{
    collections::HashSet,
    path::{Component, Path},
};

/// An error that is returned when a schema or a pair of schemas is malformed. Schemas are
/// validated before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Two schemas that must be paired have a different number of fields.
    #[error("expected {expected} fields but found {actual}")]
    FieldCountMismatch {
        /// The number of fields of the reference schema.
        expected: usize,
        /// The number of fields of the other schema.
        actual: usize,
    },

    /// A field of one schema does not exist in the schema it is paired with.
    #[error("field '{0}' does not exist in the paired schema")]
    MissingField(String),

    /// A dynamic schema declares the same field twice.
    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    /// A path field is empty or refers to the root.
    #[error("field '{0}' specifies an empty path")]
    EmptyPath(String),

    /// A path field is absolute or escapes its base directory.
    #[error("field '{field}' specifies '{path}' which is not a local path")]
    NonLocalPath {
        /// The name of the field.
        field: String,
        /// The offending path.
        path: String,
    },
}

impl SchemaError {
    /// Classifies this error, schema errors are always bad input.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BadInput
    }
}

/// A record of named fields.
pub trait Schema {
    /// Returns the field names in declaration order.
    fn field_names(&self) -> Vec<&str>;
}

/// A schema that maps each field to a path relative to a base directory.
pub trait PathSchema: Schema {
    /// The schema with the same fields, each holding a handle.
    type Handles: HandleSchema;

    /// The schema with the same fields, each holding an optional source tree.
    type Contents: ContentSchema;

    /// Returns `(field, path)` pairs in declaration order.
    fn paths(&self) -> Vec<(&str, &str)>;

    /// Binds every field to `base.sub(path)`. Does not touch the filesystem.
    fn bind(&self, base: &DirFs) -> Result<Self::Handles, PathError>;
}

/// A schema that maps each field to a directory handle.
pub trait HandleSchema: Schema {
    /// Returns `(field, handle)` pairs in declaration order.
    fn handles(&self) -> Vec<(&str, &DirFs)>;
}

/// A schema that maps each field to an optional tree that is copied into the matching handle.
pub trait ContentSchema: Schema {
    /// Returns `(field, source)` pairs in declaration order.
    fn contents(&self) -> Vec<(&str, Option<&DirFs>)>;
}

/// Checks that every path of the schema is non-empty and local: not absolute, without a platform
/// prefix and without `..` components.
pub fn validate_paths<S: PathSchema + ?Sized>(schema: &S) -> Result<(), SchemaError> {
    for (field, path) in schema.paths() {
        validate_local_path(field, Path::new(path))?;
    }
    Ok(())
}

pub(crate) fn validate_local_path(field: &str, path: &Path) -> Result<(), SchemaError> {
    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                return Err(SchemaError::NonLocalPath {
                    field: field.to_string(),
                    path: path.display().to_string(),
                })
            }
        }
    }
    if normal == 0 {
        return Err(SchemaError::EmptyPath(field.to_string()));
    }
    Ok(())
}

/// Checks that `actual` has exactly the fields of `expected`. The order of the fields does not
/// matter.
pub fn validate_field_names<E, A>(expected: &E, actual: &A) -> Result<(), SchemaError>
where
    E: Schema + ?Sized,
    A: Schema + ?Sized,
{
    let expected = expected.field_names();
    let actual = actual.field_names();
    if expected.len() != actual.len() {
        return Err(SchemaError::FieldCountMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    let expected: HashSet<&str> = expected.into_iter().collect();
    match actual.into_iter().find(|name| !expected.contains(name)) {
        Some(name) => Err(SchemaError::MissingField(name.to_string())),
        None => Ok(()),
    }
}

/// Validates a path schema together with the content schema it will be seeded from.
pub fn validate_schema_pair<S, C>(paths: &S, contents: Option<&C>) -> Result<(), SchemaError>
where
    S: PathSchema + ?Sized,
    C: ContentSchema + ?Sized,
{
    validate_paths(paths)?;
    if let Some(contents) = contents {
        validate_field_names(paths, contents)?;
    }
    Ok(())
}

fn collect_unique<V>(
    fields: impl IntoIterator<Item = (String, V)>,
) -> Result<Vec<(String, V)>, SchemaError> {
    let mut seen = HashSet::new();
    let mut collected = Vec::new();
    for (name, value) in fields {
        if !seen.insert(name.clone()) {
            return Err(SchemaError::DuplicateField(name));
        }
        collected.push((name, value));
    }
    Ok(collected)
}

/// A path schema whose fields are only known at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicPathSchema {
    fields: Vec<(String, String)>,
}

impl DynamicPathSchema {
    /// Constructs a schema from `(field, path)` pairs. Fails if a field is declared twice.
    pub fn new<N, P>(fields: impl IntoIterator<Item = (N, P)>) -> Result<Self, SchemaError>
    where
        N: Into<String>,
        P: Into<String>,
    {
        Ok(Self {
            fields: collect_unique(
                fields
                    .into_iter()
                    .map(|(name, path)| (name.into(), path.into())),
            )?,
        })
    }

    /// Returns the path of a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, path)| path.as_str())
    }
}

impl Schema for DynamicPathSchema {
    fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl PathSchema for DynamicPathSchema {
    type Handles = DynamicHandleSchema;
    type Contents = DynamicContentSchema;

    fn paths(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_str()))
            .collect()
    }

    fn bind(&self, base: &DirFs) -> Result<DynamicHandleSchema, PathError> {
        let fields = self
            .fields
            .iter()
            .map(|(name, path)| Ok((name.clone(), base.sub(path)?)))
            .collect::<Result<_, PathError>>()?;
        Ok(DynamicHandleSchema { fields })
    }
}

/// Handles bound from a [`DynamicPathSchema`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicHandleSchema {
    fields: Vec<(String, DirFs)>,
}

impl DynamicHandleSchema {
    /// Constructs a handle schema from `(field, handle)` pairs. Fails if a field is declared
    /// twice.
    pub fn new<N: Into<String>>(
        fields: impl IntoIterator<Item = (N, DirFs)>,
    ) -> Result<Self, SchemaError> {
        Ok(Self {
            fields: collect_unique(fields.into_iter().map(|(name, fs)| (name.into(), fs)))?,
        })
    }

    /// Returns the handle of a field.
    pub fn get(&self, field: &str) -> Option<&DirFs> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, fs)| fs)
    }
}

impl Schema for DynamicHandleSchema {
    fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl HandleSchema for DynamicHandleSchema {
    fn handles(&self) -> Vec<(&str, &DirFs)> {
        self.fields
            .iter()
            .map(|(name, fs)| (name.as_str(), fs))
            .collect()
    }
}

/// Initial content for a [`DynamicHandleSchema`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicContentSchema {
    fields: Vec<(String, Option<DirFs>)>,
}

impl DynamicContentSchema {
    /// Constructs a content schema from `(field, source)` pairs. Fields without a source are
    /// left empty. Fails if a field is declared twice.
    pub fn new<N: Into<String>>(
        fields: impl IntoIterator<Item = (N, Option<DirFs>)>,
    ) -> Result<Self, SchemaError> {
        Ok(Self {
            fields: collect_unique(
                fields
                    .into_iter()
                    .map(|(name, source)| (name.into(), source)),
            )?,
        })
    }
}

impl Schema for DynamicContentSchema {
    fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl ContentSchema for DynamicContentSchema {
    fn contents(&self) -> Vec<(&str, Option<&DirFs>)> {
        self.fields
            .iter()
            .map(|(name, source)| (name.as_str(), source.as_ref()))
            .collect()
    }
}

/// Declares a path schema together with its handle and content schemas.
///
/// ```
/// durable_storage::path_schema! {
///     /// The directories of a project.
///     pub struct ProjectPaths => ProjectHandles, ProjectContents {
///         /// Environment files passed to the services.
///         runtime_env_files,
///         secrets,
///     }
/// }
///
/// use durable_storage::{DirFs, PathSchema};
///
/// let paths = ProjectPaths {
///     runtime_env_files: "env".to_string(),
///     secrets: "private/secrets".to_string(),
/// };
/// let handles = paths.bind(&DirFs::new("/srv/project")).unwrap();
/// assert_eq!(handles.secrets.root(), std::path::Path::new("/srv/project/private/secrets"));
///
/// let contents = ProjectContents::default();
/// assert!(contents.runtime_env_files.is_none());
/// ```
///
/// The path schema holds a `String` per field, the handle schema a [`DirFs`] and the content
/// schema an `Option<DirFs>`.
#[macro_export]
macro_rules! path_schema {
    (
        $(#[$meta:meta])*
        $vis:vis struct $paths:ident => $handles:ident, $contents:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        $vis struct $paths {
            $(
                $(#[$field_meta])*
                pub $field: ::std::string::String,
            )+
        }

        #[doc = concat!("Handles bound to the directories of [`", stringify!($paths), "`].")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        $vis struct $handles {
            $(
                $(#[$field_meta])*
                pub $field: $crate::DirFs,
            )+
        }

        #[doc = concat!("Initial content of the directories of [`", stringify!($paths), "`].")]
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        $vis struct $contents {
            $(
                $(#[$field_meta])*
                pub $field: ::std::option::Option<$crate::DirFs>,
            )+
        }

        impl $crate::Schema for $paths {
            fn field_names(&self) -> ::std::vec::Vec<&str> {
                ::std::vec![$(stringify!($field)),+]
            }
        }

        impl $crate::PathSchema for $paths {
            type Handles = $handles;
            type Contents = $contents;

            fn paths(&self) -> ::std::vec::Vec<(&str, &str)> {
                ::std::vec![$((stringify!($field), self.$field.as_str())),+]
            }

            fn bind(&self, base: &$crate::DirFs) -> ::std::result::Result<$handles, $crate::PathError> {
                ::std::result::Result::Ok($handles {
                    $($field: base.sub(&self.$field)?,)+
                })
            }
        }

        impl $crate::Schema for $handles {
            fn field_names(&self) -> ::std::vec::Vec<&str> {
                ::std::vec![$(stringify!($field)),+]
            }
        }

        impl $crate::HandleSchema for $handles {
            fn handles(&self) -> ::std::vec::Vec<(&str, &$crate::DirFs)> {
                ::std::vec![$((stringify!($field), &self.$field)),+]
            }
        }

        impl $crate::Schema for $contents {
            fn field_names(&self) -> ::std::vec::Vec<&str> {
                ::std::vec![$(stringify!($field)),+]
            }
        }

        impl $crate::ContentSchema for $contents {
            fn contents(&self) -> ::std::vec::Vec<(&str, ::std::option::Option<&$crate::DirFs>)> {
                ::std::vec![$((stringify!($field), self.$field.as_ref())),+]
            }
        }
    };
}
