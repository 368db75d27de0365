#![deny(missing_docs)]

//! Higher level storage built on [`durable_fs`].
//!
//! - [`path_schema!`] and the [`PathSchema`] family of traits describe a named set of
//!   sub-directories. [`materialize_paths`] creates them below a base directory, binds a
//!   [`DirFs`] handle to each and optionally seeds them with initial content.
//! - [`ProjectDir::prepare`] stands up a project directory from an archive and materializes a
//!   schema inside it.
//! - [`SafeWriter`] bundles a handle with [`durable_fs::SafeWriteOptions`].
//! - [`SplittingStorage`] stores large streams as checksummed chunks and reads them back through
//!   a size checking [`durable_stream::SegmentedReader`].

mod materialize;
mod project;
mod safe_writer;
mod schema;
mod splitting;

pub use materialize::{copy_contents, materialize_paths, MaterializeError};
pub use project::{
    ProjectArchive, ProjectDir, ProjectDirError, ProjectDirOptions, PROJECT_TEMP_DIR_PREFIX,
};
pub use safe_writer::SafeWriter;
pub use schema::{
    validate_field_names, validate_paths, validate_schema_pair, ContentSchema,
    DynamicContentSchema, DynamicHandleSchema, DynamicPathSchema, HandleSchema, PathSchema, Schema,
    SchemaError,
};
pub use splitting::{
    append_index, write_splitting, Chunk, ChunkRecord, PathModifier, SplitError, SplitMetadata,
    SplitReader, SplittingStorage, METADATA_SUFFIX,
};

pub use durable_fs::{DirFs, PathError};
