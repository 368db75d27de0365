#![deny(missing_docs)]

//! Crash safe filesystem operations rooted in a directory handle.
//!
//! All operations in this crate go through a [`DirFs`], a handle that confines paths to a root
//! directory. On top of it the crate provides:
//!
//! - [`SafeWriteOptions::safe_write`] and [`SafeWriteOptions::safe_write_tree`]: write a file or
//!   a whole tree to a temporary artifact and rename it into place, so that readers never observe
//!   partial content. Checksums can be verified before publishing with [`tee_hasher`].
//! - [`SafeWriteOptions::clean_tmp`]: remove temporary artifacts left behind by interrupted
//!   writes.
//! - [`copy_fs`] and [`copy_paths`]: copy trees or selected entries between handles.
//! - [`equal`]: compare two trees and report every difference.
//!
//! Options can be constructed in code or loaded from a TOML file with [`SafeWriteConfig`].
//!
//! ```
//! use durable_fs::{DirFs, SafeWriteOptions};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let fs = DirFs::new(dir.path());
//! SafeWriteOptions::default()
//!     .safe_write(&fs, "greeting.txt", 0o644, &b"hello"[..], &[])
//!     .unwrap();
//! assert_eq!(std::fs::read(dir.path().join("greeting.txt")).unwrap(), b"hello");
//! ```

mod buffer_pool;
mod config;
mod copy;
mod dir_fs;
mod equal;
mod error;
mod hooks;
mod safe_write;
mod temp;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use config::{LoadError, OwnerConfig, SafeWriteConfig};
pub use copy::{clean_dir, copy_fs, copy_paths, CopyError, CopyOptions, NonRegularFiles, PermissionOverride};
pub use dir_fs::{permission_bits, DirFs, EntryKind, EntryMode, PathError};
pub use equal::{equal, EqualError, EqualityReport, Mismatch};
pub use error::ErrorKind;
pub use hooks::{
    tee_hasher, ChecksumValidator, CloseHook, HookError, PostWriteHook, PreWriteHook,
    TempArtifact, TeeReader,
};
pub use safe_write::{
    default_pre_write_hooks, CleanTmpError, CleanupPredicate, ConfigError, SafeWriteError,
    SafeWriteOptions, SafeWriteOptionsBuilder,
};
pub use temp::{TempFilePolicy, DEFAULT_RANDOM_PATTERN, DEFAULT_TEMP_SUFFIX, MAX_RANDOM_ATTEMPTS};

pub use durable_stream::{CancellationToken, Cancelled};
