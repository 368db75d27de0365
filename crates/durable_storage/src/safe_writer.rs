use durable_fs::{CleanTmpError, DirFs, PostWriteHook, SafeWriteError, SafeWriteOptions};
use std::{io::Read, path::Path};

/// A directory handle bundled with the options used to write into it.
#[derive(Debug, Clone)]
pub struct SafeWriter {
    fs: DirFs,
    options: SafeWriteOptions,
}

impl SafeWriter {
    /// Constructs a new writer.
    pub fn new(fs: DirFs, options: SafeWriteOptions) -> Self {
        Self { fs, options }
    }

    /// Returns the handle this writer writes into.
    pub fn fs(&self) -> &DirFs {
        &self.fs
    }

    /// Returns the options used for every write.
    pub fn options(&self) -> &SafeWriteOptions {
        &self.options
    }

    /// See [`SafeWriteOptions::safe_write`].
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        permissions: u32,
        content: impl Read,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        self.options
            .safe_write(&self.fs, path, permissions, content, post_hooks)
    }

    /// See [`SafeWriteOptions::safe_write_tree`].
    pub fn write_tree(
        &self,
        path: impl AsRef<Path>,
        permissions: u32,
        source: &DirFs,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        self.options
            .safe_write_tree(&self.fs, path, permissions, source, post_hooks)
    }

    /// See [`SafeWriteOptions::clean_tmp`].
    pub fn clean_tmp(&self) -> Result<(), CleanTmpError> {
        self.options.clean_tmp(&self.fs)
    }
}
