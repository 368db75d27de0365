//! Crash safe writes: content is staged in a temporary artifact and renamed into place.
//!
//! See [`SafeWriteOptions::safe_write`] and [`SafeWriteOptions::safe_write_tree`].

use durable_stream::{is_cancelled, Cancellable, Cancelled};
use fs_err as fs;
use std::{
    fmt,
    io::{self, Read, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    buffer_pool::copy_with_buffer,
    copy::{copy_fs, CopyError, CopyOptions},
    dir_fs::{DirFs, PathError},
    error::ErrorKind,
    hooks::{HookError, PostWriteHook, PreWriteHook, TempArtifact},
    temp::{TempFilePolicy, MAX_RANDOM_ATTEMPTS},
};

/// A predicate that decides whether the temporary artifact is kept after a failed write.
pub type CleanupPredicate = Arc<dyn Fn(&SafeWriteError) -> bool + Send + Sync>;

/// An error in the configuration of [`SafeWriteOptions`], returned by
/// [`SafeWriteOptionsBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The prefix or the suffix contains a `*`.
    #[error("the {field} '{value}' must not contain '*'")]
    Wildcard {
        /// The name of the offending setting.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// A naming setting contains a path separator.
    #[error("the {field} '{value}' must not contain a path separator")]
    Separator {
        /// The name of the offending setting.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// The temporary directory is not a local path.
    #[error("invalid temporary directory")]
    InvalidTempDir(#[source] PathError),
}

impl ConfigError {
    /// Classifies this error, configuration errors are always bad input.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BadInput
    }
}

/// An error that occurred during [`SafeWriteOptions::safe_write`] or
/// [`SafeWriteOptions::safe_write_tree`].
#[derive(Debug, thiserror::Error)]
pub enum SafeWriteError {
    /// The destination path cannot be used relative to the handle.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The destination path has no file name, e.g. it refers to the root of the handle.
    #[error("the destination path has no file name")]
    EmptyName,

    /// The temporary directory or the parent of the destination could not be created.
    #[error("failed to create directory '{}'", .0.display())]
    CreateDirectory(PathBuf, #[source] io::Error),

    /// Every random name that was tried already existed.
    #[error("no unused temporary name matching '{}' was found in {attempts} attempts", .pattern.display())]
    MaxRetry {
        /// The temporary name with `*` in place of the random part.
        pattern: PathBuf,
        /// The number of names that were tried.
        attempts: usize,
    },

    /// The temporary artifact could not be created.
    #[error("failed to create temporary artifact '{}'", .0.display())]
    OpenTemp(PathBuf, #[source] io::Error),

    /// A pre-write hook rejected the temporary artifact.
    #[error("pre-write hook failed for '{}'", .0.display())]
    PreHook(PathBuf, #[source] HookError),

    /// The content could not be written to the temporary file.
    #[error("failed to write content to '{}'", .0.display())]
    Write(PathBuf, #[source] io::Error),

    /// The source tree could not be copied into the temporary directory.
    #[error("failed to copy tree into '{}'", .0.display())]
    CopyTree(PathBuf, #[source] CopyError),

    /// The permission bits of the temporary artifact could not be set.
    #[error("failed to set the permissions of '{}'", .0.display())]
    Chmod(PathBuf, #[source] io::Error),

    /// The owner of the temporary artifact could not be changed.
    #[error("failed to change the owner of '{}'", .0.display())]
    Chown(PathBuf, #[source] io::Error),

    /// A post-write hook failed.
    #[error("post-write hook failed for '{}'", .0.display())]
    PostHook(PathBuf, #[source] HookError),

    /// The temporary artifact could not be flushed to disk.
    #[error("failed to sync '{}'", .0.display())]
    Sync(PathBuf, #[source] io::Error),

    /// The temporary artifact could not be renamed to the destination.
    #[error("failed to rename '{}' to '{}'", .from.display(), .to.display())]
    Rename {
        /// The temporary artifact.
        from: PathBuf,
        /// The destination.
        to: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The write was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl SafeWriteError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SafeWriteError::InvalidPath(_) | SafeWriteError::EmptyName => ErrorKind::BadInput,
            SafeWriteError::MaxRetry { .. } => ErrorKind::NameCollisionExhausted,
            SafeWriteError::PreHook(_, err) | SafeWriteError::PostHook(_, err) => err.kind(),
            SafeWriteError::CopyTree(_, err) => err.kind(),
            SafeWriteError::Write(_, err) => ErrorKind::of_io(err),
            SafeWriteError::Cancelled(_) => ErrorKind::Cancelled,
            SafeWriteError::CreateDirectory(..)
            | SafeWriteError::OpenTemp(..)
            | SafeWriteError::Chmod(..)
            | SafeWriteError::Chown(..)
            | SafeWriteError::Sync(..)
            | SafeWriteError::Rename { .. } => ErrorKind::Filesystem,
        }
    }
}

/// An error that occurred during [`SafeWriteOptions::clean_tmp`].
#[derive(Debug, thiserror::Error)]
pub enum CleanTmpError {
    /// The temporary directory cannot be used relative to the handle.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The temporary root could not be traversed.
    #[error("failed to walk the temporary root")]
    Walk(#[source] walkdir::Error),

    /// A temporary artifact could not be removed.
    #[error("failed to remove '{}'", .0.display())]
    Remove(PathBuf, #[source] io::Error),
}

impl CleanTmpError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CleanTmpError::InvalidPath(_) => ErrorKind::BadInput,
            CleanTmpError::Walk(_) | CleanTmpError::Remove(..) => ErrorKind::Filesystem,
        }
    }
}

/// The pre-write hooks that run when no others are configured: rewind the temporary file and
/// make sure it does not contain leftovers from an earlier write.
pub fn default_pre_write_hooks() -> Vec<PreWriteHook> {
    vec![PreWriteHook::Seek(SeekFrom::Start(0)), PreWriteHook::AssertEmpty]
}

/// Configuration of crash safe writes.
///
/// A write first creates a temporary artifact (named according to the [`TempFilePolicy`]), fills
/// it, optionally fixes its permissions and owner, runs hooks, syncs it and finally renames it to
/// the destination. Because the rename is the only step that touches the destination, an
/// observer of the destination either sees the previous content or the complete new content.
///
/// Construct instances with [`SafeWriteOptions::builder`]. The [`Default`] value uses a random
/// pattern of `-*` and places temporary artifacts next to their destination with a `.tmp`
/// suffix.
#[derive(Clone)]
pub struct SafeWriteOptions {
    temp: TempFilePolicy,
    disable_mkdir: bool,
    force_permissions: bool,
    disable_remove_on_error: bool,
    ignore_error_for_cleanup: Option<CleanupPredicate>,
    copy_options: CopyOptions,
    uid: Option<u32>,
    gid: Option<u32>,
    default_pre_hooks: Vec<PreWriteHook>,
    default_post_hooks: Vec<PostWriteHook>,
    disable_sync: bool,
}

impl Default for SafeWriteOptions {
    fn default() -> Self {
        Self {
            temp: TempFilePolicy::default(),
            disable_mkdir: false,
            force_permissions: false,
            disable_remove_on_error: false,
            ignore_error_for_cleanup: None,
            copy_options: CopyOptions::default(),
            uid: None,
            gid: None,
            default_pre_hooks: default_pre_write_hooks(),
            default_post_hooks: Vec::new(),
            disable_sync: false,
        }
    }
}

impl fmt::Debug for SafeWriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeWriteOptions")
            .field("temp", &self.temp)
            .field("disable_mkdir", &self.disable_mkdir)
            .field("force_permissions", &self.force_permissions)
            .field("disable_remove_on_error", &self.disable_remove_on_error)
            .field(
                "ignore_error_for_cleanup",
                &self.ignore_error_for_cleanup.as_ref().map(|_| ".."),
            )
            .field("copy_options", &self.copy_options)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("default_pre_hooks", &self.default_pre_hooks)
            .field("default_post_hooks", &self.default_post_hooks)
            .field("disable_sync", &self.disable_sync)
            .finish()
    }
}

/// Builds validated [`SafeWriteOptions`].
#[derive(Debug, Clone, Default)]
pub struct SafeWriteOptionsBuilder {
    options: SafeWriteOptions,
}

impl SafeWriteOptionsBuilder {
    /// Places all temporary artifacts in this directory (relative to the handle root) instead of
    /// next to their destination. An empty path restores the default.
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        let tmp_dir = tmp_dir.into();
        self.options.temp.tmp_dir = (!tmp_dir.as_os_str().is_empty()).then_some(tmp_dir);
        self
    }

    /// Sets the prefix and suffix of temporary names.
    pub fn with_prefix_suffix(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.options.temp.prefix = prefix.into();
        self.options.temp.suffix = suffix.into();
        self
    }

    /// Sets the random pattern. The last `*` is replaced by random digits, an empty pattern
    /// disables random names.
    pub fn with_random_pattern(mut self, random_pattern: impl Into<String>) -> Self {
        self.options.temp.random_pattern = random_pattern.into();
        self
    }

    /// Replaces the whole temporary naming policy.
    pub fn with_temp_policy(mut self, policy: TempFilePolicy) -> Self {
        self.options.temp = policy;
        self
    }

    /// When set, missing temporary or destination directories are not created and the write
    /// fails instead.
    pub fn with_disable_mkdir(mut self, disable_mkdir: bool) -> Self {
        self.options.disable_mkdir = disable_mkdir;
        self
    }

    /// When set, the permission bits of the temporary artifact are set explicitly, bypassing the
    /// umask. Directories always keep owner write and execute permissions.
    pub fn with_force_permissions(mut self, force_permissions: bool) -> Self {
        self.options.force_permissions = force_permissions;
        self
    }

    /// When set, the temporary artifact is left in place if the write fails.
    pub fn with_disable_remove_on_error(mut self, disable_remove_on_error: bool) -> Self {
        self.options.disable_remove_on_error = disable_remove_on_error;
        self
    }

    /// Keeps the temporary artifact of a failed write if `predicate` returns true for the error.
    pub fn with_ignore_error_for_cleanup(
        mut self,
        predicate: impl Fn(&SafeWriteError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.options.ignore_error_for_cleanup = Some(Arc::new(predicate));
        self
    }

    /// Sets the options used to copy trees and the buffers used to copy content.
    pub fn with_copy_options(mut self, copy_options: CopyOptions) -> Self {
        self.options.copy_options = copy_options;
        self
    }

    /// Changes the owner of temporary artifacts. `None` leaves the respective id unchanged.
    pub fn with_owner(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        self.options.uid = uid;
        self.options.gid = gid;
        self
    }

    /// Replaces the pre-write hooks that run on every temporary artifact.
    pub fn with_default_pre_hooks(mut self, hooks: Vec<PreWriteHook>) -> Self {
        self.options.default_pre_hooks = hooks;
        self
    }

    /// Replaces the post-write hooks that run after the hooks passed to each write.
    pub fn with_default_post_hooks(mut self, hooks: Vec<PostWriteHook>) -> Self {
        self.options.default_post_hooks = hooks;
        self
    }

    /// When set, temporary artifacts are not synced before they are renamed.
    pub fn with_disable_sync(mut self, disable_sync: bool) -> Self {
        self.options.disable_sync = disable_sync;
        self
    }

    /// Validates the configuration.
    pub fn build(self) -> Result<SafeWriteOptions, ConfigError> {
        self.options.temp.validate()?;
        Ok(self.options)
    }
}

impl SafeWriteOptions {
    /// Returns a builder that starts from the default configuration.
    pub fn builder() -> SafeWriteOptionsBuilder {
        SafeWriteOptionsBuilder::default()
    }

    /// Returns a builder that starts from this configuration.
    pub fn to_builder(&self) -> SafeWriteOptionsBuilder {
        SafeWriteOptionsBuilder {
            options: self.clone(),
        }
    }

    /// Returns the temporary naming policy.
    pub fn temp_policy(&self) -> &TempFilePolicy {
        &self.temp
    }

    /// Returns the options used to copy trees.
    pub fn copy_options(&self) -> &CopyOptions {
        &self.copy_options
    }

    /// Writes `content` to `destination` below the root of `fs`.
    ///
    /// The content is first written to a temporary file, which is renamed onto `destination`
    /// once everything else succeeded. An existing file at the destination is replaced. If any
    /// step before the rename fails the temporary file is removed, unless removal is disabled or
    /// the cleanup predicate matches the error. A failed rename leaves the temporary file in
    /// place.
    ///
    /// `post_hooks` run after the content was written and before the default post-write hooks.
    pub fn safe_write(
        &self,
        fs: &DirFs,
        destination: impl AsRef<Path>,
        permissions: u32,
        content: impl Read,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        self.write_file(
            fs,
            destination.as_ref(),
            permissions,
            content,
            post_hooks,
            rand::random::<u32>,
        )
    }

    /// Implements [`SafeWriteOptions::safe_write`] with `next_random` as the source of the random
    /// part of temporary names.
    pub(crate) fn write_file(
        &self,
        fs: &DirFs,
        destination: &Path,
        permissions: u32,
        content: impl Read,
        post_hooks: &[PostWriteHook],
        next_random: impl FnMut() -> u32,
    ) -> Result<(), SafeWriteError> {
        let destination = DirFs::normalize(destination)?;
        self.ensure_temp_dir(fs, &destination)?;

        let random = self.temp.is_random();
        let (temp_path, file) = self.create_temp(&destination, next_random, |path| {
            if random {
                fs.create_new_file(path, permissions)
            } else {
                fs.open_or_create_file(path, permissions)
            }
        })?;
        tracing::trace!("created temporary file '{}'", temp_path.display());

        self.publish(fs, &temp_path, &destination, || {
            self.fill_file(fs, &temp_path, file, permissions, content, post_hooks)
        })
    }

    /// Copies the tree below `source` to `destination` below the root of `fs`.
    ///
    /// The tree is first copied into a temporary directory which is then renamed onto
    /// `destination`. The rename fails if `destination` is an existing non-empty directory.
    /// Failure handling is the same as for [`SafeWriteOptions::safe_write`].
    ///
    /// The temporary directory is created with `permissions` plus owner write and execute, subject
    /// to the umask, so that it can be filled. Those owner bits are kept on the published
    /// directory, also when permissions are forced.
    pub fn safe_write_tree(
        &self,
        fs: &DirFs,
        destination: impl AsRef<Path>,
        permissions: u32,
        source: &DirFs,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        let destination = DirFs::normalize(destination)?;
        self.ensure_temp_dir(fs, &destination)?;

        let (temp_path, ()) =
            self.create_temp(&destination, rand::random::<u32>, |path| {
                fs.create_dir(path, permissions | 0o300)
            })?;
        tracing::trace!("created temporary directory '{}'", temp_path.display());

        self.publish(fs, &temp_path, &destination, || {
            self.fill_tree(fs, &temp_path, permissions, source, post_hooks)
        })
    }

    /// Removes leftover temporary artifacts.
    ///
    /// If a temporary directory is configured, every direct child of it that matches the naming
    /// policy is removed. Otherwise the whole handle is searched. A missing temporary directory
    /// is not an error.
    pub fn clean_tmp(&self, fs: &DirFs) -> Result<(), CleanTmpError> {
        let configured = self.temp.configured_tmp_dir();
        let root = configured.clone().unwrap_or_default();
        if !fs.exists(&root).map_err(|err| CleanTmpError::Remove(root.clone(), err))? {
            return Ok(());
        }

        let mut walker = fs.walk(&root)?.min_depth(1);
        if configured.is_some() {
            walker = walker.max_depth(1);
        }

        let mut entries = walker.into_iter();
        while let Some(entry) = entries.next() {
            let entry = entry.map_err(CleanTmpError::Walk)?;
            let Some(relative) = fs.relative(entry.path()) else {
                continue;
            };
            if !self.temp.matches(relative) {
                continue;
            }

            fs.remove_all(relative)
                .map_err(|err| CleanTmpError::Remove(relative.to_path_buf(), err))?;
            tracing::debug!("removed temporary artifact '{}'", relative.display());
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
        }

        Ok(())
    }

    fn ensure_temp_dir(&self, fs: &DirFs, destination: &Path) -> Result<(), SafeWriteError> {
        if self.disable_mkdir {
            return Ok(());
        }
        let dir = self.temp.temp_dir(destination);
        fs.create_dir_all(&dir)
            .map_err(|err| SafeWriteError::CreateDirectory(dir, err))
    }

    /// Creates the temporary artifact for `destination` by calling `create` with candidate names
    /// until one does not exist yet. `next_random` provides the random part of each name.
    fn create_temp<T>(
        &self,
        destination: &Path,
        mut next_random: impl FnMut() -> u32,
        mut create: impl FnMut(&Path) -> io::Result<T>,
    ) -> Result<(PathBuf, T), SafeWriteError> {
        let name = destination
            .file_name()
            .ok_or(SafeWriteError::EmptyName)?
            .to_string_lossy();
        let dir = self.temp.temp_dir(destination);

        if !self.temp.is_random() {
            let path = dir.join(self.temp.temp_name(&name, 0));
            return match create(&path) {
                Ok(value) => Ok((path, value)),
                Err(err) => Err(SafeWriteError::OpenTemp(path, err)),
            };
        }

        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let path = dir.join(self.temp.temp_name(&name, next_random()));
            match create(&path) {
                Ok(value) => return Ok((path, value)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(SafeWriteError::OpenTemp(path, err)),
            }
        }

        Err(SafeWriteError::MaxRetry {
            pattern: dir.join(self.temp.name_pattern(&name)),
            attempts: MAX_RANDOM_ATTEMPTS,
        })
    }

    /// Runs `stage` and renames the temporary artifact onto the destination if it succeeded, or
    /// removes the artifact if it failed.
    fn publish(
        &self,
        fs: &DirFs,
        temp_path: &Path,
        destination: &Path,
        stage: impl FnOnce() -> Result<(), SafeWriteError>,
    ) -> Result<(), SafeWriteError> {
        let staged = stage().and_then(|()| self.ensure_parent(fs, destination));
        if let Err(err) = staged {
            self.remove_temp(fs, temp_path, &err);
            return Err(err);
        }

        fs.rename(temp_path, destination)
            .map_err(|source| SafeWriteError::Rename {
                from: temp_path.to_path_buf(),
                to: destination.to_path_buf(),
                source,
            })?;
        tracing::debug!("published '{}'", destination.display());
        Ok(())
    }

    fn ensure_parent(&self, fs: &DirFs, destination: &Path) -> Result<(), SafeWriteError> {
        if self.disable_mkdir {
            return Ok(());
        }
        match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs
                .create_dir_all(parent)
                .map_err(|err| SafeWriteError::CreateDirectory(parent.to_path_buf(), err)),
            _ => Ok(()),
        }
    }

    fn remove_temp(&self, fs: &DirFs, temp_path: &Path, err: &SafeWriteError) {
        if self.disable_remove_on_error {
            return;
        }
        if let Some(predicate) = &self.ignore_error_for_cleanup {
            if predicate(err) {
                return;
            }
        }
        if let Err(remove_err) = fs.remove_all(temp_path) {
            tracing::warn!(
                "failed to remove temporary artifact '{}': {remove_err}",
                temp_path.display()
            );
        }
    }

    fn fill_file(
        &self,
        fs: &DirFs,
        temp_path: &Path,
        mut file: fs::File,
        permissions: u32,
        mut content: impl Read,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        let mut artifact = TempArtifact::File {
            path: temp_path,
            file: &mut file,
        };
        for hook in &self.default_pre_hooks {
            hook.run(&mut artifact)
                .map_err(|err| SafeWriteError::PreHook(temp_path.to_path_buf(), err))?;
        }

        let mut buffer = self.copy_options.buffers.acquire();
        let copied = match &self.copy_options.cancellation {
            Some(token) => copy_with_buffer(
                &mut Cancellable::new(content, token.clone()),
                &mut file,
                &mut buffer,
            ),
            None => copy_with_buffer(&mut content, &mut file, &mut buffer),
        };
        match copied {
            Ok(_) => {}
            Err(err) if is_cancelled(&err) => return Err(SafeWriteError::Cancelled(Cancelled)),
            Err(err) => return Err(SafeWriteError::Write(temp_path.to_path_buf(), err)),
        }
        drop(buffer);

        self.apply_ownership(fs, temp_path, permissions)?;
        self.run_post_hooks(temp_path, post_hooks)?;

        if !self.disable_sync {
            file.sync_all()
                .map_err(|err| SafeWriteError::Sync(temp_path.to_path_buf(), err))?;
        }
        Ok(())
    }

    fn fill_tree(
        &self,
        fs: &DirFs,
        temp_path: &Path,
        permissions: u32,
        source: &DirFs,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        let location = fs.resolve(temp_path)?;
        let mut artifact = TempArtifact::Directory {
            path: temp_path,
            location: &location,
        };
        for hook in &self.default_pre_hooks {
            hook.run(&mut artifact)
                .map_err(|err| SafeWriteError::PreHook(temp_path.to_path_buf(), err))?;
        }

        copy_fs(&DirFs::new(&location), source, &self.copy_options).map_err(|err| match err {
            CopyError::Cancelled(cancelled) => SafeWriteError::Cancelled(cancelled),
            err => SafeWriteError::CopyTree(temp_path.to_path_buf(), err),
        })?;

        self.apply_ownership(fs, temp_path, permissions | 0o300)?;
        self.run_post_hooks(temp_path, post_hooks)?;

        if !self.disable_sync {
            sync_dir(&location)
                .map_err(|err| SafeWriteError::Sync(temp_path.to_path_buf(), err))?;
        }
        Ok(())
    }

    fn apply_ownership(
        &self,
        fs: &DirFs,
        temp_path: &Path,
        permissions: u32,
    ) -> Result<(), SafeWriteError> {
        if self.force_permissions {
            fs.set_permissions(temp_path, permissions)
                .map_err(|err| SafeWriteError::Chmod(temp_path.to_path_buf(), err))?;
        }
        if self.uid.is_some() || self.gid.is_some() {
            fs.chown(temp_path, self.uid, self.gid)
                .map_err(|err| SafeWriteError::Chown(temp_path.to_path_buf(), err))?;
        }
        Ok(())
    }

    fn run_post_hooks(
        &self,
        temp_path: &Path,
        post_hooks: &[PostWriteHook],
    ) -> Result<(), SafeWriteError> {
        for hook in post_hooks.iter().chain(&self.default_post_hooks) {
            hook.run()
                .map_err(|err| SafeWriteError::PostHook(temp_path.to_path_buf(), err))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    fs::File::open(path)?.sync_all()
}

// Directories cannot be opened as files on this platform.
#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hooks::tee_hasher;
    use assert_matches::assert_matches;
    use sha2::Sha256;

    fn failing_hook() -> PostWriteHook {
        let (mut reader, hook) = tee_hasher::<Sha256, _>(&b""[..], vec![0u8; 32]);
        std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
        hook
    }

    #[test]
    fn test_build_rejects_bad_patterns() {
        assert_matches!(
            SafeWriteOptions::builder()
                .with_prefix_suffix("a*", "")
                .build(),
            Err(ConfigError::Wildcard { field: "prefix", .. })
        );
        assert_matches!(
            SafeWriteOptions::builder()
                .with_random_pattern("x/*")
                .build(),
            Err(ConfigError::Separator { .. })
        );
        assert_matches!(
            SafeWriteOptions::builder().with_tmp_dir("../tmp").build(),
            Err(ConfigError::InvalidTempDir(_))
        );
    }

    #[test]
    fn test_root_destination_has_no_name() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirFs::new(dir.path());
        let err = SafeWriteOptions::default()
            .safe_write(&fs, "/", 0o644, &b""[..], &[])
            .unwrap_err();
        assert_matches!(err, SafeWriteError::EmptyName);
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[test]
    fn test_escaping_destination() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirFs::new(dir.path().join("inner"));
        let err = SafeWriteOptions::default()
            .safe_write(&fs, "../outside", 0o644, &b"x"[..], &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInput);
        assert!(!dir.path().join("outside").exists());
    }

    #[test]
    fn test_hook_failure_kind() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirFs::new(dir.path());
        let err = SafeWriteOptions::default()
            .safe_write(&fs, "a", 0o644, &b"x"[..], &[failing_hook()])
            .unwrap_err();
        assert_matches!(err, SafeWriteError::PostHook(..));
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    }

    #[test]
    fn test_cancelled_write_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirFs::new(dir.path());
        let token = durable_stream::CancellationToken::new();
        token.cancel();

        let options = SafeWriteOptions::builder()
            .with_copy_options(CopyOptions::default().with_cancellation(token))
            .build()
            .unwrap();
        let err = options
            .safe_write(&fs, "a", 0o644, &b"content"[..], &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(fs.read_dir_names("").unwrap().is_empty());
    }

    #[test]
    fn test_name_collisions_exhaust_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirFs::new(dir.path());
        let options = SafeWriteOptions::default();
        let taken = options.temp_policy().temp_name("a", 7);
        fs.create_new_file(&taken, 0o644).unwrap();

        let err = options
            .write_file(&fs, Path::new("a"), 0o644, &b"x"[..], &[], || 7)
            .unwrap_err();
        assert_matches!(
            &err,
            SafeWriteError::MaxRetry { pattern, attempts }
                if pattern == Path::new("a-*.tmp") && *attempts == MAX_RANDOM_ATTEMPTS
        );
        assert_eq!(err.kind(), ErrorKind::NameCollisionExhausted);
        assert!(!fs.exists("a").unwrap());
        assert_eq!(fs.read_dir_names("").unwrap(), [taken]);
    }

    #[test]
    fn test_single_collision_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DirFs::new(dir.path());
        let options = SafeWriteOptions::default();
        let taken = options.temp_policy().temp_name("a", 7);
        fs.create_new_file(&taken, 0o644).unwrap();

        let mut numbers = [7, 8].into_iter();
        options
            .write_file(&fs, Path::new("a"), 0o644, &b"x"[..], &[], || {
                numbers.next().unwrap()
            })
            .unwrap();

        assert_eq!(fs_err::read(dir.path().join("a")).unwrap(), b"x");
        assert_eq!(fs.read_dir_names("").unwrap(), ["a".to_string(), taken]);
    }
}
