//! Loading [`SafeWriteOptions`] from TOML configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    buffer_pool::BufferPool,
    copy::{CopyOptions, NonRegularFiles},
    safe_write::{ConfigError, SafeWriteOptions},
};

/// An error that can occur when loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("failed to read configuration file")]
    IoError(#[from] std::io::Error),

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse configuration file")]
    ParseError(#[from] toml::de::Error),

    /// The configuration was parsed but describes invalid options.
    #[error("invalid configuration")]
    ValidationError(#[from] ConfigError),
}

/// The owner that is applied to written artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OwnerConfig {
    /// The user id, unchanged if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,

    /// The group id, unchanged if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// The serializable form of [`SafeWriteOptions`].
///
/// ```toml
/// tmp-dir = ".tmp"
/// prefix = "incoming-"
/// random-pattern = "-*"
/// force-permissions = true
///
/// [owner]
/// uid = 1000
/// ```
///
/// Every key is optional, unset keys keep the defaults of [`SafeWriteOptions::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SafeWriteConfig {
    /// See [`crate::SafeWriteOptionsBuilder::with_tmp_dir`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,

    /// Prepended to temporary names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Appended to temporary names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// See [`crate::SafeWriteOptionsBuilder::with_random_pattern`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_pattern: Option<String>,

    /// Fail instead of creating missing directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_mkdir: Option<bool>,

    /// Set permission bits explicitly instead of relying on the umask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_permissions: Option<bool>,

    /// Keep temporary artifacts of failed writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_remove_on_error: Option<bool>,

    /// Skip syncing temporary artifacts before they are renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_sync: Option<bool>,

    /// The owner of written artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerConfig>,

    /// Skip symbolic links and other non-regular entries when copying trees instead of failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_non_regular_files: Option<bool>,

    /// Do not copy permission bits when copying trees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_chmod: Option<bool>,

    /// The size of the buffers used to copy content, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
}

impl SafeWriteConfig {
    /// Reads the configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let contents = fs_err::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parses the configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(contents)?)
    }

    /// Converts the configuration into validated options.
    pub fn into_options(self) -> Result<SafeWriteOptions, LoadError> {
        let defaults = SafeWriteOptions::default();
        let mut policy = defaults.temp_policy().clone();
        if let Some(tmp_dir) = self.tmp_dir {
            policy.tmp_dir = (!tmp_dir.as_os_str().is_empty()).then_some(tmp_dir);
        }
        if let Some(prefix) = self.prefix {
            policy.prefix = prefix;
        }
        if let Some(suffix) = self.suffix {
            policy.suffix = suffix;
        }
        if let Some(random_pattern) = self.random_pattern {
            policy.random_pattern = random_pattern;
        }

        let mut copy_options = CopyOptions::default()
            .with_no_chmod(self.no_chmod.unwrap_or(false));
        if self.skip_non_regular_files.unwrap_or(false) {
            copy_options = copy_options.with_non_regular_files(NonRegularFiles::Skip);
        }
        if let Some(buffer_size) = self.buffer_size {
            copy_options = copy_options.with_buffers(BufferPool::new(buffer_size));
        }

        let owner = self.owner.unwrap_or_default();
        let options = defaults
            .to_builder()
            .with_temp_policy(policy)
            .with_disable_mkdir(self.disable_mkdir.unwrap_or(false))
            .with_force_permissions(self.force_permissions.unwrap_or(false))
            .with_disable_remove_on_error(self.disable_remove_on_error.unwrap_or(false))
            .with_disable_sync(self.disable_sync.unwrap_or(false))
            .with_owner(owner.uid, owner.gid)
            .with_copy_options(copy_options)
            .build()?;
        Ok(options)
    }
}
