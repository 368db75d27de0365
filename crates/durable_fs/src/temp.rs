//! Naming of the temporary artifacts that are written before being renamed into place.

use std::path::{Path, PathBuf};

use crate::{dir_fs::DirFs, safe_write::ConfigError};

/// The suffix that is appended to temporary names when neither a suffix nor a temporary directory
/// is configured.
pub const DEFAULT_TEMP_SUFFIX: &str = ".tmp";

/// The random pattern used by default. The `*` is replaced with random digits.
pub const DEFAULT_RANDOM_PATTERN: &str = "-*";

/// The number of random names that are tried before giving up.
pub const MAX_RANDOM_ATTEMPTS: usize = 10_000;

/// Describes where temporary artifacts are created and how they are named.
///
/// A temporary artifact for the destination `dir/name` is called
/// `<prefix><name><pattern prefix><10 random digits><pattern suffix><suffix>` where the pattern is
/// split at its last `*`. A pattern without `*` is treated as if it ended with one. An empty
/// pattern disables the random part, in which case the same name is used for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempFilePolicy {
    /// The directory, relative to the handle root, that receives all temporary artifacts. If
    /// `None`, each artifact is created next to its destination.
    pub tmp_dir: Option<PathBuf>,

    /// Prepended to temporary names. Must not contain `*` or a path separator.
    pub prefix: String,

    /// Appended to temporary names. Must not contain `*` or a path separator. If empty and no
    /// `tmp_dir` is configured, [`DEFAULT_TEMP_SUFFIX`] is used instead.
    pub suffix: String,

    /// Inserted between the destination name and the suffix. Must not contain a path separator.
    pub random_pattern: String,
}

impl Default for TempFilePolicy {
    fn default() -> Self {
        Self {
            tmp_dir: None,
            prefix: String::new(),
            suffix: String::new(),
            random_pattern: DEFAULT_RANDOM_PATTERN.to_string(),
        }
    }
}

fn contains_separator(s: &str) -> bool {
    s.chars().any(std::path::is_separator) || s.contains('/')
}

impl TempFilePolicy {
    /// Checks the policy for names that can never produce a valid temporary name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("prefix", &self.prefix), ("suffix", &self.suffix)] {
            if value.contains('*') {
                return Err(ConfigError::Wildcard {
                    field,
                    value: value.clone(),
                });
            }
            if contains_separator(value) {
                return Err(ConfigError::Separator {
                    field,
                    value: value.clone(),
                });
            }
        }
        if contains_separator(&self.random_pattern) {
            return Err(ConfigError::Separator {
                field: "random pattern",
                value: self.random_pattern.clone(),
            });
        }
        if let Some(tmp_dir) = &self.tmp_dir {
            DirFs::normalize(tmp_dir).map_err(ConfigError::InvalidTempDir)?;
        }
        Ok(())
    }

    /// Returns the configured temporary directory, normalized. An empty directory or the root are
    /// treated as not configured.
    pub fn configured_tmp_dir(&self) -> Option<PathBuf> {
        self.tmp_dir
            .as_ref()
            .and_then(|dir| DirFs::normalize(dir).ok())
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    /// Returns the directory that receives the temporary artifact for `destination`.
    pub fn temp_dir(&self, destination: &Path) -> PathBuf {
        self.configured_tmp_dir().unwrap_or_else(|| {
            destination
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        })
    }

    /// Returns the suffix that is actually used.
    pub fn suffix_or_default(&self) -> &str {
        if !self.suffix.is_empty() {
            &self.suffix
        } else if self.configured_tmp_dir().is_none() {
            DEFAULT_TEMP_SUFFIX
        } else {
            ""
        }
    }

    /// Returns true if names contain a random part.
    pub fn is_random(&self) -> bool {
        !self.random_pattern.is_empty()
    }

    /// Splits the random pattern at its last `*`.
    fn pattern_parts(&self) -> (&str, &str) {
        match self.random_pattern.rfind('*') {
            Some(idx) => (
                &self.random_pattern[..idx],
                &self.random_pattern[idx + 1..],
            ),
            None => (self.random_pattern.as_str(), ""),
        }
    }

    /// Builds the temporary name for the destination base name `name`. The random part is only
    /// included if the policy has a random pattern.
    pub fn temp_name(&self, name: &str, random: u32) -> String {
        self.compose(name, &format!("{random:010}"))
    }

    /// Like [`TempFilePolicy::temp_name`] but with `*` in place of the random digits.
    pub fn name_pattern(&self, name: &str) -> String {
        self.compose(name, "*")
    }

    fn compose(&self, name: &str, random: &str) -> String {
        let mut temp_name = format!("{}{name}", self.prefix);
        if self.is_random() {
            let (before, after) = self.pattern_parts();
            temp_name.push_str(before);
            temp_name.push_str(random);
            temp_name.push_str(after);
        }
        temp_name.push_str(self.suffix_or_default());
        temp_name
    }

    /// Returns true if the entry at `path` (relative to the handle root) looks like a temporary
    /// artifact created with this policy.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        if let Some(tmp_dir) = self.configured_tmp_dir() {
            if path.parent() != Some(tmp_dir.as_path()) {
                return false;
            }
        }
        name.starts_with(&self.prefix) && name.ends_with(self.suffix_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn policy(tmp_dir: Option<&str>, prefix: &str, suffix: &str, pattern: &str) -> TempFilePolicy {
        TempFilePolicy {
            tmp_dir: tmp_dir.map(PathBuf::from),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            random_pattern: pattern.to_string(),
        }
    }

    #[rstest]
    #[case(policy(None, "", "", "-*"), "baz-0000000042.tmp")]
    #[case(policy(Some("/tmp"), "", "", "-*"), "baz-0000000042")]
    #[case(policy(Some("/tmp"), "pref-", ".tmp", "-*"), "pref-baz-0000000042.tmp")]
    #[case(policy(Some("tmptmp"), "temp-pref-", ".suf", ""), "temp-pref-baz.suf")]
    #[case(policy(None, "", "", "."), "baz.0000000042.tmp")]
    #[case(policy(None, "", "", "*-*.x"), "baz*-0000000042.x.tmp")]
    #[case(policy(Some("/"), "", "", "-*"), "baz-0000000042.tmp")]
    fn test_temp_name(#[case] policy: TempFilePolicy, #[case] expected: &str) {
        assert_eq!(policy.temp_name("baz", 42), expected);
    }

    #[test]
    fn test_name_pattern() {
        assert_eq!(TempFilePolicy::default().name_pattern("baz"), "baz-*.tmp");
        assert_eq!(policy(None, "", "", "").name_pattern("baz"), "baz.tmp");
    }

    #[test]
    fn test_random_digits_are_padded() {
        let name = TempFilePolicy::default().temp_name("f", u32::MAX);
        assert_eq!(name, "f-4294967295.tmp");
    }

    #[test]
    fn test_temp_dir() {
        let default = TempFilePolicy::default();
        assert_eq!(default.temp_dir(Path::new("foo/bar/baz")), Path::new("foo/bar"));
        assert_eq!(default.temp_dir(Path::new("baz")), Path::new(""));

        let dedicated = policy(Some("/tmp/"), "", "", "-*");
        assert_eq!(dedicated.temp_dir(Path::new("foo/bar/baz")), Path::new("tmp"));
    }

    #[rstest]
    #[case(policy(None, "", "", "-*"), "foo/bar/baz-0123456789.tmp", true)]
    #[case(policy(None, "", "", "-*"), "foo/bar/baz", false)]
    #[case(policy(Some("tmp"), "", "", "-*"), "tmp/anything", true)]
    #[case(policy(Some("tmp"), "", "", "-*"), "other/anything", false)]
    #[case(policy(Some("tmp"), "", "", "-*"), "tmp/nested/anything", false)]
    #[case(policy(Some("tmp"), "p-", ".s", "-*"), "tmp/p-x.s", true)]
    #[case(policy(Some("tmp"), "p-", ".s", "-*"), "tmp/x.s", false)]
    fn test_matches(#[case] policy: TempFilePolicy, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(policy.matches(Path::new(path)), expected);
    }

    #[rstest]
    #[case(policy(None, "a*", "", "-*"))]
    #[case(policy(None, "", "*", "-*"))]
    #[case(policy(None, "a/b", "", "-*"))]
    #[case(policy(None, "", "", "x/*"))]
    fn test_invalid_policies(#[case] policy: TempFilePolicy) {
        assert_matches!(
            policy.validate(),
            Err(ConfigError::Wildcard { .. } | ConfigError::Separator { .. })
        );
    }

    #[test]
    fn test_escaping_tmp_dir_is_invalid() {
        assert_matches!(
            policy(Some("../tmp"), "", "", "-*").validate(),
            Err(ConfigError::InvalidTempDir(_))
        );
    }
}
