//! Checks and actions that run against a temporary artifact before it is published.

use digest::DynDigest;
use durable_stream::Close;
use fs_err as fs;
use parking_lot::Mutex;
use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::ErrorKind;

/// The temporary artifact a hook operates on.
pub enum TempArtifact<'a> {
    /// A temporary file, opened for reading and writing.
    File {
        /// The path of the file relative to the handle root.
        path: &'a Path,
        /// The open file.
        file: &'a mut fs::File,
    },
    /// A temporary directory.
    Directory {
        /// The path of the directory relative to the handle root.
        path: &'a Path,
        /// The absolute location of the directory.
        location: &'a Path,
    },
}

impl TempArtifact<'_> {
    fn path(&self) -> &Path {
        match self {
            TempArtifact::File { path, .. } | TempArtifact::Directory { path, .. } => path,
        }
    }
}

/// An error returned by a hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The checksum of the written data does not match the expected checksum.
    #[error("checksum mismatch, expected {expected} but got {actual}")]
    ChecksumMismatch {
        /// The expected checksum, hex encoded.
        expected: String,
        /// The actual checksum, hex encoded.
        actual: String,
    },

    /// The temporary artifact was expected to be empty. `size` is the number of bytes of a file or
    /// the number of entries of a directory.
    #[error("expected '{}' to be empty but it has a size of {size}", .path.display())]
    NotEmpty {
        /// The path of the temporary artifact.
        path: PathBuf,
        /// The size of the artifact.
        size: u64,
    },

    /// An I/O error occurred while running the hook.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HookError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HookError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            HookError::NotEmpty { .. } => ErrorKind::BadInput,
            HookError::Io(err) => ErrorKind::of_io(err),
        }
    }
}

/// A check that runs on a freshly opened temporary artifact before any content is written to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreWriteHook {
    /// Moves the file cursor. Does nothing for directories.
    Seek(SeekFrom),

    /// Fails if the file already contains data or the directory already contains entries.
    AssertEmpty,
}

impl PreWriteHook {
    /// Runs the hook against the artifact.
    pub fn run(&self, artifact: &mut TempArtifact<'_>) -> Result<(), HookError> {
        match (self, artifact) {
            (PreWriteHook::Seek(pos), TempArtifact::File { file, .. }) => {
                file.seek(*pos)?;
                Ok(())
            }
            (PreWriteHook::Seek(_), TempArtifact::Directory { .. }) => Ok(()),
            (PreWriteHook::AssertEmpty, artifact) => {
                let size = match &*artifact {
                    TempArtifact::File { file, .. } => file.metadata()?.len(),
                    TempArtifact::Directory { location, .. } => {
                        fs::read_dir(location)?.count() as u64
                    }
                };
                if size == 0 {
                    Ok(())
                } else {
                    Err(HookError::NotEmpty {
                        path: artifact.path().to_path_buf(),
                        size,
                    })
                }
            }
        }
    }
}

type SharedHasher = Arc<Mutex<Box<dyn DynDigest + Send>>>;

/// Compares the digest of everything that passed through a [`TeeReader`] with an expected value.
#[derive(Clone)]
pub struct ChecksumValidator {
    hasher: SharedHasher,
    expected: Vec<u8>,
}

impl ChecksumValidator {
    /// Returns the expected digest.
    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    /// Returns the digest of the data seen so far.
    pub fn actual(&self) -> Box<[u8]> {
        DynDigest::box_clone(&**self.hasher.lock()).finalize()
    }

    /// Fails with [`HookError::ChecksumMismatch`] if the digest of the data seen so far differs
    /// from the expected digest.
    pub fn validate(&self) -> Result<(), HookError> {
        let actual = self.actual();
        if actual.as_ref() == self.expected.as_slice() {
            Ok(())
        } else {
            Err(HookError::ChecksumMismatch {
                expected: hex::encode(&self.expected),
                actual: hex::encode(actual),
            })
        }
    }
}

impl fmt::Debug for ChecksumValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumValidator")
            .field("expected", &hex::encode(&self.expected))
            .finish_non_exhaustive()
    }
}

/// A resource that is closed once a write succeeded up to the post-write hooks.
#[derive(Clone)]
pub struct CloseHook {
    resource: Arc<Mutex<Option<Box<dyn Close + Send>>>>,
}

impl CloseHook {
    /// Wraps a closable resource. The resource is closed at most once.
    pub fn new(resource: impl Close + Send + 'static) -> Self {
        let resource: Box<dyn Close + Send> = Box::new(resource);
        Self {
            resource: Arc::new(Mutex::new(Some(resource))),
        }
    }

    fn close(&self) -> io::Result<()> {
        match self.resource.lock().take() {
            Some(mut resource) => resource.close(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CloseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHook").finish_non_exhaustive()
    }
}

/// A check or action that runs after the content was written to a temporary artifact but before
/// it is synced and renamed into place. A failing hook aborts the write.
#[derive(Debug, Clone)]
pub enum PostWriteHook {
    /// Validates a checksum computed while the content was read.
    ValidateChecksum(ChecksumValidator),

    /// Closes a resource, typically the reader the content came from.
    Close(CloseHook),
}

impl PostWriteHook {
    /// Constructs a [`PostWriteHook::Close`] hook.
    pub fn close(resource: impl Close + Send + 'static) -> Self {
        PostWriteHook::Close(CloseHook::new(resource))
    }

    /// Runs the hook.
    pub fn run(&self) -> Result<(), HookError> {
        match self {
            PostWriteHook::ValidateChecksum(validator) => validator.validate(),
            PostWriteHook::Close(hook) => Ok(hook.close()?),
        }
    }
}

/// A reader that feeds everything it reads into a hasher. Constructed with [`tee_hasher`].
pub struct TeeReader<R> {
    reader: R,
    hasher: SharedHasher,
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.lock().update(&buf[..bytes_read]);
        Ok(bytes_read)
    }
}

impl<R> TeeReader<R> {
    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> fmt::Debug for TeeReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeReader").finish_non_exhaustive()
    }
}

/// Wraps `reader` so that everything read from it is hashed with `D`, and returns a
/// [`PostWriteHook::ValidateChecksum`] hook that compares the final digest with `expected`.
///
/// Pass the reader as the content of [`crate::SafeWriteOptions::safe_write`] together with the
/// hook to prevent corrupted content from ever appearing at the destination.
///
/// ```
/// use durable_fs::tee_hasher;
/// use sha2::{Digest, Sha256};
/// use std::io::Read;
///
/// let expected = Sha256::digest(b"hello");
/// let (mut reader, hook) = tee_hasher::<Sha256, _>(&b"hello"[..], expected.to_vec());
/// std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
/// assert!(hook.run().is_ok());
/// ```
pub fn tee_hasher<D, R>(reader: R, expected: impl Into<Vec<u8>>) -> (TeeReader<R>, PostWriteHook)
where
    D: DynDigest + Default + Send + 'static,
{
    let digest: Box<dyn DynDigest + Send> = Box::new(D::default());
    let hasher: SharedHasher = Arc::new(Mutex::new(digest));
    let validator = ChecksumValidator {
        hasher: hasher.clone(),
        expected: expected.into(),
    };
    (
        TeeReader { reader, hasher },
        PostWriteHook::ValidateChecksum(validator),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use hex_literal::hex;
    use sha2::Sha256;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HELLO_SHA256: [u8; 32] =
        hex!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");

    #[test]
    fn test_checksum_match() {
        let (mut reader, hook) = tee_hasher::<Sha256, _>(&b"hello"[..], HELLO_SHA256);
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hello");
        hook.run().unwrap();
        // Validation does not consume the hasher state.
        hook.run().unwrap();
    }

    #[test]
    fn test_actual_digest_follows_reads() {
        let (mut reader, hook) = tee_hasher::<Sha256, _>(&b"hello"[..], HELLO_SHA256);
        let PostWriteHook::ValidateChecksum(validator) = &hook else {
            panic!("expected a checksum hook");
        };
        assert_ne!(validator.actual().as_ref(), HELLO_SHA256);

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_ne!(validator.actual().as_ref(), HELLO_SHA256);

        reader.read_to_end(&mut Vec::new()).unwrap();
        assert_eq!(validator.actual().as_ref(), HELLO_SHA256);
        assert_eq!(validator.expected(), HELLO_SHA256);
    }

    #[test]
    fn test_checksum_mismatch() {
        let (mut reader, hook) = tee_hasher::<Sha256, _>(&b"hellO"[..], HELLO_SHA256);
        std::io::copy(&mut reader, &mut std::io::sink()).unwrap();

        let err = hook.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_matches!(err, HookError::ChecksumMismatch { expected, .. } if expected == hex::encode(HELLO_SHA256));
    }

    #[test]
    fn test_assert_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        let mut file = fs::File::create(&path).unwrap();

        let hook = PreWriteHook::AssertEmpty;
        let mut artifact = TempArtifact::File {
            path: Path::new("file"),
            file: &mut file,
        };
        hook.run(&mut artifact).unwrap();

        file.write_all(b"leftover").unwrap();
        let mut artifact = TempArtifact::File {
            path: Path::new("file"),
            file: &mut file,
        };
        assert_matches!(
            hook.run(&mut artifact),
            Err(HookError::NotEmpty { size: 8, .. })
        );

        let mut artifact = TempArtifact::Directory {
            path: Path::new(""),
            location: dir.path(),
        };
        assert_matches!(
            hook.run(&mut artifact),
            Err(HookError::NotEmpty { size: 1, .. })
        );
    }

    struct Counted(Arc<AtomicUsize>);

    impl Close for Counted {
        fn close(&mut self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_close_hook_closes_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = PostWriteHook::close(Counted(count.clone()));
        hook.run().unwrap();
        hook.clone().run().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
