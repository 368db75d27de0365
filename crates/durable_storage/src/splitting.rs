//! Storing a large stream as several fixed-size chunks and reading it back as one stream.

use durable_fs::{DirFs, ErrorKind, PathError, SafeWriteError};
use durable_stream::{SegmentedReader, SizedReaderAt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::HashSet,
    ffi::OsString,
    fmt,
    io::{self, Read},
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::safe_writer::SafeWriter;

/// The suffix of the metadata file that describes the chunks of a path.
pub const METADATA_SUFFIX: &str = ".meta.json";

const READ_AHEAD_SIZE: u64 = 8 * 1024;

/// Computes the path of the chunk with the given index from the path of the whole stream.
pub type PathModifier = dyn Fn(&Path, usize) -> PathBuf + Send + Sync;

/// An error that occurred while writing or reading chunked data.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// A path cannot be used relative to the handle.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The path modifier produced the same chunk path twice.
    #[error("the chunk path '{}' is produced more than once", .0.display())]
    DuplicateName(PathBuf),

    /// The input could not be read.
    #[error("failed to read the input")]
    ReadInput(#[source] io::Error),

    /// A chunk or the metadata could not be written.
    #[error("failed to write '{}'", .0.display())]
    Write(PathBuf, #[source] SafeWriteError),

    /// The metadata file could not be read.
    #[error("failed to read the metadata file '{}'", .0.display())]
    ReadMetadata(PathBuf, #[source] io::Error),

    /// The metadata file is not valid.
    #[error("failed to parse the metadata file '{}'", .0.display())]
    ParseMetadata(PathBuf, #[source] serde_json::Error),

    /// The metadata could not be serialized.
    #[error("failed to serialize the metadata")]
    SerializeMetadata(#[source] serde_json::Error),

    /// The sizes of the chunks do not add up to the recorded total size.
    #[error("the chunks of '{}' add up to {chunks} bytes but the total size is {total}", .path.display())]
    InconsistentMetadata {
        /// The path of the stream.
        path: PathBuf,
        /// The recorded total size.
        total: u64,
        /// The sum of the recorded chunk sizes.
        chunks: u64,
    },

    /// A chunk could not be opened.
    #[error("failed to open the chunk '{}'", .0.display())]
    OpenChunk(PathBuf, #[source] io::Error),
}

impl SplitError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SplitError::InvalidPath(_)
            | SplitError::DuplicateName(_)
            | SplitError::ParseMetadata(..)
            | SplitError::SerializeMetadata(_) => ErrorKind::BadInput,
            SplitError::InconsistentMetadata { .. } => ErrorKind::ChecksumMismatch,
            SplitError::ReadInput(err) => ErrorKind::of_io(err),
            SplitError::Write(_, err) => err.kind(),
            SplitError::ReadMetadata(..) | SplitError::OpenChunk(..) => ErrorKind::Filesystem,
        }
    }
}

/// Splits a reader into consecutive chunks of at most `size` bytes.
///
/// Call [`SplitReader::next_chunk`] until it returns `None`. Each chunk has to be read to its
/// end before the next one is requested, otherwise the unread bytes end up in the next chunk.
#[derive(Debug)]
pub struct SplitReader<R> {
    reader: R,
    size: NonZeroU64,
    head: Vec<u8>,
    finished: bool,
}

/// A chunk returned by [`SplitReader::next_chunk`].
pub struct Chunk<'a, R> {
    inner: io::Chain<&'a [u8], io::Take<&'a mut R>>,
}

impl<R: Read> Read for Chunk<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> fmt::Debug for Chunk<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk").finish_non_exhaustive()
    }
}

impl<R: Read> SplitReader<R> {
    /// Constructs a new splitter.
    pub fn new(reader: R, size: NonZeroU64) -> Self {
        Self {
            reader,
            size,
            head: Vec::new(),
            finished: false,
        }
    }

    /// Returns the maximum size of a chunk.
    pub fn chunk_size(&self) -> NonZeroU64 {
        self.size
    }

    /// Returns the next chunk or `None` once the reader is exhausted. A chunk is only returned if
    /// at least one byte is available, so an empty reader yields no chunks at all. Only the last
    /// chunk may be shorter than the chunk size.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk<'_, R>>> {
        if self.finished {
            return Ok(None);
        }

        let limit = self.size.get().min(READ_AHEAD_SIZE) as usize;
        self.head.resize(limit, 0);
        let read = loop {
            match self.reader.read(&mut self.head[..limit]) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.finished = true;
                    return Err(err);
                }
            }
        };
        if read == 0 {
            self.finished = true;
            return Ok(None);
        }

        let remaining = self.size.get() - read as u64;
        Ok(Some(Chunk {
            inner: (&self.head[..read]).chain((&mut self.reader).take(remaining)),
        }))
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// The default [`PathModifier`]: appends `_` and the index padded to three digits, e.g.
/// `data/blob` becomes `data/blob_000`. A trailing separator is removed first.
pub fn append_index(path: &Path, index: usize) -> PathBuf {
    let path = path.to_string_lossy();
    let path = path.trim_end_matches(std::path::is_separator);
    PathBuf::from(format!("{path}_{index:03}"))
}

/// Writes `reader` as chunks of at most `size` bytes, each with its own safe write, and returns
/// the paths of the chunks in order.
///
/// The chunk paths are derived from `path` with `path_modifier`, or [`append_index`] if none is
/// given. If the modifier produces the same path twice the write stops with
/// [`SplitError::DuplicateName`]; chunks that were written before stay in place.
pub fn write_splitting(
    writer: &SafeWriter,
    path: impl AsRef<Path>,
    permissions: u32,
    reader: impl Read,
    size: NonZeroU64,
    path_modifier: Option<&PathModifier>,
) -> Result<Vec<PathBuf>, SplitError> {
    write_chunks(
        path.as_ref(),
        reader,
        size,
        path_modifier,
        |chunk_path, chunk| writer.write(chunk_path, permissions, chunk, &[]),
    )
}

fn write_chunks<R: Read>(
    path: &Path,
    reader: R,
    size: NonZeroU64,
    path_modifier: Option<&PathModifier>,
    mut write: impl FnMut(&Path, &mut Chunk<'_, R>) -> Result<(), SafeWriteError>,
) -> Result<Vec<PathBuf>, SplitError> {
    let mut splitter = SplitReader::new(reader, size);
    let mut seen = HashSet::new();
    let mut written = Vec::new();

    let mut index = 0;
    while let Some(mut chunk) = splitter.next_chunk().map_err(SplitError::ReadInput)? {
        let chunk_path = match path_modifier {
            Some(modifier) => modifier(path, index),
            None => append_index(path, index),
        };
        let chunk_path = DirFs::normalize(chunk_path)?;
        if !seen.insert(chunk_path.clone()) {
            return Err(SplitError::DuplicateName(chunk_path));
        }
        index += 1;

        write(&chunk_path, &mut chunk).map_err(|err| SplitError::Write(chunk_path.clone(), err))?;
        tracing::trace!("wrote chunk '{}'", chunk_path.display());
        written.push(chunk_path);
    }

    Ok(written)
}

/// Describes a stream or one of its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// The path relative to the handle the data was written to.
    pub path: PathBuf,

    /// The size in bytes.
    pub size: u64,

    /// The hex encoded SHA-256 digest of the data.
    pub sha256: String,
}

/// The content of a metadata file written by [`SplittingStorage::write`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitMetadata {
    /// Describes the whole stream.
    pub total: ChunkRecord,

    /// Describes every chunk, in stream order.
    pub chunks: Vec<ChunkRecord>,
}

/// Hashes and counts everything read through it.
struct Measured<R> {
    reader: R,
    hasher: Sha256,
    size: u64,
}

impl<R> Measured<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn into_record(self, path: PathBuf) -> ChunkRecord {
        ChunkRecord {
            path,
            size: self.size,
            sha256: hex::encode(self.hasher.finalize()),
        }
    }
}

impl<R: Read> Read for Measured<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.reader.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.size += read as u64;
        Ok(read)
    }
}

/// Stores streams as chunks in one directory and describes them with metadata files in
/// another.
///
/// Writing `path` produces the chunks `path_000`, `path_001`, ... through the file writer and
/// `path.meta.json` through the metadata writer. The metadata records the size and SHA-256 of
/// every chunk and of the whole stream. Reading `path` opens the recorded chunks and returns a
/// [`SegmentedReader`] that uses the recorded sizes as declared sizes, so a truncated or grown
/// chunk fails the read instead of producing corrupt data.
#[derive(Clone)]
pub struct SplittingStorage {
    files: SafeWriter,
    metadata: SafeWriter,
    split_size: NonZeroU64,
    path_modifier: Option<Arc<PathModifier>>,
}

impl fmt::Debug for SplittingStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplittingStorage")
            .field("files", &self.files)
            .field("metadata", &self.metadata)
            .field("split_size", &self.split_size)
            .field("path_modifier", &self.path_modifier.as_ref().map(|_| ".."))
            .finish()
    }
}

impl SplittingStorage {
    /// Constructs a new storage. The chunk and metadata writers may share a directory.
    pub fn new(files: SafeWriter, metadata: SafeWriter, split_size: NonZeroU64) -> Self {
        Self {
            files,
            metadata,
            split_size,
            path_modifier: None,
        }
    }

    /// Derives chunk paths with `path_modifier` instead of [`append_index`].
    pub fn with_path_modifier(
        self,
        path_modifier: impl Fn(&Path, usize) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        Self {
            path_modifier: Some(Arc::new(path_modifier)),
            ..self
        }
    }

    /// Returns the path of the metadata file of `path`.
    pub fn metadata_path(path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let mut name = OsString::from(DirFs::normalize(path)?);
        name.push(METADATA_SUFFIX);
        Ok(PathBuf::from(name))
    }

    /// Reads the metadata of `path`, or returns `None` if nothing was written to `path`.
    pub fn read_metadata(&self, path: impl AsRef<Path>) -> Result<Option<SplitMetadata>, SplitError> {
        let metadata_path = Self::metadata_path(path)?;
        let file = match self.metadata.fs().open_file(&metadata_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SplitError::ReadMetadata(metadata_path, err)),
        };
        serde_json::from_reader(io::BufReader::new(file))
            .map(Some)
            .map_err(|err| SplitError::ParseMetadata(metadata_path, err))
    }

    /// Writes `reader` as chunks and records them in a metadata file. Returns the chunk paths.
    ///
    /// If metadata for `path` already exists nothing is written and the recorded chunk paths are
    /// returned. The metadata is written last, so an interrupted write leaves no metadata behind
    /// and is repeated in full by the next call.
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        permissions: u32,
        reader: impl Read,
    ) -> Result<Vec<PathBuf>, SplitError> {
        let path = DirFs::normalize(path)?;
        if let Some(metadata) = self.read_metadata(&path)? {
            tracing::debug!("'{}' is already stored", path.display());
            return Ok(metadata.chunks.into_iter().map(|chunk| chunk.path).collect());
        }

        let mut total = Measured::new(reader);
        let mut chunks = Vec::new();
        let paths = write_chunks(
            &path,
            &mut total,
            self.split_size,
            self.path_modifier.as_deref(),
            |chunk_path, chunk| {
                let mut measured = Measured::new(chunk);
                self.files
                    .write(chunk_path, permissions, &mut measured, &[])?;
                chunks.push(measured.into_record(chunk_path.to_path_buf()));
                Ok(())
            },
        )?;

        let metadata = SplitMetadata {
            total: total.into_record(path.clone()),
            chunks,
        };
        let content = serde_json::to_vec_pretty(&metadata).map_err(SplitError::SerializeMetadata)?;
        let metadata_path = Self::metadata_path(&path)?;
        self.metadata
            .write(&metadata_path, 0o644, content.as_slice(), &[])
            .map_err(|err| SplitError::Write(metadata_path.clone(), err))?;
        tracing::debug!(
            "stored '{}' as {} chunks",
            path.display(),
            metadata.chunks.len()
        );

        Ok(paths)
    }

    /// Opens the chunks of `path` as one stream. The length of the returned reader is the
    /// recorded total size.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<SegmentedReader, SplitError> {
        let path = DirFs::normalize(path)?;
        let metadata = self.read_metadata(&path)?.ok_or_else(|| {
            let metadata_path = Self::metadata_path(&path).unwrap_or_else(|_| path.clone());
            SplitError::ReadMetadata(
                metadata_path,
                io::Error::new(io::ErrorKind::NotFound, "no metadata recorded"),
            )
        })?;

        let chunks: u64 = metadata.chunks.iter().map(|chunk| chunk.size).sum();
        if chunks != metadata.total.size {
            return Err(SplitError::InconsistentMetadata {
                path,
                total: metadata.total.size,
                chunks,
            });
        }

        let segments = metadata
            .chunks
            .into_iter()
            .map(|chunk| {
                let file = self
                    .files
                    .fs()
                    .open_file(&chunk.path)
                    .map_err(|err| SplitError::OpenChunk(chunk.path.clone(), err))?;
                Ok(SizedReaderAt::new(file, chunk.size))
            })
            .collect::<Result<Vec<_>, SplitError>>()?;

        Ok(SegmentedReader::new(segments))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use durable_fs::SafeWriteOptions;
    use rstest::rstest;

    fn size(size: u64) -> NonZeroU64 {
        NonZeroU64::new(size).unwrap()
    }

    fn split(data: &[u8], chunk_size: u64) -> Vec<Vec<u8>> {
        let mut splitter = SplitReader::new(data, size(chunk_size));
        let mut chunks = Vec::new();
        while let Some(mut chunk) = splitter.next_chunk().unwrap() {
            let mut content = Vec::new();
            chunk.read_to_end(&mut content).unwrap();
            chunks.push(content);
        }
        chunks
    }

    #[rstest]
    #[case(0, 3, 0)]
    #[case(1, 3, 1)]
    #[case(3, 3, 1)]
    #[case(4, 3, 2)]
    #[case(9, 3, 3)]
    #[case(20_000, 8_192, 3)]
    #[case(20_000, 100_000, 1)]
    fn test_split_reader(#[case] len: usize, #[case] chunk_size: u64, #[case] count: usize) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let chunks = split(&data, chunk_size);

        assert_eq!(chunks.len(), count);
        assert!(chunks.iter().all(|chunk| chunk.len() as u64 <= chunk_size));
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
        assert_eq!(chunks.concat(), data);
    }

    #[rstest]
    #[case("data/blob", 0, "data/blob_000")]
    #[case("data/blob/", 12, "data/blob_012")]
    #[case("blob", 1234, "blob_1234")]
    fn test_append_index(#[case] path: &str, #[case] index: usize, #[case] expected: &str) {
        assert_eq!(append_index(Path::new(path), index), Path::new(expected));
    }

    fn writer(dir: &Path) -> SafeWriter {
        SafeWriter::new(DirFs::new(dir), SafeWriteOptions::default())
    }

    #[test]
    fn test_write_splitting() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let paths =
            write_splitting(&writer, "blob", 0o644, &b"0123456789"[..], size(4), None).unwrap();
        assert_eq!(
            paths,
            [Path::new("blob_000"), Path::new("blob_001"), Path::new("blob_002")]
        );
        assert_eq!(fs_err::read(dir.path().join("blob_002")).unwrap(), b"89");
    }

    #[test]
    fn test_duplicate_chunk_names() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let constant = |path: &Path, _: usize| path.with_extension("chunk");
        let err = write_splitting(
            &writer,
            "blob",
            0o644,
            &b"0123456789"[..],
            size(4),
            Some(&constant),
        )
        .unwrap_err();
        assert_matches!(err, SplitError::DuplicateName(path) if path == Path::new("blob.chunk"));
        assert_eq!(fs_err::read(dir.path().join("blob.chunk")).unwrap(), b"0123");
    }

    #[test]
    fn test_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SplittingStorage::new(
            writer(&dir.path().join("files")),
            writer(&dir.path().join("meta")),
            size(5),
        );
        let data = b"hello chunked world";

        let paths = storage.write("nested/blob", 0o644, &data[..]).unwrap();
        assert_eq!(paths.len(), 4);

        let metadata = storage.read_metadata("nested/blob").unwrap().unwrap();
        assert_eq!(metadata.total.size, data.len() as u64);
        assert_eq!(metadata.total.sha256, hex::encode(Sha256::digest(data)));
        assert_eq!(metadata.chunks[0].sha256, hex::encode(Sha256::digest(b"hello")));
        assert!(dir.path().join("meta/nested/blob.meta.json").is_file());

        let mut reader = storage.read("nested/blob").unwrap();
        assert_eq!(reader.len(), data.len() as u64);
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, data);
    }

    #[test]
    fn test_existing_metadata_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SplittingStorage::new(writer(dir.path()), writer(dir.path()), size(3));

        let first = storage.write("blob", 0o644, &b"abcdef"[..]).unwrap();
        let second = storage.write("blob", 0o644, &b"something else"[..]).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs_err::read(dir.path().join("blob_000")).unwrap(), b"abc");
    }

    #[test]
    fn test_truncated_chunk_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SplittingStorage::new(writer(dir.path()), writer(dir.path()), size(4));
        storage.write("blob", 0o644, &b"0123456789"[..]).unwrap();

        fs_err::write(dir.path().join("blob_001"), b"45").unwrap();

        let mut reader = storage.read("blob").unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SplittingStorage::new(writer(dir.path()), writer(dir.path()), size(4));
        assert!(storage.read_metadata("missing").unwrap().is_none());
        let err = storage.read("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Filesystem);
    }
}
