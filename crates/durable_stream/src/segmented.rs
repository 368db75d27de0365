//! Presents an ordered list of independently sized byte ranges as one seekable stream.

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use crate::{
    cancel::{CancellationToken, Cancelled},
    multi_error::MultiError,
    read_at::{Close, ReadAt},
};

/// Up to this many segments the segment containing an offset is found with a linear scan, above
/// it a binary search is used. Both strategies return the same segment.
pub const BINARY_SEARCH_THRESHOLD: usize = 32;

/// An error that indicates that a segment did not honor its declared size, or that the stream
/// was used incorrectly.
///
/// When returned through the [`std::io`] traits the error is wrapped in an [`io::Error`], use
/// [`SegmentError::from_io`] to get it back.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// The segment returned more bytes than were left of its declared size.
    #[error("segment {index} yielded {read} bytes but only {remaining} bytes of its declared size remained")]
    InvalidSize {
        /// The index of the offending segment.
        index: usize,
        /// The number of bytes the segment returned.
        read: usize,
        /// The number of bytes that remained of the declared size.
        remaining: u64,
    },

    /// The segment reached its end before its declared size was reached.
    #[error("segment {index} ended {remaining} bytes before its declared size")]
    UnexpectedEndOfStream {
        /// The index of the offending segment.
        index: usize,
        /// The number of bytes that were still expected.
        remaining: u64,
    },

    /// A seek would have moved the stream before its start.
    #[error("cannot seek to negative offset {0}")]
    NegativeOffset(i128),

    /// A seek would have moved the stream past the largest representable offset.
    #[error("seek offset {0} is out of range")]
    OffsetOverflow(i128),

    /// The read was cancelled through a [`CancellationToken`].
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl SegmentError {
    /// Returns the [`SegmentError`] wrapped by an [`io::Error`] returned from a
    /// [`SegmentedReader`], if any.
    pub fn from_io(err: &io::Error) -> Option<&SegmentError> {
        err.get_ref()?.downcast_ref::<SegmentError>()
    }

    /// Returns true if this error means that a segment violated its declared size.
    pub fn is_size_violation(&self) -> bool {
        matches!(
            self,
            SegmentError::InvalidSize { .. } | SegmentError::UnexpectedEndOfStream { .. }
        )
    }
}

impl From<SegmentError> for io::Error {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::InvalidSize { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            SegmentError::UnexpectedEndOfStream { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            SegmentError::NegativeOffset(_) | SegmentError::OffsetOverflow(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            SegmentError::Cancelled(cancelled) => cancelled.into(),
        }
    }
}

/// Type erased segment storage. Readers without a close capability get a no-op close.
trait Segment: Send {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn close(&mut self) -> io::Result<()>;
}

struct Plain<R>(R);

impl<R: ReadAt + Send> Segment for Plain<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.0.read_at(buf, offset)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Closing<R>(R);

impl<R: ReadAt + Close + Send> Segment for Closing<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.0.read_at(buf, offset)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.close()
    }
}

/// A positional reader together with the number of bytes it is expected to contain.
pub struct SizedReaderAt {
    reader: Box<dyn Segment>,
    size: u64,
}

impl SizedReaderAt {
    /// Constructs a segment from a reader that does not need to be closed explicitly.
    pub fn new<R: ReadAt + Send + 'static>(reader: R, size: u64) -> Self {
        Self {
            reader: Box::new(Plain(reader)),
            size,
        }
    }

    /// Constructs a segment whose reader is closed by [`SegmentedReader::close`].
    pub fn with_close<R: ReadAt + Close + Send + 'static>(reader: R, size: u64) -> Self {
        Self {
            reader: Box::new(Closing(reader)),
            size,
        }
    }

    /// Opens the file at the given path and declares its current length as the size of the
    /// segment.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = fs_err::File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self::new(file, size))
    }

    /// Returns the declared size of this segment.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Debug for SizedReaderAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedReaderAt")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Opens every file in `paths` with [`SizedReaderAt::from_file`].
pub fn sized_readers_from_files<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
) -> io::Result<Vec<SizedReaderAt>> {
    paths
        .into_iter()
        .map(|path| SizedReaderAt::from_file(path))
        .collect()
}

/// A stream over the concatenation of a list of [`SizedReaderAt`]s.
///
/// The total length of the stream is the sum of the declared sizes. Every read checks that the
/// underlying segment honors its declared size: a segment that ends early yields
/// [`SegmentError::UnexpectedEndOfStream`], a segment that returns more data than it declared
/// yields [`SegmentError::InvalidSize`].
///
/// [`ReadAt::read_at`] truncates requests at the end of the stream. Because of that an overgrown
/// *last* segment is only detected by sequential reads, never by positional reads.
#[derive(Debug)]
pub struct SegmentedReader {
    segments: Vec<SizedReaderAt>,
    /// The exclusive end offset of every segment in the stream.
    ends: Vec<u64>,
    len: u64,
    offset: u64,
    index: usize,
    cancellation: Option<CancellationToken>,
}

impl SegmentedReader {
    /// Constructs a new stream from the given segments, in order.
    pub fn new(segments: Vec<SizedReaderAt>) -> Self {
        let mut ends = Vec::with_capacity(segments.len());
        let mut len = 0u64;
        for segment in &segments {
            len = len.saturating_add(segment.size);
            ends.push(len);
        }
        tracing::trace!(
            "created segmented reader over {} segments ({len} bytes)",
            segments.len()
        );
        Self {
            segments,
            ends,
            len,
            offset: 0,
            index: 0,
            cancellation: None,
        }
    }

    /// Polls the given token before every read from an underlying segment.
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self
        }
    }

    /// Returns the total declared length of the stream.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the stream contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the current offset of the stream.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Closes every segment that was registered with [`SizedReaderAt::with_close`]. All segments
    /// are closed even if some of them fail, the failures are returned together.
    pub fn close(self) -> Result<(), MultiError> {
        MultiError::from_results(
            self.segments
                .into_iter()
                .map(|mut segment| segment.reader.close()),
        )
    }

    fn start_of(&self, index: usize) -> u64 {
        self.ends[index] - self.segments[index].size
    }

    /// Returns the index of the segment that contains `offset`, searching only segments starting
    /// at `from`. Returns the number of segments if the offset lies beyond the end.
    fn locate_from(&self, from: usize, offset: u64) -> usize {
        let ends = &self.ends[from.min(self.ends.len())..];
        let found = if ends.len() > BINARY_SEARCH_THRESHOLD {
            binary_search(ends, offset)
        } else {
            linear_search(ends, offset)
        };
        from + found
    }

    fn check_cancelled(&self) -> Result<(), SegmentError> {
        match &self.cancellation {
            Some(token) => Ok(token.check()?),
            None => Ok(()),
        }
    }

    /// Performs a single read from the segment containing `offset` and validates the result
    /// against the declared size of that segment.
    fn read_segment(&self, index: usize, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.check_cancelled()?;

        let segment = &self.segments[index];
        let segment_offset = offset - self.start_of(index);
        let remaining = segment.size - segment_offset;
        let n = segment.reader.read_at(buf, segment_offset)?;

        if n as u64 > remaining {
            tracing::debug!("segment {index} returned {n} bytes, only {remaining} were declared");
            return Err(SegmentError::InvalidSize {
                index,
                read: n,
                remaining,
            }
            .into());
        }
        if n == 0 && !buf.is_empty() {
            tracing::debug!("segment {index} ended {remaining} bytes early");
            return Err(SegmentError::UnexpectedEndOfStream { index, remaining }.into());
        }

        Ok(n)
    }
}

fn linear_search(ends: &[u64], offset: u64) -> usize {
    ends.iter()
        .position(|&end| offset < end)
        .unwrap_or(ends.len())
}

fn binary_search(ends: &[u64], offset: u64) -> usize {
    ends.partition_point(|&end| end <= offset)
}

impl Read for SegmentedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && self.offset < self.len {
            let index = self.locate_from(self.index, self.offset);
            self.index = index;

            match self.read_segment(index, &mut buf[filled..], self.offset) {
                Ok(n) => {
                    filled += n;
                    self.offset += n as u64;
                }
                // Hand out what was read so far, the error repeats on the next call.
                Err(_) if filled > 0 => break,
                Err(err) => return Err(err),
            }
        }
        Ok(filled)
    }
}

impl ReadAt for SegmentedReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }

        let available = usize::try_from(self.len - offset).unwrap_or(usize::MAX);
        let capped = buf.len().min(available);
        let buf = &mut buf[..capped];

        let mut filled = 0;
        let mut index = 0;
        while filled < buf.len() {
            let position = offset + filled as u64;
            index = self.locate_from(index, position);
            filled += self.read_segment(index, &mut buf[filled..], position)?;
        }
        Ok(filled)
    }
}

impl Seek for SegmentedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.offset) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len) + i128::from(delta),
        };
        if target < 0 {
            return Err(SegmentError::NegativeOffset(target).into());
        }
        let offset =
            u64::try_from(target).map_err(|_err| SegmentError::OffsetOverflow(target))?;

        self.offset = offset;
        self.index = self.locate_from(0, offset);
        Ok(offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn reader_from(chunks: &[&[u8]]) -> SegmentedReader {
        SegmentedReader::new(
            chunks
                .iter()
                .map(|chunk| SizedReaderAt::new(chunk.to_vec(), chunk.len() as u64))
                .collect(),
        )
    }

    fn segments_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..24), 0..48)
    }

    proptest! {
        #[test]
        fn read_to_end_matches_concatenation(chunks in segments_strategy()) {
            let expected = chunks.concat();
            let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            let mut reader = reader_from(&refs);

            let mut content = Vec::new();
            reader.read_to_end(&mut content).unwrap();
            prop_assert_eq!(content, expected);
        }

        #[test]
        fn small_reads_match_concatenation(chunks in segments_strategy(), buf_size in 1usize..7) {
            let expected = chunks.concat();
            let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            let mut reader = reader_from(&refs);

            let mut content = Vec::new();
            let mut buf = vec![0u8; buf_size];
            loop {
                let n = reader.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                content.extend_from_slice(&buf[..n]);
            }
            prop_assert_eq!(content, expected);
        }

        #[test]
        fn read_at_matches_slicing(
            chunks in segments_strategy(),
            offset in 0u64..1200,
            len in 0usize..200,
        ) {
            let expected = chunks.concat();
            let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            let reader = reader_from(&refs);

            let mut buf = vec![0u8; len];
            let n = reader.read_at(&mut buf, offset).unwrap();

            let start = (offset as usize).min(expected.len());
            let end = (start + len).min(expected.len());
            prop_assert_eq!(&buf[..n], &expected[start..end]);
        }

        #[test]
        fn seek_then_read_matches_read_at(
            chunks in segments_strategy(),
            offset in 0u64..1200,
            len in 1usize..64,
        ) {
            let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            let mut reader = reader_from(&refs);

            let mut positional = vec![0u8; len];
            let n = reader.read_at(&mut positional, offset).unwrap();

            reader.seek(SeekFrom::Start(offset)).unwrap();
            let mut sequential = Vec::new();
            (&mut reader).take(len as u64).read_to_end(&mut sequential).unwrap();

            prop_assert_eq!(&positional[..n], sequential.as_slice());
        }

        #[test]
        fn search_strategies_agree(
            sizes in prop::collection::vec(0u64..8, 0..80),
            offset in 0u64..700,
        ) {
            let ends: Vec<u64> = sizes
                .iter()
                .scan(0u64, |acc, size| {
                    *acc += size;
                    Some(*acc)
                })
                .collect();
            prop_assert_eq!(linear_search(&ends, offset), binary_search(&ends, offset));
        }
    }

    #[test]
    fn test_empty_stream() {
        let mut reader = SegmentedReader::new(Vec::new());
        assert!(reader.is_empty());

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 0);
        assert!(reader.close().is_ok());
    }

    #[test]
    fn test_read_crosses_boundaries_in_one_call() {
        let mut reader = reader_from(&[b"ab", b"", b"cd", b"e"]);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"abcde");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_inflated_size_is_unexpected_end_of_stream() {
        let mut reader = SegmentedReader::new(vec![
            SizedReaderAt::new(b"abc".to_vec(), 5),
            SizedReaderAt::new(b"def".to_vec(), 3),
        ]);
        assert_eq!(reader.len(), 8);

        let mut content = Vec::new();
        let err = reader.read_to_end(&mut content).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_matches!(
            SegmentError::from_io(&err),
            Some(SegmentError::UnexpectedEndOfStream {
                index: 0,
                remaining: 2
            })
        );
        assert_eq!(content, b"abc");
    }

    #[test]
    fn test_deflated_size_is_invalid_size() {
        let mut reader = SegmentedReader::new(vec![
            SizedReaderAt::new(b"abcde".to_vec(), 3),
            SizedReaderAt::new(b"fgh".to_vec(), 3),
        ]);

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_matches!(
            SegmentError::from_io(&err),
            Some(SegmentError::InvalidSize {
                index: 0,
                read: 5,
                remaining: 3
            })
        );

        let err = reader.read_at(&mut buf, 0).unwrap_err();
        assert_matches!(
            SegmentError::from_io(&err),
            Some(SegmentError::InvalidSize { index: 0, .. })
        );
    }

    #[test]
    fn test_overgrown_last_segment() {
        let mut reader = SegmentedReader::new(vec![
            SizedReaderAt::new(b"abc".to_vec(), 3),
            SizedReaderAt::new(b"defgh".to_vec(), 3),
        ]);

        // Positional reads are truncated at the declared end.
        let mut buf = [0u8; 16];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");

        // Sequential reads detect the violation once they reach the last segment.
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        let err = reader.read(&mut buf).unwrap_err();
        assert_matches!(
            SegmentError::from_io(&err),
            Some(SegmentError::InvalidSize { index: 1, .. })
        );
    }

    #[rstest]
    #[case(SeekFrom::Start(4), 4, b"efgh".as_slice())]
    #[case(SeekFrom::End(-3), 7, b"hij".as_slice())]
    #[case(SeekFrom::Current(2), 2, b"cdef".as_slice())]
    #[case(SeekFrom::End(5), 15, b"".as_slice())]
    fn test_seek(#[case] pos: SeekFrom, #[case] expected_offset: u64, #[case] expected: &[u8]) {
        let mut reader = reader_from(&[b"abc", b"defg", b"hij"]);
        assert_eq!(reader.seek(pos).unwrap(), expected_offset);

        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], expected);
    }

    #[test]
    fn test_negative_seek_is_an_error() {
        let mut reader = reader_from(&[b"abc"]);
        reader.seek(SeekFrom::Start(2)).unwrap();

        let err = reader.seek(SeekFrom::Current(-3)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_matches!(
            SegmentError::from_io(&err),
            Some(SegmentError::NegativeOffset(-1))
        );

        // The offset is unchanged.
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_cancellation_is_polled() {
        let token = CancellationToken::new();
        let mut reader = reader_from(&[b"abc", b"def"]).with_cancellation(token.clone());

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);

        token.cancel();
        let err = reader.read(&mut buf).unwrap_err();
        assert!(crate::is_cancelled(&err));
    }

    struct Tracked {
        data: Vec<u8>,
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ReadAt for Tracked {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            self.data.read_at(buf, offset)
        }
    }

    impl Close for Tracked {
        fn close(&mut self) -> io::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(io::Error::other("close failed"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_close_aggregates_errors() {
        let closed = Arc::new(AtomicUsize::new(0));
        let tracked = |fail| Tracked {
            data: b"xy".to_vec(),
            closed: closed.clone(),
            fail,
        };

        let reader = SegmentedReader::new(vec![
            SizedReaderAt::with_close(tracked(true), 2),
            SizedReaderAt::new(b"zz".to_vec(), 2),
            SizedReaderAt::with_close(tracked(false), 2),
            SizedReaderAt::with_close(tracked(true), 2),
        ]);

        let err = reader.close().unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a");
        let second = dir.path().join("b");
        fs_err::write(&first, b"hello ").unwrap();
        fs_err::write(&second, b"files").unwrap();

        let mut reader = SegmentedReader::new(sized_readers_from_files([&first, &second]).unwrap());
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello files");
    }
}
