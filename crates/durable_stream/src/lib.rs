#![deny(missing_docs)]

//! Stream primitives used by the durable filesystem toolkit.
//!
//! The centerpiece of this crate is the [`SegmentedReader`]: it takes an ordered list of
//! independently stored byte ranges, each with a size declared by its owner, and presents them as
//! one contiguous stream that implements [`std::io::Read`], [`std::io::Seek`] and [`ReadAt`].
//! While reading, every segment is checked against its declared size so that a truncated or
//! overgrown chunk on disk surfaces as an error instead of silently corrupting the stream.
//!
//! # Examples
//!
//! ```
//! use durable_stream::{SegmentedReader, SizedReaderAt};
//! use std::io::Read;
//!
//! let mut reader = SegmentedReader::new(vec![
//!     SizedReaderAt::new(b"Hello, ".to_vec(), 7),
//!     SizedReaderAt::new(b"world!".to_vec(), 6),
//! ]);
//!
//! let mut content = String::new();
//! reader.read_to_string(&mut content).unwrap();
//! assert_eq!(content, "Hello, world!");
//! ```
//!
//! Besides the segmented reader this crate provides:
//!
//! - [`ReadAt`] and [`Close`]: small capability traits for positional reads and fallible closing.
//! - [`MultiError`]: aggregates the failures of closing many resources into one error.
//! - [`CancellationToken`] and [`Cancellable`]: cooperative cancellation of blocking reads.

mod cancel;
mod multi_error;
mod read_at;
mod segmented;

pub use cancel::{is_cancelled, Cancellable, CancellationToken, Cancelled};
pub use multi_error::MultiError;
pub use read_at::{Close, ReadAt};
pub use segmented::{
    sized_readers_from_files, SegmentError, SegmentedReader, SizedReaderAt,
    BINARY_SEARCH_THRESHOLD,
};
