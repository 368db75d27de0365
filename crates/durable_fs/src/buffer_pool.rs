//! A pool of fixed size byte buffers shared between copy operations.

use parking_lot::Mutex;
use std::{
    io::{self, Read, Write},
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// A cheaply clonable pool of equally sized byte buffers.
///
/// Clones share the same buffers. The lock only guards the free list and is never held while a
/// buffer is in use. The contents of a buffer are not cleared between uses.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    /// The size of the buffers of a pool constructed with [`BufferPool::default`].
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

    /// Constructs a new pool that hands out buffers of `buffer_size` bytes. A size of zero is
    /// replaced by [`BufferPool::DEFAULT_BUFFER_SIZE`].
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = if buffer_size == 0 {
            Self::DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the size of the buffers in this pool.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Takes a buffer from the pool or allocates a new one. The buffer is returned to the pool
    /// when the guard is dropped.
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buffer_size].into_boxed_slice());
        PooledBuffer {
            buffer: Some(buffer),
            pool: self.inner.clone(),
        }
    }

    /// Returns the number of idle buffers.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUFFER_SIZE)
    }
}

/// A buffer borrowed from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.free.lock().push(buffer);
        }
    }
}

/// Copies everything from `reader` to `writer` through `buffer` and returns the number of bytes
/// copied.
pub(crate) fn copy_with_buffer<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
) -> io::Result<u64> {
    let mut copied = 0u64;
    loop {
        let n = match reader.read(buffer) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buffer[..n])?;
        copied += n as u64;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(16);
        assert_eq!(pool.idle(), 0);
        {
            let mut first = pool.acquire();
            let second = pool.clone().acquire();
            assert_eq!(first.len(), 16);
            assert_eq!(second.len(), 16);
            first[0] = 42;
        }
        assert_eq!(pool.idle(), 2);

        let _buffer = pool.acquire();
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_zero_size_uses_default() {
        assert_eq!(BufferPool::new(0).buffer_size(), BufferPool::DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_copy_with_small_buffer() {
        let pool = BufferPool::new(3);
        let mut buffer = pool.acquire();
        let mut output = Vec::new();
        let copied = copy_with_buffer(&mut &b"hello world"[..], &mut output, &mut buffer).unwrap();
        assert_eq!(copied, 11);
        assert_eq!(output, b"hello world");
    }
}
