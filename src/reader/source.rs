//! Byte Sources
//!
//! A [`ByteSource`] hands the cursor up to N more bytes at a time, signals
//! exhaustion with `None` (or an empty chunk), and is told exactly once when
//! the cursor is done with it.
//!
//! Provided sources:
//! - [`SliceSource`]: an in-memory byte slice, optionally in fixed-size pieces
//! - [`ReadSource`]: anything implementing [`std::io::Read`]
//! - [`FnSource`]: a closure producing owned chunks

use std::borrow::Cow;
use std::io::{self, Read};

use tracing::trace;

use crate::error::SourceError;

/// Supplier of input bytes for the cursor
pub trait ByteSource {
    /// Return up to `max_bytes` new bytes, or `None` at end of input.
    ///
    /// An empty chunk is treated as end of input as well.
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError>;

    /// Release any resource held by the source. The cursor calls this exactly
    /// once, on every exit path.
    fn close(&mut self) {}
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError> {
        (**self).pull(max_bytes)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError> {
        (**self).pull(max_bytes)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Zero-copy source over a byte slice
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
    max_chunk: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_max_chunk(data, usize::MAX)
    }

    /// Never return more than `max_chunk` bytes per pull, whatever the
    /// cursor asks for. Zero is bumped to one.
    pub fn with_max_chunk(data: &'a [u8], max_chunk: usize) -> Self {
        SliceSource {
            data,
            pos: 0,
            max_chunk: max_chunk.max(1),
        }
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteSource for SliceSource<'_> {
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError> {
        let n = self.remaining().min(max_bytes).min(self.max_chunk);
        if n == 0 {
            return Ok(None);
        }
        let chunk = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(Some(Cow::Borrowed(chunk)))
    }
}

/// Buffered source reading from any [`Read`] implementation
pub struct ReadSource<R: Read> {
    reader: Option<R>,
    buffer: Vec<u8>,
    eof: bool,
}

impl<R: Read> ReadSource<R> {
    pub fn new(reader: R) -> Self {
        ReadSource {
            reader: Some(reader),
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Check if the reader reported end of input
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Get the reader back, unless the source was closed
    pub fn into_inner(self) -> Option<R> {
        self.reader
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError> {
        if self.eof {
            return Ok(None);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(SourceError::other("source already closed"));
        };

        self.buffer.resize(max_bytes.max(1), 0);
        let read = loop {
            match reader.read(&mut self.buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::new(e)),
            }
        };
        trace!(bytes = read, "read from source");

        if read == 0 {
            self.eof = true;
            return Ok(None);
        }
        Ok(Some(Cow::Borrowed(&self.buffer[..read])))
    }

    fn close(&mut self) {
        // Dropping the reader releases the underlying handle
        self.reader = None;
        self.buffer = Vec::new();
    }
}

/// Source backed by a closure returning owned chunks
pub struct FnSource<F> {
    f: F,
}

/// Create a source from a closure called with the maximum chunk size
pub fn from_fn<F>(f: F) -> FnSource<F>
where
    F: FnMut(usize) -> Result<Option<Vec<u8>>, SourceError>,
{
    FnSource { f }
}

impl<F> ByteSource for FnSource<F>
where
    F: FnMut(usize) -> Result<Option<Vec<u8>>, SourceError>,
{
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError> {
        Ok((self.f)(max_bytes)?.map(Cow::Owned))
    }
}
