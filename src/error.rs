//! Error types for the streaming cursor.
//!
//! Three kinds of failure can reach the caller of
//! [`XmlCursor::next_event`](crate::XmlCursor::next_event):
//! - [`SourceError`]: the byte source could not produce data
//! - [`MalformedError`]: the input is not well-formed XML
//! - [`UsageError`]: the cursor was driven outside its state sequence
//!
//! All of them are `Clone` so a failed cursor can hand out the same terminal
//! error on every later call.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Convenience alias for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any error surfaced by the cursor.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("malformed document: {0}")]
    Malformed(#[from] MalformedError),

    #[error("usage error: {0}")]
    Usage(#[from] UsageError),
}

impl Error {
    /// Static label for the error kind, handy for log fields.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Malformed(_) => "malformed",
            Self::Usage(_) => "usage",
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// The byte source failed to produce data.
#[derive(Debug, Clone, Error)]
#[error("{cause}")]
pub struct SourceError {
    #[source]
    cause: Arc<io::Error>,
}

impl SourceError {
    /// Wrap an I/O failure.
    pub fn new(cause: io::Error) -> Self {
        Self {
            cause: Arc::new(cause),
        }
    }

    /// Build a source error from a plain message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(io::Error::new(io::ErrorKind::Other, message.into()))
    }

    /// The underlying I/O error.
    pub fn io_error(&self) -> &io::Error {
        &self.cause
    }
}

impl From<io::Error> for SourceError {
    fn from(cause: io::Error) -> Self {
        Self::new(cause)
    }
}

/// Location in the decoded input stream (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    /// Byte offset into the decoded, line-normalized stream
    pub offset: u64,
}

impl Position {
    pub const fn start() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    /// Advance over consumed text.
    pub fn advance(&mut self, consumed: &str) {
        self.offset += consumed.len() as u64;
        match memchr::memrchr(b'\n', consumed.as_bytes()) {
            Some(last_nl) => {
                let newlines = memchr::memchr_iter(b'\n', consumed.as_bytes()).count();
                self.line += newlines as u32;
                self.column = consumed[last_nl + 1..].chars().count() as u32 + 1;
            }
            None => self.column += consumed.chars().count() as u32,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// The input is not well-formed XML.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct MalformedError {
    message: String,
    position: Option<Position>,
}

impl MalformedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, position: Position) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }

    /// Attach a position unless one is already known.
    pub fn with_position(mut self, position: Position) -> Self {
        self.position.get_or_insert(position);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }
}

impl fmt::Display for MalformedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(pos) => write!(f, "{} at {}", self.message, pos),
            None => f.write_str(&self.message),
        }
    }
}

/// The cursor or parser was used outside its allowed state sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("cursor was closed before the end of the stream")]
    Closed,

    #[error("parser already finished")]
    ParserFinished,
}
