//! Streaming Cursor
//!
//! Pull API over the push parser. Each call to [`XmlCursor::next_event`]
//! returns one queued event if there is one; otherwise it pulls a chunk from
//! the byte source and feeds it to the parser, which synchronously queues
//! zero or more events, and tries again. Once the source is exhausted the
//! parser is finished, residual events drain, and `EndOfStream` follows.
//!
//! ```text
//! next_event() -> queue empty? -> ByteSource::pull -> PushParser::feed
//!                                                         |
//!      <------------------ pop_event <------ EventCapture queue
//! ```
//!
//! One chunk may produce any number of events, so the queue, not the
//! chunk, is the unit of progress. Chunk boundaries never change which
//! events come out or their order, only when they become available.
//!
//! ## Error handling
//!
//! An error raised while feeding a chunk is held back until the events the
//! same chunk queued before it have been returned, then re-raised on every
//! later call. The source is closed as soon as the error is captured.

use std::fmt;
use std::io::Read;
use std::iter::FusedIterator;

use tracing::{debug, trace};

use super::source::{ByteSource, ReadSource, SliceSource};
use crate::config::CursorConfig;
use crate::core::push::PushParser;
use crate::error::{Error, Position, UsageError};
use crate::sax::capture::EventCapture;
use crate::sax::events::Event;
use crate::sax::observer::DeclarationObserver;

/// Lifecycle of a cursor
#[derive(Debug, Clone)]
pub enum CursorState {
    /// Created, nothing pulled yet
    NotStarted,
    /// Pulling from the source on demand
    Parsing,
    /// Input side done; handing out the remaining queued events
    Draining,
    /// `EndOfStream` was returned; every later call returns it again
    Finished,
    /// Terminal error, re-raised on every later call
    Failed(Error),
    /// Abandoned with [`XmlCursor::close`] before the end of the stream
    Closed,
}

impl CursorState {
    /// No further parsing will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CursorState::Finished | CursorState::Failed(_) | CursorState::Closed
        )
    }

    fn label(&self) -> &'static str {
        match self {
            CursorState::NotStarted => "not_started",
            CursorState::Parsing => "parsing",
            CursorState::Draining => "draining",
            CursorState::Finished => "finished",
            CursorState::Failed(_) => "failed",
            CursorState::Closed => "closed",
        }
    }
}

/// Forward-only XML event cursor over a [`ByteSource`]
pub struct XmlCursor<S: ByteSource> {
    source: S,
    source_closed: bool,
    parser: PushParser,
    capture: EventCapture,
    config: CursorConfig,
    state: CursorState,
    /// Error captured while feeding, raised once the queue is empty
    pending_error: Option<Error>,
    /// Open elements as seen through the returned events
    depth: usize,
    bytes_read: u64,
    iter_done: bool,
}

impl<'a> XmlCursor<SliceSource<'a>> {
    /// Cursor over an in-memory document
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(SliceSource::new(data))
    }
}

impl<R: Read> XmlCursor<ReadSource<R>> {
    /// Cursor over any reader
    pub fn from_reader(reader: R) -> Self {
        Self::new(ReadSource::new(reader))
    }
}

impl<S: ByteSource> XmlCursor<S> {
    /// Create a cursor with default settings
    pub fn new(source: S) -> Self {
        Self::with_config(source, CursorConfig::default())
    }

    pub fn with_config(source: S, config: CursorConfig) -> Self {
        XmlCursor {
            source,
            source_closed: false,
            parser: PushParser::with_max_depth(config.max_depth),
            capture: EventCapture::from_config(&config),
            config,
            state: CursorState::NotStarted,
            pending_error: None,
            depth: 0,
            bytes_read: 0,
            iter_done: false,
        }
    }

    /// Forward declarative callbacks (DOCTYPE declarations, entity
    /// references, ...) to `observer`
    pub fn with_observer(mut self, observer: impl DeclarationObserver + 'static) -> Self {
        self.capture.set_observer(Box::new(observer));
        self
    }

    /// Return the next event.
    ///
    /// After `EndOfStream` has been returned once, every later call returns
    /// it again. After a failure, every later call returns the same error.
    pub fn next_event(&mut self) -> Result<Event, Error> {
        loop {
            match &self.state {
                CursorState::Failed(err) => return Err(err.clone()),
                CursorState::Closed => return Err(UsageError::Closed.into()),
                CursorState::Finished => return Ok(Event::EndOfStream),
                CursorState::NotStarted => self.transition(CursorState::Parsing),
                CursorState::Parsing | CursorState::Draining => {}
            }

            if let Some(event) = self.capture.pop_event() {
                self.track_depth(&event);
                return Ok(event);
            }

            if matches!(self.state, CursorState::Draining) {
                if let Some(err) = self.pending_error.take() {
                    self.transition(CursorState::Failed(err.clone()));
                    return Err(err);
                }
                self.transition(CursorState::Finished);
                return Ok(Event::EndOfStream);
            }

            self.fill();
        }
    }

    /// Pull the source to exhaustion and finish the parser, leaving every
    /// remaining event queued for [`next_event`](Self::next_event).
    ///
    /// Calling it again, or after the end of the stream, does nothing.
    pub fn finish(&mut self) -> Result<(), Error> {
        match &self.state {
            CursorState::Failed(err) => return Err(err.clone()),
            CursorState::Closed => return Err(UsageError::Closed.into()),
            CursorState::Finished => return Ok(()),
            CursorState::NotStarted => self.transition(CursorState::Parsing),
            CursorState::Parsing | CursorState::Draining => {}
        }
        while matches!(self.state, CursorState::Parsing) {
            self.fill();
        }
        match &self.pending_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Abandon the stream and release the source.
    ///
    /// A cursor closed before the end of the stream answers every later call
    /// with [`UsageError::Closed`]; a finished or failed one keeps its
    /// terminal answer.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.capture.clear();
            self.pending_error = None;
            self.transition(CursorState::Closed);
        }
        self.close_source();
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Open elements after the last returned event
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Parser position in the decoded input (how far parsing has got, which
    /// may be ahead of the last returned event)
    pub fn position(&self) -> Position {
        self.parser.position()
    }

    pub fn config(&self) -> &CursorConfig {
        &self.config
    }

    /// Total bytes pulled from the source
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Pull one chunk and feed it, or finish the parser at end of input
    fn fill(&mut self) {
        let result = match self.source.pull(self.config.chunk_size) {
            Ok(Some(chunk)) if !chunk.is_empty() => {
                trace!(bytes = chunk.len(), "pulled chunk");
                self.bytes_read += chunk.len() as u64;
                self.parser.feed(&chunk, &mut self.capture).map(|_| false)
            }
            Ok(_) => {
                trace!(total = self.bytes_read, "source exhausted");
                self.parser.finish(&mut self.capture).map(|_| true)
            }
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(false) => {}
            Ok(true) => {
                self.close_source();
                self.transition(CursorState::Draining);
            }
            Err(err) => {
                debug!(
                    kind = err.kind(),
                    error = %err,
                    queued = self.capture.len(),
                    "cursor error captured"
                );
                self.close_source();
                self.pending_error = Some(err);
                self.transition(CursorState::Draining);
            }
        }
    }

    fn track_depth(&mut self, event: &Event) {
        match event {
            Event::ElementStart(e) if !e.is_empty => self.depth += 1,
            Event::ElementEnd(_) => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
    }

    fn transition(&mut self, next: CursorState) {
        debug!(from = self.state.label(), to = next.label(), "cursor state change");
        self.state = next;
    }

    fn close_source(&mut self) {
        if self.source_closed {
            return;
        }
        self.source_closed = true;
        debug!(bytes_read = self.bytes_read, "closing byte source");
        self.source.close();
    }
}

impl<S: ByteSource> Iterator for XmlCursor<S> {
    type Item = Result<Event, Error>;

    /// Yields every event before `EndOfStream`, then `None`. An error is
    /// yielded once and ends the iteration.
    fn next(&mut self) -> Option<Self::Item> {
        if self.iter_done {
            return None;
        }
        match self.next_event() {
            Ok(Event::EndOfStream) => {
                self.iter_done = true;
                None
            }
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                self.iter_done = true;
                Some(Err(err))
            }
        }
    }
}

impl<S: ByteSource> FusedIterator for XmlCursor<S> {}

impl<S: ByteSource> Drop for XmlCursor<S> {
    fn drop(&mut self) {
        self.close_source();
    }
}

impl<S: ByteSource> fmt::Debug for XmlCursor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlCursor")
            .field("state", &self.state)
            .field("depth", &self.depth)
            .field("bytes_read", &self.bytes_read)
            .field("source_closed", &self.source_closed)
            .field("capture", &self.capture)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::reader::source::from_fn;
    use std::io;

    fn names(cursor: &mut XmlCursor<impl ByteSource>) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let event = cursor.next_event().unwrap();
            if event.is_end_of_stream() {
                return out;
            }
            out.push(event.name().to_string());
        }
    }

    #[test]
    fn test_streaming_simple() {
        let mut cursor = XmlCursor::from_slice(b"<root><item/>text</root>");
        assert!(matches!(cursor.state(), CursorState::NotStarted));
        assert_eq!(names(&mut cursor), vec!["root", "item", "#text", "root"]);
        assert!(matches!(cursor.state(), CursorState::Finished));
    }

    #[test]
    fn test_streaming_chunks() {
        let config = CursorConfig::default().chunk_size(3);
        let source = SliceSource::new(b"<root><item>x</item></root>");
        let mut cursor = XmlCursor::with_config(source, config);
        assert_eq!(names(&mut cursor), vec!["root", "item", "#text", "item", "root"]);
        assert_eq!(cursor.bytes_read(), 27);
    }

    #[test]
    fn test_end_of_stream_is_idempotent() {
        let mut cursor = XmlCursor::from_slice(b"<a/>");
        assert!(cursor.next_event().unwrap().is_start_element());
        for _ in 0..3 {
            assert!(cursor.next_event().unwrap().is_end_of_stream());
        }
    }

    #[test]
    fn test_depth_follows_returned_events() {
        let mut cursor = XmlCursor::from_slice(b"<a><b/><c>t</c></a>");
        let mut depths = Vec::new();
        while !cursor.next_event().unwrap().is_end_of_stream() {
            depths.push(cursor.depth());
        }
        assert_eq!(depths, vec![1, 1, 2, 2, 1, 0]);
    }

    #[test]
    fn test_error_after_queued_events() {
        let mut cursor = XmlCursor::from_slice(b"<A><B></A>");
        assert_eq!(cursor.next_event().unwrap().name(), "A");
        assert_eq!(cursor.next_event().unwrap().name(), "B");
        let err = cursor.next_event().unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(cursor.state(), CursorState::Failed(_)));
        // Same terminal error again
        assert_eq!(cursor.next_event().unwrap_err().to_string(), err.to_string());
    }

    #[test]
    fn test_source_error() {
        let mut calls = 0;
        let source = from_fn(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(Some(b"<a>".to_vec()))
            } else {
                Err(SourceError::new(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")))
            }
        });
        let mut cursor = XmlCursor::new(source);
        assert!(cursor.next_event().unwrap().is_start_element());
        let err = cursor.next_event().unwrap_err();
        assert!(err.is_source());
        assert!(cursor.next_event().unwrap_err().is_source());
    }

    #[test]
    fn test_finish_queues_everything() {
        let mut cursor = XmlCursor::with_config(
            SliceSource::new(b"<a>tail</a>"),
            CursorConfig::default().chunk_size(2),
        );
        cursor.finish().unwrap();
        assert!(matches!(cursor.state(), CursorState::Draining));
        cursor.finish().unwrap();
        assert_eq!(names(&mut cursor), vec!["a", "#text", "a"]);
    }

    #[test]
    fn test_close_before_end() {
        let mut cursor = XmlCursor::from_slice(b"<a><b/></a>");
        cursor.next_event().unwrap();
        cursor.close();
        assert!(matches!(
            cursor.next_event(),
            Err(Error::Usage(UsageError::Closed))
        ));
        assert!(cursor.finish().is_err());
    }

    #[test]
    fn test_close_after_end_keeps_end_of_stream() {
        let mut cursor = XmlCursor::from_slice(b"<a/>");
        cursor.next_event().unwrap();
        cursor.next_event().unwrap();
        cursor.close();
        assert!(cursor.next_event().unwrap().is_end_of_stream());
    }

    #[test]
    fn test_iterator() {
        let cursor = XmlCursor::from_slice(b"<a>x</a>");
        let events: Vec<Event> = cursor.collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 3);

        let mut bad = XmlCursor::from_slice(b"<a></b>");
        assert!(bad.next().unwrap().is_ok());
        assert!(bad.next().unwrap().is_err());
        assert!(bad.next().is_none());
    }
}
