//! xmlcursor - Streaming XML with a pull-based cursor
//!
//! An incremental push parser fires callbacks for every construct in each
//! chunk it is fed; a capture bridge queues those callbacks as owned events;
//! the cursor hands them out one at a time, pulling more bytes from its
//! source only when the queue runs dry.
//!
//! Layers:
//! A: Byte sources (`ByteSource`, `SliceSource`, `ReadSource`, `from_fn`)
//! B: Push parser (`PushParser` driving a `SaxHandler`)
//! C: Event capture bridge (`EventCapture`)
//! D: Streaming cursor (`XmlCursor`)
//!
//! ```
//! use xmlcursor::XmlCursor;
//!
//! let mut cursor = XmlCursor::from_slice(br#"<A><B a="value">CONTENT</B><C/></A>"#);
//! let mut names = Vec::new();
//! loop {
//!     let event = cursor.next_event()?;
//!     if event.is_end_of_stream() {
//!         break;
//!     }
//!     names.push(event.name().to_string());
//! }
//! assert_eq!(names, ["A", "B", "#text", "B", "C", "A"]);
//! # Ok::<(), xmlcursor::Error>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod reader;
pub mod sax;

pub use crate::config::CursorConfig;
pub use crate::core::push::{PushParser, SaxHandler};
pub use crate::error::{Error, MalformedError, Position, Result, SourceError, UsageError};
pub use crate::reader::{from_fn, ByteSource, CursorState, ReadSource, SliceSource, XmlCursor};
pub use crate::sax::{
    Attribute, DeclarationObserver, EndElement, Event, EventCapture, NodeType, StartElement,
};
