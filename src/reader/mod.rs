//! XML Reader Module
//!
//! The pull side of the crate:
//! - Source: byte sources the cursor pulls chunks from
//! - Cursor: the forward-only event cursor

pub mod cursor;
pub mod source;

pub use cursor::{CursorState, XmlCursor};
pub use source::{from_fn, ByteSource, FnSource, ReadSource, SliceSource};
