//! SAX Bridge Module
//!
//! Turns push parser callbacks into queued, owned cursor events.
//!
//! ## Architecture
//!
//! ```text
//! PushParser ---> EventCapture ---> VecDeque<Event>
//!                      |
//!                      v
//!             DeclarationObserver
//! ```
//!
//! ## Event Types
//!
//! - `ElementStart` - Element opening tag with resolved names and attributes
//! - `ElementEnd` - Element closing tag (not for self-closing elements)
//! - `Text` - Coalesced character data
//! - `CData` - CDATA section content
//! - `Comment` - Comment content
//! - `ProcessingInstruction` - PI target and data
//! - `EndOfStream` - Terminal marker

pub mod capture;
pub mod events;
pub mod namespace;
pub mod observer;

pub use capture::EventCapture;
pub use events::{Attribute, EndElement, Event, NodeType, StartElement};
pub use namespace::NamespaceResolver;
pub use observer::DeclarationObserver;
