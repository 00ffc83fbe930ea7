//! Event Capture Bridge
//!
//! Implements [`SaxHandler`] and turns the parser's callbacks into owned
//! [`Event`]s on a FIFO queue, tracking the open-element stack outside the
//! parser. Everything a callback borrows is copied before it returns.
//!
//! ```text
//! PushParser ---> EventCapture ---> VecDeque<Event> ---> XmlCursor
//!                      |
//!                      v
//!            DeclarationObserver (optional)
//! ```
//!
//! Character data arrives in pieces and is accumulated until a non-text
//! callback (or the end of the document) closes the run, so each
//! uninterrupted run becomes exactly one `Text` event.

use std::collections::VecDeque;
use std::fmt;

use super::events::{Attribute, EndElement, Event, StartElement};
use super::namespace::{ns, NamespaceResolver};
use super::observer::DeclarationObserver;
use crate::config::CursorConfig;
use crate::core::attributes::{split_qname, RawAttribute};
use crate::core::dtd::{AttDef, Doctype, ElementDecl, EntityDecl, NotationDecl};
use crate::core::library::Library;
use crate::core::push::{HandlerResult, SaxHandler};
use crate::error::MalformedError;

/// Open-element frame: the names needed to emit the matching end event
#[derive(Debug)]
struct Frame {
    name: String,
    local_name: String,
    prefix: Option<String>,
    namespace_uri: Option<String>,
}

/// Collector that queues cursor events during parsing
pub struct EventCapture {
    queue: VecDeque<Event>,
    /// Uncommitted text run
    text: String,
    frames: Vec<Frame>,
    namespaces: NamespaceResolver,
    resolve_namespaces: bool,
    skip_whitespace_text: bool,
    observer: Option<Box<dyn DeclarationObserver>>,
    lib: &'static Library,
}

impl EventCapture {
    /// Create a new collector with default settings
    pub fn new() -> Self {
        Self::from_config(&CursorConfig::default())
    }

    pub fn from_config(config: &CursorConfig) -> Self {
        Self {
            queue: VecDeque::with_capacity(64),
            text: String::new(),
            frames: Vec::with_capacity(16),
            namespaces: NamespaceResolver::new(),
            resolve_namespaces: config.namespaces,
            skip_whitespace_text: config.skip_whitespace_text,
            observer: None,
            lib: Library::get(),
        }
    }

    /// Attach an observer for declarative callbacks
    pub fn set_observer(&mut self, observer: Box<dyn DeclarationObserver>) {
        self.observer = Some(observer);
    }

    /// Take the next queued event
    pub fn pop_event(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Open elements seen by the parser so far
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Drop queued events and pending text
    pub fn clear(&mut self) {
        self.queue.clear();
        self.text.clear();
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        if self.skip_whitespace_text && self.lib.is_whitespace(&text) {
            return;
        }
        self.queue.push_back(Event::Text(text));
    }

    fn observe(&mut self, f: impl FnOnce(&mut dyn DeclarationObserver)) {
        if let Some(observer) = self.observer.as_deref_mut() {
            f(observer);
        }
    }

    /// Bind the namespace declarations among `attrs` in the current scope
    fn declare_namespaces(&mut self, attrs: &[RawAttribute]) -> HandlerResult {
        for attr in attrs {
            if attr.name == "xmlns" {
                self.namespaces.declare_default(&attr.value);
                continue;
            }
            if attr.prefix() != Some("xmlns") {
                continue;
            }
            let prefix = attr.local_name();
            match prefix {
                "xmlns" => {
                    return Err(MalformedError::new("the 'xmlns' prefix cannot be declared"))
                }
                "xml" if attr.value != ns::XML => {
                    return Err(MalformedError::new(
                        "the 'xml' prefix cannot be bound to another namespace",
                    ))
                }
                _ if attr.value.is_empty() => {
                    return Err(MalformedError::new(format!(
                        "namespace prefix '{}' cannot be bound to an empty URI",
                        prefix
                    )))
                }
                _ => self.namespaces.declare(prefix, &attr.value),
            }
        }
        Ok(())
    }

    /// Split a qualified name and resolve its prefix.
    ///
    /// Elements use the default namespace when unprefixed; attributes don't.
    fn resolve_name<'a>(
        &self,
        name: &'a str,
        use_default: bool,
    ) -> Result<(Option<&'a str>, &'a str, Option<String>), MalformedError> {
        if !self.resolve_namespaces {
            return Ok((None, name, None));
        }
        let (prefix, local_name) = split_qname(name);
        if local_name.is_empty() || local_name.contains(':') || prefix == Some("") {
            return Err(MalformedError::new(format!(
                "'{}' is not a valid qualified name",
                name
            )));
        }
        let uri = match prefix {
            Some(p) => Some(
                self.namespaces
                    .resolve(p)
                    .ok_or_else(|| {
                        MalformedError::new(format!("namespace prefix '{}' is not declared", p))
                    })?
                    .to_string(),
            ),
            None if use_default => self.namespaces.resolve_default().map(str::to_string),
            None => None,
        };
        Ok((prefix, local_name, uri))
    }

    fn build_attributes(&self, attrs: &[RawAttribute]) -> Result<Vec<Attribute>, MalformedError> {
        let mut out: Vec<Attribute> = Vec::with_capacity(attrs.len());
        for raw in attrs {
            let attr = if self.resolve_namespaces && raw.is_namespace_declaration() {
                Attribute {
                    name: raw.name.clone(),
                    value: raw.value.clone(),
                    prefix: raw.prefix().map(str::to_string),
                    local_name: raw.local_name().to_string(),
                    namespace_uri: Some(ns::XMLNS.to_string()),
                }
            } else {
                let (prefix, local_name, namespace_uri) = self.resolve_name(&raw.name, false)?;
                Attribute {
                    name: raw.name.clone(),
                    value: raw.value.clone(),
                    prefix: prefix.map(str::to_string),
                    local_name: local_name.to_string(),
                    namespace_uri,
                }
            };
            // Same expanded name written with two different prefixes
            if attr.namespace_uri.is_some()
                && out
                    .iter()
                    .any(|a| {
                        a.local_name == attr.local_name && a.namespace_uri == attr.namespace_uri
                    })
            {
                return Err(MalformedError::new(format!(
                    "attribute '{}' redefined through another prefix",
                    attr.name
                )));
            }
            out.push(attr);
        }
        Ok(out)
    }
}

impl Default for EventCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCapture")
            .field("queued", &self.queue.len())
            .field("pending_text", &self.text.len())
            .field("depth", &self.frames.len())
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

impl SaxHandler for EventCapture {
    fn start_element(
        &mut self,
        name: &str,
        attrs: &[RawAttribute],
        is_empty: bool,
    ) -> HandlerResult {
        self.flush_text();

        self.namespaces.push_scope();
        if self.resolve_namespaces {
            self.declare_namespaces(attrs)?;
        }
        let (prefix, local_name, namespace_uri) = self.resolve_name(name, true)?;
        let attributes = self.build_attributes(attrs)?;

        let prefix = prefix.map(str::to_string);
        let local_name = local_name.to_string();
        if is_empty {
            self.namespaces.pop_scope();
        } else {
            self.frames.push(Frame {
                name: name.to_string(),
                local_name: local_name.clone(),
                prefix: prefix.clone(),
                namespace_uri: namespace_uri.clone(),
            });
        }

        self.queue.push_back(Event::ElementStart(StartElement {
            name: name.to_string(),
            local_name,
            prefix,
            namespace_uri,
            attributes,
            is_empty,
        }));
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> HandlerResult {
        self.flush_text();

        let frame = self.frames.pop().ok_or_else(|| {
            MalformedError::new(format!("end tag '{}' without an open element", name))
        })?;
        if frame.name != name {
            return Err(MalformedError::new(format!(
                "mismatched end tag: expected '</{}>', found '</{}>'",
                frame.name, name
            )));
        }
        self.namespaces.pop_scope();

        self.queue.push_back(Event::ElementEnd(EndElement {
            name: frame.name,
            local_name: frame.local_name,
            prefix: frame.prefix,
            namespace_uri: frame.namespace_uri,
        }));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> HandlerResult {
        self.text.push_str(text);
        Ok(())
    }

    fn cdata(&mut self, text: &str) -> HandlerResult {
        self.flush_text();
        self.queue.push_back(Event::CData(text.to_string()));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> HandlerResult {
        self.flush_text();
        self.queue.push_back(Event::Comment(text.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> HandlerResult {
        self.flush_text();
        self.queue.push_back(Event::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn start_document(&mut self) -> HandlerResult {
        self.observe(|o| o.start_document());
        Ok(())
    }

    fn end_document(&mut self) -> HandlerResult {
        self.flush_text();
        if let Some(frame) = self.frames.last() {
            return Err(MalformedError::new(format!(
                "element '{}' is not closed at end of input",
                frame.name
            )));
        }
        self.observe(|o| o.end_document());
        Ok(())
    }

    fn xml_declaration(
        &mut self,
        version: &str,
        encoding: Option<&str>,
        standalone: Option<bool>,
    ) -> HandlerResult {
        self.observe(|o| o.xml_declaration(version, encoding, standalone));
        Ok(())
    }

    fn doctype(&mut self, doctype: &Doctype) -> HandlerResult {
        self.observe(|o| o.doctype(doctype));
        Ok(())
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> HandlerResult {
        self.observe(|o| o.entity_decl(decl));
        Ok(())
    }

    fn unparsed_entity_decl(&mut self, decl: &EntityDecl) -> HandlerResult {
        self.observe(|o| o.unparsed_entity_decl(decl));
        Ok(())
    }

    fn notation_decl(&mut self, decl: &NotationDecl) -> HandlerResult {
        self.observe(|o| o.notation_decl(decl));
        Ok(())
    }

    fn attribute_decl(&mut self, element: &str, def: &AttDef) -> HandlerResult {
        self.observe(|o| o.attribute_decl(element, def));
        Ok(())
    }

    fn element_decl(&mut self, decl: &ElementDecl) -> HandlerResult {
        self.observe(|o| o.element_decl(decl));
        Ok(())
    }

    fn reference(&mut self, name: &str) -> HandlerResult {
        self.observe(|o| o.reference(name));
        Ok(())
    }
}
