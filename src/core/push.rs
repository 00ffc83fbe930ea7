//! Incremental Push Parser with SaxHandler Trait
//!
//! Bytes are fed in arbitrary chunks with [`PushParser::feed`]; each call
//! synchronously drives zero or more [`SaxHandler`] callbacks for every
//! construct that is complete in the data seen so far. Anything cut off by
//! the end of a chunk (a tag, a reference, a comment, a partial character)
//! stays buffered until more data arrives or [`PushParser::finish`] declares
//! the input complete.
//!
//! ```text
//! feed(chunk) -> InputDecoder -> buffer -> step() -> SaxHandler callbacks
//! ```
//!
//! Character data is reported in pieces: each plain run and each expanded
//! reference is a separate `characters` call. Handlers that want whole text
//! nodes coalesce adjacent calls themselves.

use memchr::{memchr, memmem};
use tracing::{debug, trace};

use super::attributes::{find_duplicate, push_normalized_value, RawAttribute};
use super::dtd::{
    parse_doctype, AttDef, Declaration, Doctype, ElementDecl, EntityDecl, EntityTable,
    NotationDecl,
};
use super::encoding::{InputDecoder, XmlEncoding};
use super::entities::{find_invalid_char, parse_reference, Reference};
use super::library::Library;
use super::scanner::Scanner;
use crate::error::{Error, MalformedError, Position, UsageError};

/// Result type returned by handler callbacks
pub type HandlerResult = Result<(), MalformedError>;

/// Default limit on element nesting
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Nested internal entity expansion limit
const MAX_ENTITY_NESTING: usize = 32;

/// Trait for handling parse events
///
/// Implement this trait to receive XML parsing events. All string arguments
/// borrow the parser's internal buffer and are only valid for the duration
/// of the call; implementations copy what they keep.
///
/// Returning an error from any callback aborts the current `feed`/`finish`
/// call and permanently fails the parser.
pub trait SaxHandler {
    /// Called when an element starts
    ///
    /// # Arguments
    /// * `name` - Qualified element name as written
    /// * `attrs` - Attributes in document order, values decoded
    /// * `is_empty` - True if this is a self-closing element (e.g., `<br/>`)
    fn start_element(&mut self, name: &str, attrs: &[RawAttribute], is_empty: bool)
        -> HandlerResult;

    /// Called when an element ends (never for self-closing elements)
    fn end_element(&mut self, name: &str) -> HandlerResult;

    /// Called for a piece of character data
    fn characters(&mut self, text: &str) -> HandlerResult;

    /// Called for CDATA sections (content excludes `<![CDATA[` and `]]>`)
    fn cdata(&mut self, text: &str) -> HandlerResult;

    /// Called for comments (content excludes `<!--` and `-->`)
    fn comment(&mut self, text: &str) -> HandlerResult;

    /// Called for processing instructions
    fn processing_instruction(&mut self, target: &str, data: &str) -> HandlerResult;

    /// Called once, before the first construct
    fn start_document(&mut self) -> HandlerResult {
        Ok(())
    }

    /// Called once, after the last construct, from `finish`
    fn end_document(&mut self) -> HandlerResult {
        Ok(())
    }

    /// Called for the XML declaration
    fn xml_declaration(
        &mut self,
        _version: &str,
        _encoding: Option<&str>,
        _standalone: Option<bool>,
    ) -> HandlerResult {
        Ok(())
    }

    /// Called for the DOCTYPE, before its individual declarations
    fn doctype(&mut self, _doctype: &Doctype) -> HandlerResult {
        Ok(())
    }

    /// Called for each parsed general or parameter entity declaration
    fn entity_decl(&mut self, _decl: &EntityDecl) -> HandlerResult {
        Ok(())
    }

    /// Called for each unparsed (`NDATA`) entity declaration
    fn unparsed_entity_decl(&mut self, _decl: &EntityDecl) -> HandlerResult {
        Ok(())
    }

    /// Called for each notation declaration
    fn notation_decl(&mut self, _decl: &NotationDecl) -> HandlerResult {
        Ok(())
    }

    /// Called once per attribute definition of an `<!ATTLIST>`
    fn attribute_decl(&mut self, _element: &str, _def: &AttDef) -> HandlerResult {
        Ok(())
    }

    /// Called for each element type declaration
    fn element_decl(&mut self, _decl: &ElementDecl) -> HandlerResult {
        Ok(())
    }

    /// Called when a declared entity is referenced, before its expansion
    fn reference(&mut self, _name: &str) -> HandlerResult {
        Ok(())
    }
}

/// Where in the document the parser is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing consumed yet; an XML declaration is still allowed
    Start,
    /// Before the root element
    Prolog,
    /// Inside the root element
    Content,
    /// After the root element closed
    Epilogue,
}

/// Outcome of one parse step
enum Step {
    /// This many bytes of the buffer were consumed
    Consumed(usize),
    /// The construct is cut off by the end of the buffer
    NeedMore(&'static str),
}

/// How far the search for the end of a cut-off construct got, so the next
/// feed continues there instead of rescanning the whole construct
#[derive(Debug, Clone, Copy, Default)]
struct Resume {
    /// Offset from the start of the construct
    offset: usize,
    /// Open literal quote
    quote: Option<u8>,
    /// Inside a DOCTYPE internal subset
    in_subset: bool,
    /// Terminator of a comment or PI inside the internal subset
    terminator: Option<&'static str>,
}

/// Incremental XML parser
pub struct PushParser {
    lib: &'static Library,
    decoder: InputDecoder,
    /// Decoded input not yet consumed
    buffer: String,
    /// Position of `buffer[0]` in the decoded stream
    position: Position,
    phase: Phase,
    resume: Resume,
    depth: usize,
    max_depth: usize,
    entities: EntityTable,
    seen_doctype: bool,
    started: bool,
    finished: bool,
    failure: Option<MalformedError>,
}

impl PushParser {
    /// Create a new push parser
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Create a new push parser with a nesting limit
    pub fn with_max_depth(max_depth: usize) -> Self {
        PushParser {
            lib: Library::get(),
            decoder: InputDecoder::new(),
            buffer: String::with_capacity(8192),
            position: Position::start(),
            phase: Phase::Start,
            resume: Resume::default(),
            depth: 0,
            max_depth,
            entities: EntityTable::new(),
            seen_doctype: false,
            started: false,
            finished: false,
            failure: None,
        }
    }

    /// Feed a chunk of data to the parser
    pub fn feed<H: SaxHandler>(&mut self, chunk: &[u8], handler: &mut H) -> Result<(), Error> {
        self.check_usable()?;
        trace!(bytes = chunk.len(), buffered = self.buffer.len(), "feeding parser");

        let decoded = self.decoder.decode(chunk, &mut self.buffer, false);
        self.record(decoded)?;
        let parsed = self.parse(handler, false);
        self.record(parsed)
    }

    /// Declare the input complete and flush everything still buffered
    pub fn finish<H: SaxHandler>(&mut self, handler: &mut H) -> Result<(), Error> {
        self.check_usable()?;
        self.finished = true;

        let decoded = self.decoder.decode(&[], &mut self.buffer, true);
        self.record(decoded)?;
        let parsed = self.parse(handler, true);
        self.record(parsed)?;

        let done = self.end_of_input(handler);
        self.record(done)
    }

    /// Position of the first unconsumed character
    pub fn position(&self) -> Position {
        self.position
    }

    /// Number of elements currently open
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Detected input encoding, once known
    pub fn encoding(&self) -> Option<XmlEncoding> {
        self.decoder.encoding()
    }

    /// Bytes of decoded input waiting for the rest of a construct
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True once `finish` has been called
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn check_usable(&self) -> Result<(), Error> {
        if let Some(err) = &self.failure {
            return Err(err.clone().into());
        }
        if self.finished {
            return Err(UsageError::ParserFinished.into());
        }
        Ok(())
    }

    fn record(&mut self, result: Result<(), MalformedError>) -> Result<(), Error> {
        result.map_err(|err| {
            let err = err.with_position(self.position);
            debug!(error = %err, "parser failed");
            self.failure = Some(err.clone());
            err.into()
        })
    }

    fn end_of_input<H: SaxHandler>(&mut self, handler: &mut H) -> Result<(), MalformedError> {
        if !self.started {
            self.started = true;
            handler.start_document()?;
        }
        if matches!(self.phase, Phase::Start | Phase::Prolog) {
            return Err(MalformedError::new("document has no root element"));
        }
        handler.end_document()?;
        if self.depth > 0 {
            return Err(MalformedError::new("unexpected end of input inside element"));
        }
        Ok(())
    }

    /// Run steps over the buffer until it is empty or a construct is cut off
    fn parse<H: SaxHandler>(
        &mut self,
        handler: &mut H,
        is_final: bool,
    ) -> Result<(), MalformedError> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut consumed = 0;

        let result = loop {
            let rest = &buffer[consumed..];
            if rest.is_empty() {
                break Ok(());
            }
            if !self.started {
                self.started = true;
                if let Err(e) = handler.start_document() {
                    break Err(e);
                }
            }
            match self.step(rest, is_final, handler) {
                Ok(Step::Consumed(n)) => {
                    self.position.advance(&rest[..n]);
                    self.resume = Resume::default();
                    consumed += n;
                    if self.phase == Phase::Start {
                        self.phase = Phase::Prolog;
                    }
                }
                Ok(Step::NeedMore(context)) => {
                    if is_final {
                        break Err(MalformedError::new(format!(
                            "unexpected end of input in {}",
                            context
                        )));
                    }
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.buffer = if consumed == 0 {
            buffer
        } else {
            buffer[consumed..].to_string()
        };
        result
    }

    /// Parse the construct at the start of `input`
    fn step<H: SaxHandler>(
        &mut self,
        input: &str,
        is_final: bool,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        let bytes = input.as_bytes();
        match bytes[0] {
            b'<' => match bytes.get(1) {
                None => Ok(Step::NeedMore("markup")),
                Some(b'/') => self.end_tag(input, handler),
                Some(b'?') => self.processing_instruction(input, handler),
                Some(b'!') => self.bang_markup(input, handler),
                Some(&b) if self.lib.is_name_start_byte(b) => self.start_tag(input, handler),
                Some(_) => Err(MalformedError::new("invalid markup: '<' must start a tag")),
            },
            b'&' => self.text_reference(input, handler),
            _ => self.text(input, is_final, handler),
        }
    }

    fn text<H: SaxHandler>(
        &mut self,
        input: &str,
        is_final: bool,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        let scanner = Scanner::new(input, self.lib);
        let boundary = scanner.find_text_boundary();
        let mut end = boundary.unwrap_or(input.len());

        if self.phase != Phase::Content {
            let run = &input[..end];
            if !self.lib.is_whitespace(run) {
                return Err(MalformedError::new("content is not allowed outside the root element"));
            }
            return Ok(Step::Consumed(end));
        }

        // A trailing "]" or "]]" may become "]]>" once the next chunk arrives
        if boundary.is_none() && !is_final {
            let held = input[..end].bytes().rev().take(2).take_while(|&b| b == b']').count();
            end -= held;
            if end == 0 {
                return Ok(Step::NeedMore("character data"));
            }
        }

        let run = &input[..end];
        if run.contains("]]>") {
            return Err(MalformedError::new("']]>' is not allowed in character data"));
        }
        check_chars(run)?;
        handler.characters(run)?;
        Ok(Step::Consumed(end))
    }

    fn text_reference<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        if self.phase != Phase::Content {
            return Err(MalformedError::new("references are not allowed outside the root element"));
        }
        match parse_reference(input, self.lib) {
            Reference::Incomplete => Ok(Step::NeedMore("reference")),
            Reference::Invalid(msg) => Err(MalformedError::new(msg)),
            Reference::Char { value, len } => {
                let mut buf = [0u8; 4];
                handler.characters(value.encode_utf8(&mut buf))?;
                Ok(Step::Consumed(len))
            }
            Reference::Named { name, len } => {
                match self.lib.predefined_entity(name) {
                    Some(text) => handler.characters(text)?,
                    None => self.expand_in_content(name, handler, &mut Vec::new())?,
                }
                Ok(Step::Consumed(len))
            }
        }
    }

    /// Expand a declared general entity inside element content
    fn expand_in_content<H: SaxHandler>(
        &self,
        name: &str,
        handler: &mut H,
        open: &mut Vec<String>,
    ) -> Result<(), MalformedError> {
        let decl = self.lookup_entity(name, open)?;
        if decl.is_unparsed() {
            return Err(MalformedError::new(format!(
                "reference to unparsed entity '{}'",
                name
            )));
        }
        handler.reference(name)?;

        // External parsed entities are reported but not loaded
        let Some(value) = decl.value.clone() else {
            return Ok(());
        };
        if value.contains('<') {
            return Err(MalformedError::new(format!(
                "markup in the replacement text of entity '{}' is not supported",
                name
            )));
        }

        open.push(name.to_string());
        let mut rest = value.as_str();
        while !rest.is_empty() {
            match rest.find('&') {
                Some(0) => match parse_reference(rest, self.lib) {
                    Reference::Char { value, len } => {
                        let mut buf = [0u8; 4];
                        handler.characters(value.encode_utf8(&mut buf))?;
                        rest = &rest[len..];
                    }
                    Reference::Named { name, len } => {
                        match self.lib.predefined_entity(name) {
                            Some(text) => handler.characters(text)?,
                            None => self.expand_in_content(name, handler, open)?,
                        }
                        rest = &rest[len..];
                    }
                    Reference::Incomplete => {
                        return Err(MalformedError::new("unterminated reference in entity value"))
                    }
                    Reference::Invalid(msg) => return Err(MalformedError::new(msg)),
                },
                Some(amp) => {
                    handler.characters(&rest[..amp])?;
                    rest = &rest[amp..];
                }
                None => {
                    handler.characters(rest)?;
                    rest = "";
                }
            }
        }
        open.pop();
        Ok(())
    }

    /// Expand a declared general entity inside an attribute value
    fn expand_in_attribute(
        &self,
        name: &str,
        out: &mut String,
        open: &mut Vec<String>,
    ) -> Result<(), MalformedError> {
        let decl = self.lookup_entity(name, open)?;
        let Some(value) = decl.value.clone() else {
            return Err(MalformedError::new(format!(
                "external entity '{}' referenced in attribute value",
                name
            )));
        };
        open.push(name.to_string());
        self.decode_attribute_value(&value, out, open)?;
        open.pop();
        Ok(())
    }

    fn lookup_entity(&self, name: &str, open: &[String]) -> Result<&EntityDecl, MalformedError> {
        if open.iter().any(|n| n == name) {
            return Err(MalformedError::new(format!("entity '{}' references itself", name)));
        }
        if open.len() >= MAX_ENTITY_NESTING {
            return Err(MalformedError::new("entity expansion nested too deeply"));
        }
        self.entities
            .get(name)
            .ok_or_else(|| MalformedError::new(format!("entity '{}' is not defined", name)))
    }

    /// Decode a raw attribute value: expand references, normalize whitespace
    fn decode_attribute_value(
        &self,
        raw: &str,
        out: &mut String,
        open: &mut Vec<String>,
    ) -> Result<(), MalformedError> {
        let mut rest = raw;
        loop {
            let stop = rest.find(['&', '<']);
            let literal = &rest[..stop.unwrap_or(rest.len())];
            push_normalized_value(out, literal);
            let Some(stop) = stop else {
                return Ok(());
            };
            rest = &rest[stop..];
            if rest.starts_with('<') {
                return Err(MalformedError::new("'<' is not allowed in attribute values"));
            }
            match parse_reference(rest, self.lib) {
                Reference::Char { value, len } => {
                    out.push(value);
                    rest = &rest[len..];
                }
                Reference::Named { name, len } => {
                    match self.lib.predefined_entity(name) {
                        Some(text) => out.push_str(text),
                        None => self.expand_in_attribute(name, out, open)?,
                    }
                    rest = &rest[len..];
                }
                Reference::Incomplete => {
                    return Err(MalformedError::new("unterminated reference in attribute value"))
                }
                Reference::Invalid(msg) => return Err(MalformedError::new(msg)),
            }
        }
    }

    fn start_tag<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        // Once cut off, only look at new data until the closing '>' shows up
        if self.resume.offset > 0 && find_tag_end(input, &mut self.resume).is_none() {
            return Ok(Step::NeedMore("start tag"));
        }
        match self.read_start_tag(input, handler)? {
            Step::NeedMore(context) => {
                find_tag_end(input, &mut self.resume);
                Ok(Step::NeedMore(context))
            }
            consumed => Ok(consumed),
        }
    }

    fn read_start_tag<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        const CONTEXT: &str = "start tag";
        let mut scanner = Scanner::new(input, self.lib);
        scanner.advance(1);

        let name = match scanner.read_name() {
            Some(_) if scanner.is_eof() => return Ok(Step::NeedMore(CONTEXT)),
            Some(name) => name,
            None => return Err(MalformedError::new("invalid element name")),
        };

        let mut attrs: Vec<RawAttribute> = Vec::new();
        let is_empty = loop {
            let had_space = scanner.skip_whitespace() > 0;
            match scanner.peek() {
                None => return Ok(Step::NeedMore(CONTEXT)),
                Some(b'>') => {
                    scanner.advance(1);
                    break false;
                }
                Some(b'/') => match scanner.peek_at(1) {
                    None => return Ok(Step::NeedMore(CONTEXT)),
                    Some(b'>') => {
                        scanner.advance(2);
                        break true;
                    }
                    Some(_) => return Err(MalformedError::new("expected '>' after '/' in tag")),
                },
                Some(b) if self.lib.is_name_start_byte(b) => {
                    if !had_space {
                        return Err(MalformedError::new(
                            "whitespace is required before an attribute",
                        ));
                    }
                    let attr_name = match scanner.read_name() {
                        Some(_) if scanner.is_eof() => return Ok(Step::NeedMore(CONTEXT)),
                        Some(n) => n,
                        None => return Err(MalformedError::new("invalid attribute name")),
                    };
                    scanner.skip_whitespace();
                    match scanner.peek() {
                        None => return Ok(Step::NeedMore(CONTEXT)),
                        Some(b'=') => scanner.advance(1),
                        Some(_) => {
                            return Err(MalformedError::new(format!(
                                "attribute '{}' has no value",
                                attr_name
                            )))
                        }
                    }
                    scanner.skip_whitespace();
                    let quote = match scanner.peek() {
                        None => return Ok(Step::NeedMore(CONTEXT)),
                        Some(q @ (b'"' | b'\'')) => q,
                        Some(_) => {
                            return Err(MalformedError::new(format!(
                                "value of attribute '{}' must be quoted",
                                attr_name
                            )))
                        }
                    };
                    scanner.advance(1);
                    let value_start = scanner.position();
                    let Some(value_end) = scanner.find_byte(quote) else {
                        return Ok(Step::NeedMore(CONTEXT));
                    };
                    let raw = scanner.slice(value_start, value_end);
                    scanner.set_position(value_end + 1);

                    check_chars(raw)?;
                    let mut value = String::with_capacity(raw.len());
                    self.decode_attribute_value(raw, &mut value, &mut Vec::new())?;
                    attrs.push(RawAttribute::new(attr_name, value));
                }
                Some(_) => return Err(MalformedError::new("invalid character in tag")),
            }
        };

        match self.phase {
            Phase::Epilogue => {
                return Err(MalformedError::new(
                    "extra content at the end of the document: only one root element is allowed",
                ))
            }
            Phase::Start | Phase::Prolog => self.phase = Phase::Content,
            Phase::Content => {}
        }
        if let Some(dup) = find_duplicate(&attrs) {
            return Err(MalformedError::new(format!(
                "attribute '{}' redefined on element '{}'",
                dup, name
            )));
        }
        if !is_empty {
            if self.depth >= self.max_depth {
                return Err(MalformedError::new(format!(
                    "maximum nesting depth of {} exceeded",
                    self.max_depth
                )));
            }
            self.depth += 1;
        } else if self.depth == 0 {
            self.phase = Phase::Epilogue;
        }

        handler.start_element(name, &attrs, is_empty)?;
        Ok(Step::Consumed(scanner.position()))
    }

    fn end_tag<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        const CONTEXT: &str = "end tag";
        let mut scanner = Scanner::new(input, self.lib);
        scanner.advance(2);

        let name = match scanner.read_name() {
            Some(_) if scanner.is_eof() => return Ok(Step::NeedMore(CONTEXT)),
            Some(name) => name,
            None if scanner.is_eof() => return Ok(Step::NeedMore(CONTEXT)),
            None => return Err(MalformedError::new("invalid end tag name")),
        };
        scanner.skip_whitespace();
        match scanner.peek() {
            None => return Ok(Step::NeedMore(CONTEXT)),
            Some(b'>') => scanner.advance(1),
            Some(_) => return Err(MalformedError::new(format!("malformed end tag '{}'", name))),
        }

        if self.depth == 0 {
            return Err(MalformedError::new(format!(
                "end tag '{}' has no matching start tag",
                name
            )));
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.phase = Phase::Epilogue;
        }

        handler.end_element(name)?;
        Ok(Step::Consumed(scanner.position()))
    }

    fn bang_markup<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        let scanner = Scanner::new(input, self.lib);
        if scanner.starts_with("<!--") {
            return self.comment(input, handler);
        }
        if scanner.starts_with("<![CDATA[") {
            return self.cdata(input, handler);
        }
        if scanner.starts_with("<!DOCTYPE") {
            return self.doctype(input, handler);
        }
        if ["<!--", "<![CDATA[", "<!DOCTYPE"]
            .iter()
            .any(|m| scanner.could_start_with(m))
        {
            return Ok(Step::NeedMore("markup"));
        }
        Err(MalformedError::new("invalid markup after '<!'"))
    }

    fn comment<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        let mut scanner = Scanner::new(input, self.lib);
        scanner.set_position(self.resume.offset.max(4));
        let Some(end) = scanner.find_str("-->") else {
            self.resume.offset = input.len().saturating_sub(2).max(4);
            return Ok(Step::NeedMore("comment"));
        };
        let content = scanner.slice(4, end);
        if content.contains("--") || content.ends_with('-') {
            return Err(MalformedError::new("'--' is not allowed inside a comment"));
        }
        check_chars(content)?;
        handler.comment(content)?;
        Ok(Step::Consumed(end + 3))
    }

    fn cdata<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        let mut scanner = Scanner::new(input, self.lib);
        scanner.set_position(self.resume.offset.max(9));
        let Some(end) = scanner.find_str("]]>") else {
            self.resume.offset = input.len().saturating_sub(2).max(9);
            return Ok(Step::NeedMore("CDATA section"));
        };
        if self.phase != Phase::Content {
            return Err(MalformedError::new("CDATA section outside the root element"));
        }
        let content = scanner.slice(9, end);
        check_chars(content)?;
        handler.cdata(content)?;
        Ok(Step::Consumed(end + 3))
    }

    fn processing_instruction<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        const CONTEXT: &str = "processing instruction";
        let mut scanner = Scanner::new(input, self.lib);
        scanner.advance(2);

        let target = match scanner.read_name() {
            Some(_) if scanner.is_eof() => return Ok(Step::NeedMore(CONTEXT)),
            Some(target) => target,
            None if scanner.is_eof() => return Ok(Step::NeedMore(CONTEXT)),
            None => return Err(MalformedError::new("processing instruction has no target")),
        };
        let after_target = scanner.position();
        scanner.set_position(self.resume.offset.max(after_target));
        let Some(end) = scanner.find_str("?>") else {
            self.resume.offset = input.len().saturating_sub(1).max(after_target);
            return Ok(Step::NeedMore(CONTEXT));
        };

        let raw = scanner.slice(after_target, end);
        if !raw.is_empty() && !self.lib.is_whitespace_byte(raw.as_bytes()[0]) {
            return Err(MalformedError::new(
                "whitespace is required after the processing instruction target",
            ));
        }
        let data = raw.trim_start_matches([' ', '\t', '\n', '\r']);
        check_chars(data)?;

        if target == "xml" {
            if self.phase != Phase::Start {
                return Err(MalformedError::new(
                    "XML declaration is only allowed at the start of the document",
                ));
            }
            let (version, encoding, standalone) = parse_xml_declaration(data)?;
            handler.xml_declaration(version, encoding, standalone)?;
        } else if target.eq_ignore_ascii_case("xml") {
            return Err(MalformedError::new(format!(
                "processing instruction target '{}' is reserved",
                target
            )));
        } else {
            handler.processing_instruction(target, data)?;
        }
        Ok(Step::Consumed(end + 2))
    }

    fn doctype<H: SaxHandler>(
        &mut self,
        input: &str,
        handler: &mut H,
    ) -> Result<Step, MalformedError> {
        let Some(end) = find_doctype_end(input, &mut self.resume) else {
            return Ok(Step::NeedMore("DOCTYPE"));
        };
        if self.seen_doctype || !matches!(self.phase, Phase::Start | Phase::Prolog) {
            return Err(MalformedError::new(
                "DOCTYPE is only allowed once, before the root element",
            ));
        }
        self.seen_doctype = true;

        let doctype = parse_doctype(&input[9..end], self.lib)?;
        handler.doctype(&doctype)?;
        for decl in &doctype.declarations {
            match decl {
                Declaration::Entity(e) => {
                    self.entities.add(e);
                    if e.is_unparsed() {
                        handler.unparsed_entity_decl(e)?;
                    } else {
                        handler.entity_decl(e)?;
                    }
                }
                Declaration::Notation(n) => handler.notation_decl(n)?,
                Declaration::AttList(list) => {
                    for def in &list.attributes {
                        handler.attribute_decl(&list.element, def)?;
                    }
                }
                Declaration::Element(e) => handler.element_decl(e)?,
            }
        }
        Ok(Step::Consumed(end + 1))
    }
}

impl Default for PushParser {
    fn default() -> Self {
        Self::new()
    }
}

fn check_chars(text: &str) -> Result<(), MalformedError> {
    match find_invalid_char(text) {
        Some((_, c)) => Err(MalformedError::new(format!(
            "invalid XML character U+{:04X}",
            c as u32
        ))),
        None => Ok(()),
    }
}

/// Find the `>` closing a start tag, skipping quoted attribute values.
/// Scanning starts at `resume.offset`; when the end is missing, `resume`
/// records where to continue.
fn find_tag_end(input: &str, resume: &mut Resume) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut pos = resume.offset.max(1);
    while pos < bytes.len() {
        match resume.quote {
            Some(q) => match memchr(q, &bytes[pos..]) {
                Some(i) => {
                    pos += i;
                    resume.quote = None;
                }
                None => {
                    pos = bytes.len();
                    break;
                }
            },
            None => match bytes[pos] {
                b @ (b'"' | b'\'') => resume.quote = Some(b),
                b'>' => return Some(pos),
                _ => {}
            },
        }
        pos += 1;
    }
    resume.offset = pos;
    None
}

/// Find the `>` closing a DOCTYPE, skipping quoted literals, the internal
/// subset, and comments and processing instructions inside it. Resumable
/// the same way as [`find_tag_end`].
fn find_doctype_end(input: &str, resume: &mut Resume) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut pos = resume.offset.max(9);

    while pos < bytes.len() {
        if let Some(terminator) = resume.terminator {
            match memmem::find(&bytes[pos..], terminator.as_bytes()) {
                Some(i) => {
                    pos += i + terminator.len();
                    resume.terminator = None;
                    continue;
                }
                None => {
                    resume.offset = (bytes.len() + 1).saturating_sub(terminator.len()).max(pos);
                    return None;
                }
            }
        }
        let b = bytes[pos];
        match resume.quote {
            Some(q) => {
                if b == q {
                    resume.quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => resume.quote = Some(b),
                b'[' if !resume.in_subset => resume.in_subset = true,
                b']' if resume.in_subset => resume.in_subset = false,
                b'<' if resume.in_subset => {
                    let rest = &input[pos..];
                    if rest.starts_with("<!--") {
                        resume.terminator = Some("-->");
                        pos += 4;
                        continue;
                    }
                    if rest.starts_with("<?") {
                        resume.terminator = Some("?>");
                        pos += 2;
                        continue;
                    }
                    if "<!--".starts_with(rest) {
                        // Might still become a comment
                        resume.offset = pos;
                        return None;
                    }
                }
                b'>' if !resume.in_subset => return Some(pos),
                _ => {}
            },
        }
        pos += 1;
    }
    resume.offset = pos;
    None
}

/// Parse `version="1.0" encoding="..." standalone="yes"`
fn parse_xml_declaration(
    data: &str,
) -> Result<(&str, Option<&str>, Option<bool>), MalformedError> {
    let mut version = None;
    let mut encoding = None;
    let mut standalone = None;
    let mut rest = data.trim_end();
    let mut index = 0;

    while !rest.is_empty() {
        let (name, after_name) = rest
            .split_once('=')
            .ok_or_else(|| MalformedError::new("malformed XML declaration"))?;
        let name = name.trim();
        let after_name = after_name.trim_start();
        let quote = after_name
            .chars()
            .next()
            .filter(|&q| q == '"' || q == '\'')
            .ok_or_else(|| MalformedError::new("XML declaration values must be quoted"))?;
        let value_and_rest = &after_name[1..];
        let close = value_and_rest
            .find(quote)
            .ok_or_else(|| MalformedError::new("unterminated value in XML declaration"))?;
        let value = &value_and_rest[..close];
        rest = value_and_rest[close + 1..].trim_start();

        match (name, index) {
            ("version", 0) => version = Some(value),
            ("encoding", _) if version.is_some() && encoding.is_none() && standalone.is_none() => {
                encoding = Some(value)
            }
            ("standalone", _) if version.is_some() && standalone.is_none() => {
                standalone = Some(match value {
                    "yes" => true,
                    "no" => false,
                    _ => return Err(MalformedError::new("standalone must be 'yes' or 'no'")),
                })
            }
            _ => {
                return Err(MalformedError::new(format!(
                    "unexpected '{}' in XML declaration",
                    name
                )))
            }
        }
        index += 1;
    }

    let version = version.ok_or_else(|| MalformedError::new("XML declaration is missing version"))?;
    Ok((version, encoding, standalone))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test handler that records callbacks as strings
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl SaxHandler for Recorder {
        fn start_element(
            &mut self,
            name: &str,
            attrs: &[RawAttribute],
            is_empty: bool,
        ) -> HandlerResult {
            let attrs: Vec<String> =
                attrs.iter().map(|a| format!("{}={}", a.name, a.value)).collect();
            self.calls.push(format!("start {} [{}] {}", name, attrs.join(","), is_empty));
            Ok(())
        }

        fn end_element(&mut self, name: &str) -> HandlerResult {
            self.calls.push(format!("end {}", name));
            Ok(())
        }

        fn characters(&mut self, text: &str) -> HandlerResult {
            self.calls.push(format!("chars {:?}", text));
            Ok(())
        }

        fn cdata(&mut self, text: &str) -> HandlerResult {
            self.calls.push(format!("cdata {:?}", text));
            Ok(())
        }

        fn comment(&mut self, text: &str) -> HandlerResult {
            self.calls.push(format!("comment {:?}", text));
            Ok(())
        }

        fn processing_instruction(&mut self, target: &str, data: &str) -> HandlerResult {
            self.calls.push(format!("pi {} {:?}", target, data));
            Ok(())
        }

        fn xml_declaration(
            &mut self,
            version: &str,
            encoding: Option<&str>,
            standalone: Option<bool>,
        ) -> HandlerResult {
            self.calls.push(format!("xmldecl {} {:?} {:?}", version, encoding, standalone));
            Ok(())
        }

        fn reference(&mut self, name: &str) -> HandlerResult {
            self.calls.push(format!("ref {}", name));
            Ok(())
        }

        fn entity_decl(&mut self, decl: &EntityDecl) -> HandlerResult {
            self.calls.push(format!("entity {}", decl.name));
            Ok(())
        }
    }

    fn run(chunks: &[&str]) -> Result<Vec<String>, Error> {
        let mut parser = PushParser::new();
        let mut recorder = Recorder::default();
        for chunk in chunks {
            parser.feed(chunk.as_bytes(), &mut recorder)?;
        }
        parser.finish(&mut recorder)?;
        Ok(recorder.calls)
    }

    /// Merge adjacent `chars` records so tests can compare across chunkings
    fn merged(calls: Vec<String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut text = String::new();
        for call in calls {
            if let Some(quoted) = call.strip_prefix("chars ") {
                let piece: String = quoted[1..quoted.len() - 1].to_string();
                text.push_str(&piece);
                continue;
            }
            if !text.is_empty() {
                out.push(format!("text {}", std::mem::take(&mut text)));
            }
            out.push(call);
        }
        if !text.is_empty() {
            out.push(format!("text {}", text));
        }
        out
    }

    #[test]
    fn test_simple_element() {
        let calls = run(&["<root/>"]).unwrap();
        assert_eq!(calls, vec!["start root [] true"]);
    }

    #[test]
    fn test_nested_elements_with_text() {
        let calls = run(&["<a><b x=\"1\">hi</b></a>"]).unwrap();
        assert_eq!(
            calls,
            vec!["start a [] false", "start b [x=1] false", "chars \"hi\"", "end b", "end a"]
        );
    }

    #[test]
    fn test_tag_split_across_chunks() {
        let calls = run(&["<ro", "ot a='", "1'><i", "tem/></r", "oot>"]).unwrap();
        assert_eq!(calls, vec!["start root [a=1] false", "start item [] true", "end root"]);
    }

    #[test]
    fn test_nothing_emitted_until_tag_complete() {
        let mut parser = PushParser::new();
        let mut recorder = Recorder::default();
        parser.feed(b"<roo", &mut recorder).unwrap();
        assert!(recorder.calls.is_empty());
        assert_eq!(parser.buffered(), 4);
        parser.feed(b"t>", &mut recorder).unwrap();
        assert_eq!(recorder.calls, vec!["start root [] false"]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_text_reported_in_pieces() {
        let calls = run(&["<a>one ", "two &amp; three</a>"]).unwrap();
        assert_eq!(
            calls,
            vec![
                "start a [] false",
                "chars \"one \"",
                "chars \"two \"",
                "chars \"&\"",
                "chars \" three\"",
                "end a"
            ]
        );
    }

    #[test]
    fn test_reference_split_across_chunks() {
        let calls = merged(run(&["<a>x&a", "m", "p;y&#x4", "1;</a>"]).unwrap());
        assert_eq!(calls, vec!["start a [] false", "text x&yA", "end a"]);
    }

    #[test]
    fn test_attribute_value_decoding() {
        let calls = run(&["<a v=\"x&lt;y&#10;z\ttab\"/>"]).unwrap();
        assert_eq!(calls, vec!["start a [v=x<y\nz tab] true"]);
    }

    #[test]
    fn test_cdata_comment_pi() {
        let doc = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                   <!-- c --><a><![CDATA[<x>]]><?go now?></a>";
        let calls = run(&[doc]).unwrap();
        assert_eq!(
            calls,
            vec![
                "xmldecl 1.0 Some(\"UTF-8\") None",
                "comment \" c \"",
                "start a [] false",
                "cdata \"<x>\"",
                "pi go \"now\"",
                "end a"
            ]
        );
    }

    #[test]
    fn test_prolog_whitespace_ignored() {
        let calls = run(&["\n  <a/>\n"]).unwrap();
        assert_eq!(calls, vec!["start a [] true"]);
    }

    #[test]
    fn test_internal_entity_expansion() {
        let calls = merged(
            run(&["<!DOCTYPE d [<!ENTITY who \"W&amp;rld\">]><d>Hello &who;!</d>"]).unwrap(),
        );
        assert_eq!(
            calls,
            vec!["entity who", "start d [] false", "text Hello ", "ref who", "text W&rld!", "end d"]
        );
    }

    #[test]
    fn test_entity_in_attribute() {
        let calls = run(&["<!DOCTYPE d [<!ENTITY e 'v'>]><d a='[&e;]'/>"]).unwrap();
        assert_eq!(calls, vec!["entity e", "start d [a=[v]] true"]);
    }

    #[test]
    fn test_chunk_invariance() {
        let doc = "<?xml version='1.0'?><doc a=\"1\" b='2'>\
                   <p>t&amp;x</p><!--c--><e/>\n<![CDATA[z]]>]]</doc>";
        let whole = merged(run(&[doc]).unwrap());
        for size in 1..8 {
            let chunks: Vec<&str> = (0..doc.len())
                .step_by(size)
                .map(|i| &doc[i..(i + size).min(doc.len())])
                .collect();
            assert_eq!(merged(run(&chunks).unwrap()), whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_errors() {
        let cases = [
            "<a><b></a",
            "<a></b></a></a>",
            "<a x=1/>",
            "<a x='1' x='2'/>",
            "<a>&undefined;</a>",
            "<a/><b/>",
            "text<a/>",
            "<a><!-- a -- b --></a>",
            "<a>]]></a>",
            "<a>&#0;</a>",
            " <?xml version='1.0'?><a/>",
            "<a><?XML x?></a>",
            "<a attr='<'/>",
            "<a>",
            "",
            "<!DOCTYPE d [<!ENTITY a '&b;'><!ENTITY b '&a;'>]><d>&a;</d>",
        ];
        for case in cases {
            assert!(run(&[case]).is_err(), "expected error for {:?}", case);
        }
    }

    #[test]
    fn test_error_has_position() {
        let err = run(&["<a>\n  <b x=1/></a>"]).unwrap_err();
        match err {
            Error::Malformed(e) => {
                let pos = e.position().unwrap();
                assert_eq!(pos.line, 2);
                assert_eq!(pos.column, 3);
            }
            other => panic!("Expected malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_parser_stays_failed() {
        let mut parser = PushParser::new();
        let mut recorder = Recorder::default();
        assert!(parser.feed(b"<a x=1>", &mut recorder).is_err());
        assert!(matches!(parser.feed(b"<b/>", &mut recorder), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_feed_after_finish_is_usage_error() {
        let mut parser = PushParser::new();
        let mut recorder = Recorder::default();
        parser.feed(b"<a/>", &mut recorder).unwrap();
        parser.finish(&mut recorder).unwrap();
        assert!(matches!(
            parser.feed(b" ", &mut recorder),
            Err(Error::Usage(UsageError::ParserFinished))
        ));
    }

    #[test]
    fn test_max_depth() {
        let mut parser = PushParser::with_max_depth(2);
        let mut recorder = Recorder::default();
        assert!(parser.feed(b"<a><b><c>", &mut recorder).is_err());
    }

    #[test]
    fn test_xml_declaration_parsing() {
        assert_eq!(
            parse_xml_declaration("version=\"1.0\" encoding='utf-8' standalone=\"yes\"").unwrap(),
            ("1.0", Some("utf-8"), Some(true))
        );
        assert!(parse_xml_declaration("encoding='utf-8'").is_err());
        assert!(parse_xml_declaration("version='1.0' standalone='maybe'").is_err());
    }

    #[test]
    fn test_find_doctype_end() {
        let input = "<!DOCTYPE d [<!-- ]> --><!ENTITY e '>'>]><d/>";
        let end = find_doctype_end(input, &mut Resume::default()).unwrap();
        assert_eq!(&input[end..], "><d/>");
        assert_eq!(find_doctype_end("<!DOCTYPE d [<!ENTITY e", &mut Resume::default()), None);
    }

    #[test]
    fn test_find_doctype_end_resumes() {
        let full = "<!DOCTYPE d [<?pi it's?><!-- \" --><!ENTITY e \"]>\">]><d/>";
        let expected = full.rfind("><d/>").unwrap();
        let mut resume = Resume::default();
        for cut in 10..=expected {
            if let Some(end) = find_doctype_end(&full[..cut], &mut resume) {
                panic!("found an end at {} with only {} bytes", end, cut);
            }
            assert!(resume.offset <= cut);
        }
        assert_eq!(find_doctype_end(full, &mut resume), Some(expected));
    }

    #[test]
    fn test_doctype_subset_pi_with_quote() {
        let doc = "<!DOCTYPE a [<?pi don't?>]><a/>";
        assert_eq!(run(&[doc]).unwrap(), vec!["start a [] true"]);

        let bytewise: Vec<&str> = (0..doc.len()).map(|i| &doc[i..i + 1]).collect();
        assert_eq!(run(&bytewise).unwrap(), vec!["start a [] true"]);
    }

    #[test]
    fn test_non_name_character_in_element_name() {
        assert!(run(&["<a\u{a0}/>"]).is_err());
        assert!(run(&["<\u{a0}a/>"]).is_err());
        assert!(run(&["<a>&x\u{a0};</a>"]).is_err());
        assert_eq!(run(&["<é\u{301}/>"]).unwrap(), vec!["start é\u{301} [] true"]);
    }

    #[test]
    fn test_long_constructs_resume_scanning() {
        let filler = "x".repeat(256 * 1024);
        let cases = [
            (format!("<a><![CDATA[{}]]></a>", filler), "cdata", true),
            (format!("<a><!--{}--></a>", filler), "comment", true),
            (format!("<a><?pi {}?></a>", filler), "pi", true),
            (format!("<a b='{}'/>", filler), "start", true),
            (format!("<!DOCTYPE a [<!ENTITY e '{}'>]><a/>", filler), "entity e", false),
        ];

        for (doc, kind, carries_filler) in &cases {
            let mut parser = PushParser::new();
            let mut recorder = Recorder::default();
            for chunk in doc.as_bytes().chunks(1024) {
                parser.feed(chunk, &mut recorder).unwrap();
                // Each feed only searches the bytes it has not seen yet
                if parser.buffered() > 0 {
                    assert!(parser.buffered() - parser.resume.offset <= 1024 + 2, "{}", kind);
                }
            }
            parser.finish(&mut recorder).unwrap();

            let call = recorder
                .calls
                .iter()
                .find(|c| c.starts_with(kind))
                .unwrap_or_else(|| panic!("no {} call", kind));
            if *carries_filler {
                assert!(call.len() > filler.len(), "{}", kind);
            }
        }
    }
}
