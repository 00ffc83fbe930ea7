//! End-to-end cursor behavior over chunked sources.

use std::borrow::Cow;
use std::cell::Cell;
use std::io;
use std::rc::Rc;

use xmlcursor::{
    ByteSource, CursorConfig, DeclarationObserver, Error, Event, NodeType, SliceSource,
    SourceError, UsageError, XmlCursor,
};

/// Source that returns at most `max_return` bytes per pull and counts closes
struct ChunkySource {
    data: Vec<u8>,
    pos: usize,
    max_return: usize,
    closes: Rc<Cell<usize>>,
    fail_after: Option<usize>,
}

impl ChunkySource {
    fn new(data: &str, max_return: usize) -> (Self, Rc<Cell<usize>>) {
        let closes = Rc::new(Cell::new(0));
        let source = ChunkySource {
            data: data.as_bytes().to_vec(),
            pos: 0,
            max_return,
            closes: closes.clone(),
            fail_after: None,
        };
        (source, closes)
    }

    fn failing_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }
}

impl ByteSource for ChunkySource {
    fn pull(&mut self, max_bytes: usize) -> Result<Option<Cow<'_, [u8]>>, SourceError> {
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "connection dropped");
                return Err(err.into());
            }
        }
        let n = (self.data.len() - self.pos).min(max_bytes).min(self.max_return);
        if n == 0 {
            return Ok(None);
        }
        let chunk = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(Some(Cow::Borrowed(chunk)))
    }

    fn close(&mut self) {
        self.closes.set(self.closes.get() + 1);
    }
}

const DOC: &str = r#"<A><B a="value">CONTENT</B><C/><D><E/></D></A>"#;

#[test]
fn test_four_byte_chunks_end_to_end() {
    let (source, closes) = ChunkySource::new(DOC, 4);
    let mut cursor = XmlCursor::new(source);

    let a = cursor.next_event().unwrap();
    assert_eq!(a.node_type(), NodeType::Element);
    assert_eq!(a.local_name(), "A");
    assert!(!a.is_empty_element());

    let b = cursor.next_event().unwrap();
    assert_eq!(b.local_name(), "B");
    assert!(!b.is_empty_element());
    assert_eq!(b.attribute_count(), 1);
    assert_eq!(b.get_attribute("a"), Some("value"));

    let text = cursor.next_event().unwrap();
    assert_eq!(text.node_type(), NodeType::Text);
    assert_eq!(text.local_name(), "#text");
    assert_eq!(text.value(), Some("CONTENT"));

    let end_b = cursor.next_event().unwrap();
    assert_eq!(end_b.node_type(), NodeType::EndElement);
    assert_eq!(end_b.local_name(), "B");

    let c = cursor.next_event().unwrap();
    assert_eq!(c.local_name(), "C");
    assert!(c.is_empty_element());
    assert_eq!(c.attribute_count(), 0);

    let d = cursor.next_event().unwrap();
    assert_eq!(d.local_name(), "D");
    assert!(!d.is_empty_element());

    let e = cursor.next_event().unwrap();
    assert_eq!(e.local_name(), "E");
    assert!(e.is_empty_element());

    let end_d = cursor.next_event().unwrap();
    assert!(end_d.is_end_element());
    assert_eq!(end_d.local_name(), "D");

    let end_a = cursor.next_event().unwrap();
    assert!(end_a.is_end_element());
    assert_eq!(end_a.local_name(), "A");

    assert!(cursor.next_event().unwrap().is_end_of_stream());
    assert_eq!(closes.get(), 1);

    // Idempotent tail
    assert!(cursor.next_event().unwrap().is_end_of_stream());
    drop(cursor);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_same_events_for_any_chunk_size() {
    let whole: Vec<Event> = XmlCursor::from_slice(DOC.as_bytes())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(whole.len(), 9);

    for size in 1..=DOC.len() {
        let (source, _) = ChunkySource::new(DOC, size);
        let events: Vec<Event> = XmlCursor::new(source).collect::<Result<_, _>>().unwrap();
        assert_eq!(events, whole, "chunk size {}", size);
    }
}

#[test]
fn test_mismatched_close_tag() {
    let (source, closes) = ChunkySource::new("<A><B></A>", 4);
    let mut cursor = XmlCursor::new(source);
    assert_eq!(cursor.next_event().unwrap().local_name(), "A");
    assert_eq!(cursor.next_event().unwrap().local_name(), "B");

    let err = cursor.next_event().unwrap_err();
    match &err {
        Error::Malformed(e) => {
            assert!(e.message().contains("mismatched"));
            assert!(e.position().is_some());
        }
        other => panic!("Expected malformed error, got {:?}", other),
    }
    assert_eq!(closes.get(), 1);

    // Terminal: the same error on every call
    assert!(cursor.next_event().unwrap_err().is_malformed());
    drop(cursor);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_source_error_closes_once() {
    let (source, closes) = ChunkySource::new(DOC, 4);
    let mut cursor = XmlCursor::new(source.failing_after(8));

    let mut seen = 0;
    let err = loop {
        match cursor.next_event() {
            Ok(event) => {
                assert!(!event.is_end_of_stream());
                seen += 1;
            }
            Err(err) => break err,
        }
    };
    assert!(seen >= 1);
    assert!(err.is_source());
    assert!(err.to_string().contains("connection dropped"));
    assert_eq!(closes.get(), 1);
    drop(cursor);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_abandoned_cursor_closes_on_drop() {
    let (source, closes) = ChunkySource::new(DOC, 4);
    let mut cursor = XmlCursor::new(source);
    cursor.next_event().unwrap();
    assert_eq!(closes.get(), 0);
    drop(cursor);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_unstarted_cursor_closes_on_drop() {
    let (source, closes) = ChunkySource::new(DOC, 4);
    drop(XmlCursor::new(source));
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_explicit_close_then_pull() {
    let (source, closes) = ChunkySource::new(DOC, 4);
    let mut cursor = XmlCursor::new(source);
    cursor.next_event().unwrap();
    cursor.close();
    cursor.close();
    assert_eq!(closes.get(), 1);
    assert!(matches!(cursor.next_event(), Err(Error::Usage(UsageError::Closed))));
    drop(cursor);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_unterminated_root_flushes_text_then_fails() {
    let (source, closes) = ChunkySource::new("<a>text", 2);
    let mut cursor = XmlCursor::new(source);
    assert_eq!(cursor.next_event().unwrap().local_name(), "a");
    assert_eq!(cursor.next_event().unwrap().value(), Some("text"));
    let err = cursor.next_event().unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_mixed_content_and_prolog() {
    let doc = "<?xml version=\"1.0\"?>\n<!-- lead -->\n<r>a<![CDATA[<b>]]>c<?pi d?><!--e--></r>\n";
    let mut cursor = XmlCursor::with_config(
        SliceSource::new(doc.as_bytes()),
        CursorConfig::default().chunk_size(5),
    );

    let rendered: Vec<String> = (&mut cursor).map(|e| e.unwrap().to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "<!-- lead -->",
            "<r>",
            "a",
            "<![CDATA[<b>]]>",
            "c",
            "<?pi d?>",
            "<!--e-->",
            "</r>"
        ]
    );
    assert!(cursor.next_event().unwrap().is_end_of_stream());
}

#[test]
fn test_utf16_input() {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "<a x='é'>😀</a>".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let events: Vec<Event> = XmlCursor::new(SliceSource::with_max_chunk(&bytes, 3))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(events[0].get_attribute("x"), Some("é"));
    assert_eq!(events[1].value(), Some("😀"));
}

#[test]
fn test_from_reader() {
    let reader = io::Cursor::new(DOC.as_bytes().to_vec());
    let cursor = XmlCursor::with_config(
        xmlcursor::ReadSource::new(reader),
        CursorConfig::default().chunk_size(7),
    );
    assert_eq!(cursor.count(), 9);
    assert_eq!(XmlCursor::from_reader(DOC.as_bytes()).count(), 9);
}

#[derive(Default)]
struct Declarations {
    seen: Rc<std::cell::RefCell<Vec<String>>>,
}

impl DeclarationObserver for Declarations {
    fn xml_declaration(
        &mut self,
        version: &str,
        encoding: Option<&str>,
        _standalone: Option<bool>,
    ) {
        self.seen
            .borrow_mut()
            .push(format!("xml {} {}", version, encoding.unwrap_or("-")));
    }

    fn doctype(&mut self, doctype: &xmlcursor::core::dtd::Doctype) {
        self.seen.borrow_mut().push(format!("doctype {}", doctype.name));
    }

    fn notation_decl(&mut self, decl: &xmlcursor::core::dtd::NotationDecl) {
        self.seen.borrow_mut().push(format!("notation {}", decl.name));
    }

    fn unparsed_entity_decl(&mut self, decl: &xmlcursor::core::dtd::EntityDecl) {
        self.seen.borrow_mut().push(format!("unparsed {}", decl.name));
    }

    fn attribute_decl(&mut self, element: &str, def: &xmlcursor::core::dtd::AttDef) {
        self.seen.borrow_mut().push(format!("attlist {} {}", element, def.name));
    }

    fn element_decl(&mut self, decl: &xmlcursor::core::dtd::ElementDecl) {
        self.seen.borrow_mut().push(format!("element {}", decl.name));
    }

    fn reference(&mut self, name: &str) {
        self.seen.borrow_mut().push(format!("ref {}", name));
    }
}

#[test]
fn test_observer_sees_declarations_not_events() {
    let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE doc [
  <!ELEMENT doc (#PCDATA)>
  <!ATTLIST doc kind CDATA #IMPLIED>
  <!NOTATION gif SYSTEM "image/gif">
  <!ENTITY logo SYSTEM "logo.gif" NDATA gif>
  <!ENTITY co "Acme">
]>
<doc kind="x">&co; Inc</doc>"#;

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let observer = Declarations { seen: seen.clone() };
    let events: Vec<Event> = XmlCursor::with_config(
        SliceSource::new(doc.as_bytes()),
        CursorConfig::default().chunk_size(16),
    )
    .with_observer(observer)
    .collect::<Result<_, _>>()
    .unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[1].value(), Some("Acme Inc"));
    assert_eq!(
        *seen.borrow(),
        vec![
            "xml 1.0 UTF-8",
            "doctype doc",
            "element doc",
            "attlist doc kind",
            "notation gif",
            "unparsed logo",
            "ref co"
        ]
    );
}

#[test]
fn test_large_cdata_in_small_chunks() {
    let body = "x".repeat(4 * 1024 * 1024);
    let doc = format!("<a><![CDATA[{}]]></a>", body);
    let mut cursor = XmlCursor::with_config(
        SliceSource::new(doc.as_bytes()),
        CursorConfig::default().chunk_size(1024),
    );

    assert_eq!(cursor.next_event().unwrap().local_name(), "a");
    match cursor.next_event().unwrap() {
        Event::CData(text) => assert_eq!(text.len(), body.len()),
        other => panic!("Expected CDATA, got {:?}", other),
    }
    assert!(cursor.next_event().unwrap().is_end_element());
    assert!(cursor.next_event().unwrap().is_end_of_stream());
    assert_eq!(cursor.bytes_read(), doc.len() as u64);
}
