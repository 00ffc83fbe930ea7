//! Cursor Event Types
//!
//! Owned events handed out by the streaming cursor, one structural unit of
//! the document each. Nothing here borrows parser buffers.

use std::fmt;

use crate::core::entities::{escape_attribute, escape_text};

/// XML parsing event
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    /// Start of an element: `<name attrs...>` or `<name attrs.../>`
    ElementStart(StartElement),
    /// End of an element: `</name>`. Never emitted for self-closing elements.
    ElementEnd(EndElement),
    /// Coalesced character data between markup
    Text(String),
    /// CDATA section content
    CData(String),
    /// Comment content
    Comment(String),
    /// Processing instruction: `<?target data?>`
    ProcessingInstruction { target: String, data: String },
    /// No more events
    EndOfStream,
}

/// Kind of an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeType {
    Element,
    EndElement,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    EndOfStream,
}

/// Start element event data
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StartElement {
    /// Full element name (may include prefix)
    pub name: String,
    /// Local name (after colon)
    pub local_name: String,
    /// Namespace prefix (before colon), if any
    pub prefix: Option<String>,
    /// Namespace URI (resolved), if any
    pub namespace_uri: Option<String>,
    /// Element attributes in document order, namespace declarations included
    pub attributes: Vec<Attribute>,
    /// Self-closing element (`<name/>`); no [`EndElement`] follows
    pub is_empty: bool,
}

impl StartElement {
    /// Get an attribute by qualified name
    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Get an attribute value by qualified name
    pub fn get_attribute_value(&self, name: &str) -> Option<&str> {
        self.get_attribute(name).map(|a| a.value.as_str())
    }

    /// Get an attribute value by local name and namespace URI
    pub fn get_attribute_ns(&self, local_name: &str, namespace_uri: Option<&str>) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == local_name && a.namespace_uri.as_deref() == namespace_uri)
            .map(|a| a.value.as_str())
    }
}

/// End element event data
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndElement {
    /// Full element name
    pub name: String,
    pub local_name: String,
    pub prefix: Option<String>,
    pub namespace_uri: Option<String>,
}

/// Attribute of a start element, value fully decoded
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attribute {
    /// Qualified name as written
    pub name: String,
    pub value: String,
    pub prefix: Option<String>,
    pub local_name: String,
    /// Unprefixed attributes are in no namespace
    pub namespace_uri: Option<String>,
}

impl Attribute {
    /// Attribute with no namespace information (names reported as written)
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        Attribute {
            local_name: name.clone(),
            name,
            value: value.into(),
            prefix: None,
            namespace_uri: None,
        }
    }

    /// True for `xmlns` and `xmlns:*` declarations
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.prefix.as_deref() == Some("xmlns")
    }
}

impl Event {
    /// Kind of this event
    pub fn node_type(&self) -> NodeType {
        match self {
            Event::ElementStart(_) => NodeType::Element,
            Event::ElementEnd(_) => NodeType::EndElement,
            Event::Text(_) => NodeType::Text,
            Event::CData(_) => NodeType::CData,
            Event::Comment(_) => NodeType::Comment,
            Event::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
            Event::EndOfStream => NodeType::EndOfStream,
        }
    }

    /// Node name: qualified name for elements, the PI target, or `#text`,
    /// `#cdata-section`, `#comment` for character nodes. Empty at end of stream.
    pub fn name(&self) -> &str {
        match self {
            Event::ElementStart(e) => e.name.as_str(),
            Event::ElementEnd(e) => e.name.as_str(),
            Event::Text(_) => "#text",
            Event::CData(_) => "#cdata-section",
            Event::Comment(_) => "#comment",
            Event::ProcessingInstruction { target, .. } => target.as_str(),
            Event::EndOfStream => "",
        }
    }

    /// Local part of the name; same as [`name`](Self::name) for non-elements
    pub fn local_name(&self) -> &str {
        match self {
            Event::ElementStart(e) => e.local_name.as_str(),
            Event::ElementEnd(e) => e.local_name.as_str(),
            other => other.name(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            Event::ElementStart(e) => e.prefix.as_deref(),
            Event::ElementEnd(e) => e.prefix.as_deref(),
            _ => None,
        }
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        match self {
            Event::ElementStart(e) => e.namespace_uri.as_deref(),
            Event::ElementEnd(e) => e.namespace_uri.as_deref(),
            _ => None,
        }
    }

    /// Character content, or the PI data. `None` for elements.
    pub fn value(&self) -> Option<&str> {
        match self {
            Event::Text(s) | Event::CData(s) | Event::Comment(s) => Some(s.as_str()),
            Event::ProcessingInstruction { data, .. } => Some(data.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_empty_element(&self) -> bool {
        matches!(self, Event::ElementStart(e) if e.is_empty)
    }

    /// Attributes of a start element; empty for everything else
    pub fn attributes(&self) -> &[Attribute] {
        match self {
            Event::ElementStart(e) => e.attributes.as_slice(),
            _ => &[],
        }
    }

    #[inline]
    pub fn attribute_count(&self) -> usize {
        self.attributes().len()
    }

    /// Attribute value by qualified name
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        match self {
            Event::ElementStart(e) => e.get_attribute_value(name),
            _ => None,
        }
    }

    #[inline]
    pub fn is_start_element(&self) -> bool {
        matches!(self, Event::ElementStart(_))
    }

    #[inline]
    pub fn is_end_element(&self) -> bool {
        matches!(self, Event::ElementEnd(_))
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Event::Text(_))
    }

    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Event::EndOfStream)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ElementStart(e) => {
                write!(f, "<{}", e.name)?;
                for attr in &e.attributes {
                    write!(f, " {}=\"{}\"", attr.name, escape_attribute(&attr.value))?;
                }
                f.write_str(if e.is_empty { "/>" } else { ">" })
            }
            Event::ElementEnd(e) => write!(f, "</{}>", e.name),
            Event::Text(s) => f.write_str(&escape_text(s)),
            Event::CData(s) => write!(f, "<![CDATA[{}]]>", s),
            Event::Comment(s) => write!(f, "<!--{}-->", s),
            Event::ProcessingInstruction { target, data } if data.is_empty() => {
                write!(f, "<?{}?>", target)
            }
            Event::ProcessingInstruction { target, data } => write!(f, "<?{} {}?>", target, data),
            Event::EndOfStream => Ok(()),
        }
    }
}
