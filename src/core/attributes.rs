//! XML Attribute Handling
//!
//! Qualified-name splitting and attribute value normalization shared by the
//! push parser and the event capture bridge.

use memchr::memchr;

/// An attribute as reported by the push parser: qualified name as written,
/// value with references expanded and whitespace normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub value: String,
}

impl RawAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        RawAttribute {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Namespace prefix (before colon), if any
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Local name (after colon, if namespaced)
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// True for `xmlns` and `xmlns:*` declarations
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.name.starts_with("xmlns:")
    }
}

/// Split a name into prefix and local name at the colon
pub fn split_qname(name: &str) -> (Option<&str>, &str) {
    if let Some(colon_pos) = memchr(b':', name.as_bytes()) {
        (Some(&name[..colon_pos]), &name[colon_pos + 1..])
    } else {
        (None, name)
    }
}

/// Append a literal run of an attribute value, replacing each whitespace
/// character with a space (XML 1.0 §3.3.3). Expanded references are appended
/// by the caller as-is, so `&#10;` survives as a newline.
pub fn push_normalized_value(out: &mut String, literal: &str) {
    if !literal.bytes().any(|b| matches!(b, b'\t' | b'\n' | b'\r')) {
        out.push_str(literal);
        return;
    }
    out.extend(literal.chars().map(|c| match c {
        '\t' | '\n' | '\r' => ' ',
        other => other,
    }));
}

/// Return the first attribute name that appears more than once
pub fn find_duplicate(attrs: &[RawAttribute]) -> Option<&str> {
    // Elements rarely carry many attributes; a quadratic scan avoids hashing
    attrs.iter().enumerate().find_map(|(i, a)| {
        attrs[..i]
            .iter()
            .any(|prev| prev.name == a.name)
            .then_some(a.name.as_str())
    })
}
