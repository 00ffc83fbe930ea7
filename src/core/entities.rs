//! XML Entity and Character Reference Handling
//!
//! Handles:
//! - Built-in entities: &lt; &gt; &amp; &quot; &apos;
//! - Numeric character references: &#123; &#x7B;
//! - XML 1.0 `Char` validation
//! - Escaping for simple stringification
//!
//! Uses Cow for zero-copy when nothing needs escaping.

use std::borrow::Cow;

use super::library::Library;

/// Result of reading a reference that starts at a `&`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    /// `&#...;` resolved to a character; `len` covers the whole reference
    Char { value: char, len: usize },
    /// `&name;`; `len` covers the whole reference
    Named { name: &'a str, len: usize },
    /// Input ends before the closing `;`
    Incomplete,
    /// Not a well-formed reference
    Invalid(&'static str),
}

/// Read the reference at the start of `input`, which must begin with `&`.
pub fn parse_reference<'a>(input: &'a str, lib: &Library) -> Reference<'a> {
    debug_assert!(input.starts_with('&'));
    let bytes = input.as_bytes();

    if bytes.get(1) == Some(&b'#') {
        let (hex, digits_start) = match bytes.get(2) {
            Some(b'x') => (true, 3),
            Some(_) => (false, 2),
            None => return Reference::Incomplete,
        };
        let mut pos = digits_start;
        while let Some(&b) = bytes.get(pos) {
            let ok = if hex { b.is_ascii_hexdigit() } else { b.is_ascii_digit() };
            if !ok {
                break;
            }
            pos += 1;
        }
        return match bytes.get(pos) {
            None => Reference::Incomplete,
            Some(b';') if pos > digits_start => {
                let radix = if hex { 16 } else { 10 };
                match u32::from_str_radix(&input[digits_start..pos], radix)
                    .ok()
                    .filter(|&cp| is_valid_xml_char(cp))
                    .and_then(char::from_u32)
                {
                    Some(value) => Reference::Char {
                        value,
                        len: pos + 1,
                    },
                    None => Reference::Invalid("character reference to invalid character"),
                }
            }
            Some(_) => Reference::Invalid("malformed character reference"),
        };
    }

    if bytes.len() == 1 {
        return Reference::Incomplete;
    }
    let name_len = lib.name_len(&input[1..]);
    if name_len == 0 {
        return Reference::Invalid("'&' must start an entity or character reference");
    }

    let pos = 1 + name_len;
    match bytes.get(pos) {
        None => Reference::Incomplete,
        Some(b';') => Reference::Named {
            name: &input[1..pos],
            len: pos + 1,
        },
        Some(_) => Reference::Invalid("entity reference missing ';'"),
    }
}

/// Check if a code point is a valid XML 1.0 Char
/// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
#[inline]
pub fn is_valid_xml_char(codepoint: u32) -> bool {
    matches!(codepoint,
        0x9 | 0xA | 0xD |
        0x20..=0xD7FF |
        0xE000..=0xFFFD |
        0x10000..=0x10FFFF
    )
}

/// Find the first character not allowed in XML 1.0 content.
///
/// Returns its byte index and the character.
pub fn find_invalid_char(content: &str) -> Option<(usize, char)> {
    // ASCII fast path: only control characters can fail
    if content.is_ascii() {
        return content
            .bytes()
            .position(|b| b < 0x20 && !matches!(b, 0x9 | 0xA | 0xD))
            .map(|i| (i, content.as_bytes()[i] as char));
    }
    content
        .char_indices()
        .find(|&(_, c)| !is_valid_xml_char(c as u32))
}

/// Encode text for XML output (escape special characters)
pub fn escape_text(input: &str) -> Cow<'_, str> {
    escape(input, false)
}

/// Encode text for use in double-quoted XML attributes
pub fn escape_attribute(input: &str) -> Cow<'_, str> {
    escape(input, true)
}

fn escape(input: &str, attribute: bool) -> Cow<'_, str> {
    let needs = |b: u8| match b {
        b'<' | b'>' | b'&' => true,
        b'"' => attribute,
        _ => false,
    };
    // Fast path: check if any escaping needed
    if !input.bytes().any(needs) {
        return Cow::Borrowed(input);
    }

    // Slow path: escape
    let mut result = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' if attribute => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}
