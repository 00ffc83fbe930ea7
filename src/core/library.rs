//! One-time parser initialization
//!
//! The byte class tables and the predefined entity table are built once per
//! process, the first time a parser is constructed. Every parser holds the
//! returned `&'static Library` handle instead of reaching for globals.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::debug;

const CLASS_NAME_START: u8 = 0x01;
const CLASS_NAME: u8 = 0x02;
const CLASS_WHITESPACE: u8 = 0x04;

static LIBRARY: OnceLock<Library> = OnceLock::new();

/// Shared, immutable parser tables
#[derive(Debug)]
pub struct Library {
    classes: [u8; 256],
    predefined: HashMap<&'static str, &'static str>,
}

impl Library {
    /// Get the process-wide handle, initializing it on first use.
    ///
    /// Repeated calls are cheap and safe from any thread.
    pub fn get() -> &'static Library {
        LIBRARY.get_or_init(|| {
            debug!("initializing xml parser tables");
            Library::build()
        })
    }

    fn build() -> Self {
        let mut classes = [0u8; 256];
        for b in 0..=255u8 {
            let mut class = 0;
            // Non-ASCII bytes may begin a multi-byte name character; the
            // decoded character is checked by `name_len`
            if matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'_' | b':') || b >= 0x80 {
                class |= CLASS_NAME_START | CLASS_NAME;
            }
            if matches!(b, b'0'..=b'9' | b'-' | b'.') {
                class |= CLASS_NAME;
            }
            if matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                class |= CLASS_WHITESPACE;
            }
            classes[b as usize] = class;
        }

        let predefined = HashMap::from([
            ("lt", "<"),
            ("gt", ">"),
            ("amp", "&"),
            ("quot", "\""),
            ("apos", "'"),
        ]);

        Library {
            classes,
            predefined,
        }
    }

    #[inline]
    pub fn is_name_start_byte(&self, b: u8) -> bool {
        self.classes[b as usize] & CLASS_NAME_START != 0
    }

    #[inline]
    pub fn is_name_byte(&self, b: u8) -> bool {
        self.classes[b as usize] & CLASS_NAME != 0
    }

    #[inline]
    pub fn is_whitespace_byte(&self, b: u8) -> bool {
        self.classes[b as usize] & CLASS_WHITESPACE != 0
    }

    /// Check a complete XML name.
    pub fn is_name(&self, name: &str) -> bool {
        !name.is_empty() && self.name_len(name) == name.len()
    }

    /// Length in bytes of the XML `Name` at the start of `input` (0 if none)
    pub fn name_len(&self, input: &str) -> usize {
        self.scan_name(input, true)
    }

    /// Length in bytes of the `Nmtoken` at the start of `input` (0 if none)
    pub fn nmtoken_len(&self, input: &str) -> usize {
        self.scan_name(input, false)
    }

    fn scan_name(&self, input: &str, name_start: bool) -> usize {
        let bytes = input.as_bytes();
        let mut len = 0;
        while let Some(&b) = bytes.get(len) {
            let first = name_start && len == 0;
            if b < 0x80 {
                let class = if first { CLASS_NAME_START } else { CLASS_NAME };
                if self.classes[b as usize] & class == 0 {
                    break;
                }
                len += 1;
                continue;
            }
            let Some(c) = input[len..].chars().next() else {
                break;
            };
            let allowed = if first { is_name_start_char(c) } else { is_name_char(c) };
            if !allowed {
                break;
            }
            len += c.len_utf8();
        }
        len
    }

    /// Check whether text consists only of XML whitespace.
    pub fn is_whitespace(&self, text: &str) -> bool {
        text.bytes().all(|b| self.is_whitespace_byte(b))
    }

    /// Look up one of the five predefined entities.
    pub fn predefined_entity(&self, name: &str) -> Option<&'static str> {
        self.predefined.get(name).copied()
    }
}

/// NameStartChar (XML 1.0 fifth edition, production 4)
pub fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

/// NameChar (XML 1.0 fifth edition, production 4a)
pub fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9'
            | '\u{B7}'
            | '\u{300}'..='\u{36F}'
            | '\u{203F}'..='\u{2040}')
}
