//! XML Encoding Detection and Incremental Conversion
//!
//! Handles detection of UTF-16 and UTF-8 based on BOM and byte patterns, and
//! converts input to UTF-8 one chunk at a time. Chunks may end in the middle
//! of a character; the incomplete tail is kept until the next chunk arrives.
//!
//! Line endings are normalized here as well (`\r\n` and lone `\r` become
//! `\n`), so the parser never sees a carriage return.

use memchr::memchr;

use crate::error::MalformedError;

/// Detect the encoding of XML input based on BOM or byte patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl XmlEncoding {
    /// Detect encoding from byte order mark or initial bytes.
    ///
    /// Returns the encoding and the length of the BOM to skip.
    pub fn detect(input: &[u8]) -> (Self, usize) {
        match input {
            [0xEF, 0xBB, 0xBF, ..] => (XmlEncoding::Utf8, 3),
            [0xFF, 0xFE, ..] => (XmlEncoding::Utf16Le, 2),
            [0xFE, 0xFF, ..] => (XmlEncoding::Utf16Be, 2),
            // No BOM - check for UTF-16 pattern (< followed by null or null followed by <)
            [0x00, b'<', ..] => (XmlEncoding::Utf16Be, 0),
            [b'<', 0x00, ..] => (XmlEncoding::Utf16Le, 0),
            _ => (XmlEncoding::Utf8, 0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            XmlEncoding::Utf8 => "UTF-8",
            XmlEncoding::Utf16Le => "UTF-16LE",
            XmlEncoding::Utf16Be => "UTF-16BE",
        }
    }
}

/// Stateful chunk decoder producing normalized UTF-8
#[derive(Debug, Default)]
pub struct InputDecoder {
    encoding: Option<XmlEncoding>,
    /// Bytes not yet decodable (BOM sniffing or a split character)
    carry: Vec<u8>,
    /// Last emitted character was a `\r` turned into `\n`
    after_cr: bool,
}

impl InputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoding in use, once enough bytes have been seen to tell
    pub fn encoding(&self) -> Option<XmlEncoding> {
        self.encoding
    }

    /// Decode a chunk, appending normalized text to `out`.
    ///
    /// With `is_final` set, any carried bytes must form complete characters.
    pub fn decode(
        &mut self,
        chunk: &[u8],
        out: &mut String,
        is_final: bool,
    ) -> Result<(), MalformedError> {
        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(chunk);

        let encoding = match self.encoding {
            Some(encoding) => encoding,
            None => {
                if !is_final && needs_more_for_detection(&data) {
                    self.carry = data;
                    return Ok(());
                }
                let (encoding, bom) = XmlEncoding::detect(&data);
                data.drain(..bom);
                self.encoding = Some(encoding);
                encoding
            }
        };

        match encoding {
            XmlEncoding::Utf8 => self.decode_utf8(data, out, is_final),
            XmlEncoding::Utf16Le => self.decode_utf16(data, out, is_final, u16::from_le_bytes),
            XmlEncoding::Utf16Be => self.decode_utf16(data, out, is_final, u16::from_be_bytes),
        }
    }

    fn decode_utf8(
        &mut self,
        mut data: Vec<u8>,
        out: &mut String,
        is_final: bool,
    ) -> Result<(), MalformedError> {
        match std::str::from_utf8(&data) {
            Ok(text) => {
                self.push_normalized(text, out);
                Ok(())
            }
            // Incomplete sequence at the very end: keep it for the next chunk
            Err(e) if e.error_len().is_none() && !is_final => {
                let valid = e.valid_up_to();
                let tail = data.split_off(valid);
                if let Ok(text) = std::str::from_utf8(&data) {
                    self.push_normalized(text, out);
                }
                self.carry = tail;
                Ok(())
            }
            Err(_) => Err(MalformedError::new("input is not valid UTF-8")),
        }
    }

    fn decode_utf16(
        &mut self,
        mut data: Vec<u8>,
        out: &mut String,
        is_final: bool,
        unit: fn([u8; 2]) -> u16,
    ) -> Result<(), MalformedError> {
        if data.len() % 2 != 0 {
            if is_final {
                return Err(MalformedError::new("Invalid UTF-16: odd number of bytes"));
            }
            let odd = data.split_off(data.len() - 1);
            self.carry = odd;
        }

        let mut units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| unit([pair[0], pair[1]]))
            .collect();

        // A high surrogate at the end waits for its partner
        if !is_final {
            if let Some(&last) = units.last() {
                if (0xD800..0xDC00).contains(&last) {
                    units.pop();
                    let held = data.split_off(data.len() - 2);
                    let mut carry = held;
                    carry.append(&mut self.carry);
                    self.carry = carry;
                }
            }
        }

        let text = String::from_utf16(&units)
            .map_err(|e| MalformedError::new(format!("Invalid UTF-16: {}", e)))?;
        self.push_normalized(&text, out);
        Ok(())
    }

    fn push_normalized(&mut self, text: &str, out: &mut String) {
        if text.is_empty() {
            return;
        }
        if !self.after_cr && memchr(b'\r', text.as_bytes()).is_none() {
            out.push_str(text);
            return;
        }

        for c in text.chars() {
            match c {
                '\n' if self.after_cr => {
                    self.after_cr = false;
                }
                '\r' => {
                    out.push('\n');
                    self.after_cr = true;
                }
                _ => {
                    out.push(c);
                    self.after_cr = false;
                }
            }
        }
    }
}

/// Too few bytes to tell a BOM or UTF-16 pattern apart from UTF-8 text
fn needs_more_for_detection(data: &[u8]) -> bool {
    match data {
        [] | [_] => true,
        [0xEF, 0xBB] => true,
        _ => false,
    }
}
