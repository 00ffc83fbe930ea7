//! SIMD-accelerated XML scanning using memchr
//!
//! Uses memchr crate for fast byte searching with SIMD acceleration:
//! - SSE2 (default x86_64)
//! - AVX2 (runtime detection)
//! - NEON (aarch64)
//!
//! The scanner walks decoded UTF-8 text. Every delimiter it searches for is
//! ASCII, so positions it reports always fall on character boundaries and
//! slicing the input at them cannot split a character.

use memchr::{memchr, memchr2, memmem};

use super::library::Library;

/// Scanner for XML delimiter detection
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    lib: &'static Library,
}

impl<'a> Scanner<'a> {
    /// Create a new scanner for the given input
    #[inline]
    pub fn new(input: &'a str, lib: &'static Library) -> Self {
        Scanner { input, pos: 0, lib }
    }

    /// Get the current position
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Set the current position
    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Check if we've reached the end
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Get remaining text
    #[inline]
    pub fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Get a slice from start to end positions
    #[inline]
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.input[start..end]
    }

    /// Peek at current byte without advancing
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    /// Peek at byte at offset from current position
    #[inline]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + offset).copied()
    }

    /// Advance by n bytes
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Skip whitespace characters, returning how many bytes were skipped
    #[inline]
    pub fn skip_whitespace(&mut self) -> usize {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && self.lib.is_whitespace_byte(bytes[self.pos]) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Find next occurrence of a specific byte
    #[inline]
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        memchr(byte, &self.input.as_bytes()[self.pos..]).map(|i| self.pos + i)
    }

    /// Find next '<' or '&' (text content boundaries)
    #[inline]
    pub fn find_text_boundary(&self) -> Option<usize> {
        memchr2(b'<', b'&', &self.input.as_bytes()[self.pos..]).map(|i| self.pos + i)
    }

    /// Find the next occurrence of a multi-byte terminator such as `-->`
    #[inline]
    pub fn find_str(&self, needle: &str) -> Option<usize> {
        memmem::find(&self.input.as_bytes()[self.pos..], needle.as_bytes()).map(|i| self.pos + i)
    }

    /// Check if input starts with a sequence at current position
    #[inline]
    pub fn starts_with(&self, needle: &str) -> bool {
        self.input[self.pos..].starts_with(needle)
    }

    /// Check whether the remaining input is a strict prefix of `needle`,
    /// i.e. more data could still complete it
    #[inline]
    pub fn could_start_with(&self, needle: &str) -> bool {
        let rest = self.remaining();
        rest.len() < needle.len() && needle.starts_with(rest)
    }

    /// Read an XML name. Returns `None` when the current byte cannot start a
    /// name. The name may be cut short by the end of input; callers that care
    /// check `is_eof` afterwards.
    pub fn read_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        let len = self.lib.name_len(self.remaining());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&self.input[start..self.pos])
    }
}
