//! Cursor configuration.

use crate::core::push::DEFAULT_MAX_DEPTH;

/// Default read size, the same as the buffered reader's 8KB chunks
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Settings for [`XmlCursor`](crate::XmlCursor).
///
/// With the `serde` feature the struct deserializes from any serde format;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CursorConfig {
    /// Maximum bytes requested from the source per pull
    pub chunk_size: usize,
    /// Drop text events made only of whitespace
    pub skip_whitespace_text: bool,
    /// Resolve namespace prefixes; when off, names are reported as written
    pub namespaces: bool,
    /// Maximum element nesting depth
    pub max_depth: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_whitespace_text: false,
            namespaces: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CursorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pull size. Zero is bumped to one.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn skip_whitespace_text(mut self, skip: bool) -> Self {
        self.skip_whitespace_text = skip;
        self
    }

    pub fn namespaces(mut self, enabled: bool) -> Self {
        self.namespaces = enabled;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CursorConfig::default();
        assert_eq!(config.chunk_size, 8192);
        assert!(!config.skip_whitespace_text);
        assert!(config.namespaces);
        assert_eq!(config.max_depth, 1024);
    }

    #[test]
    fn test_builder() {
        let config = CursorConfig::new()
            .chunk_size(0)
            .skip_whitespace_text(true)
            .namespaces(false)
            .max_depth(8);
        assert_eq!(config.chunk_size, 1);
        assert!(config.skip_whitespace_text);
        assert!(!config.namespaces);
        assert_eq!(config.max_depth, 8);
    }
}
