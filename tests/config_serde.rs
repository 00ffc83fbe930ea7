//! Cursor configuration loaded from TOML.
//!
//! Run with: `cargo test --features serde`

#![cfg(feature = "serde")]

use xmlcursor::{CursorConfig, SliceSource, XmlCursor};

#[test]
fn test_partial_config_uses_defaults() {
    let config: CursorConfig = toml::from_str(
        r#"
        chunk_size = 4
        skip_whitespace_text = true
        "#,
    )
    .unwrap();

    assert_eq!(config.chunk_size, 4);
    assert!(config.skip_whitespace_text);
    assert!(config.namespaces);
    assert_eq!(config.max_depth, 1024);
}

#[test]
fn test_loaded_config_drives_cursor() {
    let config: CursorConfig =
        toml::from_str("skip_whitespace_text = true\nmax_depth = 2").unwrap();

    let source = SliceSource::new(b"<a>\n <b/>\n</a>");
    let events: Vec<_> = XmlCursor::with_config(source, config.clone())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(events.len(), 3);

    let mut deep = XmlCursor::with_config(SliceSource::new(b"<a><b><c></c></b></a>"), config);
    let err = (&mut deep).find_map(Result::err).unwrap();
    assert!(err.is_malformed());
}

#[test]
fn test_config_roundtrip() {
    let config = CursorConfig::default().namespaces(false).chunk_size(512);
    let text = toml::to_string(&config).unwrap();
    let back: CursorConfig = toml::from_str(&text).unwrap();
    assert_eq!(back, config);
}
