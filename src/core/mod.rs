//! Core XML parsing primitives
//!
//! This module contains the fundamental building blocks for XML parsing:
//! - Library: process-wide character tables, initialized once
//! - Scanner: SIMD-accelerated delimiter detection using memchr
//! - Encoding: BOM sniffing and incremental conversion to UTF-8
//! - Entities: character/entity reference reading and XML Char validation
//! - Attributes: qualified names and attribute value normalization
//! - DTD: DOCTYPE and internal subset declarations
//! - Push: chunk-fed parser driving SaxHandler callbacks

pub mod attributes;
pub mod dtd;
pub mod encoding;
pub mod entities;
pub mod library;
pub mod push;
pub mod scanner;

pub use push::{HandlerResult, PushParser, SaxHandler};
