//! DOCTYPE Declarations
//!
//! Parses the document type declaration and its internal subset into typed
//! declarations. The declarations are reported to the declaration observer
//! and internal general entities are kept for expansion; nothing here
//! validates the document against the declarations.

use std::collections::HashMap;

use super::entities::{parse_reference, Reference};
use super::library::Library;
use crate::error::MalformedError;

/// Parsed `<!DOCTYPE ...>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Doctype {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub declarations: Vec<Declaration>,
}

/// One markup declaration from the internal subset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Element(ElementDecl),
    AttList(AttListDecl),
    Entity(EntityDecl),
    Notation(NotationDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDecl {
    pub name: String,
    pub content_spec: ContentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSpec {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*`: allowed element names
    Mixed(Vec<String>),
    /// Raw content model, e.g. `(a, (b | c)*)`
    Children(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttListDecl {
    pub element: String,
    pub attributes: Vec<AttDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttDef {
    pub name: String,
    pub att_type: AttType,
    pub default: AttDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttType {
    CData,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Notation(Vec<String>),
    Enumeration(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttDefault {
    Required,
    Implied,
    Fixed(String),
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    pub name: String,
    /// Parameter entity (`<!ENTITY % name ...>`)
    pub is_parameter: bool,
    /// Replacement text for internal entities, character references expanded
    pub value: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    /// Notation name for unparsed entities
    pub ndata: Option<String>,
}

impl EntityDecl {
    pub fn is_internal(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_unparsed(&self) -> bool {
        self.ndata.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationDecl {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// General entities declared in the internal subset
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: HashMap<String, EntityDecl>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a general entity. First declaration wins (XML 1.0 §4.2).
    pub fn add(&mut self, decl: &EntityDecl) {
        if decl.is_parameter {
            return;
        }
        self.entities
            .entry(decl.name.clone())
            .or_insert_with(|| decl.clone());
    }

    pub fn get(&self, name: &str) -> Option<&EntityDecl> {
        self.entities.get(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Parse the text between `<!DOCTYPE` and the closing `>`.
pub fn parse_doctype(body: &str, lib: &Library) -> Result<Doctype, MalformedError> {
    let mut p = DeclParser::new(body, lib);

    p.require_whitespace("DOCTYPE")?;
    let name = p.name("DOCTYPE")?.to_string();
    let (public_id, system_id) = p.external_id(false)?;
    p.skip_whitespace();

    let mut declarations = Vec::new();
    if p.eat("[") {
        loop {
            p.skip_whitespace();
            if p.eat("]") {
                break;
            }
            if p.is_eof() {
                return Err(MalformedError::new("unterminated DOCTYPE internal subset"));
            }
            if let Some(decl) = p.markup_decl()? {
                declarations.push(decl);
            }
        }
        p.skip_whitespace();
    }

    if !p.is_eof() {
        return Err(MalformedError::new("unexpected content in DOCTYPE"));
    }

    Ok(Doctype {
        name,
        public_id,
        system_id,
        declarations,
    })
}

/// Cursor over declaration text
struct DeclParser<'a> {
    input: &'a str,
    pos: usize,
    lib: &'a Library,
}

impl<'a> DeclParser<'a> {
    fn new(input: &'a str, lib: &'a Library) -> Self {
        DeclParser { input, pos: 0, lib }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && self.lib.is_whitespace_byte(bytes[self.pos]) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn require_whitespace(&mut self, context: &str) -> Result<(), MalformedError> {
        if self.skip_whitespace() {
            Ok(())
        } else {
            Err(MalformedError::new(format!("whitespace required in {}", context)))
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str, context: &str) -> Result<(), MalformedError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(MalformedError::new(format!("expected '{}' in {}", token, context)))
        }
    }

    fn name(&mut self, context: &str) -> Result<&'a str, MalformedError> {
        let start = self.pos;
        let len = self.lib.name_len(&self.input[start..]);
        if len == 0 {
            return Err(MalformedError::new(format!("expected a name in {}", context)));
        }
        self.pos += len;
        Ok(&self.input[start..self.pos])
    }

    /// Name token: like a name but may start with any name character
    fn nmtoken(&mut self, context: &str) -> Result<&'a str, MalformedError> {
        let start = self.pos;
        self.pos += self.lib.nmtoken_len(&self.input[start..]);
        if self.pos == start {
            return Err(MalformedError::new(format!("expected a name token in {}", context)));
        }
        Ok(&self.input[start..self.pos])
    }

    fn quoted(&mut self, context: &str) -> Result<&'a str, MalformedError> {
        let quote = match self.rest().as_bytes().first() {
            Some(&q @ (b'"' | b'\'')) => q,
            _ => return Err(MalformedError::new(format!("expected quoted literal in {}", context))),
        };
        self.pos += 1;
        let start = self.pos;
        match memchr::memchr(quote, self.rest().as_bytes()) {
            Some(len) => {
                self.pos += len + 1;
                Ok(&self.input[start..start + len])
            }
            None => Err(MalformedError::new(format!("unterminated literal in {}", context))),
        }
    }

    /// `SYSTEM "uri"` or `PUBLIC "pubid" "uri"`. For notations the system
    /// literal after a public id is optional.
    fn external_id(
        &mut self,
        notation: bool,
    ) -> Result<(Option<String>, Option<String>), MalformedError> {
        let save = self.pos;
        self.skip_whitespace();
        if self.eat("SYSTEM") {
            self.require_whitespace("external ID")?;
            let system = self.quoted("system literal")?;
            return Ok((None, Some(system.to_string())));
        }
        if self.eat("PUBLIC") {
            self.require_whitespace("external ID")?;
            let public = self.quoted("public literal")?.to_string();
            let before_system = self.pos;
            let had_space = self.skip_whitespace();
            if had_space && matches!(self.rest().as_bytes().first(), Some(b'"' | b'\'')) {
                let system = self.quoted("system literal")?;
                return Ok((Some(public), Some(system.to_string())));
            }
            if notation {
                self.pos = before_system;
                return Ok((Some(public), None));
            }
            return Err(MalformedError::new("system literal required after public ID"));
        }
        self.pos = save;
        Ok((None, None))
    }

    /// Parse one item of the internal subset. Comments, PIs and parameter
    /// entity references produce no declaration.
    fn markup_decl(&mut self) -> Result<Option<Declaration>, MalformedError> {
        if self.eat("<!--") {
            return match self.rest().find("-->") {
                Some(end) => {
                    self.pos += end + 3;
                    Ok(None)
                }
                None => Err(MalformedError::new("unterminated comment in DOCTYPE")),
            };
        }
        if self.eat("<?") {
            return match self.rest().find("?>") {
                Some(end) => {
                    self.pos += end + 2;
                    Ok(None)
                }
                None => Err(MalformedError::new("unterminated processing instruction in DOCTYPE")),
            };
        }
        if self.eat("%") {
            // Parameter entity references are not expanded
            self.name("parameter entity reference")?;
            self.expect(";", "parameter entity reference")?;
            return Ok(None);
        }
        if self.eat("<!ENTITY") {
            return self.entity_decl().map(|d| Some(Declaration::Entity(d)));
        }
        if self.eat("<!NOTATION") {
            return self.notation_decl().map(|d| Some(Declaration::Notation(d)));
        }
        if self.eat("<!ATTLIST") {
            return self.attlist_decl().map(|d| Some(Declaration::AttList(d)));
        }
        if self.eat("<!ELEMENT") {
            return self.element_decl().map(|d| Some(Declaration::Element(d)));
        }
        Err(MalformedError::new("invalid markup declaration in DOCTYPE"))
    }

    fn entity_decl(&mut self) -> Result<EntityDecl, MalformedError> {
        self.require_whitespace("ENTITY declaration")?;
        let is_parameter = self.eat("%");
        if is_parameter {
            self.require_whitespace("ENTITY declaration")?;
        }
        let name = self.name("ENTITY declaration")?.to_string();
        self.require_whitespace("ENTITY declaration")?;

        let mut decl = EntityDecl {
            name,
            is_parameter,
            value: None,
            public_id: None,
            system_id: None,
            ndata: None,
        };

        if matches!(self.rest().as_bytes().first(), Some(b'"' | b'\'')) {
            let literal = self.quoted("entity value")?;
            decl.value = Some(expand_char_refs(literal, self.lib)?);
        } else {
            let (public_id, system_id) = self.external_id(false)?;
            if system_id.is_none() {
                return Err(MalformedError::new(format!(
                    "entity '{}' needs a value or an external ID",
                    decl.name
                )));
            }
            decl.public_id = public_id;
            decl.system_id = system_id;

            let before = self.pos;
            if self.skip_whitespace() && self.eat("NDATA") {
                if is_parameter {
                    return Err(MalformedError::new("parameter entities cannot be unparsed"));
                }
                self.require_whitespace("NDATA")?;
                decl.ndata = Some(self.name("NDATA")?.to_string());
            } else {
                self.pos = before;
            }
        }

        self.skip_whitespace();
        self.expect(">", "ENTITY declaration")?;
        Ok(decl)
    }

    fn notation_decl(&mut self) -> Result<NotationDecl, MalformedError> {
        self.require_whitespace("NOTATION declaration")?;
        let name = self.name("NOTATION declaration")?.to_string();
        let (public_id, system_id) = self.external_id(true)?;
        if public_id.is_none() && system_id.is_none() {
            return Err(MalformedError::new("NOTATION declaration needs an external ID"));
        }
        self.skip_whitespace();
        self.expect(">", "NOTATION declaration")?;
        Ok(NotationDecl {
            name,
            public_id,
            system_id,
        })
    }

    fn attlist_decl(&mut self) -> Result<AttListDecl, MalformedError> {
        self.require_whitespace("ATTLIST declaration")?;
        let element = self.name("ATTLIST declaration")?.to_string();
        let mut attributes = Vec::new();

        loop {
            let had_space = self.skip_whitespace();
            if self.eat(">") {
                break;
            }
            if !had_space {
                return Err(MalformedError::new("whitespace required in ATTLIST declaration"));
            }
            let name = self.name("ATTLIST declaration")?.to_string();
            self.require_whitespace("ATTLIST declaration")?;
            let att_type = self.att_type()?;
            self.require_whitespace("ATTLIST declaration")?;
            let default = self.att_default()?;
            attributes.push(AttDef {
                name,
                att_type,
                default,
            });
        }

        Ok(AttListDecl {
            element,
            attributes,
        })
    }

    fn att_type(&mut self) -> Result<AttType, MalformedError> {
        if self.rest().starts_with('(') {
            return Ok(AttType::Enumeration(self.enumeration()?));
        }
        // Longest keywords first so IDREFS is not read as ID
        let keywords: [(&str, AttType); 8] = [
            ("CDATA", AttType::CData),
            ("IDREFS", AttType::IdRefs),
            ("IDREF", AttType::IdRef),
            ("ID", AttType::Id),
            ("ENTITIES", AttType::Entities),
            ("ENTITY", AttType::Entity),
            ("NMTOKENS", AttType::NmTokens),
            ("NMTOKEN", AttType::NmToken),
        ];
        for (keyword, att_type) in keywords {
            if self.eat(keyword) {
                return Ok(att_type);
            }
        }
        if self.eat("NOTATION") {
            self.require_whitespace("NOTATION attribute type")?;
            return Ok(AttType::Notation(self.enumeration()?));
        }
        Err(MalformedError::new("invalid attribute type in ATTLIST declaration"))
    }

    fn enumeration(&mut self) -> Result<Vec<String>, MalformedError> {
        self.expect("(", "enumeration")?;
        let mut values = Vec::new();
        loop {
            self.skip_whitespace();
            values.push(self.nmtoken("enumeration")?.to_string());
            self.skip_whitespace();
            if self.eat(")") {
                return Ok(values);
            }
            self.expect("|", "enumeration")?;
        }
    }

    fn att_default(&mut self) -> Result<AttDefault, MalformedError> {
        if self.eat("#REQUIRED") {
            return Ok(AttDefault::Required);
        }
        if self.eat("#IMPLIED") {
            return Ok(AttDefault::Implied);
        }
        let fixed = self.eat("#FIXED");
        if fixed {
            self.require_whitespace("#FIXED default")?;
        }
        let value = self.quoted("attribute default")?;
        if value.contains('<') {
            return Err(MalformedError::new("attribute default cannot contain '<'"));
        }
        let value = expand_char_refs(value, self.lib)?;
        Ok(if fixed {
            AttDefault::Fixed(value)
        } else {
            AttDefault::Default(value)
        })
    }

    fn element_decl(&mut self) -> Result<ElementDecl, MalformedError> {
        self.require_whitespace("ELEMENT declaration")?;
        let name = self.name("ELEMENT declaration")?.to_string();
        self.require_whitespace("ELEMENT declaration")?;

        let content_spec = if self.eat("EMPTY") {
            ContentSpec::Empty
        } else if self.eat("ANY") {
            ContentSpec::Any
        } else if self.rest().starts_with('(') {
            let model = self.content_model()?;
            parse_content_spec(model)?
        } else {
            return Err(MalformedError::new("invalid content specification"));
        };

        self.skip_whitespace();
        self.expect(">", "ELEMENT declaration")?;
        Ok(ElementDecl { name, content_spec })
    }

    /// Balanced parenthesized model plus an optional `?`, `*` or `+`
    fn content_model(&mut self) -> Result<&'a str, MalformedError> {
        let start = self.pos;
        let mut depth = 0usize;
        for (i, b) in self.rest().bytes().enumerate() {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += i + 1;
                        if matches!(self.rest().as_bytes().first(), Some(b'?' | b'*' | b'+')) {
                            self.pos += 1;
                        }
                        return Ok(&self.input[start..self.pos]);
                    }
                }
                b'>' => break,
                _ => {}
            }
        }
        Err(MalformedError::new("unbalanced content model"))
    }
}

/// Classify a parenthesized content model
pub fn parse_content_spec(model: &str) -> Result<ContentSpec, MalformedError> {
    let inner = model.trim_end_matches(['?', '*', '+']);
    let inner = inner
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| MalformedError::new("invalid content model"))?
        .trim();

    if let Some(rest) = inner.strip_prefix("#PCDATA") {
        let names: Vec<String> = rest
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !names.is_empty() && !model.ends_with(")*") {
            return Err(MalformedError::new("mixed content with element names must end in ')*'"));
        }
        return Ok(ContentSpec::Mixed(names));
    }

    Ok(ContentSpec::Children(model.to_string()))
}

/// Expand character references in a literal, leaving entity references
/// untouched for later expansion.
fn expand_char_refs(literal: &str, lib: &Library) -> Result<String, MalformedError> {
    let mut out = String::with_capacity(literal.len());
    let mut rest = literal;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match parse_reference(rest, lib) {
            Reference::Char { value, len } => {
                out.push(value);
                rest = &rest[len..];
            }
            Reference::Named { len, .. } => {
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            }
            Reference::Incomplete => {
                return Err(MalformedError::new("unterminated reference in literal"))
            }
            Reference::Invalid(msg) => return Err(MalformedError::new(msg)),
        }
    }
    out.push_str(rest);
    Ok(out)
}
