//! Declaration Observer
//!
//! Receives the declarative parser callbacks (XML declaration, DOCTYPE,
//! entity/notation/attribute/element declarations, entity references). These
//! never produce cursor events; the bridge forwards them here verbatim when an
//! observer is attached.

use crate::core::dtd::{AttDef, Doctype, ElementDecl, EntityDecl, NotationDecl};

/// Observer for declarative callbacks. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait DeclarationObserver {
    fn start_document(&mut self) {}

    fn end_document(&mut self) {}

    fn xml_declaration(
        &mut self,
        version: &str,
        encoding: Option<&str>,
        standalone: Option<bool>,
    ) {
    }

    fn doctype(&mut self, doctype: &Doctype) {}

    fn entity_decl(&mut self, decl: &EntityDecl) {}

    fn unparsed_entity_decl(&mut self, decl: &EntityDecl) {}

    fn notation_decl(&mut self, decl: &NotationDecl) {}

    /// One attribute definition from an `<!ATTLIST element ...>`
    fn attribute_decl(&mut self, element: &str, def: &AttDef) {}

    fn element_decl(&mut self, decl: &ElementDecl) {}

    /// A declared entity was referenced in content
    fn reference(&mut self, name: &str) {}
}
