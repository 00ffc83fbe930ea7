//! Namespace Resolution
//!
//! Stack-based namespace resolver for XML namespace handling.

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
}

/// Namespace binding (prefix -> URI); the default namespace has no prefix
#[derive(Debug, Clone)]
struct NsBinding {
    prefix: Option<String>,
    /// Empty string undeclares the default namespace (`xmlns=""`)
    uri: String,
    depth: usize,
}

/// Stack-based namespace resolver
#[derive(Debug)]
pub struct NamespaceResolver {
    /// Stack of namespace bindings
    bindings: Vec<NsBinding>,
    /// Current element depth
    depth: usize,
}

impl NamespaceResolver {
    /// Create a new namespace resolver with pre-declared xml and xmlns namespaces
    pub fn new() -> Self {
        let mut resolver = NamespaceResolver {
            bindings: Vec::with_capacity(16),
            depth: 0,
        };

        // Pre-bind xml and xmlns prefixes
        resolver.bindings.push(NsBinding {
            prefix: Some("xml".to_string()),
            uri: ns::XML.to_string(),
            depth: 0,
        });
        resolver.bindings.push(NsBinding {
            prefix: Some("xmlns".to_string()),
            uri: ns::XMLNS.to_string(),
            depth: 0,
        });

        resolver
    }

    /// Enter a new element scope
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave an element scope, removing any bindings declared in it
    pub fn pop_scope(&mut self) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Declare a namespace binding for the current scope
    pub fn declare(&mut self, prefix: &str, uri: &str) {
        // Don't allow redeclaring xml or xmlns
        if prefix == "xml" || prefix == "xmlns" {
            return;
        }

        self.bindings.push(NsBinding {
            prefix: Some(prefix.to_string()),
            uri: uri.to_string(),
            depth: self.depth,
        });
    }

    /// Declare the default namespace for current scope
    pub fn declare_default(&mut self, uri: &str) {
        self.bindings.push(NsBinding {
            prefix: None,
            uri: uri.to_string(),
            depth: self.depth,
        });
    }

    /// Resolve a prefix to a namespace URI
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        // Search from most recent to oldest
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.as_deref() == Some(prefix))
            .map(|b| b.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Resolve the default namespace
    pub fn resolve_default(&self) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.is_none())
            .map(|b| b.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Get current depth
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Default for NamespaceResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespaces() {
        let resolver = NamespaceResolver::new();
        assert_eq!(resolver.resolve("xml"), Some(ns::XML));
        assert_eq!(resolver.resolve("xmlns"), Some(ns::XMLNS));
        assert_eq!(resolver.resolve_default(), None);
    }

    #[test]
    fn test_scoped_bindings() {
        let mut resolver = NamespaceResolver::new();

        resolver.push_scope();
        resolver.declare("a", "urn:a");
        resolver.declare_default("urn:default");
        assert_eq!(resolver.resolve("a"), Some("urn:a"));

        resolver.push_scope();
        resolver.declare("a", "urn:a2");
        resolver.declare_default("");
        assert_eq!(resolver.resolve("a"), Some("urn:a2"));
        assert_eq!(resolver.resolve_default(), None);

        resolver.pop_scope();
        assert_eq!(resolver.resolve("a"), Some("urn:a"));
        assert_eq!(resolver.resolve_default(), Some("urn:default"));

        resolver.pop_scope();
        assert_eq!(resolver.resolve("a"), None);
        assert_eq!(resolver.depth(), 0);
    }

    #[test]
    fn test_cannot_redeclare_xml() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare("xml", "urn:bogus");
        assert_eq!(resolver.resolve("xml"), Some(ns::XML));
    }
}
