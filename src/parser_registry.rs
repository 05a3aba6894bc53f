//! Dispatches a file path to the parser that claims its extension (§4.1).

use std::path::Path;

use crate::parsers::Parser;

/// An ordered list of parsers. The first parser whose `handles_path` returns true wins;
/// extensions are matched case-insensitively by each parser's own `handles_path`.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self { parsers: Vec::new() }
    }

    pub fn register(mut self, parser: Box<dyn Parser>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// The default registry: code parsers first (most specific extensions), then the
    /// documentation parser, then configuration/plain-text parsers last as a catch-all.
    pub fn default_registry() -> Self {
        crate::parsers::build_default_registry()
    }

    pub fn parser_for(&self, path: &Path) -> Option<&dyn Parser> {
        self.parsers
            .iter()
            .find(|p| p.handles_path(path))
            .map(|p| p.as_ref())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_parser_wins() {
        let registry = ParserRegistry::default_registry();
        assert!(registry.parser_for(Path::new("a.py")).is_some());
        assert!(registry.parser_for(Path::new("a.unknown-ext")).is_none());
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let registry = ParserRegistry::default_registry();
        assert_eq!(
            registry.parser_for(Path::new("a.PY")).map(Parser::name),
            registry.parser_for(Path::new("a.py")).map(Parser::name)
        );
    }
}
