//! Shared parser contract (§4.2) plus file-operation relation extraction, used by every
//! concrete parser below.

pub mod code;
pub mod config_files;
pub mod docs;

use std::path::Path;

use crate::entity::{content_hash, Entity, Relation};
use crate::entity::{Chunk, EntityKind};

/// One fully-parsed file. Parsers are pure with respect to the bytes they receive: they may
/// not read other files or the state store.
#[derive(Debug, Default, Clone)]
pub struct ParseResult {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub impl_chunks: Vec<Chunk>,
    pub file_hash: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];

    /// Case-insensitive extension match. Overridable for parsers that key off full file
    /// names rather than extensions (e.g. `Dockerfile`, `Makefile`).
    fn handles_path(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// `project_root` is passed through so a parser can decide whether an import target is
    /// internal to the project (§4.2) rather than an external dependency, by checking whether
    /// it resolves to a real path under the root. Parsers that don't extract import relations
    /// ignore it.
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult;
}

/// Resolves a raw import/use target against `project_root`'s filesystem layout. An import is
/// internal if it's spelled as an explicit relative path (leading dot, in whatever notation the
/// language uses), or if normalizing its separators (`.`, `::`, `\`) to `/` and joining it under
/// `project_root` lands on a real file (with one of `extensions`) or directory.
///
/// Mirrors `_is_internal_import` from the original Python indexer this crate's import handling
/// is modeled on: that function resolves a dotted module path to a file under the project root
/// before accepting it as internal, rather than relying on prefix heuristics alone.
pub fn is_internal_import(raw: &str, project_root: &Path, extensions: &[&str]) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with('.') {
        return true;
    }

    let normalized = trimmed.replace("::", "/").replace('.', "/").replace('\\', "/");
    let candidate = normalized.trim_start_matches('/');
    if !candidate.is_empty() && resolves_under_root(project_root, candidate, extensions) {
        return true;
    }

    // Some languages (Go import paths, PHP namespaces with existing slashes) already use `/`
    // or `\` without dots; try the un-normalized form too.
    let direct = trimmed.trim_start_matches('/');
    if direct != candidate && resolves_under_root(project_root, direct, extensions) {
        return true;
    }

    false
}

fn resolves_under_root(project_root: &Path, candidate: &str, extensions: &[&str]) -> bool {
    let base = project_root.join(candidate);
    if base.is_dir() {
        return true;
    }
    extensions.iter().any(|ext| base.with_extension(ext).is_file())
}

pub fn build_default_registry() -> crate::parser_registry::ParserRegistry {
    let mut registry = crate::parser_registry::ParserRegistry::new()
        .register(Box::new(code::CodeParser::rust()))
        .register(Box::new(code::CodeParser::typescript()))
        .register(Box::new(code::CodeParser::python()));

    #[cfg(feature = "lang-go")]
    {
        registry = registry.register(Box::new(code::CodeParser::go()));
    }
    #[cfg(feature = "lang-java")]
    {
        registry = registry.register(Box::new(code::CodeParser::java()));
    }
    #[cfg(feature = "lang-csharp")]
    {
        registry = registry.register(Box::new(code::CodeParser::csharp()));
    }
    #[cfg(feature = "lang-php")]
    {
        registry = registry.register(Box::new(code::CodeParser::php()));
    }
    #[cfg(feature = "lang-dart")]
    {
        registry = registry.register(Box::new(code::CodeParser::dart()));
    }

    registry
        .register(Box::new(docs::MarkdownParser))
        .register(Box::new(config_files::JsonParser))
        .register(Box::new(config_files::YamlParser))
        .register(Box::new(config_files::CssParser))
        .register(Box::new(config_files::HtmlParser))
        .register(Box::new(config_files::IniParser))
        .register(Box::new(config_files::CsvParser))
        .register(Box::new(config_files::ProtoParser))
        .register(Box::new(config_files::PlainTextParser))
}

/// Emits the mandatory `file` entity and `contains` edges to every sub-entity, per the
/// "common behavior" section of §4.2. Parsers call this once they've collected their
/// sub-entities.
pub fn file_entity_and_contains(abs_path_str: &str, sub_entities: &[Entity]) -> (Entity, Vec<Relation>) {
    let file_entity = Entity::file(abs_path_str);
    let relations = sub_entities
        .iter()
        .map(|e| Relation::contains(abs_path_str, e.name.clone()))
        .collect();
    (file_entity, relations)
}

/// The fixed vocabulary of recognized file-mode strings, filtered out when they appear as an
/// `open()` call's sole/first string literal (§4.2).
const FILE_MODE_STRINGS: &[&str] = &["r", "w", "a", "rb", "wb", "ab", "r+", "w+", "rt", "wt", "x", "xb"];

struct FileOpPattern {
    import_type: &'static str,
    needle: &'static str,
}

/// Ordered so more specific call patterns (pandas/requests/json) are tried before the bare
/// `open(...)` fallback on the same line.
const FILE_OP_PATTERNS: &[FileOpPattern] = &[
    FileOpPattern { import_type: "pandas_csv_read", needle: "read_csv(" },
    FileOpPattern { import_type: "requests_get", needle: "requests.get(" },
    FileOpPattern { import_type: "json_load", needle: "json.load(" },
    FileOpPattern { import_type: "json_write", needle: "json.dump(" },
    FileOpPattern { import_type: "path_read_text", needle: ".read_text(" },
    FileOpPattern { import_type: "file_open", needle: "open(" },
];

/// Finds the first quoted string literal at or after `from` within `line`.
fn first_string_literal(line: &str, from: usize) -> Option<String> {
    let bytes = line.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        let quote = bytes[i];
        if quote == b'"' || quote == b'\'' {
            if let Some(end) = line[i + 1..].find(quote as char) {
                return Some(line[i + 1..i + 1 + end].to_string());
            }
        }
        i += 1;
    }
    None
}

/// Heuristic file-operation relation extraction shared by every code parser: calls like
/// `open("x.json")`, `json.load(...)`, `pandas.read_csv("y.csv")`, `Path("z").read_text()`
/// yield an `imports` relation from the file entity to the literal path, tagged with a fixed
/// `import_type` vocabulary. Only the first string literal near the call is used, and common
/// file-mode strings are filtered so `open(f, "r")` doesn't produce a spurious `"r"` target.
pub fn extract_file_op_relations(file_entity_name: &str, text: &str) -> Vec<Relation> {
    let mut relations = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for line in text.lines() {
        for pattern in FILE_OP_PATTERNS {
            let Some(pos) = line.find(pattern.needle) else { continue };
            let call_end = pos + pattern.needle.len();
            let Some(literal) = first_string_literal(line, call_end) else { continue };
            if literal.is_empty() || FILE_MODE_STRINGS.contains(&literal.as_str()) {
                continue;
            }
            let key = (pattern.import_type, literal.clone());
            if !seen.insert(key) {
                continue;
            }
            relations.push(
                Relation::imports(file_entity_name, literal).with_import_type(pattern.import_type),
            );
            break; // first matching pattern on this line wins.
        }
    }

    relations
}

/// Builds the implementation chunk for a function/class/method/documentation-section entity.
/// Metadata chunks are *not* built here: per §4.5, the content processor derives a
/// MetadataChunk from each entity itself (so it can set `has_implementation` from run-wide
/// context), rather than the parser supplying one.
pub fn implementation_chunk_for_entity(entity: &Entity, body: &str) -> Chunk {
    Chunk::Implementation {
        entity_name: entity.name.clone(),
        entity_type: entity.kind,
        content: body.to_string(),
        file_path: entity.file_path.clone().unwrap_or_default(),
        start_line: entity.line_start.unwrap_or(0),
        end_line: entity.line_end.unwrap_or(0),
    }
}

pub fn is_class_like(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Class)
}

pub fn content_hash_of(content: &str) -> String {
    content_hash(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_open_relation_carries_import_type() {
        let rels = extract_file_op_relations("/repo/loader.py", r#"f = open("config.json")"#);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].to, "config.json");
        assert_eq!(rels[0].import_type(), Some("file_open"));
    }

    #[test]
    fn file_mode_strings_are_not_mistaken_for_paths() {
        let rels = extract_file_op_relations("/repo/loader.py", r#"f = open("r")"#);
        assert!(rels.is_empty());
    }

    #[test]
    fn pandas_read_csv_wins_over_bare_open() {
        let rels = extract_file_op_relations("/repo/loader.py", r#"df = pandas.read_csv("y.csv")"#);
        assert_eq!(rels[0].import_type(), Some("pandas_csv_read"));
    }

    #[test]
    fn duplicate_literals_are_deduplicated() {
        let rels = extract_file_op_relations(
            "/repo/loader.py",
            "f = open(\"config.json\")\ng = open(\"config.json\")\n",
        );
        assert_eq!(rels.len(), 1);
    }

    #[test]
    fn dotted_package_path_resolving_to_a_directory_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("com/example/service")).unwrap();
        assert!(is_internal_import("com.example.service", dir.path(), &["java"]));
    }

    #[test]
    fn dotted_path_with_no_matching_file_or_directory_is_external() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_internal_import("java.util.List", dir.path(), &["java"]));
    }

    #[test]
    fn leading_dot_is_always_internal_regardless_of_resolution() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_internal_import(".sibling", dir.path(), &["py"]));
    }
}
