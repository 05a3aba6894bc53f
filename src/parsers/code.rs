//! Tree-sitter backed parser for source languages with function/class structure.
//!
//! Generalized from the teacher's `LanguageDriver` trait + per-language driver list (originally
//! built for skeleton extraction) into a declarative `CodeLangSpec` table: one generic
//! extraction engine parameterized by per-language tree-sitter queries, rather than one
//! hand-written driver struct per language.

use std::path::Path;
use tree_sitter::{Language, Node, Parser as TsParser, Query, QueryCursor, StreamingIterator, Tree};

use crate::entity::{file_hash, Entity, EntityKind, Relation};
use crate::parsers::{
    extract_file_op_relations, file_entity_and_contains, implementation_chunk_for_entity, is_internal_import,
    ParseResult, Parser,
};

/// How a language spells doc comments, used to pull a one-line docstring out of the source
/// immediately preceding a definition (or, for Python, out of the definition's own body).
enum DocStyle {
    LineComment(&'static [&'static str]),
    BlockComment { start: &'static str, end: &'static str },
    PythonDocstring,
    HashComment,
}

pub struct CodeLangSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub language: fn(&Path) -> Language,
    /// Each query captures `@name` (identifier) and `@def` (the whole definition node).
    pub function_queries: &'static [&'static str],
    pub class_queries: &'static [&'static str],
    /// Each query captures `@name` (the class/interface being defined) and one or more
    /// `@base` (a parent class / implemented interface), within the same match.
    pub inherits_queries: &'static [&'static str],
    /// Captures `@path`: the raw import target string (quotes still attached where the
    /// grammar represents it as a string_literal node).
    pub import_query: Option<&'static str>,
    pub builtins: &'static [&'static str],
    pub doc_style: DocStyle,
    /// Accepts the raw import target text (already unquoted), the project root, and this
    /// language's extension list, and decides whether it looks internal/relative enough to
    /// keep (§4.2: internal or explicitly relative imports only).
    pub classify_import: fn(&str, &Path, &[&str]) -> bool,
}

pub struct CodeParser {
    spec: CodeLangSpec,
}

impl CodeParser {
    pub fn rust() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "rust",
                extensions: &["rs"],
                language: |_| tree_sitter_rust::language(),
                function_queries: &[r#"(function_item name: (identifier) @name) @def"#],
                class_queries: &[
                    r#"(struct_item name: (type_identifier) @name) @def"#,
                    r#"(enum_item name: (type_identifier) @name) @def"#,
                    r#"(trait_item name: (type_identifier) @name) @def"#,
                ],
                inherits_queries: &[
                    r#"(impl_item trait: (type_identifier) @base type: (type_identifier) @name)"#,
                ],
                import_query: Some(r#"(use_declaration argument: (_) @path)"#),
                builtins: &[
                    "println", "print", "format", "vec", "panic", "assert", "assert_eq",
                    "assert_ne", "unwrap", "expect", "clone", "into", "from", "as_ref", "as_str",
                    "iter", "collect", "map", "filter", "Some", "None", "Ok", "Err",
                ],
                doc_style: DocStyle::LineComment(&["///", "//!"]),
                classify_import: |raw, root, exts| {
                    raw.starts_with("crate") || raw.starts_with("self::") || raw.starts_with("super::")
                        || is_internal_import(raw, root, exts)
                },
            },
        }
    }

    pub fn typescript() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "typescript",
                extensions: &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"],
                language: |path| {
                    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                    if ext.eq_ignore_ascii_case("tsx") || ext.eq_ignore_ascii_case("jsx") {
                        tree_sitter_typescript::language_tsx()
                    } else {
                        tree_sitter_typescript::language_typescript()
                    }
                },
                function_queries: &[
                    r#"(function_declaration name: (identifier) @name) @def"#,
                    r#"(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function))) @def"#,
                    r#"(method_definition name: (property_identifier) @name) @def"#,
                ],
                class_queries: &[r#"(class_declaration name: (type_identifier) @name) @def"#],
                inherits_queries: &[
                    r#"(class_declaration name: (type_identifier) @name (class_heritage (extends_clause value: (identifier) @base)))"#,
                ],
                import_query: Some(r#"(import_statement source: (string) @path)"#),
                builtins: &[
                    "console", "require", "import", "map", "filter", "reduce", "forEach", "push",
                    "then", "catch", "JSON", "Object", "Array", "Promise", "super",
                ],
                doc_style: DocStyle::BlockComment { start: "/**", end: "*/" },
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }

    pub fn python() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "python",
                extensions: &["py", "pyi"],
                language: |_| tree_sitter_python::language(),
                function_queries: &[r#"(function_definition name: (identifier) @name) @def"#],
                class_queries: &[r#"(class_definition name: (identifier) @name) @def"#],
                inherits_queries: &[
                    r#"(class_definition name: (identifier) @name superclasses: (argument_list (identifier) @base))"#,
                ],
                import_query: Some(
                    r#"[
                        (import_from_statement module_name: (dotted_name) @path)
                        (import_from_statement module_name: (relative_import) @path)
                        (import_statement name: (dotted_name) @path)
                    ]"#,
                ),
                builtins: &[
                    "print", "len", "str", "int", "float", "list", "dict", "set", "tuple",
                    "range", "enumerate", "zip", "map", "filter", "super", "isinstance",
                    "open", "getattr", "setattr", "hasattr", "self", "cls",
                ],
                doc_style: DocStyle::PythonDocstring,
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }

    #[cfg(feature = "lang-go")]
    pub fn go() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "go",
                extensions: &["go"],
                language: |_| tree_sitter_go::language(),
                function_queries: &[
                    r#"(function_declaration name: (identifier) @name) @def"#,
                    r#"(method_declaration name: (field_identifier) @name) @def"#,
                ],
                class_queries: &[
                    r#"(type_declaration (type_spec name: (type_identifier) @name type: (struct_type))) @def"#,
                ],
                inherits_queries: &[],
                import_query: Some(r#"(import_spec path: (interpreted_string_literal) @path)"#),
                builtins: &["fmt", "Println", "Printf", "Sprintf", "append", "make", "len", "cap", "panic", "recover"],
                doc_style: DocStyle::LineComment(&["//"]),
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }

    #[cfg(feature = "lang-java")]
    pub fn java() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "java",
                extensions: &["java"],
                language: |_| tree_sitter_java::language(),
                function_queries: &[r#"(method_declaration name: (identifier) @name) @def"#],
                class_queries: &[
                    r#"(class_declaration name: (identifier) @name) @def"#,
                    r#"(interface_declaration name: (identifier) @name) @def"#,
                ],
                inherits_queries: &[
                    r#"(class_declaration name: (identifier) @name superclass: (superclass (type_identifier) @base))"#,
                    r#"(class_declaration name: (identifier) @name interfaces: (super_interfaces (type_list (type_identifier) @base)))"#,
                ],
                import_query: Some(r#"(import_declaration (scoped_identifier) @path)"#),
                builtins: &["System", "out", "println", "this", "super", "toString", "equals", "hashCode"],
                doc_style: DocStyle::BlockComment { start: "/**", end: "*/" },
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }

    #[cfg(feature = "lang-csharp")]
    pub fn csharp() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "csharp",
                extensions: &["cs"],
                language: |_| tree_sitter_c_sharp::language(),
                function_queries: &[r#"(method_declaration name: (identifier) @name) @def"#],
                class_queries: &[r#"(class_declaration name: (identifier) @name) @def"#],
                inherits_queries: &[
                    r#"(class_declaration name: (identifier) @name (base_list (identifier) @base))"#,
                ],
                import_query: Some(r#"(using_directive (qualified_name) @path)"#),
                builtins: &["Console", "WriteLine", "this", "base", "ToString", "Equals"],
                doc_style: DocStyle::LineComment(&["///"]),
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }

    #[cfg(feature = "lang-php")]
    pub fn php() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "php",
                extensions: &["php"],
                language: |_| tree_sitter_php::LANGUAGE_PHP.into(),
                function_queries: &[r#"(function_definition name: (name) @name) @def"#],
                class_queries: &[r#"(class_declaration name: (name) @name) @def"#],
                inherits_queries: &[
                    r#"(class_declaration name: (name) @name (base_clause (name) @base))"#,
                ],
                import_query: Some(r#"(namespace_use_clause (qualified_name) @path)"#),
                builtins: &["echo", "print", "isset", "empty", "array", "strlen", "count", "this", "parent"],
                doc_style: DocStyle::BlockComment { start: "/**", end: "*/" },
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }

    #[cfg(feature = "lang-dart")]
    pub fn dart() -> Self {
        Self {
            spec: CodeLangSpec {
                name: "dart",
                extensions: &["dart"],
                language: |_| tree_sitter_dart::language(),
                function_queries: &[r#"(function_signature name: (identifier) @name) @def"#],
                class_queries: &[r#"(class_definition name: (identifier) @name) @def"#],
                inherits_queries: &[
                    r#"(class_definition name: (identifier) @name superclass: (type_identifier) @base)"#,
                ],
                import_query: Some(r#"(import_or_export (configurable_uri (uri) @path))"#),
                builtins: &["print", "this", "super", "toString"],
                doc_style: DocStyle::LineComment(&["///"]),
                classify_import: |raw, root, exts| is_internal_import(raw, root, exts),
            },
        }
    }
}

fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

fn strip_quotes(s: &str) -> String {
    let t = s.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        let (first, last) = (bytes[0], bytes[t.len() - 1]);
        if matches!(first, b'"' | b'\'' | b'`') && first == last {
            return t[1..t.len() - 1].to_string();
        }
    }
    t.to_string()
}

fn first_line_signature(def_text: &str) -> String {
    let mut s = def_text;
    if let Some(i) = s.find('{') {
        s = &s[..i];
    }
    if let Some(i) = s.find(':') {
        if s.len() > 80 {
            // Python-style `def f(...):` — keep the colon, it's part of the signature.
            s = &s[..=i.min(s.len() - 1)];
        }
    }
    if let Some(i) = s.find('\n') {
        s = &s[..i];
    }
    let mut out = String::with_capacity(s.len().min(240));
    let mut prev_ws = false;
    for ch in s.chars() {
        let is_ws = ch.is_whitespace();
        if is_ws {
            if !prev_ws {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
        prev_ws = is_ws;
        if out.len() >= 240 {
            break;
        }
    }
    out.trim().trim_end_matches('{').trim().to_string()
}

impl Parser for CodeParser {
    fn name(&self) -> &'static str {
        self.spec.name
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.spec.extensions
    }

    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = rel_path;
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let mut result = ParseResult {
            file_hash: file_hash(source),
            ..Default::default()
        };

        let source_text = String::from_utf8_lossy(source).to_string();
        let lines: Vec<&str> = source_text.lines().collect();

        let mut ts_parser = TsParser::new();
        let language = (self.spec.language)(abs_path);
        if ts_parser.set_language(&language).is_err() {
            result.errors.push(format!("{}: unsupported grammar", self.spec.name));
            let (file_entity, _) = file_entity_and_contains(&abs_path_str, &[]);
            result.entities.push(file_entity);
            return result;
        }

        let Some(tree): Option<Tree> = ts_parser.parse(source, None) else {
            result.errors.push(format!("{}: failed to parse", self.spec.name));
            let (file_entity, _) = file_entity_and_contains(&abs_path_str, &[]);
            result.entities.push(file_entity);
            return result;
        };
        let root = tree.root_node();
        if root.has_error() {
            result
                .warnings
                .push(format!("{}: syntax error, partial extraction only", self.spec.name));
        }

        let mut sub_entities: Vec<Entity> = Vec::new();

        for q in self.spec.class_queries {
            for def in run_defs(source, root, &language, q) {
                let mut entity = Entity::new(def.name.clone(), EntityKind::Class);
                entity.file_path = Some(abs_path_str.clone());
                entity.line_start = Some(def.start_row as u32 + 1);
                entity.line_end = Some(def.end_row as u32 + 1);
                let body = slice(&source_text, def.start_byte, def.end_byte);
                entity.signature = Some(first_line_signature(&body));
                entity.docstring = extract_doc(&self.spec.doc_style, &lines, def.start_row, &body);
                entity.observations = vec![format!("Class: {}", def.name)];
                sub_entities.push(entity);
            }
        }

        for q in self.spec.function_queries {
            for def in run_defs(source, root, &language, q) {
                let kind = if is_nested_in_class(def.ts_node_parent_is_class) {
                    EntityKind::Method
                } else {
                    EntityKind::Function
                };
                let mut entity = Entity::new(def.name.clone(), kind);
                entity.file_path = Some(abs_path_str.clone());
                entity.line_start = Some(def.start_row as u32 + 1);
                entity.line_end = Some(def.end_row as u32 + 1);
                let body = slice(&source_text, def.start_byte, def.end_byte);
                entity.signature = Some(first_line_signature(&body));
                entity.docstring = extract_doc(&self.spec.doc_style, &lines, def.start_row, &body);
                entity.observations = vec![format!("{}: {}", kind.as_str(), def.name)];
                sub_entities.push(entity);
            }
        }

        // inherits relations, matched by class name to the entities we already collected.
        for q in self.spec.inherits_queries {
            for (name, base) in run_inherits(source, root, &language, q) {
                result.relations.push(Relation::inherits(name, base));
            }
        }

        // calls + chunks per entity.
        for entity in &sub_entities {
            let body = slice(
                &source_text,
                byte_offset_for_line(&source_text, entity.line_start.unwrap_or(1) - 1),
                byte_offset_for_line(&source_text, entity.line_end.unwrap_or(1)),
            );
            result.impl_chunks.push(implementation_chunk_for_entity(entity, &body));

            for callee in heuristic_calls(&body, self.spec.builtins) {
                if callee != entity.name {
                    result.relations.push(Relation::calls(entity.name.clone(), callee));
                }
            }
        }

        // imports: internal/relative only.
        if let Some(q) = self.spec.import_query {
            for raw in run_strings(source, root, &language, q) {
                let raw = strip_quotes(&raw);
                if raw.is_empty() {
                    continue;
                }
                if (self.spec.classify_import)(&raw, project_root, self.spec.extensions) {
                    result.relations.push(Relation::imports(abs_path_str.clone(), raw));
                }
            }
        }

        result
            .relations
            .extend(extract_file_op_relations(&abs_path_str, &source_text));

        let (file_entity, contains) = file_entity_and_contains(&abs_path_str, &sub_entities);
        result.relations.extend(contains);
        result.entities.push(file_entity);
        result.entities.extend(sub_entities);

        result
    }
}

fn slice(text: &str, start_byte: usize, end_byte: usize) -> String {
    let start_byte = start_byte.min(text.len());
    let end_byte = end_byte.min(text.len()).max(start_byte);
    text.get(start_byte..end_byte).unwrap_or("").to_string()
}

fn byte_offset_for_line(text: &str, line_0idx: u32) -> usize {
    let mut offset = 0usize;
    for (i, line) in text.split_inclusive('\n').enumerate() {
        if i as u32 == line_0idx {
            return offset;
        }
        offset += line.len();
    }
    text.len()
}

struct Def {
    name: String,
    start_byte: usize,
    end_byte: usize,
    start_row: usize,
    end_row: usize,
    ts_node_parent_is_class: bool,
}

fn run_defs(source: &[u8], root: Node, language: &Language, query_src: &str) -> Vec<Def> {
    let query = match Query::new(language, query_src) {
        Ok(q) => q,
        Err(_) => return vec![],
    };
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut def_node: Option<Node> = None;
        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => name_node = Some(cap.node),
                "def" => def_node = Some(cap.node),
                _ => {}
            }
        }
        let Some(name_node) = name_node else { continue };
        let def_node = def_node.unwrap_or(name_node);
        let name = node_text(source, name_node).trim().to_string();
        if name.is_empty() {
            continue;
        }
        let parent_is_class = parent_chain_has_class(def_node);
        out.push(Def {
            name,
            start_byte: def_node.start_byte(),
            end_byte: def_node.end_byte(),
            start_row: def_node.start_position().row,
            end_row: def_node.end_position().row,
            ts_node_parent_is_class: parent_is_class,
        });
    }
    out
}

fn parent_chain_has_class(node: Node) -> bool {
    let mut cur = node.parent();
    while let Some(n) = cur {
        let kind = n.kind();
        if kind.contains("class") || kind.contains("impl") || kind.contains("interface") {
            return true;
        }
        cur = n.parent();
    }
    false
}

fn is_nested_in_class(flag: bool) -> bool {
    flag
}

fn run_strings(source: &[u8], root: Node, language: &Language, query_src: &str) -> Vec<String> {
    let query = match Query::new(language, query_src) {
        Ok(q) => q,
        Err(_) => return vec![],
    };
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            if query.capture_names()[cap.index as usize] == "path" {
                let text = node_text(source, cap.node).trim().to_string();
                if !text.is_empty() {
                    out.push(text);
                }
            }
        }
    }
    out
}

fn run_inherits(source: &[u8], root: Node, language: &Language, query_src: &str) -> Vec<(String, String)> {
    let query = match Query::new(language, query_src) {
        Ok(q) => q,
        Err(_) => return vec![],
    };
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        let mut name: Option<String> = None;
        let mut bases: Vec<String> = Vec::new();
        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => name = Some(node_text(source, cap.node).trim().to_string()),
                "base" => bases.push(node_text(source, cap.node).trim().to_string()),
                _ => {}
            }
        }
        if let Some(name) = name {
            for base in bases {
                out.push((name.clone(), base));
            }
        }
    }
    out
}

/// Heuristic `calls` extraction: scans the body text for `identifier(` call sites and keeps
/// those not in the language's built-in/keyword list. Precision is intentionally not a
/// contract here (§9 open question) — this is a best-effort signal, not symbol resolution.
fn heuristic_calls(body: &str, builtins: &[&str]) -> Vec<String> {
    let bytes = body.as_bytes();
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let ident = &body[start..i];
            let mut j = i;
            while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'(' && !builtins.contains(&ident) && ident.len() > 1 {
                if seen.insert(ident.to_string()) {
                    out.push(ident.to_string());
                }
            }
        } else {
            i += 1;
        }
    }
    out
}

fn extract_doc(style: &DocStyle, lines: &[&str], def_start_row: usize, def_text: &str) -> Option<String> {
    match style {
        DocStyle::PythonDocstring => extract_python_docstring(def_text),
        DocStyle::LineComment(prefixes) => {
            let mut collected = Vec::new();
            let mut i = def_start_row;
            while i > 0 {
                i -= 1;
                let line = match lines.get(i) {
                    Some(l) => l.trim(),
                    None => break,
                };
                if line.is_empty() {
                    break;
                }
                match prefixes.iter().find(|p| line.starts_with(**p)) {
                    Some(prefix) => collected.push(line[prefix.len()..].trim().to_string()),
                    None => break,
                }
            }
            collected.reverse();
            if collected.is_empty() {
                None
            } else {
                Some(collected.join(" "))
            }
        }
        DocStyle::HashComment => extract_doc(&DocStyle::LineComment(&["#"]), lines, def_start_row, def_text),
        DocStyle::BlockComment { start, end } => {
            let mut i = def_start_row;
            let mut found_end = false;
            let mut collected = Vec::new();
            while i > 0 {
                i -= 1;
                let line = match lines.get(i) {
                    Some(l) => l.trim(),
                    None => break,
                };
                if line.is_empty() && !found_end {
                    continue;
                }
                if !found_end {
                    if line.ends_with(end) {
                        found_end = true;
                        let trimmed = line.trim_end_matches(end).trim();
                        if !trimmed.is_empty() {
                            collected.push(trimmed.trim_start_matches('*').trim().to_string());
                        }
                        continue;
                    } else {
                        break;
                    }
                }
                if line.starts_with(start) {
                    let trimmed = line.trim_start_matches(start).trim();
                    if !trimmed.is_empty() {
                        collected.push(trimmed.to_string());
                    }
                    break;
                }
                collected.push(line.trim_start_matches('*').trim().to_string());
            }
            collected.reverse();
            if collected.is_empty() {
                None
            } else {
                Some(collected.join(" "))
            }
        }
    }
}

fn extract_python_docstring(def_text: &str) -> Option<String> {
    let colon = def_text.find(':')?;
    let after = &def_text[colon + 1..];
    let trimmed = after.trim_start_matches(['\n', '\r']);
    let first_nonblank = trimmed.lines().map(str::trim).find(|l| !l.is_empty())?;
    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = first_nonblank.strip_prefix(quote) {
            let end = rest.find(quote).unwrap_or(rest.len());
            let doc = rest[..end].trim();
            if !doc.is_empty() {
                return Some(doc.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn python_function_and_docstring() {
        let parser = CodeParser::python();
        let src = b"def f():\n    \"\"\"does a thing\"\"\"\n    return 1\n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/a.py"), "a.py", src);
        let f = result.entities.iter().find(|e| e.name == "f").unwrap();
        assert_eq!(f.docstring.as_deref(), Some("does a thing"));
        assert!(result.entities.iter().any(|e| e.kind == EntityKind::File));
        assert!(result
            .relations
            .iter()
            .any(|r| r.from.ends_with("a.py") && r.to == "f"));
    }

    #[test]
    fn python_class_inherits() {
        let parser = CodeParser::python();
        let src = b"class Base:\n    pass\n\nclass Child(Base):\n    pass\n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/b.py"), "b.py", src);
        assert!(result
            .relations
            .iter()
            .any(|r| r.from == "Child" && r.to == "Base"));
    }

    #[test]
    fn python_relative_import_kept_external_discarded() {
        let parser = CodeParser::python();
        let src = b"from . import sibling\nimport os\n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/c.py"), "c.py", src);
        let imports: Vec<_> = result.relations.iter().filter(|r| r.to != "c.py").collect();
        assert!(imports.iter().any(|r| r.to.contains("sibling")));
        assert!(!imports.iter().any(|r| r.to == "os"));
    }

    #[test]
    fn bare_dotted_import_resolves_against_project_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("myapp")).unwrap();
        std::fs::write(dir.path().join("myapp/utils.py"), "").unwrap();

        let parser = CodeParser::python();
        let src = b"import myapp.utils\nimport os\n";
        let file_path = dir.path().join("a.py");
        let result = parser.parse(dir.path(), &file_path, "a.py", src);
        let imports: Vec<_> = result.relations.iter().filter(|r| !r.to.ends_with("a.py")).collect();
        assert!(imports.iter().any(|r| r.to == "myapp.utils"));
        assert!(!imports.iter().any(|r| r.to == "os"));
    }

    #[test]
    fn rust_function_entity_has_signature() {
        let parser = CodeParser::rust();
        let src = b"pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/lib.rs"), "lib.rs", src);
        let f = result.entities.iter().find(|e| e.name == "add").unwrap();
        assert!(f.signature.as_deref().unwrap().contains("pub fn add"));
    }

    #[test]
    fn syntax_error_still_yields_file_entity_and_warning() {
        let parser = CodeParser::rust();
        let src = b"fn broken( {{{ \n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/bad.rs"), "bad.rs", src);
        assert!(result.entities.iter().any(|e| e.kind == EntityKind::File));
        assert!(!result.warnings.is_empty());
    }
}
