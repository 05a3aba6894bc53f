//! Configuration and structured-text parsers (§4.2): JSON, YAML, CSS, HTML, INI, CSV, plain
//! text, and Protobuf. Each produces a file entity plus structure-specific sub-entities, at
//! most one metadata chunk per file (via the file entity's own preview content, which the
//! content processor turns into a MetadataChunk), and — for small files — one full-content
//! implementation chunk.

use std::path::Path;

use crate::entity::{file_hash, Entity, EntityKind};
use crate::parsers::{extract_file_op_relations, file_entity_and_contains, ParseResult, Parser};

const PREVIEW_BYTES: usize = 1000;
/// Files at or under this size get a full-content implementation chunk in addition to the
/// entity-derived metadata chunk (small stylesheets/YAML, per §4.2).
const SMALL_FILE_IMPLEMENTATION_BYTES: usize = 4096;

fn preview(text: &str) -> String {
    if text.len() <= PREVIEW_BYTES {
        text.to_string()
    } else {
        let mut end = PREVIEW_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

fn maybe_full_content_chunk(file_entity: &Entity, text: &str) -> Option<crate::entity::Chunk> {
    if text.len() > SMALL_FILE_IMPLEMENTATION_BYTES {
        return None;
    }
    Some(crate::entity::Chunk::Implementation {
        entity_name: file_entity.name.clone(),
        entity_type: EntityKind::File,
        content: text.to_string(),
        file_path: file_entity.file_path.clone().unwrap_or_default(),
        start_line: 1,
        end_line: text.lines().count() as u32,
    })
}

fn base_result(abs_path_str: &str, source: &[u8]) -> (ParseResult, Entity) {
    let mut file_entity = Entity::file(abs_path_str.to_string());
    let text = String::from_utf8_lossy(source).to_string();
    file_entity.docstring = Some(preview(&text));
    let result = ParseResult {
        file_hash: file_hash(source),
        ..Default::default()
    };
    (result, file_entity)
}

fn finish(
    mut result: ParseResult,
    file_entity: Entity,
    sub_entities: Vec<Entity>,
    text: &str,
    abs_path_str: &str,
) -> ParseResult {
    if let Some(chunk) = maybe_full_content_chunk(&file_entity, text) {
        result.impl_chunks.push(chunk);
    }
    result.relations.extend(extract_file_op_relations(abs_path_str, text));
    let (_, contains) = file_entity_and_contains(abs_path_str, &sub_entities);
    result.relations.extend(contains);
    result.entities.push(file_entity);
    result.entities.extend(sub_entities);
    result
}

fn file_name_lower(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_lowercase()
}

pub struct JsonParser;

fn json_key_paths(value: &serde_json::Value, prefix: &str, depth: usize, out: &mut Vec<String>) {
    if depth > 3 {
        return;
    }
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            let path = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
            out.push(path.clone());
            json_key_paths(v, &path, depth + 1, out);
        }
    }
}

impl Parser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            let mut paths = Vec::new();
            json_key_paths(&value, "", 0, &mut paths);
            for path in paths {
                let mut e = Entity::new(path.clone(), EntityKind::Variable);
                e.file_path = Some(abs_path_str.clone());
                e.observations = vec![format!("JSON key path: {path}")];
                sub_entities.push(e);
            }

            let name = file_name_lower(abs_path);
            if name == "package.json" {
                if let Some(pkg_name) = value.get("name").and_then(|v| v.as_str()) {
                    let mut e = Entity::new(format!("package:{pkg_name}"), EntityKind::Module);
                    e.file_path = Some(abs_path_str.clone());
                    e.observations = vec![format!("npm package: {pkg_name}")];
                    if let Some(v) = value.get("version").and_then(|v| v.as_str()) {
                        e.metadata.insert("version".into(), serde_json::json!(v));
                    }
                    sub_entities.push(e);
                }
                for dep_key in ["dependencies", "devDependencies"] {
                    if let Some(deps) = value.get(dep_key).and_then(|v| v.as_object()) {
                        for (dep, version) in deps {
                            let mut e = Entity::new(format!("dependency:{dep}"), EntityKind::Import);
                            e.file_path = Some(abs_path_str.clone());
                            e.observations = vec![format!("{dep_key} dependency: {dep} {version}")];
                            sub_entities.push(e);
                        }
                    }
                }
            } else if name == "tsconfig.json" {
                if let Some(opts) = value.get("compilerOptions").and_then(|v| v.as_object()) {
                    let mut e = Entity::new("compilerOptions", EntityKind::Constant);
                    e.file_path = Some(abs_path_str.clone());
                    e.observations = vec![format!("{} compiler options", opts.len())];
                    sub_entities.push(e);
                }
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct YamlParser;

impl Parser for YamlParser {
    fn name(&self) -> &'static str {
        "yaml"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["yaml", "yml"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        if let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&text) {
            if let serde_yaml::Value::Mapping(map) = &value {
                for (k, _) in map {
                    if let Some(key) = k.as_str() {
                        let mut e = Entity::new(key.to_string(), EntityKind::Module);
                        e.file_path = Some(abs_path_str.clone());
                        e.observations = vec![format!("YAML top-level key: {key}")];
                        sub_entities.push(e);
                    }
                }

                let is_compose = map.get("services").is_some()
                    && (file_name_lower(abs_path).contains("compose") || map.get("version").is_some());
                if is_compose {
                    if let Some(serde_yaml::Value::Mapping(services)) =
                        map.get("services").map(|v| v.to_owned())
                    {
                        for (k, _) in &services {
                            if let Some(name) = k.as_str() {
                                let mut e = Entity::new(format!("service:{name}"), EntityKind::Module);
                                e.file_path = Some(abs_path_str.clone());
                                e.observations = vec![format!("Docker Compose service: {name}")];
                                sub_entities.push(e);
                            }
                        }
                    }
                }

                let is_k8s_manifest = map.get("apiVersion").is_some() && map.get("kind").is_some();
                if is_k8s_manifest {
                    if let Some(kind) = map.get("kind").and_then(|v| v.as_str()) {
                        let name = map
                            .get("metadata")
                            .and_then(|m| m.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("unnamed");
                        let mut e = Entity::new(format!("{kind}:{name}"), EntityKind::Module);
                        e.file_path = Some(abs_path_str.clone());
                        e.observations = vec![format!("Kubernetes {kind}: {name}")];
                        sub_entities.push(e);
                    }
                }

                let rel = abs_path.to_string_lossy();
                if rel.contains(".github/workflows/") {
                    if let Some(serde_yaml::Value::Mapping(jobs)) =
                        map.get("jobs").map(|v| v.to_owned())
                    {
                        for (k, _) in &jobs {
                            if let Some(name) = k.as_str() {
                                let mut e = Entity::new(format!("job:{name}"), EntityKind::Test);
                                e.file_path = Some(abs_path_str.clone());
                                e.observations = vec![format!("GitHub Actions job: {name}")];
                                sub_entities.push(e);
                            }
                        }
                    }
                }
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct CssParser;

impl Parser for CssParser {
    fn name(&self) -> &'static str {
        "css"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["css", "scss", "less"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(selector) = trimmed.strip_suffix('{') {
                let selector = selector.trim();
                if !selector.is_empty() && !selector.starts_with("//") {
                    let mut e = Entity::new(selector.to_string(), EntityKind::Module);
                    e.file_path = Some(abs_path_str.clone());
                    e.observations = vec![format!("CSS selector: {selector}")];
                    sub_entities.push(e);
                }
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct HtmlParser;

impl Parser for HtmlParser {
    fn name(&self) -> &'static str {
        "html"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["html", "htm"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        let mut search_from = 0usize;
        while let Some(pos) = text[search_from..].find("id=\"") {
            let start = search_from + pos + 4;
            if let Some(end) = text[start..].find('"') {
                let id = &text[start..start + end];
                if !id.is_empty() {
                    let mut e = Entity::new(format!("#{id}"), EntityKind::Module);
                    e.file_path = Some(abs_path_str.clone());
                    e.observations = vec![format!("HTML element id: {id}")];
                    sub_entities.push(e);
                }
                search_from = start + end;
            } else {
                break;
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct IniParser;

impl Parser for IniParser {
    fn name(&self) -> &'static str {
        "ini"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["ini", "cfg", "conf"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        let mut section = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].to_string();
                let mut e = Entity::new(section.clone(), EntityKind::Module);
                e.file_path = Some(abs_path_str.clone());
                e.observations = vec![format!("INI section: {section}")];
                sub_entities.push(e);
            } else if let Some((key, _)) = trimmed.split_once('=') {
                let key = key.trim();
                if !key.is_empty() && !trimmed.starts_with(';') && !trimmed.starts_with('#') {
                    let name = if section.is_empty() { key.to_string() } else { format!("{section}.{key}") };
                    let mut e = Entity::new(name.clone(), EntityKind::Variable);
                    e.file_path = Some(abs_path_str.clone());
                    e.observations = vec![format!("INI key: {name}")];
                    sub_entities.push(e);
                }
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct CsvParser;

impl Parser for CsvParser {
    fn name(&self) -> &'static str {
        "csv"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        if let Some(header_line) = text.lines().next() {
            for column in header_line.split(',') {
                let column = column.trim().trim_matches('"');
                if !column.is_empty() {
                    let mut e = Entity::new(format!("column:{column}"), EntityKind::Variable);
                    e.file_path = Some(abs_path_str.clone());
                    e.observations = vec![format!("CSV column: {column}")];
                    sub_entities.push(e);
                }
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct ProtoParser;

impl Parser for ProtoParser {
    fn name(&self) -> &'static str {
        "proto"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["proto"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();

        let mut sub_entities = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            for (prefix, kind) in [("message ", EntityKind::Class), ("service ", EntityKind::Class), ("enum ", EntityKind::Class)] {
                if let Some(rest) = trimmed.strip_prefix(prefix) {
                    let name = rest.split(|c: char| c == '{' || c.is_whitespace()).next().unwrap_or("");
                    if !name.is_empty() {
                        let mut e = Entity::new(name.to_string(), kind);
                        e.file_path = Some(abs_path_str.clone());
                        e.observations = vec![format!("{}{}", prefix.trim(), format!(" {name}"))];
                        sub_entities.push(e);
                    }
                }
            }
        }

        finish(result, file_entity, sub_entities, &text, &abs_path_str)
    }
}

pub struct PlainTextParser;

impl Parser for PlainTextParser {
    fn name(&self) -> &'static str {
        "plaintext"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "log"]
    }
    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let (result, file_entity) = base_result(&abs_path_str, source);
        let text = String::from_utf8_lossy(source).to_string();
        finish(result, file_entity, Vec::new(), &text, &abs_path_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_key_paths_are_extracted() {
        let parser = JsonParser;
        let src = br#"{"a": {"b": 1}, "c": 2}"#;
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/x.json"), "x.json", src);
        assert!(result.entities.iter().any(|e| e.name == "a"));
        assert!(result.entities.iter().any(|e| e.name == "a.b"));
        assert!(result.entities.iter().any(|e| e.name == "c"));
    }

    #[test]
    fn package_json_yields_dependency_entities() {
        let parser = JsonParser;
        let src = br#"{"name": "demo", "dependencies": {"serde": "1.0"}}"#;
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/package.json"), "package.json", src);
        assert!(result.entities.iter().any(|e| e.name == "dependency:serde"));
    }

    #[test]
    fn small_yaml_gets_a_full_content_chunk() {
        let parser = YamlParser;
        let src = b"key: value\nother: 1\n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/x.yaml"), "x.yaml", src);
        assert_eq!(result.impl_chunks.len(), 1);
    }

    #[test]
    fn csv_header_becomes_column_entities() {
        let parser = CsvParser;
        let src = b"name,age\nalice,30\n";
        let result = parser.parse(Path::new("/repo"), Path::new("/repo/people.csv"), "people.csv", src);
        assert!(result.entities.iter().any(|e| e.name == "column:name"));
    }
}
