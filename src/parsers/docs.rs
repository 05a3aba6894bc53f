//! Markdown documentation parser (§4.2): one entity per header, plus link and code-block
//! entities, with a metadata-preview / full-section dual chunk per header.

use std::path::Path;

use crate::entity::{file_hash, Entity, EntityKind};
use crate::parsers::{extract_file_op_relations, file_entity_and_contains, implementation_chunk_for_entity, ParseResult, Parser};

pub struct MarkdownParser;

struct Header {
    level: u32,
    title: String,
    start_line: u32, // 1-based
}

fn find_headers(text: &str) -> Vec<Header> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#') {
            continue;
        }
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level == 0 || level > 6 {
            continue;
        }
        let rest = trimmed[level..].trim();
        if rest.is_empty() {
            continue;
        }
        out.push(Header {
            level: level as u32,
            title: rest.to_string(),
            start_line: idx as u32 + 1,
        });
    }
    out
}

fn section_body(lines: &[&str], start_line_1idx: u32, next_header_start: Option<u32>) -> String {
    let start = start_line_1idx as usize; // first body line is the line AFTER the header line.
    let end = next_header_start.map(|n| n as usize - 1).unwrap_or(lines.len());
    if start >= lines.len() {
        return String::new();
    }
    lines[start..end.min(lines.len())].join("\n")
}

fn find_links(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = text[i + 1..].find(']') {
                let label_end = i + 1 + close;
                if text.as_bytes().get(label_end + 1) == Some(&b'(') {
                    if let Some(paren_close) = text[label_end + 2..].find(')') {
                        let url_end = label_end + 2 + paren_close;
                        let label = text[i + 1..label_end].to_string();
                        let url = text[label_end + 2..url_end].to_string();
                        if !label.is_empty() && !url.is_empty() {
                            out.push((label, url));
                        }
                        i = url_end;
                    }
                }
            }
        }
        i += 1;
    }
    out
}

fn find_code_blocks(lines: &[&str]) -> Vec<(u32, u32, String)> {
    let mut out = Vec::new();
    let mut fence_start: Option<(u32, String)> = None;
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            match fence_start.take() {
                Some((start, lang)) => out.push((start, idx as u32 + 1, lang)),
                None => fence_start = Some((idx as u32 + 1, trimmed.trim_start_matches('`').trim().to_string())),
            }
        }
    }
    out
}

impl Parser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown", "mdx"]
    }

    fn parse(&self, project_root: &Path, abs_path: &Path, rel_path: &str, source: &[u8]) -> ParseResult {
        let _ = (project_root, rel_path);
        let abs_path_str = abs_path.to_string_lossy().replace('\\', "/");
        let mut result = ParseResult {
            file_hash: file_hash(source),
            ..Default::default()
        };

        let text = String::from_utf8_lossy(source).to_string();
        let lines: Vec<&str> = text.lines().collect();
        let headers = find_headers(&text);

        let mut sub_entities = Vec::new();

        for (i, header) in headers.iter().enumerate() {
            let next_start = headers.get(i + 1).map(|h| h.start_line);
            let body = section_body(&lines, header.start_line, next_start);

            let mut entity = Entity::new(header.title.clone(), EntityKind::Documentation);
            entity.file_path = Some(abs_path_str.clone());
            entity.line_start = Some(header.start_line);
            entity.line_end = Some(next_start.map(|n| n - 1).unwrap_or(lines.len() as u32));
            entity.signature = Some(format!("{} {}", "#".repeat(header.level as usize), header.title));
            entity.docstring = body.lines().find(|l| !l.trim().is_empty()).map(|s| s.trim().to_string());
            entity.observations = vec![format!("Section: {}", header.title)];
            entity.metadata.insert("level".into(), serde_json::json!(header.level));

            result.impl_chunks.push(implementation_chunk_for_entity(&entity, &body));
            sub_entities.push(entity);
        }

        for (label, url) in find_links(&text) {
            let mut entity = Entity::new(format!("link:{label}"), EntityKind::Module);
            entity.file_path = Some(abs_path_str.clone());
            entity.observations = vec![format!("Link: {label} -> {url}")];
            entity.metadata.insert("url".into(), serde_json::json!(url));
            sub_entities.push(entity);
        }

        for (idx, (start, end, lang)) in find_code_blocks(&lines).into_iter().enumerate() {
            let mut entity = Entity::new(format!("code_block:{idx}"), EntityKind::Module);
            entity.file_path = Some(abs_path_str.clone());
            entity.line_start = Some(start);
            entity.line_end = Some(end);
            entity.observations = vec![format!("Code block ({lang})")];
            entity.metadata.insert("language".into(), serde_json::json!(lang));
            sub_entities.push(entity);
        }

        result.relations.extend(extract_file_op_relations(&abs_path_str, &text));

        let (file_entity, contains) = file_entity_and_contains(&abs_path_str, &sub_entities);
        result.relations.extend(contains);
        result.entities.push(file_entity);
        result.entities.extend(sub_entities);

        result
    }
}
