//! Immutable data types for entities, relations, and chunks: identity and payload rules.
//!
//! Entities and relations never mutate in place; "replacing" one means constructing a new
//! value that happens to carry the same id. See `Chunk` for the three storable chunk variants
//! plus the external `Chat` boundary variant.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Directory,
    File,
    Class,
    Function,
    Method,
    Variable,
    Import,
    Module,
    Constant,
    Documentation,
    Test,
    ChatHistory,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Directory => "directory",
            EntityKind::File => "file",
            EntityKind::Class => "class",
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Variable => "variable",
            EntityKind::Import => "import",
            EntityKind::Module => "module",
            EntityKind::Constant => "constant",
            EntityKind::Documentation => "documentation",
            EntityKind::Test => "test",
            EntityKind::ChatHistory => "chat_history",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Contains,
    Imports,
    Inherits,
    Calls,
    Uses,
    Implements,
    Extends,
    Documents,
    Tests,
    References,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Contains => "contains",
            RelationKind::Imports => "imports",
            RelationKind::Inherits => "inherits",
            RelationKind::Calls => "calls",
            RelationKind::Uses => "uses",
            RelationKind::Implements => "implements",
            RelationKind::Extends => "extends",
            RelationKind::Documents => "documents",
            RelationKind::Tests => "tests",
            RelationKind::References => "references",
        }
    }

    /// `references`/`uses` relations read naturally in either direction; display layers may
    /// choose to show them unordered. Storage and orphan-cleanup treat every relation the same.
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, RelationKind::References | RelationKind::Uses)
    }
}

/// An indexed unit of code or text. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub observations: Vec<String>,
    pub file_path: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub docstring: Option<String>,
    pub signature: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        let name = name.into();
        let mut observations = Vec::new();
        observations.push(format!("{} entity: {}", kind.as_str(), name));
        Self {
            name,
            kind,
            observations,
            file_path: None,
            line_start: None,
            line_end: None,
            docstring: None,
            signature: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.file_path {
            Some(fp) => format!("{fp}::{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Immutable "update": returns a new entity with one more observation appended.
    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observations.push(observation.into());
        self
    }

    pub fn file(abs_path: impl Into<String>) -> Self {
        let abs_path = abs_path.into();
        let mut e = Entity::new(abs_path.clone(), EntityKind::File);
        e.file_path = Some(abs_path.clone());
        e.observations = vec![format!("File: {abs_path}")];
        e
    }

    pub fn function(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        let name = name.into();
        let mut e = Entity::new(name.clone(), EntityKind::Function);
        e.file_path = Some(file_path.into());
        e.observations = vec![format!("Function: {name}")];
        e
    }

    pub fn class(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        let name = name.into();
        let mut e = Entity::new(name.clone(), EntityKind::Class);
        e.file_path = Some(file_path.into());
        e.observations = vec![format!("Class: {name}")];
        e
    }
}

/// A directed edge between two entity names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
    pub context: Option<String>,
    pub confidence: f32,
    pub metadata: BTreeMap<String, Value>,
}

impl Relation {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            context: None,
            confidence: 1.0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        debug_assert!((0.0..=1.0).contains(&confidence));
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_import_type(mut self, import_type: impl Into<String>) -> Self {
        self.metadata
            .insert("import_type".to_string(), Value::String(import_type.into()));
        self
    }

    pub fn import_type(&self) -> Option<&str> {
        self.metadata.get("import_type").and_then(Value::as_str)
    }

    pub fn reverse(&self) -> Relation {
        Relation {
            from: self.to.clone(),
            to: self.from.clone(),
            kind: self.kind,
            context: self.context.clone(),
            confidence: self.confidence,
            metadata: self.metadata.clone(),
        }
    }

    pub fn contains(file_entity: impl Into<String>, child: impl Into<String>) -> Self {
        Relation::new(file_entity, child, RelationKind::Contains)
    }

    pub fn imports(from: impl Into<String>, to: impl Into<String>) -> Self {
        Relation::new(from, to, RelationKind::Imports)
    }

    pub fn calls(from: impl Into<String>, to: impl Into<String>) -> Self {
        Relation::new(from, to, RelationKind::Calls).with_confidence(0.7)
    }

    pub fn inherits(from: impl Into<String>, to: impl Into<String>) -> Self {
        Relation::new(from, to, RelationKind::Inherits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Metadata,
    Implementation,
    Relation,
    Chat,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Metadata => "metadata",
            ChunkKind::Implementation => "implementation",
            ChunkKind::Relation => "relation",
            ChunkKind::Chat => "chat",
        }
    }
}

/// The unit stored in the vector backend. Three variants are produced by the core pipeline;
/// `Chat` exists only so the store adapter and payload schema have one shared representation
/// for the external chat-ingestion boundary (never constructed by parsers or the processor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Chunk {
    Metadata {
        entity_name: String,
        entity_type: EntityKind,
        content: String,
        file_path: String,
        line_number: u32,
        end_line_number: u32,
        has_implementation: bool,
    },
    Implementation {
        entity_name: String,
        entity_type: EntityKind,
        content: String,
        file_path: String,
        start_line: u32,
        end_line: u32,
    },
    Relation {
        from: String,
        to: String,
        kind: RelationKind,
        content: String,
        import_type: Option<String>,
        context: Option<String>,
        confidence: Option<f32>,
    },
    Chat {
        chat_id: String,
        chunk_type: String,
        content: String,
    },
}

impl Chunk {
    pub fn kind(&self) -> ChunkKind {
        match self {
            Chunk::Metadata { .. } => ChunkKind::Metadata,
            Chunk::Implementation { .. } => ChunkKind::Implementation,
            Chunk::Relation { .. } => ChunkKind::Relation,
            Chunk::Chat { .. } => ChunkKind::Chat,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Chunk::Metadata { content, .. }
            | Chunk::Implementation { content, .. }
            | Chunk::Relation { content, .. }
            | Chunk::Chat { content, .. } => content,
        }
    }

    pub fn entity_name(&self) -> &str {
        match self {
            Chunk::Metadata { entity_name, .. } => entity_name,
            Chunk::Implementation { entity_name, .. } => entity_name,
            Chunk::Relation { from, .. } => from,
            Chunk::Chat { chat_id, .. } => chat_id,
        }
    }

    /// The deterministic chunk id string (before point-id hashing). See `point_id`.
    pub fn id(&self) -> String {
        match self {
            Chunk::Metadata {
                file_path,
                entity_name,
                ..
            } => format!("{file_path}::{entity_name}::metadata"),
            Chunk::Implementation {
                file_path,
                entity_name,
                ..
            } => format!("{file_path}::{entity_name}::implementation"),
            Chunk::Relation {
                from,
                to,
                kind,
                import_type,
                ..
            } => match import_type {
                Some(it) => format!("{from}::{}::{to}::{it}", kind.as_str()),
                None => format!("{from}::{}::{to}", kind.as_str()),
            },
            Chunk::Chat { chat_id, chunk_type, .. } => format!("chat::{chat_id}::{chunk_type}"),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(self.content())
    }

    /// First 8 bytes of SHA-256(id), interpreted as an unsigned 64-bit integer: the point id
    /// used by the vector store.
    pub fn point_id(&self) -> u64 {
        point_id_for(&self.id())
    }

    pub fn from_relation(relation: &Relation) -> Chunk {
        let sentence = format!("{} {} {}", relation.from, relation.kind.as_str(), relation.to);
        Chunk::Relation {
            from: relation.from.clone(),
            to: relation.to.clone(),
            kind: relation.kind,
            content: sentence,
            import_type: relation.import_type().map(str::to_string),
            context: relation.context.clone(),
            confidence: Some(relation.confidence),
        }
    }

    pub fn create_metadata(entity: &Entity, has_implementation: bool) -> Chunk {
        let mut lines = Vec::new();
        if let Some(sig) = &entity.signature {
            lines.push(sig.clone());
        } else {
            lines.push(entity.name.clone());
        }
        if let Some(doc) = &entity.docstring {
            lines.push(doc.clone());
        }
        for obs in entity.observations.iter().take(3) {
            lines.push(obs.clone());
        }

        Chunk::Metadata {
            entity_name: entity.name.clone(),
            entity_type: entity.kind,
            content: lines.join("\n"),
            file_path: entity.file_path.clone().unwrap_or_default(),
            line_number: entity.line_start.unwrap_or(0),
            end_line_number: entity.line_end.unwrap_or(0),
            has_implementation,
        }
    }

    /// Full vector-point payload as specified by the on-disk contract: the common fields plus
    /// the variant-specific ones. `collection` and `type` are added by the caller (the content
    /// processor), not here, since this value has no notion of which collection it belongs to.
    pub fn to_vector_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("chunk_kind".into(), json!(self.kind().as_str()));
        payload.insert("content".into(), json!(self.content()));
        payload.insert("content_hash".into(), json!(self.content_hash()));

        match self {
            Chunk::Metadata {
                entity_name,
                entity_type,
                file_path,
                line_number,
                end_line_number,
                has_implementation,
                ..
            } => {
                payload.insert("entity_name".into(), json!(entity_name));
                payload.insert("entity_type".into(), json!(entity_type.as_str()));
                payload.insert("file_path".into(), json!(file_path));
                payload.insert("line_number".into(), json!(line_number));
                payload.insert("end_line_number".into(), json!(end_line_number));
                payload.insert("has_implementation".into(), json!(has_implementation));
            }
            Chunk::Implementation {
                entity_name,
                entity_type,
                file_path,
                start_line,
                end_line,
                ..
            } => {
                payload.insert("entity_name".into(), json!(entity_name));
                payload.insert("entity_type".into(), json!(entity_type.as_str()));
                payload.insert("file_path".into(), json!(file_path));
                payload.insert("start_line".into(), json!(start_line));
                payload.insert("end_line".into(), json!(end_line));
            }
            Chunk::Relation {
                from,
                to,
                kind,
                import_type,
                context,
                confidence,
                ..
            } => {
                payload.insert("entity_name".into(), json!(from));
                payload.insert("relation_target".into(), json!(to));
                payload.insert("relation_type".into(), json!(kind.as_str()));
                if let Some(it) = import_type {
                    payload.insert("import_type".into(), json!(it));
                }
                if let Some(ctx) = context {
                    payload.insert("context".into(), json!(ctx));
                }
                if let Some(conf) = confidence {
                    payload.insert("confidence".into(), json!(conf));
                }
            }
            Chunk::Chat { chat_id, chunk_type, .. } => {
                payload.insert("entity_name".into(), json!(chat_id));
                payload.insert("chunk_type_detail".into(), json!(chunk_type));
            }
        }

        payload
    }
}

pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

pub fn file_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}


pub fn point_id_for(id_string: &str) -> u64 {
    let digest = Sha256::digest(id_string.as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is >= 8 bytes"))
}

/// The fixed set of extensions that make a relation's `to` endpoint an "external file
/// reference" — kept alive by orphan cleanup even when no entity with that name exists.
pub const EXTERNAL_FILE_EXTENSIONS: &[&str] = &[
    "json", "csv", "txt", "xml", "yaml", "yml", "xlsx", "xls", "ini", "toml", "html", "css",
    "log", "md", "pdf", "doc", "docx", "png", "jpg", "jpeg", "gif", "svg", "bin", "dat",
];

pub fn is_external_file_reference(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => EXTERNAL_FILE_EXTENSIONS
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_and_implementation_ids_are_distinct_and_deterministic() {
        let entity = Entity::function("f", "/repo/a.py");
        let meta = Chunk::create_metadata(&entity, true);
        assert_eq!(meta.id(), "/repo/a.py::f::metadata");

        let meta2 = Chunk::create_metadata(&entity, true);
        assert_eq!(meta.id(), meta2.id());
        assert_eq!(meta.point_id(), meta2.point_id());
    }

    #[test]
    fn relation_id_includes_import_type_only_when_present() {
        let bare = Relation::imports("a.py", "b.py");
        assert_eq!(Chunk::from_relation(&bare).id(), "a.py::imports::b.py");

        let with_type = Relation::imports("a.py", "config.json").with_import_type("file_open");
        assert_eq!(
            Chunk::from_relation(&with_type).id(),
            "a.py::imports::config.json::file_open"
        );
    }

    #[test]
    fn external_file_reference_extension_set() {
        assert!(is_external_file_reference("config.json"));
        assert!(is_external_file_reference("notes.MD"));
        assert!(!is_external_file_reference("module"));
        assert!(!is_external_file_reference("pkg.internal_module"));
    }

    #[test]
    fn content_hash_is_stable_for_equal_content() {
        let a = content_hash("def f(): return 1");
        let b = content_hash("def f(): return 1");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("def f(): return 2"));
    }
}
