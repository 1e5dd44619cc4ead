use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_version() -> i64 {
    1
}

/// A node in the knowledge graph. Ids are application-assigned slugs and
/// stay stable across Define and Canonicalize; Integration may remap them
/// onto pre-existing store ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_version")]
    pub version: i64,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
            description: None,
            aliases: None,
            metadata: None,
            embedding: None,
            version: 1,
        }
    }
}

/// A directed edge between two entity ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_paper_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            rel_type: rel_type.into(),
            description: None,
            confidence: None,
            source_paper_id: None,
            metadata: None,
        }
    }
}

/// The graph fragment produced by one pipeline run.
///
/// `referenced_entity_ids` lists store ids that relationships point at but
/// that are not carried in `entities`; the store treats those as resolved
/// rather than orphaned endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub referenced_entity_ids: BTreeSet<String>,
}

impl GraphData {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeAction {
    #[serde(rename = "MERGE")]
    Merge,
    #[serde(rename = "CREATE")]
    Create,
}

/// The resolver's verdict for one new entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDecision {
    pub entity_id: String,
    pub action: MergeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Structured paper metadata used to steer the extraction prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparsedPaperContext {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<PaperAuthor>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub main_findings: Vec<String>,
    #[serde(default)]
    pub methodology: String,
    #[serde(default)]
    pub results: String,
    #[serde(default)]
    pub discussion: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub publication: String,
}
