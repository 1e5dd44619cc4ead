use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::graph::{MergeAction, RELATIONSHIP_TYPES};

/// Entity record as the extraction model emits it (stage A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityExtraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
}

/// Relationship record as the extraction model emits it (stage B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationshipExtraction {
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

/// Slimmed record sent to and returned by the Definer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefinitionBatch {
    #[serde(default)]
    pub entities: Vec<RefinedEntity>,
}

/// The resolver's raw verdict for one entity against its candidates.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionReply {
    pub action: MergeAction,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

pub fn entity_extraction_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "type": { "type": "string" },
                        "description": { "type": "string" },
                        "aliases": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["id", "name", "type", "description", "aliases"]
                }
            }
        },
        "required": ["entities"]
    })
}

pub fn relationship_extraction_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "source_id": { "type": "string" },
                        "target_id": { "type": "string" },
                        "type": { "type": "string", "enum": RELATIONSHIP_TYPES },
                        "description": { "type": "string" },
                        "confidence": { "type": "number" }
                    },
                    "required": ["source_id", "target_id", "type", "description", "confidence"]
                }
            }
        },
        "required": ["relationships"]
    })
}

pub fn definition_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "type": { "type": "string" }
                    },
                    "required": ["id", "name", "type"]
                }
            }
        },
        "required": ["entities"]
    })
}

pub fn resolution_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "action": { "type": "string", "enum": ["MERGE", "CREATE"] },
            "target_id": { "type": "string" },
            "confidence": { "type": "number" },
            "rationale": { "type": "string" }
        },
        "required": ["action", "target_id", "confidence", "rationale"]
    })
}

pub fn preparse_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "title": { "type": "string" },
            "authors": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": { "type": "string" },
                        "affiliation": { "type": "string" },
                        "email": { "type": "string" }
                    },
                    "required": ["name", "affiliation", "email"]
                }
            },
            "abstract": { "type": "string" },
            "keywords": { "type": "array", "items": { "type": "string" } },
            "main_findings": { "type": "array", "items": { "type": "string" } },
            "methodology": { "type": "string" },
            "results": { "type": "string" },
            "discussion": { "type": "string" },
            "references": { "type": "array", "items": { "type": "string" } },
            "publication": { "type": "string" }
        },
        "required": [
            "title", "authors", "abstract", "keywords", "main_findings",
            "methodology", "results", "discussion", "references", "publication"
        ]
    })
}
