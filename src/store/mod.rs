use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::graph::{Entity, GraphData, Relationship};

mod memory;
mod postgres;

pub use memory::InMemoryGraphStore;
pub use postgres::PgGraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }
}

/// What one `upsert_graph` call actually wrote.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub entities_upserted: usize,
    pub relationships_persisted: usize,
    pub relationships_dropped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSummary {
    pub total_entities: i64,
    pub total_relationships: i64,
    pub top_entity_types: Vec<EntityTypeCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeCount {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub count: i64,
}

/// Persistence contract shared by the Postgres store and the in-memory
/// test double. The pool behind an implementation is a process-wide
/// resource; workflows never close it.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ensure the schema exists. No-op when migrations already ran.
    async fn init(&self) -> Result<()>;

    /// Idempotently persist a fragment. Orphan relationships are dropped
    /// with a warning; conflicting entity upserts bump `version`.
    async fn upsert_graph(&self, graph: &GraphData) -> Result<UpsertSummary>;

    /// Up to `k` potential duplicates of `entity`, nearest first, never
    /// including `entity.id` itself.
    async fn fetch_similar_entities(&self, entity: &Entity, k: usize) -> Result<Vec<Entity>>;

    /// Batch candidate retrieval; inputs with no candidates are omitted.
    async fn fetch_similar_entities_batch(
        &self,
        entities: &[Entity],
    ) -> Result<HashMap<String, Vec<Entity>>>;

    async fn record_document(&self, path: &str, checksum: Option<&str>) -> Result<()>;

    async fn mark_document(&self, path: &str, status: DocumentStatus) -> Result<()>;

    async fn summarize(&self, top_k: usize) -> Result<GraphSummary>;

    /// Release the connection pool. Called once at process exit.
    async fn close(&self);
}

/// Drop relationships whose endpoints resolve neither to a fragment entity
/// nor to a disclosed pre-existing store id, plus any self-loop. Returns
/// the survivors and the number dropped.
pub fn filter_persistable_relationships(graph: &GraphData) -> (Vec<Relationship>, usize) {
    let known: HashSet<&str> = graph
        .entities
        .iter()
        .map(|e| e.id.as_str())
        .chain(graph.referenced_entity_ids.iter().map(String::as_str))
        .collect();

    let mut kept = Vec::with_capacity(graph.relationships.len());
    let mut dropped = 0usize;
    for rel in &graph.relationships {
        if rel.source_id == rel.target_id {
            warn!(
                source = %rel.source_id,
                rel_type = %rel.rel_type,
                "dropping self-loop relationship"
            );
            dropped += 1;
            continue;
        }
        if !known.contains(rel.source_id.as_str()) || !known.contains(rel.target_id.as_str()) {
            warn!(
                source = %rel.source_id,
                target = %rel.target_id,
                rel_type = %rel.rel_type,
                "dropping orphan relationship"
            );
            dropped += 1;
            continue;
        }
        kept.push(rel.clone());
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn orphans_and_self_loops_are_dropped() {
        let graph = GraphData {
            entities: vec![Entity::new("a", "A", "Concept")],
            relationships: vec![
                Relationship::new("a", "b", "uses"),
                Relationship::new("a", "a", "uses"),
            ],
            referenced_entity_ids: BTreeSet::new(),
        };
        let (kept, dropped) = filter_persistable_relationships(&graph);
        assert!(kept.is_empty());
        assert_eq!(dropped, 2);
    }

    #[test]
    fn referenced_ids_rescue_merge_targets() {
        let mut referenced = BTreeSet::new();
        referenced.insert("3d_gaussian_splatting".to_string());
        let graph = GraphData {
            entities: vec![Entity::new("psnr", "PSNR", "Metric")],
            relationships: vec![Relationship::new("3d_gaussian_splatting", "psnr", "achieves")],
            referenced_entity_ids: referenced,
        };
        let (kept, dropped) = filter_persistable_relationships(&graph);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 0);
    }
}
