use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::graph::{Entity, GraphData, Relationship};

use super::{
    DocumentStatus, EntityTypeCount, GraphStore, GraphSummary, UpsertSummary,
    filter_persistable_relationships,
};

/// In-memory store with the same upsert semantics as the Postgres
/// implementation (version bumps, triple uniqueness, orphan filtering).
/// Candidate retrieval is seeded explicitly, which keeps workflow tests
/// deterministic without an embedding provider.
#[derive(Default)]
pub struct InMemoryGraphStore {
    entities: Mutex<HashMap<String, Entity>>,
    relationships: Mutex<Vec<Relationship>>,
    documents: Mutex<HashMap<String, DocumentStatus>>,
    candidates: Mutex<HashMap<String, Vec<Entity>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the similar-entity response for a given probe id.
    pub fn set_candidates(&self, probe_id: impl Into<String>, candidates: Vec<Entity>) {
        self.candidates
            .lock()
            .expect("candidates lock")
            .insert(probe_id.into(), candidates);
    }

    /// Pre-load an entity as if a previous run had persisted it.
    pub fn seed_entity(&self, entity: Entity) {
        self.entities
            .lock()
            .expect("entities lock")
            .insert(entity.id.clone(), entity);
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.lock().expect("entities lock").get(id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().expect("entities lock").len()
    }

    pub fn relationships_snapshot(&self) -> Vec<Relationship> {
        self.relationships.lock().expect("relationships lock").clone()
    }

    pub fn document_status(&self, path: &str) -> Option<DocumentStatus> {
        self.documents.lock().expect("documents lock").get(path).copied()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_graph(&self, graph: &GraphData) -> Result<UpsertSummary> {
        if graph.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let (persistable, dropped) = filter_persistable_relationships(graph);

        {
            let mut entities = self.entities.lock().expect("entities lock");
            for incoming in &graph.entities {
                match entities.get_mut(&incoming.id) {
                    Some(existing) => {
                        let version = existing.version + 1;
                        *existing = incoming.clone();
                        existing.version = version;
                    }
                    None => {
                        let mut created = incoming.clone();
                        created.version = 1;
                        entities.insert(created.id.clone(), created);
                    }
                }
            }
        }

        let mut persisted = 0usize;
        {
            let mut relationships = self.relationships.lock().expect("relationships lock");
            for rel in persistable {
                let duplicate = relationships.iter().any(|existing| {
                    existing.source_id == rel.source_id
                        && existing.target_id == rel.target_id
                        && existing.rel_type == rel.rel_type
                });
                if !duplicate {
                    relationships.push(rel);
                    persisted += 1;
                }
            }
        }

        Ok(UpsertSummary {
            entities_upserted: graph.entities.len(),
            relationships_persisted: persisted,
            relationships_dropped: dropped,
        })
    }

    async fn fetch_similar_entities(&self, entity: &Entity, k: usize) -> Result<Vec<Entity>> {
        let canned = self
            .candidates
            .lock()
            .expect("candidates lock")
            .get(&entity.id)
            .cloned()
            .unwrap_or_default();
        Ok(canned
            .into_iter()
            .filter(|candidate| candidate.id != entity.id)
            .take(k)
            .collect())
    }

    async fn fetch_similar_entities_batch(
        &self,
        entities: &[Entity],
    ) -> Result<HashMap<String, Vec<Entity>>> {
        let mut out = HashMap::new();
        for entity in entities {
            let found = self.fetch_similar_entities(entity, 5).await?;
            if !found.is_empty() {
                out.insert(entity.id.clone(), found);
            }
        }
        Ok(out)
    }

    async fn record_document(&self, path: &str, _checksum: Option<&str>) -> Result<()> {
        self.documents
            .lock()
            .expect("documents lock")
            .entry(path.to_string())
            .or_insert(DocumentStatus::Pending);
        Ok(())
    }

    async fn mark_document(&self, path: &str, status: DocumentStatus) -> Result<()> {
        self.documents
            .lock()
            .expect("documents lock")
            .insert(path.to_string(), status);
        Ok(())
    }

    async fn summarize(&self, top_k: usize) -> Result<GraphSummary> {
        let entities = self.entities.lock().expect("entities lock");
        let relationships = self.relationships.lock().expect("relationships lock");

        let mut counts: HashMap<String, i64> = HashMap::new();
        for entity in entities.values() {
            *counts.entry(entity.entity_type.clone()).or_default() += 1;
        }
        let mut top_entity_types: Vec<EntityTypeCount> = counts
            .into_iter()
            .map(|(entity_type, count)| EntityTypeCount { entity_type, count })
            .collect();
        top_entity_types.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.entity_type.cmp(&b.entity_type))
        });
        top_entity_types.truncate(top_k);

        Ok(GraphSummary {
            total_entities: entities.len() as i64,
            total_relationships: relationships.len() as i64,
            top_entity_types,
        })
    }

    async fn close(&self) {}
}
