use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use crate::ai::llm::{ChatModel, ChatRequest, from_structured};
use crate::ai::schemas::{DefinitionBatch, RefinedEntity, definition_schema};
use crate::graph::{GraphData, STANDARD_ENTITY_TYPES};

pub const DEFINE_BATCH_SIZE: usize = 50;

const DEFINE_SYSTEM_PROMPT: &str = "You refine entity records extracted from an academic paper. \
For every input entity return the same id with a corrected name and a type chosen from the \
standardized set below. Never invent or drop entities.";

/// Batched type refinement. Only `type` and `name` may change; ids,
/// descriptions, aliases and metadata pass through untouched. A model or
/// parse failure on any batch is fatal for the stage.
pub struct Definer {
    model: Arc<dyn ChatModel>,
}

impl Definer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn define(&self, graph: GraphData) -> Result<GraphData> {
        if graph.entities.is_empty() {
            return Ok(graph);
        }

        let mut refined: HashMap<String, RefinedEntity> = HashMap::new();
        for batch in graph.entities.chunks(DEFINE_BATCH_SIZE) {
            let records: Vec<_> = batch
                .iter()
                .map(|e| json!({ "id": e.id, "name": e.name, "type": e.entity_type }))
                .collect();
            let system = format!(
                "{DEFINE_SYSTEM_PROMPT}\n\nStandardized types: {}",
                STANDARD_ENTITY_TYPES.join(", ")
            );
            let user = serde_json::to_string_pretty(&json!({ "entities": records }))?;

            let reply = self
                .model
                .structured_json(ChatRequest {
                    system: &system,
                    user: &user,
                    schema_name: "entity_definition",
                    schema: definition_schema(),
                })
                .await
                .with_context(|| "definition batch failed")?;
            let parsed: DefinitionBatch = from_structured(reply)?;

            for record in parsed.entities {
                refined.insert(record.id.clone(), record);
            }
        }

        let entities = graph
            .entities
            .into_iter()
            .map(|mut entity| {
                match refined.get(&entity.id) {
                    Some(record) => {
                        entity.name = record.name.clone();
                        entity.entity_type = record.entity_type.clone();
                    }
                    None => {
                        warn!(id = %entity.id, "definer returned no record for entity; keeping original");
                    }
                }
                entity
            })
            .collect::<Vec<_>>();

        debug!(entities = entities.len(), "definition complete");

        Ok(GraphData {
            entities,
            relationships: graph.relationships,
            referenced_entity_ids: graph.referenced_entity_ids,
        })
    }
}
