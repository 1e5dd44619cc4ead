use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use crate::ai::llm::{ChatModel, ChatRequest, from_structured};
use crate::ai::schemas::{ResolutionReply, resolution_schema};
use crate::graph::{Entity, GraphData, MergeAction, MergeDecision};

const RESOLVE_CONCURRENCY: usize = 10;

const RESOLVE_SYSTEM_PROMPT: &str = "You decide whether a newly extracted entity duplicates \
one already in a research knowledge graph. Reply MERGE with the existing entity's id when \
they denote the same thing (abbreviations, aliases and renamings count), otherwise CREATE. \
Report your confidence in [0, 1] and a one-sentence rationale.";

/// Outcome of resolving one fragment against the store: where every new id
/// ended up, and the decision trail that got it there.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    pub id_mapping: HashMap<String, String>,
    pub merge_log: Vec<MergeDecision>,
}

/// LLM adjudication over candidate duplicates. A model or parse failure on
/// one entity degrades that entity to CREATE with zero confidence; the
/// batch as a whole never fails.
pub struct EntityResolver {
    model: Arc<dyn ChatModel>,
}

impl EntityResolver {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn resolve(
        &self,
        graph: &GraphData,
        candidates: &HashMap<String, Vec<Entity>>,
    ) -> ResolutionOutcome {
        let futures: Vec<_> = graph
            .entities
            .iter()
            .map(|entity| {
                let candidates = candidates.get(&entity.id);
                async move {
                    match candidates {
                        None => MergeDecision {
                            entity_id: entity.id.clone(),
                            action: MergeAction::Create,
                            target_id: None,
                            confidence: 1.0,
                            rationale: "no similar entities in graph".to_string(),
                        },
                        Some(candidates) => self.adjudicate(entity, candidates).await,
                    }
                }
            })
            .collect();
        let decisions: Vec<MergeDecision> = stream::iter(futures)
            .buffer_unordered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        // restore fragment order; buffer_unordered completes out of order
        let mut by_id: HashMap<String, MergeDecision> = decisions
            .into_iter()
            .map(|d| (d.entity_id.clone(), d))
            .collect();

        let mut outcome = ResolutionOutcome::default();
        for entity in &graph.entities {
            let Some(decision) = by_id.remove(&entity.id) else {
                continue;
            };
            let resolved_id = match (&decision.action, &decision.target_id) {
                (MergeAction::Merge, Some(target)) => target.clone(),
                _ => entity.id.clone(),
            };
            outcome.id_mapping.insert(entity.id.clone(), resolved_id);
            outcome.merge_log.push(decision);
        }
        outcome
    }

    async fn adjudicate(&self, entity: &Entity, candidates: &[Entity]) -> MergeDecision {
        let user = build_resolution_prompt(entity, candidates);
        let reply = self
            .model
            .structured_json(ChatRequest {
                system: RESOLVE_SYSTEM_PROMPT,
                user: &user,
                schema_name: "merge_resolution",
                schema: resolution_schema(),
            })
            .await
            .and_then(from_structured::<ResolutionReply>);

        match reply {
            Ok(reply) => decision_from_reply(entity, candidates, reply),
            Err(err) => {
                warn!(entity = %entity.id, error = %err, "resolution failed; defaulting to CREATE");
                MergeDecision {
                    entity_id: entity.id.clone(),
                    action: MergeAction::Create,
                    target_id: None,
                    confidence: 0.0,
                    rationale: format!("resolution failed: {err:#}"),
                }
            }
        }
    }
}

/// Translate the raw reply into a decision, rejecting merge targets the
/// candidate list never offered (those ids may not exist in the store).
fn decision_from_reply(
    entity: &Entity,
    candidates: &[Entity],
    reply: ResolutionReply,
) -> MergeDecision {
    let confidence = reply.confidence.clamp(0.0, 1.0);
    match reply.action {
        MergeAction::Merge => {
            let target = reply
                .target_id
                .filter(|t| candidates.iter().any(|c| &c.id == t));
            match target {
                Some(target) => {
                    debug!(entity = %entity.id, target = %target, "merge resolved");
                    MergeDecision {
                        entity_id: entity.id.clone(),
                        action: MergeAction::Merge,
                        target_id: Some(target),
                        confidence,
                        rationale: reply.rationale,
                    }
                }
                None => {
                    warn!(entity = %entity.id, "merge verdict named an unknown target; creating instead");
                    MergeDecision {
                        entity_id: entity.id.clone(),
                        action: MergeAction::Create,
                        target_id: None,
                        confidence: 0.0,
                        rationale: "merge target was not among the candidates".to_string(),
                    }
                }
            }
        }
        MergeAction::Create => MergeDecision {
            entity_id: entity.id.clone(),
            action: MergeAction::Create,
            target_id: None,
            confidence,
            rationale: reply.rationale,
        },
    }
}

fn build_resolution_prompt(entity: &Entity, candidates: &[Entity]) -> String {
    let mut prompt = String::from("New entity:\n");
    let _ = writeln!(
        prompt,
        "{}",
        serde_json::to_string_pretty(&json!({
            "id": entity.id,
            "name": entity.name,
            "type": entity.entity_type,
            "description": entity.description,
            "aliases": entity.aliases,
        }))
        .unwrap_or_default()
    );
    let _ = writeln!(prompt, "\nExisting candidates:");
    for candidate in candidates {
        let _ = writeln!(
            prompt,
            "- id: {} | name: {} | type: {} | description: {}",
            candidate.id,
            candidate.name,
            candidate.entity_type,
            candidate.description.as_deref().unwrap_or("-"),
        );
    }
    prompt
}
