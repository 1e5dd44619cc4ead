use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tiktoken_rs::{CoreBPE, o200k_base};
use tracing::{debug, warn};

use crate::ai::llm::{ChatModel, ChatRequest, from_structured, parse_structured_reply};
use crate::ai::schemas::{
    EntityExtraction, ExtractedEntity, RelationshipExtraction, entity_extraction_schema,
    relationship_extraction_schema,
};
use crate::graph::{
    Entity, GraphData, PreparsedPaperContext, Relationship, coerce_relationship_type,
    normalize_entity_id,
};

const ENTITY_SYSTEM_PROMPT: &str = "You extract the entities of an academic paper into a \
knowledge graph. Emit entities of the types Method, Metric, Task, Dataset, Concept, Author, \
Conference or Paper. Every entity carries a normalized lowercase snake_case id derived from \
its name, the surface name as written, a one-sentence description, and any aliases or \
abbreviations the paper uses for it.";

const RELATIONSHIP_SYSTEM_PROMPT: &str = "You extract directed relationships between \
previously identified entities of an academic paper. Only reference the provided entity ids, \
never invent new ones, and use only the allowed relationship types.";

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// When enabled, texts over the token budget are split at paragraph
    /// boundaries and the per-chunk fragments are unioned.
    pub chunking_enabled: bool,
    pub max_input_tokens: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            chunking_enabled: false,
            max_input_tokens: 24_000,
        }
    }
}

/// Two-stage extraction: entities first, then relationships over the
/// extracted entity set. The output fragment is self-contained; every
/// relationship endpoint is an extracted entity id.
pub struct Extractor {
    model: Arc<dyn ChatModel>,
    tokenizer: CoreBPE,
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(model: Arc<dyn ChatModel>, config: ExtractorConfig) -> Result<Self> {
        Ok(Self {
            model,
            tokenizer: o200k_base()?,
            config,
        })
    }

    pub async fn extract(
        &self,
        text: &str,
        context: Option<&PreparsedPaperContext>,
    ) -> Result<GraphData> {
        if text.trim().is_empty() {
            return Ok(GraphData::default());
        }

        let token_count = self.tokenizer.encode_with_special_tokens(text).len();
        if self.config.chunking_enabled && token_count > self.config.max_input_tokens {
            let chunks = split_paragraph_chunks(text, self.config.max_input_tokens, |part| {
                self.tokenizer.encode_with_special_tokens(part).len()
            });
            debug!(chunks = chunks.len(), token_count, "chunking oversized paper text");
            let mut fragments = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                fragments.push(self.extract_single(chunk, context).await?);
            }
            return Ok(merge_fragments(fragments));
        }

        self.extract_single(text, context).await
    }

    async fn extract_single(
        &self,
        text: &str,
        context: Option<&PreparsedPaperContext>,
    ) -> Result<GraphData> {
        let entities = match self.extract_entities(text, context).await {
            Some(entities) => entities,
            None => return Ok(GraphData::default()),
        };
        if entities.is_empty() {
            return Ok(GraphData::default());
        }

        let relationships = self.extract_relationships(text, &entities).await;
        Ok(assemble_fragment(entities, relationships))
    }

    /// Stage A. `None` means the model reply could not be parsed even via
    /// the chat fallback; the caller turns that into an empty fragment.
    async fn extract_entities(
        &self,
        text: &str,
        context: Option<&PreparsedPaperContext>,
    ) -> Option<Vec<ExtractedEntity>> {
        let user = build_entity_prompt(text, context);
        let parsed = self
            .structured_with_chat_fallback(
                ENTITY_SYSTEM_PROMPT,
                &user,
                "entity_extraction",
                entity_extraction_schema(),
            )
            .await?;
        let extraction: EntityExtraction = match from_structured(parsed) {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(error = %err, "entity extraction reply did not match the schema");
                return None;
            }
        };
        Some(extraction.entities)
    }

    /// Stage B. Failures here keep the entities and yield no relationships.
    async fn extract_relationships(
        &self,
        text: &str,
        entities: &[ExtractedEntity],
    ) -> Vec<crate::ai::schemas::ExtractedRelationship> {
        let user = build_relationship_prompt(text, entities);
        let Some(parsed) = self
            .structured_with_chat_fallback(
                RELATIONSHIP_SYSTEM_PROMPT,
                &user,
                "relationship_extraction",
                relationship_extraction_schema(),
            )
            .await
        else {
            return Vec::new();
        };
        match from_structured::<RelationshipExtraction>(parsed) {
            Ok(extraction) => extraction.relationships,
            Err(err) => {
                warn!(error = %err, "relationship extraction reply did not match the schema");
                Vec::new()
            }
        }
    }

    /// Structured call with an unstructured-chat fallback. Malformed JSON
    /// on the fallback path degrades to `None` instead of failing the run.
    async fn structured_with_chat_fallback(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: Value,
    ) -> Option<Value> {
        match self
            .model
            .structured_json(ChatRequest {
                system,
                user,
                schema_name,
                schema,
            })
            .await
        {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "structured extraction failed; falling back to plain chat");
                let reply = match self.model.chat(system, user).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!(error = %err, "chat fallback failed");
                        return None;
                    }
                };
                match parse_structured_reply(&reply) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(error = %err, "chat fallback reply was not valid JSON");
                        None
                    }
                }
            }
        }
    }
}

fn build_entity_prompt(text: &str, context: Option<&PreparsedPaperContext>) -> String {
    let mut prompt = String::new();
    if let Some(ctx) = context {
        if !ctx.title.is_empty() {
            let _ = writeln!(prompt, "Title: {}", ctx.title);
        }
        if !ctx.abstract_text.is_empty() {
            let _ = writeln!(prompt, "Abstract: {}", ctx.abstract_text);
        }
        if !ctx.keywords.is_empty() {
            let _ = writeln!(prompt, "Keywords: {}", ctx.keywords.join(", "));
        }
        if !ctx.main_findings.is_empty() {
            let _ = writeln!(prompt, "Main findings:");
            for finding in &ctx.main_findings {
                let _ = writeln!(prompt, "- {finding}");
            }
        }
        if !ctx.methodology.is_empty() {
            let _ = writeln!(prompt, "Methodology: {}", ctx.methodology);
        }
        prompt.push('\n');
    }
    let _ = writeln!(prompt, "Paper text:\n{text}");
    prompt
}

fn build_relationship_prompt(text: &str, entities: &[ExtractedEntity]) -> String {
    let mut prompt = String::from("Extracted entities:\n");
    for entity in entities {
        let _ = writeln!(prompt, "- {}: {} ({})", entity.id, entity.name, entity.entity_type);
    }
    let _ = writeln!(prompt, "\nPaper text:\n{text}");
    prompt
}

/// Turn raw stage outputs into a fragment: slug ids, in-fragment dedup by
/// id, endpoint filtering and vocabulary coercion.
fn assemble_fragment(
    raw_entities: Vec<ExtractedEntity>,
    raw_relationships: Vec<crate::ai::schemas::ExtractedRelationship>,
) -> GraphData {
    let mut entities: Vec<Entity> = Vec::with_capacity(raw_entities.len());
    let mut seen: HashSet<String> = HashSet::new();
    // raw ids map onto normalized ones so stage B references still resolve
    let mut raw_to_id: HashMap<String, String> = HashMap::new();

    for raw in raw_entities {
        let basis = if raw.id.trim().is_empty() { &raw.name } else { &raw.id };
        let id = normalize_entity_id(basis);
        if id.is_empty() {
            warn!(name = %raw.name, "skipping entity with unusable id");
            continue;
        }
        raw_to_id.insert(raw.id.clone(), id.clone());
        if !seen.insert(id.clone()) {
            continue;
        }
        let mut entity = Entity::new(id, raw.name.trim(), raw.entity_type.trim());
        entity.description = raw.description.filter(|d| !d.trim().is_empty());
        entity.aliases = raw.aliases.filter(|a| !a.is_empty());
        entities.push(entity);
    }

    let known: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let mut relationships = Vec::new();
    for raw in raw_relationships {
        let source = raw_to_id
            .get(&raw.source_id)
            .cloned()
            .unwrap_or_else(|| normalize_entity_id(&raw.source_id));
        let target = raw_to_id
            .get(&raw.target_id)
            .cloned()
            .unwrap_or_else(|| normalize_entity_id(&raw.target_id));
        if source == target {
            continue;
        }
        if !known.contains(source.as_str()) || !known.contains(target.as_str()) {
            warn!(source = %raw.source_id, target = %raw.target_id, "relationship references unknown entity");
            continue;
        }
        let mut rel = Relationship::new(source, target, coerce_relationship_type(&raw.rel_type));
        rel.description = raw.description.filter(|d| !d.trim().is_empty());
        rel.confidence = raw.confidence.map(|c| c.clamp(0.0, 1.0));
        relationships.push(rel);
    }

    GraphData {
        entities,
        relationships,
        referenced_entity_ids: Default::default(),
    }
}

/// Split text on blank lines, packing paragraphs greedily up to the token
/// budget. A single oversized paragraph still becomes its own chunk.
fn split_paragraph_chunks<F>(text: &str, max_tokens: usize, count_tokens: F) -> Vec<String>
where
    F: Fn(&str) -> usize,
{
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for paragraph in text.split("\n\n") {
        if paragraph.trim().is_empty() {
            continue;
        }
        let tokens = count_tokens(paragraph);
        if !current.is_empty() && current_tokens + tokens > max_tokens {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Union per-chunk fragments: entities merge by id (first occurrence wins
/// type and description, aliases concatenate unique), relationships dedup
/// on the (source, target, type) triple.
fn merge_fragments(fragments: Vec<GraphData>) -> GraphData {
    let mut entities: Vec<Entity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut relationships: Vec<Relationship> = Vec::new();
    let mut triples: HashSet<(String, String, String)> = HashSet::new();

    for fragment in fragments {
        for entity in fragment.entities {
            match index.get(&entity.id) {
                Some(&at) => {
                    let existing = &mut entities[at];
                    if let Some(new_aliases) = entity.aliases {
                        let merged = existing.aliases.get_or_insert_with(Vec::new);
                        for alias in new_aliases {
                            if !merged.contains(&alias) {
                                merged.push(alias);
                            }
                        }
                    }
                }
                None => {
                    index.insert(entity.id.clone(), entities.len());
                    entities.push(entity);
                }
            }
        }
        for rel in fragment.relationships {
            let triple = (rel.source_id.clone(), rel.target_id.clone(), rel.rel_type.clone());
            if triples.insert(triple) {
                relationships.push(rel);
            }
        }
    }

    GraphData {
        entities,
        relationships,
        referenced_entity_ids: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, name: &str) -> ExtractedEntity {
        ExtractedEntity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: "Method".to_string(),
            description: None,
            aliases: None,
        }
    }

    fn rel(source: &str, target: &str, kind: &str) -> crate::ai::schemas::ExtractedRelationship {
        crate::ai::schemas::ExtractedRelationship {
            source_id: source.to_string(),
            target_id: target.to_string(),
            rel_type: kind.to_string(),
            description: None,
            confidence: None,
        }
    }

    #[test]
    fn fragment_filters_unknown_endpoints_and_self_loops() {
        let out = assemble_fragment(
            vec![entity("nerf", "NeRF"), entity("3dgs", "3DGS")],
            vec![
                rel("3dgs", "nerf", "improves_on"),
                rel("3dgs", "3dgs", "uses"),
                rel("3dgs", "psnr", "achieves"),
            ],
        );
        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.relationships.len(), 1);
        assert_eq!(out.relationships[0].source_id, "3dgs");
        assert_eq!(out.relationships[0].target_id, "nerf");
    }

    #[test]
    fn unknown_relationship_types_are_coerced() {
        let out = assemble_fragment(
            vec![entity("a", "A"), entity("b", "B")],
            vec![rel("a", "b", "outperforms")],
        );
        assert_eq!(out.relationships[0].rel_type, "related_to");
    }

    #[test]
    fn ids_fall_back_to_names_and_are_normalized() {
        let out = assemble_fragment(vec![entity("", "3D Gaussian Splatting")], vec![]);
        assert_eq!(out.entities[0].id, "3d_gaussian_splatting");
    }

    #[test]
    fn paragraph_chunks_respect_the_budget() {
        let text = "one two three\n\nfour five six\n\nseven eight nine";
        let chunks = split_paragraph_chunks(text, 4, |part| part.split_whitespace().count());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "one two three");
    }

    #[test]
    fn oversized_paragraph_still_forms_a_chunk() {
        let text = "a b c d e f g h";
        let chunks = split_paragraph_chunks(text, 3, |part| part.split_whitespace().count());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn merged_fragments_union_aliases_and_dedup_triples() {
        let mut first = assemble_fragment(
            vec![entity("nerf", "NeRF")],
            vec![],
        );
        first.entities[0].aliases = Some(vec!["radiance fields".to_string()]);
        let mut second = assemble_fragment(
            vec![entity("nerf", "NeRF"), entity("3dgs", "3DGS")],
            vec![rel("3dgs", "nerf", "improves_on")],
        );
        second.entities[0].aliases = Some(vec!["nerf".to_string(), "radiance fields".to_string()]);
        let third = assemble_fragment(
            vec![entity("nerf", "NeRF"), entity("3dgs", "3DGS")],
            vec![rel("3dgs", "nerf", "improves_on")],
        );

        let merged = merge_fragments(vec![first, second, third]);
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(
            merged.entities[0].aliases.as_deref(),
            Some(&["radiance fields".to_string(), "nerf".to_string()][..])
        );
        assert_eq!(merged.relationships.len(), 1);
    }
}
