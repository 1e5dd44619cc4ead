use std::collections::HashMap;

use tracing::debug;

use crate::graph::GraphData;

/// Intra-document deduplication. Entities collapse when their trimmed,
/// lowercased names match exactly; the first occurrence survives and later
/// duplicates remap onto its id. Relationship endpoints are rewritten
/// through that remap and self-loops are dropped.
///
/// Semantic near-duplicates ("3DGS" vs "3D Gaussian Splatting") survive
/// this stage on purpose; reconciling those is Integration's job.
pub fn canonicalize(graph: GraphData) -> GraphData {
    let mut key_to_index: HashMap<String, usize> = HashMap::new();
    let mut resolved = Vec::with_capacity(graph.entities.len());
    let mut id_remap: HashMap<String, String> = HashMap::new();

    for entity in graph.entities {
        if entity.name.trim().is_empty() {
            debug!(id = %entity.id, "skipping entity with empty name");
            continue;
        }
        let key = entity.name.trim().to_lowercase();
        match key_to_index.get(&key) {
            Some(&index) => {
                let kept: &crate::graph::Entity = &resolved[index];
                if entity.id != kept.id {
                    id_remap.insert(entity.id, kept.id.clone());
                }
            }
            None => {
                key_to_index.insert(key, resolved.len());
                resolved.push(entity);
            }
        }
    }

    let relationships = graph
        .relationships
        .into_iter()
        .map(|mut rel| {
            if let Some(mapped) = id_remap.get(&rel.source_id) {
                rel.source_id = mapped.clone();
            }
            if let Some(mapped) = id_remap.get(&rel.target_id) {
                rel.target_id = mapped.clone();
            }
            rel
        })
        .filter(|rel| rel.source_id != rel.target_id)
        .collect();

    GraphData {
        entities: resolved,
        relationships,
        referenced_entity_ids: Default::default(),
    }
}
