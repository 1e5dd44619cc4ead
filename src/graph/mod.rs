mod types;

pub use types::{
    Entity, GraphData, MergeAction, MergeDecision, PaperAuthor, PreparsedPaperContext, Relationship,
};

/// The closed relationship vocabulary. Anything outside this set is coerced
/// to `related_to` at the extraction boundary.
pub const RELATIONSHIP_TYPES: &[&str] = &[
    "improves_on",
    "uses",
    "evaluated_on",
    "achieves",
    "proposes",
    "addresses",
    "related_to",
    "based_on",
    "cites",
    "extends",
    "introduces",
];

/// Standardized entity types the Definer refines towards. The entity type
/// set stays open; these are the preferred labels.
pub const STANDARD_ENTITY_TYPES: &[&str] = &[
    "Method",
    "Metric",
    "Task",
    "Dataset",
    "Concept",
    "Author",
    "Conference",
];

pub fn coerce_relationship_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    if RELATIONSHIP_TYPES.contains(&lowered.as_str()) {
        lowered
    } else {
        "related_to".to_string()
    }
}

/// Derive a stable entity id slug from a human-readable name: lowercased,
/// with every run of non-alphanumeric characters collapsed to a single `_`.
pub fn normalize_entity_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            id.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            id.push('_');
            last_was_sep = true;
        }
    }
    while id.ends_with('_') {
        id.pop();
    }
    id
}

/// The text rendered into the embedding model for an entity.
pub fn entity_embedding_text(name: &str, entity_type: &str, description: Option<&str>) -> String {
    format!(
        "{} ({}): {}",
        name.trim(),
        entity_type.trim(),
        description.unwrap_or_default().trim()
    )
    .trim()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_collapse_punctuation_runs() {
        assert_eq!(normalize_entity_id("3D Gaussian Splatting"), "3d_gaussian_splatting");
        assert_eq!(normalize_entity_id("  NeRF--W "), "nerf_w");
        assert_eq!(normalize_entity_id("PSNR"), "psnr");
    }

    #[test]
    fn unknown_relationship_types_fall_back() {
        assert_eq!(coerce_relationship_type("IMPROVES_ON"), "improves_on");
        assert_eq!(coerce_relationship_type("outperforms"), "related_to");
    }

    #[test]
    fn embedding_text_trims_missing_description() {
        assert_eq!(
            entity_embedding_text("NeRF", "Method", None),
            "NeRF (Method):"
        );
        assert_eq!(
            entity_embedding_text(" NeRF ", "Method", Some("neural radiance fields")),
            "NeRF (Method): neural radiance fields"
        );
    }
}
