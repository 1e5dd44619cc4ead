mod support;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use paper_graph::graph::{GraphData, Relationship};
use paper_graph::pipeline::Definer;
use support::{ScriptedChat, entity};

fn fragment() -> GraphData {
    let mut nerf = entity("nerf", "nerf", "Concept");
    nerf.description = Some("neural radiance fields".to_string());
    nerf.aliases = Some(vec!["radiance fields".to_string()]);
    GraphData {
        entities: vec![nerf, entity("psnr", "psnr", "Concept")],
        relationships: vec![Relationship::new("nerf", "psnr", "achieves")],
        referenced_entity_ids: Default::default(),
    }
}

#[tokio::test]
async fn refinement_changes_only_name_and_type() -> anyhow::Result<()> {
    let chat = Arc::new(ScriptedChat::new());
    chat.push(
        "entity_definition",
        json!({
            "entities": [
                { "id": "nerf", "name": "NeRF", "type": "Method" },
                { "id": "psnr", "name": "PSNR", "type": "Metric" }
            ]
        }),
    );
    let definer = Definer::new(chat);

    let input = fragment();
    let input_ids: HashSet<String> = input.entities.iter().map(|e| e.id.clone()).collect();
    let output = definer.define(input).await?;

    // definer invariant: same cardinality, same id set
    assert_eq!(output.entities.len(), 2);
    let output_ids: HashSet<String> = output.entities.iter().map(|e| e.id.clone()).collect();
    assert_eq!(input_ids, output_ids);

    let nerf = output.entities.iter().find(|e| e.id == "nerf").unwrap();
    assert_eq!(nerf.name, "NeRF");
    assert_eq!(nerf.entity_type, "Method");
    // everything else passes through untouched
    assert_eq!(nerf.description.as_deref(), Some("neural radiance fields"));
    assert_eq!(nerf.aliases.as_deref(), Some(&["radiance fields".to_string()][..]));

    assert_eq!(output.relationships.len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_refined_record_keeps_the_original() -> anyhow::Result<()> {
    let chat = Arc::new(ScriptedChat::new());
    chat.push(
        "entity_definition",
        json!({
            "entities": [
                { "id": "nerf", "name": "NeRF", "type": "Method" }
            ]
        }),
    );
    let definer = Definer::new(chat);

    let output = definer.define(fragment()).await?;
    let psnr = output.entities.iter().find(|e| e.id == "psnr").unwrap();
    assert_eq!(psnr.name, "psnr");
    assert_eq!(psnr.entity_type, "Concept");
    Ok(())
}

#[tokio::test]
async fn model_failure_is_fatal_for_the_stage() {
    let chat = Arc::new(ScriptedChat::new());
    chat.push_err("entity_definition", "502 Bad Gateway");
    let definer = Definer::new(chat);

    assert!(definer.define(fragment()).await.is_err());
}

#[tokio::test]
async fn schema_mismatch_is_fatal_for_the_stage() {
    let chat = Arc::new(ScriptedChat::new());
    chat.push("entity_definition", json!({ "entities": [{ "wrong": "shape" }] }));
    let definer = Definer::new(chat);

    assert!(definer.define(fragment()).await.is_err());
}

#[tokio::test]
async fn empty_fragment_makes_no_model_calls() -> anyhow::Result<()> {
    let chat = Arc::new(ScriptedChat::new());
    let definer = Definer::new(chat.clone());

    let output = definer.define(GraphData::default()).await?;
    assert!(output.is_empty());
    assert_eq!(chat.calls("entity_definition"), 0);
    Ok(())
}
