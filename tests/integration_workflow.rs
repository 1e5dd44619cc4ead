mod support;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use paper_graph::graph::{GraphData, MergeAction, Relationship};
use paper_graph::integration::{EntityResolver, IntegrationEvent, IntegrationWorkflow};
use paper_graph::pipeline::DebugWriter;
use paper_graph::store::InMemoryGraphStore;
use support::{ScriptedChat, entity};

fn workflow(
    chat: Arc<ScriptedChat>,
    store: Arc<InMemoryGraphStore>,
    artifacts: DebugWriter,
) -> Arc<IntegrationWorkflow> {
    let resolver = Arc::new(EntityResolver::new(chat));
    Arc::new(IntegrationWorkflow::new(store, resolver, artifacts))
}

async fn drain(
    workflow: &Arc<IntegrationWorkflow>,
    graph: GraphData,
) -> (Vec<&'static str>, paper_graph::integration::IntegrationOutcome) {
    let mut events = workflow.run(graph, PathBuf::from("papers/new.pdf"));
    let mut labels = Vec::new();
    let mut outcome = None;
    while let Some(event) = events.recv().await {
        labels.push(event.label());
        if let IntegrationEvent::Complete(complete) = event {
            outcome = Some(complete);
        }
    }
    (labels, outcome.expect("stream must end in a Complete event"))
}

#[tokio::test]
async fn merge_rewrites_endpoints_onto_the_store_entity() -> anyhow::Result<()> {
    let debug_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryGraphStore::new());
    // pre-state: the canonical method plus the metric the edge points at
    store.seed_entity(entity("3d_gaussian_splatting", "3D Gaussian Splatting", "Method"));
    store.seed_entity(entity("peak_signal_to_noise_ratio", "Peak Signal-to-Noise Ratio", "Metric"));
    store.set_candidates(
        "3dgs",
        vec![entity("3d_gaussian_splatting", "3D Gaussian Splatting", "Method")],
    );
    store.set_candidates(
        "psnr",
        vec![entity("peak_signal_to_noise_ratio", "Peak Signal-to-Noise Ratio", "Metric")],
    );

    let chat = Arc::new(ScriptedChat::new());
    // one verdict per entity with candidates; both merge onto store ids
    chat.push_matched(
        "merge_resolution",
        "\"id\": \"3dgs\"",
        json!({
            "action": "MERGE",
            "target_id": "3d_gaussian_splatting",
            "confidence": 0.95,
            "rationale": "3DGS abbreviates 3D Gaussian Splatting"
        }),
    );
    chat.push_matched(
        "merge_resolution",
        "\"id\": \"psnr\"",
        json!({
            "action": "MERGE",
            "target_id": "peak_signal_to_noise_ratio",
            "confidence": 0.99,
            "rationale": "same metric"
        }),
    );

    let workflow = workflow(
        chat,
        store.clone(),
        DebugWriter::new(debug_dir.path().to_path_buf()),
    );

    let graph = GraphData {
        entities: vec![entity("3dgs", "3DGS", "Method"), entity("psnr", "PSNR", "Metric")],
        relationships: vec![Relationship::new("3dgs", "psnr", "achieves")],
        referenced_entity_ids: Default::default(),
    };
    let (labels, outcome) = drain(&workflow, graph).await;

    assert_eq!(
        labels,
        vec!["integrate", "candidates_retrieved", "entities_resolved", "complete"]
    );
    assert!(outcome.success);
    assert_eq!(outcome.entities_processed, 2);
    assert_eq!(outcome.entities_merged, 2);
    assert_eq!(outcome.entities_created, 0);

    // no new entities, one rewritten relationship
    assert_eq!(store.entity_count(), 2);
    let rels = store.relationships_snapshot();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].source_id, "3d_gaussian_splatting");
    assert_eq!(rels[0].target_id, "peak_signal_to_noise_ratio");

    assert!(debug_dir.path().join("04_integration_log.json").exists());
    Ok(())
}

#[tokio::test]
async fn entities_without_candidates_create_with_full_confidence() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryGraphStore::new());
    let chat = Arc::new(ScriptedChat::new());
    let workflow = workflow(chat.clone(), store.clone(), DebugWriter::disabled());

    let graph = GraphData {
        entities: vec![entity("nerf", "NeRF", "Method")],
        relationships: vec![],
        referenced_entity_ids: Default::default(),
    };
    let (_, outcome) = drain(&workflow, graph).await;

    assert!(outcome.success);
    assert_eq!(outcome.entities_processed, 1);
    assert_eq!(outcome.entities_created, 1);
    assert_eq!(outcome.entities_merged, 0);
    // no candidates means no resolver calls at all
    assert_eq!(chat.calls("merge_resolution"), 0);
    assert!(store.entity("nerf").is_some());
    Ok(())
}

#[tokio::test]
async fn resolver_failure_defaults_to_create_with_zero_confidence() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryGraphStore::new());
    store.seed_entity(entity("mipnerf", "Mip-NeRF", "Method"));
    store.set_candidates("nerf", vec![entity("mipnerf", "Mip-NeRF", "Method")]);

    let chat = Arc::new(ScriptedChat::new());
    chat.push_err("merge_resolution", "500 Internal Server Error");
    let workflow = workflow(chat, store.clone(), DebugWriter::disabled());

    let graph = GraphData {
        entities: vec![entity("nerf", "NeRF", "Method")],
        relationships: vec![],
        referenced_entity_ids: Default::default(),
    };
    let (_, outcome) = drain(&workflow, graph).await;

    assert!(outcome.success);
    assert_eq!(outcome.entities_created, 1);
    assert!(store.entity("nerf").is_some());
    Ok(())
}

#[tokio::test]
async fn merge_target_outside_the_candidates_is_rejected() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryGraphStore::new());
    store.seed_entity(entity("mipnerf", "Mip-NeRF", "Method"));
    store.set_candidates("nerf", vec![entity("mipnerf", "Mip-NeRF", "Method")]);

    let chat = Arc::new(ScriptedChat::new());
    chat.push(
        "merge_resolution",
        json!({
            "action": "MERGE",
            "target_id": "hallucinated_id",
            "confidence": 0.9,
            "rationale": "confused"
        }),
    );
    let workflow = workflow(chat, store.clone(), DebugWriter::disabled());

    let graph = GraphData {
        entities: vec![entity("nerf", "NeRF", "Method")],
        relationships: vec![],
        referenced_entity_ids: Default::default(),
    };
    let (_, outcome) = drain(&workflow, graph).await;

    assert_eq!(outcome.entities_created, 1);
    assert_eq!(outcome.entities_merged, 0);
    assert!(store.entity("nerf").is_some());
    Ok(())
}

#[tokio::test]
async fn resolution_law_created_plus_merged_covers_every_entity() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryGraphStore::new());
    store.seed_entity(entity("3d_gaussian_splatting", "3D Gaussian Splatting", "Method"));
    store.set_candidates(
        "3dgs",
        vec![entity("3d_gaussian_splatting", "3D Gaussian Splatting", "Method")],
    );

    let chat = Arc::new(ScriptedChat::new());
    chat.push(
        "merge_resolution",
        json!({
            "action": "MERGE",
            "target_id": "3d_gaussian_splatting",
            "confidence": 0.9,
            "rationale": "abbreviation"
        }),
    );
    let workflow = workflow(chat, store.clone(), DebugWriter::disabled());

    let graph = GraphData {
        entities: vec![
            entity("3dgs", "3DGS", "Method"),
            entity("ssim", "SSIM", "Metric"),
            entity("lpips", "LPIPS", "Metric"),
        ],
        relationships: vec![
            Relationship::new("3dgs", "ssim", "achieves"),
            Relationship::new("3dgs", "lpips", "achieves"),
        ],
        referenced_entity_ids: Default::default(),
    };
    let (_, outcome) = drain(&workflow, graph).await;

    assert_eq!(
        outcome.entities_created + outcome.entities_merged,
        outcome.entities_processed
    );
    assert_eq!(outcome.entities_processed, 3);

    // created entities persisted, merged one referenced through the edges
    assert!(store.entity("ssim").is_some());
    assert!(store.entity("lpips").is_some());
    assert!(store.entity("3dgs").is_none());
    let rels = store.relationships_snapshot();
    assert_eq!(rels.len(), 2);
    assert!(rels.iter().all(|r| r.source_id == "3d_gaussian_splatting"));
    Ok(())
}

#[tokio::test]
async fn rewrite_keeps_create_outcomes_and_discloses_merge_targets() {
    use paper_graph::integration::{ResolutionOutcome, rewrite_fragment};

    let graph = GraphData {
        entities: vec![entity("3dgs", "3DGS", "Method"), entity("psnr", "PSNR", "Metric")],
        relationships: vec![Relationship::new("3dgs", "psnr", "achieves")],
        referenced_entity_ids: Default::default(),
    };

    let mut outcome = ResolutionOutcome::default();
    outcome
        .id_mapping
        .insert("3dgs".to_string(), "3d_gaussian_splatting".to_string());
    outcome.id_mapping.insert("psnr".to_string(), "psnr".to_string());
    outcome.merge_log.push(paper_graph::graph::MergeDecision {
        entity_id: "3dgs".to_string(),
        action: MergeAction::Merge,
        target_id: Some("3d_gaussian_splatting".to_string()),
        confidence: 0.95,
        rationale: "abbreviation".to_string(),
    });
    outcome.merge_log.push(paper_graph::graph::MergeDecision {
        entity_id: "psnr".to_string(),
        action: MergeAction::Create,
        target_id: None,
        confidence: 1.0,
        rationale: "no similar entities in graph".to_string(),
    });

    let resolved = rewrite_fragment(&graph, &outcome);
    assert_eq!(resolved.entities.len(), 1);
    assert_eq!(resolved.entities[0].id, "psnr");
    assert_eq!(resolved.relationships[0].source_id, "3d_gaussian_splatting");
    assert!(resolved
        .referenced_entity_ids
        .contains("3d_gaussian_splatting"));
}
