mod support;

use std::sync::Arc;

use serde_json::{Value, json};

use paper_graph::ai::agent::{AgentConfig, ReActAgent, Tool};
use paper_graph::ai::llm::ChatModel;
use paper_graph::ai::tools::{QueryKnowledgeGraphTool, SummarizeKnowledgeGraphTool};
use paper_graph::graph::{GraphData, Relationship};
use paper_graph::store::{GraphStore, InMemoryGraphStore};
use support::{ScriptedChat, entity};

async fn seeded_store() -> Arc<InMemoryGraphStore> {
    let store = Arc::new(InMemoryGraphStore::new());
    let graph = GraphData {
        entities: vec![
            entity("nerf", "NeRF", "Method"),
            entity("3dgs", "3DGS", "Method"),
            entity("psnr", "PSNR", "Metric"),
        ],
        relationships: vec![Relationship::new("3dgs", "psnr", "achieves")],
        referenced_entity_ids: Default::default(),
    };
    store.upsert_graph(&graph).await.expect("seed upsert");
    store
}

#[tokio::test]
async fn query_tool_probes_with_a_synthetic_entity() -> anyhow::Result<()> {
    let store = seeded_store().await;
    store.set_candidates(
        "neural_radiance_fields",
        vec![entity("nerf", "NeRF", "Method"), entity("3dgs", "3DGS", "Method")],
    );

    let tool = QueryKnowledgeGraphTool::new(store);
    let reply = tool
        .invoke(r#"{"search_term": "Neural Radiance Fields", "limit": 1}"#)
        .await?;
    let parsed: Value = serde_json::from_str(&reply)?;

    assert_eq!(parsed["count"], 1);
    assert_eq!(parsed["entities"][0]["id"], "nerf");
    Ok(())
}

#[tokio::test]
async fn query_tool_rejects_malformed_input() {
    let tool = QueryKnowledgeGraphTool::new(Arc::new(InMemoryGraphStore::new()));
    assert!(tool.invoke("not json").await.is_err());
}

#[tokio::test]
async fn summarize_tool_reports_totals_and_top_types() -> anyhow::Result<()> {
    let tool = SummarizeKnowledgeGraphTool::new(seeded_store().await);
    let reply = tool.invoke("{}").await?;
    let parsed: Value = serde_json::from_str(&reply)?;

    assert_eq!(parsed["total_entities"], 3);
    assert_eq!(parsed["total_relationships"], 1);
    assert_eq!(parsed["top_entity_types"][0]["type"], "Method");
    assert_eq!(parsed["top_entity_types"][0]["count"], 2);
    Ok(())
}

#[tokio::test]
async fn agent_runs_a_tool_then_finishes() -> anyhow::Result<()> {
    let chat = Arc::new(ScriptedChat::new());
    chat.push(
        "agent_move",
        json!({
            "next": "call",
            "reasoning": "check what the graph already holds",
            "tool": "summarize_knowledge_graph",
            "arguments": "{}",
            "answer": ""
        }),
    );
    chat.push(
        "agent_move",
        json!({
            "next": "done",
            "reasoning": "the graph already covers the topic",
            "answer": "The graph holds 3 entities."
        }),
    );

    let model: Arc<dyn ChatModel> = chat;
    let agent = ReActAgent::new(model)
        .register(SummarizeKnowledgeGraphTool::new(seeded_store().await));

    let outcome = agent.run("what does the graph know about NeRF?").await?;
    assert_eq!(outcome.final_answer, "The graph holds 3 entities.");
    assert_eq!(outcome.steps.len(), 2);
    assert!(outcome.steps[0].observation.as_deref().unwrap().contains("total_entities"));
    Ok(())
}

#[tokio::test]
async fn agent_surfaces_tool_failures_as_observations() -> anyhow::Result<()> {
    let chat = Arc::new(ScriptedChat::new());
    chat.push(
        "agent_move",
        json!({
            "next": "call",
            "reasoning": "query the graph",
            "tool": "query_knowledge_graph",
            "arguments": "not json",
            "answer": ""
        }),
    );
    chat.push(
        "agent_move",
        json!({
            "next": "done",
            "reasoning": "the tool arguments were malformed",
            "answer": "done"
        }),
    );

    let model: Arc<dyn ChatModel> = chat;
    let agent = ReActAgent::new(model)
        .register(QueryKnowledgeGraphTool::new(Arc::new(InMemoryGraphStore::new())));

    let outcome = agent.run("inspect the graph").await?;
    let observation = outcome.steps[0].observation.as_deref().unwrap();
    assert!(observation.contains("failed"));
    Ok(())
}

#[tokio::test]
async fn agent_stops_at_the_step_cap() {
    let chat = Arc::new(ScriptedChat::new());
    for _ in 0..2 {
        chat.push(
            "agent_move",
            json!({
                "next": "call",
                "reasoning": "keep looking",
                "tool": "summarize_knowledge_graph",
                "arguments": "{}",
                "answer": ""
            }),
        );
    }

    let model: Arc<dyn ChatModel> = chat;
    let agent = ReActAgent::new(model)
        .with_config(AgentConfig {
            max_steps: 2,
            ..Default::default()
        })
        .register(SummarizeKnowledgeGraphTool::new(Arc::new(InMemoryGraphStore::new())));

    assert!(agent.run("never finishes").await.is_err());
}
