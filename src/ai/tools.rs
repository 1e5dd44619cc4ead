use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::discovery::{DiscoveryClient, PaperSummary};
use crate::graph::{Entity, normalize_entity_id};
use crate::processor::PaperProcessor;
use crate::store::GraphStore;

use super::agent::Tool;

const DEFAULT_QUERY_LIMIT: usize = 10;

/// Search OpenAlex for papers matching a query.
pub struct SearchPapersTool {
    discovery: Arc<DiscoveryClient>,
}

impl SearchPapersTool {
    pub fn new(discovery: Arc<DiscoveryClient>) -> Self {
        Self { discovery }
    }
}

#[derive(Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for SearchPapersTool {
    fn name(&self) -> &str {
        "search_papers"
    }

    fn description(&self) -> &str {
        "Search for academic papers. Input: {\"query\": string, \"limit\": number}. \
Returns a list of {id, title, citation_count}."
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let input: SearchInput =
            serde_json::from_str(input).with_context(|| "search_papers expects JSON input")?;
        let papers = self
            .discovery
            .search_papers(&input.query, input.limit.unwrap_or(DEFAULT_QUERY_LIMIT))
            .await?;
        Ok(serde_json::to_string(&papers)?)
    }
}

/// List the papers citing a given paper id.
pub struct GetCitationsTool {
    discovery: Arc<DiscoveryClient>,
}

impl GetCitationsTool {
    pub fn new(discovery: Arc<DiscoveryClient>) -> Self {
        Self { discovery }
    }
}

#[derive(Deserialize)]
struct CitationsInput {
    paper_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for GetCitationsTool {
    fn name(&self) -> &str {
        "get_citations"
    }

    fn description(&self) -> &str {
        "List papers citing a paper. Input: {\"paper_id\": string, \"limit\": number}. \
Returns a list of {id, title, citation_count}."
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let input: CitationsInput =
            serde_json::from_str(input).with_context(|| "get_citations expects JSON input")?;
        let papers = self
            .discovery
            .citations(&input.paper_id, input.limit.unwrap_or(DEFAULT_QUERY_LIMIT))
            .await?;
        Ok(serde_json::to_string(&papers)?)
    }
}

/// Download a paper's PDF to the papers directory.
pub struct DownloadPaperTool {
    discovery: Arc<DiscoveryClient>,
}

impl DownloadPaperTool {
    pub fn new(discovery: Arc<DiscoveryClient>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl Tool for DownloadPaperTool {
    fn name(&self) -> &str {
        "download_paper"
    }

    fn description(&self) -> &str {
        "Download a paper's PDF. Input: a paper object from search_papers or get_citations. \
Returns {success, path}."
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let paper: PaperSummary =
            serde_json::from_str(input).with_context(|| "download_paper expects a paper object")?;
        match self.discovery.download(&paper).await {
            Ok(path) => Ok(json!({ "success": true, "path": path }).to_string()),
            Err(err) => Ok(json!({ "success": false, "error": format!("{err:#}") }).to_string()),
        }
    }
}

/// Run the full pipeline plus integration over a downloaded paper.
pub struct ProcessPaperTool {
    processor: Arc<PaperProcessor>,
}

impl ProcessPaperTool {
    pub fn new(processor: Arc<PaperProcessor>) -> Self {
        Self { processor }
    }
}

#[derive(Deserialize)]
struct ProcessInput {
    paper_path: PathBuf,
    #[serde(default)]
    source_paper_id: Option<String>,
}

#[async_trait]
impl Tool for ProcessPaperTool {
    fn name(&self) -> &str {
        "process_paper"
    }

    fn description(&self) -> &str {
        "Extract a downloaded paper into the knowledge graph and merge it with what is \
already there. Input: {\"paper_path\": string, \"source_paper_id\": string?}. Returns \
{success, entities, relationships, stats}."
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let input: ProcessInput =
            serde_json::from_str(input).with_context(|| "process_paper expects JSON input")?;
        let report = self
            .processor
            .process(input.paper_path, input.source_paper_id)
            .await;
        Ok(serde_json::to_string(&report)?)
    }
}

/// Vector-search the graph with a synthetic probe entity.
pub struct QueryKnowledgeGraphTool {
    store: Arc<dyn GraphStore>,
}

impl QueryKnowledgeGraphTool {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct QueryInput {
    search_term: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for QueryKnowledgeGraphTool {
    fn name(&self) -> &str {
        "query_knowledge_graph"
    }

    fn description(&self) -> &str {
        "Find graph entities similar to a search term. Input: {\"search_term\": string, \
\"limit\": number}. Returns {entities, count}."
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let input: QueryInput = serde_json::from_str(input)
            .with_context(|| "query_knowledge_graph expects JSON input")?;
        let probe = Entity::new(
            normalize_entity_id(&input.search_term),
            input.search_term.trim(),
            "Concept",
        );
        let entities = self
            .store
            .fetch_similar_entities(&probe, input.limit.unwrap_or(DEFAULT_QUERY_LIMIT))
            .await?;
        Ok(json!({ "count": entities.len(), "entities": entities }).to_string())
    }
}

/// Aggregate totals over the persisted graph.
pub struct SummarizeKnowledgeGraphTool {
    store: Arc<dyn GraphStore>,
}

impl SummarizeKnowledgeGraphTool {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SummarizeKnowledgeGraphTool {
    fn name(&self) -> &str {
        "summarize_knowledge_graph"
    }

    fn description(&self) -> &str {
        "Summarize the knowledge graph. Input: {}. Returns {total_entities, \
total_relationships, top_entity_types}."
    }

    async fn invoke(&self, _input: &str) -> Result<String> {
        let summary = self.store.summarize(5).await?;
        Ok(serde_json::to_string(&summary)?)
    }
}
