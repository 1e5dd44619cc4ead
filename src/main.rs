use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use paper_graph::ai::agent::{AgentConfig, ReActAgent};
use paper_graph::ai::embeddings::{Embedder, EmbeddingClient};
use paper_graph::ai::llm::{ChatClient, ChatModel};
use paper_graph::ai::tools::{
    DownloadPaperTool, GetCitationsTool, ProcessPaperTool, QueryKnowledgeGraphTool,
    SearchPapersTool, SummarizeKnowledgeGraphTool,
};
use paper_graph::config::AppConfig;
use paper_graph::discovery::DiscoveryClient;
use paper_graph::integration::{EntityResolver, IntegrationWorkflow};
use paper_graph::pipeline::{
    DebugWriter, Definer, DocumentParser, EdcWorkflow, Extractor, ExtractorConfig, PaperParser,
    PreParser, RemoteParser,
};
use paper_graph::processor::PaperProcessor;
use paper_graph::store::{GraphStore, PgGraphStore};

#[derive(Debug, Parser)]
#[command(name = "paper-graph", about = "Build a cumulative knowledge graph from academic papers")]
struct Cli {
    /// Run the agentic controller with a free-form curation task
    #[arg(long, value_name = "TASK", conflicts_with = "paper")]
    agent: Option<String>,

    /// Path to a paper to run through the extraction pipeline
    paper: Option<PathBuf>,

    /// Merge the extracted fragment into the persistent graph
    #[arg(long)]
    integrate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{err:#}"), "fatal error");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run() -> Result<bool> {
    let _ = dotenv();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let chat: Arc<dyn ChatModel> = Arc::new(ChatClient::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(
        config.embedding.api_key.clone(),
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
    ));

    let store: Arc<dyn GraphStore> = Arc::new(
        PgGraphStore::connect(&config.database_url, embedder)
            .await
            .with_context(|| "could not open the graph store")?,
    );
    store.init().await?;

    let remote_parser = config
        .parser
        .as_ref()
        .map(|parser| Arc::new(RemoteParser::new(parser.api_key.clone(), parser.base_url.clone())));
    let parser: Arc<dyn PaperParser> = Arc::new(DocumentParser::new(remote_parser));
    let preparser = config
        .preparse_enabled
        .then(|| Arc::new(PreParser::new(chat.clone())));
    let extractor = Arc::new(Extractor::new(
        chat.clone(),
        ExtractorConfig {
            chunking_enabled: config.chunking_enabled,
            ..ExtractorConfig::default()
        },
    )?);
    let definer = Arc::new(Definer::new(chat.clone()));
    let artifacts = config
        .debug_dir
        .clone()
        .map(DebugWriter::new)
        .unwrap_or_else(DebugWriter::disabled);

    let edc = Arc::new(EdcWorkflow::new(
        parser,
        preparser,
        extractor,
        definer,
        store.clone(),
        artifacts.clone(),
    ));
    let resolver = Arc::new(EntityResolver::new(chat.clone()));
    let integration = Arc::new(IntegrationWorkflow::new(store.clone(), resolver, artifacts));

    let success = match (&cli.agent, &cli.paper) {
        (Some(task), None) => run_agent(task, &config, chat, edc, integration, store.clone()).await?,
        (None, Some(paper)) => run_pipeline(paper.clone(), cli.integrate, edc, integration).await,
        _ => return Err(anyhow!("pass either --agent <task> or a path to a paper")),
    };

    store.close().await;
    Ok(success)
}

async fn run_pipeline(
    paper: PathBuf,
    integrate: bool,
    edc: Arc<EdcWorkflow>,
    integration: Arc<IntegrationWorkflow>,
) -> bool {
    let processor = PaperProcessor::new(edc, integrate.then_some(integration));
    let report = processor.process(paper, None).await;
    match &report.error {
        Some(message) => error!(%message, "paper processing failed"),
        None => info!(
            entities = report.entities,
            relationships = report.relationships,
            merged = report.stats.entities_merged,
            created = report.stats.entities_created,
            "paper processing complete"
        ),
    }
    report.success
}

async fn run_agent(
    task: &str,
    config: &AppConfig,
    chat: Arc<dyn ChatModel>,
    edc: Arc<EdcWorkflow>,
    integration: Arc<IntegrationWorkflow>,
    store: Arc<dyn GraphStore>,
) -> Result<bool> {
    let discovery = Arc::new(DiscoveryClient::new(
        config.contact_email.clone(),
        config.papers_dir.clone(),
    ));
    let processor = Arc::new(PaperProcessor::new(edc, Some(integration)));

    let agent = ReActAgent::new(chat)
        .with_config(AgentConfig {
            max_steps: config.agent_max_steps,
            ..Default::default()
        })
        .register(SearchPapersTool::new(discovery.clone()))
        .register(GetCitationsTool::new(discovery.clone()))
        .register(DownloadPaperTool::new(discovery))
        .register(ProcessPaperTool::new(processor))
        .register(QueryKnowledgeGraphTool::new(store.clone()))
        .register(SummarizeKnowledgeGraphTool::new(store));

    let outcome = agent.run(task).await?;
    info!(steps = outcome.steps.len(), "agent finished");
    println!("{}", outcome.final_answer);
    Ok(true)
}
