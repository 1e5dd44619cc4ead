use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::graph::{GraphData, PreparsedPaperContext};
use crate::store::{DocumentStatus, GraphStore};

use super::artifacts::{
    CANONICALIZATION_ARTIFACT, DEFINITION_ARTIFACT, DebugWriter, EXTRACTION_ARTIFACT,
    PREPARSED_ARTIFACT,
};
use super::canonicalizer::canonicalize;
use super::definer::Definer;
use super::events::{EdcEvent, EdcOutcome, EdcStage};
use super::extractor::Extractor;
use super::parser::PaperParser;
use super::preparse::PreParser;

/// The per-paper pipeline, wired once and shared across runs. Each run
/// carries its state inside events; the workflow itself holds only the
/// injected dependencies.
#[derive(Clone)]
pub struct EdcWorkflow {
    parser: Arc<dyn PaperParser>,
    preparser: Option<Arc<PreParser>>,
    extractor: Arc<Extractor>,
    definer: Arc<Definer>,
    store: Arc<dyn GraphStore>,
    artifacts: DebugWriter,
}

impl EdcWorkflow {
    pub fn new(
        parser: Arc<dyn PaperParser>,
        preparser: Option<Arc<PreParser>>,
        extractor: Arc<Extractor>,
        definer: Arc<Definer>,
        store: Arc<dyn GraphStore>,
        artifacts: DebugWriter,
    ) -> Self {
        Self {
            parser,
            preparser,
            extractor,
            definer,
            store,
            artifacts,
        }
    }

    /// Start one run. The returned stream yields every event in FIFO order
    /// and terminates at the single `Complete` event.
    pub fn run(
        &self,
        paper_path: PathBuf,
        source_paper_id: Option<String>,
    ) -> mpsc::Receiver<EdcEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();

        tokio::spawn(async move {
            let mut queue = VecDeque::from([EdcEvent::Load {
                paper_path: paper_path.clone(),
            }]);

            while let Some(event) = queue.pop_front() {
                debug!(event = event.label(), paper = %paper_path.display(), "dispatching");
                let terminal = matches!(event, EdcEvent::Complete(_));
                if tx.send(event.clone()).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }

                match this.dispatch(event, source_paper_id.as_deref()).await {
                    Ok(Some(next)) => queue.push_back(next),
                    Ok(None) => {}
                    Err((stage, err)) => queue.push_back(EdcEvent::Error {
                        stage,
                        message: format!("{err:#}"),
                        paper_path: paper_path.clone(),
                    }),
                }
            }
        });

        rx
    }

    async fn dispatch(
        &self,
        event: EdcEvent,
        source_paper_id: Option<&str>,
    ) -> std::result::Result<Option<EdcEvent>, (EdcStage, anyhow::Error)> {
        match event {
            EdcEvent::Load { paper_path } => self
                .handle_load(paper_path)
                .await
                .map(Some)
                .map_err(|err| (EdcStage::Load, err)),
            EdcEvent::PreParsed {
                text,
                paper_path,
                context,
            } => self
                .handle_preparsed(text, paper_path, context)
                .await
                .map(Some)
                .map_err(|err| (EdcStage::PreParse, err)),
            EdcEvent::Extract {
                text,
                paper_path,
                context,
            } => self
                .handle_extract(text, paper_path, context, source_paper_id)
                .await
                .map(Some)
                .map_err(|err| (EdcStage::Extract, err)),
            EdcEvent::Define { graph, paper_path } => self
                .handle_define(graph, paper_path)
                .await
                .map(Some)
                .map_err(|err| (EdcStage::Define, err)),
            EdcEvent::Canonicalize { graph, paper_path } => self
                .handle_canonicalize(graph, paper_path)
                .await
                .map(Some)
                .map_err(|err| (EdcStage::Canonicalize, err)),
            EdcEvent::Save { graph, paper_path } => self
                .handle_save(graph, paper_path)
                .await
                .map(Some)
                .map_err(|err| (EdcStage::Save, err)),
            EdcEvent::Error {
                stage,
                message,
                paper_path,
            } => Ok(Some(self.handle_error(stage, message, paper_path).await)),
            EdcEvent::Complete(_) => Ok(None),
        }
    }

    async fn handle_load(&self, paper_path: PathBuf) -> Result<EdcEvent> {
        let checksum = file_checksum(&paper_path).await.ok();
        if let Err(err) = self
            .store
            .record_document(&paper_path.display().to_string(), checksum.as_deref())
            .await
        {
            warn!(paper = %paper_path.display(), error = %err, "could not record document");
        }

        let text = self.parser.parse(&paper_path).await?;
        info!(paper = %paper_path.display(), chars = text.len(), "paper loaded");

        if self.preparser.is_some() {
            Ok(EdcEvent::PreParsed {
                text,
                paper_path,
                context: None,
            })
        } else {
            Ok(EdcEvent::Extract {
                text,
                paper_path,
                context: None,
            })
        }
    }

    async fn handle_preparsed(
        &self,
        text: String,
        paper_path: PathBuf,
        context: Option<PreparsedPaperContext>,
    ) -> Result<EdcEvent> {
        let context = match (context, &self.preparser) {
            (Some(context), _) => Some(context),
            (None, Some(preparser)) => match preparser.preparse(&text).await {
                Ok(context) => {
                    self.artifacts.write(PREPARSED_ARTIFACT, &context).await;
                    Some(context)
                }
                Err(err) => {
                    warn!(
                        paper = %paper_path.display(),
                        error = %err,
                        "pre-parse failed; continuing without context"
                    );
                    None
                }
            },
            (None, None) => None,
        };

        Ok(EdcEvent::Extract {
            text,
            paper_path,
            context,
        })
    }

    async fn handle_extract(
        &self,
        text: String,
        paper_path: PathBuf,
        context: Option<PreparsedPaperContext>,
        source_paper_id: Option<&str>,
    ) -> Result<EdcEvent> {
        let mut graph = self.extractor.extract(&text, context.as_ref()).await?;
        if let Some(source) = source_paper_id {
            for rel in &mut graph.relationships {
                rel.source_paper_id = Some(source.to_string());
            }
        }
        info!(
            paper = %paper_path.display(),
            entities = graph.entities.len(),
            relationships = graph.relationships.len(),
            "extraction complete"
        );
        self.artifacts.write(EXTRACTION_ARTIFACT, &graph).await;
        Ok(EdcEvent::Define { graph, paper_path })
    }

    async fn handle_define(&self, graph: GraphData, paper_path: PathBuf) -> Result<EdcEvent> {
        let graph = if graph.entities.is_empty() {
            graph
        } else {
            self.definer.define(graph).await?
        };
        self.artifacts.write(DEFINITION_ARTIFACT, &graph).await;
        Ok(EdcEvent::Canonicalize { graph, paper_path })
    }

    async fn handle_canonicalize(
        &self,
        graph: GraphData,
        paper_path: PathBuf,
    ) -> Result<EdcEvent> {
        let before = graph.entities.len();
        let graph = canonicalize(graph);
        info!(
            paper = %paper_path.display(),
            before,
            after = graph.entities.len(),
            "canonicalization complete"
        );
        self.artifacts.write(CANONICALIZATION_ARTIFACT, &graph).await;
        Ok(EdcEvent::Save { graph, paper_path })
    }

    async fn handle_save(&self, graph: GraphData, paper_path: PathBuf) -> Result<EdcEvent> {
        let summary = self
            .store
            .upsert_graph(&graph)
            .await
            .with_context(|| "failed to persist fragment")?;
        if let Err(err) = self
            .store
            .mark_document(&paper_path.display().to_string(), DocumentStatus::Processed)
            .await
        {
            warn!(paper = %paper_path.display(), error = %err, "could not update document status");
        }
        info!(
            paper = %paper_path.display(),
            entities = summary.entities_upserted,
            relationships = summary.relationships_persisted,
            "fragment saved"
        );

        Ok(EdcEvent::Complete(EdcOutcome {
            success: true,
            paper_path,
            entities_count: graph.entities.len(),
            relationships_count: graph.relationships.len(),
            final_graph: Some(graph),
            error: None,
        }))
    }

    async fn handle_error(
        &self,
        stage: EdcStage,
        message: String,
        paper_path: PathBuf,
    ) -> EdcEvent {
        error!(stage = stage.as_str(), paper = %paper_path.display(), %message, "pipeline stage failed");
        if let Err(err) = self
            .store
            .mark_document(&paper_path.display().to_string(), DocumentStatus::Failed)
            .await
        {
            warn!(paper = %paper_path.display(), error = %err, "could not update document status");
        }

        EdcEvent::Complete(EdcOutcome {
            success: false,
            paper_path,
            entities_count: 0,
            relationships_count: 0,
            final_graph: None,
            error: Some(message),
        })
    }
}

async fn file_checksum(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
