use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::graph::{Entity, GraphData, MergeAction, MergeDecision};
use crate::pipeline::{DebugWriter, INTEGRATION_LOG_ARTIFACT};
use crate::store::GraphStore;

use super::events::{IntegrationEvent, IntegrationOutcome, IntegrationStage};
use super::resolver::{EntityResolver, ResolutionOutcome};

/// Cross-document merge: retrieve candidate duplicates, adjudicate with
/// the resolver, rewrite the fragment onto store ids and persist it.
#[derive(Clone)]
pub struct IntegrationWorkflow {
    store: Arc<dyn GraphStore>,
    resolver: Arc<EntityResolver>,
    artifacts: DebugWriter,
}

impl IntegrationWorkflow {
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolver: Arc<EntityResolver>,
        artifacts: DebugWriter,
    ) -> Self {
        Self {
            store,
            resolver,
            artifacts,
        }
    }

    /// Start one integration run over a self-contained fragment.
    pub fn run(&self, graph: GraphData, paper_path: PathBuf) -> mpsc::Receiver<IntegrationEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();

        tokio::spawn(async move {
            let mut queue = VecDeque::from([IntegrationEvent::Integrate {
                graph,
                paper_path: paper_path.clone(),
            }]);

            while let Some(event) = queue.pop_front() {
                debug!(event = event.label(), paper = %paper_path.display(), "dispatching");
                let terminal = matches!(event, IntegrationEvent::Complete(_));
                if tx.send(event.clone()).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }

                match this.dispatch(event).await {
                    Ok(Some(next)) => queue.push_back(next),
                    Ok(None) => {}
                    Err((stage, err)) => queue.push_back(IntegrationEvent::Error {
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
        event: IntegrationEvent,
    ) -> std::result::Result<Option<IntegrationEvent>, (IntegrationStage, anyhow::Error)> {
        match event {
            IntegrationEvent::Integrate { graph, paper_path } => self
                .handle_retrieve(graph, paper_path)
                .await
                .map(Some)
                .map_err(|err| (IntegrationStage::Retrieve, err)),
            IntegrationEvent::CandidatesRetrieved {
                graph,
                candidates,
                paper_path,
            } => Ok(Some(self.handle_resolve(graph, candidates, paper_path).await)),
            IntegrationEvent::EntitiesResolved {
                resolved,
                merge_log,
                paper_path,
            } => self
                .handle_persist(resolved, merge_log, paper_path)
                .await
                .map(Some)
                .map_err(|err| (IntegrationStage::Persist, err)),
            IntegrationEvent::Error {
                stage,
                message,
                paper_path,
            } => {
                error!(
                    stage = stage.as_str(),
                    paper = %paper_path.display(),
                    %message,
                    "integration stage failed"
                );
                Ok(Some(IntegrationEvent::Complete(IntegrationOutcome {
                    success: false,
                    paper_path,
                    entities_processed: 0,
                    entities_merged: 0,
                    entities_created: 0,
                    error: Some(message),
                })))
            }
            IntegrationEvent::Complete(_) => Ok(None),
        }
    }

    async fn handle_retrieve(
        &self,
        graph: GraphData,
        paper_path: PathBuf,
    ) -> Result<IntegrationEvent> {
        let candidates = self
            .store
            .fetch_similar_entities_batch(&graph.entities)
            .await
            .with_context(|| "candidate retrieval failed")?;
        info!(
            paper = %paper_path.display(),
            entities = graph.entities.len(),
            with_candidates = candidates.len(),
            "candidates retrieved"
        );
        Ok(IntegrationEvent::CandidatesRetrieved {
            graph,
            candidates,
            paper_path,
        })
    }

    async fn handle_resolve(
        &self,
        graph: GraphData,
        candidates: HashMap<String, Vec<Entity>>,
        paper_path: PathBuf,
    ) -> IntegrationEvent {
        let outcome = self.resolver.resolve(&graph, &candidates).await;
        let resolved = rewrite_fragment(&graph, &outcome);
        info!(
            paper = %paper_path.display(),
            created = resolved.entities.len(),
            merged = graph.entities.len() - resolved.entities.len(),
            "entities resolved"
        );
        IntegrationEvent::EntitiesResolved {
            resolved,
            merge_log: outcome.merge_log,
            paper_path,
        }
    }

    async fn handle_persist(
        &self,
        resolved: GraphData,
        merge_log: Vec<MergeDecision>,
        paper_path: PathBuf,
    ) -> Result<IntegrationEvent> {
        self.artifacts.write(INTEGRATION_LOG_ARTIFACT, &merge_log).await;
        self.store
            .upsert_graph(&resolved)
            .await
            .with_context(|| "failed to persist integrated fragment")?;

        let entities_merged = merge_log
            .iter()
            .filter(|d| d.action == MergeAction::Merge)
            .count();
        Ok(IntegrationEvent::Complete(IntegrationOutcome {
            success: true,
            paper_path,
            entities_processed: merge_log.len(),
            entities_merged,
            entities_created: merge_log.len() - entities_merged,
            error: None,
        }))
    }
}

/// Rebuild the fragment on resolved ids: CREATE survivors keep their
/// entities, every relationship endpoint is remapped, and merge targets
/// that now live only in the store are disclosed as referenced ids.
pub fn rewrite_fragment(graph: &GraphData, outcome: &ResolutionOutcome) -> GraphData {
    let entities: Vec<Entity> = graph
        .entities
        .iter()
        .filter(|entity| {
            outcome
                .id_mapping
                .get(&entity.id)
                .map(|resolved| resolved == &entity.id)
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    let kept_ids: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();

    let relationships = graph
        .relationships
        .iter()
        .cloned()
        .map(|mut rel| {
            if let Some(mapped) = outcome.id_mapping.get(&rel.source_id) {
                rel.source_id = mapped.clone();
            }
            if let Some(mapped) = outcome.id_mapping.get(&rel.target_id) {
                rel.target_id = mapped.clone();
            }
            rel
        })
        .collect();

    let referenced_entity_ids: BTreeSet<String> = outcome
        .merge_log
        .iter()
        .filter(|d| d.action == MergeAction::Merge)
        .filter_map(|d| d.target_id.clone())
        .filter(|target| !kept_ids.contains(target.as_str()))
        .collect();

    GraphData {
        entities,
        relationships,
        referenced_entity_ids,
    }
}
