use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::graph::GraphData;
use crate::integration::{IntegrationEvent, IntegrationWorkflow};
use crate::pipeline::{EdcEvent, EdcWorkflow};

/// Counters surfaced to the agent and the CLI after one paper run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessStats {
    pub entities_extracted: usize,
    pub relationships_extracted: usize,
    pub entities_merged: usize,
    pub entities_created: usize,
}

/// Result of processing one paper end to end. Failures land here as data
/// rather than as errors so callers can reason about partial progress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub success: bool,
    pub entities: usize,
    pub relationships: usize,
    pub stats: ProcessStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Composes the per-paper pipeline with cross-document integration over
/// the shared store connection.
pub struct PaperProcessor {
    edc: Arc<EdcWorkflow>,
    integration: Option<Arc<IntegrationWorkflow>>,
}

impl PaperProcessor {
    pub fn new(edc: Arc<EdcWorkflow>, integration: Option<Arc<IntegrationWorkflow>>) -> Self {
        Self { edc, integration }
    }

    pub async fn process(&self, paper_path: PathBuf, source_paper_id: Option<String>) -> ProcessReport {
        let mut report = ProcessReport::default();

        let mut events = self.edc.run(paper_path.clone(), source_paper_id);
        let mut final_graph: Option<GraphData> = None;
        while let Some(event) = events.recv().await {
            if let EdcEvent::Complete(outcome) = event {
                report.entities = outcome.entities_count;
                report.relationships = outcome.relationships_count;
                report.stats.entities_extracted = outcome.entities_count;
                report.stats.relationships_extracted = outcome.relationships_count;
                if outcome.success {
                    final_graph = outcome.final_graph;
                } else {
                    report.error = outcome.error;
                    return report;
                }
            }
        }

        let Some(graph) = final_graph else {
            report.error = Some("pipeline ended without a terminal event".to_string());
            return report;
        };

        let Some(integration) = &self.integration else {
            report.success = true;
            return report;
        };

        let mut events = integration.run(graph, paper_path.clone());
        while let Some(event) = events.recv().await {
            if let IntegrationEvent::Complete(outcome) = event {
                report.stats.entities_merged = outcome.entities_merged;
                report.stats.entities_created = outcome.entities_created;
                if outcome.success {
                    report.success = true;
                } else {
                    report.error = outcome.error;
                }
            }
        }

        info!(
            paper = %paper_path.display(),
            success = report.success,
            merged = report.stats.entities_merged,
            created = report.stats.entities_created,
            "paper processed"
        );
        report
    }
}
