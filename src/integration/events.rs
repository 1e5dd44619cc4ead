use std::collections::HashMap;
use std::path::PathBuf;

use crate::graph::{Entity, GraphData, MergeDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStage {
    Retrieve,
    Resolve,
    Persist,
}

impl IntegrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStage::Retrieve => "retrieve",
            IntegrationStage::Resolve => "resolve",
            IntegrationStage::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrationOutcome {
    pub success: bool,
    pub paper_path: PathBuf,
    pub entities_processed: usize,
    pub entities_merged: usize,
    pub entities_created: usize,
    pub error: Option<String>,
}

/// Events of the cross-document merge: candidate retrieval, LLM
/// resolution, persistence. Terminates in exactly one `Complete`.
#[derive(Debug, Clone)]
pub enum IntegrationEvent {
    Integrate {
        graph: GraphData,
        paper_path: PathBuf,
    },
    CandidatesRetrieved {
        graph: GraphData,
        candidates: HashMap<String, Vec<Entity>>,
        paper_path: PathBuf,
    },
    EntitiesResolved {
        resolved: GraphData,
        merge_log: Vec<MergeDecision>,
        paper_path: PathBuf,
    },
    Complete(IntegrationOutcome),
    Error {
        stage: IntegrationStage,
        message: String,
        paper_path: PathBuf,
    },
}

impl IntegrationEvent {
    pub fn label(&self) -> &'static str {
        match self {
            IntegrationEvent::Integrate { .. } => "integrate",
            IntegrationEvent::CandidatesRetrieved { .. } => "candidates_retrieved",
            IntegrationEvent::EntitiesResolved { .. } => "entities_resolved",
            IntegrationEvent::Complete(_) => "complete",
            IntegrationEvent::Error { .. } => "error",
        }
    }
}
