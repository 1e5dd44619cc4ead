use std::path::PathBuf;

use crate::graph::{GraphData, PreparsedPaperContext};

/// Pipeline stages, used for error routing and structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdcStage {
    Load,
    PreParse,
    Extract,
    Define,
    Canonicalize,
    Save,
}

impl EdcStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdcStage::Load => "load",
            EdcStage::PreParse => "preparse",
            EdcStage::Extract => "extract",
            EdcStage::Define => "define",
            EdcStage::Canonicalize => "canonicalize",
            EdcStage::Save => "save",
        }
    }
}

/// Terminal payload of one pipeline run. Exactly one of these ends every
/// event stream, successful or not.
#[derive(Debug, Clone)]
pub struct EdcOutcome {
    pub success: bool,
    pub paper_path: PathBuf,
    pub entities_count: usize,
    pub relationships_count: usize,
    pub final_graph: Option<GraphData>,
    pub error: Option<String>,
}

/// Events of the per-paper pipeline. Each handler consumes one event and
/// emits the next; the stream is FIFO within a run.
#[derive(Debug, Clone)]
pub enum EdcEvent {
    Load {
        paper_path: PathBuf,
    },
    PreParsed {
        text: String,
        paper_path: PathBuf,
        context: Option<PreparsedPaperContext>,
    },
    Extract {
        text: String,
        paper_path: PathBuf,
        context: Option<PreparsedPaperContext>,
    },
    Define {
        graph: GraphData,
        paper_path: PathBuf,
    },
    Canonicalize {
        graph: GraphData,
        paper_path: PathBuf,
    },
    Save {
        graph: GraphData,
        paper_path: PathBuf,
    },
    Complete(EdcOutcome),
    Error {
        stage: EdcStage,
        message: String,
        paper_path: PathBuf,
    },
}

impl EdcEvent {
    pub fn label(&self) -> &'static str {
        match self {
            EdcEvent::Load { .. } => "load",
            EdcEvent::PreParsed { .. } => "preparsed",
            EdcEvent::Extract { .. } => "extract",
            EdcEvent::Define { .. } => "define",
            EdcEvent::Canonicalize { .. } => "canonicalize",
            EdcEvent::Save { .. } => "save",
            EdcEvent::Complete(_) => "complete",
            EdcEvent::Error { .. } => "error",
        }
    }
}
