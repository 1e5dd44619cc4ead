use std::sync::Arc;

use anyhow::{Context, Result};

use crate::ai::llm::{ChatModel, ChatRequest, from_structured};
use crate::ai::schemas::preparse_schema;
use crate::graph::PreparsedPaperContext;

const PREPARSE_SYSTEM_PROMPT: &str = "You read the opening of an academic paper and fill in \
its structured metadata: title, authors, abstract, keywords, main findings, methodology, \
results, discussion, references and publication venue. Use empty strings or empty arrays \
for anything the text does not state.";

/// Papers rarely need more than their opening pages for metadata.
const PREPARSE_HEAD_CHARS: usize = 16_000;

/// Extracts [`PreparsedPaperContext`] from the head of the parsed text.
/// Callers treat failure as a degraded run, not a fatal one.
pub struct PreParser {
    model: Arc<dyn ChatModel>,
}

impl PreParser {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn preparse(&self, text: &str) -> Result<PreparsedPaperContext> {
        let head = text_head(text, PREPARSE_HEAD_CHARS);
        let reply = self
            .model
            .structured_json(ChatRequest {
                system: PREPARSE_SYSTEM_PROMPT,
                user: head,
                schema_name: "paper_metadata",
                schema: preparse_schema(),
            })
            .await
            .with_context(|| "paper metadata extraction failed")?;
        from_structured(reply)
    }
}

fn text_head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
