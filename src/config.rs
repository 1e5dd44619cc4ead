use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Credentials and endpoint for one HTTP service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
}

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub llm: ServiceConfig,
    pub embedding: ServiceConfig,
    /// Absent means PDF parsing is unavailable; plain-text papers still work.
    pub parser: Option<ParserConfig>,
    pub papers_dir: PathBuf,
    /// Absent disables debug artifacts.
    pub debug_dir: Option<PathBuf>,
    pub contact_email: Option<String>,
    pub preparse_enabled: bool,
    pub chunking_enabled: bool,
    pub agent_max_steps: usize,
}

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;

        let llm_api_key = env::var("LLM_API_KEY").context("LLM_API_KEY not set")?;
        let llm = ServiceConfig {
            api_key: llm_api_key.clone(),
            base_url: optional("LLM_BASE_URL"),
            model: optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
        };

        let embedding = ServiceConfig {
            api_key: optional("EMBEDDING_API_KEY").unwrap_or(llm_api_key),
            base_url: optional("EMBEDDING_BASE_URL"),
            model: optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
        };

        let parser = match (optional("PARSER_API_KEY"), optional("PARSER_BASE_URL")) {
            (Some(api_key), Some(base_url)) => Some(ParserConfig { api_key, base_url }),
            _ => None,
        };

        Ok(Self {
            database_url,
            llm,
            embedding,
            parser,
            papers_dir: optional("PAPERS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("papers")),
            debug_dir: Some(
                optional("DEBUG_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("debug")),
            ),
            contact_email: optional("CONTACT_EMAIL"),
            preparse_enabled: flag("PREPARSE_ENABLED", true),
            chunking_enabled: flag("CHUNKING_ENABLED", false),
            agent_max_steps: optional("AGENT_MAX_STEPS")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(25),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    match optional(name) {
        Some(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}
