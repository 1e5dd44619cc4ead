use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

pub const PREPARSED_ARTIFACT: &str = "00_preparsed.json";
pub const EXTRACTION_ARTIFACT: &str = "01_extraction.json";
pub const DEFINITION_ARTIFACT: &str = "02_definition.json";
pub const CANONICALIZATION_ARTIFACT: &str = "03_canonicalization.json";
pub const INTEGRATION_LOG_ARTIFACT: &str = "04_integration_log.json";

/// Best-effort writer for per-stage debug artifacts. Failures are logged
/// and swallowed; artifact I/O is never on a run's critical path.
#[derive(Debug, Clone)]
pub struct DebugWriter {
    dir: Option<PathBuf>,
}

impl DebugWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir: Some(dir) }
    }

    /// Writer that drops everything; used when debug output is disabled.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub async fn write<T: Serialize>(&self, name: &str, value: &T) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %err, "could not create debug directory");
            return;
        }
        let json = match serde_json::to_vec_pretty(value) {
            Ok(json) => json,
            Err(err) => {
                warn!(artifact = name, error = %err, "could not serialize debug artifact");
                return;
            }
        };
        let path = dir.join(name);
        if let Err(err) = tokio::fs::write(&path, json).await {
            warn!(path = %path.display(), error = %err, "could not write debug artifact");
        }
    }
}
