use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, warn};

use crate::resilience::{RetryOptions, with_retry};

/// Turns a paper file into markdown text. The PDF machinery itself lives
/// behind an external service; locally we only handle plain text.
#[async_trait]
pub trait PaperParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<String>;
}

/// Client for the hosted extraction service: upload the blob, receive a
/// job id, poll until the job settles.
pub struct RemoteParser {
    http: Client,
    api_key: String,
    base: String,
}

impl RemoteParser {
    pub fn new(api_key: String, base: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("client");
        Self { http, api_key, base }
    }

    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/v1/parse", self.base))
            .bearer_auth(&self.api_key)
            .header("x-file-name", filename)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .send()
            .await
            .with_context(|| "parser upload failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_parser_status(status, &body));
        }

        let payload: Value = resp
            .json()
            .await
            .with_context(|| "error decoding parser upload reply")?;
        payload
            .get("job_id")
            .or_else(|| payload.get("id"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("parser upload reply carried no job id"))
    }

    async fn poll(&self, job_id: &str) -> Result<String> {
        let overall = Duration::from_secs(600);
        let mut delay = Duration::from_secs(2);

        timeout(overall, async {
            loop {
                let resp = self
                    .http
                    .get(format!("{}/v1/jobs/{job_id}", self.base))
                    .bearer_auth(&self.api_key)
                    .send()
                    .await;

                match resp {
                    Ok(resp) if resp.status().is_success() => {
                        let payload: Value = resp
                            .json()
                            .await
                            .with_context(|| format!("error decoding parser job {job_id}"))?;
                        match payload.get("status").and_then(Value::as_str) {
                            Some("completed") => {
                                return payload
                                    .get("markdown")
                                    .or_else(|| payload.get("result"))
                                    .and_then(Value::as_str)
                                    .map(str::to_owned)
                                    .ok_or_else(|| {
                                        anyhow!("parser job {job_id} completed without text")
                                    });
                            }
                            Some(status @ ("failed" | "cancelled")) => {
                                let detail = payload
                                    .pointer("/error/message")
                                    .and_then(Value::as_str)
                                    .unwrap_or("no detail provided");
                                return Err(anyhow!(
                                    "parser job {job_id} {status}: {detail}"
                                ));
                            }
                            _ => debug!(job_id, "parser job still running"),
                        }
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                            warn!(job_id, %status, "transient poll failure; retrying");
                        } else {
                            return Err(classify_parser_status(status, &body));
                        }
                    }
                    Err(err) => {
                        warn!(job_id, error = %err, "network error polling parser; retrying");
                    }
                }

                sleep(delay + Duration::from_millis(fastrand::u64(0..500))).await;
                delay = (delay * 2).min(Duration::from_secs(20));
            }
        })
        .await
        .map_err(|_| anyhow!("parser job {job_id} timed out"))?
    }
}

fn classify_parser_status(status: StatusCode, body: &str) -> anyhow::Error {
    match status {
        StatusCode::PAYMENT_REQUIRED => anyhow!("parser quota exhausted: 402 Payment Required"),
        StatusCode::UNAUTHORIZED => anyhow!("parser credentials rejected: 401 Unauthorized"),
        StatusCode::FORBIDDEN => anyhow!("parser access denied: 403 Forbidden"),
        StatusCode::NOT_FOUND => anyhow!("parser endpoint returned 404"),
        _ => anyhow!("parser returned {status}: {body}"),
    }
}

#[async_trait]
impl PaperParser for RemoteParser {
    async fn parse(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("file {} is empty", path.display()));
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("paper.pdf")
            .to_string();

        let job_id = self.upload(bytes, &filename).await?;
        self.poll(&job_id).await
    }
}

/// Reads UTF-8 text files directly, without the remote service.
#[derive(Debug, Default, Clone)]
pub struct LocalTextParser;

const LOCAL_EXTENSIONS: &[&str] = &["txt", "md"];

impl LocalTextParser {
    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| LOCAL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl PaperParser for LocalTextParser {
    async fn parse(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| anyhow!("file {} is not valid UTF-8", path.display()))?;
        if text.trim().is_empty() {
            return Err(anyhow!("file {} contains only whitespace", path.display()));
        }
        Ok(text)
    }
}

/// Routing parser used by the pipeline: plain-text files go straight to
/// the local reader, everything else to the remote service with the
/// external-API retry policy.
pub struct DocumentParser {
    remote: Option<Arc<RemoteParser>>,
    local: LocalTextParser,
}

impl DocumentParser {
    pub fn new(remote: Option<Arc<RemoteParser>>) -> Self {
        Self {
            remote,
            local: LocalTextParser,
        }
    }
}

#[async_trait]
impl PaperParser for DocumentParser {
    async fn parse(&self, path: &Path) -> Result<String> {
        if LocalTextParser::supports(path) {
            return self.local.parse(path).await;
        }
        match &self.remote {
            Some(remote) => {
                let remote = Arc::clone(remote);
                let path = path.to_path_buf();
                with_retry("parser", RetryOptions::default(), move || {
                    let remote = Arc::clone(&remote);
                    let path = path.clone();
                    async move { remote.parse(&path).await }
                })
                .await
            }
            None => Err(anyhow!(
                "no parser service configured and {} is not plain text",
                path.display()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn local_parser_recognizes_text_extensions() {
        assert!(LocalTextParser::supports(Path::new("notes.md")));
        assert!(LocalTextParser::supports(Path::new("paper.TXT")));
        assert!(!LocalTextParser::supports(Path::new("paper.pdf")));
        assert!(!LocalTextParser::supports(Path::new("no_extension")));
    }

    #[tokio::test]
    async fn local_parser_rejects_whitespace_only_files() -> Result<()> {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt")?;
        write!(file, "   \n\t ")?;
        let result = LocalTextParser.parse(file.path()).await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn local_parser_reads_utf8_text() -> Result<()> {
        let mut file = tempfile::NamedTempFile::with_suffix(".md")?;
        write!(file, "# NeRF\n\nNeural radiance fields.")?;
        let text = LocalTextParser.parse(file.path()).await?;
        assert!(text.contains("radiance"));
        Ok(())
    }
}
