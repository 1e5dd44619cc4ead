use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::resilience::{RetryOptions, with_retry};

const OPENALEX_BASE: &str = "https://api.openalex.org";
const SEMANTIC_SCHOLAR_BASE: &str = "https://api.semanticscholar.org/graph/v1";

/// Discovery-level view of a paper, as the agent tools pass it around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSummary {
    pub id: String,
    pub title: String,
    pub citation_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorksPage {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    cited_by_count: i64,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    best_oa_location: Option<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    #[serde(default)]
    pdf_url: Option<String>,
}

impl From<Work> for PaperSummary {
    fn from(work: Work) -> Self {
        PaperSummary {
            id: short_openalex_id(&work.id),
            title: work.display_name.unwrap_or_else(|| "untitled".to_string()),
            citation_count: work.cited_by_count,
            pdf_url: work.best_oa_location.and_then(|loc| loc.pdf_url),
            doi: work.doi,
        }
    }
}

/// OpenAlex work ids arrive as full URLs; the API accepts the bare W-id.
fn short_openalex_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

/// OpenAlex-backed paper discovery with a Semantic Scholar fallback for
/// PDF resolution, plus the download-to-disk step.
pub struct DiscoveryClient {
    http: Client,
    mailto: Option<String>,
    papers_dir: PathBuf,
}

impl DiscoveryClient {
    pub fn new(mailto: Option<String>, papers_dir: PathBuf) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("client");
        Self {
            http,
            mailto,
            papers_dir,
        }
    }

    async fn fetch_works(&self, url: String) -> Result<Vec<PaperSummary>> {
        let http = self.http.clone();
        let page: WorksPage = with_retry("openalex", RetryOptions::default(), move || {
            let http = http.clone();
            let url = url.clone();
            async move {
                let resp = http
                    .get(&url)
                    .send()
                    .await
                    .with_context(|| "paper discovery request failed")?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(anyhow!("discovery API returned {status}: {body}"));
                }
                resp.json::<WorksPage>()
                    .await
                    .with_context(|| "error decoding discovery payload")
            }
        })
        .await?;

        Ok(page.results.into_iter().map(PaperSummary::from).collect())
    }

    fn mailto_param(&self) -> String {
        self.mailto
            .as_deref()
            .map(|m| format!("&mailto={m}"))
            .unwrap_or_default()
    }

    pub async fn search_papers(&self, query: &str, limit: usize) -> Result<Vec<PaperSummary>> {
        let url = format!(
            "{OPENALEX_BASE}/works?search={}&per-page={}{}",
            urlencode(query),
            limit.clamp(1, 50),
            self.mailto_param(),
        );
        let papers = self.fetch_works(url).await?;
        debug!(query, found = papers.len(), "paper search complete");
        Ok(papers)
    }

    pub async fn citations(&self, paper_id: &str, limit: usize) -> Result<Vec<PaperSummary>> {
        let url = format!(
            "{OPENALEX_BASE}/works?filter=cites:{}&per-page={}{}",
            short_openalex_id(paper_id),
            limit.clamp(1, 50),
            self.mailto_param(),
        );
        self.fetch_works(url).await
    }

    /// Resolve a downloadable PDF url: the OpenAlex open-access location
    /// when present, otherwise Semantic Scholar looked up by DOI.
    pub async fn resolve_pdf_url(&self, paper: &PaperSummary) -> Result<String> {
        if let Some(url) = &paper.pdf_url {
            return Ok(url.clone());
        }
        let Some(doi) = &paper.doi else {
            return Err(anyhow!(
                "paper {} has no open-access PDF and no DOI for fallback lookup",
                paper.id
            ));
        };
        let doi = doi.trim_start_matches("https://doi.org/").to_string();
        warn!(paper = %paper.id, "no OpenAlex PDF; trying Semantic Scholar");

        let http = self.http.clone();
        let payload: serde_json::Value =
            with_retry("semantic_scholar", RetryOptions::default(), move || {
                let http = http.clone();
                let doi = doi.clone();
                async move {
                    let url = format!(
                        "{SEMANTIC_SCHOLAR_BASE}/paper/DOI:{doi}?fields=openAccessPdf"
                    );
                    let resp = http
                        .get(&url)
                        .send()
                        .await
                        .with_context(|| "fallback PDF lookup failed")?;
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Err(anyhow!("fallback provider returned 404 for DOI {doi}"));
                    }
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(anyhow!("fallback provider returned {status}: {body}"));
                    }
                    resp.json().await.with_context(|| "error decoding fallback payload")
                }
            })
            .await?;

        payload
            .pointer("/openAccessPdf/url")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("no open-access PDF found for paper {}", paper.id))
    }

    /// Download the paper's PDF into the papers directory, never clobbering
    /// an existing file.
    pub async fn download(&self, paper: &PaperSummary) -> Result<PathBuf> {
        let url = self.resolve_pdf_url(paper).await?;

        let http = self.http.clone();
        let bytes = with_retry("pdf_download", RetryOptions::default(), move || {
            let http = http.clone();
            let url = url.clone();
            async move {
                let resp = http
                    .get(&url)
                    .send()
                    .await
                    .with_context(|| "PDF download failed")?;
                let status = resp.status();
                if status == StatusCode::NOT_FOUND {
                    return Err(anyhow!("PDF url returned 404"));
                }
                if !status.is_success() {
                    return Err(anyhow!("PDF url returned {status}"));
                }
                resp.bytes().await.with_context(|| "error reading PDF body")
            }
        })
        .await?;

        tokio::fs::create_dir_all(&self.papers_dir)
            .await
            .with_context(|| format!("failed to create {}", self.papers_dir.display()))?;

        let path = unique_path(&self.papers_dir, &sanitize_filename(&paper.title));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(paper = %paper.id, path = %path.display(), bytes = bytes.len(), "paper downloaded");
        Ok(path)
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(ch),
            ' ' => out.push('+'),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}

fn sanitize_filename(title: &str) -> String {
    let mut name: String = title
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { '_' })
        .collect();
    name.truncate(120);
    while name.ends_with('_') {
        name.pop();
    }
    if name.is_empty() {
        name.push_str("paper");
    }
    name.push_str(".pdf");
    name
}

fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let stem = filename.trim_end_matches(".pdf");
    let mut counter = 1usize;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}.pdf"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
