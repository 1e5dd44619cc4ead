use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::time::Duration;

/// Width of every entity embedding; the store's vector column is fixed to
/// this and mismatched vectors are rejected before they reach it.
pub const EMBEDDING_DIM: usize = 768;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct EmbeddingClient {
    http: Client,
    api_key: String,
    base: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(api_key: String, base: Option<String>, model: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("client");
        Self {
            http,
            api_key,
            base: base.unwrap_or_else(|| "https://api.openai.com".into()),
            model,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": [text],
            "dimensions": EMBEDDING_DIM,
        });

        let resp = self
            .http
            .post(format!("{}/v1/embeddings", self.base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| "embedding request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("embedding provider returned {status}: {body}"));
        }

        let payload: Value = resp
            .json()
            .await
            .with_context(|| "error decoding embedding payload")?;

        let vector: Vec<f32> = payload
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("embedding payload carried no vector"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or_default() as f32)
            .collect();

        if vector.len() != EMBEDDING_DIM {
            return Err(anyhow!(
                "embedding provider returned {} dimensions, expected {EMBEDDING_DIM}",
                vector.len()
            ));
        }

        Ok(vector)
    }
}
