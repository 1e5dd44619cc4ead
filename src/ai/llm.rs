use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time::Duration;

/// A JSON-structured chat request. The schema is forwarded to the provider
/// as a response-format hint and enforced again locally when the reply is
/// deserialized.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub schema_name: &'a str,
    pub schema: Value,
}

/// Chat seam used by the extractor, definer, pre-parser, resolver and the
/// agent. The adapter never retries on its own; callers wrap calls in
/// [`crate::resilience::with_retry`].
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Structured mode: returns the parsed JSON object, with code fences
    /// stripped and prompt-drift field aliases normalized.
    async fn structured_json(&self, request: ChatRequest<'_>) -> Result<Value>;

    /// Unstructured mode: returns the raw reply text.
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub struct ChatClient {
    http: Client,
    api_key: String,
    base: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_key: String, base: Option<String>, model: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(600))
            .build()
            .expect("client");
        Self {
            http,
            api_key,
            base: base.unwrap_or_else(|| "https://api.openai.com".into()),
            model,
        }
    }

    async fn post_completion(&self, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| "chat completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("chat provider returned {status}: {body}"));
        }

        resp.json::<Value>()
            .await
            .with_context(|| "error decoding chat completion payload")
    }

    fn message_content(payload: &Value) -> Result<String> {
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("chat completion payload carried no message content"))
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn structured_json(&self, request: ChatRequest<'_>) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema
                }
            }
        });

        let payload = self.post_completion(&body).await?;
        let content = Self::message_content(&payload)?;
        parse_structured_reply(&content)
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let payload = self.post_completion(&body).await?;
        Self::message_content(&payload)
    }
}

/// Parse a model reply into JSON, stripping markdown code fences and
/// normalizing the `nodes`/`edges` aliases some prompts drift into.
pub fn parse_structured_reply(content: &str) -> Result<Value> {
    let stripped = strip_code_fences(content);
    let value: Value = serde_json::from_str(stripped.trim())
        .with_context(|| "model reply is not valid JSON")?;
    Ok(normalize_graph_aliases(value))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop an optional language tag on the opening fence
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest)
}

fn normalize_graph_aliases(mut value: Value) -> Value {
    if let Value::Object(ref mut map) = value {
        if !map.contains_key("entities") {
            if let Some(nodes) = map.remove("nodes") {
                map.insert("entities".to_string(), nodes);
            }
        }
        if !map.contains_key("relationships") {
            if let Some(edges) = map.remove("edges") {
                map.insert("relationships".to_string(), edges);
            }
        }
    }
    value
}

/// Deserialize a structured reply into `T`, failing loudly on mismatch.
pub fn from_structured<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).with_context(|| "model reply did not match the expected schema")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json() -> Result<()> {
        let reply = "```json\n{\"entities\": []}\n```";
        let value = parse_structured_reply(reply)?;
        assert!(value["entities"].as_array().is_some());
        Ok(())
    }

    #[test]
    fn normalizes_node_and_edge_aliases() -> Result<()> {
        let reply = r#"{"nodes": [{"id": "a"}], "edges": []}"#;
        let value = parse_structured_reply(reply)?;
        assert_eq!(value["entities"][0]["id"], "a");
        assert!(value["relationships"].as_array().is_some());
        assert!(value.get("nodes").is_none());
        Ok(())
    }

    #[test]
    fn garbage_fails_loudly() {
        assert!(parse_structured_reply("not json at all").is_err());
    }
}
