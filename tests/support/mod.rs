use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use paper_graph::ai::llm::{ChatModel, ChatRequest};
use paper_graph::graph::Entity;

/// Chat model double with per-schema scripted replies. Replies are popped
/// in push order; running out of script is an error, which mirrors a
/// provider outage for the component under test.
#[derive(Default)]
pub struct ScriptedChat {
    structured: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    chat: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<HashMap<String, usize>>,
}

struct ScriptedReply {
    /// When set, the reply only answers prompts containing this needle;
    /// keeps concurrent fan-outs deterministic.
    needle: Option<String>,
    reply: Result<Value, String>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_reply(&self, schema_name: &str, needle: Option<String>, reply: Result<Value, String>) {
        self.structured
            .lock()
            .expect("structured lock")
            .entry(schema_name.to_string())
            .or_default()
            .push_back(ScriptedReply { needle, reply });
    }

    pub fn push(&self, schema_name: &str, reply: Value) {
        self.push_reply(schema_name, None, Ok(reply));
    }

    pub fn push_matched(&self, schema_name: &str, needle: &str, reply: Value) {
        self.push_reply(schema_name, Some(needle.to_string()), Ok(reply));
    }

    pub fn push_err(&self, schema_name: &str, message: &str) {
        self.push_reply(schema_name, None, Err(message.to_string()));
    }

    pub fn push_chat(&self, reply: &str) {
        self.chat
            .lock()
            .expect("chat lock")
            .push_back(Ok(reply.to_string()));
    }

    /// How many structured calls were made against a given schema.
    pub fn calls(&self, schema_name: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(schema_name)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn structured_json(&self, request: ChatRequest<'_>) -> Result<Value> {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(request.schema_name.to_string())
            .or_default() += 1;
        let reply = {
            let mut structured = self.structured.lock().expect("structured lock");
            structured.get_mut(request.schema_name).and_then(|queue| {
                let position = queue.iter().position(|scripted| {
                    scripted
                        .needle
                        .as_deref()
                        .map(|needle| request.user.contains(needle))
                        .unwrap_or(true)
                });
                position.and_then(|at| queue.remove(at))
            })
        };
        match reply {
            Some(ScriptedReply { reply: Ok(value), .. }) => Ok(value),
            Some(ScriptedReply { reply: Err(message), .. }) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted reply for schema {}", request.schema_name)),
        }
    }

    async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
        match self.chat.lock().expect("chat lock").pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted chat reply")),
        }
    }
}

pub fn entity(id: &str, name: &str, entity_type: &str) -> Entity {
    Entity::new(id, name, entity_type)
}
