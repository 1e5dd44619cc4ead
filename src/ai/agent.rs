use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::llm::{ChatModel, ChatRequest, from_structured};

/// A capability the agent can invoke. Inputs and outputs are JSON strings;
/// tool failures are reported back to the agent as observations rather
/// than ending the loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn invoke(&self, input: &str) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub system_prompt: String,
    /// Observations longer than this are clipped before re-entering the
    /// prompt, keeping transcripts bounded.
    pub max_observation_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            system_prompt: "You curate a cumulative knowledge graph of academic papers. \
Reason step by step about which papers to discover, download and process, and inspect the \
graph to avoid redundant work. Use a tool when you need one; finish with a summary of what \
the graph gained. Always return JSON matching the provided schema."
                .to_string(),
            max_observation_chars: 4000,
        }
    }
}

/// One completed turn of the loop. A tool turn carries the call and its
/// observation; the closing turn carries reasoning only.
#[derive(Debug, Clone)]
pub struct AgentStep {
    pub reasoning: String,
    pub tool: Option<String>,
    pub arguments: Option<String>,
    pub observation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub final_answer: String,
    pub steps: Vec<AgentStep>,
}

/// ReACT loop over the tool roster. Each turn the model is shown the task,
/// the roster and the transcript so far, and picks a single move: `call`
/// one tool, or `done` with the answer. All durable state lives in the
/// graph store; the transcript is the loop's only memory.
pub struct ReActAgent {
    model: Arc<dyn ChatModel>,
    config: AgentConfig,
    tools: HashMap<String, Arc<dyn Tool>>,
    roster: Vec<String>,
}

impl ReActAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            config: AgentConfig::default(),
            tools: HashMap::new(),
            roster: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<T>(self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register_arc(Arc::new(tool))
    }

    /// Later registrations under an already-taken name replace the tool
    /// but keep its roster position.
    pub fn register_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.roster.push(name);
        }
        self
    }

    pub async fn run(&self, task: &str) -> Result<AgentOutcome> {
        let mut steps: Vec<AgentStep> = Vec::new();

        for turn in 1..=self.config.max_steps {
            let chosen = self.request_move(task, &steps).await?;
            match chosen.next.as_str() {
                "call" => {
                    info!(turn, tool = %chosen.tool, "agent tool call");
                    let observation = self.observe(&chosen.tool, &chosen.arguments).await;
                    steps.push(AgentStep {
                        reasoning: chosen.reasoning,
                        tool: Some(chosen.tool),
                        arguments: Some(chosen.arguments),
                        observation: Some(clip(observation, self.config.max_observation_chars)),
                    });
                }
                "done" => {
                    if chosen.answer.trim().is_empty() {
                        return Err(anyhow!("agent finished without an answer"));
                    }
                    steps.push(AgentStep {
                        reasoning: chosen.reasoning,
                        tool: None,
                        arguments: None,
                        observation: None,
                    });
                    return Ok(AgentOutcome {
                        final_answer: chosen.answer,
                        steps,
                    });
                }
                other => return Err(anyhow!("agent chose an unknown move `{other}`")),
            }
        }

        Err(anyhow!(
            "no final answer within {} turns",
            self.config.max_steps
        ))
    }

    async fn observe(&self, tool_name: &str, arguments: &str) -> String {
        let Some(tool) = self.tools.get(tool_name) else {
            return format!("no such tool: {tool_name}");
        };
        match tool.invoke(arguments).await {
            Ok(output) => output,
            Err(err) => {
                warn!(tool = tool_name, error = %err, "tool returned an error");
                format!("tool `{tool_name}` failed: {err:#}")
            }
        }
    }

    async fn request_move(&self, task: &str, steps: &[AgentStep]) -> Result<AgentMove> {
        let roster: Vec<&str> = self.roster.iter().map(String::as_str).collect();
        let prompt = self.render_prompt(task, steps);
        let reply = self
            .model
            .structured_json(ChatRequest {
                system: &self.config.system_prompt,
                user: &prompt,
                schema_name: "agent_move",
                schema: agent_move_schema(&roster),
            })
            .await?;
        from_structured(reply)
    }

    fn render_prompt(&self, task: &str, steps: &[AgentStep]) -> String {
        let mut prompt = format!("Task: {task}\n");

        if self.roster.is_empty() {
            prompt.push_str("\nYou have no tools; reply with next=\"done\" and your answer.\n");
        } else {
            prompt.push_str("\nTools at your disposal:\n");
            for name in &self.roster {
                let _ = writeln!(prompt, "  {}: {}", name, self.tools[name].description());
            }
        }

        prompt.push_str("\nTranscript:\n");
        if steps.is_empty() {
            prompt.push_str("  (nothing attempted yet)\n");
        }
        for (turn, step) in steps.iter().enumerate() {
            let _ = writeln!(prompt, "  [{}] {}", turn + 1, step.reasoning);
            if let (Some(tool), Some(arguments)) = (&step.tool, &step.arguments) {
                let _ = writeln!(prompt, "      call: {tool} {arguments}");
            }
            if let Some(observation) = &step.observation {
                let _ = writeln!(prompt, "      result: {observation}");
            }
        }

        prompt.push_str(
            "\nPick your next move: next=\"call\" runs one tool with JSON arguments, \
next=\"done\" delivers the final answer.",
        );
        prompt
    }
}

/// Raw move as the model emits it; `run` rejects inconsistent shapes.
#[derive(Debug, Deserialize)]
struct AgentMove {
    next: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    arguments: String,
    #[serde(default)]
    answer: String,
}

fn agent_move_schema(tool_names: &[&str]) -> Value {
    let mut properties = Map::new();
    let moves: &[&str] = if tool_names.is_empty() {
        &["done"]
    } else {
        &["call", "done"]
    };
    properties.insert("next".into(), json!({ "type": "string", "enum": moves }));
    properties.insert("reasoning".into(), json!({ "type": "string" }));
    properties.insert("answer".into(), json!({ "type": "string" }));
    if !tool_names.is_empty() {
        properties.insert("tool".into(), json!({ "type": "string", "enum": tool_names }));
        properties.insert("arguments".into(), json!({ "type": "string" }));
    }
    let required: Vec<String> = properties.keys().cloned().collect();

    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
        "required": required,
    })
}

fn clip(mut text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len());
    text.truncate(cut);
    text.push_str(" [truncated]");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoModel;

    #[async_trait]
    impl ChatModel for NoModel {
        async fn structured_json(&self, _request: ChatRequest<'_>) -> Result<Value> {
            Err(anyhow!("unused"))
        }

        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            Err(anyhow!("unused"))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "repeats its input"
        }

        async fn invoke(&self, input: &str) -> Result<String> {
            Ok(input.to_string())
        }
    }

    #[test]
    fn toolless_agents_can_only_finish() {
        let schema = agent_move_schema(&[]);
        let moves = schema["properties"]["next"]["enum"].as_array().unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0], "done");
        assert!(schema["properties"].get("tool").is_none());
    }

    #[test]
    fn call_moves_are_pinned_to_the_roster() {
        let schema = agent_move_schema(&["search_papers", "process_paper"]);
        let moves = schema["properties"]["next"]["enum"].as_array().unwrap();
        assert!(moves.contains(&json!("call")));
        let roster = schema["properties"]["tool"]["enum"].as_array().unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0], "search_papers");
    }

    #[test]
    fn oversized_observations_are_clipped() {
        let clipped = clip("y".repeat(32), 8);
        assert!(clipped.starts_with("yyyyyyyy"));
        assert!(clipped.ends_with("[truncated]"));
        assert_eq!(clip("short".to_string(), 8), "short");
    }

    #[test]
    fn prompt_lists_roster_and_prior_turns() {
        let agent = ReActAgent::new(Arc::new(NoModel)).register(EchoTool);
        let steps = vec![AgentStep {
            reasoning: "see what the graph holds".to_string(),
            tool: Some("echo".to_string()),
            arguments: Some("{}".to_string()),
            observation: Some("{\"total\": 3}".to_string()),
        }];

        let prompt = agent.render_prompt("grow the graph", &steps);
        assert!(prompt.contains("Task: grow the graph"));
        assert!(prompt.contains("echo: repeats its input"));
        assert!(prompt.contains("[1] see what the graph holds"));
        assert!(prompt.contains("call: echo {}"));
        assert!(prompt.contains("result: {\"total\": 3}"));
    }
}
