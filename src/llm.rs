//! The exact seam at which this crate is agnostic to the concrete LLM
//! provider: a `system prompt + ordered messages -> final text (+ optional
//! tool calls)` trait, matching this codebase's existing pattern of putting
//! a trait at every external-collaborator boundary (`Planner`, `Reviewer`).
//! Provider selection, auth, and the request/response wire format are the
//! caller's responsibility; this crate only depends on the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One message in the running conversation handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tool invocation an agent wants executed before it will produce a final
/// answer. `arguments` is validated against the tool's schema by the tool
/// registry, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One round of agent output: either a final text response, or zero-or-more
/// tool calls the orchestrator must execute and feed back before asking the
/// model to continue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// A structured-output artifact some LLM runtimes attach alongside the
    /// text (e.g. a function-calling "final answer" payload). When present,
    /// the phase orchestrator checks it first before falling back to
    /// JSON-parsing `text` (SPEC_FULL.md §4.8).
    #[serde(default)]
    pub structured_output: Option<serde_json::Value>,
}

impl AgentResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            structured_output: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// The provider-agnostic chat-invocation interface. Implementations wrap a
/// concrete provider SDK (or, in tests, a scripted/mock sequence).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
    ) -> anyhow::Result<AgentResponse>;
}

/// Test-only client implementations. Not gated behind `#[cfg(test)]` so the
/// crate's own integration tests under `tests/` can reach it too.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// A scripted client for tests: returns the next response in a fixed
    /// sequence, cycling the last entry once exhausted.
    pub struct ScriptedClient {
        responses: Mutex<Vec<AgentResponse>>,
        cursor: Mutex<usize>,
    }

    impl ScriptedClient {
        pub fn new(responses: Vec<AgentResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                cursor: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[Message],
        ) -> anyhow::Result<AgentResponse> {
            let responses = self.responses.lock().unwrap();
            let mut cursor = self.cursor.lock().unwrap();
            let idx = (*cursor).min(responses.len() - 1);
            let response = responses[idx].clone();
            *cursor += 1;
            Ok(response)
        }
    }
}
