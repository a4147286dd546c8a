// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion access. Everything that talks to a model goes through
/// this trait so the pipeline can run against scripted responses in tests.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String>;
}

/// OpenAI-compatible chat completions over HTTP
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Octostudy/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });

        debug!("Chat completion request: model={}", model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&body)?)
            .send()
            .await
            .context("Failed to reach chat completions endpoint")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read chat completion response")?;

        if !status.is_success() {
            anyhow::bail!(
                "Chat completion failed with HTTP {}: {}",
                status,
                excerpt(&text, 200)
            );
        }

        let payload: Value =
            serde_json::from_str(&text).context("Failed to decode chat completion response")?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Chat completion response has no message content"))?;

        Ok(content.to_string())
    }
}

/// Coerce model output into parseable JSON. Strips code fences, cuts
/// surrounding prose down to the outermost object or array, and drops
/// trailing commas before delimiters. This is the only JSON-repair path
/// in the crate.
pub fn coerce_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let without_fences = strip_code_fences(trimmed);
    let core = extract_json_core(&without_fences).unwrap_or(without_fences.as_str());
    let cleaned = strip_trailing_commas(core);

    serde_json::from_str(&cleaned)
        .with_context(|| format!("Model output is not valid JSON: {}", excerpt(raw, 120)))
}

fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slice from the first `{` or `[` to its matching last delimiter
fn extract_json_core(text: &str) -> Option<&str> {
    let object_start = text.find('{');
    let array_start = text.find('[');

    let (start, close) = match (object_start, array_start) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };

    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn strip_trailing_commas(text: &str) -> String {
    static TRAILING_COMMAS: OnceLock<regex::Regex> = OnceLock::new();
    let re = TRAILING_COMMAS
        .get_or_init(|| regex::Regex::new(r",\s*([}\]])").expect("pattern compiles"));
    re.replace_all(text, "$1").into_owned()
}

pub fn excerpt(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let cut = crate::analysis::chunker::floor_char_boundary(text, max_bytes);
    format!("{}...", &text[..cut])
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted chat client for tests: pops queued responses in order and
    /// records every call it receives.
    pub struct ScriptedChat {
        responses: Mutex<VecDeque<Result<String, String>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedChat {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn push_ok(&self, text: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(text.to_string()));
        }

        pub fn push_err(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
        }

        /// (model, user prompt) pairs in call order
        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(
            &self,
            model: &str,
            messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String> {
            let prompt = messages
                .iter()
                .filter(|m| m.role == "user")
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n");
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), prompt));

            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("Scripted response queue is empty")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_json_direct() {
        let value = coerce_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_coerce_json_strips_fences() {
        let raw = "```json\n{\"key\": [\"one\", \"two\"]}\n```";
        let value = coerce_json(raw).unwrap();
        assert_eq!(value["key"][1], "two");
    }

    #[test]
    fn test_coerce_json_cuts_surrounding_prose() {
        let raw = "Here is the analysis you asked for:\n{\"question_1\": [\"x\"]}\nHope this helps!";
        let value = coerce_json(raw).unwrap();
        assert_eq!(value["question_1"][0], "x");
    }

    #[test]
    fn test_coerce_json_drops_trailing_commas() {
        let raw = r#"{"items": ["a", "b",], "nested": {"k": 1,},}"#;
        let value = coerce_json(raw).unwrap();
        assert_eq!(value["items"][1], "b");
        assert_eq!(value["nested"]["k"], 1);
    }

    #[test]
    fn test_coerce_json_array_payload() {
        let raw = "The list:\n```\n[1, 2, 3,]\n```";
        let value = coerce_json(raw).unwrap();
        assert_eq!(value[2], 3);
    }

    #[test]
    fn test_coerce_json_rejects_garbage() {
        assert!(coerce_json("not json at all").is_err());
        assert!(coerce_json("").is_err());
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "Gedächtnis und Überblick über alles was wir lesen";
        let short = excerpt(text, 12);
        assert!(short.ends_with("..."));
        assert!(short.len() <= 16);
    }
}
