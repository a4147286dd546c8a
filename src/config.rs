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

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub default_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
            default_model: "gpt-5-mini".to_string(),
        }
    }
}

/// Pipeline defaults used when the model catalog has no better answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
    /// Chapters shorter than this many characters are skipped at extraction
    pub min_content_length: usize,
    pub include_back_matter: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 8000,
            overlap_tokens: 500,
            min_content_length: 100,
            include_back_matter: false,
        }
    }
}

/// Per-model capabilities. Model behavior is driven by this table,
/// never by matching on model name strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub max_tokens: usize,
    pub chunk_tokens: usize,
    pub cost_per_1k_tokens: f64,
    /// Model to retry synthesis with after a failed call, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_fallback: Option<String>,
}

/// Main configuration for octostudy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub models: HashMap<String, ModelProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            models: default_models(),
        }
    }
}

fn default_models() -> HashMap<String, ModelProfile> {
    let mut models = HashMap::new();
    models.insert(
        "gpt-5-mini".to_string(),
        ModelProfile {
            max_tokens: 150_000,
            chunk_tokens: 22_000,
            cost_per_1k_tokens: 0.48,
            retry_fallback: None,
        },
    );
    models.insert(
        "gpt-5o".to_string(),
        ModelProfile {
            max_tokens: 200_000,
            chunk_tokens: 25_000,
            cost_per_1k_tokens: 4.0,
            retry_fallback: None,
        },
    );
    models.insert(
        "gpt-4.1".to_string(),
        ModelProfile {
            max_tokens: 150_000,
            chunk_tokens: 22_000,
            cost_per_1k_tokens: 8.0,
            retry_fallback: Some("gpt-4".to_string()),
        },
    );
    models.insert(
        "gpt-4.1-2025-04-14".to_string(),
        ModelProfile {
            max_tokens: 150_000,
            chunk_tokens: 22_000,
            cost_per_1k_tokens: 8.0,
            retry_fallback: Some("gpt-4".to_string()),
        },
    );
    models.insert(
        "o3".to_string(),
        ModelProfile {
            max_tokens: 200_000,
            chunk_tokens: 25_000,
            cost_per_1k_tokens: 5.0,
            retry_fallback: Some("gpt-4".to_string()),
        },
    );
    models.insert(
        "o3-2025-04-16".to_string(),
        ModelProfile {
            max_tokens: 200_000,
            chunk_tokens: 25_000,
            cost_per_1k_tokens: 5.0,
            retry_fallback: Some("gpt-4".to_string()),
        },
    );
    models.insert(
        "o3-mini".to_string(),
        ModelProfile {
            max_tokens: 200_000,
            chunk_tokens: 25_000,
            cost_per_1k_tokens: 5.0,
            retry_fallback: None,
        },
    );
    models.insert(
        "gpt-4".to_string(),
        ModelProfile {
            max_tokens: 128_000,
            chunk_tokens: 8_000,
            cost_per_1k_tokens: 30.0,
            retry_fallback: None,
        },
    );
    models
}

impl Config {
    /// Load configuration from config.toml file
    /// First tries to load from system config directory, falls back to embedded template
    pub fn load() -> Result<Self> {
        // Try to load from system config directory
        let config_path = crate::storage::get_system_config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Config doesn't exist, create from template
            let template_content = include_str!("../config-templates/default.toml");
            let config: Self = toml::from_str(template_content)?;

            // Save to system config directory
            if let Some(parent) = config_path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&config_path, template_content)?;

            Ok(config)
        }
    }

    /// Capabilities for a model, with conservative defaults for ids the
    /// catalog does not know
    pub fn model_profile(&self, model: &str) -> ModelProfile {
        self.models.get(model).cloned().unwrap_or(ModelProfile {
            max_tokens: 128_000,
            chunk_tokens: self.pipeline.max_tokens_per_chunk,
            cost_per_1k_tokens: 0.0,
            retry_fallback: None,
        })
    }

    /// API key from the configured environment variable, if set
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Base URL, with OPENAI_BASE_URL taking precedence over the file
    pub fn resolve_base_url(&self) -> String {
        std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.llm.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_template_matches_config_shape() {
        let template = include_str!("../config-templates/default.toml");
        let config: Config = toml::from_str(template).unwrap();
        assert_eq!(config.llm.default_model, "gpt-5-mini");
        assert!(config.models.contains_key("gpt-5-mini"));
        assert_eq!(
            config.models["o3"].retry_fallback.as_deref(),
            Some("gpt-4")
        );
    }

    #[test]
    fn test_unknown_model_gets_conservative_profile() {
        let config = Config::default();
        let profile = config.model_profile("some-future-model");
        assert_eq!(profile.chunk_tokens, config.pipeline.max_tokens_per_chunk);
        assert!(profile.retry_fallback.is_none());
    }

    #[test]
    fn test_known_model_profile_lookup() {
        let config = Config::default();
        let profile = config.model_profile("gpt-5-mini");
        assert_eq!(profile.chunk_tokens, 22_000);
        assert_eq!(profile.max_tokens, 150_000);
    }
}
