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

use anyhow::{bail, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::analysis::types::{
    ChunkAnalysis, Synthesis, SynthesisItem, SynthesisMetadata, SynthesisOutcome,
};
use crate::llm::{coerce_json, ChatClient, ChatMessage};

const SYNTHESIS_TEMPERATURE: f32 = 0.3;
/// Per-category cap on collected insights, guards the synthesis prompt
const COLLECTED_LIMIT: usize = 20;

/// Combines per-chunk insights into one cross-chunk synthesis. Degrades
/// to a deterministic local synthesis when the model cannot deliver.
pub struct InsightSynthesizer {
    client: Arc<dyn ChatClient>,
    model: String,
    retry_fallback: Option<String>,
}

#[derive(Debug, Default)]
struct CollectedInsights {
    key_concepts: Vec<String>,
    evidence_examples: Vec<String>,
    relationships: Vec<String>,
    insights: Vec<String>,
    questions_raised: Vec<String>,
    successful_chunks: usize,
}

/// Wire shape of a model-produced synthesis; every field is optional so
/// a partial answer still counts
#[derive(Debug, Default, Deserialize)]
struct SynthesisBody {
    #[serde(default)]
    main_themes: Vec<SynthesisItem>,
    #[serde(default)]
    key_principles: Vec<SynthesisItem>,
    #[serde(default)]
    critical_insights: Vec<SynthesisItem>,
    #[serde(default)]
    actionable_takeaways: Vec<SynthesisItem>,
    #[serde(default)]
    mental_models: Vec<SynthesisItem>,
    #[serde(default)]
    concept_connections: Vec<SynthesisItem>,
}

impl InsightSynthesizer {
    pub fn new(client: Arc<dyn ChatClient>, model: &str, retry_fallback: Option<String>) -> Self {
        Self {
            client,
            model: model.to_string(),
            retry_fallback,
        }
    }

    /// Synthesize a chapter. Zero valid chunk analyses yields the
    /// terminal no-insights marker; everything else yields a synthesis,
    /// falling back to the local merge when the model fails twice.
    pub async fn synthesize(
        &self,
        chunk_analyses: &[ChunkAnalysis],
        title: &str,
    ) -> SynthesisOutcome {
        info!("Synthesizing insights from {} chunks", chunk_analyses.len());

        let collected = collect_insights(chunk_analyses);
        if collected.successful_chunks == 0 {
            warn!("No valid data found in chunk analyses");
            return SynthesisOutcome::no_insights(chunk_analyses.len());
        }

        let mut synthesis = self.generate_synthesis(&collected, title).await;
        synthesis.metadata = SynthesisMetadata {
            total_chunks_processed: chunk_analyses.len(),
            successful_chunks: collected.successful_chunks,
            synthesis_model: self.model.clone(),
        };

        SynthesisOutcome::Ready(Box::new(synthesis))
    }

    async fn generate_synthesis(&self, collected: &CollectedInsights, title: &str) -> Synthesis {
        let prompt = build_synthesis_prompt(collected, title);

        match self.request_synthesis(&self.model, &prompt).await {
            Ok(synthesis) => synthesis,
            Err(e) => {
                error!("Synthesis with {} failed: {}", self.model, e);

                if let Some(fallback_model) = &self.retry_fallback {
                    info!("Retrying synthesis with fallback model {}", fallback_model);
                    match self.request_synthesis(fallback_model, &prompt).await {
                        Ok(synthesis) => return synthesis,
                        Err(retry_error) => {
                            error!(
                                "Fallback model {} also failed: {}",
                                fallback_model, retry_error
                            );
                        }
                    }
                }

                fallback_synthesis(collected)
            }
        }
    }

    async fn request_synthesis(&self, model: &str, prompt: &str) -> Result<Synthesis> {
        let response = self
            .client
            .complete(
                model,
                &[ChatMessage::user(prompt.to_string())],
                SYNTHESIS_TEMPERATURE,
            )
            .await?;

        let value = coerce_json(&response)?;
        if !value.is_object() {
            bail!("Synthesis response is not a JSON object");
        }

        let body: SynthesisBody = serde_json::from_value(value)?;
        Ok(body.into_synthesis())
    }
}

impl SynthesisBody {
    fn into_synthesis(self) -> Synthesis {
        Synthesis {
            main_themes: self.main_themes,
            key_principles: self.key_principles,
            critical_insights: self.critical_insights,
            actionable_takeaways: self.actionable_takeaways,
            mental_models: self.mental_models,
            concept_connections: self.concept_connections,
            metadata: blank_metadata(),
            fallback_mode: false,
            note: None,
        }
    }
}

fn blank_metadata() -> SynthesisMetadata {
    SynthesisMetadata {
        total_chunks_processed: 0,
        successful_chunks: 0,
        synthesis_model: String::new(),
    }
}

fn collect_insights(chunk_analyses: &[ChunkAnalysis]) -> CollectedInsights {
    let mut collected = CollectedInsights::default();

    for analysis in chunk_analyses {
        let Some(categories) = analysis.insights() else {
            continue;
        };
        collected.successful_chunks += 1;
        collected
            .key_concepts
            .extend(categories.key_concepts.iter().cloned());
        collected
            .evidence_examples
            .extend(categories.evidence_and_examples.iter().cloned());
        collected
            .relationships
            .extend(categories.relationships.iter().cloned());
        collected.insights.extend(categories.insights.iter().cloned());
        collected
            .questions_raised
            .extend(categories.questions_raised.iter().cloned());
    }

    collected.key_concepts.truncate(COLLECTED_LIMIT);
    collected.evidence_examples.truncate(COLLECTED_LIMIT);
    collected.relationships.truncate(COLLECTED_LIMIT);
    collected.insights.truncate(COLLECTED_LIMIT);
    collected.questions_raised.truncate(COLLECTED_LIMIT);

    collected
}

fn build_synthesis_prompt(collected: &CollectedInsights, title: &str) -> String {
    let summary = serde_json::json!({
        "key_concepts": head(&collected.key_concepts, 15),
        "evidence_examples": head(&collected.evidence_examples, 10),
        "relationships": head(&collected.relationships, 10),
        "insights": head(&collected.insights, 15),
    });
    let summary_text = serde_json::to_string_pretty(&summary).unwrap_or_default();

    format!(
        "Synthesize the following extracted information from \"{}\" into a comprehensive analysis.\n\n\
         Extracted Data:\n{}\n\n\
         Create a synthesis with the following structure (format as JSON):\n\n\
         1. \"main_themes\": 3-5 overarching themes that run through the document\n\
         2. \"key_principles\": 5-7 most important principles or rules identified\n\
         3. \"critical_insights\": 5-7 most valuable and actionable insights\n\
         4. \"actionable_takeaways\": 5-7 specific actions readers should take\n\
         5. \"mental_models\": 3-5 ways of thinking or frameworks promoted\n\
         6. \"concept_connections\": How the main concepts relate to each other\n\n\
         For each category, provide items with:\n\
         - Clear, concise description\n\
         - Importance/priority level (1-5)\n\
         - Brief rationale for inclusion\n\n\
         Focus on:\n\
         - Most significant and universally applicable insights\n\
         - Practical value for readers\n\
         - Clear connections between ideas\n\
         - Actionable recommendations\n\n\
         Avoid:\n\
         - Repetition of similar points\n\
         - Overly granular details\n\
         - Concepts that apply only to narrow contexts",
        title, summary_text
    )
}

fn head(list: &[String], limit: usize) -> &[String] {
    &list[..list.len().min(limit)]
}

/// Deterministic synthesis built directly from collected lists, used
/// when the model fails on both the primary and the retry model
fn fallback_synthesis(collected: &CollectedInsights) -> Synthesis {
    info!("Creating fallback synthesis");

    let all_empty = collected.key_concepts.is_empty()
        && collected.insights.is_empty()
        && collected.relationships.is_empty()
        && collected.evidence_examples.is_empty();

    if all_empty {
        return Synthesis {
            main_themes: items(&["Document processing encountered issues"]),
            key_principles: items(&["Content extraction incomplete"]),
            critical_insights: items(&["AI analysis failed - manual review recommended"]),
            actionable_takeaways: items(&[
                "Retry processing with different model",
                "Check document format and content",
            ]),
            mental_models: Vec::new(),
            concept_connections: Vec::new(),
            metadata: blank_metadata(),
            fallback_mode: true,
            note: Some(
                "Generated minimal fallback synthesis - original content analysis failed"
                    .to_string(),
            ),
        };
    }

    let themes_source: Vec<&String> = collected
        .key_concepts
        .iter()
        .chain(collected.insights.iter())
        .collect();
    let principles_source: Vec<&String> = collected
        .key_concepts
        .iter()
        .chain(collected.evidence_examples.iter())
        .collect();
    let actionable_source: Vec<&String> = collected
        .insights
        .iter()
        .chain(collected.key_concepts.iter())
        .collect();

    let critical_insights = if collected.insights.is_empty() {
        items(&["Analysis data not available"])
    } else {
        collected
            .insights
            .iter()
            .take(7)
            .map(|s| SynthesisItem::from(s.clone()))
            .collect()
    };

    Synthesis {
        main_themes: take_items(&themes_source, 5),
        key_principles: take_items(&principles_source, 7),
        critical_insights,
        actionable_takeaways: take_items(&actionable_source, 7),
        mental_models: collected
            .key_concepts
            .iter()
            .take(5)
            .map(|c| SynthesisItem::from(format!("Consider: {}", c)))
            .collect(),
        concept_connections: collected
            .relationships
            .iter()
            .take(6)
            .map(|r| SynthesisItem::from(r.clone()))
            .collect(),
        metadata: blank_metadata(),
        fallback_mode: true,
        note: Some("Generated using fallback synthesis due to AI processing error".to_string()),
    }
}

fn items(texts: &[&str]) -> Vec<SynthesisItem> {
    texts.iter().map(|t| SynthesisItem::from(*t)).collect()
}

fn take_items(source: &[&String], limit: usize) -> Vec<SynthesisItem> {
    source
        .iter()
        .take(limit)
        .map(|s| SynthesisItem::from((*s).clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{AnalysisOutcome, InsightCategories};
    use crate::llm::testing::ScriptedChat;

    fn successful_analysis(concepts: &[&str], insights: &[&str]) -> ChunkAnalysis {
        ChunkAnalysis {
            chunk_number: 1,
            section_info: "Section 1".to_string(),
            token_estimate: 100,
            outcome: AnalysisOutcome::Insights(InsightCategories {
                key_concepts: concepts.iter().map(|s| s.to_string()).collect(),
                evidence_and_examples: vec!["a study".to_string()],
                relationships: vec!["a link".to_string()],
                insights: insights.iter().map(|s| s.to_string()).collect(),
                questions_raised: vec!["why?".to_string()],
                actionable_takeaways: vec![],
            }),
        }
    }

    fn failed_analysis() -> ChunkAnalysis {
        ChunkAnalysis {
            chunk_number: 1,
            section_info: "Section 1".to_string(),
            token_estimate: 100,
            outcome: AnalysisOutcome::Failed {
                error: "All question sets failed".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_zero_valid_chunks_returns_terminal_marker() {
        let chat = ScriptedChat::new();
        let synthesizer = InsightSynthesizer::new(Arc::new(chat), "gpt-5-mini", None);

        let outcome = synthesizer.synthesize(&[failed_analysis()], "Title").await;
        assert!(outcome.is_error());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"], "No valid insights found");
        assert_eq!(json["chunk_count"], 1);
        assert_eq!(json["successful_chunks"], 0);
    }

    #[tokio::test]
    async fn test_successful_synthesis_carries_metadata() {
        let chat = ScriptedChat::new();
        chat.push_ok(
            r#"{"main_themes": ["memory"], "key_principles": ["space it"],
                "critical_insights": [{"description": "sleep matters", "importance": 5}],
                "actionable_takeaways": ["review daily"], "mental_models": ["palace"],
                "concept_connections": ["sleep -> recall"]}"#,
        );

        let synthesizer = InsightSynthesizer::new(Arc::new(chat), "gpt-5-mini", None);
        let analyses = vec![
            successful_analysis(&["concept"], &["insight"]),
            failed_analysis(),
        ];
        let outcome = synthesizer.synthesize(&analyses, "Title").await;

        let synthesis = outcome.synthesis().expect("should synthesize");
        assert!(!synthesis.fallback_mode);
        assert_eq!(synthesis.main_themes[0].text(), "memory");
        assert_eq!(synthesis.critical_insights[0].text(), "sleep matters");
        assert_eq!(synthesis.metadata.total_chunks_processed, 2);
        assert_eq!(synthesis.metadata.successful_chunks, 1);
        assert_eq!(synthesis.metadata.synthesis_model, "gpt-5-mini");
    }

    #[tokio::test]
    async fn test_retry_uses_configured_fallback_model() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push_err("model overloaded");
        chat.push_ok(r#"{"main_themes": ["recovered"]}"#);

        let synthesizer =
            InsightSynthesizer::new(chat.clone(), "o3", Some("gpt-4".to_string()));
        let analyses = vec![successful_analysis(&["c"], &["i"])];
        let outcome = synthesizer.synthesize(&analyses, "Title").await;

        let synthesis = outcome.synthesis().expect("retry should succeed");
        assert!(!synthesis.fallback_mode);
        assert_eq!(synthesis.main_themes[0].text(), "recovered");

        let calls = chat.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "o3");
        assert_eq!(calls[1].0, "gpt-4");
    }

    #[tokio::test]
    async fn test_double_failure_degrades_to_local_fallback() {
        let chat = ScriptedChat::new();
        // Queue empty: both primary and retry calls fail

        let synthesizer =
            InsightSynthesizer::new(Arc::new(chat), "o3", Some("gpt-4".to_string()));
        let analyses = vec![successful_analysis(
            &["concept one", "concept two"],
            &["insight one"],
        )];
        let outcome = synthesizer.synthesize(&analyses, "Title").await;

        let synthesis = outcome.synthesis().expect("fallback is still valid");
        assert!(synthesis.fallback_mode);
        assert!(synthesis.note.is_some());
        assert_eq!(synthesis.main_themes[0].text(), "concept one");
        assert_eq!(synthesis.critical_insights[0].text(), "insight one");
        assert!(synthesis.mental_models[0].text().starts_with("Consider: "));
        assert_eq!(synthesis.metadata.successful_chunks, 1);

        // All six category fields survive serialization
        let json = serde_json::to_value(synthesis).unwrap();
        for field in [
            "main_themes",
            "key_principles",
            "critical_insights",
            "actionable_takeaways",
            "mental_models",
            "concept_connections",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }

    #[tokio::test]
    async fn test_fallback_placeholders_when_collections_empty() {
        let chat = ScriptedChat::new();
        let synthesizer = InsightSynthesizer::new(Arc::new(chat), "gpt-5-mini", None);

        // One successful chunk that extracted nothing
        let empty = ChunkAnalysis {
            chunk_number: 1,
            section_info: "Section 1".to_string(),
            token_estimate: 10,
            outcome: AnalysisOutcome::Insights(InsightCategories::default()),
        };
        let outcome = synthesizer.synthesize(&[empty], "Title").await;

        let synthesis = outcome.synthesis().expect("placeholder fallback is valid");
        assert!(synthesis.fallback_mode);
        assert_eq!(
            synthesis.main_themes[0].text(),
            "Document processing encountered issues"
        );
        assert_eq!(
            synthesis.critical_insights[0].text(),
            "AI analysis failed - manual review recommended"
        );
        assert_eq!(synthesis.actionable_takeaways.len(), 2);
        assert!(synthesis.mental_models.is_empty());
    }

    #[test]
    fn test_collection_truncates_to_twenty() {
        let analyses: Vec<ChunkAnalysis> = (0..5)
            .map(|_| {
                successful_analysis(
                    &["c1", "c2", "c3", "c4", "c5", "c6"],
                    &["i1", "i2", "i3", "i4", "i5"],
                )
            })
            .collect();

        let collected = collect_insights(&analyses);
        assert_eq!(collected.successful_chunks, 5);
        assert_eq!(collected.key_concepts.len(), COLLECTED_LIMIT);
        assert_eq!(collected.insights.len(), COLLECTED_LIMIT);
    }
}
