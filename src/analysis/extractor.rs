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
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analysis::types::{AnalysisOutcome, Chunk, ChunkAnalysis, InsightCategories, InsightCategory};
use crate::llm::{coerce_json, ChatClient, ChatMessage};

const ANALYSIS_TEMPERATURE: f32 = 0.3;
/// Prompt excerpts are capped so every question set fits small contexts
const PROMPT_EXCERPT_BYTES: usize = 4000;

/// The four fixed question sets a chunk is analyzed through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSet {
    CoreConcepts,
    EvidenceInsights,
    RelationshipsApplications,
    CriticalThinking,
}

impl QuestionSet {
    pub const ALL: [QuestionSet; 4] = [
        QuestionSet::CoreConcepts,
        QuestionSet::EvidenceInsights,
        QuestionSet::RelationshipsApplications,
        QuestionSet::CriticalThinking,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QuestionSet::CoreConcepts => "core_concepts",
            QuestionSet::EvidenceInsights => "evidence_insights",
            QuestionSet::RelationshipsApplications => "relationships_applications",
            QuestionSet::CriticalThinking => "critical_thinking",
        }
    }

    fn focus_label(&self) -> &'static str {
        match self {
            QuestionSet::CoreConcepts => "Core Concepts",
            QuestionSet::EvidenceInsights => "Evidence Insights",
            QuestionSet::RelationshipsApplications => "Relationships Applications",
            QuestionSet::CriticalThinking => "Critical Thinking",
        }
    }

    fn questions(&self) -> [&'static str; 4] {
        match self {
            QuestionSet::CoreConcepts => [
                "What are the main concepts or ideas presented?",
                "What key terminology or definitions are introduced?",
                "What fundamental principles are explained?",
                "What core themes emerge from this section?",
            ],
            QuestionSet::EvidenceInsights => [
                "What evidence, examples, or data support the main ideas?",
                "What historical cases or real-world examples are provided?",
                "What deeper insights or implications can be drawn?",
                "What patterns or trends are highlighted?",
            ],
            QuestionSet::RelationshipsApplications => [
                "How do the concepts relate to each other?",
                "What cause-and-effect relationships are described?",
                "How can these ideas be applied practically?",
                "What connections exist with broader themes?",
            ],
            QuestionSet::CriticalThinking => [
                "What questions is the author trying to answer?",
                "What problems or challenges are being addressed?",
                "What contradictions or tensions are present?",
                "What actionable takeaways can be derived?",
            ],
        }
    }
}

/// Routing table from (set, 1-based question) to insight category.
/// The mapping is deliberately asymmetric and leaves some answers
/// unrouted (core_concepts q4, evidence q4, relationships q4,
/// critical_thinking q2 and q3) to match the established merge.
const MERGE_TABLE: &[(QuestionSet, usize, InsightCategory)] = &[
    (QuestionSet::CoreConcepts, 1, InsightCategory::KeyConcepts),
    (QuestionSet::CoreConcepts, 2, InsightCategory::KeyConcepts),
    (QuestionSet::CoreConcepts, 3, InsightCategory::KeyConcepts),
    (QuestionSet::EvidenceInsights, 1, InsightCategory::EvidenceAndExamples),
    (QuestionSet::EvidenceInsights, 2, InsightCategory::EvidenceAndExamples),
    (QuestionSet::EvidenceInsights, 3, InsightCategory::Insights),
    (QuestionSet::RelationshipsApplications, 1, InsightCategory::Relationships),
    (QuestionSet::RelationshipsApplications, 2, InsightCategory::Relationships),
    (QuestionSet::RelationshipsApplications, 3, InsightCategory::ActionableTakeaways),
    (QuestionSet::CriticalThinking, 1, InsightCategory::QuestionsRaised),
    (QuestionSet::CriticalThinking, 4, InsightCategory::ActionableTakeaways),
];

/// Analyzes chunks through the four question sets and merges the answers
/// into the six insight categories.
pub struct ChunkAnalyzer {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl ChunkAnalyzer {
    pub fn new(client: Arc<dyn ChatClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    /// Analyze chunks in order. Failures become per-chunk error records,
    /// never errors of the whole pass.
    pub async fn analyze_chunks(&self, chunks: &[Chunk], title: &str) -> Vec<ChunkAnalysis> {
        let mut analyses = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            debug!(
                "Analyzing chunk {}/{} ({} tokens)",
                chunk.number,
                chunks.len(),
                chunk.token_estimate
            );
            analyses.push(self.analyze_chunk(chunk, title).await);
        }
        analyses
    }

    /// One chunk: the four question sets run as independent requests and
    /// merge through the routing table. Only a chunk with zero surviving
    /// sets becomes an error record.
    pub async fn analyze_chunk(&self, chunk: &Chunk, title: &str) -> ChunkAnalysis {
        let requests = QuestionSet::ALL
            .iter()
            .map(|set| self.run_question_set(*set, chunk, title));
        let responses = futures::future::join_all(requests).await;

        let mut categories = InsightCategories::default();
        let mut failures = Vec::new();

        for (set, response) in QuestionSet::ALL.iter().zip(responses) {
            match response {
                Ok(answers) => merge_answers(&mut categories, *set, &answers),
                Err(e) => {
                    warn!("{} analysis failed for chunk {}: {}", set.name(), chunk.number, e);
                    failures.push(format!("{}: {}", set.name(), e));
                }
            }
        }

        let outcome = if failures.len() == QuestionSet::ALL.len() {
            AnalysisOutcome::Failed {
                error: format!("All question sets failed: {}", failures.join("; ")),
            }
        } else {
            AnalysisOutcome::Insights(categories)
        };

        ChunkAnalysis {
            chunk_number: chunk.number,
            section_info: chunk.section_info.clone(),
            token_estimate: chunk.token_estimate,
            outcome,
        }
    }

    async fn run_question_set(
        &self,
        set: QuestionSet,
        chunk: &Chunk,
        title: &str,
    ) -> Result<Value> {
        let prompt = build_focused_prompt(set, chunk, title);
        let response = self
            .client
            .complete(
                &self.model,
                &[ChatMessage::user(prompt)],
                ANALYSIS_TEMPERATURE,
            )
            .await?;
        coerce_json(&response)
    }
}

fn build_focused_prompt(set: QuestionSet, chunk: &Chunk, title: &str) -> String {
    let excerpt = crate::llm::excerpt(&chunk.content, PROMPT_EXCERPT_BYTES);
    let questions = set.questions();

    format!(
        "Document: {} - Section {}\n\n\
         Focus Area: {}\n\n\
         Text to analyze:\n{}\n\n\
         Please answer these 4 questions with focused, specific responses:\n\n\
         1. {}\n\
         2. {}\n\
         3. {}\n\
         4. {}\n\n\
         Requirements:\n\
         - Provide 2-4 specific points per question\n\
         - Base answers directly on the text content\n\
         - Use clear, concise language\n\
         - Extract actionable insights where possible\n\n\
         Return your response as valid JSON in this format:\n\
         {{\n\
             \"question_1\": [\"point 1\", \"point 2\", \"point 3\"],\n\
             \"question_2\": [\"point 1\", \"point 2\"],\n\
             \"question_3\": [\"point 1\", \"point 2\", \"point 3\"],\n\
             \"question_4\": [\"point 1\", \"point 2\"]\n\
         }}",
        title,
        chunk.number,
        set.focus_label(),
        excerpt,
        questions[0],
        questions[1],
        questions[2],
        questions[3],
    )
}

/// Route one set's answers into the shared categories per the table
fn merge_answers(categories: &mut InsightCategories, set: QuestionSet, answers: &Value) {
    for (table_set, question, category) in MERGE_TABLE {
        if *table_set != set {
            continue;
        }
        let key = format!("question_{}", question);
        if let Some(items) = answers.get(&key).and_then(Value::as_array) {
            for item in items {
                if let Some(text) = answer_text(item) {
                    categories.push(*category, text);
                }
            }
        }
    }
}

/// Flatten a single answer item to plain text. Models occasionally wrap
/// answers in objects or return bare scalars.
fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Object(map) => map
            .get("description")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedChat;

    fn chunk_fixture() -> Chunk {
        Chunk {
            number: 1,
            content: "Memory consolidation strengthens during sleep. Recall improves with spacing."
                .to_string(),
            token_estimate: 19,
            section_info: "Section 1".to_string(),
            word_count: 11,
            character_count: 77,
        }
    }

    fn set_answers(prefix: &str) -> Value {
        serde_json::json!({
            "question_1": [format!("{}1", prefix)],
            "question_2": [format!("{}2", prefix)],
            "question_3": [format!("{}3", prefix)],
            "question_4": [format!("{}4", prefix)],
        })
    }

    #[test]
    fn test_merge_routes_every_table_entry() {
        let mut categories = InsightCategories::default();
        merge_answers(&mut categories, QuestionSet::CoreConcepts, &set_answers("cc"));
        merge_answers(
            &mut categories,
            QuestionSet::EvidenceInsights,
            &set_answers("ev"),
        );
        merge_answers(
            &mut categories,
            QuestionSet::RelationshipsApplications,
            &set_answers("ra"),
        );
        merge_answers(
            &mut categories,
            QuestionSet::CriticalThinking,
            &set_answers("ct"),
        );

        assert_eq!(categories.key_concepts, vec!["cc1", "cc2", "cc3"]);
        assert_eq!(categories.evidence_and_examples, vec!["ev1", "ev2"]);
        assert_eq!(categories.insights, vec!["ev3"]);
        assert_eq!(categories.relationships, vec!["ra1", "ra2"]);
        assert_eq!(categories.questions_raised, vec!["ct1"]);
        assert_eq!(categories.actionable_takeaways, vec!["ra3", "ct4"]);
    }

    #[test]
    fn test_merge_leaves_unrouted_answers_out() {
        let mut categories = InsightCategories::default();
        merge_answers(&mut categories, QuestionSet::CriticalThinking, &set_answers("ct"));

        // q2 and q3 of critical thinking are intentionally not routed
        let all: Vec<&String> = [
            &categories.key_concepts,
            &categories.evidence_and_examples,
            &categories.relationships,
            &categories.insights,
            &categories.questions_raised,
            &categories.actionable_takeaways,
        ]
        .into_iter()
        .flatten()
        .collect();
        assert!(!all.iter().any(|s| s.as_str() == "ct2"));
        assert!(!all.iter().any(|s| s.as_str() == "ct3"));
        assert_eq!(categories.questions_raised, vec!["ct1"]);
        assert_eq!(categories.actionable_takeaways, vec!["ct4"]);
    }

    #[test]
    fn test_answer_text_flattens_objects_and_scalars() {
        assert_eq!(
            answer_text(&serde_json::json!({"description": "d", "importance": 5})),
            Some("d".to_string())
        );
        assert_eq!(answer_text(&serde_json::json!("  trimmed  ")), Some("trimmed".to_string()));
        assert_eq!(answer_text(&serde_json::json!(42)), Some("42".to_string()));
        assert_eq!(answer_text(&Value::Null), None);
        assert_eq!(answer_text(&serde_json::json!("   ")), None);
    }

    #[tokio::test]
    async fn test_full_success_populates_all_categories() {
        let chat = ScriptedChat::new();
        // One response per question set; each question_k carries k items so
        // the assertions hold regardless of which set got which response
        for _ in 0..4 {
            chat.push_ok(
                r#"{"question_1": ["a"], "question_2": ["a", "b"],
                    "question_3": ["a", "b", "c"], "question_4": ["a", "b", "c", "d"]}"#,
            );
        }

        let analyzer = ChunkAnalyzer::new(Arc::new(chat), "gpt-5-mini");
        let analysis = analyzer.analyze_chunk(&chunk_fixture(), "Memory Book").await;

        let categories = analysis.insights().expect("chunk should succeed");
        assert_eq!(categories.key_concepts.len(), 1 + 2 + 3);
        assert_eq!(categories.evidence_and_examples.len(), 1 + 2);
        assert_eq!(categories.insights.len(), 3);
        assert_eq!(categories.relationships.len(), 1 + 2);
        assert_eq!(categories.questions_raised.len(), 1);
        assert_eq!(categories.actionable_takeaways.len(), 3 + 4);
    }

    #[tokio::test]
    async fn test_partial_set_failure_still_succeeds() {
        let chat = ScriptedChat::new();
        chat.push_ok(r#"{"question_1": ["only answer"]}"#);
        // Remaining three sets hit an empty queue and fail

        let analyzer = ChunkAnalyzer::new(Arc::new(chat), "gpt-5-mini");
        let analysis = analyzer.analyze_chunk(&chunk_fixture(), "Memory Book").await;

        assert!(!analysis.is_error(), "one surviving set is enough");
    }

    #[tokio::test]
    async fn test_all_sets_failing_yields_error_record() {
        let chat = ScriptedChat::new();
        // Nothing queued: every set fails

        let analyzer = ChunkAnalyzer::new(Arc::new(chat), "gpt-5-mini");
        let analysis = analyzer.analyze_chunk(&chunk_fixture(), "Memory Book").await;

        assert!(analysis.is_error());
        match &analysis.outcome {
            AnalysisOutcome::Failed { error } => {
                assert!(error.contains("All question sets failed"))
            }
            AnalysisOutcome::Insights(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_prompt_excerpt_is_bounded() {
        let mut chunk = chunk_fixture();
        chunk.content = "long sentence here. ".repeat(1000);
        let prompt = build_focused_prompt(QuestionSet::CoreConcepts, &chunk, "T");
        assert!(prompt.len() < PROMPT_EXCERPT_BYTES + 1200);
        assert!(prompt.contains("Focus Area: Core Concepts"));
    }
}
