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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token-budgeted slice of chapter text produced by the chunker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based position within the chapter
    pub number: usize,
    pub content: String,
    /// Rough estimate: one token per four characters
    pub token_estimate: usize,
    /// Human-readable origin, e.g. "Sections 3-5" or "Section 2 (part 1/3)"
    pub section_info: String,
    pub word_count: usize,
    pub character_count: usize,
}

/// The six insight categories the four question sets merge into
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightCategories {
    pub key_concepts: Vec<String>,
    pub evidence_and_examples: Vec<String>,
    pub relationships: Vec<String>,
    pub insights: Vec<String>,
    pub questions_raised: Vec<String>,
    pub actionable_takeaways: Vec<String>,
}

/// Merge targets for routed question-set answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightCategory {
    KeyConcepts,
    EvidenceAndExamples,
    Relationships,
    Insights,
    QuestionsRaised,
    ActionableTakeaways,
}

impl InsightCategories {
    pub fn push(&mut self, category: InsightCategory, value: String) {
        match category {
            InsightCategory::KeyConcepts => self.key_concepts.push(value),
            InsightCategory::EvidenceAndExamples => self.evidence_and_examples.push(value),
            InsightCategory::Relationships => self.relationships.push(value),
            InsightCategory::Insights => self.insights.push(value),
            InsightCategory::QuestionsRaised => self.questions_raised.push(value),
            InsightCategory::ActionableTakeaways => self.actionable_takeaways.push(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_concepts.is_empty()
            && self.evidence_and_examples.is_empty()
            && self.relationships.is_empty()
            && self.insights.is_empty()
            && self.questions_raised.is_empty()
            && self.actionable_takeaways.is_empty()
    }
}

/// Per-chunk analysis record. A chunk whose every question set failed
/// becomes a `Failed` outcome instead of aborting the chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    pub chunk_number: usize,
    pub section_info: String,
    pub token_estimate: usize,
    pub outcome: AnalysisOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Insights(InsightCategories),
    Failed { error: String },
}

impl ChunkAnalysis {
    pub fn insights(&self) -> Option<&InsightCategories> {
        match &self.outcome {
            AnalysisOutcome::Insights(categories) => Some(categories),
            AnalysisOutcome::Failed { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::Failed { .. })
    }
}

/// Synthesis items are either plain strings or annotated objects,
/// depending on how the model answered. `importance` stays untyped since
/// models return both "high" and 4 for the same prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SynthesisItem {
    Detailed {
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        importance: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    Text(String),
}

impl SynthesisItem {
    pub fn text(&self) -> &str {
        match self {
            SynthesisItem::Text(s) => s,
            SynthesisItem::Detailed { description, .. } => description,
        }
    }
}

impl From<String> for SynthesisItem {
    fn from(s: String) -> Self {
        SynthesisItem::Text(s)
    }
}

impl From<&str> for SynthesisItem {
    fn from(s: &str) -> Self {
        SynthesisItem::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisMetadata {
    pub total_chunks_processed: usize,
    pub successful_chunks: usize,
    pub synthesis_model: String,
}

/// Cross-chunk synthesis of a chapter's insights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub main_themes: Vec<SynthesisItem>,
    pub key_principles: Vec<SynthesisItem>,
    pub critical_insights: Vec<SynthesisItem>,
    pub actionable_takeaways: Vec<SynthesisItem>,
    pub mental_models: Vec<SynthesisItem>,
    pub concept_connections: Vec<SynthesisItem>,
    pub metadata: SynthesisMetadata,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Synthesis step result: either a synthesis or the terminal marker
/// emitted when no chunk produced usable insights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SynthesisOutcome {
    NoInsights(EmptySynthesis),
    Ready(Box<Synthesis>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptySynthesis {
    pub error: String,
    pub chunk_count: usize,
    pub successful_chunks: usize,
}

impl SynthesisOutcome {
    pub fn no_insights(chunk_count: usize) -> Self {
        SynthesisOutcome::NoInsights(EmptySynthesis {
            error: "No valid insights found".to_string(),
            chunk_count,
            successful_chunks: 0,
        })
    }

    pub fn synthesis(&self) -> Option<&Synthesis> {
        match self {
            SynthesisOutcome::Ready(synthesis) => Some(synthesis),
            SynthesisOutcome::NoInsights(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SynthesisOutcome::NoInsights(_))
    }
}

/// The three mind-map flavors a chapter can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MindmapKind {
    Comprehensive,
    Actionable,
    Simple,
}

impl std::fmt::Display for MindmapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MindmapKind::Comprehensive => write!(f, "comprehensive"),
            MindmapKind::Actionable => write!(f, "actionable"),
            MindmapKind::Simple => write!(f, "simple"),
        }
    }
}

impl From<String> for MindmapKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "actionable" => MindmapKind::Actionable,
            "simple" | "basic" => MindmapKind::Simple,
            _ => MindmapKind::Comprehensive, // Default fallback
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MindmapSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comprehensive_mindmap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actionable_mindmap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simple_mindmap: Option<String>,
}

impl MindmapSet {
    pub fn insert(&mut self, kind: MindmapKind, mindmap: String) {
        match kind {
            MindmapKind::Comprehensive => self.comprehensive_mindmap = Some(mindmap),
            MindmapKind::Actionable => self.actionable_mindmap = Some(mindmap),
            MindmapKind::Simple => self.simple_mindmap = Some(mindmap),
        }
    }

    pub fn get(&self, kind: MindmapKind) -> Option<&str> {
        match kind {
            MindmapKind::Comprehensive => self.comprehensive_mindmap.as_deref(),
            MindmapKind::Actionable => self.actionable_mindmap.as_deref(),
            MindmapKind::Simple => self.simple_mindmap.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.comprehensive_mindmap.is_none()
            && self.actionable_mindmap.is_none()
            && self.simple_mindmap.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub chapter_title: String,
    pub model: String,
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub analyzed_at: DateTime<Utc>,
}

/// Full analysis document for one chapter: per-chunk records plus the
/// cross-chunk synthesis and the optional comprehension profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterAnalysis {
    pub metadata: AnalysisMetadata,
    pub chunk_analyses: Vec<ChunkAnalysis>,
    pub synthesis: SynthesisOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<crate::analysis::profile::ComprehensionProfile>,
}

impl ChapterAnalysis {
    pub fn successful_chunks(&self) -> usize {
        self.chunk_analyses.iter().filter(|a| !a.is_error()).count()
    }
}

/// Outcome of a whole chapter inside a batch. Failures are isolated:
/// the batch records an `Error` entry and moves on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChapterResult {
    Success(Box<ChapterArtifacts>),
    Error(ChapterFailure),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterArtifacts {
    pub chapter_file: String,
    pub chapter_name: String,
    pub chapter_title: String,
    pub canonical_name: String,
    pub analysis_complete: bool,
    pub analysis_summary: String,
    pub analysis_synthesis: SynthesisOutcome,
    pub quick_summary: String,
    pub processing_report: String,
    pub mindmaps: MindmapSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mindmap_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub chapter_name: String,
    pub chapter_file: String,
    pub mindmaps: MindmapSet,
    pub has_mindmap: bool,
    pub error: String,
}

impl ChapterResult {
    pub fn failure(chapter_name: &str, chapter_file: &str, error: String) -> Self {
        ChapterResult::Error(ChapterFailure {
            chapter_name: chapter_name.to_string(),
            chapter_file: chapter_file.to_string(),
            mindmaps: MindmapSet::default(),
            has_mindmap: false,
            error,
        })
    }

    pub fn chapter_name(&self) -> &str {
        match self {
            ChapterResult::Success(artifacts) => &artifacts.chapter_name,
            ChapterResult::Error(failure) => &failure.chapter_name,
        }
    }

    pub fn has_mindmap(&self) -> bool {
        match self {
            ChapterResult::Success(artifacts) => !artifacts.mindmaps.is_empty(),
            ChapterResult::Error(_) => false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChapterResult::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_item_text_accessor() {
        let plain = SynthesisItem::Text("A theme".to_string());
        assert_eq!(plain.text(), "A theme");

        let detailed = SynthesisItem::Detailed {
            description: "Spaced repetition".to_string(),
            importance: Some(serde_json::json!(5)),
            rationale: None,
        };
        assert_eq!(detailed.text(), "Spaced repetition");
    }

    #[test]
    fn test_synthesis_item_accepts_both_wire_shapes() {
        let plain: SynthesisItem = serde_json::from_str("\"just text\"").unwrap();
        assert_eq!(plain.text(), "just text");

        let detailed: SynthesisItem =
            serde_json::from_str(r#"{"description": "d", "importance": "high", "rationale": "r"}"#)
                .unwrap();
        assert_eq!(detailed.text(), "d");
    }

    #[test]
    fn test_no_insights_marker_serializes_with_error_field() {
        let outcome = SynthesisOutcome::no_insights(3);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"], "No valid insights found");
        assert_eq!(json["chunk_count"], 3);
        assert_eq!(json["successful_chunks"], 0);
    }

    #[test]
    fn test_chapter_result_tags_by_status() {
        let failed = ChapterResult::failure("ch01", "ch01.md", "boom".to_string());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["has_mindmap"], false);
        assert!(!failed.has_mindmap());
    }

    #[test]
    fn test_mindmap_kind_from_string_defaults_to_comprehensive() {
        assert_eq!(
            MindmapKind::from("actionable".to_string()),
            MindmapKind::Actionable
        );
        assert_eq!(MindmapKind::from("basic".to_string()), MindmapKind::Simple);
        assert_eq!(
            MindmapKind::from("anything-else".to_string()),
            MindmapKind::Comprehensive
        );
    }
}
