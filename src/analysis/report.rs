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

use crate::analysis::types::{AnalysisOutcome, ChapterAnalysis, SynthesisItem, SynthesisOutcome};
use crate::llm::excerpt;

/// Structural sanity checks over a finished chapter analysis. Issues are
/// reported, never fatal: a chapter with warnings still ships.
pub fn validate_results(analysis: &ChapterAnalysis) -> Vec<String> {
    let mut issues = Vec::new();

    if analysis.chunk_analyses.is_empty() && analysis.metadata.total_chunks > 0 {
        issues.push("Missing chunk analyses".to_string());
    }

    if let Some(error) = synthesis_error(analysis) {
        issues.push(format!("Synthesis error: {}", error));
    }

    let total_chunks = analysis.metadata.total_chunks;
    if total_chunks == 0 {
        issues.push("No chunks were processed".to_string());
    }

    let successful = analysis.successful_chunks();
    if successful == 0 {
        issues.push("No chunks were successfully analyzed".to_string());
    } else if (successful as f64) < (total_chunks as f64) * 0.5 {
        issues.push(format!(
            "Low success rate: {}/{} chunks successful",
            successful, total_chunks
        ));
    }

    issues
}

fn synthesis_error(analysis: &ChapterAnalysis) -> Option<&str> {
    match &analysis.synthesis {
        SynthesisOutcome::NoInsights(empty) => Some(&empty.error),
        SynthesisOutcome::Ready(_) => None,
    }
}

pub fn create_processing_report(analysis: &ChapterAnalysis) -> String {
    let metadata = &analysis.metadata;
    let successful = analysis.successful_chunks();
    let failed = metadata.total_chunks.saturating_sub(successful);
    let total_tokens: usize = analysis
        .chunk_analyses
        .iter()
        .map(|chunk| chunk.token_estimate)
        .sum();
    let synthesis_model = analysis
        .synthesis
        .synthesis()
        .map(|s| s.metadata.synthesis_model.as_str())
        .unwrap_or("Unknown");

    let mut report = format!(
        "Processing Report\n\
         ================\n\n\
         Document: {}\n\
         Analyzed: {}\n\
         Model: {}\n\n\
         Chunking Results:\n\
         - Total chunks created: {}\n\
         - Total tokens: {}\n\n\
         Analysis Results:\n\
         - Successful chunks: {}\n\
         - Failed chunks: {}\n\n\
         Synthesis:\n\
         - Synthesis model: {}\n",
        metadata.chapter_title,
        metadata.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        metadata.model,
        metadata.total_chunks,
        total_tokens,
        successful,
        failed,
        synthesis_model,
    );

    let failures: Vec<String> = analysis
        .chunk_analyses
        .iter()
        .filter_map(|chunk| match &chunk.outcome {
            AnalysisOutcome::Failed { error } => Some(format!(
                "- Chunk {} ({}): {}",
                chunk.chunk_number,
                chunk.section_info,
                excerpt(error, 80)
            )),
            AnalysisOutcome::Insights(_) => None,
        })
        .collect();
    if !failures.is_empty() {
        report.push_str("\nFailed chunks:\n");
        for line in &failures {
            report.push_str(line);
            report.push('\n');
        }
    }

    report.push_str("\nValidation:\n");
    let issues = validate_results(analysis);
    if issues.is_empty() {
        report.push_str("[OK] All validation checks passed\n");
    } else {
        report.push_str("Issues found:\n");
        for issue in &issues {
            report.push_str(&format!("- {}\n", issue));
        }
    }

    report
}

/// Markdown summary of the synthesis, numbered per category
pub fn create_summary_markdown(analysis: &ChapterAnalysis) -> String {
    let title = &analysis.metadata.chapter_title;
    let synthesis = analysis.synthesis.synthesis();

    let mut content = format!("# Analysis Summary: {}\n\n## Main Themes\n\n", title);
    push_numbered(&mut content, synthesis.map(|s| s.main_themes.as_slice()));

    content.push_str("\n## Key Principles\n\n");
    push_numbered(&mut content, synthesis.map(|s| s.key_principles.as_slice()));

    content.push_str("\n## Critical Insights\n\n");
    push_numbered(&mut content, synthesis.map(|s| s.critical_insights.as_slice()));

    content.push_str("\n## Actionable Takeaways\n\n");
    push_numbered(
        &mut content,
        synthesis.map(|s| s.actionable_takeaways.as_slice()),
    );

    content
}

fn push_numbered(content: &mut String, items: Option<&[SynthesisItem]>) {
    let Some(items) = items else {
        return;
    };
    for (i, item) in items.iter().enumerate() {
        content.push_str(&format!("{}. {}\n", i + 1, item.text()));
    }
}

/// Reading time in minutes at an average 225 words per minute
pub fn estimate_reading_time(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (((words as f64) / 225.0).round() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{
        AnalysisMetadata, ChunkAnalysis, InsightCategories, Synthesis, SynthesisMetadata,
        SynthesisOutcome,
    };
    use chrono::Utc;

    fn chunk(number: usize, failed: bool) -> ChunkAnalysis {
        ChunkAnalysis {
            chunk_number: number,
            section_info: format!("Section {}", number),
            token_estimate: 500,
            outcome: if failed {
                AnalysisOutcome::Failed {
                    error: "All question sets failed: timeout".to_string(),
                }
            } else {
                AnalysisOutcome::Insights(InsightCategories {
                    key_concepts: vec!["concept".to_string()],
                    ..Default::default()
                })
            },
        }
    }

    fn analysis(chunks: Vec<ChunkAnalysis>, synthesis: SynthesisOutcome) -> ChapterAnalysis {
        let successful = chunks.iter().filter(|c| !c.is_error()).count();
        ChapterAnalysis {
            metadata: AnalysisMetadata {
                chapter_title: "Chapter One".to_string(),
                model: "gpt-5-mini".to_string(),
                total_chunks: chunks.len(),
                successful_chunks: successful,
                analyzed_at: Utc::now(),
            },
            chunk_analyses: chunks,
            synthesis,
            profile: None,
        }
    }

    fn ready_synthesis() -> SynthesisOutcome {
        SynthesisOutcome::Ready(Box::new(Synthesis {
            main_themes: vec!["theme a".into(), "theme b".into()],
            key_principles: vec!["principle".into()],
            critical_insights: vec![],
            actionable_takeaways: vec!["act".into()],
            mental_models: vec![],
            concept_connections: vec![],
            metadata: SynthesisMetadata {
                total_chunks_processed: 2,
                successful_chunks: 2,
                synthesis_model: "gpt-5-mini".to_string(),
            },
            fallback_mode: false,
            note: None,
        }))
    }

    #[test]
    fn test_validation_passes_on_healthy_analysis() {
        let analysis = analysis(vec![chunk(1, false), chunk(2, false)], ready_synthesis());
        assert!(validate_results(&analysis).is_empty());

        let report = create_processing_report(&analysis);
        assert!(report.contains("[OK] All validation checks passed"));
        assert!(report.contains("Total chunks created: 2"));
        assert!(report.contains("Successful chunks: 2"));
    }

    #[test]
    fn test_validation_flags_low_success_rate() {
        let analysis = analysis(
            vec![chunk(1, false), chunk(2, true), chunk(3, true)],
            ready_synthesis(),
        );
        let issues = validate_results(&analysis);
        assert!(issues.contains(&"Low success rate: 1/3 chunks successful".to_string()));
    }

    #[test]
    fn test_validation_accepts_exactly_half_successful() {
        let analysis = analysis(vec![chunk(1, false), chunk(2, true)], ready_synthesis());
        let issues = validate_results(&analysis);
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_validation_reports_synthesis_error_and_zero_successes() {
        let analysis = analysis(vec![chunk(1, true)], SynthesisOutcome::no_insights(1));
        let issues = validate_results(&analysis);

        assert!(issues.contains(&"Synthesis error: No valid insights found".to_string()));
        assert!(issues.contains(&"No chunks were successfully analyzed".to_string()));
    }

    #[test]
    fn test_report_lists_failed_chunks() {
        let analysis = analysis(vec![chunk(1, false), chunk(2, true)], ready_synthesis());
        let report = create_processing_report(&analysis);

        assert!(report.contains("Failed chunks:"));
        assert!(report.contains("- Chunk 2 (Section 2): All question sets failed: timeout"));
    }

    #[test]
    fn test_summary_markdown_numbers_each_category() {
        let analysis = analysis(vec![chunk(1, false)], ready_synthesis());
        let markdown = create_summary_markdown(&analysis);

        assert!(markdown.starts_with("# Analysis Summary: Chapter One"));
        assert!(markdown.contains("1. theme a\n2. theme b"));
        assert!(markdown.contains("## Critical Insights"));
        assert!(markdown.contains("1. act"));
    }

    #[test]
    fn test_reading_time_floors_at_one_minute() {
        assert_eq!(estimate_reading_time(""), 1);
        assert_eq!(estimate_reading_time("a few words only"), 1);

        let long_text = "word ".repeat(450);
        assert_eq!(estimate_reading_time(&long_text), 2);
    }
}
