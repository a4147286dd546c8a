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

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::analysis::profile::{ComprehensionProfile, StageOutcome};
use crate::analysis::types::{ChapterAnalysis, ChunkAnalysis, MindmapKind, Synthesis, SynthesisItem};
use crate::llm::{excerpt, ChatClient, ChatMessage};

const MINDMAP_TEMPERATURE: f32 = 0.3;
const SYNTHESIS_DATA_BYTES: usize = 3000;
const PROFILE_DATA_BYTES: usize = 4000;

/// Produces Mermaid `mindmap` outlines from a chapter analysis. Model
/// output goes through a normalization pass before it is accepted; every
/// failure path degrades to a deterministic map, so generation never
/// fails.
pub struct MindmapGenerator {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl MindmapGenerator {
    pub fn new(client: Arc<dyn ChatClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub async fn generate(&self, analysis: &ChapterAnalysis, kind: MindmapKind) -> String {
        let title = &analysis.metadata.chapter_title;
        info!("Generating {} mind map for: {}", kind, title);

        let Some(synthesis) = analysis.synthesis.synthesis() else {
            warn!("Synthesis contains errors, creating basic mind map");
            return basic_mindmap(&analysis.chunk_analyses, title);
        };

        match self
            .request_mindmap(synthesis, analysis.profile.as_ref(), title, kind)
            .await
        {
            Ok(mindmap) => mindmap,
            Err(e) => {
                error!("Error generating {} mind map: {}", kind, e);
                fallback_mindmap(title)
            }
        }
    }

    async fn request_mindmap(
        &self,
        synthesis: &Synthesis,
        profile: Option<&ComprehensionProfile>,
        title: &str,
        kind: MindmapKind,
    ) -> anyhow::Result<String> {
        // The profile-enriched path asks for colon-delimited node
        // explanations, so normalization must leave them in place.
        let (prompt, keep_annotations) = match profile {
            Some(profile) if kind == MindmapKind::Comprehensive => {
                (build_profile_prompt(synthesis, profile, title), true)
            }
            _ => (build_standard_prompt(synthesis, title, kind), false),
        };

        let raw = self
            .client
            .complete(
                &self.model,
                &[ChatMessage::user(prompt)],
                MINDMAP_TEMPERATURE,
            )
            .await?;

        Ok(normalize_mindmap(&raw, title, keep_annotations))
    }
}

/// Normalize raw model output into the outline grammar: strip fences and
/// preamble, keep exactly one canonical root, demote extra roots to
/// branches. Idempotent: a normalized document passes through unchanged.
pub fn normalize_mindmap(raw: &str, title: &str, keep_annotations: bool) -> String {
    if raw.trim().is_empty() {
        return fallback_mindmap(title);
    }

    let unfenced = raw.replace("```mermaid", "").replace("```", "");

    let mut cleaned: Vec<String> = Vec::new();
    let mut found_header = false;
    for line in unfenced.lines() {
        let stripped = line.trim();
        // Blank lines and lead-in prose ("Here is...", "This mindmap...")
        if stripped.is_empty() || stripped.starts_with("Here") || stripped.starts_with("This") {
            continue;
        }
        if stripped.starts_with("mindmap") {
            if !found_header {
                cleaned.push("mindmap".to_string());
                found_header = true;
            }
            continue;
        }
        if found_header {
            cleaned.push(line.to_string());
        }
    }

    if !found_header || cleaned.len() < 3 {
        warn!("Model output is not a usable mind map, using fallback");
        return fallback_mindmap(title);
    }

    standardize_root(&cleaned, title, keep_annotations)
}

fn standardize_root(lines: &[String], title: &str, keep_annotations: bool) -> String {
    let mut main_root: Option<String> = None;
    let mut branches: Vec<String> = Vec::new();
    let mut demoted = 0usize;

    for line in lines.iter().skip(1) {
        let stripped = line.trim();

        if let Some(root_text) = parse_root_text(stripped) {
            if main_root.is_none() {
                main_root = Some(format!("    root(({}))", root_text));
            } else {
                branches.push(format!("        {}", root_text));
                demoted += 1;
            }
            continue;
        }

        if !keep_annotations && single_colon(stripped) {
            let node = stripped.split(':').next().unwrap_or("").trim();
            if !node.is_empty() {
                let indent = line.len() - line.trim_start().len();
                branches.push(format!("{}{}", " ".repeat(indent), node));
            }
            continue;
        }

        if !stripped.is_empty() {
            branches.push(line.clone());
        }
    }

    if demoted > 0 {
        info!("Fixed {} root nodes -> 1 root", demoted + 1);
    }

    let root_line =
        main_root.unwrap_or_else(|| format!("    root(({}))", shorten_title(title)));

    let mut result = Vec::with_capacity(branches.len() + 2);
    result.push("mindmap".to_string());
    result.push(root_line);
    result.extend(branches);
    result.join("\n")
}

/// Root text from the canonical `root((text))` form or the legacy
/// `root)text(` form
fn parse_root_text(stripped: &str) -> Option<&str> {
    if let Some(inner) = stripped
        .strip_prefix("root((")
        .and_then(|rest| rest.strip_suffix("))"))
    {
        return Some(inner);
    }
    stripped
        .strip_prefix("root)")
        .and_then(|rest| rest.strip_suffix('('))
}

fn single_colon(text: &str) -> bool {
    text.matches(':').count() == 1
}

/// Built without the model when synthesis carries the no-insights
/// marker: whatever per-chunk key concepts exist become the map.
fn basic_mindmap(chunk_analyses: &[ChunkAnalysis], title: &str) -> String {
    info!("Creating basic mind map from raw chunk insights");

    let concepts: Vec<&str> = chunk_analyses
        .iter()
        .take(3)
        .filter_map(|analysis| analysis.insights())
        .flat_map(|categories| categories.key_concepts.iter().take(2))
        .map(|s| s.as_str())
        .collect();

    let mut mindmap = format!(
        "mindmap\n    root(({}))\n        Key Concepts",
        shorten_title(title)
    );
    for (i, concept) in concepts.iter().take(6).enumerate() {
        mindmap.push_str(&format!("\n            Concept {}: {}", i + 1, clip(concept, 30)));
    }
    mindmap.push_str("\n        Analysis Results");
    mindmap.push_str(&format!(
        "\n            {} sections analyzed",
        chunk_analyses.len()
    ));
    mindmap.push_str("\n            Insights extracted");
    mindmap
}

/// Last-resort map used when generation or normalization fails
pub fn fallback_mindmap(title: &str) -> String {
    format!(
        "mindmap\n    root(({}))\n        Key Insights\n            Analysis completed\n            Insights extracted\n        Summary\n            Document processed\n            Results available",
        shorten_title(title)
    )
}

fn build_standard_prompt(synthesis: &Synthesis, title: &str, kind: MindmapKind) -> String {
    let summary = serde_json::json!({
        "main_themes": head_texts(&synthesis.main_themes, 6),
        "key_principles": head_texts(&synthesis.key_principles, 8),
        "critical_insights": head_texts(&synthesis.critical_insights, 6),
        "actionable_takeaways": head_texts(&synthesis.actionable_takeaways, 6),
    });
    let summary_text = excerpt(
        &serde_json::to_string_pretty(&summary).unwrap_or_default(),
        SYNTHESIS_DATA_BYTES,
    );

    format!(
        "Create a rich, detailed Mermaid mindmap that captures the specific insights and key concepts from this document analysis.\n\n\
         Document: {}\n\n\
         Synthesis Data:\n{}\n\n\
         {}\n\n\
         CORRECT MERMAID MINDMAP SYNTAX:\n\
         1. Output ONLY the raw mindmap content (no code fences)\n\
         2. Start with exactly \"mindmap\" as the first line\n\
         3. Root node format: root((Title Here)) - use DOUBLE parentheses\n\
         4. Branches: simple text with 4-space indentation, no brackets\n\
         5. Create EXACTLY ONE root node only\n\
         6. All major concepts must be direct branches under the single root\n\n\
         CORRECT STRUCTURE EXAMPLE:\n\
         mindmap\n    root((Document Title))\n        Major Concept 1\n            Sub-concept A\n            Sub-concept B\n        Major Concept 2\n            Sub-concept C\n\n\
         SYNTAX RULES:\n\
         - No colons, no descriptions after node names\n\
         - Keep node names concise (2-5 words max)\n\
         - Use clear, specific terminology from the content\n\n\
         AVOID generic organizational labels like \"Main Themes\", \"Key Principles\",\n\
         \"Critical Insights\", \"Overview\" or other abstract wrapper terms.\n\
         INSTEAD extract and use the actual concepts, processes, mechanisms,\n\
         domain-specific terminology, concrete examples and detailed steps\n\
         mentioned in the content.\n\n\
         CRITICAL: Output only the mindmap content without any markdown code fences,\n\
         explanations, or extra text. Start directly with \"mindmap\".",
        title,
        summary_text,
        kind_focus(kind)
    )
}

fn kind_focus(kind: MindmapKind) -> &'static str {
    match kind {
        MindmapKind::Comprehensive => {
            "FOCUS: Cover the full breadth of the analysis - concepts, evidence, relationships and applications."
        }
        MindmapKind::Actionable => {
            "FOCUS: Organize around actionable insights - practical applications, concrete next steps and implementation advice."
        }
        MindmapKind::Simple => {
            "FOCUS: Keep the map compact - at most 4 main branches with 2-3 sub-nodes each, only the most essential ideas."
        }
    }
}

fn build_profile_prompt(
    synthesis: &Synthesis,
    profile: &ComprehensionProfile,
    title: &str,
) -> String {
    let enhanced = serde_json::json!({
        "main_themes": head_texts(&synthesis.main_themes, 6),
        "key_principles": head_texts(&synthesis.key_principles, 8),
        "critical_insights": head_texts(&synthesis.critical_insights, 6),
        "actionable_takeaways": head_texts(&synthesis.actionable_takeaways, 6),
        "text_structure": profile.primary_structure(),
        "swbst_framework": stage_object(&profile.patterns, "swbst_analysis"),
        "cause_effect_chains": stage_list(&profile.patterns, "cause_effect_chains", 5),
        "problem_solutions": stage_list(&profile.patterns, "problem_solution_pairs", 5),
        "primary_themes": stage_list(&profile.themes, "primary_themes", 4),
        "core_concepts": stage_list(&profile.unified, "core_concepts", 8),
    });
    let enhanced_text = excerpt(
        &serde_json::to_string_pretty(&enhanced).unwrap_or_default(),
        PROFILE_DATA_BYTES,
    );

    format!(
        "Create an enhanced Mermaid mindmap using the comprehension profile for deeper understanding.\n\n\
         Document: {}\n\
         Text Structure: {}\n\n\
         Enhanced Analysis Data:\n{}\n\n\
         CORRECT MERMAID MINDMAP SYNTAX:\n\
         1. Output ONLY the raw mindmap content (no code fences)\n\
         2. Start with exactly \"mindmap\" as the first line\n\
         3. Root node format: root((Title Here)) - use DOUBLE parentheses\n\
         4. Branches: simple text with 4-space indentation, no brackets\n\
         5. Create EXACTLY ONE root node only\n\
         6. All major concepts, themes, and analysis sections must be direct branches under the single root\n\n\
         STRUCTURE-BASED ORGANIZATION:\n\
         - Use the text structure to organize main branches\n\
         - For Problem-Solution texts: organize by problems, then solutions, then outcomes\n\
         - For Cause-Effect texts: organize by causes, then effects, then implications\n\
         - For Comparison texts: organize by comparison points, similarities and differences\n\
         - For mixed structures: use the core concepts as main branches\n\n\
         SWBST FRAMEWORK INTEGRATION (when applicable):\n\
         - Key actors and subjects (Somebody)\n\
         - Goals and objectives (Wanted)\n\
         - Obstacles and challenges (But)\n\
         - Actions and solutions (So)\n\
         - Results and outcomes (Then)\n\n\
         ENHANCED EXPLANATION STRATEGY:\n\
         - For each main branch: add a detailed explanation (10-20 words) after a colon\n\
         - For sub-branches: add a context explanation (5-15 words) after a colon\n\
         - Use cause-effect language: \"leads to\", \"results in\", \"because of\"\n\
         - Use problem-solution language: \"solves\", \"addresses\", \"prevents\"\n\n\
         CONTENT RICHNESS:\n\
         - Extract SPECIFIC concepts, processes, and mechanisms\n\
         - Use exact terminology from the source material\n\
         - Include concrete examples and evidence\n\
         - Focus on actionable insights and applications\n\n\
         CRITICAL: Output only the mindmap content without any markdown code fences.\n\
         Start directly with \"mindmap\". Every node should carry a meaningful\n\
         explanation that clarifies the concept and its relationships.",
        title,
        profile.primary_structure(),
        enhanced_text
    )
}

fn head_texts(items: &[SynthesisItem], limit: usize) -> Vec<&str> {
    items.iter().take(limit).map(|item| item.text()).collect()
}

fn stage_list(outcome: &StageOutcome, key: &str, limit: usize) -> Value {
    let items = outcome
        .data()
        .and_then(|data| data[key].as_array())
        .map(|list| list.iter().take(limit).cloned().collect())
        .unwrap_or_default();
    Value::Array(items)
}

fn stage_object(outcome: &StageOutcome, key: &str) -> Value {
    outcome
        .data()
        .and_then(|data| data.get(key))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}))
}

fn shorten_title(title: &str) -> String {
    title
        .split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .take(4)
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

fn clip(text: &str, max_bytes: usize) -> &str {
    &text[..crate::analysis::chunker::floor_char_boundary(text, max_bytes)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{
        AnalysisMetadata, AnalysisOutcome, InsightCategories, SynthesisMetadata, SynthesisOutcome,
    };
    use crate::llm::testing::ScriptedChat;
    use chrono::Utc;

    fn synthesis_with(themes: &[&str]) -> Synthesis {
        Synthesis {
            main_themes: themes.iter().map(|t| SynthesisItem::from(*t)).collect(),
            key_principles: vec![SynthesisItem::from("principle")],
            critical_insights: vec![SynthesisItem::from("insight")],
            actionable_takeaways: vec![SynthesisItem::from("takeaway")],
            mental_models: vec![],
            concept_connections: vec![],
            metadata: SynthesisMetadata {
                total_chunks_processed: 1,
                successful_chunks: 1,
                synthesis_model: "gpt-5-mini".to_string(),
            },
            fallback_mode: false,
            note: None,
        }
    }

    fn analysis_with(synthesis: SynthesisOutcome) -> ChapterAnalysis {
        ChapterAnalysis {
            metadata: AnalysisMetadata {
                chapter_title: "Deep Work Rules".to_string(),
                model: "gpt-5-mini".to_string(),
                total_chunks: 1,
                successful_chunks: 1,
                analyzed_at: Utc::now(),
            },
            chunk_analyses: vec![ChunkAnalysis {
                chunk_number: 1,
                section_info: "Section 1".to_string(),
                token_estimate: 100,
                outcome: AnalysisOutcome::Insights(InsightCategories {
                    key_concepts: vec!["focus blocks".to_string(), "shallow work".to_string()],
                    ..Default::default()
                }),
            }],
            synthesis,
            profile: None,
        }
    }

    #[test]
    fn test_normalize_strips_fences_and_preamble() {
        let raw = "Here is your mindmap:\n```mermaid\nmindmap\n    root((Focus))\n        Branch A\n        Branch B\n```";
        let normalized = normalize_mindmap(raw, "Title", false);

        assert!(normalized.starts_with("mindmap\n    root((Focus))"));
        assert!(normalized.contains("Branch A"));
        assert!(!normalized.contains("```"));
        assert!(!normalized.contains("Here is"));
    }

    #[test]
    fn test_normalize_too_short_uses_fallback() {
        let normalized = normalize_mindmap("mindmap\n    root((X))", "My Chapter", false);
        assert!(normalized.contains("root((My Chapter))"));
        assert!(normalized.contains("Key Insights"));
        assert!(normalized.contains("Document processed"));

        let no_header = normalize_mindmap("just some prose\nwith no outline", "My Chapter", false);
        assert!(no_header.contains("Key Insights"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = "```mermaid\nmindmap\n    root((Habits))\n        Cue: the trigger\n        Routine\n            Reward loops\n```";
        let once = normalize_mindmap(raw, "Habits", false);
        let twice = normalize_mindmap(&once, "Habits", false);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_three_roots_collapse_to_one() {
        let raw = "mindmap\n    root((Main))\n        A\n    root((Second))\n        B\n    root)Legacy(\n        C";
        let normalized = normalize_mindmap(raw, "Title", false);

        assert_eq!(normalized.matches("root((").count(), 1);
        assert!(normalized.contains("root((Main))"));
        assert!(normalized.contains("        Second"));
        assert!(normalized.contains("        Legacy"));
        assert!(normalized.contains("        B"));
        assert!(normalized.contains("        C"));
    }

    #[test]
    fn test_legacy_root_form_is_canonicalized() {
        let raw = "mindmap\n    root)Old Style(\n        Branch\n        Other";
        let normalized = normalize_mindmap(raw, "Title", false);
        assert!(normalized.contains("root((Old Style))"));
        assert!(!normalized.contains("root)"));
    }

    #[test]
    fn test_colon_annotations_stripped_on_standard_path() {
        let raw = "mindmap\n    root((T))\n        Habit Loop: cue routine reward\n        Ratio 2:1: keep both";
        let normalized = normalize_mindmap(raw, "T", false);

        assert!(normalized.contains("        Habit Loop\n"));
        assert!(!normalized.contains("cue routine reward"));
        // Lines with more than one colon pass through untouched
        assert!(normalized.contains("Ratio 2:1: keep both"));
    }

    #[test]
    fn test_colon_annotations_preserved_on_profile_path() {
        let raw = "mindmap\n    root((T))\n        Habit Loop: cue routine reward\n        Another branch";
        let normalized = normalize_mindmap(raw, "T", true);
        assert!(normalized.contains("Habit Loop: cue routine reward"));
    }

    #[test]
    fn test_missing_root_is_synthesized() {
        let raw = "mindmap\n        Branch One\n        Branch Two";
        let normalized = normalize_mindmap(raw, "the_subtle-art of not", false);

        let lines: Vec<&str> = normalized.lines().collect();
        assert_eq!(lines[0], "mindmap");
        assert_eq!(lines[1], "    root((The Subtle Art Of))");
        assert!(lines[2].contains("Branch One"));
    }

    #[test]
    fn test_shorten_title_caps_at_four_words() {
        assert_eq!(shorten_title("deep work"), "Deep Work");
        assert_eq!(
            shorten_title("the_power-of habit formation science"),
            "The Power Of Habit"
        );
    }

    #[tokio::test]
    async fn test_synthesis_error_builds_basic_map_without_model() {
        let chat = Arc::new(ScriptedChat::new());
        let generator = MindmapGenerator::new(chat.clone(), "gpt-5-mini");

        let analysis = analysis_with(SynthesisOutcome::no_insights(1));
        let mindmap = generator
            .generate(&analysis, MindmapKind::Comprehensive)
            .await;

        assert!(chat.calls().is_empty());
        assert!(mindmap.starts_with("mindmap\n    root((Deep Work Rules))"));
        assert!(mindmap.contains("Concept 1: focus blocks"));
        assert!(mindmap.contains("1 sections analyzed"));
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_fallback_map() {
        let chat = Arc::new(ScriptedChat::new());
        // Queue left empty: the single request fails
        let generator = MindmapGenerator::new(chat.clone(), "gpt-5-mini");

        let analysis = analysis_with(SynthesisOutcome::Ready(Box::new(synthesis_with(&[
            "theme one",
        ]))));
        let mindmap = generator.generate(&analysis, MindmapKind::Simple).await;

        assert!(mindmap.contains("root((Deep Work Rules))"));
        assert!(mindmap.contains("Key Insights"));
        assert!(mindmap.contains("Results available"));
    }

    #[tokio::test]
    async fn test_profile_enriched_path_keeps_annotations() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push_ok("mindmap\n    root((Deep Work))\n        Focus blocks: uninterrupted stretches\n        Shallow work: low value tasks");

        let generator = MindmapGenerator::new(chat.clone(), "gpt-5-mini");
        let mut analysis = analysis_with(SynthesisOutcome::Ready(Box::new(synthesis_with(&[
            "attention",
        ]))));
        analysis.profile = Some(ComprehensionProfile {
            structure: StageOutcome::Done {
                data: serde_json::json!({"primary_structure": "problem_solution"}),
            },
            patterns: StageOutcome::Done {
                data: serde_json::json!({"swbst_analysis": {"somebody": ["knowledge workers"]}}),
            },
            themes: StageOutcome::Failed {
                error: "skipped".to_string(),
            },
            unified: StageOutcome::Done {
                data: serde_json::json!({"core_concepts": [{"concept": "deliberate focus"}]}),
            },
            summary: "profile summary".to_string(),
        });

        let mindmap = generator
            .generate(&analysis, MindmapKind::Comprehensive)
            .await;
        assert!(mindmap.contains("Focus blocks: uninterrupted stretches"));

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.contains("Text Structure: problem_solution"));
        assert!(calls[0].1.contains("knowledge workers"));
        assert!(calls[0].1.contains("deliberate focus"));
    }

    #[tokio::test]
    async fn test_actionable_kind_uses_standard_prompt_focus() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push_ok("mindmap\n    root((T))\n        Do the work\n        Ship it");

        let generator = MindmapGenerator::new(chat.clone(), "gpt-5-mini");
        let analysis = analysis_with(SynthesisOutcome::Ready(Box::new(synthesis_with(&[
            "theme",
        ]))));
        generator.generate(&analysis, MindmapKind::Actionable).await;

        let calls = chat.calls();
        assert!(calls[0].1.contains("actionable insights"));
        assert!(calls[0].1.contains("Synthesis Data"));
    }
}
