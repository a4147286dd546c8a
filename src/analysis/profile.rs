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
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::llm::{coerce_json, excerpt, ChatClient, ChatMessage};

const PROFILE_TEMPERATURE: f32 = 0.3;
/// Each analysis stage reads a bounded slice of the chapter
const STAGE_EXCERPT_BYTES: usize = 3000;
/// Serialized stage data embedded in the unified prompt
const STAGE_DATA_BYTES: usize = 4000;
const SUMMARY_DATA_BYTES: usize = 3000;

/// One staged pass over the chapter. A failed stage records its error in
/// place so the remaining stages still run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Done { data: Value },
    Failed { error: String },
}

impl StageOutcome {
    pub fn data(&self) -> Option<&Value> {
        match self {
            StageOutcome::Done { data } => Some(data),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }
}

/// Staged reading profile of a chapter: how the text is organized, which
/// narrative patterns drive it, what its themes are, one unifying view of
/// the three, and a prose summary assembled from that view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensionProfile {
    pub structure: StageOutcome,
    pub patterns: StageOutcome,
    pub themes: StageOutcome,
    pub unified: StageOutcome,
    pub summary: String,
}

impl ComprehensionProfile {
    /// Dominant text structure, "mixed" when the stage failed or the
    /// model left the field out
    pub fn primary_structure(&self) -> &str {
        self.structure
            .data()
            .and_then(|data| data["primary_structure"].as_str())
            .unwrap_or("mixed")
    }
}

/// Builds comprehension profiles through five sequential model passes:
/// structure, patterns, themes, unified synthesis, prose summary.
pub struct ComprehensionProfiler {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl ComprehensionProfiler {
    pub fn new(client: Arc<dyn ChatClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    /// Runs all five stages. Never fails as a whole: stage errors are
    /// recorded on the profile and later stages run regardless.
    pub async fn build(&self, content: &str, title: &str) -> ComprehensionProfile {
        info!("Building comprehension profile for: {}", title);

        let passage = excerpt(content, STAGE_EXCERPT_BYTES);

        let structure = self
            .run_stage("structure", build_structure_prompt(&passage, title))
            .await;
        let patterns = self
            .run_stage("patterns", build_patterns_prompt(&passage, title))
            .await;
        let themes = self
            .run_stage("themes", build_themes_prompt(&passage, title))
            .await;
        let unified = self
            .run_stage(
                "unified",
                build_unified_prompt(&structure, &patterns, &themes, title),
            )
            .await;
        let summary = self.build_summary(&unified, title).await;

        ComprehensionProfile {
            structure,
            patterns,
            themes,
            unified,
            summary,
        }
    }

    async fn run_stage(&self, name: &str, prompt: String) -> StageOutcome {
        match self.request_json(&prompt).await {
            Ok(data) => {
                debug!("Profile stage done: {}", name);
                StageOutcome::Done { data }
            }
            Err(e) => {
                error!("Profile stage {} failed: {}", name, e);
                StageOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn request_json(&self, prompt: &str) -> Result<Value> {
        let response = self
            .client
            .complete(
                &self.model,
                &[ChatMessage::user(prompt)],
                PROFILE_TEMPERATURE,
            )
            .await?;
        coerce_json(&response)
    }

    /// The summary stage returns prose, not JSON. Its failure degrades
    /// to a one-line error document instead of poisoning the profile.
    async fn build_summary(&self, unified: &StageOutcome, title: &str) -> String {
        let prompt = build_summary_prompt(unified, title);
        match self
            .client
            .complete(
                &self.model,
                &[ChatMessage::user(prompt)],
                PROFILE_TEMPERATURE,
            )
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                error!("Profile summary generation failed: {}", e);
                format!(
                    "# Comprehensive Summary: {}\n\nError generating detailed summary: {}",
                    title, e
                )
            }
        }
    }
}

/// Raw stage data for prompt embedding; failed stages contribute their
/// error marker so the model knows that perspective is missing
fn stage_payload(outcome: &StageOutcome) -> Value {
    match outcome {
        StageOutcome::Done { data } => data.clone(),
        StageOutcome::Failed { error } => serde_json::json!({ "error": error }),
    }
}

fn build_structure_prompt(passage: &str, title: &str) -> String {
    format!(
        "Analyze the text structure of \"{}\" to improve comprehension.\n\n\
         Text content:\n{}\n\n\
         Identify the following text structures present:\n\
         1. Problem-Solution structures\n\
         2. Cause-Effect relationships\n\
         3. Comparison structures\n\
         4. Sequential/Process structures\n\
         5. Description/Definition structures\n\n\
         For each structure found, provide:\n\
         - Type of structure\n\
         - Key elements identified\n\
         - How this structure supports comprehension\n\
         - Main organizing principle\n\n\
         Format as JSON:\n\
         {{\n\
             \"primary_structure\": \"structure_type\",\n\
             \"secondary_structures\": [\"type1\", \"type2\"],\n\
             \"structure_elements\": {{\n\
                 \"problem_solution\": {{\"problems\": [], \"solutions\": []}},\n\
                 \"cause_effect\": {{\"causes\": [], \"effects\": []}},\n\
                 \"comparisons\": {{\"items_compared\": [], \"comparison_points\": []}},\n\
                 \"sequences\": {{\"steps\": [], \"processes\": []}},\n\
                 \"descriptions\": {{\"main_concepts\": [], \"key_characteristics\": []}}\n\
             }},\n\
             \"comprehension_aids\": []\n\
         }}",
        title, passage
    )
}

fn build_patterns_prompt(passage: &str, title: &str) -> String {
    format!(
        "Analyze the content patterns in \"{}\" using proven comprehension frameworks.\n\n\
         Text content:\n{}\n\n\
         Apply the SWBST framework (Somebody Wanted But So Then) if applicable:\n\
         - Somebody: Who are the main actors/subjects?\n\
         - Wanted: What are the goals/objectives?\n\
         - But: What obstacles/problems exist?\n\
         - So: What solutions/actions were taken?\n\
         - Then: What were the outcomes/results?\n\n\
         Also identify:\n\
         - Cause and effect chains\n\
         - Problem-solution sequences\n\
         - Main conflicts and resolutions\n\
         - Key decision points and consequences\n\n\
         Format as JSON:\n\
         {{\n\
             \"swbst_analysis\": {{\n\
                 \"somebody\": [],\n\
                 \"wanted\": [],\n\
                 \"but\": [],\n\
                 \"so\": [],\n\
                 \"then\": []\n\
             }},\n\
             \"cause_effect_chains\": [\n\
                 {{\"cause\": \"description\", \"effect\": \"description\", \"significance\": \"why important\"}}\n\
             ],\n\
             \"problem_solution_pairs\": [\n\
                 {{\"problem\": \"description\", \"solution\": \"description\", \"effectiveness\": \"assessment\"}}\n\
             ],\n\
             \"decision_consequences\": [],\n\
             \"main_conflicts\": []\n\
         }}",
        title, passage
    )
}

fn build_themes_prompt(passage: &str, title: &str) -> String {
    format!(
        "Extract themes from \"{}\" using structured comprehension strategies.\n\n\
         Text content:\n{}\n\n\
         Identify:\n\
         1. Central themes and their supporting evidence\n\
         2. Conceptual relationships between themes\n\
         3. Theme hierarchy (primary, secondary, supporting)\n\
         4. Theme development throughout the text\n\
         5. Practical applications of each theme\n\n\
         For each theme:\n\
         - Clear definition\n\
         - Supporting evidence\n\
         - Connections to other themes\n\
         - Real-world relevance\n\n\
         Format as JSON:\n\
         {{\n\
             \"primary_themes\": [\n\
                 {{\n\
                     \"theme\": \"theme_name\",\n\
                     \"definition\": \"clear explanation\",\n\
                     \"evidence\": [],\n\
                     \"connections\": [],\n\
                     \"applications\": [],\n\
                     \"comprehension_strategy\": \"how readers can understand this\"\n\
                 }}\n\
             ],\n\
             \"secondary_themes\": [],\n\
             \"theme_relationships\": [\n\
                 {{\"theme1\": \"name\", \"theme2\": \"name\", \"relationship\": \"description\"}}\n\
             ],\n\
             \"theme_progression\": \"how themes develop through the text\",\n\
             \"unifying_concept\": \"overarching idea that ties themes together\"\n\
         }}",
        title, passage
    )
}

fn build_unified_prompt(
    structure: &StageOutcome,
    patterns: &StageOutcome,
    themes: &StageOutcome,
    title: &str,
) -> String {
    let analyses = serde_json::json!({
        "structure": stage_payload(structure),
        "patterns": stage_payload(patterns),
        "themes": stage_payload(themes),
    });
    let analyses_text = excerpt(
        &serde_json::to_string_pretty(&analyses).unwrap_or_default(),
        STAGE_DATA_BYTES,
    );

    format!(
        "Create a unified synthesis for \"{}\" by integrating multiple analysis components.\n\n\
         Analysis Components:\n{}\n\n\
         Synthesize into a coherent understanding that includes:\n\
         1. Main message and purpose\n\
         2. Key concepts and their relationships\n\
         3. Logical flow and structure\n\
         4. Critical insights and takeaways\n\
         5. Practical applications\n\n\
         Focus on creating a synthesis that:\n\
         - Integrates all analytical perspectives\n\
         - Highlights most important elements\n\
         - Shows relationships between concepts\n\
         - Provides clear learning pathways\n\
         - Emphasizes practical value\n\n\
         Format as JSON:\n\
         {{\n\
             \"main_message\": \"overarching purpose and meaning\",\n\
             \"core_concepts\": [\n\
                 {{\"concept\": \"name\", \"definition\": \"clear explanation\", \"importance\": \"why it matters\", \"connections\": []}}\n\
             ],\n\
             \"logical_framework\": \"how the content is organized and flows\",\n\
             \"critical_insights\": [],\n\
             \"practical_applications\": [],\n\
             \"learning_pathways\": [],\n\
             \"comprehension_barriers\": [],\n\
             \"success_indicators\": \"how to know the material is understood\"\n\
         }}",
        title, analyses_text
    )
}

fn build_summary_prompt(unified: &StageOutcome, title: &str) -> String {
    let synthesis_text = excerpt(
        &serde_json::to_string_pretty(&stage_payload(unified)).unwrap_or_default(),
        SUMMARY_DATA_BYTES,
    );

    format!(
        "Generate a comprehensive summary for \"{}\" based on the unified synthesis.\n\n\
         Synthesis Data:\n{}\n\n\
         Create a comprehensive summary that includes:\n\n\
         1. **Executive Overview** (2-3 paragraphs)\n\
            - What this content is about and why it matters\n\
            - Main purpose and audience\n\
            - Key value proposition\n\n\
         2. **Core Concepts & Frameworks** (organized by importance)\n\
            - Essential concepts with clear explanations\n\
            - Mental models and frameworks presented\n\
            - How concepts relate to each other\n\n\
         3. **Key Insights & Discoveries**\n\
            - Most important insights and their implications\n\
            - New perspectives or ways of thinking\n\
            - Critical connections and patterns\n\n\
         4. **Practical Applications**\n\
            - How to apply these concepts in real situations\n\
            - Specific examples and use cases\n\
            - Implementation strategies\n\n\
         5. **Main Takeaways**\n\
            - 5-7 most important points to remember\n\
            - Action items and next steps\n\
            - Success metrics and indicators\n\n\
         Write in clear, accessible language that helps readers understand complex ideas.\n\
         Aim for 600-800 words total. Use engaging headings and clear transitions.",
        title, synthesis_text
    )
}
