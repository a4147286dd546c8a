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

use std::sync::Arc;
use tracing::{error, info};

use crate::analysis::types::{ChapterAnalysis, Synthesis, SynthesisItem};
use crate::llm::{excerpt, ChatClient, ChatMessage};

const NOTES_TEMPERATURE: f32 = 0.3;
const NOTES_DATA_BYTES: usize = 3000;
const SUMMARY_FOOTER: &str =
    "\n\n---\n\u{1F4DA} *Use the detailed mind map and notes to dive deeper into these concepts.*";
const SUMMARY_SYSTEM: &str = "You are an expert educational content creator using advanced \
     comprehension strategies. Create thorough summaries that help students understand complex \
     topics using proven frameworks like SWBST, cause-effect analysis, and text structure \
     approaches.";

/// Produces the two prose companions of a chapter: explanatory notes for
/// the mind map and a standalone quick summary. Both degrade to markdown
/// assembled from synthesis fields, so neither ever fails.
pub struct NotesGenerator {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl NotesGenerator {
    pub fn new(client: Arc<dyn ChatClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub async fn generate_notes(&self, analysis: &ChapterAnalysis, mindmap: &str) -> String {
        let title = &analysis.metadata.chapter_title;
        info!("Generating explanatory notes for mind map");

        let prompt = build_notes_prompt(analysis.synthesis.synthesis(), title, mindmap);
        match self
            .client
            .complete(&self.model, &[ChatMessage::user(prompt)], NOTES_TEMPERATURE)
            .await
        {
            Ok(content) => format_notes(&content, title),
            Err(e) => {
                error!("Error generating mind map notes: {}", e);
                fallback_notes(analysis.synthesis.synthesis(), title)
            }
        }
    }

    /// Quick summary for readers who skip the full text. A comprehension
    /// profile, when present, already carries a model-written summary and
    /// is used directly without another request.
    pub async fn generate_summary(&self, analysis: &ChapterAnalysis) -> String {
        let title = &analysis.metadata.chapter_title;
        info!("Generating quick summary for: {}", title);

        if let Some(profile) = &analysis.profile {
            if !profile.summary.is_empty() {
                info!("Using comprehension profile summary");
                return format!("{}{}", profile.summary, SUMMARY_FOOTER);
            }
        }

        let prompt = build_summary_prompt(analysis.synthesis.synthesis(), title);
        let messages = [ChatMessage::system(SUMMARY_SYSTEM), ChatMessage::user(prompt)];
        match self
            .client
            .complete(&self.model, &messages, NOTES_TEMPERATURE)
            .await
        {
            Ok(text) => format!("{}{}", text.trim(), SUMMARY_FOOTER),
            Err(e) => {
                error!("Error generating quick summary: {}", e);
                fallback_summary(analysis.synthesis.synthesis(), title)
            }
        }
    }
}

fn synthesis_data(synthesis: Option<&Synthesis>, per_field: usize) -> serde_json::Value {
    match synthesis {
        Some(s) => serde_json::json!({
            "main_themes": head_texts(&s.main_themes, per_field),
            "key_principles": head_texts(&s.key_principles, per_field),
            "critical_insights": head_texts(&s.critical_insights, per_field),
            "actionable_takeaways": head_texts(&s.actionable_takeaways, per_field),
        }),
        None => serde_json::json!({
            "main_themes": [],
            "key_principles": [],
            "critical_insights": [],
            "actionable_takeaways": [],
        }),
    }
}

fn head_texts(items: &[SynthesisItem], limit: usize) -> Vec<&str> {
    items.iter().take(limit).map(|item| item.text()).collect()
}

fn build_notes_prompt(synthesis: Option<&Synthesis>, title: &str, mindmap: &str) -> String {
    let summary_text = excerpt(
        &serde_json::to_string_pretty(&synthesis_data(synthesis, 6)).unwrap_or_default(),
        NOTES_DATA_BYTES,
    );

    format!(
        "Create clear, engaging explanatory notes to accompany this mind map.\n\n\
         Document: {}\n\n\
         Mind Map Structure:\n{}\n\n\
         Synthesis Data:\n{}\n\n\
         TARGET AUDIENCE: Students who haven't read the original book/chapter\n\n\
         REQUIREMENTS:\n\
         1. Write in clear, accessible language (high school level)\n\
         2. Explain each major branch of the mind map\n\
         3. Provide context and background for key concepts\n\
         4. Include specific examples and applications\n\
         5. Make connections between different parts explicit\n\
         6. Use engaging, conversational tone\n\
         7. Length: 300-500 words total\n\
         8. Structure with clear headings\n\n\
         FORMAT:\n\
         # Mind Map Explanation: [Title]\n\n\
         ## Overview\n\
         [2-3 sentences explaining what this chapter/document is about]\n\n\
         ## Key Themes Explained\n\n\
         ### [Theme 1 from mind map]\n\
         [Explain this theme clearly with examples]\n\n\
         ### [Theme 2 from mind map]\n\
         [Explain this theme clearly with examples]\n\n\
         ## Practical Applications\n\
         [How can students use these insights in real life?]\n\n\
         ## Key Takeaways\n\
         [3-5 bullet points of most important points]\n\n\
         TONE: Clear, engaging, educational - like a good teacher explaining complex ideas simply.",
        title, mindmap, summary_text
    )
}

fn build_summary_prompt(synthesis: Option<&Synthesis>, title: &str) -> String {
    let data_text = serde_json::to_string_pretty(&synthesis_data(synthesis, usize::MAX))
        .unwrap_or_default();

    format!(
        "Create a comprehensive but concise summary for \"{}\" that helps students understand the key concepts without reading the full text.\n\n\
         Analysis Data:\n{}\n\n\
         Requirements:\n\
         1. Start with \"# Quick Summary: {}\"\n\
         2. Include a \"## What's This About?\" section with 2-3 substantial paragraphs\n\
         3. Include a \"## Core Concepts\" section with 4-6 key concepts explained in 1-2 sentences each\n\
         4. Include a \"## Key Insights\" section with 2-3 important insights\n\
         5. Include a \"## Why This Matters\" section explaining practical relevance\n\
         6. Include a \"## Main Takeaways\" section with 3-5 actionable points\n\n\
         Write in clear, accessible language that a student can understand. Be thorough but\n\
         concise - aim for substance over brevity. Each section should provide real value.\n\n\
         Focus on:\n\
         - Clear explanations of concepts\n\
         - Why these ideas matter\n\
         - How they connect to bigger pictures\n\
         - Practical applications\n\
         - Key evidence or examples mentioned\n\n\
         Total length: 400-600 words.",
        title, data_text, title
    )
}

/// Wrap generated notes under the canonical heading. The prompt asks the
/// model to emit the same heading, so a leading copy is dropped first.
fn format_notes(content: &str, title: &str) -> String {
    let body = strip_duplicate_heading(content, "# Mind Map Explanation:");
    format!(
        "# Mind Map Explanation: {}\n\n---\n\n{}\n\n---\n",
        title, body
    )
}

fn strip_duplicate_heading<'a>(content: &'a str, heading_prefix: &str) -> &'a str {
    let trimmed = content.trim();
    if !trimmed.starts_with(heading_prefix) {
        return trimmed;
    }
    match trimmed.find('\n') {
        Some(pos) => trimmed[pos + 1..].trim_start(),
        None => "",
    }
}

fn fallback_notes(synthesis: Option<&Synthesis>, title: &str) -> String {
    info!("Creating fallback notes");

    let mut notes = format!(
        "# Mind Map Explanation: {}\n\n\
         ## Overview\n\
         This mind map represents the key concepts and insights extracted from the document using AI analysis.\n\n\
         ## Main Themes\n",
        title
    );

    let Some(synthesis) = synthesis else {
        return notes;
    };

    for (i, theme) in synthesis.main_themes.iter().take(4).enumerate() {
        notes.push_str(&format!("\n### Theme {}: {}\n", i + 1, clip(theme.text(), 100)));
        notes.push_str("This represents one of the core ideas presented in the document.\n");
    }

    if !synthesis.key_principles.is_empty() {
        notes.push_str("\n## Key Principles\n");
        for principle in synthesis.key_principles.iter().take(3) {
            notes.push_str(&format!("- {}\n", clip(principle.text(), 100)));
        }
    }

    if !synthesis.actionable_takeaways.is_empty() {
        notes.push_str("\n## What You Can Do\n");
        for takeaway in synthesis.actionable_takeaways.iter().take(3) {
            notes.push_str(&format!("- {}\n", clip(takeaway.text(), 100)));
        }
    }

    notes
}

fn fallback_summary(synthesis: Option<&Synthesis>, title: &str) -> String {
    let mut summary = format!("# Quick Summary: {}\n\n## What's This About?\n", title);

    let Some(synthesis) = synthesis else {
        summary.push_str("\u{1F4DA} *Use the detailed mind map and notes to dive deeper into these concepts.*");
        return summary;
    };

    if !synthesis.main_themes.is_empty() {
        summary.push_str(&format!(
            "This chapter explores {} interconnected themes that form a comprehensive framework for understanding the topic. ",
            synthesis.main_themes.len()
        ));
        for (i, theme) in synthesis.main_themes.iter().take(4).enumerate() {
            summary.push_str(&format!("**{}.** {} ", i + 1, clip(theme.text(), 300)));
        }
        if synthesis.main_themes.len() > 4 {
            summary.push_str(&format!(
                "along with {} additional supporting concepts.",
                synthesis.main_themes.len() - 4
            ));
        }
        summary.push_str("\n\n");
    }

    if !synthesis.key_principles.is_empty() {
        summary.push_str("## Core Principles\n");
        for principle in synthesis.key_principles.iter().take(3) {
            summary.push_str(&format!("\u{2022} {}\n", clip(principle.text(), 300)));
        }
        summary.push('\n');
    }

    if !synthesis.critical_insights.is_empty() {
        summary.push_str("## Key Insights\n");
        for (i, insight) in synthesis.critical_insights.iter().take(3).enumerate() {
            summary.push_str(&format!("**{}.** {}\n", i + 1, clip(insight.text(), 300)));
        }
        summary.push('\n');
    }

    if !synthesis.actionable_takeaways.is_empty() {
        summary.push_str("## Main Takeaways\n");
        for takeaway in synthesis.actionable_takeaways.iter().take(4) {
            summary.push_str(&format!("\u{2022} {}\n", clip(takeaway.text(), 300)));
        }
        summary.push('\n');
    }

    summary.push_str("\u{1F4DA} *Use the detailed mind map and notes to dive deeper into these concepts.*");
    summary
}

fn clip(text: &str, max_bytes: usize) -> &str {
    &text[..crate::analysis::chunker::floor_char_boundary(text, max_bytes)]
}
