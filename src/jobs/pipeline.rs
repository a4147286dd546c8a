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
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::analysis::mindmap::MindmapGenerator;
use crate::analysis::notes::NotesGenerator;
use crate::analysis::types::{ChapterAnalysis, MindmapKind, MindmapSet};
use crate::analysis::{report, InsightExtractor};
use crate::config::Config;
use crate::llm::ChatClient;

/// Everything one chapter run produces before it is wrapped into a
/// session result.
pub struct ChapterOutput {
    pub analysis: ChapterAnalysis,
    pub mindmaps: MindmapSet,
    pub mindmap_explanation: Option<String>,
    pub quick_summary: String,
    pub analysis_summary: String,
    pub processing_report: String,
    pub validation_issues: Vec<String>,
}

/// Seam between the job runner and the per-chapter work. The production
/// implementation drives the full analysis stack; tests substitute rigged
/// pipelines to exercise failure isolation.
#[async_trait]
pub trait ChapterPipeline: Send + Sync {
    async fn process_chapter(
        &self,
        content: &str,
        title: &str,
        kinds: &[MindmapKind],
    ) -> Result<ChapterOutput>;
}

/// Production pipeline: insight extraction, mind maps, notes, summary and
/// the validation report, in that order.
pub struct StudyPipeline {
    extractor: InsightExtractor,
    mindmaps: MindmapGenerator,
    notes: NotesGenerator,
}

impl StudyPipeline {
    pub fn new(client: Arc<dyn ChatClient>, config: &Config, model: &str) -> Self {
        let profile = config.model_profile(model);
        let chunk_tokens = profile
            .chunk_tokens
            .min(config.pipeline.max_tokens_per_chunk);
        Self {
            extractor: InsightExtractor::new(
                client.clone(),
                model,
                chunk_tokens,
                config.pipeline.overlap_tokens,
                profile.retry_fallback,
            ),
            mindmaps: MindmapGenerator::new(client.clone(), model),
            notes: NotesGenerator::new(client, model),
        }
    }
}

#[async_trait]
impl ChapterPipeline for StudyPipeline {
    async fn process_chapter(
        &self,
        content: &str,
        title: &str,
        kinds: &[MindmapKind],
    ) -> Result<ChapterOutput> {
        let analysis = self.extractor.analyze_chapter(content, title).await;

        let mut mindmaps = MindmapSet::default();
        for kind in kinds {
            let map = self.mindmaps.generate(&analysis, *kind).await;
            if map.trim().is_empty() {
                debug!("Empty {} mind map for '{}', dropping it", kind, title);
            } else {
                mindmaps.insert(*kind, map);
            }
        }

        let mindmap_explanation = match primary_mindmap(&mindmaps) {
            Some(primary) => {
                let notes = self.notes.generate_notes(&analysis, primary).await;
                (!notes.trim().is_empty()).then_some(notes)
            }
            None => None,
        };

        let quick_summary = self.notes.generate_summary(&analysis).await;

        Ok(ChapterOutput {
            validation_issues: report::validate_results(&analysis),
            analysis_summary: report::create_summary_markdown(&analysis),
            processing_report: report::create_processing_report(&analysis),
            analysis,
            mindmaps,
            mindmap_explanation,
            quick_summary,
        })
    }
}

/// Preferred base for the explanation notes: comprehensive first, then
/// actionable, then simple.
pub fn primary_mindmap(set: &MindmapSet) -> Option<&str> {
    set.get(MindmapKind::Comprehensive)
        .or_else(|| set.get(MindmapKind::Actionable))
        .or_else(|| set.get(MindmapKind::Simple))
}
