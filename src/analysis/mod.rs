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

pub mod chunker;
pub mod extractor;
pub mod mindmap;
pub mod notes;
pub mod profile;
pub mod report;
pub mod synthesizer;
pub mod types;


use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::analysis::chunker::TextChunker;
use crate::analysis::extractor::ChunkAnalyzer;
use crate::analysis::profile::ComprehensionProfiler;
use crate::analysis::synthesizer::InsightSynthesizer;
use crate::analysis::types::{AnalysisMetadata, ChapterAnalysis};
use crate::llm::ChatClient;

/// Full chapter analysis pipeline: comprehension profile, chunking,
/// per-chunk question sets, and cross-chunk synthesis.
pub struct InsightExtractor {
    profiler: ComprehensionProfiler,
    chunker: TextChunker,
    analyzer: ChunkAnalyzer,
    synthesizer: InsightSynthesizer,
    model: String,
}

impl InsightExtractor {
    pub fn new(
        client: Arc<dyn ChatClient>,
        model: &str,
        chunk_tokens: usize,
        overlap_tokens: usize,
        retry_fallback: Option<String>,
    ) -> Self {
        Self {
            profiler: ComprehensionProfiler::new(client.clone(), model),
            chunker: TextChunker::new(chunk_tokens, overlap_tokens),
            analyzer: ChunkAnalyzer::new(client.clone(), model),
            synthesizer: InsightSynthesizer::new(client, model, retry_fallback),
            model: model.to_string(),
        }
    }

    /// Analyze one chapter end to end. Never fails: model errors surface
    /// as per-chunk failure records or the no-insights marker.
    pub async fn analyze_chapter(&self, content: &str, title: &str) -> ChapterAnalysis {
        info!("Analyzing chapter: {}", title);

        let profile = self.profiler.build(content, title).await;

        let chunks = self.chunker.chunk_text(content);
        info!("Created {} chunks for analysis", chunks.len());

        let chunk_analyses = self.analyzer.analyze_chunks(&chunks, title).await;
        let successful = chunk_analyses.iter().filter(|a| !a.is_error()).count();
        info!(
            "Chunk analysis complete: {}/{} successful",
            successful,
            chunk_analyses.len()
        );

        let synthesis = self.synthesizer.synthesize(&chunk_analyses, title).await;

        ChapterAnalysis {
            metadata: AnalysisMetadata {
                chapter_title: title.to_string(),
                model: self.model.clone(),
                total_chunks: chunk_analyses.len(),
                successful_chunks: successful,
                analyzed_at: Utc::now(),
            },
            chunk_analyses,
            synthesis,
            profile: Some(profile),
        }
    }
}
