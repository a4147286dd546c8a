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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analysis::types::ChapterResult;
use crate::epub::types::{BookMetadata, ExtractedChapter};

/// Lifecycle stage of a session's current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Idle,
    EpubProcessing,
    EpubDone,
    EpubError,
    MindmapProcessing,
    MindmapDone,
    MindmapError,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Idle => "idle",
            JobStage::EpubProcessing => "epub_processing",
            JobStage::EpubDone => "epub_done",
            JobStage::EpubError => "epub_error",
            JobStage::MindmapProcessing => "mindmap_processing",
            JobStage::MindmapDone => "mindmap_done",
            JobStage::MindmapError => "mindmap_error",
        }
    }
}

/// State of a single chapter inside a mind-map batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterState {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Per-chapter progress entry kept in `JobStatus::chapter_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub status: ChapterState,
    pub message: String,
    pub has_download: bool,
}

impl ChapterProgress {
    pub fn pending() -> Self {
        ChapterProgress {
            status: ChapterState::Pending,
            message: "Waiting to be processed".to_string(),
            has_download: false,
        }
    }

    pub fn processing(message: &str) -> Self {
        ChapterProgress {
            status: ChapterState::Processing,
            message: message.to_string(),
            has_download: false,
        }
    }

    pub fn completed() -> Self {
        ChapterProgress {
            status: ChapterState::Completed,
            message: "Chapter processed successfully".to_string(),
            has_download: true,
        }
    }

    pub fn error(message: String) -> Self {
        ChapterProgress {
            status: ChapterState::Error,
            message,
            has_download: false,
        }
    }
}

/// Poll-friendly snapshot of a session's job. `completed` flips to true
/// exactly once per job, on both the success and the error path, so a
/// poller can always terminate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub stage: JobStage,
    pub progress: u8,
    pub message: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_chapters: usize,
    pub processed_chapters: usize,
    pub completed_chapters: Vec<String>,
    pub chapter_status: HashMap<String, ChapterProgress>,
}

impl JobStatus {
    /// Fresh status for a job that is about to start.
    pub fn armed(stage: JobStage, message: &str) -> Self {
        JobStatus {
            stage,
            progress: 0,
            message: message.to_string(),
            completed: false,
            error: None,
            total_chapters: 0,
            processed_chapters: 0,
            completed_chapters: Vec::new(),
            chapter_status: HashMap::new(),
        }
    }

    pub fn idle() -> Self {
        Self::armed(JobStage::Idle, "No job running")
    }

    /// Number of chapters whose status entry reached `Completed`. Always
    /// equals `completed_chapters.len()`.
    pub fn completed_count(&self) -> usize {
        self.chapter_status
            .values()
            .filter(|p| p.status == ChapterState::Completed)
            .count()
    }
}

/// Everything a session has produced so far: the extracted book from the
/// EPUB job and the per-chapter results accumulated by mind-map jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BookMetadata>,
    pub chapters: Vec<ExtractedChapter>,
    pub mindmap_results: Vec<ChapterResult>,
}

impl SessionResults {
    /// Looks a chapter up by its file name (`<canonical_name>.md`), the key
    /// mind-map jobs select chapters by.
    pub fn chapter_by_file(&self, chapter_file: &str) -> Option<&ExtractedChapter> {
        let stem = chapter_file.strip_suffix(".md").unwrap_or(chapter_file);
        self.chapters.iter().find(|c| c.canonical_name == stem)
    }

    /// Replaces any previous result carrying the same chapter_name, then
    /// appends the new one. Re-running a chapter never duplicates it.
    pub fn upsert_result(&mut self, result: ChapterResult) {
        let name = result.chapter_name().to_string();
        self.mindmap_results.retain(|r| r.chapter_name() != name);
        self.mindmap_results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::ChapterResult;

    #[test]
    fn armed_status_starts_clean() {
        let status = JobStatus::armed(JobStage::EpubProcessing, "Starting EPUB processing...");
        assert_eq!(status.stage, JobStage::EpubProcessing);
        assert_eq!(status.progress, 0);
        assert!(!status.completed);
        assert!(status.error.is_none());
        assert!(status.chapter_status.is_empty());
    }

    #[test]
    fn completed_count_matches_completed_chapters() {
        let mut status = JobStatus::armed(JobStage::MindmapProcessing, "go");
        status
            .chapter_status
            .insert("a".to_string(), ChapterProgress::completed());
        status
            .chapter_status
            .insert("b".to_string(), ChapterProgress::error("bad".to_string()));
        status.completed_chapters.push("a".to_string());
        assert_eq!(status.completed_count(), status.completed_chapters.len());
    }

    #[test]
    fn upsert_replaces_by_chapter_name() {
        let mut results = SessionResults::default();
        results.upsert_result(ChapterResult::failure("ch1", "ch1.md", "first".to_string()));
        results.upsert_result(ChapterResult::failure("ch2", "ch2.md", "other".to_string()));
        results.upsert_result(ChapterResult::failure("ch1", "ch1.md", "second".to_string()));

        assert_eq!(results.mindmap_results.len(), 2);
        let ch1 = results
            .mindmap_results
            .iter()
            .find(|r| r.chapter_name() == "ch1")
            .unwrap();
        match ch1 {
            ChapterResult::Error(failure) => assert_eq!(failure.error, "second"),
            ChapterResult::Success(_) => panic!("expected the failed entry"),
        }
    }

    #[test]
    fn chapter_lookup_strips_md_suffix() {
        use crate::epub::types::{ChapterKind, ExtractedChapter};
        let results = SessionResults {
            metadata: None,
            chapters: vec![ExtractedChapter {
                canonical_name: "03_chapter_the-map".to_string(),
                title: "The Map".to_string(),
                content: "body".to_string(),
                kind: ChapterKind::Chapter,
                character_count: 4,
                content_hash: String::new(),
            }],
            mindmap_results: Vec::new(),
        };
        assert!(results.chapter_by_file("03_chapter_the-map.md").is_some());
        assert!(results.chapter_by_file("03_chapter_the-map").is_some());
        assert!(results.chapter_by_file("missing.md").is_none());
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&JobStage::MindmapProcessing).unwrap();
        assert_eq!(json, "\"mindmap_processing\"");
        assert_eq!(JobStage::MindmapProcessing.as_str(), "mindmap_processing");
    }
}
