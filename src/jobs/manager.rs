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
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::types::{ChapterArtifacts, ChapterResult, MindmapKind};
use crate::epub::extractor::EpubExtractor;
use crate::epub::types::ExtractedChapter;
use crate::jobs::pipeline::ChapterPipeline;
use crate::jobs::types::{ChapterProgress, JobStage, JobStatus, SessionResults};
use crate::llm::excerpt;

const SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One session's live state. `generation` increments every time a new job
/// is armed; a worker holding an older generation can no longer write.
struct SessionSlot {
    status: JobStatus,
    results: SessionResults,
    touched: Instant,
    generation: u64,
    cancel: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            status: JobStatus::idle(),
            results: SessionResults::default(),
            touched: Instant::now(),
            generation: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

type SessionMap = HashMap<String, SessionSlot>;

/// In-memory session and job tracker. Jobs run as spawned tasks and
/// publish progress through generation-guarded writes, so a job that has
/// been replaced or whose session was deleted goes quiet instead of
/// clobbering newer state. Sessions expire after a TTL; expired ones are
/// swept whenever a new session is created.
pub struct JobManager {
    sessions: Arc<Mutex<SessionMap>>,
    ttl: Duration,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

/// Chapters a mind-map job should process, by chapter file name
/// (`<canonical_name>.md`), plus which map flavors to produce.
#[derive(Debug, Clone)]
pub struct MindmapJobRequest {
    pub chapter_files: Vec<String>,
    pub kinds: Vec<MindmapKind>,
}

impl JobManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Registers a new session and returns its id. Expired sessions are
    /// evicted here; their tasks, if any, are cancelled.
    pub async fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().await;
        let ttl = self.ttl;
        sessions.retain(|sid, slot| {
            if slot.touched.elapsed() > ttl {
                info!("Evicting expired session {}", sid);
                slot.cancel.store(true, Ordering::SeqCst);
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
                false
            } else {
                true
            }
        });
        sessions.insert(id.clone(), SessionSlot::new());
        id
    }

    /// Drops a session and cancels whatever it was running.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.remove(session_id) {
            Some(mut slot) => {
                slot.cancel.store(true, Ordering::SeqCst);
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
                true
            }
            None => false,
        }
    }

    pub async fn get_status(&self, session_id: &str) -> Option<JobStatus> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|slot| slot.status.clone())
    }

    pub async fn get_results(&self, session_id: &str) -> Option<SessionResults> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|slot| slot.results.clone())
    }

    /// Polls until the session's current job reports completed. Returns
    /// the final status, or None when the session does not exist.
    pub async fn wait_until_complete(&self, session_id: &str) -> Option<JobStatus> {
        loop {
            let status = self.get_status(session_id).await?;
            if status.completed {
                return Some(status);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Starts EPUB extraction for the session. Progress runs 20/40/80/100
    /// and the job is all-or-nothing: any extraction error fails the whole
    /// job. A job already running for the session is cancel-and-replaced.
    pub async fn start_epub_job(
        &self,
        session_id: &str,
        epub_path: PathBuf,
        min_content_length: usize,
        include_back_matter: bool,
    ) -> Result<()> {
        let status = JobStatus::armed(JobStage::EpubProcessing, "Starting EPUB processing...");
        let handle = self.arm_job(session_id, status).await?;
        let generation = handle.generation;

        let task = tokio::spawn(run_epub_job(
            handle,
            epub_path,
            min_content_length,
            include_back_matter,
        ));
        self.attach_task(session_id, generation, task).await;
        Ok(())
    }

    /// Starts mind-map generation over previously extracted chapters.
    /// Chapters run strictly sequentially; a failing chapter is recorded
    /// and the batch keeps going. A job already running for the session is
    /// cancel-and-replaced.
    pub async fn start_mindmap_job(
        &self,
        session_id: &str,
        request: MindmapJobRequest,
        pipeline: Arc<dyn ChapterPipeline>,
    ) -> Result<()> {
        let mut status =
            JobStatus::armed(JobStage::MindmapProcessing, "Starting mind map generation...");
        status.total_chapters = request.chapter_files.len();
        for file in &request.chapter_files {
            status
                .chapter_status
                .insert(chapter_stem(file), ChapterProgress::pending());
        }

        let handle = self.arm_job(session_id, status).await?;
        let generation = handle.generation;

        let task = tokio::spawn(run_mindmap_job(handle, request, pipeline));
        self.attach_task(session_id, generation, task).await;
        Ok(())
    }

    /// Cancels the job the slot is currently running and re-arms it for a
    /// new one, returning the write handle the new worker will use.
    async fn arm_job(&self, session_id: &str, status: JobStatus) -> Result<JobHandle> {
        let mut sessions = self.sessions.lock().await;
        let slot = match sessions.get_mut(session_id) {
            Some(slot) => slot,
            None => bail!("Unknown session: {}", session_id),
        };

        slot.cancel.store(true, Ordering::SeqCst);
        if let Some(task) = slot.task.take() {
            if !task.is_finished() {
                warn!("Replacing a running job for session {}", session_id);
            }
            task.abort();
        }

        slot.generation += 1;
        slot.cancel = Arc::new(AtomicBool::new(false));
        slot.status = status;
        slot.touched = Instant::now();

        Ok(JobHandle {
            sessions: self.sessions.clone(),
            session_id: session_id.to_string(),
            generation: slot.generation,
            cancel: slot.cancel.clone(),
        })
    }

    /// Stores the worker's join handle so a later job (or eviction) can
    /// abort it. If the slot has already moved on, the task is aborted.
    async fn attach_task(&self, session_id: &str, generation: u64, task: JoinHandle<()>) {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(slot) if slot.generation == generation => slot.task = Some(task),
            _ => task.abort(),
        }
    }
}

/// Write handle a worker uses to publish progress and results. Every
/// write checks the slot still belongs to this job's generation; stale
/// writes are silently dropped.
#[derive(Clone)]
struct JobHandle {
    sessions: Arc<Mutex<SessionMap>>,
    session_id: String,
    generation: u64,
    cancel: Arc<AtomicBool>,
}

impl JobHandle {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn update<F: FnOnce(&mut JobStatus)>(&self, apply: F) {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get_mut(&self.session_id) {
            if slot.generation == self.generation {
                apply(&mut slot.status);
                slot.touched = Instant::now();
            }
        }
    }

    async fn progress(&self, progress: u8, message: &str) {
        self.update(|s| {
            s.progress = progress;
            s.message = message.to_string();
        })
        .await;
    }

    async fn message(&self, message: &str) {
        self.update(|s| s.message = message.to_string()).await;
    }

    async fn update_results<F: FnOnce(&mut SessionResults)>(&self, apply: F) {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get_mut(&self.session_id) {
            if slot.generation == self.generation {
                apply(&mut slot.results);
                slot.touched = Instant::now();
            }
        }
    }

    async fn results_snapshot(&self) -> Option<SessionResults> {
        let sessions = self.sessions.lock().await;
        match sessions.get(&self.session_id) {
            Some(slot) if slot.generation == self.generation => Some(slot.results.clone()),
            _ => None,
        }
    }

    /// Marks the whole job failed. Used for job-level errors only;
    /// per-chapter failures go through chapter status entries instead.
    async fn fail(&self, stage: JobStage, error: String) {
        warn!("Job failed for session {}: {}", self.session_id, error);
        self.update(|s| {
            s.stage = stage;
            s.message = error.clone();
            s.error = Some(error);
            s.completed = true;
        })
        .await;
    }
}

fn chapter_stem(chapter_file: &str) -> String {
    chapter_file
        .strip_suffix(".md")
        .unwrap_or(chapter_file)
        .to_string()
}

async fn run_epub_job(
    handle: JobHandle,
    epub_path: PathBuf,
    min_content_length: usize,
    include_back_matter: bool,
) {
    let outcome = async {
        handle.progress(20, "Extracting EPUB structure...").await;
        let extractor = EpubExtractor::new(&epub_path, min_content_length, include_back_matter);
        let (metadata, entries) = extractor.extract_structure()?;

        handle.progress(40, "Processing chapters...").await;
        let book = extractor.extract_chapters(metadata, entries)?;

        handle.progress(80, "Collecting chapter information...").await;
        let count = book.chapters.len();
        for skipped in &book.skipped {
            info!(
                "Skipped {} ({}, {} chars)",
                skipped.title,
                skipped.kind.as_str(),
                skipped.length
            );
        }
        handle
            .update_results(|r| {
                r.metadata = Some(book.metadata);
                r.chapters = book.chapters;
                r.mindmap_results.clear();
            })
            .await;
        Ok::<usize, anyhow::Error>(count)
    }
    .await;

    match outcome {
        Ok(count) => {
            info!("EPUB extraction finished with {} chapters", count);
            handle
                .update(|s| {
                    s.progress = 100;
                    s.message = format!("EPUB processing completed! {} chapters ready.", count);
                    s.stage = JobStage::EpubDone;
                    s.completed = true;
                })
                .await;
        }
        Err(e) => {
            handle
                .fail(JobStage::EpubError, format!("Error processing EPUB: {}", e))
                .await;
        }
    }
}

async fn run_mindmap_job(
    handle: JobHandle,
    request: MindmapJobRequest,
    pipeline: Arc<dyn ChapterPipeline>,
) {
    let total = request.chapter_files.len();
    if total == 0 {
        handle
            .fail(
                JobStage::MindmapError,
                "Error processing mindmaps: no chapters selected".to_string(),
            )
            .await;
        return;
    }

    // Chapter contents are read once up front; the job works from this
    // snapshot even if the session's results change underneath it.
    let contents: HashMap<String, ExtractedChapter> = match handle.results_snapshot().await {
        Some(results) => request
            .chapter_files
            .iter()
            .filter_map(|file| {
                results
                    .chapter_by_file(file)
                    .map(|chapter| (file.clone(), chapter.clone()))
            })
            .collect(),
        None => return,
    };
    if contents.is_empty() {
        handle
            .fail(
                JobStage::MindmapError,
                "Error processing mindmaps: no extracted chapters in this session".to_string(),
            )
            .await;
        return;
    }

    for (i, chapter_file) in request.chapter_files.iter().enumerate() {
        if handle.cancelled() {
            info!("Mind-map job cancelled before {}", chapter_file);
            return;
        }
        let chapter_name = chapter_stem(chapter_file);

        handle
            .update(|s| {
                s.chapter_status.insert(
                    chapter_name.clone(),
                    ChapterProgress::processing("Processing chapter..."),
                );
            })
            .await;

        let chapter = match contents.get(chapter_file) {
            Some(chapter) => chapter,
            None => {
                warn!("Chapter {} not found in session results", chapter_file);
                let message = "Chapter content not found".to_string();
                handle
                    .update(|s| {
                        s.chapter_status
                            .insert(chapter_name.clone(), ChapterProgress::error(message.clone()));
                    })
                    .await;
                handle
                    .update_results(|r| {
                        r.upsert_result(ChapterResult::failure(&chapter_name, chapter_file, message))
                    })
                    .await;
                continue;
            }
        };

        handle
            .update(|s| {
                s.progress = (30 + i * 60 / total) as u8;
                s.message = format!(
                    "Creating mind maps for chapter {}/{}: {}",
                    i + 1,
                    total,
                    chapter_file
                );
                s.processed_chapters = i;
            })
            .await;

        if chapter.content.trim().is_empty() {
            warn!("Chapter {} is empty, skipping", chapter_file);
            let message = "Chapter content is empty".to_string();
            handle
                .update(|s| {
                    s.chapter_status
                        .insert(chapter_name.clone(), ChapterProgress::error(message.clone()));
                })
                .await;
            handle
                .update_results(|r| {
                    r.upsert_result(ChapterResult::failure(&chapter_name, chapter_file, message))
                })
                .await;
            continue;
        }

        handle
            .message(&format!("Analyzing chapter content: {}", chapter_file))
            .await;

        match pipeline
            .process_chapter(&chapter.content, &chapter.title, &request.kinds)
            .await
        {
            Ok(output) => {
                let artifacts = ChapterArtifacts {
                    chapter_file: chapter_file.clone(),
                    chapter_name: chapter_name.clone(),
                    chapter_title: chapter.title.clone(),
                    canonical_name: chapter.canonical_name.clone(),
                    analysis_complete: !output.analysis.synthesis.is_error(),
                    analysis_summary: output.analysis_summary,
                    analysis_synthesis: output.analysis.synthesis.clone(),
                    quick_summary: output.quick_summary,
                    processing_report: output.processing_report,
                    mindmaps: output.mindmaps,
                    mindmap_explanation: output.mindmap_explanation,
                    validation_issues: output.validation_issues,
                };
                handle
                    .update_results(|r| {
                        r.upsert_result(ChapterResult::Success(Box::new(artifacts)))
                    })
                    .await;
                handle
                    .update(|s| {
                        s.completed_chapters.push(chapter_name.clone());
                        s.chapter_status
                            .insert(chapter_name.clone(), ChapterProgress::completed());
                    })
                    .await;
                info!("Successfully processed {}", chapter_file);
            }
            Err(e) => {
                warn!("Error processing {}: {:#}", chapter_file, e);
                let reason = e.to_string();
                handle
                    .update(|s| {
                        s.chapter_status.insert(
                            chapter_name.clone(),
                            ChapterProgress::error(format!(
                                "Processing failed: {}",
                                excerpt(&reason, 100)
                            )),
                        );
                    })
                    .await;
                handle
                    .update_results(|r| {
                        r.upsert_result(ChapterResult::failure(
                            &chapter_name,
                            chapter_file,
                            format!("Processing failed: {}", excerpt(&reason, 200)),
                        ))
                    })
                    .await;
            }
        }
    }

    handle.progress(95, "Finalizing results...").await;
    let stored = handle
        .results_snapshot()
        .await
        .map(|r| r.mindmap_results.len())
        .unwrap_or(0);
    handle
        .update(|s| {
            s.progress = 100;
            s.message = format!("Mind map processing completed! {} chapters processed.", stored);
            s.processed_chapters = stored;
            s.stage = JobStage::MindmapDone;
            s.completed = true;
        })
        .await;
}
