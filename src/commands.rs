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

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::analysis::report::estimate_reading_time;
use crate::analysis::types::{ChapterResult, MindmapKind};
use crate::cli::Commands;
use crate::config::Config;
use crate::epub::extractor::EpubExtractor;
use crate::jobs::manager::{JobManager, MindmapJobRequest};
use crate::jobs::pipeline::StudyPipeline;
use crate::jobs::types::{JobStatus, SessionResults};
use crate::llm::OpenAiClient;
use crate::storage;

pub async fn execute(config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Process {
            epub,
            output,
            model,
            mindmap_type,
            chapters,
            min_length,
            include_back_matter,
        } => {
            process(
                config,
                ProcessRequest {
                    epub,
                    output,
                    model,
                    mindmap_type,
                    chapters,
                    min_length,
                    include_back_matter,
                },
            )
            .await
        }
        Commands::Chapters {
            epub,
            min_length,
            include_back_matter,
        } => list_chapters(config, &epub, min_length, include_back_matter),
        Commands::Models => {
            show_models(config);
            Ok(())
        }
        Commands::Config => show_config(config),
    }
}

struct ProcessRequest {
    epub: PathBuf,
    output: PathBuf,
    model: Option<String>,
    mindmap_type: String,
    chapters: Option<String>,
    min_length: Option<usize>,
    include_back_matter: bool,
}

/// Full pipeline: extract the EPUB, run the selected chapters through the
/// analysis stack, write artifacts and print a report.
async fn process(config: &Config, request: ProcessRequest) -> Result<()> {
    let model = request
        .model
        .unwrap_or_else(|| config.llm.default_model.clone());
    let min_length = request
        .min_length
        .unwrap_or(config.pipeline.min_content_length);
    let include_back_matter =
        request.include_back_matter || config.pipeline.include_back_matter;

    let api_key = match config.resolve_api_key() {
        Some(key) => key,
        None => bail!(
            "No API key found. Set the {} environment variable or add it to .env",
            config.llm.api_key_env
        ),
    };
    let client = Arc::new(OpenAiClient::new(
        &config.resolve_base_url(),
        &api_key,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?);
    let pipeline = Arc::new(StudyPipeline::new(client, config, &model));

    let manager = JobManager::default();
    let session_id = manager.create_session().await;

    println!(
        "{} {} (model: {})",
        "Processing".bold(),
        request.epub.display(),
        model
    );
    manager
        .start_epub_job(&session_id, request.epub.clone(), min_length, include_back_matter)
        .await?;
    let status = manager
        .wait_until_complete(&session_id)
        .await
        .context("Session vanished during EPUB extraction")?;
    if let Some(error) = status.error {
        bail!("{}", error);
    }

    let results = manager
        .get_results(&session_id)
        .await
        .context("Session vanished during EPUB extraction")?;
    if let Some(metadata) = &results.metadata {
        let authors = if metadata.authors.is_empty() {
            "unknown author".to_string()
        } else {
            metadata.authors.join(", ")
        };
        println!("{} by {}", metadata.title.blue().bold(), authors);
    }
    println!("{} chapters extracted\n", results.chapters.len());

    let chapter_files = selected_chapter_files(&results, request.chapters.as_deref())?;
    let kinds = mindmap_kinds(&request.mindmap_type);
    manager
        .start_mindmap_job(
            &session_id,
            MindmapJobRequest {
                chapter_files,
                kinds,
            },
            pipeline,
        )
        .await?;
    let status = watch_job(&manager, &session_id).await?;
    if let Some(error) = &status.error {
        bail!("{}", error);
    }
    info!("Job finished in stage {}", status.stage.as_str());

    let results = manager
        .get_results(&session_id)
        .await
        .context("Session vanished during processing")?;
    let output_dir = storage::ensure_output_dir(&request.output)?;
    let written = write_artifacts(&output_dir, &results)?;

    println!();
    for result in &results.mindmap_results {
        match result {
            ChapterResult::Success(artifacts) => {
                let maps = [
                    MindmapKind::Comprehensive,
                    MindmapKind::Actionable,
                    MindmapKind::Simple,
                ]
                .iter()
                .filter(|kind| artifacts.mindmaps.get(**kind).is_some())
                .count();
                println!(
                    "{} {} ({} mind map{})",
                    "✓".green(),
                    artifacts.chapter_title,
                    maps,
                    if maps == 1 { "" } else { "s" }
                );
                if !artifacts.validation_issues.is_empty() {
                    println!(
                        "  {}",
                        artifacts.validation_issues.join("; ").yellow()
                    );
                }
            }
            ChapterResult::Error(failure) => {
                println!("{} {}: {}", "✗".red(), failure.chapter_name, failure.error);
            }
        }
    }
    let failed = results.mindmap_results.len() - status.completed_count();
    println!();
    println!(
        "{} {} chapters succeeded, {} failed, {} files written to {}",
        "Done:".bold(),
        status.completed_count(),
        failed,
        written,
        output_dir.display()
    );

    manager.delete_session(&session_id).await;
    Ok(())
}

/// Poll the running job and echo progress transitions to the terminal.
async fn watch_job(manager: &JobManager, session_id: &str) -> Result<JobStatus> {
    let mut last_message = String::new();
    loop {
        let status = manager
            .get_status(session_id)
            .await
            .context("Session vanished during processing")?;
        if status.message != last_message {
            println!(
                "{} {}",
                format!("[{:>3}%]", status.progress).bright_black(),
                status.message
            );
            last_message = status.message.clone();
        }
        if status.completed {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Expand the `--chapters` selection into chapter file names, defaulting
/// to every extracted chapter. Names match with or without the `.md`
/// suffix.
fn selected_chapter_files(
    results: &SessionResults,
    selection: Option<&str>,
) -> Result<Vec<String>> {
    let all: Vec<String> = results
        .chapters
        .iter()
        .map(|c| format!("{}.md", c.canonical_name))
        .collect();
    let selection = match selection {
        Some(selection) => selection,
        None => return Ok(all),
    };

    let mut files = Vec::new();
    for item in selection.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let wanted = if item.ends_with(".md") {
            item.to_string()
        } else {
            format!("{}.md", item)
        };
        if !all.contains(&wanted) {
            bail!(
                "Unknown chapter: {}. Available: {}",
                item,
                results
                    .chapters
                    .iter()
                    .map(|c| c.canonical_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if !files.contains(&wanted) {
            files.push(wanted);
        }
    }
    if files.is_empty() {
        bail!("No chapters selected");
    }
    Ok(files)
}

/// `all` expands to every flavor; anything else resolves through the
/// catalog's name mapping (`main` and unknown values mean comprehensive).
fn mindmap_kinds(selection: &str) -> Vec<MindmapKind> {
    match selection.to_lowercase().as_str() {
        "all" => vec![
            MindmapKind::Comprehensive,
            MindmapKind::Actionable,
            MindmapKind::Simple,
        ],
        other => vec![MindmapKind::from(other.to_string())],
    }
}

/// Write per-chapter artifacts for every successful result: one `.mmd`
/// per mind-map flavor, explanation notes, quick summary, analysis
/// summary and the complete result as JSON. Failed chapters produce no
/// files. Returns the number of files written.
fn write_artifacts(output_dir: &Path, results: &SessionResults) -> Result<usize> {
    let mut written = 0;
    for result in &results.mindmap_results {
        let artifacts = match result {
            ChapterResult::Success(artifacts) => artifacts,
            ChapterResult::Error(_) => continue,
        };
        let stem = storage::clean_filename(&artifacts.canonical_name);

        for kind in [
            MindmapKind::Comprehensive,
            MindmapKind::Actionable,
            MindmapKind::Simple,
        ] {
            if let Some(map) = artifacts.mindmaps.get(kind) {
                write_file(&output_dir.join(format!("{}_{}.mmd", stem, kind)), map)?;
                written += 1;
            }
        }
        if let Some(notes) = &artifacts.mindmap_explanation {
            write_file(&output_dir.join(format!("{}_explanation.md", stem)), notes)?;
            written += 1;
        }
        if !artifacts.quick_summary.trim().is_empty() {
            write_file(
                &output_dir.join(format!("{}_quick_summary.md", stem)),
                &artifacts.quick_summary,
            )?;
            written += 1;
        }
        if !artifacts.analysis_summary.trim().is_empty() {
            write_file(
                &output_dir.join(format!("{}_summary.md", stem)),
                &artifacts.analysis_summary,
            )?;
            written += 1;
        }
        let json = serde_json::to_string_pretty(result)?;
        write_file(&output_dir.join(format!("{}_complete.json", stem)), &json)?;
        written += 1;
    }
    Ok(written)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// List the chapters an EPUB contributes, with classification and size.
fn list_chapters(
    config: &Config,
    epub: &Path,
    min_length: Option<usize>,
    include_back_matter: bool,
) -> Result<()> {
    let min_length = min_length.unwrap_or(config.pipeline.min_content_length);
    let include_back_matter = include_back_matter || config.pipeline.include_back_matter;
    let extractor = EpubExtractor::new(epub, min_length, include_back_matter);
    let book = extractor.extract_book()?;

    println!("{}", book.metadata.title.blue().bold());
    if !book.metadata.authors.is_empty() {
        println!("{}", book.metadata.authors.join(", ").bright_black());
    }
    println!();
    println!(
        "{}",
        format!("{:<48} {:<16} {:>8} {:>5}", "Chapter", "Kind", "Chars", "Min").bold()
    );
    println!("{}", "─".repeat(80));
    for chapter in &book.chapters {
        let name = if chapter.canonical_name.chars().count() > 46 {
            format!("{}...", truncate_chars(&chapter.canonical_name, 43))
        } else {
            chapter.canonical_name.clone()
        };
        println!(
            "{:<48} {:<16} {:>8} {:>5}",
            name,
            chapter.kind.as_str(),
            chapter.character_count,
            estimate_reading_time(&chapter.content)
        );
    }

    if !book.skipped.is_empty() {
        println!();
        println!(
            "{}",
            format!("Skipped {} entries:", book.skipped.len()).bright_black()
        );
        for skipped in &book.skipped {
            println!(
                "{}",
                format!(
                    "  {} ({}, {} chars)",
                    skipped.title,
                    skipped.kind.as_str(),
                    skipped.length
                )
                .bright_black()
            );
        }
    }
    Ok(())
}

/// Print the model catalog with per-model budgets and pricing.
fn show_models(config: &Config) {
    println!(
        "{}",
        format!(
            "{:<28} {:>10} {:>12} {:>8}  {}",
            "Model", "Max tok", "Chunk tok", "$/1k", "Retry fallback"
        )
        .bold()
    );
    println!("{}", "─".repeat(80));

    let mut names: Vec<&String> = config.models.keys().collect();
    names.sort();
    for name in names {
        let profile = &config.models[name];
        let display = if *name == config.llm.default_model {
            format!("{} {}", name, "(default)".green())
        } else {
            name.to_string()
        };
        println!(
            "{:<28} {:>10} {:>12} {:>8.2}  {}",
            display,
            profile.max_tokens,
            profile.chunk_tokens,
            profile.cost_per_1k_tokens,
            profile.retry_fallback.as_deref().unwrap_or("-")
        );
    }
}

/// Show the resolved configuration and where it lives.
fn show_config(config: &Config) -> Result<()> {
    let path = storage::get_system_config_path()?;
    println!("{} {}", "Config file:".bold(), path.display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
