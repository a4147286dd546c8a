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
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::epub::types::{
    BookMetadata, ChapterKind, ExtractedBook, ExtractedChapter, SkippedChapter, TocEntry,
};

/// Pulls chapters out of an `.epub` archive: `META-INF/container.xml`
/// names the OPF package, the OPF yields metadata, manifest and spine,
/// and the NCX yields the table of contents. Books without a usable NCX
/// fall back to spine order with generated chapter titles.
pub struct EpubExtractor {
    path: PathBuf,
    min_content_length: usize,
    include_back_matter: bool,
}

struct OpfDocument {
    metadata: BookMetadata,
    manifest: HashMap<String, String>,
    spine: Vec<String>,
}

impl EpubExtractor {
    pub fn new(path: &Path, min_content_length: usize, include_back_matter: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            min_content_length,
            include_back_matter,
        }
    }

    /// Book metadata and the table of contents, without converting any
    /// chapter bodies.
    pub fn extract_structure(&self) -> Result<(BookMetadata, Vec<TocEntry>)> {
        let mut archive = self.open_archive()?;

        let container = read_entry(&mut archive, "META-INF/container.xml")?;
        let opf_path = rootfile_path(&container)?;
        let opf_xml = read_entry(&mut archive, &opf_path)?;
        let opf = parse_opf(&opf_xml)?;
        let base = parent_dir(&opf_path);

        let mut entries = Vec::new();
        if let Some(ncx_href) = opf.manifest.values().find(|href| href.ends_with(".ncx")) {
            let ncx_path = join_path(&base, ncx_href);
            match read_entry(&mut archive, &ncx_path) {
                Ok(ncx_xml) => entries = parse_ncx(&ncx_xml, &parent_dir(&ncx_path))?,
                Err(e) => warn!("NCX listed but unreadable ({}); using spine order", e),
            }
        }

        if entries.is_empty() {
            debug!("No NCX navigation points, falling back to spine order");
            entries = opf
                .spine
                .iter()
                .filter_map(|idref| opf.manifest.get(idref))
                .enumerate()
                .map(|(i, href)| TocEntry {
                    title: format!("Chapter {}", i + 1),
                    path: join_path(&base, href),
                    kind: ChapterKind::Chapter,
                })
                .collect();
        }

        Ok((opf.metadata, entries))
    }

    /// Converts, filters and canonically names the chapters in `entries`.
    pub fn extract_chapters(
        &self,
        metadata: BookMetadata,
        entries: Vec<TocEntry>,
    ) -> Result<ExtractedBook> {
        let mut archive = self.open_archive()?;

        let mut chapters: Vec<ExtractedChapter> = Vec::new();
        let mut skipped = Vec::new();
        for entry in entries {
            let content = match read_entry(&mut archive, &entry.path) {
                Ok(html) => html_to_markdown(&html),
                Err(e) => {
                    debug!("Unreadable chapter {}: {}", entry.path, e);
                    String::new()
                }
            };
            let length = content.trim().chars().count();

            if self.keep_chapter(entry.kind, length) {
                info!("Including {}: {} ({} chars)", entry.kind, entry.title, length);
                let index = chapters.len();
                chapters.push(ExtractedChapter {
                    canonical_name: canonical_name(&entry.title, entry.kind, index),
                    character_count: length,
                    content_hash: content_hash(&content),
                    title: entry.title,
                    content,
                    kind: entry.kind,
                });
            } else {
                debug!("Skipping {}: {} ({} chars)", entry.kind, entry.title, length);
                skipped.push(SkippedChapter {
                    title: entry.title,
                    kind: entry.kind,
                    length,
                });
            }
        }

        info!(
            "Extraction complete: {} chapters kept, {} skipped",
            chapters.len(),
            skipped.len()
        );
        Ok(ExtractedBook {
            metadata,
            chapters,
            skipped,
        })
    }

    /// Structure and chapters in one call.
    pub fn extract_book(&self) -> Result<ExtractedBook> {
        let (metadata, entries) = self.extract_structure()?;
        self.extract_chapters(metadata, entries)
    }

    fn open_archive(&self) -> Result<ZipArchive<File>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open EPUB file: {}", self.path.display()))?;
        ZipArchive::new(file)
            .with_context(|| format!("Failed to read EPUB as ZIP: {}", self.path.display()))
    }

    /// Navigation noise is always dropped; optional back matter only
    /// survives when asked for; everything else must carry enough text.
    fn keep_chapter(&self, kind: ChapterKind, length: usize) -> bool {
        if kind.is_excluded() {
            return false;
        }
        if kind.is_back_matter() && !self.include_back_matter {
            return false;
        }
        length >= self.min_content_length
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Missing archive entry: {}", name))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read archive entry: {}", name))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// EPUB content documents are XHTML; render them to markdown-ish text.
fn html_to_markdown(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 120)
        .trim()
        .to_string()
}

/// `META-INF/container.xml` names the package document everything else
/// hangs off.
fn rootfile_path(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(attr) = e.try_get_attribute("full-path")? {
                    return Ok(attr.unescape_value()?.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("Malformed container.xml"),
            _ => {}
        }
    }
    bail!("container.xml declares no rootfile")
}

fn parse_opf(xml: &str) -> Result<OpfDocument> {
    #[derive(Clone, Copy)]
    enum Field {
        Title,
        Creator,
        Language,
        Publisher,
        Date,
        Description,
        Identifier,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut metadata = BookMetadata::default();
    let mut manifest = HashMap::new();
    let mut spine = Vec::new();
    let mut pending: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"title" => pending = Some(Field::Title),
                b"creator" => pending = Some(Field::Creator),
                b"language" => pending = Some(Field::Language),
                b"publisher" => pending = Some(Field::Publisher),
                b"date" => pending = Some(Field::Date),
                b"description" => pending = Some(Field::Description),
                b"identifier" => pending = Some(Field::Identifier),
                b"item" => manifest_item(&e, &mut manifest)?,
                b"itemref" => spine_item(&e, &mut spine)?,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => manifest_item(&e, &mut manifest)?,
                b"itemref" => spine_item(&e, &mut spine)?,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(field) = pending.take() {
                    let value = t.unescape()?.trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    match field {
                        // First occurrence wins, matching DOM-style reads.
                        Field::Title if metadata.title.is_empty() => metadata.title = value,
                        Field::Creator => metadata.authors.push(value),
                        Field::Language if metadata.language.is_empty() => {
                            metadata.language = value
                        }
                        Field::Publisher if metadata.publisher.is_empty() => {
                            metadata.publisher = value
                        }
                        Field::Date if metadata.date.is_empty() => metadata.date = value,
                        Field::Description if metadata.description.is_empty() => {
                            metadata.description = value
                        }
                        Field::Identifier if metadata.identifier.is_empty() => {
                            metadata.identifier = value
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => pending = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("Malformed OPF package document"),
            _ => {}
        }
    }

    Ok(OpfDocument {
        metadata,
        manifest,
        spine,
    })
}

fn manifest_item(e: &BytesStart, manifest: &mut HashMap<String, String>) -> Result<()> {
    let mut id = None;
    let mut href = None;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"id" => id = Some(attr.unescape_value()?.into_owned()),
            b"href" => href = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    if let (Some(id), Some(href)) = (id, href) {
        manifest.insert(id, href);
    }
    Ok(())
}

fn spine_item(e: &BytesStart, spine: &mut Vec<String>) -> Result<()> {
    if let Some(attr) = e.try_get_attribute("idref")? {
        spine.push(attr.unescape_value()?.into_owned());
    }
    Ok(())
}

/// NCX navigation points stream by as label text followed by a content
/// `src`; each pair becomes one entry, classified from its label. Nested
/// points emit in document order.
fn parse_ncx(xml: &str, content_dir: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_label = false;
    let mut pending_title: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"text" => in_label = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"text" => in_label = false,
            Ok(Event::Text(t)) if in_label => {
                pending_title = Some(t.unescape()?.trim().to_string());
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"content" =>
            {
                if let Some(attr) = e.try_get_attribute("src")? {
                    let src = attr.unescape_value()?;
                    let title = pending_title.take().unwrap_or_default();
                    let kind = ChapterKind::classify(&title);
                    entries.push(TocEntry {
                        title,
                        path: join_path(content_dir, &src),
                        kind,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("Malformed NCX document"),
            _ => {}
        }
    }

    Ok(entries)
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

fn join_path(base: &str, href: &str) -> String {
    if base.is_empty() {
        clean_path(href)
    } else {
        clean_path(&format!("{}/{}", base, href))
    }
}

/// Resolve `.` and `..` segments without touching the filesystem.
fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            ".." => {
                parts.pop();
            }
            "." => {}
            part => parts.push(part),
        }
    }
    parts.join("/")
}

/// `{index}_{kind}_{slug}`: a zero-padded position for stable sorting,
/// the chapter kind, and a lowercase hyphen slug capped at 50 chars.
fn canonical_name(title: &str, kind: ChapterKind, index: usize) -> String {
    format!("{:02}_{}_{}", index + 1, kind.as_str(), slugify(title))
}

fn slugify(title: &str) -> String {
    static STRIP: OnceLock<regex::Regex> = OnceLock::new();
    static RUNS: OnceLock<regex::Regex> = OnceLock::new();

    let strip =
        STRIP.get_or_init(|| regex::Regex::new(r"[^\w\s-]").expect("pattern compiles"));
    let runs = RUNS.get_or_init(|| regex::Regex::new(r"[-\s]+").expect("pattern compiles"));

    let cleaned = strip.replace_all(title, "");
    let cleaned = cleaned.trim().to_lowercase();
    runs.replace_all(&cleaned, "-").chars().take(50).collect()
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}


#[cfg(test)]
mod tests {
    use super::testing::{temp_epub_path, write_epub, write_epub_without_ncx};
    use super::*;

    const LONG_BODY: &str = "The spacing effect shows that distributed practice beats massed \
         practice. Reviews scheduled over growing intervals keep recall strong while cutting \
         total study time, which is why every serious flashcard system schedules this way.";

    #[test]
    fn test_extract_structure_reads_metadata_and_toc() {
        let path = temp_epub_path("structure");
        write_epub(
            &path,
            "Learning How to Learn",
            &[("Chapter 1: Memory", LONG_BODY), ("Chapter 2: Recall", LONG_BODY)],
        );

        let extractor = EpubExtractor::new(&path, 50, false);
        let (metadata, entries) = extractor.extract_structure().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(metadata.title, "Learning How to Learn");
        assert_eq!(metadata.authors, vec!["Test Author".to_string()]);
        assert_eq!(metadata.language, "en");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Chapter 1: Memory");
        assert_eq!(entries[0].path, "OEBPS/ch0.xhtml");
        assert_eq!(entries[0].kind, ChapterKind::Chapter);
    }

    #[test]
    fn test_spine_fallback_generates_chapter_titles() {
        let path = temp_epub_path("spine");
        write_epub_without_ncx(&path, "No TOC Here", &[("ignored", LONG_BODY), ("also", LONG_BODY)]);

        let extractor = EpubExtractor::new(&path, 50, false);
        let (_, entries) = extractor.extract_structure().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Chapter 1");
        assert_eq!(entries[1].title, "Chapter 2");
        assert!(entries.iter().all(|e| e.kind == ChapterKind::Chapter));
    }

    #[test]
    fn test_extract_book_filters_and_names_chapters() {
        let path = temp_epub_path("filter");
        write_epub(
            &path,
            "Filtered",
            &[
                ("Cover", "img"),
                ("Table of Contents", "1. Memory"),
                ("Chapter 1: Memory Palaces", LONG_BODY),
                ("Tiny", "too short"),
                ("Glossary", LONG_BODY),
            ],
        );

        let extractor = EpubExtractor::new(&path, 50, false);
        let book = extractor.extract_book().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(book.chapters.len(), 1);
        let chapter = &book.chapters[0];
        assert_eq!(chapter.canonical_name, "01_chapter_chapter-1-memory-palaces");
        assert_eq!(chapter.kind, ChapterKind::Chapter);
        assert!(chapter.content.contains("spacing effect"));
        assert_eq!(chapter.character_count, chapter.content.trim().chars().count());
        assert_eq!(chapter.content_hash.len(), 64);

        let skipped_titles: Vec<&str> = book.skipped.iter().map(|s| s.title.as_str()).collect();
        assert!(skipped_titles.contains(&"Cover"));
        assert!(skipped_titles.contains(&"Table of Contents"));
        assert!(skipped_titles.contains(&"Tiny"));
        assert!(skipped_titles.contains(&"Glossary"));
    }

    #[test]
    fn test_back_matter_gated_by_flag() {
        let path = temp_epub_path("backmatter");
        write_epub(
            &path,
            "Gated",
            &[("Chapter 1: Core", LONG_BODY), ("Glossary", LONG_BODY)],
        );

        let include = EpubExtractor::new(&path, 50, true);
        let book = include.extract_book().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[1].kind, ChapterKind::Glossary);
        assert_eq!(book.chapters[1].canonical_name, "02_glossary_glossary");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let extractor = EpubExtractor::new(Path::new("/nonexistent/book.epub"), 50, false);
        let err = extractor.extract_structure().unwrap_err();
        assert!(err.to_string().contains("Failed to open EPUB file"));
    }

    #[test]
    fn test_clean_path_resolves_relative_segments() {
        assert_eq!(clean_path("OEBPS/../text/ch1.xhtml"), "text/ch1.xhtml");
        assert_eq!(clean_path("./ch1.xhtml"), "ch1.xhtml");
        assert_eq!(clean_path("a/b/../../c.xhtml"), "c.xhtml");
    }

    #[test]
    fn test_slugify_compacts_titles() {
        assert_eq!(slugify("Chapter 1: Memory Palaces!"), "chapter-1-memory-palaces");
        assert_eq!(slugify("  Spaced   --  Repetition  "), "spaced-repetition");
        let long = "x".repeat(80);
        assert_eq!(slugify(&long).chars().count(), 50);
    }

    #[test]
    fn test_rootfile_path_requires_declaration() {
        let err = rootfile_path("<container></container>").unwrap_err();
        assert!(err.to_string().contains("no rootfile"));
    }
}
