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
use std::sync::OnceLock;

/// Dublin Core metadata from the EPUB package document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub publisher: String,
    pub date: String,
    pub description: String,
    pub identifier: String,
}

/// Chapter classification derived from table-of-contents titles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterKind {
    Chapter,
    Introduction,
    Preface,
    Foreword,
    Epilogue,
    Appendix,
    Acknowledgements,
    Dedication,
    AboutAuthor,
    Glossary,
    Bibliography,
    Index,
    Toc,
    Cover,
    TitlePage,
    Copyright,
    PartDivider,
    SectionDivider,
    Other,
}

impl ChapterKind {
    /// Classify a table-of-contents title. Later checks only run when
    /// earlier ones miss, so ordering carries meaning: numbered chapters
    /// win over everything, navigation labels are matched late.
    pub fn classify(title: &str) -> Self {
        let lower = title.trim().to_lowercase();
        let clean = strip_numbering(&lower);

        if chapter_number(&lower).is_some() {
            ChapterKind::Chapter
        } else if contains_any(&clean, &["introduction", "intro"]) {
            ChapterKind::Introduction
        } else if clean.contains("foreword") {
            ChapterKind::Foreword
        } else if contains_any(&clean, &["preface", "prologue"]) {
            ChapterKind::Preface
        } else if contains_any(&clean, &["epilogue", "afterword", "conclusion"]) {
            ChapterKind::Epilogue
        } else if contains_any(&clean, &["appendix", "addendum"]) {
            ChapterKind::Appendix
        } else if contains_any(&clean, &["acknowledgment", "acknowledgement", "thanks"]) {
            ChapterKind::Acknowledgements
        } else if contains_any(&clean, &["dedication", "dedicated to"]) {
            ChapterKind::Dedication
        } else if contains_any(
            &clean,
            &["about the author", "about author", "author bio", "biography"],
        ) {
            ChapterKind::AboutAuthor
        } else if contains_any(&clean, &["glossary", "definitions", "terminology"]) {
            ChapterKind::Glossary
        } else if contains_any(
            &clean,
            &["bibliography", "references", "sources", "further reading"],
        ) {
            ChapterKind::Bibliography
        } else if clean.contains("index") {
            ChapterKind::Index
        } else if contains_any(&clean, &["contents", "table of contents", "toc"]) {
            ChapterKind::Toc
        } else if contains_any(&clean, &["cover", "front cover", "back cover"]) {
            ChapterKind::Cover
        } else if contains_any(&clean, &["title page", "half title", "title"])
            && clean.chars().count() < 20
        {
            ChapterKind::TitlePage
        } else if contains_any(&clean, &["copyright", "publication", "isbn", "legal"]) {
            ChapterKind::Copyright
        } else if part_divider(&lower, &clean) {
            ChapterKind::PartDivider
        } else if clean.chars().count() < 15 && contains_any(&clean, &["part", "section", "book"]) {
            ChapterKind::SectionDivider
        } else if lower.contains("chapter") {
            ChapterKind::Chapter
        } else {
            ChapterKind::Other
        }
    }

    /// Navigation and legal boilerplate, never analyzed
    pub fn is_excluded(&self) -> bool {
        matches!(
            self,
            ChapterKind::Toc
                | ChapterKind::Cover
                | ChapterKind::TitlePage
                | ChapterKind::Copyright
                | ChapterKind::PartDivider
                | ChapterKind::SectionDivider
        )
    }

    /// Optional back matter, included only on request
    pub fn is_back_matter(&self) -> bool {
        matches!(
            self,
            ChapterKind::Acknowledgements
                | ChapterKind::Dedication
                | ChapterKind::AboutAuthor
                | ChapterKind::Glossary
                | ChapterKind::Bibliography
                | ChapterKind::Index
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterKind::Chapter => "chapter",
            ChapterKind::Introduction => "introduction",
            ChapterKind::Preface => "preface",
            ChapterKind::Foreword => "foreword",
            ChapterKind::Epilogue => "epilogue",
            ChapterKind::Appendix => "appendix",
            ChapterKind::Acknowledgements => "acknowledgements",
            ChapterKind::Dedication => "dedication",
            ChapterKind::AboutAuthor => "about_author",
            ChapterKind::Glossary => "glossary",
            ChapterKind::Bibliography => "bibliography",
            ChapterKind::Index => "index",
            ChapterKind::Toc => "toc",
            ChapterKind::Cover => "cover",
            ChapterKind::TitlePage => "title_page",
            ChapterKind::Copyright => "copyright",
            ChapterKind::PartDivider => "part_divider",
            ChapterKind::SectionDivider => "section_divider",
            ChapterKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ChapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip "Chapter 3:" and "2. " style prefixes before keyword matching
fn strip_numbering(lower: &str) -> String {
    static CHAPTER_PREFIX: OnceLock<regex::Regex> = OnceLock::new();
    static NUMBER_PREFIX: OnceLock<regex::Regex> = OnceLock::new();

    let chapter_prefix = CHAPTER_PREFIX.get_or_init(|| {
        regex::Regex::new(r"^(chapter|ch\.?)\s*\d+\s*[:\-.]?\s*").expect("pattern compiles")
    });
    let number_prefix =
        NUMBER_PREFIX.get_or_init(|| regex::Regex::new(r"^\d+\.\s*").expect("pattern compiles"));

    let stripped = chapter_prefix.replace(lower, "");
    number_prefix.replace(&stripped, "").into_owned()
}

fn chapter_number(lower: &str) -> Option<()> {
    static NUMBERED: OnceLock<regex::Regex> = OnceLock::new();
    static ABBREVIATED: OnceLock<regex::Regex> = OnceLock::new();

    let numbered =
        NUMBERED.get_or_init(|| regex::Regex::new(r"\bchapter\s+\d+").expect("pattern compiles"));
    let abbreviated = ABBREVIATED
        .get_or_init(|| regex::Regex::new(r"^ch\.?\s*\d+").expect("pattern compiles"));

    (numbered.is_match(lower) || abbreviated.is_match(lower)).then_some(())
}

fn part_divider(lower: &str, clean: &str) -> bool {
    static PART: OnceLock<regex::Regex> = OnceLock::new();
    static SECTION: OnceLock<regex::Regex> = OnceLock::new();

    let part =
        PART.get_or_init(|| regex::Regex::new(r"part\s+[ivx\d]+").expect("pattern compiles"));
    let section =
        SECTION.get_or_init(|| regex::Regex::new(r"section\s+\d+").expect("pattern compiles"));

    part.is_match(lower)
        || section.is_match(lower)
        || matches!(
            clean,
            "part one" | "part two" | "part three" | "part four" | "part five"
        )
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

/// One table-of-contents entry resolved to an archive path
#[derive(Debug, Clone)]
pub struct TocEntry {
    pub title: String,
    pub path: String,
    pub kind: ChapterKind,
}

/// A chapter that survived filtering, ready for analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedChapter {
    pub canonical_name: String,
    pub title: String,
    pub content: String,
    pub kind: ChapterKind,
    pub character_count: usize,
    /// SHA-256 of the converted markdown, for change detection
    pub content_hash: String,
}

/// A table-of-contents item the filters rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedChapter {
    pub title: String,
    pub kind: ChapterKind,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedBook {
    pub metadata: BookMetadata,
    pub chapters: Vec<ExtractedChapter>,
    pub skipped: Vec<SkippedChapter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_numbered_chapters() {
        assert_eq!(ChapterKind::classify("Chapter 1: Focus"), ChapterKind::Chapter);
        assert_eq!(ChapterKind::classify("CHAPTER 12"), ChapterKind::Chapter);
        assert_eq!(ChapterKind::classify("Ch. 3 Depth"), ChapterKind::Chapter);
    }

    #[test]
    fn test_classify_front_and_back_matter() {
        assert_eq!(
            ChapterKind::classify("Introduction"),
            ChapterKind::Introduction
        );
        assert_eq!(ChapterKind::classify("Foreword"), ChapterKind::Foreword);
        assert_eq!(ChapterKind::classify("Prologue"), ChapterKind::Preface);
        assert_eq!(ChapterKind::classify("Afterword"), ChapterKind::Epilogue);
        assert_eq!(
            ChapterKind::classify("Acknowledgments"),
            ChapterKind::Acknowledgements
        );
        assert_eq!(
            ChapterKind::classify("About the Author"),
            ChapterKind::AboutAuthor
        );
        assert_eq!(
            ChapterKind::classify("Bibliography"),
            ChapterKind::Bibliography
        );
    }

    #[test]
    fn test_classify_navigation_labels() {
        assert_eq!(ChapterKind::classify("Table of Contents"), ChapterKind::Toc);
        assert_eq!(ChapterKind::classify("Cover"), ChapterKind::Cover);
        assert_eq!(ChapterKind::classify("Title Page"), ChapterKind::TitlePage);
        assert_eq!(ChapterKind::classify("Copyright"), ChapterKind::Copyright);
        assert_eq!(ChapterKind::classify("Part II"), ChapterKind::PartDivider);
    }

    #[test]
    fn test_classify_numbered_prefix_does_not_mask_keywords() {
        // "7. Epilogue" must be read as an epilogue, not a chapter
        assert_eq!(ChapterKind::classify("7. Epilogue"), ChapterKind::Epilogue);
        assert_eq!(
            ChapterKind::classify("Chapter 9: The Index"),
            ChapterKind::Chapter
        );
    }

    #[test]
    fn test_classify_unknown_is_other() {
        assert_eq!(
            ChapterKind::classify("The Subtle Power of Rest"),
            ChapterKind::Other
        );
    }

    #[test]
    fn test_filter_categories() {
        assert!(ChapterKind::Toc.is_excluded());
        assert!(ChapterKind::PartDivider.is_excluded());
        assert!(!ChapterKind::Chapter.is_excluded());

        assert!(ChapterKind::Glossary.is_back_matter());
        assert!(ChapterKind::AboutAuthor.is_back_matter());
        assert!(!ChapterKind::Epilogue.is_back_matter());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ChapterKind::AboutAuthor).unwrap();
        assert_eq!(json, "\"about_author\"");
    }
}
