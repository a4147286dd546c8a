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

use crate::analysis::types::Chunk;

/// Target size for paragraph groups when a document has no headings
const SECTION_TARGET_CHARS: usize = 2000;

/// Splits chapter text into token-budgeted chunks with section awareness
/// and sentence-snapped overlap between consecutive chunks.
pub struct TextChunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

/// A packable piece of the document: a whole section or a slice of an
/// oversized one.
struct SectionPiece {
    text: String,
    section_index: usize,
    label: String,
}

impl TextChunker {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        // Overlap must leave room for fresh content in every chunk
        let overlap_tokens = overlap_tokens.min(max_tokens / 2);
        Self {
            max_tokens: max_tokens.max(1),
            overlap_tokens,
        }
    }

    /// Rough token estimate: one token per four bytes of text
    pub fn estimate_tokens(text: &str) -> usize {
        text.len() / 4
    }

    /// Chunk a document. Empty or whitespace-only input yields no chunks.
    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sections = self.identify_sections(text);
        let pieces = self.split_oversized(sections);

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current = String::new();
        let mut span: Option<(usize, usize)> = None;
        let mut first_label = String::new();

        for piece in pieces {
            let separator = if current.is_empty() { 0 } else { 2 };
            let projected = current.len() + separator + piece.text.len();

            if !current.is_empty() && projected / 4 > self.max_tokens {
                let info = self.span_info(span, &first_label);
                let overlap = self.overlap_tail(&current);
                chunks.push(self.build_chunk(chunks.len() + 1, &current, info));

                current = overlap;
                span = None;
            }

            if span.is_none() {
                first_label = piece.label.clone();
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece.text);
            span = match span {
                None => Some((piece.section_index, piece.section_index)),
                Some((first, _)) => Some((first, piece.section_index)),
            };
        }

        if !current.trim().is_empty() {
            let info = self.span_info(span, &first_label);
            chunks.push(self.build_chunk(chunks.len() + 1, &current, info));
        }

        chunks
    }

    fn build_chunk(&self, number: usize, content: &str, section_info: String) -> Chunk {
        Chunk {
            number,
            token_estimate: Self::estimate_tokens(content),
            section_info,
            word_count: content.split_whitespace().count(),
            character_count: content.chars().count(),
            content: content.to_string(),
        }
    }

    fn span_info(&self, span: Option<(usize, usize)>, first_label: &str) -> String {
        match span {
            Some((first, last)) if first == last => first_label.to_string(),
            Some((first, last)) => format!("Sections {}-{}", first + 1, last + 1),
            None => String::new(),
        }
    }

    /// Split the document into sections: markdown headings when present,
    /// otherwise blank-line paragraphs grouped toward a target size.
    fn identify_sections(&self, text: &str) -> Vec<String> {
        let has_headings = text.lines().any(|l| Self::heading_level(l).is_some());

        if has_headings {
            let mut sections: Vec<String> = Vec::new();
            let mut current = String::new();
            for line in text.lines() {
                if Self::heading_level(line).is_some() && !current.trim().is_empty() {
                    sections.push(current.clone());
                    current.clear();
                }
                current.push_str(line);
                current.push('\n');
            }
            if !current.trim().is_empty() {
                sections.push(current);
            }
            sections
        } else {
            let mut sections: Vec<String> = Vec::new();
            let mut group = String::new();
            for paragraph in text.split("\n\n") {
                let paragraph = paragraph.trim();
                if paragraph.is_empty() {
                    continue;
                }
                if !group.is_empty() && group.len() + 2 + paragraph.len() > SECTION_TARGET_CHARS {
                    sections.push(group.clone());
                    group.clear();
                }
                if !group.is_empty() {
                    group.push_str("\n\n");
                }
                group.push_str(paragraph);
            }
            if !group.is_empty() {
                sections.push(group);
            }
            sections
        }
    }

    /// Detect a markdown heading line: 1-6 hashes followed by whitespace
    fn heading_level(line: &str) -> Option<usize> {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#') {
            return None;
        }
        let level = trimmed.chars().take_while(|&c| c == '#').count();
        if level == 0 || level > 6 {
            return None;
        }
        match trimmed.chars().nth(level) {
            Some(c) if c.is_whitespace() => Some(level),
            _ => None,
        }
    }

    /// Cut sections that alone exceed the packing budget into pieces that
    /// fit. Sentence splits first, word splits for pathological sentences.
    fn split_oversized(&self, sections: Vec<String>) -> Vec<SectionPiece> {
        // Leave headroom for the overlap seed so packed chunks stay in budget
        let budget_chars = (self.max_tokens - self.overlap_tokens).max(1) * 4;
        let mut pieces = Vec::new();

        for (index, section) in sections.into_iter().enumerate() {
            if section.len() <= budget_chars {
                pieces.push(SectionPiece {
                    text: section,
                    section_index: index,
                    label: format!("Section {}", index + 1),
                });
                continue;
            }

            let parts = self.split_by_sentences(&section, budget_chars);
            let total = parts.len();
            for (part_index, part) in parts.into_iter().enumerate() {
                pieces.push(SectionPiece {
                    text: part,
                    section_index: index,
                    label: format!("Section {} (part {}/{})", index + 1, part_index + 1, total),
                });
            }
        }

        pieces
    }

    fn split_by_sentences(&self, text: &str, budget_chars: usize) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();

        for sentence in split_sentences(text) {
            if sentence.len() > budget_chars {
                if !current.is_empty() {
                    parts.push(current.clone());
                    current.clear();
                }
                parts.extend(self.split_by_words(sentence, budget_chars));
                continue;
            }
            if !current.is_empty() && current.len() + 1 + sentence.len() > budget_chars {
                parts.push(current.clone());
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }

        if !current.is_empty() {
            parts.push(current);
        }
        parts
    }

    fn split_by_words(&self, sentence: &str, budget_chars: usize) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();

        for word in sentence.split_whitespace() {
            if word.len() > budget_chars {
                // No whitespace to cut on, fall back to raw byte windows
                if !current.is_empty() {
                    parts.push(current.clone());
                    current.clear();
                }
                let mut start = 0;
                while start < word.len() {
                    let end = floor_char_boundary(word, (start + budget_chars).min(word.len()));
                    let end = if end <= start {
                        ceil_char_boundary(word, start + 1)
                    } else {
                        end
                    };
                    parts.push(word[start..end].to_string());
                    start = end;
                }
                continue;
            }
            if !current.is_empty() && current.len() + 1 + word.len() > budget_chars {
                parts.push(current.clone());
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }

        if !current.is_empty() {
            parts.push(current);
        }
        parts
    }

    /// Tail of the previous chunk carried into the next one, snapped
    /// forward past any partial leading sentence.
    fn overlap_tail(&self, text: &str) -> String {
        let window = self.overlap_tokens * 4;
        if window == 0 {
            return String::new();
        }
        if text.len() <= window {
            return text.to_string();
        }

        let start = floor_char_boundary(text, text.len() - window);
        let tail = &text[start..];
        match first_sentence_start(tail) {
            Some(pos) if pos < tail.len() => tail[pos..].trim_start().to_string(),
            _ => tail.to_string(),
        }
    }
}

/// Iterate sentences: each ends after `.`, `!` or `?` followed by
/// whitespace. The final fragment is yielded even without a terminator.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let after = i + 1;
            if after < bytes.len() && bytes[after].is_ascii_whitespace() {
                let sentence = text[start..after].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = after;
            }
        }
        i += 1;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Byte offset just past the first complete sentence boundary, if any
fn first_sentence_start(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if matches!(bytes[i], b'.' | b'!' | b'?') && bytes[i + 1].is_ascii_whitespace() {
            return Some(i + 1);
        }
    }
    None
}

pub fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

pub fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
