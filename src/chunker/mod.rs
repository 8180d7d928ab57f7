//! Markdown → ordered chunk texts.
//!
//! No teacher source for this module survived the retrieval pack (the
//! `wg-ragsmith::semantic_chunking` module referenced by its `lib.rs` was
//! filtered out), so this is authored directly against the chunking rules,
//! in the idiom of `wg-ragsmith::ingestion::chunk` (plain functions, a
//! `#[cfg(test)]` module beneath).

const MIN_CHUNK_LEN: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_char_limit: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            chunk_char_limit: 4000,
            chunk_overlap: 200,
        }
    }
}

/// Splits `markdown` into chunk texts per the ordered rule set: heading
/// sections first, then paragraph packing with overlap inside oversized
/// sections, with code fences always kept whole.
pub fn chunk(markdown: &str, config: &ChunkerConfig) -> Vec<String> {
    let sections = split_on_headings(markdown);

    let mut chunks = Vec::new();
    for section in sections {
        if section.trim().is_empty() {
            continue;
        }
        if section.len() <= config.chunk_char_limit {
            push_if_long_enough(&mut chunks, section);
            continue;
        }
        for piece in pack_paragraphs(&section, config) {
            push_if_long_enough(&mut chunks, piece);
        }
    }
    chunks
}

fn push_if_long_enough(chunks: &mut Vec<String>, text: String) {
    if text.trim().len() >= MIN_CHUNK_LEN {
        chunks.push(text);
    }
}

/// Splits on lines that open a level 1-3 ATX heading (`#`, `##`, `###`, but
/// not `####`+). Content before the first heading is its own leading
/// section.
fn split_on_headings(markdown: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
        }

        if !in_fence && is_top_level_heading(line) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn is_top_level_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    for level in 1..=3 {
        let prefix = "#".repeat(level);
        if let Some(rest) = trimmed.strip_prefix(&prefix) {
            if rest.starts_with(' ') || rest.is_empty() {
                // Must not be a level-4+ heading (checked by absence of a
                // further leading '#').
                return !rest.starts_with('#');
            }
        }
    }
    false
}

fn is_fence_delimiter(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Greedily packs paragraphs (blank-line separated blocks) up to
/// `chunk_char_limit`, carrying a sentence/newline-terminated overlap of up
/// to `chunk_overlap` characters into the next chunk. A fenced code block is
/// always treated as one indivisible paragraph, even if it alone exceeds the
/// limit. A non-fence paragraph that alone exceeds the limit is hard-sliced
/// with character overlap so no single chunk grows unbounded.
fn pack_paragraphs(section: &str, config: &ChunkerConfig) -> Vec<String> {
    let paragraphs = split_into_paragraphs(section);

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        let is_fence = paragraph.trim_start().starts_with("```");

        if !is_fence && paragraph.len() > config.chunk_char_limit {
            if !current.trim().is_empty() {
                let overlap = take_overlap(&current, config.chunk_overlap);
                chunks.push(std::mem::take(&mut current));
                if !overlap.is_empty() {
                    current.push_str(&overlap);
                    current.push_str("\n\n");
                }
            }

            let mut pieces = hard_slice(&paragraph, config.chunk_char_limit, config.chunk_overlap);
            if let Some(last) = pieces.pop() {
                chunks.extend(pieces);
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(&last);
            }
            continue;
        }

        let would_be = if current.is_empty() {
            paragraph.len()
        } else {
            current.len() + 2 + paragraph.len()
        };

        if !current.is_empty() && would_be > config.chunk_char_limit {
            let overlap = take_overlap(&current, config.chunk_overlap);
            chunks.push(std::mem::take(&mut current));
            if !overlap.is_empty() {
                current.push_str(&overlap);
                current.push_str("\n\n");
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Hard-splits a single oversized paragraph into `limit`-sized character
/// slices, each carrying up to `overlap` characters of the previous slice.
fn hard_slice(paragraph: &str, limit: usize, overlap: usize) -> Vec<String> {
    let limit = limit.max(1);
    let overlap = if overlap >= limit { 0 } else { overlap };
    let chars: Vec<char> = paragraph.chars().collect();

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + limit).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    pieces
}

fn split_into_paragraphs(section: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in section.lines() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            current.push_str(line);
            current.push('\n');
            if !in_fence {
                // Fence just closed: this whole block is one paragraph.
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }

        if !in_fence && line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            continue;
        }

        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// Takes up to `max_len` trailing characters of `text`, extended backward to
/// the nearest sentence end (`. `, `.\n`) or newline boundary so the overlap
/// does not begin mid-sentence.
fn take_overlap(text: &str, max_len: usize) -> String {
    if max_len == 0 || text.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(max_len);

    let mut boundary = start;
    for i in start..chars.len() {
        if chars[i] == '\n' || (chars[i] == '.' && chars.get(i + 1) == Some(&' ')) {
            boundary = (i + 1).min(chars.len());
        }
    }

    chars[boundary..].iter().collect::<String>().trim_start().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(limit: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            chunk_char_limit: limit,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn short_heading_section_is_one_chunk() {
        let md = "# Title\n\nShort body text here.\n";
        let chunks = chunk(md, &cfg(4000, 200));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Title"));
    }

    #[test]
    fn splits_on_multiple_headings() {
        let md = "# One\n\nbody one is plenty long to clear the minimum length threshold easily.\n\n# Two\n\nbody two is plenty long to clear the minimum length threshold easily.\n";
        let chunks = chunk(md, &cfg(4000, 200));
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn drops_short_chunks() {
        let md = "# X\n\nhi\n";
        let chunks = chunk(md, &cfg(4000, 200));
        assert!(chunks.is_empty());
    }

    #[test]
    fn exact_limit_is_single_chunk() {
        let body = "a".repeat(4000);
        let md = format!("# T\n\n{body}\n");
        let chunks = chunk(&md, &cfg(4000, 200));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn oversized_section_packs_paragraphs_with_overlap() {
        let paragraph = "Sentence one is here. Sentence two continues on. ".repeat(40);
        let md = format!("# Big\n\n{paragraph}\n\n{paragraph}\n\n{paragraph}\n");
        let chunks = chunk(&md, &cfg(1000, 100));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.trim().len() >= MIN_CHUNK_LEN);
        }
    }

    #[test]
    fn oversized_single_paragraph_is_hard_split() {
        let paragraph = "x".repeat(5000);
        let md = format!("# Solo\n\n{paragraph}\n");
        let chunks = chunk(&md, &cfg(1000, 100));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 1000);
        }
    }

    #[test]
    fn code_fence_never_split_even_if_over_limit() {
        let code = "```rust\n".to_string() + &"let x = 1;\n".repeat(100) + "```\n";
        let md = format!("# Code\n\nintro paragraph that is long enough to count on its own merits.\n\n{code}");
        let chunks = chunk(&md, &cfg(200, 50));
        let fence_chunk = chunks.iter().find(|c| c.contains("```")).expect("fence kept");
        assert!(fence_chunk.matches("```").count() == 2);
    }
}
