//! Structure-aware text chunking.
//!
//! Documents are split on markdown header boundaries first, keeping a
//! breadcrumb of enclosing section titles. Within a section, paragraphs are
//! packed into a character budget; a paragraph that alone exceeds the budget
//! is split with a sliding window that carries `overlap` characters from the
//! end of the previous chunk, trimmed to the nearest word boundary.

/// An ordered segment of a document. `text` is always the exact source slice
/// `&doc[start_offset..end_offset]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub ordinal: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Header breadcrumb such as `"Guide > Installation"`. Empty for text
    /// before the first heading.
    pub section_path: String,
}

struct Section {
    breadcrumb: String,
    /// Byte span of the section body within the document.
    start: usize,
    end: usize,
}

/// Parse a markdown heading line, returning `(level, title)`.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    Some((hashes, rest.trim()))
}

/// The document's display title: first H1, if any.
pub fn extract_title(text: &str) -> Option<String> {
    for line in text.lines() {
        if let Some((1, title)) = parse_heading(line) {
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    None
}

/// Split a document into sections at heading boundaries, tracking the
/// breadcrumb of enclosing headings.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut crumb_stack: Vec<(usize, String)> = Vec::new();
    let mut body_start = 0usize;
    let mut offset = 0usize;

    let mut close_section = |stack: &[(usize, String)], start: usize, end: usize| {
        if end > start {
            let breadcrumb = stack
                .iter()
                .map(|(_, t)| t.as_str())
                .collect::<Vec<_>>()
                .join(" > ");
            sections.push(Section {
                breadcrumb,
                start,
                end,
            });
        }
    };

    for line in text.split_inclusive('\n') {
        if let Some((level, title)) = parse_heading(line) {
            close_section(&crumb_stack, body_start, offset);
            while crumb_stack.last().is_some_and(|(l, _)| *l >= level) {
                crumb_stack.pop();
            }
            crumb_stack.push((level, title.to_string()));
            body_start = offset + line.len();
        }
        offset += line.len();
    }
    close_section(&crumb_stack, body_start, text.len());

    sections
}

/// Byte spans of non-empty paragraphs within `doc[start..end]`, trimmed of
/// surrounding whitespace.
fn paragraph_spans(doc: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let body = &doc[start..end];
    let mut raw = Vec::new();
    let mut para_start = 0usize;
    for (idx, _) in body.match_indices("\n\n") {
        if idx >= para_start {
            raw.push((para_start, idx));
        }
        para_start = idx + 2;
    }
    raw.push((para_start, body.len()));

    let mut spans = Vec::new();
    for (a, b) in raw {
        let s = &body[a..b];
        let trimmed = s.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lead = s.len() - s.trim_start().len();
        let abs_start = start + a + lead;
        spans.push((abs_start, abs_start + trimmed.len()));
    }
    spans
}

/// Split one oversized paragraph with a sliding window.
///
/// Windows are `budget` characters wide; each subsequent window re-reads
/// `overlap` characters from the end of the previous one, advanced to the
/// next word boundary so no chunk starts mid-word.
fn window_spans(
    doc: &str,
    span: (usize, usize),
    budget: usize,
    overlap: usize,
) -> Vec<(usize, usize)> {
    let slice = &doc[span.0..span.1];
    let chars: Vec<(usize, char)> = slice.char_indices().collect();
    let n = chars.len();
    let byte_at = |i: usize| -> usize {
        if i < n { span.0 + chars[i].0 } else { span.1 }
    };

    let mut spans = Vec::new();
    let mut win_start = 0usize;

    while n - win_start > budget {
        // Search backwards from the budget edge for a whitespace cut,
        // giving up at half a window
        let mut cut = win_start + budget;
        for i in ((win_start + budget / 2)..=(win_start + budget)).rev() {
            if chars[i].1.is_whitespace() {
                cut = i;
                break;
            }
        }
        if cut <= win_start {
            cut = win_start + budget;
        }
        spans.push((byte_at(win_start), byte_at(cut)));

        let mut next = cut.saturating_sub(overlap);
        // Trim the carried overlap to the nearest word boundary
        while next > win_start && next < n && !chars[next - 1].1.is_whitespace() {
            next += 1;
        }
        while next < n && chars[next].1.is_whitespace() {
            next += 1;
        }
        if next <= win_start || next > cut {
            next = cut;
        }
        win_start = next;
    }

    if win_start < n {
        spans.push((byte_at(win_start), span.1));
    }

    spans
}

/// Split `text` into ordered chunks of at most `budget` characters.
pub fn chunk(text: &str, budget: usize, overlap: usize) -> Vec<Chunk> {
    debug_assert!(overlap < budget, "overlap must be smaller than budget");

    let mut chunks: Vec<Chunk> = Vec::new();

    let mut push = |chunks: &mut Vec<Chunk>, start: usize, end: usize, breadcrumb: &str| {
        let s = &text[start..end];
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return;
        }
        let lead = s.len() - s.trim_start().len();
        let abs_start = start + lead;
        chunks.push(Chunk {
            ordinal: chunks.len(),
            text: trimmed.to_string(),
            start_offset: abs_start,
            end_offset: abs_start + trimmed.len(),
            section_path: breadcrumb.to_string(),
        });
    };

    for section in split_sections(text) {
        let paragraphs = paragraph_spans(text, section.start, section.end);
        if paragraphs.is_empty() {
            continue;
        }

        // Current packed run of paragraphs, as a source span
        let mut pending: Option<(usize, usize)> = None;

        for para in paragraphs {
            let para_chars = text[para.0..para.1].chars().count();

            if para_chars > budget {
                if let Some((a, b)) = pending.take() {
                    push(&mut chunks, a, b, &section.breadcrumb);
                }
                for span in window_spans(text, para, budget, overlap) {
                    push(&mut chunks, span.0, span.1, &section.breadcrumb);
                }
                continue;
            }

            match pending {
                None => pending = Some(para),
                Some((a, b)) => {
                    let packed_chars = text[a..para.1].chars().count();
                    if packed_chars > budget {
                        push(&mut chunks, a, b, &section.breadcrumb);
                        pending = Some(para);
                    } else {
                        pending = Some((a, para.1));
                    }
                }
            }
        }

        if let Some((a, b)) = pending {
            push(&mut chunks, a, b, &section.breadcrumb);
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let text = "Paragraph one.\n\nParagraph two.";
        let chunks = chunk(text, 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert!(chunks[0].text.contains("Paragraph one."));
        assert!(chunks[0].text.contains("Paragraph two."));
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk("", 500, 50).is_empty());
        assert!(chunk("   \n\n  \n", 500, 50).is_empty());
    }

    #[test]
    fn test_section_breadcrumbs() {
        let text = "# Guide\n\nIntro text.\n\n## Installation\n\nRun the installer.\n\n## Usage\n\nStart the daemon.\n";
        let chunks = chunk(text, 500, 50);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].section_path, "Guide");
        assert_eq!(chunks[1].section_path, "Guide > Installation");
        assert_eq!(chunks[2].section_path, "Guide > Usage");
    }

    #[test]
    fn test_sibling_heading_replaces_breadcrumb_level() {
        let text = "# A\n\n## B\n\nb text\n\n## C\n\nc text\n\n# D\n\nd text\n";
        let chunks = chunk(text, 500, 50);
        let crumbs: Vec<&str> = chunks.iter().map(|c| c.section_path.as_str()).collect();
        assert_eq!(crumbs, vec!["A > B", "A > C", "D"]);
    }

    #[test]
    fn test_text_before_first_heading_has_empty_breadcrumb() {
        let text = "Preamble before any heading.\n\n# Body\n\nActual content.\n";
        let chunks = chunk(text, 500, 50);
        assert_eq!(chunks[0].section_path, "");
        assert_eq!(chunks[1].section_path, "Body");
    }

    #[test]
    fn test_empty_sections_skipped() {
        let text = "# One\n\n# Two\n\nOnly this section has content.\n";
        let chunks = chunk(text, 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_path, "Two");
    }

    #[test]
    fn test_paragraph_packing_respects_budget() {
        let para = "word ".repeat(30); // ~150 chars
        let text = format!(
            "{}\n\n{}\n\n{}\n\n{}",
            para.trim(),
            para.trim(),
            para.trim(),
            para.trim()
        );
        let chunks = chunk(&text, 320, 40);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(
                c.text.chars().count() <= 320,
                "chunk exceeds budget: {} chars",
                c.text.chars().count()
            );
        }
    }

    #[test]
    fn test_oversized_paragraph_sliding_window() {
        let para = "alpha beta gamma delta epsilon ".repeat(40); // ~1240 chars
        let chunks = chunk(para.trim(), 300, 60);
        assert!(chunks.len() >= 4);

        for c in &chunks {
            assert!(c.text.chars().count() <= 300);
            // No chunk starts mid-word
            assert!(!c.text.starts_with(char::is_whitespace));
        }
        // Consecutive windows overlap in the source
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn test_chunk_text_matches_source_span() {
        let text = "# T\n\nFirst paragraph here.\n\nSecond paragraph here.\n";
        for c in chunk(text, 30, 5) {
            assert_eq!(c.text, &text[c.start_offset..c.end_offset]);
        }
    }

    #[test]
    fn test_ordinals_are_sequential() {
        let para = "content ".repeat(60);
        let text = format!("# A\n\n{para}\n\n# B\n\n{para}");
        let chunks = chunk(&text, 200, 40);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
        }
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("# My Document\n\nBody.").as_deref(),
            Some("My Document")
        );
        assert_eq!(extract_title("## Only Subheading\n\nBody."), None);
        assert_eq!(extract_title("no headings at all"), None);
    }
}
