//! Paragraph-boundary text splitter for the ingestion engine.
//!
//! [`clean_text`] normalizes whitespace first (line endings, intra-line
//! space runs, blank-line runs); [`split_chunks`] then accumulates
//! paragraphs into chunks no longer than `max_chars`, hard-splitting
//! oversized paragraphs at the last newline or space before the boundary.
//! Ordinals are assigned by the caller from split order.

/// Normalize extracted text before splitting: unify line endings, collapse
/// space/tab runs within a line to one space, collapse blank-line runs to a
/// single blank line, and trim the ends.
pub fn clean_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out_lines: Vec<String> = Vec::new();
    let mut pending_blank = false;
    for line in unified.split('\n') {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !out_lines.is_empty() {
                pending_blank = true;
            }
        } else {
            if pending_blank {
                out_lines.push(String::new());
                pending_blank = false;
            }
            out_lines.push(collapsed);
        }
    }
    out_lines.join("\n")
}

/// Split cleaned text into ordered chunk texts.
///
/// Paragraphs (blank-line separated) accumulate until adding the next one
/// would exceed `max_chars`. A single paragraph longer than `max_chars` is
/// hard-split at the last newline or space before the boundary when one
/// exists. A trailing chunk shorter than `min_chars` is merged into the
/// previous chunk when the combined length still fits `max_chars`.
///
/// Empty input produces no chunks.
pub fn split_chunks(text: &str, max_chars: usize, min_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if trimmed.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            hard_split(trimmed, max_chars, &mut chunks);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    // Fold a short tail into its predecessor when the result still fits.
    if chunks.len() >= 2 {
        let last_len = chunks[chunks.len() - 1].len();
        let prev_len = chunks[chunks.len() - 2].len();
        if last_len < min_chars && prev_len + 2 + last_len <= max_chars {
            if let Some(last) = chunks.pop() {
                if let Some(prev) = chunks.last_mut() {
                    prev.push_str("\n\n");
                    prev.push_str(&last);
                }
            }
        }
    }

    chunks
}

/// Cut an oversized paragraph into pieces of at most `max_chars`,
/// preferring newline then space boundaries over mid-word cuts.
fn hard_split(para: &str, max_chars: usize, chunks: &mut Vec<String>) {
    let mut remaining = para;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            chunks.push(remaining.to_string());
            break;
        }
        let window_end = floor_char_boundary(remaining, max_chars);
        let window = &remaining[..window_end];
        let mut split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window_end);
        if split_at == 0 {
            // Oversized first char relative to max_chars; take one char.
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_collapses_blank_line_runs() {
        assert_eq!(clean_text("A\n\n\n\nB"), "A\n\nB");
        assert_eq!(clean_text("A\n\nB"), "A\n\nB");
    }

    #[test]
    fn test_clean_collapses_intra_line_spaces() {
        assert_eq!(clean_text("A   B\t\tC"), "A B C");
    }

    #[test]
    fn test_clean_trims_ends_and_line_endings() {
        assert_eq!(clean_text("\n\n  hello \r\n world \n\n"), "hello\nworld");
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_chunks("Hello, world!", 1000, 300);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Hello, world!");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_chunks("", 1000, 300).is_empty());
    }

    #[test]
    fn test_paragraphs_accumulate_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_chunks(text, 1000, 300);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_paragraphs_split_when_over_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = split_chunks(text, 30, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 30, "chunk over limit: {:?}", c);
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_split_at_word_boundary() {
        let words = vec!["alpha"; 60].join(" "); // 359 chars
        let chunks = split_chunks(&words, 100, 10);
        assert!(chunks.len() >= 4);
        for c in &chunks {
            assert!(c.len() <= 100);
            assert!(!c.starts_with(' ') && !c.ends_with(' '));
        }
        // No word was cut in half
        for c in &chunks {
            for w in c.split_whitespace() {
                assert_eq!(w, "alpha");
            }
        }
    }

    #[test]
    fn test_long_single_paragraph_splits_into_three() {
        let words = vec!["study"; 175].join(" "); // 1049 chars
        let chunks = split_chunks(&words, 500, 100);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_short_tail_merges_into_previous() {
        // Hard split of 250 solid chars leaves a 50-char piece; the 9-char
        // closing paragraph then folds into it.
        let text = format!("{}\n\ntail para", "x".repeat(250));
        let chunks = split_chunks(&text, 100, 50);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].contains("tail para"));
        assert!(chunks[2].starts_with('x'));
    }

    #[test]
    fn test_multibyte_text_never_panics() {
        let text = "é".repeat(400);
        let chunks = split_chunks(&text, 100, 10);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.len() <= 100);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = split_chunks(text, 12, 4);
        let b = split_chunks(text, 12, 4);
        assert_eq!(a, b);
    }
}
