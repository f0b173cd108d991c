//! Message chunking.
//!
//! Splits a message into prose and fenced-code drafts under a per-chunk
//! token budget. Prose paragraphs are greedily coalesced; oversized
//! paragraphs split at the last newline, sentence boundary, or space past
//! 40% of the character window, with a hard cut as the final fallback.
//! Code is split by whole lines and re-fenced; a single overlong line is
//! emitted intact rather than split mid-line.

use crate::types::ChunkKind;

/// Default per-chunk token budget
pub const DEFAULT_CHUNK_BUDGET: usize = 320;
/// Budgets below this are raised to it
pub const MIN_CHUNK_BUDGET: usize = 80;

/// A chunk produced by the segmenter, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// 0-based position within the message
    pub index: usize,
    pub kind: ChunkKind,
    pub content: String,
    /// Normalized lowercase language for code drafts
    pub language: Option<String>,
    pub token_estimate: usize,
}

/// Cheap token proxy: `max(word_count, ceil(char_count / 4))` on the
/// trimmed text. Conservative under both short-word and CJK inputs.
pub fn token_estimate(text: &str) -> usize {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    let words = trimmed.split_whitespace().count();
    let chars = trimmed.chars().count();
    words.max((chars + 3) / 4)
}

enum Segment {
    Prose(String),
    Code {
        language: Option<String>,
        body: String,
    },
}

/// Segment a message into chunk drafts. Output is empty iff the trimmed
/// content is empty.
pub fn chunk_message(content: &str, budget: usize) -> Vec<ChunkDraft> {
    let budget = budget.max(MIN_CHUNK_BUDGET);
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.trim().is_empty() {
        return vec![];
    }

    let mut drafts = Vec::new();
    for segment in split_segments(&normalized) {
        match segment {
            Segment::Prose(text) => chunk_prose(&text, budget, &mut drafts),
            Segment::Code { language, body } => chunk_code(&body, language, budget, &mut drafts),
        }
    }

    if drafts.is_empty() {
        drafts.push(ChunkDraft {
            index: 0,
            kind: ChunkKind::Prose,
            content: normalized.trim().to_string(),
            language: None,
            token_estimate: token_estimate(&normalized),
        });
    }

    for (index, draft) in drafts.iter_mut().enumerate() {
        draft.index = index;
    }
    drafts
}

/// Split into prose segments and fenced code blocks, in document order.
/// An unterminated fence runs to the end of the message.
fn split_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut prose_lines: Vec<&str> = Vec::new();
    let mut code_lines: Vec<&str> = Vec::new();
    let mut code_language: Option<String> = None;
    let mut in_code = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if !in_code && trimmed.starts_with("```") {
            if !prose_lines.is_empty() {
                segments.push(Segment::Prose(prose_lines.join("\n")));
                prose_lines.clear();
            }
            let language = trimmed.trim_start_matches('`').trim().to_lowercase();
            code_language = if language.is_empty() {
                None
            } else {
                Some(language)
            };
            in_code = true;
        } else if in_code && trimmed.starts_with("```") {
            segments.push(Segment::Code {
                language: code_language.take(),
                body: code_lines.join("\n"),
            });
            code_lines.clear();
            in_code = false;
        } else if in_code {
            code_lines.push(line);
        } else {
            prose_lines.push(line);
        }
    }

    if in_code {
        segments.push(Segment::Code {
            language: code_language,
            body: code_lines.join("\n"),
        });
    } else if !prose_lines.is_empty() {
        segments.push(Segment::Prose(prose_lines.join("\n")));
    }

    segments
}

fn push_prose(drafts: &mut Vec<ChunkDraft>, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    drafts.push(ChunkDraft {
        index: 0,
        kind: ChunkKind::Prose,
        content: trimmed.to_string(),
        language: None,
        token_estimate: token_estimate(trimmed),
    });
}

fn chunk_prose(text: &str, budget: usize, drafts: &mut Vec<ChunkDraft>) {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut buffer = String::new();
    for paragraph in paragraphs {
        let candidate = if buffer.is_empty() {
            paragraph.to_string()
        } else {
            format!("{}\n\n{}", buffer, paragraph)
        };

        if token_estimate(&candidate) <= budget {
            buffer = candidate;
            continue;
        }

        if !buffer.is_empty() {
            push_prose(drafts, &buffer);
            buffer.clear();
        }

        if token_estimate(paragraph) <= budget {
            buffer = paragraph.to_string();
        } else {
            for piece in split_long_paragraph(paragraph, budget) {
                push_prose(drafts, &piece);
            }
        }
    }

    if !buffer.is_empty() {
        push_prose(drafts, &buffer);
    }
}

/// Split an oversized paragraph into budget-sized pieces. Each cut looks
/// for the last newline, then the last `". "`, then the last space past
/// 40% of the window; a window with no such boundary is cut exactly.
fn split_long_paragraph(paragraph: &str, budget: usize) -> Vec<String> {
    let max_chars = budget * 4;
    let mut pieces = Vec::new();
    let mut rest = paragraph.trim();

    while token_estimate(rest) > budget {
        let window = take_window(rest, budget, max_chars);
        let floor = (window.chars().count() * 2) / 5;
        let cut = find_cut(window, floor).unwrap_or_else(|| window.len());

        let (head, tail) = rest.split_at(cut.max(1));
        pieces.push(head.trim().to_string());
        rest = tail.trim_start();
        if rest.is_empty() {
            break;
        }
    }

    if !rest.trim().is_empty() {
        pieces.push(rest.trim().to_string());
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// The window a cut may land in: at most `max_chars` characters and at
/// most `budget` words, ending on a char boundary.
fn take_window(text: &str, budget: usize, max_chars: usize) -> &str {
    let mut end = text.len();

    if let Some((byte_idx, _)) = text.char_indices().nth(max_chars) {
        end = byte_idx;
    }

    let mut words = 0;
    let mut in_word = false;
    for (byte_idx, c) in text.char_indices() {
        if byte_idx >= end {
            break;
        }
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            words += 1;
            if words > budget {
                end = byte_idx;
                break;
            }
        }
    }

    &text[..end]
}

/// Find the best split position inside the window: last newline, then last
/// `". "`, then last space, each at or past `floor` characters.
fn find_cut(window: &str, floor_chars: usize) -> Option<usize> {
    let floor_byte = window
        .char_indices()
        .nth(floor_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    if let Some(pos) = window.rfind('\n').filter(|&p| p >= floor_byte) {
        return Some(pos + 1);
    }
    if let Some(pos) = window.rfind(". ").filter(|&p| p >= floor_byte) {
        return Some(pos + 1);
    }
    if let Some(pos) = window.rfind(' ').filter(|&p| p >= floor_byte) {
        return Some(pos + 1);
    }
    None
}

fn fence(language: Option<&str>, body: &str) -> String {
    format!("```{}\n{}\n```", language.unwrap_or(""), body)
}

fn push_code(drafts: &mut Vec<ChunkDraft>, language: Option<&String>, body: &str) {
    let content = fence(language.map(String::as_str), body);
    drafts.push(ChunkDraft {
        index: 0,
        kind: ChunkKind::Code,
        token_estimate: token_estimate(&content),
        content,
        language: language.cloned(),
    });
}

fn chunk_code(body: &str, language: Option<String>, budget: usize, drafts: &mut Vec<ChunkDraft>) {
    if body.trim().is_empty() {
        return;
    }

    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line_alone = fence(language.as_deref(), line);
        if token_estimate(&line_alone) > budget {
            // Exceeding the budget beats splitting code mid-line
            if !current.is_empty() {
                push_code(drafts, language.as_ref(), &current.join("\n"));
                current.clear();
            }
            push_code(drafts, language.as_ref(), line);
            continue;
        }

        let mut candidate = current.clone();
        candidate.push(line);
        if token_estimate(&fence(language.as_deref(), &candidate.join("\n"))) > budget
            && !current.is_empty()
        {
            push_code(drafts, language.as_ref(), &current.join("\n"));
            current = vec![line];
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        push_code(drafts, language.as_ref(), &current.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimate() {
        assert_eq!(token_estimate(""), 0);
        assert_eq!(token_estimate("   "), 0);
        assert_eq!(token_estimate("one two three"), 4); // 13 chars / 4 = 4 > 3 words
        assert_eq!(token_estimate("ab"), 1);
        // Word count dominates for runs of short words
        assert_eq!(token_estimate("a b c d e f g h"), 8);
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        assert!(chunk_message("", 320).is_empty());
        assert!(chunk_message("   \n\n  ", 320).is_empty());
    }

    #[test]
    fn test_short_message_single_chunk() {
        let drafts = chunk_message("How do I implement async file reads?", 320);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, ChunkKind::Prose);
        assert_eq!(drafts[0].index, 0);
        assert_eq!(drafts[0].content, "How do I implement async file reads?");
    }

    #[test]
    fn test_prose_and_code_split() {
        let content = "Use an async runtime for this.\n\n```typescript\nasync function readFile(path: string) {\n  return fs.promises.readFile(path);\n}\n```\n\nThat avoids blocking the event loop.";
        let drafts = chunk_message(content, 320);

        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].kind, ChunkKind::Prose);
        assert_eq!(drafts[1].kind, ChunkKind::Code);
        assert_eq!(drafts[1].language.as_deref(), Some("typescript"));
        assert!(drafts[1].content.starts_with("```typescript\n"));
        assert!(drafts[1].content.ends_with("\n```"));
        assert_eq!(drafts[2].kind, ChunkKind::Prose);

        // Indices are a gap-free 0-based sequence
        for (i, draft) in drafts.iter().enumerate() {
            assert_eq!(draft.index, i);
        }
    }

    #[test]
    fn test_language_normalized_lowercase() {
        let drafts = chunk_message("```Rust\nfn main() {}\n```", 320);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_unterminated_fence_treated_as_code() {
        let drafts = chunk_message("intro\n\n```python\nprint('hi')", 320);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].kind, ChunkKind::Code);
        assert!(drafts[1].content.contains("print('hi')"));
    }

    #[test]
    fn test_paragraph_coalescing_respects_budget() {
        // Paragraphs of ~30 tokens each against a budget of 80
        let paragraph = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor incididunt ut labore et dolore magna aliqua".to_string();
        let content = vec![paragraph; 6].join("\n\n");
        let drafts = chunk_message(&content, 80);

        assert!(drafts.len() > 1);
        for draft in &drafts {
            assert!(
                draft.token_estimate <= 80,
                "chunk over budget: {}",
                draft.token_estimate
            );
        }
    }

    #[test]
    fn test_oversized_paragraph_splits_at_sentence() {
        let sentence = "The quick brown fox jumps over the lazy dog near the river bank today. ";
        let paragraph = sentence.repeat(30);
        let drafts = chunk_message(&paragraph, 80);

        assert!(drafts.len() > 1);
        for draft in &drafts {
            assert_eq!(draft.kind, ChunkKind::Prose);
            assert!(draft.token_estimate <= 80);
        }
        // No words are lost or torn apart
        let original: Vec<&str> = paragraph.split_whitespace().collect();
        let rejoined = drafts
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let reassembled: Vec<&str> = rejoined.split_whitespace().collect();
        assert_eq!(original, reassembled);
    }

    #[test]
    fn test_unsplittable_run_hard_cut() {
        let blob = "x".repeat(2000);
        let drafts = chunk_message(&blob, 80);
        assert!(drafts.len() > 1);
        for draft in &drafts {
            assert!(draft.token_estimate <= 80);
        }
        let total: usize = drafts.iter().map(|d| d.content.chars().count()).sum();
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_code_split_by_lines() {
        let line = "let value = compute_something(input, options, flags);";
        let body = vec![line; 40].join("\n");
        let content = format!("```rust\n{}\n```", body);
        let drafts = chunk_message(&content, 80);

        assert!(drafts.len() > 1);
        for draft in &drafts {
            assert_eq!(draft.kind, ChunkKind::Code);
            assert!(draft.content.starts_with("```rust\n"));
            assert!(draft.content.ends_with("\n```"));
        }
        // Every source line survives exactly once
        let mut seen = 0;
        for draft in &drafts {
            seen += draft.content.matches(line).count();
        }
        assert_eq!(seen, 40);
    }

    #[test]
    fn test_overlong_code_line_kept_whole() {
        let long_line = format!("const DATA = \"{}\";", "a".repeat(600));
        let content = format!("```js\nshort();\n{}\nafter();\n```", long_line);
        let drafts = chunk_message(&content, 80);

        let holder = drafts
            .iter()
            .find(|d| d.content.contains(&long_line))
            .expect("long line emitted");
        assert_eq!(holder.kind, ChunkKind::Code);
        // The one documented exception to the token bound
        assert!(holder.token_estimate > 80);
    }

    #[test]
    fn test_crlf_normalized() {
        let drafts = chunk_message("alpha\r\n\r\nbeta", 320);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, "alpha\n\nbeta");
    }
}
