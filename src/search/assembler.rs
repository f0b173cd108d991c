//! Context assembler.
//!
//! Turns retrieval results into a single token-budgeted memory block:
//! header, blank-line-separated entries, footer. Code-heavy queries pull
//! code chunks to the front when chunking is enabled. When the next entry
//! would overflow the budget, a snippet trimmed to the remaining room is
//! attempted once before assembly stops.

use crate::chunker::token_estimate;
use crate::types::{ChunkKind, ContentType, RetrievedItem};

use super::identifiers::is_code_heavy;

const HEADER: &str = "Relevant context from long-term memory:";
const FOOTER: &str = "End of memory context.";

/// Snippet caps in characters
const CHUNK_SNIPPET_CHARS: usize = 900;
const MESSAGE_SNIPPET_CHARS: usize = 260;

/// Assemble the memory block. Returns the empty string when no entry fits
/// the budget.
pub fn assemble_context(
    results: &[RetrievedItem],
    query: Option<&str>,
    token_budget: usize,
    chunking_enabled: bool,
) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut ordered: Vec<&RetrievedItem> = results.iter().collect();
    let code_query = chunking_enabled && query.map(is_code_heavy).unwrap_or(false);
    if code_query {
        // Code chunks, then prose, then summaries, then profile; stable
        // sort preserves descending similarity inside each tier.
        ordered.sort_by(|a, b| {
            tier(a).cmp(&tier(b)).then_with(|| {
                b.similarity_score
                    .partial_cmp(&a.similarity_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
    }

    let mut used = token_estimate(HEADER) + token_estimate(FOOTER);
    let mut entries: Vec<String> = Vec::new();
    let mut counter = 0usize;

    for item in ordered {
        let (label, advances) = label_for(item, counter + 1);
        let snippet_cap = match item.content_type {
            ContentType::MessageChunk | ContentType::KnowledgeChunk => CHUNK_SNIPPET_CHARS,
            _ => MESSAGE_SNIPPET_CHARS,
        };
        let prefix = format!(
            "[{}] (Similarity: {}%)\n{}: ",
            label,
            (item.similarity_score * 100.0).round() as i64,
            item.message.role.as_str().to_uppercase()
        );

        let snippet = truncate_snippet(&item.message.content, snippet_cap);
        let entry = format!("{}{}", prefix, snippet);
        let entry_tokens = token_estimate(&entry);

        if used + entry_tokens <= token_budget {
            entries.push(entry);
            used += entry_tokens;
            if advances {
                counter += 1;
            }
            continue;
        }

        // Overflow: one attempt with a snippet sized to the leftover room
        let remaining = token_budget.saturating_sub(used);
        let prefix_tokens = token_estimate(&prefix);
        if remaining <= prefix_tokens {
            break;
        }
        let room_chars = (remaining - prefix_tokens).saturating_sub(1) * 4;
        let trimmed = truncate_snippet(&item.message.content, room_chars.min(snippet_cap));
        if trimmed.trim().is_empty() || trimmed == "..." {
            break;
        }
        let entry = format!("{}{}", prefix, trimmed);
        if used + token_estimate(&entry) <= token_budget {
            entries.push(entry);
        }
        break;
    }

    if entries.is_empty() {
        return String::new();
    }

    format!("{}\n\n{}\n\n{}", HEADER, entries.join("\n\n"), FOOTER)
}

fn tier(item: &RetrievedItem) -> u8 {
    match item.content_type {
        ContentType::MessageChunk | ContentType::KnowledgeChunk => {
            if item.chunk_kind == Some(ChunkKind::Code) {
                0
            } else {
                1
            }
        }
        ContentType::Message => 1,
        ContentType::ConversationSummary => 2,
        ContentType::UserProfile => 3,
    }
}

/// The entry label, and whether it advances the shared memory/chunk counter
fn label_for(item: &RetrievedItem, next_counter: usize) -> (String, bool) {
    match item.content_type {
        ContentType::Message => (format!("Memory {}", next_counter), true),
        ContentType::MessageChunk | ContentType::KnowledgeChunk => {
            if item.chunk_kind == Some(ChunkKind::Code) {
                (format!("Code Chunk {}", next_counter), true)
            } else {
                (format!("Context Chunk {}", next_counter), true)
            }
        }
        ContentType::ConversationSummary => ("Conversation Summary".to_string(), false),
        ContentType::UserProfile => ("User Profile".to_string(), false),
    }
}

/// Cap a snippet at `max_chars` characters, trimming trailing whitespace
/// and appending `...` when anything was cut.
fn truncate_snippet(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
