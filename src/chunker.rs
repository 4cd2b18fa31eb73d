/**
 * Chunker (C2)
 * Recursive, separator-hierarchical splitter. Splits cleaned text into
 * size-bounded, overlap-preserving chunks.
 */

use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;
use crate::error::DircResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkResult {
    pub text: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub num_chars: usize,
}

/// Split `text` into size-bounded chunks following the separator hierarchy
/// in `config.separators` (most semantic first). See spec.md §4.2.
pub fn chunk(text: &str, config: &ChunkingConfig) -> DircResult<Vec<ChunkResult>> {
    config.validate()?;
    if text.is_empty() {
        return Ok(vec![]);
    }
    let pieces = recursive_split(text, config, &config.separators);
    Ok(assign_offsets(text, pieces, config.chunk_overlap))
}

fn recursive_split(text: &str, config: &ChunkingConfig, separators: &[String]) -> Vec<String> {
    let text_len = text.chars().count();

    if text_len <= config.chunk_size {
        return if text_len >= config.min_chunk_size {
            vec![text.to_string()]
        } else {
            vec![]
        };
    }

    for (idx, separator) in separators.iter().enumerate() {
        if !text.contains(separator.as_str()) {
            continue;
        }

        let splits = split_by_separator(text, separator);
        let remaining_separators = &separators[idx + 1..];

        let mut temp_chunks: Vec<String> = Vec::new();
        let mut current_chunk: Vec<String> = Vec::new();
        let mut current_size = 0usize;

        for split in splits {
            let split_size = split.chars().count();

            if split_size > config.chunk_size {
                if !current_chunk.is_empty() {
                    temp_chunks.push(current_chunk.join(separator));
                    current_chunk.clear();
                    current_size = 0;
                }

                if !remaining_separators.is_empty() {
                    let sub_chunks = recursive_split(&split, config, remaining_separators);
                    temp_chunks.extend(sub_chunks);
                } else {
                    temp_chunks.extend(split_by_size(&split, config.chunk_size));
                }
                continue;
            }

            if !current_chunk.is_empty() && current_size + split_size > config.chunk_size {
                temp_chunks.push(current_chunk.join(separator));

                if config.chunk_overlap > 0 {
                    let last = current_chunk.last().unwrap().clone();
                    current_size = last.chars().count() + split_size;
                    current_chunk = vec![last, split];
                } else {
                    current_size = split_size;
                    current_chunk = vec![split];
                }
            } else {
                current_size += split_size;
                current_chunk.push(split);
            }
        }

        if !current_chunk.is_empty() {
            temp_chunks.push(current_chunk.join(separator));
        }

        let filtered: Vec<String> = temp_chunks
            .into_iter()
            .filter(|c| c.chars().count() >= config.min_chunk_size)
            .collect();

        if !filtered.is_empty() {
            return filtered;
        }
    }

    // Last resort: nothing in the hierarchy produced a usable split.
    split_by_size(text, config.chunk_size)
}

fn split_by_separator(text: &str, separator: &str) -> Vec<String> {
    text.split(separator)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn split_by_size(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|c| c.iter().collect::<String>())
        .filter(|s| !s.is_empty())
        .collect()
}

fn char_pos_to_byte(text: &str, char_pos: usize) -> usize {
    text.char_indices()
        .nth(char_pos)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Find `needle` in `text`, searching forward from char offset `from_char`.
/// Returns the match's start as a char offset.
fn find_from_char(text: &str, needle: &str, from_char: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let from_byte = char_pos_to_byte(text, from_char);
    if from_byte > text.len() {
        return None;
    }
    text[from_byte..].find(needle).map(|rel_byte| {
        let byte_pos = from_byte + rel_byte;
        text[..byte_pos].chars().count()
    })
}

fn assign_offsets(text: &str, pieces: Vec<String>, chunk_overlap: usize) -> Vec<ChunkResult> {
    let mut results = Vec::with_capacity(pieces.len());
    let mut search_from = 0usize;

    for (chunk_index, piece) in pieces.into_iter().enumerate() {
        let start_char = find_from_char(text, &piece, search_from).unwrap_or(search_from);
        let num_chars = piece.chars().count();
        let end_char = start_char + num_chars;

        search_from = end_char.saturating_sub(chunk_overlap);

        results.push(ChunkResult {
            text: piece,
            chunk_index,
            start_char,
            end_char,
            num_chars,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
            ..ChunkingConfig::default()
        }
    }

    #[test]
    fn short_text_becomes_one_chunk() {
        let cfg = cfg(1000, 200, 10);
        let chunks = chunk("short text above minimum", &cfg).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn text_below_minimum_is_dropped() {
        let cfg = cfg(1000, 200, 100);
        let chunks = chunk("too short", &cfg).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_index_is_dense() {
        let mut text = String::new();
        for i in 0..4 {
            text.push_str(&format!("\nDECRETO {}\n", i));
            text.push_str(&"lorem ipsum dolor sit amet consectetur ".repeat(20));
        }
        let cfg = cfg(300, 50, 50);
        let chunks = chunk(&text, &cfg).unwrap();
        assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn no_chunk_exceeds_configured_size() {
        let text = "palabra ".repeat(500);
        let cfg = cfg(200, 20, 10);
        let chunks = chunk(&text, &cfg).unwrap();
        for c in &chunks {
            assert!(c.num_chars <= cfg.chunk_size, "{} > {}", c.num_chars, cfg.chunk_size);
        }
    }

    #[test]
    fn splits_on_structural_separators_first() {
        let mut text = String::new();
        text.push_str(&"x".repeat(50));
        for i in 0..3 {
            text.push_str(&format!("\nDECRETO {}\n", i));
            text.push_str(&"y".repeat(400));
        }
        let cfg = cfg(500, 50, 10);
        let chunks = chunk(&text, &cfg).unwrap();
        assert!(chunks.iter().any(|c| c.text.contains("DECRETO")));
    }

    #[test]
    fn offsets_are_monotonic() {
        let text = "palabra ".repeat(500);
        let cfg = cfg(200, 20, 10);
        let chunks = chunk(&text, &cfg).unwrap();
        for w in chunks.windows(2) {
            assert!(w[1].start_char >= w[0].start_char);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let cfg = cfg(1000, 200, 100);
        assert!(chunk("", &cfg).unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = cfg(100, 100, 10);
        assert!(chunk("anything", &cfg).is_err());
    }
}
