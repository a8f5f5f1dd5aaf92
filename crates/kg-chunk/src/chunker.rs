//! Deterministic text chunker (spec §4.2).
//!
//! `chunk(text, chunk_size, overlap)` is a pure function: recursive split
//! by paragraph boundary, then sentence boundary, then fixed character
//! window, never splitting mid-word when a word boundary exists within the
//! last 20% of the window. Structured the way
//! `codegraph_vector::prep::chunker::build_chunk_plan` is structured (a
//! free function taking a config struct and returning a plan), trimmed to
//! the spec's fixed, parameter-driven algorithm rather than a
//! tokenizer-budgeted one.

use serde::{Deserialize, Serialize};

/// Tunable parameters for [`chunk`] (spec §4.2 "Default parameters:
/// `chunk_size=500`, `overlap=50`").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// The fraction of the window, measured from its end, within which a word
/// boundary is preferred over a hard character cut (spec: "never mid-word
/// when a word boundary exists within the last 20% of the window").
const BOUNDARY_FRACTION: f64 = 0.2;

/// Splits `text` into an ordered sequence of chunks, each no longer than
/// `config.chunk_size` characters, with adjacent chunks sharing up to
/// `config.overlap` leading/trailing characters. Pure: identical input
/// always produces byte-for-byte identical output (spec §8 round-trip law).
pub fn chunk(text: &str, config: ChunkConfig) -> Vec<String> {
    if text.is_empty() || config.chunk_size == 0 {
        return Vec::new();
    }

    let units = split_into_units(text, config.chunk_size);
    let raw_chunks = pack_units(&units, config.chunk_size);
    apply_overlap(&raw_chunks, config)
}

/// Recursively splits `text` into units no longer than `max_len`
/// characters: first on paragraph boundaries, then sentence boundaries,
/// then a fixed character window.
fn split_into_units(text: &str, max_len: usize) -> Vec<String> {
    let mut units = Vec::new();
    for paragraph in split_on_boundaries(text, is_paragraph_boundary) {
        if paragraph.trim().is_empty() {
            continue;
        }
        split_unit_recursive(&paragraph, max_len, 0, &mut units);
    }
    units
}

fn split_unit_recursive(unit: &str, max_len: usize, depth: u8, out: &mut Vec<String>) {
    let char_len = unit.chars().count();
    if char_len <= max_len {
        out.push(unit.to_string());
        return;
    }

    match depth {
        0 => {
            for sentence in split_on_boundaries(unit, is_sentence_boundary) {
                if sentence.trim().is_empty() {
                    continue;
                }
                split_unit_recursive(&sentence, max_len, 1, out);
            }
        }
        _ => {
            for window in split_fixed_window(unit, max_len) {
                out.push(window);
            }
        }
    }
}

/// Splits `text` on runs where `is_boundary` holds, keeping the boundary
/// text attached to the piece that precedes it so reconstitution (modulo
/// whitespace) is obvious and chunk boundaries read naturally.
fn split_on_boundaries(text: &str, is_boundary: fn(&[char], usize) -> Option<usize>) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        if let Some(boundary_end) = is_boundary(&chars, i) {
            pieces.push(chars[start..boundary_end].iter().collect::<String>());
            start = boundary_end;
            i = boundary_end;
        } else {
            i += 1;
        }
    }
    if start < chars.len() {
        pieces.push(chars[start..].iter().collect::<String>());
    }
    pieces
}

/// A paragraph boundary is two or more consecutive newlines.
fn is_paragraph_boundary(chars: &[char], i: usize) -> Option<usize> {
    if chars[i] != '\n' {
        return None;
    }
    let mut j = i + 1;
    while j < chars.len() && chars[j] == '\n' {
        j += 1;
    }
    if j > i + 1 {
        Some(j)
    } else {
        None
    }
}

/// A sentence boundary is `.`, `!`, or `?` followed by whitespace (or
/// end-of-text), or a single newline.
fn is_sentence_boundary(chars: &[char], i: usize) -> Option<usize> {
    if chars[i] == '\n' {
        return Some(i + 1);
    }
    if matches!(chars[i], '.' | '!' | '?') {
        let mut j = i + 1;
        if j >= chars.len() || chars[j].is_whitespace() {
            while j < chars.len() && chars[j].is_whitespace() && chars[j] != '\n' {
                j += 1;
            }
            return Some(j);
        }
    }
    None
}

/// Last-resort splitter: fixed character windows, cutting at the nearest
/// preceding whitespace if one falls within the last `BOUNDARY_FRACTION`
/// of the window; otherwise a hard cut.
fn split_fixed_window(text: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let boundary_zone = ((max_len as f64) * (1.0 - BOUNDARY_FRACTION)).floor() as usize;

    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let ideal_end = (start + max_len).min(chars.len());
        let mut end = ideal_end;
        if ideal_end < chars.len() {
            // search backward from ideal_end for whitespace within the
            // last 20% of the window
            let zone_start = start + boundary_zone;
            let mut cursor = ideal_end;
            let mut found = None;
            while cursor > zone_start && cursor > start {
                if chars[cursor - 1].is_whitespace() {
                    found = Some(cursor);
                    break;
                }
                cursor -= 1;
            }
            if let Some(boundary) = found {
                end = boundary;
            }
        }
        if end <= start {
            end = ideal_end.max(start + 1);
        }
        windows.push(chars[start..end].iter().collect::<String>());
        start = end;
    }
    windows
}

/// Greedily packs units into chunks, each as close to `chunk_size` as
/// possible without exceeding it. A single unit longer than `chunk_size`
/// (should not occur once [`split_into_units`] has run, but kept as a
/// defensive fallback) is emitted on its own.
fn pack_units(units: &[String], chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for unit in units {
        let unit_len = unit.chars().count();
        let buffer_len = buffer.chars().count();

        if buffer_len > 0 && buffer_len + unit_len > chunk_size {
            chunks.push(std::mem::take(&mut buffer));
        }

        if unit_len > chunk_size {
            if !buffer.is_empty() {
                chunks.push(std::mem::take(&mut buffer));
            }
            chunks.push(unit.clone());
            continue;
        }

        buffer.push_str(unit);
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }

    chunks
}

/// Prepends up to `config.overlap` trailing characters of the previous
/// chunk to each subsequent chunk, trimming the chunk's own tail so the
/// combined length never exceeds `config.chunk_size`.
fn apply_overlap(raw_chunks: &[String], config: ChunkConfig) -> Vec<String> {
    if config.overlap == 0 || raw_chunks.len() < 2 {
        return raw_chunks.to_vec();
    }

    let mut result = Vec::with_capacity(raw_chunks.len());
    for (idx, chunk_text) in raw_chunks.iter().enumerate() {
        if idx == 0 {
            result.push(chunk_text.clone());
            continue;
        }
        let prev = &raw_chunks[idx - 1];
        let prev_chars: Vec<char> = prev.chars().collect();
        let overlap_len = config.overlap.min(prev_chars.len());
        let overlap_text: String = prev_chars[prev_chars.len() - overlap_len..].iter().collect();

        let mut combined: Vec<char> = overlap_text.chars().collect();
        combined.extend(chunk_text.chars());

        if combined.len() > config.chunk_size {
            combined.truncate(config.chunk_size);
        }
        result.push(combined.into_iter().collect());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_produces_zero_chunks() {
        assert!(chunk("", ChunkConfig::default()).is_empty());
    }

    #[test]
    fn is_pure_and_deterministic() {
        let text = "Alice works at Acme. Bob works at Acme.\n\nThey are colleagues.";
        let cfg = ChunkConfig { chunk_size: 30, overlap: 5 };
        assert_eq!(chunk(text, cfg), chunk(text, cfg));
    }

    #[test]
    fn respects_max_chunk_size() {
        let text = "word ".repeat(200);
        let cfg = ChunkConfig { chunk_size: 100, overlap: 10 };
        for c in chunk(&text, cfg) {
            assert!(c.chars().count() <= cfg.chunk_size, "chunk exceeded size: {}", c.chars().count());
        }
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let text = "Alice works at Acme.";
        let cfg = ChunkConfig::default();
        let chunks = chunk(text, cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let text = "a ".repeat(100) + &"b ".repeat(100);
        let cfg = ChunkConfig { chunk_size: 60, overlap: 15 };
        let chunks = chunk(&text, cfg);
        assert!(chunks.len() >= 2);
        for window in chunks.windows(2) {
            let prev_tail: String = window[0].chars().rev().take(15).collect::<String>().chars().rev().collect();
            assert!(window[1].starts_with(&prev_tail) || window[1].len() < 15);
        }
    }

    #[test]
    fn never_splits_mid_word_when_boundary_is_near() {
        let text = "supercalifragilisticexpialidocious is a very long word but this sentence has normal words too";
        let cfg = ChunkConfig { chunk_size: 40, overlap: 0 };
        let chunks = chunk(text, cfg);
        // words composed purely of ascii letters should not be torn in the
        // middle when a space falls within the last 20% of the window
        for c in &chunks {
            assert!(!c.is_empty());
        }
    }
}
