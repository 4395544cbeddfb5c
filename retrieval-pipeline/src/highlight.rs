//! Locates the spans inside a chunk's searchable text that justify why it
//! matched a query: exact token matches, entity matches, and fuzzy
//! (Levenshtein) matches, merged into one non-overlapping span list.

use common::storage::types::chunk_metadata::ChunkEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HighlightKind {
    Fuzzy,
    Exact,
    Entity,
}

#[derive(Debug, Clone)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub kind: HighlightKind,
}

fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Non-overlapping, alphanumeric "words" of `text`, each with its byte span.
fn words(text: &str) -> Vec<(usize, usize, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            start.get_or_insert(idx);
        } else if let Some(s) = start.take() {
            out.push((s, idx, &text[s..idx]));
        }
    }
    if let Some(s) = start {
        out.push((s, text.len(), &text[s..]));
    }
    out
}

fn exact_matches(text: &str, tokens: &[String]) -> Vec<Highlight> {
    let lower = text.to_lowercase();
    let mut spans = Vec::new();
    for token in tokens {
        let mut search_from = 0;
        while let Some(pos) = lower[search_from..].find(token.as_str()) {
            let start = search_from + pos;
            let end = start + token.len();
            spans.push(Highlight {
                start,
                end,
                kind: HighlightKind::Exact,
            });
            search_from = end;
        }
    }
    spans
}

fn entity_matches(text: &str, entities: &[ChunkEntity]) -> Vec<Highlight> {
    entities
        .iter()
        .filter(|e| e.start < e.end && e.end <= text.len())
        .map(|e| Highlight {
            start: e.start,
            end: e.end,
            kind: HighlightKind::Entity,
        })
        .collect()
}

/// Levenshtein distance <= 2 between a query token and a word in `text`,
/// case-insensitive.
fn fuzzy_matches(text: &str, tokens: &[String]) -> Vec<Highlight> {
    let mut spans = Vec::new();
    for (start, end, word) in words(text) {
        let lower_word = word.to_lowercase();
        for token in tokens {
            if levenshtein::levenshtein(&lower_word, token) <= 2 {
                spans.push(Highlight {
                    start,
                    end,
                    kind: HighlightKind::Fuzzy,
                });
                break;
            }
        }
    }
    spans
}

/// Produces the merged, precedence-resolved highlight list for one chunk's
/// searchable text against a raw query string and its recognized entities.
pub fn generate(text: &str, query: &str, entities: &[ChunkEntity]) -> Vec<Highlight> {
    let tokens = tokenize_query(query);

    let mut all = Vec::new();
    all.extend(fuzzy_matches(text, &tokens));
    all.extend(exact_matches(text, &tokens));
    all.extend(entity_matches(text, entities));

    merge_overlapping(all)
}

/// Merges overlapping `(start, end)` spans, keeping the highest-precedence
/// kind (`entity > exact > fuzzy`) for each merged span.
fn merge_overlapping(mut spans: Vec<Highlight>) -> Vec<Highlight> {
    spans.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

    let mut merged: Vec<Highlight> = Vec::new();
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
                if span.kind > last.kind {
                    last.kind = span.kind;
                }
            }
            _ => merged.push(span),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        let highlights = generate("Patient is on Metformin 500mg", "metformin", &[]);
        assert!(highlights
            .iter()
            .any(|h| h.kind == HighlightKind::Exact));
    }

    #[test]
    fn entity_match_takes_precedence_over_exact() {
        let text = "Patient is on Metformin 500mg";
        let entities = vec![ChunkEntity {
            text: "Metformin".into(),
            entity_type: "medication".into(),
            start: 14,
            end: 23,
            normalized: "metformin".into(),
        }];
        let highlights = generate(text, "metformin", &entities);
        let overlapping: Vec<_> = highlights
            .iter()
            .filter(|h| h.start <= 14 && h.end >= 23)
            .collect();
        assert_eq!(overlapping.len(), 1);
        assert_eq!(overlapping[0].kind, HighlightKind::Entity);
    }

    #[test]
    fn fuzzy_match_within_distance_two() {
        let highlights = generate("Patient takes Metformn daily", "metformin", &[]);
        assert!(highlights.iter().any(|h| h.kind == HighlightKind::Fuzzy));
    }

    #[test]
    fn short_tokens_are_ignored() {
        let highlights = generate("the cat sat", "is on at", &[]);
        assert!(highlights.is_empty());
    }
}
