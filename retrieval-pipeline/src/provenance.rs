//! Formats citations for the generated answer: context-extended snippets,
//! human-readable dates, and canonical source URLs.

use chrono::{DateTime, Utc};

use common::model::response::{ExtractionProvenance, Provenance};
use common::storage::types::artifact::ArtifactType;
use common::storage::types::chunk_metadata::ChunkMetadata;

const SIDE_CONTEXT_CHARS: usize = 50;
const MAX_SNIPPET_CHARS: usize = 200;
const RECENT_THRESHOLD_DAYS: i64 = 7;

/// `Mon D, YYYY` — used once a cited event is more than a week old.
fn absolute_date(occurred_at: DateTime<Utc>) -> String {
    occurred_at.format("%b %-d, %Y").to_string()
}

/// Relative dates are used only inside the 7-day recency window; beyond
/// that a reader benefits more from an exact calendar date.
fn format_date(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - occurred_at;
    if age < chrono::Duration::days(RECENT_THRESHOLD_DAYS) && age >= chrono::Duration::zero() {
        let days = age.num_days();
        match days {
            0 => "today".to_string(),
            1 => "yesterday".to_string(),
            d => format!("{d} days ago"),
        }
    } else {
        absolute_date(occurred_at)
    }
}

fn canonical_source_url(artifact_type: ArtifactType, artifact_id: &str) -> String {
    let segment = match artifact_type {
        ArtifactType::Note => "notes",
        ArtifactType::Document => "documents",
        ArtifactType::Medication => "medications",
        ArtifactType::Condition => "conditions",
        ArtifactType::Allergy => "allergies",
        ArtifactType::CarePlan => "care-plans",
        ArtifactType::FormResponse => "form-responses",
        ArtifactType::Message => "messages",
        ArtifactType::LabObservation => "labs",
        ArtifactType::Vital => "vitals",
        ArtifactType::Appointment => "appointments",
        ArtifactType::Superbill => "superbills",
        ArtifactType::InsurancePolicy => "insurance-policies",
        ArtifactType::Task => "tasks",
        ArtifactType::FamilyHistory => "family-history",
        ArtifactType::IntakeFlow => "intake-flows",
        ArtifactType::Form => "forms",
    };
    format!("/artifacts/{segment}/{artifact_id}")
}

/// Extends `[start, end)` by up to `SIDE_CONTEXT_CHARS` on each side to the
/// nearest sentence boundary (`.`, `!`, `?`), caps the total at
/// `MAX_SNIPPET_CHARS`, truncates at the last whole word, and marks cut
/// edges with an ellipsis.
fn context_snippet(text: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let start = start.min(chars.len());
    let end = end.clamp(start, chars.len());

    let left_bound = start.saturating_sub(SIDE_CONTEXT_CHARS);
    let mut left = left_bound;
    for idx in (left_bound..start).rev() {
        if matches!(chars[idx], '.' | '!' | '?') {
            left = idx + 1;
            break;
        }
    }

    let right_bound = (end + SIDE_CONTEXT_CHARS).min(chars.len());
    let mut right = right_bound;
    for (idx, ch) in chars.iter().enumerate().take(right_bound).skip(end) {
        if matches!(ch, '.' | '!' | '?') {
            right = idx + 1;
            break;
        }
    }

    let mut left_cut = left > 0;
    let mut right_cut = right < chars.len();

    let mut window: Vec<char> = chars[left..right].to_vec();
    if window.len() > MAX_SNIPPET_CHARS {
        let excess = window.len() - MAX_SNIPPET_CHARS;
        let trim_left = excess / 2;
        let trim_right = excess - trim_left;
        let new_left = trim_left.min(window.len());
        let new_right = window.len().saturating_sub(trim_right).max(new_left);
        window = window[new_left..new_right].to_vec();
        left_cut = true;
        right_cut = true;
        window = truncate_to_last_word(window);
    }

    let mut snippet: String = window.into_iter().collect();
    if left_cut {
        snippet = format!("…{snippet}");
    }
    if right_cut {
        snippet = format!("{snippet}…");
    }
    snippet
}

fn truncate_to_last_word(chars: Vec<char>) -> Vec<char> {
    if let Some(pos) = chars.iter().rposition(|c| c.is_whitespace()) {
        chars[..pos].to_vec()
    } else {
        chars
    }
}

/// Builds the `Provenance` citation for one extraction's supporting chunk.
pub fn format(
    chunk: &ChunkMetadata,
    char_offsets: [usize; 2],
    relevance_score: f32,
    now: DateTime<Utc>,
) -> Provenance {
    let snippet = context_snippet(&chunk.chunk_text, char_offsets[0], char_offsets[1]);

    Provenance {
        artifact_id: chunk.artifact_id.clone(),
        artifact_type: format!("{:?}", chunk.artifact_type),
        snippet,
        note_date: format_date(chunk.occurred_at, now),
        author: chunk.author.clone(),
        source_url: chunk
            .source_url
            .clone()
            .unwrap_or_else(|| canonical_source_url(chunk.artifact_type, &chunk.artifact_id)),
        char_offsets,
        relevance_score,
    }
}

pub fn extraction_provenance(chunk: &ChunkMetadata, char_offsets: [usize; 2]) -> ExtractionProvenance {
    let chars: Vec<char> = chunk.chunk_text.chars().collect();
    let start = char_offsets[0].min(chars.len());
    let end = char_offsets[1].clamp(start, chars.len());
    ExtractionProvenance {
        artifact_id: chunk.artifact_id.clone(),
        chunk_id: chunk.id.clone(),
        char_offsets,
        supporting_text: chars[start..end].iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, occurred_at: DateTime<Utc>) -> ChunkMetadata {
        let now = Utc::now();
        ChunkMetadata {
            id: "c1".into(),
            created_at: now,
            updated_at: now,
            artifact_id: "m1".into(),
            patient_id: "p1".into(),
            artifact_type: ArtifactType::Medication,
            chunk_text: text.into(),
            enriched_text: None,
            char_offset_start: 0,
            char_offset_end: text.chars().count(),
            entities: vec![],
            relationship_ids: vec![],
            context_expansion_level: 0,
            extracted_entities: None,
            occurred_at,
            author: None,
            source_url: None,
        }
    }

    #[test]
    fn recent_date_is_relative() {
        let now = Utc::now();
        let c = chunk("text", now - chrono::Duration::days(1));
        let p = format(&c, [0, 4], 0.9, now);
        assert_eq!(p.note_date, "yesterday");
    }

    #[test]
    fn old_date_is_absolute() {
        let now = Utc::now();
        let c = chunk("text", now - chrono::Duration::days(30));
        let p = format(&c, [0, 4], 0.9, now);
        assert!(p.note_date.contains(','));
    }

    #[test]
    fn snippet_never_exceeds_cap() {
        let text = "word ".repeat(200);
        let now = Utc::now();
        let c = chunk(&text, now);
        let p = format(&c, [500, 510], 0.9, now);
        assert!(p.snippet.chars().count() <= MAX_SNIPPET_CHARS + 2);
    }

    #[test]
    fn source_url_falls_back_to_canonical_form() {
        let now = Utc::now();
        let c = chunk("text", now);
        let p = format(&c, [0, 4], 0.9, now);
        assert_eq!(p.source_url, "/artifacts/medications/m1");
    }

    #[test]
    fn citations_are_grounded_in_chunk_text_not_enriched_text() {
        let now = Utc::now();
        let mut c = chunk("Metformin 500mg twice daily.", now);
        c.enriched_text = Some("Context: patient has type 2 diabetes. Metformin 500mg twice daily. Related to condition diabetes.".into());

        let p = format(&c, [0, 9], 0.9, now);
        assert!(p.snippet.contains("Metformin"));
        assert!(!p.snippet.contains("Context:"));

        let extraction = extraction_provenance(&c, [0, 9]);
        assert_eq!(extraction.supporting_text, "Metformin");
    }
}
