//! Pattern-based clinical entity recognizer. No ML, no external NLP
//! dependencies — lexicons are plain data tables so the rules stay
//! auditable and testable independently of the matching engine.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityType {
    Dosage,
    Medication,
    Condition,
    Symptom,
    Procedure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub text: String,
    pub entity_type: EntityType,
    pub start: usize,
    pub end: usize,
    pub normalized: String,
}

static DOSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+\s?(mg|mcg|ml|units|tab|cap|%)\b").expect("valid dosage regex")
});

static FREQUENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(BID|TID|QID|QD|q\d+h|PRN)\b").expect("valid frequency regex"));

const MEDICATION_SUFFIXES: &[&str] = &["pril", "statin", "olol", "formin", "azole"];

const MEDICATION_LEXICON: &[&str] = &[
    "metformin",
    "lisinopril",
    "atorvastatin",
    "metoprolol",
    "amoxicillin",
    "albuterol",
    "insulin",
    "aspirin",
    "ibuprofen",
    "omeprazole",
];

const CONDITION_LEXICON: &[(&str, &[&str])] = &[
    ("Hypertension", &["hypertension", "htn"]),
    ("Diabetes Mellitus", &["diabetes", "type 2 diabetes", "dm"]),
    ("Coronary Artery Disease", &["coronary artery disease", "cad"]),
    (
        "Chronic Obstructive Pulmonary Disease",
        &["chronic obstructive pulmonary disease", "copd"],
    ),
    ("Congestive Heart Failure", &["congestive heart failure", "chf"]),
    ("Chronic Kidney Disease", &["chronic kidney disease", "ckd"]),
];

const SYMPTOM_LEXICON: &[&str] = &[
    "headache", "nausea", "fatigue", "dizziness", "shortness of breath", "chest pain", "fever",
    "cough", "swelling",
];

const PROCEDURE_LEXICON: &[&str] = &[
    "colonoscopy", "mri", "ct scan", "x-ray", "biopsy", "echocardiogram", "blood draw", "ekg",
];

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("htn", "Hypertension"),
    ("dm", "Diabetes Mellitus"),
    ("cad", "Coronary Artery Disease"),
    ("copd", "Chronic Obstructive Pulmonary Disease"),
    ("chf", "Congestive Heart Failure"),
    ("ckd", "Chronic Kidney Disease"),
];

fn unit_canonical(unit: &str) -> String {
    match unit.to_lowercase().as_str() {
        "milligrams" | "mg" => "mg".to_string(),
        "micrograms" | "mcg" => "mcg".to_string(),
        other => other.to_string(),
    }
}

fn normalize_dosage(raw: &str) -> String {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit: String = raw
        .chars()
        .skip_while(|c| c.is_ascii_digit() || c.is_whitespace())
        .collect();
    format!("{digits}{}", unit_canonical(&unit))
}

fn normalize_title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Recognizes medications, dosages, conditions, symptoms and procedures in
/// `text`. Matching order establishes tie-break priority when two spans
/// overlap: dosage/frequency, medication, condition, symptom, procedure,
/// abbreviation expansion.
pub fn extract(text: &str) -> Vec<Entity> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let lower = text.to_lowercase();
    let mut candidates: Vec<Entity> = Vec::new();

    for m in DOSAGE_RE.find_iter(text) {
        candidates.push(Entity {
            text: m.as_str().to_string(),
            entity_type: EntityType::Dosage,
            start: m.start(),
            end: m.end(),
            normalized: normalize_dosage(m.as_str()),
        });
    }
    for m in FREQUENCY_RE.find_iter(text) {
        candidates.push(Entity {
            text: m.as_str().to_string(),
            entity_type: EntityType::Dosage,
            start: m.start(),
            end: m.end(),
            normalized: m.as_str().to_uppercase(),
        });
    }

    for term in MEDICATION_LEXICON {
        for (start, end) in find_word(&lower, term) {
            candidates.push(Entity {
                text: text[start..end].to_string(),
                entity_type: EntityType::Medication,
                start,
                end,
                normalized: normalize_title_case(term),
            });
        }
    }
    for suffix in MEDICATION_SUFFIXES {
        for (start, end) in find_suffix_word(&lower, suffix) {
            candidates.push(Entity {
                text: text[start..end].to_string(),
                entity_type: EntityType::Medication,
                start,
                end,
                normalized: normalize_title_case(&lower[start..end]),
            });
        }
    }

    for (canonical, aliases) in CONDITION_LEXICON {
        for alias in *aliases {
            for (start, end) in find_word(&lower, alias) {
                candidates.push(Entity {
                    text: text[start..end].to_string(),
                    entity_type: EntityType::Condition,
                    start,
                    end,
                    normalized: (*canonical).to_string(),
                });
            }
        }
    }

    for term in SYMPTOM_LEXICON {
        for (start, end) in find_word(&lower, term) {
            candidates.push(Entity {
                text: text[start..end].to_string(),
                entity_type: EntityType::Symptom,
                start,
                end,
                normalized: normalize_title_case(term),
            });
        }
    }

    for term in PROCEDURE_LEXICON {
        for (start, end) in find_word(&lower, term) {
            candidates.push(Entity {
                text: text[start..end].to_string(),
                entity_type: EntityType::Procedure,
                start,
                end,
                normalized: normalize_title_case(term),
            });
        }
    }

    for (abbr, expansion) in ABBREVIATIONS {
        for (start, end) in find_word(&lower, abbr) {
            candidates.push(Entity {
                text: text[start..end].to_string(),
                entity_type: EntityType::Condition,
                start,
                end,
                normalized: (*expansion).to_string(),
            });
        }
    }

    dedupe_overlaps(candidates)
}

/// Idempotent re-application of the normalization rules to an already
/// normalized string.
pub fn normalize(entity: &Entity) -> String {
    match entity.entity_type {
        EntityType::Dosage => normalize_dosage(&entity.normalized),
        _ => entity.normalized.clone(),
    }
}

fn find_word(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start_search = 0;
    while let Some(pos) = haystack[start_search..].find(needle) {
        let start = start_search + pos;
        let end = start + needle.len();
        let left_ok = start == 0 || !haystack.as_bytes()[start - 1].is_ascii_alphanumeric();
        let right_ok = end == haystack.len() || !haystack.as_bytes()[end].is_ascii_alphanumeric();
        if left_ok && right_ok {
            out.push((start, end));
        }
        start_search = start + 1;
    }
    out
}

fn find_suffix_word(haystack: &str, suffix: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    // Walk whitespace-delimited tokens, testing each for the suffix.
    let mut offset = 0;
    for token in haystack.split_whitespace() {
        let token_start = match haystack[offset..].find(token) {
            Some(p) => offset + p,
            None => offset,
        };
        let token_end = token_start + token.len();
        let clean: String = token.chars().filter(|c| c.is_alphabetic()).collect();
        if clean.len() > suffix.len() && clean.ends_with(suffix) {
            out.push((token_start, token_end));
        }
        offset = token_end;
    }
    out
}

/// Deduplicates overlapping spans: keep the longer; break ties by earlier
/// position in the matching priority list above.
fn dedupe_overlaps(mut candidates: Vec<Entity>) -> Vec<Entity> {
    candidates.sort_by_key(|e| (e.start, e.end));
    let mut kept: Vec<Entity> = Vec::new();
    for candidate in candidates {
        let overlaps_idx = kept
            .iter()
            .position(|k| candidate.start < k.end && k.start < candidate.end);
        match overlaps_idx {
            None => kept.push(candidate),
            Some(idx) => {
                let existing_len = kept[idx].end - kept[idx].start;
                let candidate_len = candidate.end - candidate.start;
                if candidate_len > existing_len {
                    kept[idx] = candidate;
                }
            }
        }
    }
    kept.sort_by_key(|e| e.start);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_empty() {
        assert!(extract("").is_empty());
        assert!(extract("   ").is_empty());
    }

    #[test]
    fn extracts_medication_and_dosage() {
        let entities = extract("Metformin 500mg BID for diabetes");
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Medication && e.normalized == "Metformin"));
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Dosage && e.normalized == "500mg"));
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Condition && e.normalized == "Diabetes Mellitus"));
    }

    #[test]
    fn expands_abbreviations() {
        let entities = extract("Patient has HTN and CAD");
        assert!(entities.iter().any(|e| e.normalized == "Hypertension"));
        assert!(entities
            .iter()
            .any(|e| e.normalized == "Coronary Artery Disease"));
    }

    #[test]
    fn matches_suffix_based_medication() {
        let entities = extract("Patient takes lisinopril daily");
        assert!(entities
            .iter()
            .any(|e| e.entity_type == EntityType::Medication));
    }

    #[test]
    fn normalize_is_idempotent() {
        let entities = extract("500mg Metformin");
        for entity in &entities {
            let once = normalize(entity);
            let reapplied = normalize(&Entity {
                normalized: once.clone(),
                ..entity.clone()
            });
            assert_eq!(once, reapplied);
        }
    }

    #[test]
    fn overlapping_spans_keep_the_longer_match() {
        let entities = extract("diabetes");
        let matches: Vec<_> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Condition)
            .collect();
        assert_eq!(matches.len(), 1);
    }
}
