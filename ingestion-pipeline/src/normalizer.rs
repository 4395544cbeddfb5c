//! Canonicalizes heterogeneous EMR payloads into `Artifact` records. Every
//! field-name alias and timestamp shape the source system might use is
//! resolved here, once, so nothing downstream needs to know a record ever
//! looked different.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use common::collaborators::RawRecord;
use common::error::AppError;
use common::storage::types::artifact::{Artifact, ArtifactType};

fn first_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| raw.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn first_value<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| raw.get(key))
}

/// Accepts an RFC 3339 string, or a Unix epoch as either seconds or
/// milliseconds (disambiguated by magnitude).
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if let Some(n) = value.as_i64() {
        return Some(if n.unsigned_abs() > 10_000_000_000 {
            Utc.timestamp_millis_opt(n).single()?
        } else {
            Utc.timestamp_opt(n, 0).single()?
        });
    }
    None
}

fn first_timestamp(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| raw.get(key))
        .and_then(parse_timestamp)
}

/// Prefers a top-level `text`/`description`/`note`, falling back to a
/// nested `content.text` shape some sources use for free-text records.
fn extract_text(raw: &Value) -> String {
    if let Some(text) = first_str(raw, &["text", "description", "note", "body"]) {
        return text;
    }
    if let Some(nested) = raw.get("content").and_then(|c| c.get("text")).and_then(Value::as_str) {
        return nested.to_string();
    }
    String::new()
}

fn record_id(raw: &Value) -> String {
    first_str(raw, &["id", "_id", "recordId"]).unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn build_artifact(
    patient_id: &str,
    raw: &RawRecord,
    artifact_type: ArtifactType,
    occurred_at: DateTime<Utc>,
    title: Option<String>,
    text: String,
    meta: Value,
) -> Result<Artifact, AppError> {
    let artifact = Artifact {
        id: record_id(raw),
        patient_id: patient_id.to_string(),
        artifact_type,
        author: first_str(raw, &["author", "provider", "authoredBy"]),
        occurred_at,
        title,
        text,
        source_url: first_str(raw, &["source_url", "sourceUrl", "url"]),
        meta,
    };
    artifact.validate()?;
    Ok(artifact)
}

/// `medication_name` vs `name`, `prescribed_at` vs `start_date`, related
/// condition ids under either `related_condition_ids` or `indications`.
pub fn normalize_medication(patient_id: &str, raw: &RawRecord) -> Result<Artifact, AppError> {
    let name = first_str(raw, &["medication_name", "name", "drugName"]).unwrap_or_default();
    let dosage = first_str(raw, &["dosage", "dose"]);
    let frequency = first_str(raw, &["frequency", "sig"]);
    let prescribed_at = first_timestamp(raw, &["prescribed_at", "start_date", "startDate", "authoredOn"])
        .unwrap_or_else(Utc::now);

    let text = {
        let mut parts = vec![name.clone()];
        if let Some(d) = &dosage {
            parts.push(d.clone());
        }
        if let Some(f) = &frequency {
            parts.push(f.clone());
        }
        parts.join(" ")
    };

    let related_condition_ids = string_array(
        first_value(raw, &["related_condition_ids", "indications", "relatedConditionIds"]),
    );
    let route = first_str(raw, &["route", "administrationRoute"]);

    let meta = json!({
        "name": name,
        "code": first_str(raw, &["code", "rxnorm_code", "ndc"]),
        "indication": first_str(raw, &["indication", "reason"]),
        "indication_code": first_str(raw, &["indication_code", "diagnosisCode"]),
        "related_condition_ids": related_condition_ids,
        "prescribed_at": prescribed_at,
        "dosage": dosage,
        "frequency": frequency,
        "route": route,
    });

    build_artifact(
        patient_id,
        raw,
        ArtifactType::Medication,
        prescribed_at,
        Some(name),
        text,
        meta,
    )
}

/// `condition_name` vs `name`, `diagnosis_date` vs `onset_date`, status
/// under `status` or `clinicalStatus`.
pub fn normalize_condition(patient_id: &str, raw: &RawRecord) -> Result<Artifact, AppError> {
    let name = first_str(raw, &["condition_name", "name", "diagnosis"]).unwrap_or_default();
    let diagnosis_date = first_timestamp(raw, &["diagnosis_date", "onset_date", "onsetDate", "diagnosedAt"])
        .unwrap_or_else(Utc::now);
    let status = first_str(raw, &["status", "clinicalStatus", "clinical_status"]);

    let meta = json!({
        "name": name,
        "code": first_str(raw, &["code", "icd10", "icd_code"]),
        "status": status,
        "diagnosis_date": diagnosis_date,
        "severity": first_str(raw, &["severity"]),
        "notes": first_str(raw, &["notes", "clinical_notes"]),
    });

    build_artifact(
        patient_id,
        raw,
        ArtifactType::Condition,
        diagnosis_date,
        Some(name.clone()),
        name,
        meta,
    )
}

/// `plan_title` vs `title`, `plan_description` vs `description`/`goals`.
pub fn normalize_care_plan(patient_id: &str, raw: &RawRecord) -> Result<Artifact, AppError> {
    let title = first_str(raw, &["plan_title", "title", "name"]).unwrap_or_default();
    let description = first_str(raw, &["plan_description", "description", "goals", "summary"])
        .unwrap_or_default();
    let created_at = first_timestamp(raw, &["created_at", "createdAt", "authoredOn"]).unwrap_or_else(Utc::now);

    let text = if description.is_empty() {
        title.clone()
    } else {
        format!("{title}: {description}")
    };

    let meta = json!({
        "title": title,
        "description": description,
        "addresses": string_array(first_value(raw, &["addresses", "conditions", "condition_ids"])),
        "goals": string_array(first_value(raw, &["goals"])),
        "interventions": string_array(first_value(raw, &["interventions", "actions"])),
        "rationale": first_str(raw, &["rationale", "justification"]),
    });

    build_artifact(
        patient_id,
        raw,
        ArtifactType::CarePlan,
        created_at,
        Some(title),
        text,
        meta,
    )
}

/// Free-text clinical notes. Tolerates the nested `content.text` shape.
pub fn normalize_note(patient_id: &str, raw: &RawRecord) -> Result<Artifact, AppError> {
    let text = extract_text(raw);
    let occurred_at = first_timestamp(raw, &["occurred_at", "written_at", "writtenAt", "date"])
        .unwrap_or_else(Utc::now);

    build_artifact(
        patient_id,
        raw,
        ArtifactType::Note,
        occurred_at,
        first_str(raw, &["title", "subject"]),
        text,
        raw.clone(),
    )
}

/// `test_name` vs `name`, `result_value`/`value`, `resulted_at` vs
/// `observed_at`/`effectiveDateTime`.
pub fn normalize_lab(patient_id: &str, raw: &RawRecord) -> Result<Artifact, AppError> {
    let name = first_str(raw, &["test_name", "name", "code_display"]).unwrap_or_default();
    let value = first_str(raw, &["result_value", "value", "valueString"]).unwrap_or_default();
    let unit = first_str(raw, &["unit", "valueUnit"]).unwrap_or_default();
    let resulted_at = first_timestamp(
        raw,
        &["resulted_at", "observed_at", "effectiveDateTime", "date"],
    )
    .unwrap_or_else(Utc::now);

    let text = if unit.is_empty() {
        format!("{name}: {value}")
    } else {
        format!("{name}: {value} {unit}")
    };

    let meta = json!({
        "name": name,
        "value": value,
        "unit": unit,
    });

    build_artifact(
        patient_id,
        raw,
        ArtifactType::LabObservation,
        resulted_at,
        Some(name),
        text,
        meta,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn medication_accepts_either_field_name_variant() {
        let legacy = json!({"id": "m1", "medication_name": "Metformin", "start_date": "2024-01-01T00:00:00Z"});
        let modern = json!({"id": "m2", "name": "Metformin", "prescribed_at": "2024-01-01T00:00:00Z"});

        let a = normalize_medication("p1", &legacy).expect("legacy shape should normalize");
        let b = normalize_medication("p1", &modern).expect("modern shape should normalize");
        assert_eq!(a.title, b.title);
    }

    #[test]
    fn epoch_millis_and_seconds_both_parse() {
        let seconds = json!({"id": "m1", "name": "Aspirin", "prescribed_at": 1_700_000_000});
        let millis = json!({"id": "m2", "name": "Aspirin", "prescribed_at": 1_700_000_000_000i64});

        let a = normalize_medication("p1", &seconds).expect("seconds should parse");
        let b = normalize_medication("p1", &millis).expect("millis should parse");
        assert_eq!(a.occurred_at, b.occurred_at);
    }

    #[test]
    fn note_reads_nested_content_text() {
        let raw = json!({"id": "n1", "content": {"text": "Patient reports headache."}});
        let artifact = normalize_note("p1", &raw).expect("nested text should normalize");
        assert_eq!(artifact.text, "Patient reports headache.");
    }

    #[test]
    fn missing_id_generates_a_stable_new_one() {
        let raw = json!({"name": "Ibuprofen"});
        let artifact = normalize_medication("p1", &raw).expect("should still normalize");
        assert!(!artifact.id.is_empty());
    }

    #[test]
    fn condition_rejects_far_future_diagnosis_date() {
        let raw = json!({
            "id": "c1",
            "name": "Hypertension",
            "diagnosis_date": (Utc::now() + chrono::Duration::days(60)).to_rfc3339(),
        });
        assert!(normalize_condition("p1", &raw).is_err());
    }
}
