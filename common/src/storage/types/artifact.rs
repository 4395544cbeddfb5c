use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// The set of clinical artifact kinds the normalizer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Note,
    Document,
    Medication,
    Condition,
    Allergy,
    CarePlan,
    FormResponse,
    Message,
    LabObservation,
    Vital,
    Appointment,
    Superbill,
    InsurancePolicy,
    Task,
    FamilyHistory,
    IntakeFlow,
    Form,
}

/// A normalized source record: the canonical shape every downstream
/// component sees, regardless of which field names the EMR used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub author: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub title: Option<String>,
    pub text: String,
    pub source_url: Option<String>,
    pub meta: Value,
}

impl Artifact {
    /// `text` non-empty after normalization and `occurred_at` no more than a
    /// day in the future.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.text.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "artifact {} has empty text after normalization",
                self.id
            )));
        }
        let max_future = Utc::now() + chrono::Duration::days(1);
        if self.occurred_at > max_future {
            return Err(AppError::Validation(format!(
                "artifact {} occurred_at {} is too far in the future",
                self.id, self.occurred_at
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(text: &str, occurred_at: DateTime<Utc>) -> Artifact {
        Artifact {
            id: "a1".into(),
            patient_id: "p1".into(),
            artifact_type: ArtifactType::Note,
            author: None,
            occurred_at,
            title: None,
            text: text.into(),
            source_url: None,
            meta: Value::Null,
        }
    }

    #[test]
    fn rejects_empty_text() {
        let a = base("   ", Utc::now());
        assert!(a.validate().is_err());
    }

    #[test]
    fn rejects_far_future_occurred_at() {
        let a = base("hello", Utc::now() + chrono::Duration::days(30));
        assert!(a.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_artifact() {
        let a = base("Patient reports headache.", Utc::now());
        assert!(a.validate().is_ok());
    }
}
