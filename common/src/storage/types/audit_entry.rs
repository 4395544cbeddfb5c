use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only audit record: one per query, written to the in-memory ring
/// and the line-delimited JSON log. Not a SurrealDB row — owned exclusively
/// by the audit logger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    pub patient_id: String,
    pub query_text: String,
    pub response_summary: String,
    pub sources_used: Vec<String>,
    pub confidence_score: f32,
    pub total_time_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl AuditEntry {
    /// Replaces identifying fields with stable hashes and redacts free text,
    /// leaving shape and timing intact — used once an entry passes the
    /// anonymization threshold.
    pub fn anonymized(&self) -> Self {
        use sha2::{Digest, Sha256};

        let hash = |value: &str| -> String {
            let mut hasher = Sha256::new();
            hasher.update(value.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        Self {
            query_id: self.query_id.clone(),
            timestamp: self.timestamp,
            patient_id: hash(&self.patient_id),
            query_text: "[redacted]".into(),
            response_summary: "[redacted]".into(),
            sources_used: self.sources_used.iter().map(|s| hash(s)).collect(),
            confidence_score: self.confidence_score,
            total_time_ms: self.total_time_ms,
            success: self.success,
            error: self.error.clone(),
            user_id: self.user_id.as_deref().map(hash),
            session_id: self.session_id.as_deref().map(hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEntry {
        AuditEntry {
            query_id: "q1".into(),
            timestamp: Utc::now(),
            patient_id: "p1".into(),
            query_text: "What medications is the patient on?".into(),
            response_summary: "Metformin 500mg BID".into(),
            sources_used: vec!["m1".into()],
            confidence_score: 0.8,
            total_time_ms: 120,
            success: true,
            error: None,
            user_id: Some("u1".into()),
            session_id: Some("s1".into()),
        }
    }

    #[test]
    fn anonymization_redacts_text_and_hashes_ids() {
        let entry = sample();
        let anon = entry.anonymized();
        assert_eq!(anon.query_text, "[redacted]");
        assert_ne!(anon.patient_id, entry.patient_id);
        assert_eq!(anon.patient_id.len(), 64);
        assert_eq!(anon.query_id, entry.query_id);
    }
}
