//! Durable per-patient record of every question/answer pair plus its
//! quality metrics: insert, metric updates, paged lookup, "similar past
//! queries" search, and aggregated trend reporting.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::conversation_record::ConversationRecord;
use common::storage::types::StoredObject;

pub struct ConversationHistory {
    db: SurrealDbClient,
}

/// Aggregated quality/latency trends over a time range.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TrendReport {
    pub query_count: usize,
    pub avg_confidence_score: f32,
    pub avg_grounding_score: f32,
    pub avg_overall_quality_score: f32,
    pub low_confidence_count: usize,
    pub low_quality_count: usize,
    pub p95_execution_time_ms: u64,
}

impl ConversationHistory {
    pub fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }

    pub async fn insert(&self, record: ConversationRecord) -> Result<(), AppError> {
        self.db.store_item(record).await?;
        Ok(())
    }

    /// Re-stores the record with updated quality fields, addressed by id —
    /// callers read-modify-write rather than patching individual fields.
    pub async fn update_metrics(&self, record: ConversationRecord) -> Result<(), AppError> {
        self.db.upsert_item(record).await?;
        Ok(())
    }

    /// Newest-first page of a patient's history.
    pub async fn by_patient(&self, patient_id: &str, offset: usize, limit: usize) -> Result<Vec<ConversationRecord>, AppError> {
        let mut all = self.all_for_patient(patient_id).await?;
        all.sort_by(|a, b| b.query_timestamp.cmp(&a.query_timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    /// Records with `overall_quality_score` below `threshold`, newest first.
    /// A record with no quality score yet is excluded, not treated as low.
    pub async fn low_quality(&self, patient_id: &str, threshold: f32) -> Result<Vec<ConversationRecord>, AppError> {
        let mut matches: Vec<ConversationRecord> = self
            .all_for_patient(patient_id)
            .await?
            .into_iter()
            .filter(|r| r.overall_quality_score.is_some_and(|score| score < threshold))
            .collect();
        matches.sort_by(|a, b| b.query_timestamp.cmp(&a.query_timestamp));
        Ok(matches)
    }

    /// Ranks a patient's past questions by trigram similarity to `query`,
    /// returning the `limit` closest matches above a minimal relevance
    /// floor. Falls back to a plain substring match when every candidate's
    /// trigram set is too small to score (e.g. one- or two-word queries).
    pub async fn similar_queries(&self, patient_id: &str, query: &str, limit: usize) -> Result<Vec<ConversationRecord>, AppError> {
        let candidates = self.all_for_patient(patient_id).await?;
        let query_trigrams = trigrams(query);

        if query_trigrams.is_empty() {
            let lower = query.to_lowercase();
            let mut plain: Vec<ConversationRecord> = candidates
                .into_iter()
                .filter(|r| r.query.to_lowercase().contains(&lower))
                .collect();
            plain.sort_by(|a, b| b.query_timestamp.cmp(&a.query_timestamp));
            plain.truncate(limit);
            return Ok(plain);
        }

        let mut scored: Vec<(f32, ConversationRecord)> = candidates
            .into_iter()
            .map(|r| (trigram_similarity(&query_trigrams, &trigrams(&r.query)), r))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .filter(|(score, _)| *score > 0.0)
            .take(limit)
            .map(|(_, record)| record)
            .collect())
    }

    /// Count, component-score averages, below-threshold counts, and p95
    /// execution time for every record in `[from, to]`.
    pub async fn trends(&self, from: DateTime<Utc>, to: DateTime<Utc>, low_confidence_threshold: f32, low_quality_threshold: f32) -> Result<TrendReport, AppError> {
        let all = self.db.get_all_stored_items::<ConversationRecord>().await?;
        let windowed: Vec<&ConversationRecord> = all
            .iter()
            .filter(|r| r.query_timestamp >= from && r.query_timestamp <= to)
            .collect();

        if windowed.is_empty() {
            return Ok(TrendReport::default());
        }

        let query_count = windowed.len();
        #[allow(clippy::cast_precision_loss)]
        let count_f32 = query_count as f32;

        let avg_confidence_score = windowed.iter().map(|r| r.confidence_score).sum::<f32>() / count_f32;
        let avg_grounding_score = average_optional(windowed.iter().map(|r| r.grounding_score));
        let avg_overall_quality_score = average_optional(windowed.iter().map(|r| r.overall_quality_score));

        let low_confidence_count = windowed.iter().filter(|r| r.confidence_score < low_confidence_threshold).count();
        let low_quality_count = windowed
            .iter()
            .filter(|r| r.overall_quality_score.is_some_and(|score| score < low_quality_threshold))
            .count();

        let mut execution_times: Vec<u64> = windowed.iter().map(|r| r.execution_time_ms).collect();
        execution_times.sort_unstable();
        let p95_execution_time_ms = percentile(&execution_times, 0.95);

        Ok(TrendReport {
            query_count,
            avg_confidence_score,
            avg_grounding_score,
            avg_overall_quality_score,
            low_confidence_count,
            low_quality_count,
            p95_execution_time_ms,
        })
    }

    async fn all_for_patient(&self, patient_id: &str) -> Result<Vec<ConversationRecord>, AppError> {
        let all = self.db.get_all_stored_items::<ConversationRecord>().await?;
        Ok(all.into_iter().filter(|r| r.patient_id == patient_id).collect())
    }
}

fn average_optional(values: impl Iterator<Item = Option<f32>>) -> f32 {
    let mut sum = 0.0;
    let mut count = 0;
    for value in values.flatten() {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            sum / count as f32
        }
    }
}

fn percentile(sorted_values: &[u64], p: f64) -> u64 {
    if sorted_values.is_empty() {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (((sorted_values.len() - 1) as f64) * p).round() as usize;
    sorted_values.get(idx).copied().unwrap_or(0)
}

fn trigrams(text: &str) -> HashSet<String> {
    let normalized: Vec<char> = text.to_lowercase().chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect();
    if normalized.len() < 3 {
        return HashSet::new();
    }
    normalized.windows(3).map(|w| w.iter().collect()).collect()
}

/// Dice coefficient over trigram sets: `2·|A∩B| / (|A|+|B|)`.
fn trigram_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    #[allow(clippy::cast_precision_loss)]
    {
        (2.0 * intersection as f32) / (a.len() + b.len()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(patient_id: &str, query: &str, when: DateTime<Utc>) -> ConversationRecord {
        let now = Utc::now();
        ConversationRecord {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            patient_id: patient_id.to_string(),
            query: query.to_string(),
            query_intent: "GENERAL".into(),
            query_timestamp: when,
            short_answer: "answer".into(),
            detailed_summary: "detailed answer".into(),
            model_used: "test-model".into(),
            extractions: json!([]),
            sources: json!([]),
            retrieval_candidates: json!([]),
            grounding_score: Some(0.8),
            consistency_score: Some(0.9),
            confidence_score: 0.75,
            hallucination_risk: Some(0.1),
            overall_quality_score: Some(0.8),
            enrichment_enabled: true,
            multi_hop_enabled: false,
            reasoning_enabled: false,
            execution_time_ms: 100,
            retrieval_time_ms: 40,
            generation_time_ms: 50,
        }
    }

    async fn store() -> ConversationHistory {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string()).await.unwrap();
        db.apply_migrations().await.unwrap();
        ConversationHistory::new(db)
    }

    #[tokio::test]
    async fn by_patient_pages_newest_first() {
        let history = store().await;
        let now = Utc::now();
        history.insert(record("p1", "q1", now - chrono::Duration::hours(2))).await.unwrap();
        history.insert(record("p1", "q2", now)).await.unwrap();

        let page = history.by_patient("p1", 0, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].query, "q2");
    }

    #[tokio::test]
    async fn similar_queries_ranks_by_trigram_overlap() {
        let history = store().await;
        let now = Utc::now();
        history
            .insert(record("p1", "What medications is the patient on?", now))
            .await
            .unwrap();
        history.insert(record("p1", "What labs were run recently?", now)).await.unwrap();

        let results = history.similar_queries("p1", "What medications is the patient taking?", 5).await.unwrap();
        assert_eq!(results[0].query, "What medications is the patient on?");
    }

    #[tokio::test]
    async fn low_quality_excludes_records_without_a_score() {
        let history = store().await;
        let mut missing_score = record("p1", "q", Utc::now());
        missing_score.overall_quality_score = None;
        history.insert(missing_score).await.unwrap();

        let mut low = record("p1", "q2", Utc::now());
        low.overall_quality_score = Some(0.2);
        history.insert(low).await.unwrap();

        let results = history.low_quality("p1", 0.5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].query, "q2");
    }

    #[tokio::test]
    async fn trends_aggregates_over_the_requested_window() {
        let history = store().await;
        let now = Utc::now();
        history.insert(record("p1", "q1", now)).await.unwrap();
        history.insert(record("p2", "q2", now)).await.unwrap();

        let report = history
            .trends(now - chrono::Duration::hours(1), now + chrono::Duration::hours(1), 0.5, 0.5)
            .await
            .unwrap();
        assert_eq!(report.query_count, 2);
    }
}
