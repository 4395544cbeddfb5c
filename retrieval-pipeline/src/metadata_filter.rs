//! Builds compact secondary indexes over a working set of chunks and
//! AND-combines the predicates named on a `StructuredQuery` into a
//! candidate `chunk_id` set. Date predicates are applied by linear scan
//! over the already-narrowed set since dates are high cardinality.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use common::collaborators::VectorFilter;
use common::model::query::StructuredQuery;
use common::storage::types::chunk_metadata::ChunkMetadata;

/// Four compact indexes over one working set of chunks, rebuilt whenever
/// the working set changes (typically once per query, over that patient's
/// chunks).
pub struct MetadataFilter {
    by_patient: HashMap<String, HashSet<String>>,
    by_type: HashMap<String, HashSet<String>>,
    by_author: HashMap<String, HashSet<String>>,
    by_date: HashMap<NaiveDate, HashSet<String>>,
    chunks: HashMap<String, ChunkMetadata>,
}

impl MetadataFilter {
    pub fn build(working_set: &[ChunkMetadata]) -> Self {
        let mut by_patient: HashMap<String, HashSet<String>> = HashMap::new();
        let mut by_type: HashMap<String, HashSet<String>> = HashMap::new();
        let mut by_author: HashMap<String, HashSet<String>> = HashMap::new();
        let mut by_date: HashMap<NaiveDate, HashSet<String>> = HashMap::new();
        let mut chunks = HashMap::new();

        for chunk in working_set {
            by_patient
                .entry(chunk.patient_id.clone())
                .or_default()
                .insert(chunk.id.clone());
            by_type
                .entry(format!("{:?}", chunk.artifact_type))
                .or_default()
                .insert(chunk.id.clone());
            if let Some(author) = &chunk.author {
                by_author.entry(author.clone()).or_default().insert(chunk.id.clone());
            }
            by_date
                .entry(chunk.occurred_at.date_naive())
                .or_default()
                .insert(chunk.id.clone());
            chunks.insert(chunk.id.clone(), chunk.clone());
        }

        Self {
            by_patient,
            by_type,
            by_author,
            by_date,
            chunks,
        }
    }

    /// AND-combines `patient_id` (mandatory) with every recognized key in
    /// `filters`: `artifact_type`, `author`, `date_from`, `date_to`.
    /// Unrecognized keys are ignored rather than rejected, mirroring the
    /// metadata filter's tolerance for additive query filters.
    pub fn apply_filters_with_indexes(
        &self,
        query: &StructuredQuery,
    ) -> Vec<String> {
        let mut candidates: Option<HashSet<String>> = self
            .by_patient
            .get(&query.patient_id)
            .cloned();

        if let Some(artifact_type) = query.filters.get("artifact_type") {
            candidates = intersect_with_index(candidates, self.by_type.get(artifact_type));
        }
        if let Some(author) = query.filters.get("author") {
            candidates = intersect_with_index(candidates, self.by_author.get(author));
        }

        let mut result: Vec<String> = candidates.unwrap_or_default().into_iter().collect();

        if let Some(temporal) = &query.temporal_filter {
            result.retain(|id| {
                self.chunks.get(id).is_some_and(|chunk| {
                    let date = chunk.occurred_at;
                    temporal.from.map_or(true, |from| date >= from)
                        && temporal.to.map_or(true, |to| date <= to)
                })
            });
        }

        result.sort();
        result
    }

    /// Every chunk id present for the given date, used by tests and by the
    /// garbage-collection/statistics paths that want a date-bucketed view
    /// without scanning the whole working set.
    pub fn ids_for_date(&self, date: NaiveDate) -> Vec<String> {
        let mut ids: Vec<String> = self
            .by_date
            .get(&date)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// The structured filter form the vector index's `search` expects.
    pub fn vector_store_filter(&self, query: &StructuredQuery) -> VectorFilter {
        VectorFilter {
            candidate_ids: Some(self.apply_filters_with_indexes(query)),
        }
    }
}

fn intersect_with_index(
    current: Option<HashSet<String>>,
    index_set: Option<&HashSet<String>>,
) -> Option<HashSet<String>> {
    match (current, index_set) {
        (Some(current), Some(index_set)) => {
            Some(current.intersection(index_set).cloned().collect())
        }
        (None, Some(index_set)) => Some(index_set.clone()),
        (_, None) => Some(HashSet::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::model::query::Intent;
    use common::storage::types::artifact::ArtifactType;
    use std::collections::HashMap as StdHashMap;

    fn chunk(id: &str, patient_id: &str, artifact_type: ArtifactType) -> ChunkMetadata {
        let now = Utc::now();
        ChunkMetadata {
            id: id.into(),
            created_at: now,
            updated_at: now,
            artifact_id: format!("a-{id}"),
            patient_id: patient_id.into(),
            artifact_type,
            chunk_text: "text".into(),
            enriched_text: None,
            char_offset_start: 0,
            char_offset_end: 4,
            entities: vec![],
            relationship_ids: vec![],
            context_expansion_level: 0,
            extracted_entities: None,
            occurred_at: now,
            author: None,
            source_url: None,
        }
    }

    fn query(patient_id: &str, filters: StdHashMap<String, String>) -> StructuredQuery {
        StructuredQuery {
            query_id: "q1".into(),
            original_query: "test".into(),
            patient_id: patient_id.into(),
            intent: Intent::General,
            entities: vec![],
            temporal_filter: None,
            filters,
            detail_level: 1,
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn filters_combine_with_and() {
        let working_set = vec![
            chunk("c1", "p1", ArtifactType::Medication),
            chunk("c2", "p1", ArtifactType::Condition),
            chunk("c3", "p2", ArtifactType::Medication),
        ];
        let filter = MetadataFilter::build(&working_set);

        let mut filters = StdHashMap::new();
        filters.insert("artifact_type".to_string(), "Medication".to_string());
        let q = query("p1", filters);

        let candidates = filter.apply_filters_with_indexes(&q);
        assert_eq!(candidates, vec!["c1".to_string()]);
    }

    #[test]
    fn unknown_patient_yields_no_candidates() {
        let working_set = vec![chunk("c1", "p1", ArtifactType::Medication)];
        let filter = MetadataFilter::build(&working_set);
        let q = query("p404", StdHashMap::new());
        assert!(filter.apply_filters_with_indexes(&q).is_empty());
    }
}
