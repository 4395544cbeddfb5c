//! Trait boundaries for the external collaborators named in the system's
//! explicit non-goals: the EMR fetcher, the generative model, the embedding
//! model, and the vector index. Only the interfaces these collaborators
//! expose to the core are specified here — no concrete network client ships
//! in this crate.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;

/// Raw, heterogeneous record as returned by the EMR. Field names vary by
/// source system; the normalizer is responsible for reconciling that.
pub type RawRecord = Value;

/// Black-box source of raw clinical artifacts for one patient.
#[async_trait]
pub trait EmrFetcher: Send + Sync {
    async fn fetch_medications(&self, patient_id: &str) -> Result<Vec<RawRecord>, AppError>;
    async fn fetch_conditions(&self, patient_id: &str) -> Result<Vec<RawRecord>, AppError>;
    async fn fetch_care_plans(&self, patient_id: &str) -> Result<Vec<RawRecord>, AppError>;
    async fn fetch_notes(&self, patient_id: &str) -> Result<Vec<RawRecord>, AppError>;
    async fn fetch_labs(&self, patient_id: &str) -> Result<Vec<RawRecord>, AppError>;
}

/// Black-box `text -> vector` function. Implementations MUST be
/// deterministic for identical input and MUST report a fixed `dimension()`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
    fn dimension(&self) -> usize;
}

/// Result of a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub tokens: u32,
}

/// Options threaded through to the generative model.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Black-box text+JSON producer. Implementations MUST preserve verbatim
/// whichever portion of the prompt they are told to cite.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<GenerationResult, AppError>;
}

/// A single vector-index match.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
}

/// Structured filter form, as emitted by the metadata filter's
/// `vector_store_filter`.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub candidate_ids: Option<Vec<String>>,
}

/// Vector similarity index over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, id: &str, vector: Vec<f32>) -> Result<(), AppError>;
    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>, AppError>;
    fn dimension(&self) -> usize;
}
