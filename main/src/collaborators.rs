//! Fail-closed stand-ins for the external collaborators the system's
//! non-goals explicitly exclude (no EMR, embedding, or generation client
//! ships in this repo). Wiring the composition root against these lets
//! every other component start and be exercised; any code path that
//! actually needs a real integration gets a clear `Unavailable` error
//! through the circuit breaker instead of silently fabricating data.

use async_trait::async_trait;

use common::collaborators::{Embedder, EmrFetcher, GenerationOptions, GenerationResult, Generator, RawRecord};
use common::error::AppError;

fn not_configured(service: &str) -> AppError {
    AppError::Unavailable(format!("{service} integration is not configured in this deployment"))
}

pub struct UnconfiguredEmr;

#[async_trait]
impl EmrFetcher for UnconfiguredEmr {
    async fn fetch_medications(&self, _patient_id: &str) -> Result<Vec<RawRecord>, AppError> {
        Err(not_configured("EMR"))
    }

    async fn fetch_conditions(&self, _patient_id: &str) -> Result<Vec<RawRecord>, AppError> {
        Err(not_configured("EMR"))
    }

    async fn fetch_care_plans(&self, _patient_id: &str) -> Result<Vec<RawRecord>, AppError> {
        Err(not_configured("EMR"))
    }

    async fn fetch_notes(&self, _patient_id: &str) -> Result<Vec<RawRecord>, AppError> {
        Err(not_configured("EMR"))
    }

    async fn fetch_labs(&self, _patient_id: &str) -> Result<Vec<RawRecord>, AppError> {
        Err(not_configured("EMR"))
    }
}

/// Reports the configured embedding dimension without producing vectors —
/// lets the vector index and chunk schema agree on a dimension before a
/// real embedding client is wired in.
pub struct UnconfiguredEmbedder {
    dimension: usize,
}

impl UnconfiguredEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for UnconfiguredEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
        Err(not_configured("embedding"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub struct UnconfiguredGenerator;

#[async_trait]
impl Generator for UnconfiguredGenerator {
    async fn generate(&self, _prompt: &str, _options: GenerationOptions) -> Result<GenerationResult, AppError> {
        Err(not_configured("generator"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_emr_reports_unavailable() {
        let err = UnconfiguredEmr.fetch_medications("p1").await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unconfigured_generator_reports_unavailable() {
        let err = UnconfiguredGenerator
            .generate("prompt", GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }
}
