//! Ingestion side of the pipeline: normalize raw EMR records into
//! `Artifact`s, link them into `ClinicalRelationship`s, enrich them into
//! `EnrichedArtifact`s, and persist bounded chunks with their embeddings.

pub mod chunk_store;
pub mod clinical_details;
pub mod enricher;
pub mod entity_extractor;
pub mod normalizer;
pub mod pipeline;
pub mod relationship_extractor;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub use pipeline::IngestionPipeline;

/// Bounded multi-producer, multi-consumer worker pool: one lightweight task
/// per patient in the queue, `pool_size` of them running concurrently. The
/// channel itself is the backpressure — a full queue blocks producers
/// instead of growing without bound.
pub async fn run_worker_loop(
    pipeline: Arc<IngestionPipeline>,
    mut patients: mpsc::Receiver<String>,
    pool_size: usize,
) {
    let pool_size = pool_size.max(1);
    let mut handles = Vec::with_capacity(pool_size);
    let (work_tx, work_rx) = async_channel(pool_size.max(8));

    for worker_id in 0..pool_size {
        let pipeline = pipeline.clone();
        let work_rx = work_rx.clone();
        handles.push(tokio::spawn(async move {
            while let Ok(patient_id) = work_rx.recv().await {
                info!(worker_id, %patient_id, "ingestion worker claimed patient");
                match pipeline.process_patient(&patient_id).await {
                    Ok(summary) => info!(
                        worker_id,
                        %patient_id,
                        artifacts = summary.artifacts_normalized,
                        chunks = summary.chunks_stored,
                        "ingestion pipeline finished for patient"
                    ),
                    Err(err) => error!(worker_id, %patient_id, error = %err, "ingestion pipeline failed"),
                }
            }
        }));
    }

    while let Some(patient_id) = patients.recv().await {
        if work_tx.send(patient_id).await.is_err() {
            warn!("ingestion worker pool closed while patients were still queued");
            break;
        }
    }
    drop(work_tx);

    for handle in handles {
        let _ = handle.await;
    }
}

/// A small wrapper around `async_channel`-style MPMC semantics built from
/// `tokio::sync::mpsc` plus a cheaply cloneable receiver, so every worker in
/// the pool can pull from the same bounded queue.
fn async_channel(capacity: usize) -> (mpsc::Sender<String>, SharedReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, SharedReceiver::new(rx))
}

#[derive(Clone)]
struct SharedReceiver(Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>);

impl SharedReceiver {
    fn new(rx: mpsc::Receiver<String>) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(rx)))
    }

    async fn recv(&self) -> Result<String, ()> {
        self.0.lock().await.recv().await.ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn shared_receiver_distributes_work_across_clones() {
        let (tx, rx) = async_channel(8);
        for i in 0..4 {
            tx.send(format!("p{i}")).await.unwrap();
        }
        drop(tx);

        let received = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let rx = rx.clone();
            let received = received.clone();
            handles.push(tokio::spawn(async move {
                while rx.recv().await.is_ok() {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(received.load(Ordering::SeqCst), 4);
    }
}
