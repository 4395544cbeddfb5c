use crate::stored_object;

/// Embedding vector for a chunk, stored in its own table so the HNSW index
/// lives next to the vector column exclusively — mirrors the teacher's
/// split between a chunk row and its embedding row.
stored_object!(ChunkEmbedding, "chunk_embedding", {
    chunk_id: String,
    patient_id: String,
    embedding: Vec<f32>
});
