//! Retrieval side of the pipeline: metadata-prefiltered vector search,
//! multi-hop relationship expansion, confidence scoring, provenance
//! formatting, and final response assembly.

pub mod confidence;
pub mod highlight;
pub mod metadata_filter;
pub mod multi_hop;
pub mod pipeline;
pub mod provenance;
pub mod response_builder;
pub mod retriever;
pub mod types;
pub mod vector_index;

pub use pipeline::RetrievalPipeline;
pub use retriever::Retriever;
pub use vector_index::SurrealVectorIndex;
