pub mod chunker;
pub mod embedding;

pub use chunker::{chunk, ChunkConfig};
pub use embedding::{cosine_similarity, LocalHashEmbedder};
