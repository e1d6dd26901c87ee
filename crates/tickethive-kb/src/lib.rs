pub mod embedding;
pub mod index;
pub mod indexer;
pub mod parser;
pub mod retriever;

pub use embedding::{
    EmbeddingProvider, EmbeddingResult, OllamaEmbeddingProvider, OpenAiEmbeddingProvider,
    StubEmbeddingProvider,
};
pub use index::{cosine_similarity, IndexedEntry, KbIndex, KbSnapshot};
pub use indexer::{KbIndexer, ReindexOutcome};
pub use parser::parse_kb_text;
pub use retriever::{KbRetriever, RetrievedEntry};
