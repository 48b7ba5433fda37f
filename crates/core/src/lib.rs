pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod figures;
pub mod formulas;
pub mod index;
pub mod ingest;
pub mod layout;
pub mod linker;
pub mod models;
pub mod orchestrator;
pub mod raster;
pub mod recognizer;
pub mod rerank;
pub mod rules;
pub mod traits;
pub mod vector;

pub use chunking::{build_chunks, chunk_by_paragraph, normalize_whitespace, ChunkingConfig};
pub use embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IndexError, IngestError, SearchError};
pub use extractor::{
    AssetExtractor, AssetOutcome, BatchExtraction, DocumentAssets, PageText, SkippedAsset,
    SkippedPdf,
};
pub use index::{MultimodalIndex, SnapshotMetadata, INDEX_FILE};
pub use ingest::{discover_pdf_files, IndexingReport, KnowledgeBase};
pub use layout::{DocumentLayout, LopdfLayoutReader, PageLayout};
pub use linker::{ContentLinker, LinkReport};
pub use models::{
    Asset, BoundingBox, ContextBundle, ExtractionOptions, Figure, Formula, FormulaStrategy,
    IndexStatistics, LinkOptions, RetrievalOptions, TextChunk,
};
pub use orchestrator::RetrievalOrchestrator;
pub use raster::PdfiumRasterizer;
pub use recognizer::{HttpFormulaRecognizer, OcrEndpointConfig, RecognitionCache};
pub use rerank::{rerank, LexicalScorer};
pub use traits::{
    ChunkFilter, FormulaRecognizer, LayoutReader, PageRasterizer, RelevanceScorer, SearchMode,
    VectorIndex,
};
pub use vector::NgramVectorIndex;
