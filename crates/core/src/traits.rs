use crate::error::{IngestError, SearchError};
use crate::layout::DocumentLayout;
use crate::models::{BoundingBox, TextChunk};
use image::DynamicImage;
use std::path::Path;

pub trait LayoutReader {
    fn read_layout(&self, path: &Path) -> Result<DocumentLayout, IngestError>;
}

pub trait PageRasterizer {
    /// Renders `clip` (page units, top-left origin) of the 0-based `page` at `scale` pixels per unit.
    fn render(
        &self,
        document: &Path,
        page: u32,
        clip: &BoundingBox,
        scale: f32,
    ) -> Result<DynamicImage, IngestError>;
}

pub trait FormulaRecognizer {
    /// `label` names the rendered asset (its file name) for services that log or key on it.
    fn recognize(&self, image: &DynamicImage, label: &str) -> Result<String, IngestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Similarity,
    /// Maximal-marginal-relevance selection out of `fetch_k` nearest candidates.
    Diversified { fetch_k: usize },
}

/// Exact-match metadata filter for neighbour lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub source: Option<String>,
    pub page: Option<u32>,
}

impl ChunkFilter {
    pub fn matches(&self, chunk: &TextChunk) -> bool {
        let source_ok = self
            .source
            .as_ref()
            .map_or(true, |source| &chunk.source == source);
        let page_ok = self.page.map_or(true, |page| chunk.page == Some(page));
        source_ok && page_ok
    }
}

pub trait VectorIndex {
    fn search(&self, query: &str, k: usize, mode: SearchMode) -> Result<Vec<TextChunk>, SearchError>;

    fn supports_diversified(&self) -> bool {
        true
    }

    fn search_with_filter(
        &self,
        query: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<TextChunk>, SearchError>;
}

pub trait RelevanceScorer {
    fn score(&self, query: &str, chunk: &TextChunk) -> f64;
}
