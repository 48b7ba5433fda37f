use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn expand(&self, ratio: f32) -> BoundingBox {
        let dx = self.width() * ratio;
        let dy = self.height() * ratio;
        BoundingBox {
            x0: (self.x0 - dx).max(0.0),
            y0: (self.y0 - dy).max(0.0),
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }

    pub fn clip(&self, width: f32, height: f32) -> BoundingBox {
        BoundingBox {
            x0: self.x0.clamp(0.0, width),
            y0: self.y0.clamp(0.0, height),
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn overlaps_horizontally(&self, other: &BoundingBox) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Figure {
    pub figure_id: String,
    pub page: u32,
    pub bbox: Option<BoundingBox>,
    pub image_path: String,
    #[serde(default)]
    pub caption: String,
    pub source: String,
    pub size: u64,
    #[serde(default)]
    pub is_vector: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formula {
    pub formula_id: String,
    pub page: u32,
    pub bbox: Option<BoundingBox>,
    pub image_path: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub latex: String,
    #[serde(default)]
    pub context: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    Figure(Figure),
    Formula(Formula),
}

impl Asset {
    pub fn id(&self) -> &str {
        match self {
            Asset::Figure(figure) => &figure.figure_id,
            Asset::Formula(formula) => &formula.formula_id,
        }
    }

    pub fn image_path(&self) -> &str {
        match self {
            Asset::Figure(figure) => &figure.image_path,
            Asset::Formula(formula) => &formula.image_path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub source: String,
    pub page: Option<u32>,
}

impl TextChunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>, page: u32) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            page: Some(page),
        }
    }

    pub fn source_name(&self) -> &str {
        source_basename(&self.source)
    }

    /// `<source basename>_p<page>_<8 hex of sha256(content)>`.
    pub fn chunk_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let page = self.page.map(|page| page.to_string()).unwrap_or_else(|| "0".to_string());
        format!("{}_p{}_{}", self.source_name(), page, &digest[..8])
    }
}

pub fn source_basename(source: &str) -> &str {
    if source.is_empty() {
        return "unknown";
    }
    Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(source)
}

pub fn source_stem(source: &Path) -> String {
    source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document")
        .to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FormulaStrategy {
    #[default]
    Numbered,
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub min_figure_bytes: usize,
    pub undecodable_min_bytes: usize,
    pub min_figure_side: u32,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    pub min_pixel_variance: f64,
    pub caption_max_chars: usize,
    pub vector_caption_gap: f32,
    pub vector_scan_height: f32,
    pub vector_side_margin: f32,
    pub vector_render_scale: f32,
    pub formula_margin: f32,
    pub heuristic_render_scale: f32,
    pub numbered_render_scale: f32,
    pub equation_number_min_x: f32,
    pub equation_band: f32,
    pub fallback_padding: f32,
    pub fallback_left_margin: f32,
    pub min_fallback_ocr_chars: usize,
    pub ocr_max_edge: u32,
    pub context_max_chars: usize,
    pub formula_strategy: FormulaStrategy,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            min_figure_bytes: 10 * 1024,
            undecodable_min_bytes: 20 * 1024,
            min_figure_side: 100,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 10.0,
            min_pixel_variance: 100.0,
            caption_max_chars: 200,
            vector_caption_gap: 50.0,
            vector_scan_height: 300.0,
            vector_side_margin: 50.0,
            vector_render_scale: 2.0,
            formula_margin: 0.15,
            heuristic_render_scale: 300.0 / 72.0,
            numbered_render_scale: 2.0,
            equation_number_min_x: 0.6,
            equation_band: 60.0,
            fallback_padding: 20.0,
            fallback_left_margin: 5.0,
            min_fallback_ocr_chars: 3,
            ocr_max_edge: 800,
            context_max_chars: 100,
            formula_strategy: FormulaStrategy::Numbered,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub proximity_window: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalOptions {
    pub k: usize,
    pub max_images: usize,
    pub source_filter: Option<String>,
    pub page_window: u32,
    pub max_total: usize,
    /// Candidate pool for diversified search; raised to the requested count when smaller.
    pub fetch_k: Option<usize>,
    pub neighbor_k: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: 10,
            max_images: 6,
            source_filter: None,
            page_window: 1,
            max_total: 12,
            fetch_k: None,
            neighbor_k: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextBundle {
    pub text: String,
    pub figure_paths: Vec<String>,
    pub formula_paths: Vec<String>,
    pub chunks: Vec<TextChunk>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.figure_paths.is_empty() && self.formula_paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStatistics {
    pub total_figures: usize,
    pub total_formulas: usize,
    pub chunks_with_figures: usize,
    pub chunks_with_formulas: usize,
    pub figure_links: usize,
    pub formula_links: usize,
}

impl std::fmt::Display for IndexStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "figures: {}", self.total_figures)?;
        writeln!(f, "formulas: {}", self.total_formulas)?;
        writeln!(f, "chunks with figures: {}", self.chunks_with_figures)?;
        writeln!(f, "chunks with formulas: {}", self.chunks_with_formulas)?;
        writeln!(f, "figure links: {}", self.figure_links)?;
        write!(f, "formula links: {}", self.formula_links)
    }
}
