use crate::error::IngestError;
use crate::figures::FigureHeuristics;
use crate::formulas::FormulaHeuristics;
use crate::layout::{LopdfLayoutReader, PageLayout, SkippedPage};
use crate::models::{
    source_stem, Asset, BoundingBox, ExtractionOptions, Figure, Formula, FormulaStrategy,
};
use crate::recognizer::{RecognitionCache, RecognitionService, OCR_CACHE_FILE};
use crate::traits::{FormulaRecognizer, LayoutReader, PageRasterizer};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetOutcome {
    Extracted(Asset),
    Skipped { asset: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedAsset {
    pub asset: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentAssets {
    pub source: PathBuf,
    pub figures: Vec<Figure>,
    pub formulas: Vec<Formula>,
    pub skipped: Vec<SkippedAsset>,
    pub skipped_pages: Vec<SkippedPage>,
    pub pages: Vec<PageText>,
}

impl DocumentAssets {
    fn record(&mut self, outcome: AssetOutcome) {
        match outcome {
            AssetOutcome::Extracted(Asset::Figure(figure)) => self.figures.push(figure),
            AssetOutcome::Extracted(Asset::Formula(formula)) => self.formulas.push(formula),
            AssetOutcome::Skipped { asset, reason } => {
                debug!(%asset, %reason, "asset skipped");
                self.skipped.push(SkippedAsset { asset, reason });
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchExtraction {
    pub documents: Vec<DocumentAssets>,
    pub failed: Vec<SkippedPdf>,
}

pub struct AssetExtractor {
    reader: Box<dyn LayoutReader>,
    rasterizer: Option<Box<dyn PageRasterizer>>,
    recognition: RecognitionService,
    figures: FigureHeuristics,
    formulas: FormulaHeuristics,
    figures_dir: PathBuf,
    formulas_dir: PathBuf,
}

impl AssetExtractor {
    pub fn new(
        options: ExtractionOptions,
        figures_dir: impl Into<PathBuf>,
        formulas_dir: impl Into<PathBuf>,
    ) -> Result<Self, IngestError> {
        let formulas_dir = formulas_dir.into();
        let cache = RecognitionCache::load(formulas_dir.join(OCR_CACHE_FILE));
        Ok(Self {
            reader: Box::new(LopdfLayoutReader),
            rasterizer: None,
            recognition: RecognitionService::new(None, cache, options.ocr_max_edge),
            figures: FigureHeuristics::new(options.clone())?,
            formulas: FormulaHeuristics::new(options)?,
            figures_dir: figures_dir.into(),
            formulas_dir,
        })
    }

    pub fn with_reader(mut self, reader: impl LayoutReader + 'static) -> Self {
        self.reader = Box::new(reader);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: impl PageRasterizer + 'static) -> Self {
        self.rasterizer = Some(Box::new(rasterizer));
        self
    }

    pub fn with_recognizer(mut self, recognizer: impl FormulaRecognizer + 'static) -> Self {
        let cache = RecognitionCache::load(self.formulas_dir.join(OCR_CACHE_FILE));
        let max_edge = self.figures.options().ocr_max_edge;
        self.recognition = RecognitionService::new(Some(Box::new(recognizer)), cache, max_edge);
        self
    }

    pub fn options(&self) -> &ExtractionOptions {
        self.figures.options()
    }

    pub fn extract_all(&mut self, paths: &[PathBuf]) -> BatchExtraction {
        let mut batch = BatchExtraction::default();
        for path in paths {
            match self.extract_document(path) {
                Ok(assets) => batch.documents.push(assets),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping document");
                    batch.failed.push(SkippedPdf {
                        path: path.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }
        batch
    }

    pub fn extract_document(&mut self, path: &Path) -> Result<DocumentAssets, IngestError> {
        let layout = self.reader.read_layout(path)?;
        fs::create_dir_all(&self.figures_dir)?;
        fs::create_dir_all(&self.formulas_dir)?;

        let stem = source_stem(path);
        let mut assets = DocumentAssets {
            source: path.to_path_buf(),
            skipped_pages: layout.skipped_pages.clone(),
            ..DocumentAssets::default()
        };

        for page in &layout.pages {
            let text = page.text();
            if !text.trim().is_empty() {
                assets.pages.push(PageText {
                    number: page.index,
                    text,
                });
            }

            let raster = self.raster_figures(path, &stem, page);
            let page_figures: Vec<Figure> = raster
                .iter()
                .filter_map(|outcome| match outcome {
                    AssetOutcome::Extracted(Asset::Figure(figure)) => Some(figure.clone()),
                    _ => None,
                })
                .collect();
            for outcome in raster {
                assets.record(outcome);
            }
            for outcome in self.vector_figures(path, &stem, page, &page_figures) {
                assets.record(outcome);
            }
            for outcome in self.page_formulas(path, &stem, page) {
                assets.record(outcome);
            }
        }

        if let Err(error) = self.recognition.persist() {
            warn!(%error, "could not save OCR cache");
        }

        info!(
            path = %path.display(),
            figures = assets.figures.len(),
            formulas = assets.formulas.len(),
            skipped = assets.skipped.len(),
            skipped_pages = assets.skipped_pages.len(),
            "extracted document assets"
        );
        Ok(assets)
    }

    fn raster_figures(&self, path: &Path, stem: &str, page: &PageLayout) -> Vec<AssetOutcome> {
        page.images
            .iter()
            .map(|image| {
                let figure_id = format!("{stem}_fig_p{}_i{}", page.index, image.index);
                if let Err(rule) = self.figures.check_bytes(&image.bytes) {
                    return AssetOutcome::Skipped {
                        asset: figure_id,
                        reason: format!("rejected by {rule} rule"),
                    };
                }

                let image_path = self
                    .figures_dir
                    .join(format!("{figure_id}.{}", image.extension));
                if let Err(error) = fs::write(&image_path, &image.bytes) {
                    return AssetOutcome::Skipped {
                        asset: figure_id,
                        reason: format!("write failed: {error}"),
                    };
                }

                AssetOutcome::Extracted(Asset::Figure(Figure {
                    caption: self.figures.locate_caption(page, image.bbox.as_ref()),
                    figure_id,
                    page: page.index,
                    bbox: image.bbox,
                    image_path: image_path.to_string_lossy().to_string(),
                    source: path.to_string_lossy().to_string(),
                    size: image.bytes.len() as u64,
                    is_vector: false,
                }))
            })
            .collect()
    }

    fn vector_figures(
        &self,
        path: &Path,
        stem: &str,
        page: &PageLayout,
        existing: &[Figure],
    ) -> Vec<AssetOutcome> {
        let scale = self.options().vector_render_scale;
        let mut outcomes = Vec::new();
        let mut rendered = 0usize;

        for region in self.figures.vector_regions(page, existing) {
            let figure_id = format!("{stem}_vec_p{}_{}", page.index, existing.len() + rendered);
            let image_path = self.figures_dir.join(format!("{figure_id}.png"));
            match self.render_to_file(path, page.index, &region.capture, scale, &image_path) {
                Ok(_) => {
                    let size = fs::metadata(&image_path).map(|meta| meta.len()).unwrap_or(0);
                    rendered += 1;
                    outcomes.push(AssetOutcome::Extracted(Asset::Figure(Figure {
                        figure_id,
                        page: page.index,
                        bbox: Some(region.capture),
                        image_path: image_path.to_string_lossy().to_string(),
                        caption: region.caption,
                        source: path.to_string_lossy().to_string(),
                        size,
                        is_vector: true,
                    })));
                }
                Err(error) => outcomes.push(AssetOutcome::Skipped {
                    asset: figure_id,
                    reason: error.to_string(),
                }),
            }
        }

        outcomes
    }

    fn page_formulas(&mut self, path: &Path, stem: &str, page: &PageLayout) -> Vec<AssetOutcome> {
        match self.options().formula_strategy {
            FormulaStrategy::Numbered => self.numbered_formulas(path, stem, page),
            FormulaStrategy::Heuristic => self.heuristic_formulas(path, stem, page),
        }
    }

    fn heuristic_formulas(&mut self, path: &Path, stem: &str, page: &PageLayout) -> Vec<AssetOutcome> {
        let options = self.options().clone();
        let mut outcomes = Vec::new();

        for block_index in self.formulas.heuristic_blocks(page) {
            let block = &page.blocks[block_index];
            let formula_id = format!("{stem}_eq_p{}_b{block_index}", page.index);
            let file_name = format!("{formula_id}.png");
            let image_path = self.formulas_dir.join(&file_name);
            let clip = block.bbox.expand(options.formula_margin).clip(page.width, page.height);

            let image = match self.render_to_file(
                path,
                page.index,
                &clip,
                options.heuristic_render_scale,
                &image_path,
            ) {
                Ok(image) => image,
                Err(error) => {
                    outcomes.push(AssetOutcome::Skipped {
                        asset: formula_id,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            let latex = self.recognition.recognize(&file_name, &image);
            outcomes.push(AssetOutcome::Extracted(Asset::Formula(Formula {
                formula_id,
                page: page.index,
                bbox: Some(block.bbox),
                image_path: image_path.to_string_lossy().to_string(),
                text: block.text(),
                latex,
                context: self.formulas.context_snippet(page, block_index),
                source: path.to_string_lossy().to_string(),
            })));
        }

        outcomes
    }

    fn numbered_formulas(&mut self, path: &Path, stem: &str, page: &PageLayout) -> Vec<AssetOutcome> {
        let options = self.options().clone();
        let mut outcomes = Vec::new();

        for equation in self.formulas.numbered_equations(page) {
            let number = &equation.number.number;
            let formula_id = format!("{stem}_eq_p{}_{}", page.index, number.replace('.', "_"));
            let file_name = format!("{formula_id}.png");
            let image_path = self.formulas_dir.join(&file_name);
            let clip = equation
                .bbox
                .expand(options.formula_margin)
                .clip(page.width, page.height);

            let image = match self.render_to_file(
                path,
                page.index,
                &clip,
                options.numbered_render_scale,
                &image_path,
            ) {
                Ok(image) => image,
                Err(error) => {
                    outcomes.push(AssetOutcome::Skipped {
                        asset: formula_id,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            let latex = self.recognition.recognize(&file_name, &image);
            if equation.is_fallback && latex.chars().count() < options.min_fallback_ocr_chars {
                if let Err(error) = fs::remove_file(&image_path) {
                    warn!(path = %image_path.display(), %error, "could not remove blind capture");
                }
                outcomes.push(AssetOutcome::Skipped {
                    asset: formula_id,
                    reason: format!("blind capture recognised as {:?}", latex),
                });
                continue;
            }

            let body = if equation.is_fallback {
                latex.clone()
            } else {
                equation.body_text(page)
            };
            outcomes.push(AssetOutcome::Extracted(Asset::Formula(Formula {
                formula_id,
                page: page.index,
                bbox: Some(equation.bbox),
                image_path: image_path.to_string_lossy().to_string(),
                text: format!("{body} ({number})").trim().to_string(),
                latex,
                context: self
                    .formulas
                    .context_snippet(page, equation.number.block_index),
                source: path.to_string_lossy().to_string(),
            })));
        }

        outcomes
    }

    fn render_to_file(
        &self,
        document: &Path,
        page: u32,
        clip: &BoundingBox,
        scale: f32,
        target: &Path,
    ) -> Result<DynamicImage, IngestError> {
        let rasterizer = self
            .rasterizer
            .as_ref()
            .ok_or_else(|| IngestError::Render("no page rasterizer configured".to_string()))?;
        if clip.is_empty() {
            return Err(IngestError::Render(format!(
                "empty region {:?} on page {page}",
                clip.as_array()
            )));
        }
        let image = rasterizer.render(document, page, clip, scale)?;
        image.save(target)?;
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DocumentLayout, EmbeddedImage, TextBlock};
    use image::{ImageOutputFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::tempdir;

    struct FixedLayout {
        pages: Vec<PageLayout>,
    }

    impl LayoutReader for FixedLayout {
        fn read_layout(&self, path: &Path) -> Result<DocumentLayout, IngestError> {
            if path.to_string_lossy().contains("broken") {
                return Err(IngestError::PdfParse("not a pdf".to_string()));
            }
            Ok(DocumentLayout {
                source: path.to_path_buf(),
                pages: self.pages.clone(),
                skipped_pages: Vec::new(),
            })
        }
    }

    struct StripedRasterizer;

    impl PageRasterizer for StripedRasterizer {
        fn render(
            &self,
            _document: &Path,
            _page: u32,
            clip: &BoundingBox,
            scale: f32,
        ) -> Result<DynamicImage, IngestError> {
            let width = ((clip.width() * scale) as u32).max(1);
            let height = ((clip.height() * scale) as u32).max(1);
            let image = image::GrayImage::from_fn(width, height, |x, _| Luma([(x % 2 * 255) as u8]));
            Ok(DynamicImage::ImageLuma8(image))
        }
    }

    struct FixedRecognizer(&'static str);

    impl FormulaRecognizer for FixedRecognizer {
        fn recognize(&self, _image: &DynamicImage, _label: &str) -> Result<String, IngestError> {
            Ok(self.0.to_string())
        }
    }

    fn noise_png(width: u32, height: u32) -> Vec<u8> {
        let mut state = 0x9e37_79b9_u32;
        let image = RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        });
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .expect("png encodes");
        bytes.into_inner()
    }

    fn page(blocks: Vec<TextBlock>, images: Vec<EmbeddedImage>) -> PageLayout {
        PageLayout {
            index: 0,
            width: 600.0,
            height: 800.0,
            blocks,
            images,
        }
    }

    fn extractor(dir: &Path, pages: Vec<PageLayout>) -> AssetExtractor {
        AssetExtractor::new(ExtractionOptions::default(), dir.join("figures"), dir.join("formulas"))
            .expect("patterns compile")
            .with_reader(FixedLayout { pages })
    }

    #[test]
    fn uncovered_caption_yields_one_vector_figure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = page(
            vec![TextBlock::single(
                "Figure 3. Block diagram",
                BoundingBox::new(80.0, 400.0, 320.0, 412.0),
            )],
            Vec::new(),
        );
        let mut extractor = extractor(dir.path(), vec![layout]).with_rasterizer(StripedRasterizer);

        let assets = extractor.extract_document(Path::new("/docs/regulators.pdf"))?;

        assert_eq!(assets.figures.len(), 1);
        let figure = &assets.figures[0];
        assert!(figure.is_vector);
        assert_eq!(figure.figure_id, "regulators_vec_p0_0");
        assert_eq!(figure.caption, "Figure 3. Block diagram");
        assert!(Path::new(&figure.image_path).exists());
        assert!(figure.size > 0);
        Ok(())
    }

    #[test]
    fn raster_figures_are_filtered_and_captioned() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = page(
            vec![
                TextBlock::single("Figure 1. Input stage", BoundingBox::new(100.0, 320.0, 320.0, 332.0)),
                TextBlock::single("Figure 4. Compensation network", BoundingBox::new(100.0, 700.0, 420.0, 712.0)),
            ],
            vec![
                EmbeddedImage {
                    index: 0,
                    bytes: vec![7u8; 2048],
                    extension: "png".to_string(),
                    bbox: Some(BoundingBox::new(10.0, 10.0, 30.0, 30.0)),
                },
                EmbeddedImage {
                    index: 1,
                    bytes: noise_png(300, 300),
                    extension: "png".to_string(),
                    bbox: Some(BoundingBox::new(100.0, 100.0, 500.0, 300.0)),
                },
            ],
        );
        let mut extractor = extractor(dir.path(), vec![layout]).with_rasterizer(StripedRasterizer);

        let assets = extractor.extract_document(Path::new("/docs/amp.pdf"))?;

        let raster: Vec<&Figure> = assets.figures.iter().filter(|figure| !figure.is_vector).collect();
        assert_eq!(raster.len(), 1);
        assert_eq!(raster[0].figure_id, "amp_fig_p0_i1");
        assert_eq!(raster[0].caption, "Figure 1. Input stage");
        assert_eq!(raster[0].source, "/docs/amp.pdf");

        let vector: Vec<&Figure> = assets.figures.iter().filter(|figure| figure.is_vector).collect();
        assert_eq!(vector.len(), 1);
        assert_eq!(vector[0].figure_id, "amp_vec_p0_1");
        assert_eq!(vector[0].caption, "Figure 4. Compensation network");

        assert_eq!(assets.skipped.len(), 1);
        assert_eq!(assets.skipped[0].asset, "amp_fig_p0_i0");
        assert!(assets.skipped[0].reason.contains("min-bytes"));
        Ok(())
    }

    #[test]
    fn numbered_formula_uses_union_bbox_and_recognised_latex() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = page(
            vec![
                TextBlock::single("The divider sets the output。输出电压为", BoundingBox::new(72.0, 250.0, 520.0, 262.0)),
                TextBlock::single("V_OUT = V_REF (1 + R_1/R_2)", BoundingBox::new(150.0, 300.0, 380.0, 318.0)),
                TextBlock::single("(3.12)", BoundingBox::new(520.0, 302.0, 560.0, 316.0)),
            ],
            Vec::new(),
        );
        let mut extractor = extractor(dir.path(), vec![layout])
            .with_rasterizer(StripedRasterizer)
            .with_recognizer(FixedRecognizer("V_{OUT}=V_{REF}(1+R_1/R_2)"));

        let assets = extractor.extract_document(Path::new("ldo.pdf"))?;

        assert_eq!(assets.formulas.len(), 1);
        let formula = &assets.formulas[0];
        assert_eq!(formula.formula_id, "ldo_eq_p0_3_12");
        assert_eq!(formula.bbox, Some(BoundingBox::new(150.0, 300.0, 560.0, 318.0)));
        assert_eq!(formula.text, "V_OUT = V_REF (1 + R_1/R_2) (3.12)");
        assert_eq!(formula.latex, "V_{OUT}=V_{REF}(1+R_1/R_2)");
        assert!(Path::new(&formula.image_path).exists());

        let cache = RecognitionCache::load(dir.path().join("formulas").join(OCR_CACHE_FILE));
        assert_eq!(cache.get("ldo_eq_p0_3_12.png"), Some("V_{OUT}=V_{REF}(1+R_1/R_2)"));
        Ok(())
    }

    #[test]
    fn blind_capture_without_recognition_is_discarded() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = page(
            vec![TextBlock::single("(2.7)", BoundingBox::new(520.0, 402.0, 560.0, 416.0))],
            Vec::new(),
        );
        let mut extractor = extractor(dir.path(), vec![layout]).with_rasterizer(StripedRasterizer);

        let assets = extractor.extract_document(Path::new("ldo.pdf"))?;

        assert!(assets.formulas.is_empty());
        assert_eq!(assets.skipped.len(), 1);
        assert_eq!(assets.skipped[0].asset, "ldo_eq_p0_2_7");
        assert!(!dir.path().join("formulas").join("ldo_eq_p0_2_7.png").exists());
        Ok(())
    }

    #[test]
    fn heuristic_strategy_classifies_blocks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = page(
            vec![
                TextBlock::single("The ripple current is", BoundingBox::new(72.0, 100.0, 300.0, 112.0)),
                TextBlock::single("ΔI_L = (V_in - V_out) D / (f L)", BoundingBox::new(150.0, 130.0, 400.0, 146.0)),
            ],
            Vec::new(),
        );
        let options = ExtractionOptions {
            formula_strategy: FormulaStrategy::Heuristic,
            ..ExtractionOptions::default()
        };
        let mut extractor = AssetExtractor::new(options, dir.path().join("figures"), dir.path().join("formulas"))?
            .with_reader(FixedLayout { pages: vec![layout] })
            .with_rasterizer(StripedRasterizer);

        let assets = extractor.extract_document(Path::new("buck.pdf"))?;

        assert_eq!(assets.formulas.len(), 1);
        assert_eq!(assets.formulas[0].formula_id, "buck_eq_p0_b1");
        assert_eq!(assets.formulas[0].context, "The ripple current is");
        assert_eq!(assets.formulas[0].latex, "");
        Ok(())
    }

    #[test]
    fn missing_rasterizer_skips_rendered_assets_only() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = page(
            vec![TextBlock::single("Figure 9. Layout", BoundingBox::new(80.0, 400.0, 320.0, 412.0))],
            Vec::new(),
        );
        let mut extractor = extractor(dir.path(), vec![layout]);

        let assets = extractor.extract_document(Path::new("board.pdf"))?;

        assert!(assets.figures.is_empty());
        assert_eq!(assets.skipped.len(), 1);
        assert!(assets.skipped[0].reason.contains("rasterizer"));
        assert_eq!(assets.pages.len(), 1);
        Ok(())
    }

    #[test]
    fn batch_continues_past_unopenable_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut extractor = extractor(dir.path(), vec![page(Vec::new(), Vec::new())]);

        let batch = extractor.extract_all(&[PathBuf::from("broken.pdf"), PathBuf::from("good.pdf")]);

        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0].source, PathBuf::from("good.pdf"));
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].path, PathBuf::from("broken.pdf"));
        Ok(())
    }
}
