use crate::chunking::{build_chunks, ChunkingConfig};
use crate::error::IngestError;
use crate::extractor::{AssetExtractor, SkippedAsset, SkippedPdf};
use crate::index::{MultimodalIndex, INDEX_FILE};
use crate::linker::{ContentLinker, LinkReport};
use crate::models::{source_basename, ExtractionOptions, Figure, Formula, LinkOptions, TextChunk};
use crate::orchestrator::RetrievalOrchestrator;
use crate::vector::{NgramVectorIndex, VECTOR_INDEX_FILE};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub const FIGURES_DIR: &str = "figures";
pub const FORMULAS_DIR: &str = "formulas";

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Default)]
pub struct IndexingReport {
    pub documents: usize,
    pub figures: usize,
    pub formulas: usize,
    pub chunks: usize,
    pub links: LinkReport,
    pub skipped_assets: Vec<SkippedAsset>,
    pub skipped_pages: usize,
    pub failed: Vec<SkippedPdf>,
}

impl fmt::Display for IndexingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "documents indexed: {}", self.documents)?;
        writeln!(f, "figures: {}", self.figures)?;
        writeln!(f, "formulas: {}", self.formulas)?;
        writeln!(f, "text chunks: {}", self.chunks)?;
        writeln!(
            f,
            "links: {} figure, {} formula, {} proximity",
            self.links.figure_links, self.links.formula_links, self.links.proximity_links
        )?;
        writeln!(f, "skipped assets: {}", self.skipped_assets.len())?;
        writeln!(f, "skipped pages: {}", self.skipped_pages)?;
        write!(f, "failed documents: {}", self.failed.len())
    }
}

pub struct KnowledgeBase {
    documents_dir: PathBuf,
    vector_path: PathBuf,
    extractor: AssetExtractor,
    linker: ContentLinker,
    index: MultimodalIndex,
    vectors: NgramVectorIndex,
    chunking: ChunkingConfig,
    link_options: LinkOptions,
}

impl KnowledgeBase {
    pub fn open(
        data_dir: &Path,
        documents_dir: impl Into<PathBuf>,
        options: ExtractionOptions,
    ) -> Result<Self, IngestError> {
        let vector_path = data_dir.join(VECTOR_INDEX_FILE);
        let index = MultimodalIndex::open(data_dir.join(INDEX_FILE))?;
        let vectors = NgramVectorIndex::load(&vector_path)?;
        let extractor = AssetExtractor::new(
            options,
            data_dir.join(FIGURES_DIR),
            data_dir.join(FORMULAS_DIR),
        )?;
        info!(
            data_dir = %data_dir.display(),
            figures = index.statistics().total_figures,
            formulas = index.statistics().total_formulas,
            chunks = vectors.len(),
            "opened knowledge base"
        );

        Ok(Self {
            documents_dir: documents_dir.into(),
            vector_path,
            extractor,
            linker: ContentLinker::new()?,
            index,
            vectors,
            chunking: ChunkingConfig::default(),
            link_options: LinkOptions::default(),
        })
    }

    pub fn with_extractor(mut self, configure: impl FnOnce(AssetExtractor) -> AssetExtractor) -> Self {
        self.extractor = configure(self.extractor);
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_link_options(mut self, link_options: LinkOptions) -> Self {
        self.link_options = link_options;
        self
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn index(&self) -> &MultimodalIndex {
        &self.index
    }

    pub fn vectors(&self) -> &NgramVectorIndex {
        &self.vectors
    }

    pub fn orchestrator(&self) -> Result<RetrievalOrchestrator<'_, NgramVectorIndex>, IngestError> {
        let vectors = (!self.vectors.is_empty()).then_some(&self.vectors);
        RetrievalOrchestrator::new(vectors, &self.index)
    }

    pub fn rebuild(&mut self, target: Option<&str>) -> Result<IndexingReport, IngestError> {
        let files = discover_pdf_files(&self.documents_dir);

        let files = match target {
            Some(target) => {
                let name = source_basename(target);
                let selected: Vec<PathBuf> = files
                    .into_iter()
                    .filter(|path| path.file_name().is_some_and(|file| file.to_string_lossy() == name))
                    .collect();
                if selected.is_empty() {
                    return Err(IngestError::InvalidArgument(format!(
                        "document {name} not found in {}",
                        self.documents_dir.display()
                    )));
                }
                let assets = self.index.remove_source(name);
                let chunks = self.vectors.remove_source(name);
                info!(document = name, assets, chunks, "dropped previous entries");
                selected
            }
            None => {
                if files.is_empty() {
                    return Err(IngestError::InvalidArgument(format!(
                        "no pdf files found in {}",
                        self.documents_dir.display()
                    )));
                }
                self.index.clear();
                self.vectors.clear();
                files
            }
        };

        self.index_documents(&files)
    }

    /// Indexes the documents not yet present in the vector index; `force` rebuilds all.
    pub fn sync(&mut self, force: bool) -> Result<IndexingReport, IngestError> {
        if force {
            return self.rebuild(None);
        }

        let known = self.vectors.sources();
        let fresh: Vec<PathBuf> = discover_pdf_files(&self.documents_dir)
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| !known.contains(&*name.to_string_lossy()))
            })
            .collect();

        if fresh.is_empty() {
            info!(documents_dir = %self.documents_dir.display(), "knowledge base is up to date");
            return Ok(IndexingReport::default());
        }
        info!(documents = fresh.len(), "indexing new documents");
        self.index_documents(&fresh)
    }

    fn index_documents(&mut self, files: &[PathBuf]) -> Result<IndexingReport, IngestError> {
        let batch = self.extractor.extract_all(files);
        let mut report = IndexingReport {
            failed: batch.failed,
            ..IndexingReport::default()
        };

        for document in batch.documents {
            report.documents += 1;
            report.figures += document.figures.len();
            report.formulas += document.formulas.len();
            report.skipped_pages += document.skipped_pages.len();
            report.skipped_assets.extend(document.skipped);

            for figure in document.figures {
                self.index.add_figure(figure);
            }
            for formula in document.formulas {
                self.index.add_formula(formula);
            }

            let source = document.source.to_string_lossy();
            let chunks = build_chunks(&source, &document.pages, self.chunking);
            report.chunks += self.vectors.add_chunks(chunks);
        }

        let chunks: Vec<TextChunk> = self.vectors.chunks().cloned().collect();
        let figures: Vec<Figure> = self.index.figures().cloned().collect();
        let formulas: Vec<Formula> = self.index.formulas().cloned().collect();
        report.links = self
            .linker
            .link(&mut self.index, &chunks, &figures, &formulas, &self.link_options);

        self.index.snapshot()?;
        self.vectors.save(&self.vector_path)?;

        info!(
            documents = report.documents,
            failed = report.failed.len(),
            figures = report.figures,
            formulas = report.formulas,
            chunks = report.chunks,
            links = report.links.total(),
            "indexing pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DocumentLayout, PageLayout, TextBlock};
    use crate::models::{BoundingBox, RetrievalOptions};
    use crate::traits::{LayoutReader, PageRasterizer};
    use image::{DynamicImage, Luma};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    struct OnePageLayout;

    impl LayoutReader for OnePageLayout {
        fn read_layout(&self, path: &Path) -> Result<DocumentLayout, IngestError> {
            if path.to_string_lossy().contains("broken") {
                return Err(IngestError::PdfParse("not a pdf".to_string()));
            }
            let page = PageLayout {
                index: 0,
                width: 600.0,
                height: 800.0,
                blocks: vec![
                    TextBlock::single(
                        "Figure 1. Ripple waveform",
                        BoundingBox::new(80.0, 400.0, 320.0, 412.0),
                    ),
                    TextBlock::single(
                        "As shown in Figure 1, the output ripple falls as the switching frequency rises.",
                        BoundingBox::new(50.0, 600.0, 550.0, 612.0),
                    ),
                ],
                images: Vec::new(),
            };
            Ok(DocumentLayout {
                source: path.to_path_buf(),
                pages: vec![page],
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

    fn knowledge_base(root: &Path) -> Result<KnowledgeBase, IngestError> {
        Ok(KnowledgeBase::open(
            &root.join("data"),
            root.join("documents"),
            ExtractionOptions::default(),
        )?
        .with_extractor(|extractor| extractor.with_reader(OnePageLayout).with_rasterizer(StripedRasterizer)))
    }

    fn write_pdf(folder: &Path, name: &str) -> Result<(), Box<dyn std::error::Error>> {
        fs::create_dir_all(folder)?;
        fs::write(folder.join(name), b"%PDF-1.4\n%fake")?;
        Ok(())
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn rebuild_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut base = knowledge_base(dir.path())?;
        assert!(matches!(base.rebuild(None), Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn full_rebuild_indexes_links_and_persists() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let documents = dir.path().join("documents");
        write_pdf(&documents, "buck.pdf")?;
        write_pdf(&documents.join("nested"), "ldo.pdf")?;
        write_pdf(&documents, "broken.pdf")?;

        let mut base = knowledge_base(dir.path())?;
        let report = base.rebuild(None)?;

        assert_eq!(report.documents, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.figures, 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.links.figure_links, 2);
        assert!(dir.path().join("data").join(INDEX_FILE).exists());
        assert!(dir.path().join("data").join(VECTOR_INDEX_FILE).exists());

        let reopened = knowledge_base(dir.path())?;
        assert_eq!(reopened.index().statistics().total_figures, 2);
        assert_eq!(reopened.index().total_links(), 2);
        assert_eq!(reopened.vectors().len(), 2);
        Ok(())
    }

    #[test]
    fn rebuilt_base_serves_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_pdf(&dir.path().join("documents"), "buck.pdf")?;
        let mut base = knowledge_base(dir.path())?;
        base.rebuild(None)?;

        let bundle = base.orchestrator()?.retrieve("output ripple", &RetrievalOptions::default())?;
        assert_eq!(bundle.chunks.len(), 1);
        assert_eq!(bundle.figure_paths.len(), 1);
        assert!(bundle.text.contains("Related figures:"));
        Ok(())
    }

    #[test]
    fn sync_only_indexes_new_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let documents = dir.path().join("documents");
        write_pdf(&documents, "buck.pdf")?;
        let mut base = knowledge_base(dir.path())?;
        assert_eq!(base.sync(false)?.documents, 1);

        write_pdf(&documents, "ldo.pdf")?;
        let report = base.sync(false)?;
        assert_eq!(report.documents, 1);
        assert_eq!(base.index().statistics().total_figures, 2);

        let idle = base.sync(false)?;
        assert_eq!(idle.documents, 0);
        assert_eq!(base.sync(true)?.documents, 2);
        Ok(())
    }

    #[test]
    fn single_document_rebuild_replaces_only_that_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let documents = dir.path().join("documents");
        write_pdf(&documents, "buck.pdf")?;
        write_pdf(&documents, "ldo.pdf")?;
        let mut base = knowledge_base(dir.path())?;
        base.rebuild(None)?;

        let report = base.rebuild(Some("ldo.pdf"))?;
        assert_eq!(report.documents, 1);
        assert_eq!(base.index().statistics().total_figures, 2);
        assert_eq!(base.vectors().len(), 2);

        assert!(matches!(
            base.rebuild(Some("missing.pdf")),
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn unreadable_pdfs_are_reported_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let documents = dir.path().join("documents");
        fs::create_dir_all(&documents)?;
        fs::write(documents.join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;

        let mut base = KnowledgeBase::open(&dir.path().join("data"), &documents, ExtractionOptions::default())?;
        let report = base.rebuild(None)?;

        assert_eq!(report.documents, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].path.file_name().and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }
}
