use crate::error::IngestError;
use crate::models::BoundingBox;
use crate::traits::PageRasterizer;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct PdfiumRasterizer {
    pdfium: Pdfium,
    last_page: RefCell<Option<RenderedPage>>,
}

#[derive(Debug, Clone, PartialEq)]
struct PageKey {
    document: PathBuf,
    page: u32,
    scale_bits: u32,
}

struct RenderedPage {
    key: PageKey,
    image: DynamicImage,
    crop_offset: (f32, f32),
}

impl PdfiumRasterizer {
    pub fn from_system_library() -> Result<Self, IngestError> {
        let bindings = Pdfium::bind_to_system_library()
            .map_err(|error| IngestError::Render(format!("pdfium library not available: {error:?}")))?;
        info!("using system pdfium library");
        Ok(Self::with_bindings(bindings))
    }

    pub fn from_library_path(path: &Path) -> Result<Self, IngestError> {
        let bindings = Pdfium::bind_to_library(path).map_err(|error| {
            IngestError::Render(format!("pdfium library {} failed to load: {error:?}", path.display()))
        })?;
        Ok(Self::with_bindings(bindings))
    }

    fn with_bindings(bindings: Box<dyn PdfiumLibraryBindings>) -> Self {
        Self {
            pdfium: Pdfium::new(bindings),
            last_page: RefCell::new(None),
        }
    }

    fn render_page(&self, key: PageKey, scale: f32) -> Result<RenderedPage, IngestError> {
        let document = &key.document;
        let page = key.page;
        let pdf = self
            .pdfium
            .load_pdf_from_file(document, None)
            .map_err(|error| IngestError::PdfParse(format!("{}: {error:?}", document.display())))?;
        let index = u16::try_from(page)
            .map_err(|_| IngestError::InvalidArgument(format!("page index {page} exceeds 65535")))?;
        let pdf_page = pdf
            .pages()
            .get(index)
            .map_err(|error| IngestError::Render(format!("page {page}: {error:?}")))?;

        // pdfium draws the crop box; layout coordinates start at the media box corner.
        let boundaries = pdf_page.boundaries();
        let crop_offset = match (boundaries.media(), boundaries.crop()) {
            (Ok(media), Ok(crop)) => (
                crop.bounds.left().value - media.bounds.left().value,
                media.bounds.top().value - crop.bounds.top().value,
            ),
            _ => (0.0, 0.0),
        };

        let config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = pdf_page
            .render_with_config(&config)
            .map_err(|error| IngestError::Render(format!("page {page}: {error:?}")))?;
        debug!(document = %document.display(), page, "rendered page");

        Ok(RenderedPage {
            image: bitmap.as_image(),
            crop_offset,
            key,
        })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render(
        &self,
        document: &Path,
        page: u32,
        clip: &BoundingBox,
        scale: f32,
    ) -> Result<DynamicImage, IngestError> {
        let key = PageKey {
            document: document.to_path_buf(),
            page,
            scale_bits: scale.to_bits(),
        };
        let mut last_page = self.last_page.borrow_mut();
        let rendered = match last_page.take() {
            Some(cached) if cached.key == key => cached,
            _ => self.render_page(key, scale)?,
        };

        let (dx, dy) = rendered.crop_offset;
        let cropped = crop_to_clip(&rendered.image, &shift_clip(clip, dx, dy), scale);
        *last_page = Some(rendered);
        cropped
    }
}

pub fn shift_clip(clip: &BoundingBox, dx: f32, dy: f32) -> BoundingBox {
    BoundingBox::new(clip.x0 - dx, clip.y0 - dy, clip.x1 - dx, clip.y1 - dy)
}

pub fn crop_to_clip(
    rendered: &DynamicImage,
    clip: &BoundingBox,
    scale: f32,
) -> Result<DynamicImage, IngestError> {
    let width = rendered.width();
    let height = rendered.height();
    let to_pixels = |value: f32, limit: u32| ((value * scale).round().max(0.0) as u32).min(limit);

    let x0 = to_pixels(clip.x0, width);
    let y0 = to_pixels(clip.y0, height);
    let x1 = to_pixels(clip.x1, width);
    let y1 = to_pixels(clip.y1, height);

    if x1 <= x0 || y1 <= y0 {
        return Err(IngestError::Render(format!(
            "clip {:?} is empty at scale {scale}",
            clip.as_array()
        )));
    }

    Ok(rendered.crop_imm(x0, y0, x1 - x0, y1 - y0))
}
