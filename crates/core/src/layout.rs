//! Coordinates are page units with the origin at the top-left corner of the media box,
//! y growing downward.

use crate::error::IngestError;
use crate::models::BoundingBox;
use crate::traits::LayoutReader;
use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Average glyph advance as a fraction of the font size; no font metrics are read.
const GLYPH_ADVANCE_EM: f32 = 0.5;
const LINE_SPLIT_GAP_EM: f32 = 2.5;
const BLOCK_JOIN_GAP_EM: f32 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub bbox: BoundingBox,
    pub font_size: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub lines: Vec<TextLine>,
    pub bbox: BoundingBox,
}

impl TextBlock {
    pub fn from_lines(lines: Vec<TextLine>) -> Option<Self> {
        let first = lines.first()?.bbox;
        let bbox = lines.iter().fold(first, |acc, line| acc.union(&line.bbox));
        Some(Self { lines, bbox })
    }

    pub fn single(text: impl Into<String>, bbox: BoundingBox) -> Self {
        let line = TextLine {
            text: text.into(),
            bbox,
            font_size: bbox.height(),
        };
        Self {
            lines: vec![line],
            bbox,
        }
    }

    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    pub index: usize,
    pub bytes: Vec<u8>,
    pub extension: String,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub index: u32,
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<TextBlock>,
    pub images: Vec<EmbeddedImage>,
}

impl PageLayout {
    pub fn lines(&self) -> impl Iterator<Item = &TextLine> {
        self.blocks.iter().flat_map(|block| block.lines.iter())
    }

    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(TextBlock::text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPage {
    pub page: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    pub source: PathBuf,
    pub pages: Vec<PageLayout>,
    pub skipped_pages: Vec<SkippedPage>,
}

#[derive(Default)]
pub struct LopdfLayoutReader;

impl LayoutReader for LopdfLayoutReader {
    fn read_layout(&self, path: &Path) -> Result<DocumentLayout, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        let mut skipped_pages = Vec::new();

        for (page_no, page_id) in document.get_pages() {
            let index = page_no.saturating_sub(1);
            match read_page(&document, page_id, index) {
                Ok(page) => pages.push(page),
                Err(error) => {
                    warn!(path = %path.display(), page = index, %error, "skipping unreadable page");
                    skipped_pages.push(SkippedPage {
                        page: index,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(DocumentLayout {
            source: path.to_path_buf(),
            pages,
            skipped_pages,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn multiply(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (x * a + y * c + e, x * b + y * d + f)
    }

    fn vertical_scale(&self) -> f32 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }

    fn horizontal_scale(&self) -> f32 {
        let [a, b, _, _, _, _] = self.0;
        (a * a + b * b).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextRun {
    pub text: String,
    pub x: f32,
    pub baseline: f32,
    pub width: f32,
    pub size: f32,
}

impl TextRun {
    fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.x,
            self.baseline - self.size * 0.8,
            self.x + self.width,
            self.baseline + self.size * 0.2,
        )
    }
}

struct PageGeometry {
    origin_x: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl PageGeometry {
    fn to_top_left(&self, x: f32, y: f32) -> (f32, f32) {
        (x - self.origin_x, self.top - y)
    }
}

struct ImageXObject<'a> {
    key: String,
    stream: &'a Stream,
}

fn read_page(document: &Document, page_id: ObjectId, index: u32) -> Result<PageLayout, IngestError> {
    let geometry = page_geometry(document, page_id);
    let xobjects = image_xobjects(document, page_id);

    let content_bytes = document
        .get_page_content(page_id)
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;
    let content =
        Content::decode(&content_bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut ctm = Matrix::IDENTITY;
    let mut stack: Vec<Matrix> = Vec::new();
    let mut text_matrix = Matrix::IDENTITY;
    let mut line_matrix = Matrix::IDENTITY;
    let mut font_size = 0.0f32;
    let mut leading = 0.0f32;
    let mut runs: Vec<TextRun> = Vec::new();
    let mut images: Vec<EmbeddedImage> = Vec::new();
    let mut seen_images: HashSet<String> = HashSet::new();

    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "q" => stack.push(ctm),
            "Q" => ctm = stack.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    ctm = matrix.multiply(&ctm);
                }
            }
            "BT" => {
                text_matrix = Matrix::IDENTITY;
                line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    font_size = size;
                }
            }
            "TL" => {
                if let Some(value) = operands.first().and_then(number) {
                    leading = value;
                }
            }
            "Td" | "TD" => {
                let tx = operands.first().and_then(number).unwrap_or(0.0);
                let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                if operation.operator == "TD" {
                    leading = -ty;
                }
                line_matrix = Matrix::translate(tx, ty).multiply(&line_matrix);
                text_matrix = line_matrix;
            }
            "Tm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    line_matrix = matrix;
                    text_matrix = matrix;
                }
            }
            "T*" => {
                line_matrix = Matrix::translate(0.0, -leading).multiply(&line_matrix);
                text_matrix = line_matrix;
            }
            "Tj" | "'" | "\"" => {
                if operation.operator != "Tj" {
                    line_matrix = Matrix::translate(0.0, -leading).multiply(&line_matrix);
                    text_matrix = line_matrix;
                }
                if let Some(text) = operands.last().and_then(decode_string) {
                    show_text(&mut runs, &mut text_matrix, &ctm, &geometry, font_size, &text, 0.0);
                }
            }
            "TJ" => {
                let mut pending = String::new();
                let mut adjustment = 0.0f32;
                if let Some(Object::Array(items)) = operands.first() {
                    for item in items {
                        match item {
                            Object::String(..) => {
                                if let Some(text) = decode_string(item) {
                                    pending.push_str(&text);
                                }
                            }
                            other => {
                                if let Some(value) = number(other) {
                                    // large negative kerning is a word gap
                                    if value < -200.0 {
                                        pending.push(' ');
                                    }
                                    adjustment -= value / 1000.0 * font_size;
                                }
                            }
                        }
                    }
                }
                if !pending.is_empty() {
                    show_text(
                        &mut runs,
                        &mut text_matrix,
                        &ctm,
                        &geometry,
                        font_size,
                        &pending,
                        adjustment,
                    );
                }
            }
            "Do" => {
                let Some(Object::Name(name)) = operands.first() else {
                    continue;
                };
                let name = String::from_utf8_lossy(name).to_string();
                let Some(xobject) = xobjects.get(&name) else {
                    continue;
                };
                if !seen_images.insert(xobject.key.clone()) {
                    continue;
                }
                let bbox = placement_bbox(&ctm, &geometry);
                match encode_image(xobject.stream) {
                    Some((bytes, extension)) => images.push(EmbeddedImage {
                        index: images.len(),
                        bytes,
                        extension,
                        bbox,
                    }),
                    None => debug!(page = index, image = %name, "image stream could not be read"),
                }
            }
            _ => {}
        }
    }

    Ok(PageLayout {
        index,
        width: geometry.width,
        height: geometry.height,
        blocks: assemble_blocks(runs),
        images,
    })
}

fn show_text(
    runs: &mut Vec<TextRun>,
    text_matrix: &mut Matrix,
    ctm: &Matrix,
    geometry: &PageGeometry,
    font_size: f32,
    text: &str,
    adjustment: f32,
) {
    let rendering = text_matrix.multiply(ctm);
    let (x, y) = rendering.apply(0.0, 0.0);
    let (x, baseline) = geometry.to_top_left(x, y);
    let size = (font_size * rendering.vertical_scale()).abs().max(1.0);
    let advance = text.chars().count() as f32 * font_size * GLYPH_ADVANCE_EM + adjustment;
    let width = advance * rendering.horizontal_scale();

    let cleaned: String = text.chars().filter(|ch| !ch.is_control()).collect();
    if !cleaned.trim().is_empty() {
        runs.push(TextRun {
            text: cleaned,
            x,
            baseline,
            width: width.max(size * 0.3),
            size,
        });
    }

    *text_matrix = Matrix::translate(advance, 0.0).multiply(text_matrix);
}

pub(crate) fn assemble_blocks(mut runs: Vec<TextRun>) -> Vec<TextBlock> {
    runs.sort_by(|left, right| {
        left.baseline
            .total_cmp(&right.baseline)
            .then(left.x.total_cmp(&right.x))
    });

    let mut lines: Vec<TextLine> = Vec::new();
    let mut current: Vec<TextRun> = Vec::new();

    for run in runs {
        let joins = current.last().is_some_and(|last| {
            let tolerance = last.size.max(run.size) * 0.3;
            let gap = run.x - (last.x + last.width);
            (run.baseline - last.baseline).abs() <= tolerance
                && gap <= last.size.max(run.size) * LINE_SPLIT_GAP_EM
        });
        if !joins {
            if let Some(line) = finish_line(&mut current) {
                lines.push(line);
            }
        }
        current.push(run);
    }
    if let Some(line) = finish_line(&mut current) {
        lines.push(line);
    }

    lines.sort_by(|left, right| {
        left.bbox
            .y0
            .total_cmp(&right.bbox.y0)
            .then(left.bbox.x0.total_cmp(&right.bbox.x0))
    });

    let mut grouped: Vec<Vec<TextLine>> = Vec::new();
    for line in lines {
        let target = grouped.iter_mut().rev().find(|block| {
            block.last().is_some_and(|last| {
                let gap = line.bbox.y0 - last.bbox.y1;
                gap <= last.font_size.max(line.font_size) * BLOCK_JOIN_GAP_EM
                    && gap > -last.font_size * 0.5
                    && last.bbox.overlaps_horizontally(&line.bbox)
            })
        });
        match target {
            Some(block) => block.push(line),
            None => grouped.push(vec![line]),
        }
    }

    let mut blocks: Vec<TextBlock> = grouped.into_iter().filter_map(TextBlock::from_lines).collect();
    blocks.sort_by(|left, right| {
        left.bbox
            .y0
            .total_cmp(&right.bbox.y0)
            .then(left.bbox.x0.total_cmp(&right.bbox.x0))
    });
    blocks
}

fn finish_line(runs: &mut Vec<TextRun>) -> Option<TextLine> {
    if runs.is_empty() {
        return None;
    }
    let mut text = String::new();
    let mut bbox = runs[0].bbox();
    let mut font_size = 0.0f32;
    let mut previous_end: Option<f32> = None;

    for run in runs.iter() {
        if let Some(end) = previous_end {
            if run.x - end > run.size * 0.15 && !text.ends_with(' ') && !run.text.starts_with(' ') {
                text.push(' ');
            }
        }
        text.push_str(&run.text);
        bbox = bbox.union(&run.bbox());
        font_size = font_size.max(run.size);
        previous_end = Some(run.x + run.width);
    }
    runs.clear();

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    Some(TextLine {
        text,
        bbox,
        font_size,
    })
}

fn placement_bbox(ctm: &Matrix, geometry: &PageGeometry) -> Option<BoundingBox> {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].map(|(x, y)| {
        let (px, py) = ctm.apply(x, y);
        geometry.to_top_left(px, py)
    });
    let x0 = corners.iter().map(|(x, _)| *x).fold(f32::INFINITY, f32::min);
    let y0 = corners.iter().map(|(_, y)| *y).fold(f32::INFINITY, f32::min);
    let x1 = corners.iter().map(|(x, _)| *x).fold(f32::NEG_INFINITY, f32::max);
    let y1 = corners.iter().map(|(_, y)| *y).fold(f32::NEG_INFINITY, f32::max);
    let bbox = BoundingBox::new(x0, y0, x1, y1);
    if bbox.is_empty() {
        None
    } else {
        Some(bbox)
    }
}

fn page_geometry(document: &Document, page_id: ObjectId) -> PageGeometry {
    let media_box = inherited(document, page_id, b"MediaBox")
        .and_then(|object| object.as_array().ok())
        .map(|values| values.iter().filter_map(|value| number(resolve(document, value)?)).collect::<Vec<_>>())
        .filter(|values| values.len() == 4);

    match media_box {
        Some(values) => {
            let (x0, x1) = (values[0].min(values[2]), values[0].max(values[2]));
            let (y0, y1) = (values[1].min(values[3]), values[1].max(values[3]));
            PageGeometry {
                origin_x: x0,
                top: y1,
                width: x1 - x0,
                height: y1 - y0,
            }
        }
        // US letter
        None => PageGeometry {
            origin_x: 0.0,
            top: 792.0,
            width: 612.0,
            height: 792.0,
        },
    }
}

fn image_xobjects(document: &Document, page_id: ObjectId) -> BTreeMap<String, ImageXObject<'_>> {
    let mut found = BTreeMap::new();
    let Some(resources) = inherited(document, page_id, b"Resources").and_then(|object| object.as_dict().ok()) else {
        return found;
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|object| resolve(document, object))
        .and_then(|object| object.as_dict().ok())
    else {
        return found;
    };

    for (name, value) in xobjects.iter() {
        let key = match value {
            Object::Reference((number, generation)) => format!("{number} {generation}"),
            _ => String::from_utf8_lossy(name).to_string(),
        };
        let Some(Object::Stream(stream)) = resolve(document, value) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|subtype| subtype.as_name().ok())
            .is_some_and(|subtype| subtype == b"Image");
        if is_image {
            found.insert(String::from_utf8_lossy(name).to_string(), ImageXObject { key, stream });
        }
    }
    found
}

fn inherited<'a>(document: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = document.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = current.get(key) {
            return resolve(document, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = document.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn matrix_operand(operands: &[Object]) -> Option<Matrix> {
    if operands.len() != 6 {
        return None;
    }
    let mut values = [0.0f32; 6];
    for (slot, operand) in values.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(Matrix(values))
}

fn decode_string(object: &Object) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(decode_text_bytes(bytes)),
        _ => None,
    }
}

pub(crate) fn decode_text_bytes(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|byte| *byte as char).collect(),
    }
}

fn stream_filters(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(|name| name.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn dict_integer(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key).ok().and_then(|value| value.as_i64().ok()).and_then(|value| u32::try_from(value).ok())
}

fn encode_image(stream: &Stream) -> Option<(Vec<u8>, String)> {
    let filters = stream_filters(stream);
    match filters.last().map(Vec::as_slice) {
        Some(b"DCTDecode") if filters.len() == 1 => Some((stream.content.clone(), "jpg".to_string())),
        Some(b"JPXDecode") if filters.len() == 1 => Some((stream.content.clone(), "jp2".to_string())),
        Some(b"FlateDecode") | None => {
            let raw = if filters.is_empty() {
                stream.content.clone()
            } else {
                stream.decompressed_content().ok()?
            };
            match raw_pixels_to_png(&stream.dict, raw.clone()) {
                Some(png) => Some((png, "png".to_string())),
                None => Some((raw, "bin".to_string())),
            }
        }
        _ => Some((stream.content.clone(), "bin".to_string())),
    }
}

fn raw_pixels_to_png(dict: &Dictionary, raw: Vec<u8>) -> Option<Vec<u8>> {
    let width = dict_integer(dict, b"Width")?;
    let height = dict_integer(dict, b"Height")?;
    if dict_integer(dict, b"BitsPerComponent").unwrap_or(8) != 8 {
        return None;
    }
    let color_space = dict.get(b"ColorSpace").ok().and_then(|value| value.as_name().ok());
    let image = match color_space {
        Some(b"DeviceRGB") => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, raw)?),
        Some(b"DeviceGray") => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, raw)?),
        _ => return None,
    };
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageOutputFormat::Png).ok()?;
    Some(encoded.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::dictionary;

    fn run(text: &str, x: f32, baseline: f32, size: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            x,
            baseline,
            width: text.chars().count() as f32 * size * GLYPH_ADVANCE_EM,
            size,
        }
    }

    #[test]
    fn runs_on_one_baseline_form_a_line_but_far_number_splits() {
        let blocks = assemble_blocks(vec![
            run("V_out = V_ref", 72.0, 300.0, 10.0),
            run("(1 + R1/R2)", 140.0, 300.0, 10.0),
            run("(3.12)", 500.0, 300.0, 10.0),
        ]);

        let texts: Vec<String> = blocks.iter().map(TextBlock::text).collect();
        assert_eq!(texts, vec!["V_out = V_ref (1 + R1/R2)".to_string(), "(3.12)".to_string()]);
    }

    #[test]
    fn close_lines_join_into_a_block() {
        let blocks = assemble_blocks(vec![
            run("First line of a paragraph", 72.0, 100.0, 10.0),
            run("second line of it", 72.0, 112.0, 10.0),
            run("Far away heading", 72.0, 200.0, 10.0),
        ]);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines.len(), 2);
        assert_eq!(blocks[0].text(), "First line of a paragraph second line of it");
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let bytes = [0xFE, 0xFF, 0x56, 0xFE, 0x00, 0x31];
        assert_eq!(decode_text_bytes(&bytes), "图1");
        assert_eq!(decode_text_bytes(b"Figure"), "Figure");
    }

    fn sample_pdf(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });

        let mut pixels = RgbImage::new(40, 20);
        for (x, y, pixel) in pixels.enumerate_pixels_mut() {
            *pixel = image::Rgb([(x * 6) as u8, (y * 12) as u8, 90]);
        }
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(pixels).write_to(&mut jpeg, ImageOutputFormat::Jpeg(90))?;
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 40,
                "Height" => 20,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg.into_inner(),
        ));

        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im1" => image_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![400.into(), 0.into(), 0.into(), 200.into(), 100.into(), 500.into()]),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![100.into(), 480.into()]),
                Operation::new("Tj", vec![Object::string_literal("Figure 3. Block diagram")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 600.into(), 800.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }

    #[test]
    fn lopdf_reader_recovers_text_and_image_placement() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sample.pdf");
        sample_pdf(&path)?;

        let layout = LopdfLayoutReader.read_layout(&path)?;
        assert_eq!(layout.pages.len(), 1);
        assert!(layout.skipped_pages.is_empty());

        let page = &layout.pages[0];
        assert_eq!(page.index, 0);
        assert_eq!(page.width, 600.0);
        assert_eq!(page.height, 800.0);
        assert_eq!(page.blocks.len(), 1);
        assert_eq!(page.blocks[0].text(), "Figure 3. Block diagram");
        // baseline at y=480 from the bottom of an 800-unit page
        assert!((page.blocks[0].lines[0].bbox.y1 - 322.0).abs() < 1.0);

        assert_eq!(page.images.len(), 1);
        let image = &page.images[0];
        assert_eq!(image.extension, "jpg");
        assert_eq!(image.bbox, Some(BoundingBox::new(100.0, 100.0, 500.0, 300.0)));
        assert!(image::load_from_memory(&image.bytes).is_ok());
        Ok(())
    }

    #[test]
    fn unreadable_file_is_a_document_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;
        assert!(LopdfLayoutReader.read_layout(&path).is_err());
        Ok(())
    }
}
