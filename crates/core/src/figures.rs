use crate::error::IngestError;
use crate::layout::{PageLayout, TextLine};
use crate::models::{BoundingBox, ExtractionOptions, Figure};
use crate::rules::RuleChain;
use image::DynamicImage;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct FigureCandidate {
    pub byte_len: usize,
    /// `None` when the bytes could not be decoded.
    pub dimensions: Option<(u32, u32)>,
    pub variance: Option<f64>,
}

impl FigureCandidate {
    pub fn measure(bytes: &[u8]) -> Self {
        match image::load_from_memory(bytes) {
            Ok(decoded) => Self::from_image(bytes.len(), &decoded),
            Err(_) => Self {
                byte_len: bytes.len(),
                dimensions: None,
                variance: None,
            },
        }
    }

    pub fn from_image(byte_len: usize, image: &DynamicImage) -> Self {
        Self {
            byte_len,
            dimensions: Some((image.width(), image.height())),
            variance: Some(pixel_variance(image)),
        }
    }
}

pub fn pixel_variance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let count = gray.len();
    if count == 0 {
        return 0.0;
    }
    let values = gray.as_raw();
    let mean = values.iter().map(|value| f64::from(*value)).sum::<f64>() / count as f64;
    values
        .iter()
        .map(|value| {
            let delta = f64::from(*value) - mean;
            delta * delta
        })
        .sum::<f64>()
        / count as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRegion {
    pub caption: String,
    pub capture: BoundingBox,
}

pub struct FigureHeuristics {
    options: ExtractionOptions,
    validity: RuleChain<FigureCandidate>,
    caption: RuleChain<str>,
    vector_caption: Regex,
}

impl FigureHeuristics {
    pub fn new(options: ExtractionOptions) -> Result<Self, IngestError> {
        let min_bytes = options.min_figure_bytes;
        let undecodable_min = options.undecodable_min_bytes;
        let min_side = options.min_figure_side;
        let (min_ratio, max_ratio) = (options.min_aspect_ratio, options.max_aspect_ratio);
        let min_variance = options.min_pixel_variance;

        let validity = RuleChain::new()
            .with("min-bytes", move |candidate: &FigureCandidate| {
                let threshold = if candidate.dimensions.is_some() {
                    min_bytes
                } else {
                    undecodable_min
                };
                candidate.byte_len >= threshold
            })
            .with("min-side", move |candidate: &FigureCandidate| {
                candidate
                    .dimensions
                    .map_or(true, |(width, height)| width >= min_side && height >= min_side)
            })
            .with("aspect-ratio", move |candidate: &FigureCandidate| {
                candidate.dimensions.map_or(true, |(width, height)| {
                    if height == 0 {
                        return false;
                    }
                    let ratio = width as f32 / height as f32;
                    (min_ratio..=max_ratio).contains(&ratio)
                })
            })
            .with("pixel-variance", move |candidate: &FigureCandidate| {
                candidate.variance.map_or(true, |variance| variance >= min_variance)
            });

        let caption = RuleChain::new()
            .with("cjk-marker", |line: &str| line.contains('图') && has_digit(line))
            .with("latin-marker", |line: &str| {
                (line.contains("Figure") || line.contains("Fig.") || line.contains("Fig "))
                    && has_digit(line)
            });

        Ok(Self {
            options,
            validity,
            caption,
            vector_caption: Regex::new(r"(?i)^(?:Figure|Fig\.?)\s+\d+")?,
        })
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    pub fn check(&self, candidate: &FigureCandidate) -> Result<(), &'static str> {
        match self.validity.first_failure(candidate) {
            Some(rule) => Err(rule),
            None => Ok(()),
        }
    }

    pub fn check_bytes(&self, bytes: &[u8]) -> Result<FigureCandidate, &'static str> {
        if bytes.len() < self.options.min_figure_bytes {
            return Err("min-bytes");
        }
        let candidate = FigureCandidate::measure(bytes);
        self.check(&candidate)?;
        Ok(candidate)
    }

    pub fn is_caption_line(&self, line: &str) -> bool {
        self.caption.any(line.trim())
    }

    pub fn locate_caption(&self, page: &PageLayout, below: Option<&BoundingBox>) -> String {
        let lines: Vec<&TextLine> = page.lines().collect();
        let captions: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| self.is_caption_line(&line.text))
            .map(|(position, _)| position)
            .collect();

        let chosen = below
            .and_then(|image| {
                captions
                    .iter()
                    .copied()
                    .filter(|position| lines[*position].bbox.y0 >= image.y1 - 2.0)
                    .min_by(|left, right| lines[*left].bbox.y0.total_cmp(&lines[*right].bbox.y0))
            })
            .or_else(|| captions.first().copied());

        let Some(position) = chosen else {
            return String::new();
        };

        let mut caption = lines[position].text.trim().to_string();
        if let Some(next) = lines.get(position + 1) {
            let next = next.text.trim();
            if !next.is_empty() && !starts_new_caption(next) {
                caption.push(' ');
                caption.push_str(next);
            }
        }
        truncate_chars(&caption, self.options.caption_max_chars)
    }

    pub fn vector_regions(&self, page: &PageLayout, existing: &[Figure]) -> Vec<VectorRegion> {
        let mut regions = Vec::new();

        for block in &page.blocks {
            let text = block.text();
            if !self.vector_caption.is_match(text.trim()) {
                continue;
            }

            let caption_top = block.bbox.y0;
            let covered = existing.iter().filter_map(|figure| figure.bbox).any(|bbox| {
                let gap = caption_top - bbox.y1;
                gap > 0.0 && gap < self.options.vector_caption_gap
            });
            if covered {
                continue;
            }

            let y1 = (caption_top - 5.0).max(0.0);
            let y0 = (y1 - self.options.vector_scan_height).max(0.0);
            let capture = BoundingBox {
                x0: self.options.vector_side_margin,
                y0,
                x1: page.width - self.options.vector_side_margin,
                y1,
            }
            .clip(page.width, page.height);
            if capture.is_empty() {
                continue;
            }

            regions.push(VectorRegion {
                caption: truncate_chars(text.trim(), self.options.caption_max_chars),
                capture,
            });
        }

        regions
    }
}

fn has_digit(text: &str) -> bool {
    text.chars().any(|ch| ch.is_ascii_digit())
}

fn starts_new_caption(line: &str) -> bool {
    line.starts_with('图') || line.contains("Figure") || line.contains("Fig")
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
