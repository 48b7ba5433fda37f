use crate::error::{IndexError, IngestError};
use crate::traits::FormulaRecognizer;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

pub const OCR_CACHE_FILE: &str = "ocr_cache.json";

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    pub fn new(endpoint: Option<&str>, api_key: Option<&str>) -> Option<Self> {
        Some(Self {
            endpoint: non_empty(endpoint)?,
            api_key: non_empty(api_key),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Serialize)]
struct RecognitionRequest<'a> {
    image_base64: String,
    filename: &'a str,
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    #[serde(default)]
    latex: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl RecognitionResponse {
    fn into_symbolic(self) -> String {
        self.latex
            .filter(|latex| !latex.trim().is_empty())
            .or(self.text)
            .map(|symbolic| symbolic.trim().to_string())
            .unwrap_or_default()
    }
}

pub struct HttpFormulaRecognizer {
    endpoint: Url,
    api_key: Option<String>,
    client: Client,
}

impl HttpFormulaRecognizer {
    pub fn new(config: OcrEndpointConfig) -> Result<Self, IngestError> {
        Ok(Self {
            endpoint: Url::parse(&config.endpoint)?,
            api_key: config.api_key,
            client: Client::new(),
        })
    }
}

impl FormulaRecognizer for HttpFormulaRecognizer {
    fn recognize(&self, image: &DynamicImage, label: &str) -> Result<String, IngestError> {
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;
        let payload = RecognitionRequest {
            image_base64: STANDARD.encode(png.into_inner()),
            filename: label,
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "formula OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let parsed: RecognitionResponse = response.json()?;
        Ok(parsed.into_symbolic())
    }
}

pub fn downscale_for_recognition(image: &DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if max_edge == 0 || (width <= max_edge && height <= max_edge) {
        return image.clone();
    }
    let scale = max_edge as f64 / width.max(height) as f64;
    let new_width = ((width as f64 * scale) as u32).max(1);
    let new_height = ((height as f64 * scale) as u32).max(1);
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

#[derive(Debug, Default)]
pub struct RecognitionCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl RecognitionCache {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "discarding unreadable OCR cache");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded OCR cache");
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn insert(&mut self, file_name: impl Into<String>, symbolic: impl Into<String>) {
        self.entries.insert(file_name.into(), symbolic.into());
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&mut self) -> Result<(), IndexError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(&self.path, body).map_err(|source| IndexError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}

pub struct RecognitionService {
    recognizer: Option<Box<dyn FormulaRecognizer>>,
    cache: RecognitionCache,
    max_edge: u32,
}

impl RecognitionService {
    pub fn new(
        recognizer: Option<Box<dyn FormulaRecognizer>>,
        cache: RecognitionCache,
        max_edge: u32,
    ) -> Self {
        Self {
            recognizer,
            cache,
            max_edge,
        }
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn recognize(&mut self, file_name: &str, image: &DynamicImage) -> String {
        if let Some(cached) = self.cache.get(file_name) {
            return cached.to_string();
        }
        let Some(recognizer) = &self.recognizer else {
            return String::new();
        };

        let prepared = downscale_for_recognition(image, self.max_edge);
        match recognizer.recognize(&prepared, file_name) {
            Ok(symbolic) => {
                let symbolic = symbolic.trim().to_string();
                self.cache.insert(file_name, symbolic.clone());
                symbolic
            }
            Err(error) => {
                warn!(file_name, %error, "formula recognition failed");
                String::new()
            }
        }
    }

    pub fn persist(&mut self) -> Result<(), IndexError> {
        self.cache.save()
    }
}
