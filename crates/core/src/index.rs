use crate::error::IndexError;
use crate::models::{source_basename, Figure, Formula, IndexStatistics};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

pub const SNAPSHOT_VERSION: &str = "1.0";
pub const INDEX_FILE: &str = "multimodal_index.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMetadata {
    pub version: String,
    pub total_figures: usize,
    pub total_formulas: usize,
    pub total_links: usize,
    #[serde(default)]
    pub saved_at: Option<String>,
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            total_figures: 0,
            total_formulas: 0,
            total_links: 0,
            saved_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct Snapshot {
    #[serde(default)]
    figures: BTreeMap<String, Figure>,
    #[serde(default)]
    formulas: BTreeMap<String, Formula>,
    #[serde(default)]
    text_to_figures: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    text_to_formulas: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    metadata: SnapshotMetadata,
}

#[derive(Debug, Clone)]
pub struct MultimodalIndex {
    path: PathBuf,
    data: Snapshot,
}

impl MultimodalIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Snapshot::default(),
        }
    }

    /// Loads the snapshot at `path`. A missing file yields an empty index; a malformed one
    /// is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no index snapshot yet, starting empty");
                return Ok(Self::new(path));
            }
            Err(source) => return Err(IndexError::Io { path, source }),
        };

        let data: Snapshot = serde_json::from_slice(&bytes).map_err(|source| IndexError::Malformed {
            path: path.clone(),
            source,
        })?;
        info!(
            path = %path.display(),
            figures = data.figures.len(),
            formulas = data.formulas.len(),
            "loaded multimodal index"
        );
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_figure(&mut self, figure: Figure) {
        self.data.figures.insert(figure.figure_id.clone(), figure);
    }

    pub fn add_formula(&mut self, formula: Formula) {
        self.data.formulas.insert(formula.formula_id.clone(), formula);
    }

    pub fn link_figure(&mut self, chunk_id: &str, figure_id: &str) -> bool {
        append_unique(&mut self.data.text_to_figures, chunk_id, figure_id)
    }

    pub fn link_formula(&mut self, chunk_id: &str, formula_id: &str) -> bool {
        append_unique(&mut self.data.text_to_formulas, chunk_id, formula_id)
    }

    pub fn is_figure_linked(&self, chunk_id: &str, figure_id: &str) -> bool {
        self.data
            .text_to_figures
            .get(chunk_id)
            .is_some_and(|ids| ids.iter().any(|id| id == figure_id))
    }

    pub fn is_formula_linked(&self, chunk_id: &str, formula_id: &str) -> bool {
        self.data
            .text_to_formulas
            .get(chunk_id)
            .is_some_and(|ids| ids.iter().any(|id| id == formula_id))
    }

    pub fn figure(&self, figure_id: &str) -> Option<&Figure> {
        self.data.figures.get(figure_id)
    }

    pub fn formula(&self, formula_id: &str) -> Option<&Formula> {
        self.data.formulas.get(formula_id)
    }

    pub fn figures(&self) -> impl Iterator<Item = &Figure> {
        self.data.figures.values()
    }

    pub fn formulas(&self) -> impl Iterator<Item = &Formula> {
        self.data.formulas.values()
    }

    pub fn figure_links(&self, chunk_id: &str) -> &[String] {
        self.data
            .text_to_figures
            .get(chunk_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn formula_links(&self, chunk_id: &str) -> &[String] {
        self.data
            .text_to_formulas
            .get(chunk_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn related_figures(&self, chunk_id: &str) -> Vec<&Figure> {
        self.figure_links(chunk_id)
            .iter()
            .filter_map(|id| self.data.figures.get(id))
            .collect()
    }

    pub fn related_formulas(&self, chunk_id: &str) -> Vec<&Formula> {
        self.formula_links(chunk_id)
            .iter()
            .filter_map(|id| self.data.formulas.get(id))
            .collect()
    }

    pub fn figures_at(&self, source: &str, page: u32) -> Vec<&Figure> {
        let name = source_basename(source);
        self.data
            .figures
            .values()
            .filter(|figure| figure.page == page && source_basename(&figure.source) == name)
            .collect()
    }

    pub fn formulas_at(&self, source: &str, page: u32) -> Vec<&Formula> {
        let name = source_basename(source);
        self.data
            .formulas
            .values()
            .filter(|formula| formula.page == page && source_basename(&formula.source) == name)
            .collect()
    }

    pub fn figures_on_page(&self, source: &str, page: u32) -> Vec<&Figure> {
        self.data
            .figures
            .values()
            .filter(|figure| figure.page == page && contains_ignore_case(&figure.source, source))
            .collect()
    }

    pub fn formulas_on_page(&self, source: &str, page: u32) -> Vec<&Formula> {
        self.data
            .formulas
            .values()
            .filter(|formula| formula.page == page && contains_ignore_case(&formula.source, source))
            .collect()
    }

    pub fn search_figures_by_caption(&self, keyword: &str, source_filter: Option<&str>) -> Vec<&Figure> {
        self.data
            .figures
            .values()
            .filter(|figure| contains_ignore_case(&figure.caption, keyword))
            .filter(|figure| source_filter.map_or(true, |filter| contains_ignore_case(&figure.source, filter)))
            .collect()
    }

    pub fn search_formulas(&self, keyword: &str, source_filter: Option<&str>) -> Vec<&Formula> {
        self.data
            .formulas
            .values()
            .filter(|formula| {
                contains_ignore_case(&formula.text, keyword)
                    || contains_ignore_case(&formula.context, keyword)
            })
            .filter(|formula| source_filter.map_or(true, |filter| contains_ignore_case(&formula.source, filter)))
            .collect()
    }

    pub fn formulas_by_number(&self, number: &str, source_filter: Option<&str>) -> Vec<&Formula> {
        let bare = number.trim().trim_matches(|ch| matches!(ch, '(' | ')' | '[' | ']'));
        if bare.is_empty() {
            return Vec::new();
        }
        self.search_formulas(bare, source_filter)
    }

    pub fn total_links(&self) -> usize {
        link_count(&self.data.text_to_figures) + link_count(&self.data.text_to_formulas)
    }

    pub fn statistics(&self) -> IndexStatistics {
        IndexStatistics {
            total_figures: self.data.figures.len(),
            total_formulas: self.data.formulas.len(),
            chunks_with_figures: self.data.text_to_figures.values().filter(|ids| !ids.is_empty()).count(),
            chunks_with_formulas: self.data.text_to_formulas.values().filter(|ids| !ids.is_empty()).count(),
            figure_links: link_count(&self.data.text_to_figures),
            formula_links: link_count(&self.data.text_to_formulas),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.figures.is_empty() && self.data.formulas.is_empty()
    }

    pub fn clear(&mut self) {
        self.data = Snapshot::default();
    }

    pub fn remove_source(&mut self, source: &str) -> usize {
        let name = source_basename(source).to_string();
        let before = self.data.figures.len() + self.data.formulas.len();

        self.data
            .figures
            .retain(|_, figure| source_basename(&figure.source) != name);
        self.data
            .formulas
            .retain(|_, formula| source_basename(&formula.source) != name);

        let figures = &self.data.figures;
        prune_links(&mut self.data.text_to_figures, |id| figures.contains_key(id));
        let formulas = &self.data.formulas;
        prune_links(&mut self.data.text_to_formulas, |id| formulas.contains_key(id));

        before - (self.data.figures.len() + self.data.formulas.len())
    }

    pub fn snapshot(&mut self) -> Result<(), IndexError> {
        self.data.metadata = SnapshotMetadata {
            version: SNAPSHOT_VERSION.to_string(),
            total_figures: self.data.figures.len(),
            total_formulas: self.data.formulas.len(),
            total_links: self.total_links(),
            saved_at: Some(Utc::now().to_rfc3339()),
        };

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let body = serde_json::to_vec_pretty(&self.data)?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| INDEX_FILE.to_string());
        let temp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        fs::write(&temp, body).map_err(|source| IndexError::Io {
            path: temp.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(IndexError::Io {
                path: self.path.clone(),
                source,
            });
        }

        info!(
            path = %self.path.display(),
            figures = self.data.metadata.total_figures,
            formulas = self.data.metadata.total_formulas,
            links = self.data.metadata.total_links,
            "saved multimodal index"
        );
        Ok(())
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.data.metadata
    }
}

fn append_unique(table: &mut BTreeMap<String, Vec<String>>, chunk_id: &str, asset_id: &str) -> bool {
    let ids = table.entry(chunk_id.to_string()).or_default();
    if ids.iter().any(|id| id == asset_id) {
        return false;
    }
    ids.push(asset_id.to_string());
    true
}

fn prune_links(table: &mut BTreeMap<String, Vec<String>>, keep: impl Fn(&str) -> bool) {
    for ids in table.values_mut() {
        ids.retain(|id| keep(id));
    }
    table.retain(|_, ids| !ids.is_empty());
}

fn link_count(table: &BTreeMap<String, Vec<String>>) -> usize {
    table.values().map(Vec::len).sum()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
