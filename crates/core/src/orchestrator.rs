use crate::error::{IngestError, SearchError};
use crate::index::MultimodalIndex;
use crate::models::{ContextBundle, Figure, Formula, RetrievalOptions, TextChunk};
use crate::rerank::rerank;
use crate::traits::{ChunkFilter, RelevanceScorer, SearchMode, VectorIndex};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub struct RetrievalOrchestrator<'a, V: VectorIndex> {
    vector: Option<&'a V>,
    index: &'a MultimodalIndex,
    scorer: Option<Box<dyn RelevanceScorer + 'a>>,
    figure_query: Regex,
    cjk_figure_query: Regex,
    formula_query: Regex,
}

impl<'a, V: VectorIndex> RetrievalOrchestrator<'a, V> {
    pub fn new(vector: Option<&'a V>, index: &'a MultimodalIndex) -> Result<Self, IngestError> {
        Ok(Self {
            vector,
            index,
            scorer: None,
            figure_query: Regex::new(r"(?i)(Figure|Fig\.?)\s*(\d+)")?,
            cjk_figure_query: Regex::new(r"图\s*(\d+)")?,
            formula_query: Regex::new(r"(\d+\.\d+|\(\d+\)|\[\d+\])")?,
        })
    }

    pub fn with_scorer(mut self, scorer: impl RelevanceScorer + 'a) -> Self {
        self.scorer = Some(Box::new(scorer));
        self
    }

    pub fn retrieve(&self, query: &str, options: &RetrievalOptions) -> Result<ContextBundle, SearchError> {
        let Some(vector) = self.vector else {
            debug!("no vector index loaded, returning empty context");
            return Ok(ContextBundle::default());
        };
        if query.trim().is_empty() {
            return Ok(ContextBundle::default());
        }

        let source_filter = options
            .source_filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty());

        let mut chunks = self.search(vector, query, options, source_filter)?;
        if chunks.is_empty() {
            info!(query, filter = ?source_filter, "no chunks survived retrieval");
            return Ok(ContextBundle::default());
        }

        chunks = self.expand_neighbors(vector, chunks, options);

        if let Some(scorer) = &self.scorer {
            if chunks.len() > options.k {
                chunks = rerank(scorer.as_ref(), query, chunks, options.k);
            }
        }

        let (figures, formulas) = self.associate_assets(query, &chunks, source_filter);
        let (formula_quota, figure_quota) = allocate_quota(formulas.len(), figures.len(), options.max_images);

        let bundle = ContextBundle {
            text: assemble_text(&chunks, &figures, &formulas),
            figure_paths: figures
                .iter()
                .take(figure_quota)
                .map(|figure| figure.image_path.clone())
                .collect(),
            formula_paths: formulas
                .iter()
                .take(formula_quota)
                .map(|formula| formula.image_path.clone())
                .collect(),
            chunks,
        };
        info!(
            chunks = bundle.chunks.len(),
            figures = figures.len(),
            formulas = formulas.len(),
            figure_paths = bundle.figure_paths.len(),
            formula_paths = bundle.formula_paths.len(),
            "assembled context"
        );
        Ok(bundle)
    }

    fn search(
        &self,
        vector: &V,
        query: &str,
        options: &RetrievalOptions,
        source_filter: Option<&str>,
    ) -> Result<Vec<TextChunk>, SearchError> {
        let k = options.k;
        let requested = if source_filter.is_some() { k.saturating_mul(3) } else { k };
        let fetch_k = match options.fetch_k {
            Some(explicit) => explicit.max(requested),
            None => k.saturating_mul(3).max(requested.saturating_mul(2)),
        };

        let hits = if vector.supports_diversified() {
            match vector.search(query, requested, SearchMode::Diversified { fetch_k }) {
                Err(SearchError::Unsupported(reason)) => {
                    debug!(%reason, "diversified search unsupported, using similarity");
                    vector.search(query, requested, SearchMode::Similarity)?
                }
                other => other?,
            }
        } else {
            vector.search(query, requested, SearchMode::Similarity)?
        };

        let mut kept: Vec<TextChunk> = match source_filter {
            Some(filter) => {
                let needle = filter.to_lowercase();
                let before = hits.len();
                let kept: Vec<TextChunk> = hits
                    .into_iter()
                    .filter(|chunk| chunk.source.to_lowercase().contains(&needle))
                    .collect();
                debug!(filter, before, after = kept.len(), "applied source filter");
                kept
            }
            None => hits,
        };
        kept.truncate(k);
        Ok(kept)
    }

    fn expand_neighbors(&self, vector: &V, chunks: Vec<TextChunk>, options: &RetrievalOptions) -> Vec<TextChunk> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut expanded: Vec<TextChunk> = Vec::new();
        for chunk in &chunks {
            if seen.insert(chunk.content.clone()) {
                expanded.push(chunk.clone());
            }
        }

        let window = i64::from(options.page_window);
        'outer: for chunk in &chunks {
            let Some(page) = chunk.page else {
                continue;
            };
            if chunk.source.is_empty() {
                continue;
            }
            for offset in -window..=window {
                let target = i64::from(page) + offset;
                if offset == 0 || target < 0 {
                    continue;
                }
                let filter = ChunkFilter {
                    source: Some(chunk.source.clone()),
                    page: u32::try_from(target).ok(),
                };
                let neighbors = match vector.search_with_filter(&chunk.content, options.neighbor_k, &filter) {
                    Ok(neighbors) => neighbors,
                    Err(error) => {
                        warn!(source = %chunk.source, page = target, %error, "neighbour lookup failed");
                        continue;
                    }
                };
                for neighbor in neighbors {
                    if seen.insert(neighbor.content.clone()) {
                        expanded.push(neighbor);
                        if expanded.len() >= options.max_total {
                            break 'outer;
                        }
                    }
                }
            }
        }

        expanded.truncate(options.max_total);
        debug!(before = chunks.len(), after = expanded.len(), "expanded page neighbours");
        expanded
    }

    fn associate_assets(
        &self,
        query: &str,
        chunks: &[TextChunk],
        source_filter: Option<&str>,
    ) -> (Vec<&'a Figure>, Vec<&'a Formula>) {
        let index = self.index;
        let mut figures: Vec<&'a Figure> = Vec::new();
        let mut formulas: Vec<&'a Formula> = Vec::new();

        if let Some(captures) = self.figure_query.captures(query) {
            let keyword = format!("{} {}", &captures[1], &captures[2]);
            debug!(%keyword, "query names a figure");
            figures.extend(index.search_figures_by_caption(&keyword, source_filter));
        }
        if let Some(captures) = self.cjk_figure_query.captures(query) {
            let keyword = format!("图{}", &captures[1]);
            figures.extend(index.search_figures_by_caption(&keyword, source_filter));
        }
        if let Some(captures) = self.formula_query.captures(query) {
            let number = captures[1].trim_matches(|ch| matches!(ch, '(' | ')' | '[' | ']'));
            debug!(number, "query names an equation number");
            formulas.extend(index.formulas_by_number(number, source_filter));
        }

        for chunk in chunks {
            if let Some(page) = chunk.page {
                figures.extend(index.figures_at(&chunk.source, page));
                formulas.extend(index.formulas_at(&chunk.source, page));
            }
        }

        for chunk in chunks {
            let chunk_id = chunk.chunk_id();
            figures.extend(index.related_figures(&chunk_id));
            formulas.extend(index.related_formulas(&chunk_id));
        }

        (
            dedup_by_id(figures, |figure| figure.figure_id.as_str()),
            dedup_by_id(formulas, |formula| formula.formula_id.as_str()),
        )
    }
}

fn dedup_by_id<'a, T>(items: Vec<&'a T>, id: impl Fn(&T) -> &str) -> Vec<&'a T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(id(*item).to_string()))
        .collect()
}

/// Image slots as `(formulas, figures)`: formulas are served first, figures get the rest.
pub fn allocate_quota(formulas: usize, figures: usize, max_images: usize) -> (usize, usize) {
    let formula_slots = formulas.min(max_images);
    let figure_slots = figures.min(max_images - formula_slots);
    (formula_slots, figure_slots)
}

fn assemble_text(chunks: &[TextChunk], figures: &[&Figure], formulas: &[&Formula]) -> String {
    let mut parts: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            let page = chunk
                .page
                .map(|page| page.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!(
                "[Document {}] source: {}, page: {}\n{}\n",
                position + 1,
                chunk.source_name(),
                page,
                chunk.content
            )
        })
        .collect();

    if !figures.is_empty() {
        parts.push("\nRelated figures:".to_string());
        for figure in figures {
            let label = if figure.caption.is_empty() {
                figure.figure_id.as_str()
            } else {
                figure.caption.as_str()
            };
            parts.push(format!("- {} (page: {})", label, figure.page));
        }
    }

    if !formulas.is_empty() {
        parts.push("\nRelated formulas:".to_string());
        for formula in formulas {
            if !formula.latex.is_empty() {
                parts.push(format!("- {} (page: {})", formula.context, formula.page));
                parts.push(format!("  LaTeX: {}", formula.latex));
            } else if !formula.context.is_empty() {
                parts.push(format!("- {} {} (page: {})", formula.context, formula.text, formula.page));
            } else {
                parts.push(format!("- {} (page: {})", formula.text, formula.page));
            }
        }
    }

    parts.join("\n")
}
