use crate::error::IngestError;
use crate::index::MultimodalIndex;
use crate::models::{source_basename, Figure, Formula, LinkOptions, TextChunk};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info};

const FIGURE_INDICATORS: [&str; 8] = [
    "如图", "见图", "如下图", "上图", "下图", "shown in", "see Fig", "as shown",
];
const FORMULA_KEYWORDS: [&str; 5] = ["公式", "方程", "表达式", "equation", "formula"];
const ARITHMETIC: [char; 5] = ['=', '+', '-', '*', '/'];
const SHORT_FIGURE_CHUNK: usize = 150;
const SHORT_FORMULA_CHUNK: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub figure_links: usize,
    pub formula_links: usize,
    pub proximity_links: usize,
}

impl LinkReport {
    pub fn total(&self) -> usize {
        self.figure_links + self.formula_links + self.proximity_links
    }
}

#[derive(Default)]
struct PageGroup<'a> {
    chunks: Vec<&'a TextChunk>,
    figures: Vec<&'a Figure>,
    formulas: Vec<&'a Formula>,
}

pub struct ContentLinker {
    cjk_reference: Regex,
    latin_reference: Regex,
}

impl ContentLinker {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            cjk_reference: Regex::new(r"图\s*(\d+(?:[.\-]\d+)*)")?,
            latin_reference: Regex::new(r"(?i)(?:Figure|Fig\.?)\s*(\d+(?:[.\-]\d+)*)")?,
        })
    }

    pub fn figure_references(&self, text: &str) -> Vec<String> {
        self.cjk_reference
            .captures_iter(text)
            .chain(self.latin_reference.captures_iter(text))
            .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    pub fn link(
        &self,
        index: &mut MultimodalIndex,
        chunks: &[TextChunk],
        figures: &[Figure],
        formulas: &[Formula],
        options: &LinkOptions,
    ) -> LinkReport {
        let mut report = self.link_pages(index, chunks, figures, formulas);
        if let Some(window) = options.proximity_window {
            report.proximity_links = self.link_by_proximity(index, chunks, figures, formulas, window);
        }
        info!(
            chunks = chunks.len(),
            figure_links = report.figure_links,
            formula_links = report.formula_links,
            proximity_links = report.proximity_links,
            "linked chunks to assets"
        );
        report
    }

    pub fn link_pages(
        &self,
        index: &mut MultimodalIndex,
        chunks: &[TextChunk],
        figures: &[Figure],
        formulas: &[Formula],
    ) -> LinkReport {
        let mut groups: BTreeMap<(String, u32), PageGroup<'_>> = BTreeMap::new();
        for chunk in chunks {
            if let Some(page) = chunk.page {
                groups
                    .entry((chunk.source_name().to_string(), page))
                    .or_default()
                    .chunks
                    .push(chunk);
            }
        }
        for figure in figures {
            groups
                .entry((source_basename(&figure.source).to_string(), figure.page))
                .or_default()
                .figures
                .push(figure);
        }
        for formula in formulas {
            groups
                .entry((source_basename(&formula.source).to_string(), formula.page))
                .or_default()
                .formulas
                .push(formula);
        }

        let mut report = LinkReport::default();
        for group in groups.values() {
            for chunk in &group.chunks {
                let chunk_id = chunk.chunk_id();
                let references = self.figure_references(&chunk.content);

                for figure in &group.figures {
                    if let Some(strategy) = figure_strategy(&chunk.content, &references, figure) {
                        if index.link_figure(&chunk_id, &figure.figure_id) {
                            debug!(%chunk_id, figure = %figure.figure_id, strategy, "figure link");
                            report.figure_links += 1;
                        }
                    }
                }

                for formula in &group.formulas {
                    if let Some(strategy) = formula_strategy(&chunk.content, formula) {
                        if index.link_formula(&chunk_id, &formula.formula_id) {
                            debug!(%chunk_id, formula = %formula.formula_id, strategy, "formula link");
                            report.formula_links += 1;
                        }
                    }
                }
            }
        }
        report
    }

    pub fn link_by_proximity(
        &self,
        index: &mut MultimodalIndex,
        chunks: &[TextChunk],
        figures: &[Figure],
        formulas: &[Formula],
        window: u32,
    ) -> usize {
        let mut added = 0;
        for chunk in chunks {
            let Some(page) = chunk.page else {
                continue;
            };
            let name = chunk.source_name();
            let chunk_id = chunk.chunk_id();

            for figure in figures {
                if source_basename(&figure.source) == name
                    && figure.page.abs_diff(page) <= window
                    && !index.is_figure_linked(&chunk_id, &figure.figure_id)
                    && index.link_figure(&chunk_id, &figure.figure_id)
                {
                    added += 1;
                }
            }
            for formula in formulas {
                if source_basename(&formula.source) == name
                    && formula.page.abs_diff(page) <= window
                    && !index.is_formula_linked(&chunk_id, &formula.formula_id)
                    && index.link_formula(&chunk_id, &formula.formula_id)
                {
                    added += 1;
                }
            }
        }
        debug!(window, added, "proximity pass finished");
        added
    }
}

fn figure_strategy(content: &str, references: &[String], figure: &Figure) -> Option<&'static str> {
    let caption = figure.caption.as_str();
    if !caption.is_empty() && references.iter().any(|number| caption.contains(number.as_str())) {
        return Some("reference");
    }
    if caption.chars().count() > 5 && content.contains(caption) {
        return Some("caption");
    }
    if content.chars().count() < SHORT_FIGURE_CHUNK
        && FIGURE_INDICATORS.iter().any(|phrase| content.contains(phrase))
    {
        return Some("indicator");
    }
    None
}

fn formula_strategy(content: &str, formula: &Formula) -> Option<&'static str> {
    if formula.text.chars().count() > 5 && content.contains(formula.text.as_str()) {
        return Some("text");
    }
    let context = formula.context.as_str();
    if context.chars().count() > 10 && (content.contains(context) || context.contains(content)) {
        return Some("context");
    }
    if FORMULA_KEYWORDS.iter().any(|keyword| content.contains(keyword))
        && content.contains(ARITHMETIC)
        && content.chars().count() < SHORT_FORMULA_CHUNK
    {
        return Some("keyword");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linker() -> ContentLinker {
        ContentLinker::new().expect("patterns compile")
    }

    fn figure(id: &str, source: &str, page: u32, caption: &str) -> Figure {
        Figure {
            figure_id: id.to_string(),
            page,
            bbox: None,
            image_path: format!("{id}.png"),
            caption: caption.to_string(),
            source: source.to_string(),
            size: 20_000,
            is_vector: false,
        }
    }

    fn formula(id: &str, source: &str, page: u32, text: &str, context: &str) -> Formula {
        Formula {
            formula_id: id.to_string(),
            page,
            bbox: None,
            image_path: format!("{id}.png"),
            text: text.to_string(),
            latex: String::new(),
            context: context.to_string(),
            source: source.to_string(),
        }
    }

    #[test]
    fn references_are_digit_led() {
        let linker = linker();
        assert_eq!(linker.figure_references("如图3.2所示, see Fig. 4-1 and Figure 5."), vec!["3.2", "4-1", "5"]);
        assert!(linker.figure_references("Figure . and 图 -").is_empty());
    }

    #[test]
    fn figure_reference_links_matching_caption_only() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let chunk = TextChunk::new(
            "The topology in Figure 3.2 uses a synchronous rectifier to improve efficiency at light load, which is discussed at length in the following paragraphs about losses and thermal design.",
            "/docs/buck.pdf",
            5,
        );
        let figures = vec![
            figure("buck_fig_p5_i0", "buck.pdf", 5, "Figure 3.2 Synchronous buck"),
            figure("buck_fig_p5_i1", "buck.pdf", 5, "Figure 7 Efficiency"),
        ];

        let report = linker.link_pages(&mut index, &[chunk.clone()], &figures, &[]);

        assert_eq!(report.figure_links, 1);
        assert_eq!(index.figure_links(&chunk.chunk_id()), ["buck_fig_p5_i0".to_string()]);
    }

    #[test]
    fn caption_substring_and_short_indicator_strategies() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let quoting = TextChunk::new("The caption reads Synchronous buck stage and continues.", "buck.pdf", 2);
        let pointing = TextChunk::new("如下图所示", "buck.pdf", 2);
        let figures = vec![
            figure("f0", "/x/buck.pdf", 2, "Synchronous buck stage"),
            figure("f1", "/x/buck.pdf", 2, "Gate driver"),
        ];

        linker.link_pages(&mut index, &[quoting.clone(), pointing.clone()], &figures, &[]);

        assert_eq!(index.figure_links(&quoting.chunk_id()), ["f0".to_string()]);
        assert_eq!(index.figure_links(&pointing.chunk_id()), ["f0".to_string(), "f1".to_string()]);
    }

    #[test]
    fn long_chunk_with_indicator_is_not_linked() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let long = TextChunk::new(format!("as shown {}", "x".repeat(200)), "buck.pdf", 2);
        let figures = vec![figure("f0", "buck.pdf", 2, "Gate driver")];

        let report = linker.link_pages(&mut index, &[long], &figures, &[]);
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn pages_of_different_documents_do_not_mix() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let chunk = TextChunk::new("如图1", "a.pdf", 0);
        let figures = vec![figure("b_fig", "b.pdf", 0, "图1 电路")];

        let report = linker.link_pages(&mut index, &[chunk], &figures, &[]);
        assert_eq!(report.figure_links, 0);
    }

    #[test]
    fn formula_strategies() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let by_text = TextChunk::new("输出纹波电压可以用公式V_ripple = I_out / (8*f*C)计算。", "test.pdf", 10);
        let by_context = TextChunk::new("Thus the ripple voltage depends on the capacitor.", "test.pdf", 10);
        let by_keyword = TextChunk::new("Apply the equation below with D = 0.4.", "test.pdf", 10);
        let unrelated = TextChunk::new("Nothing mathematical here at all.", "test.pdf", 10);
        let formulas = vec![
            formula("eq_text", "test.pdf", 10, "V_ripple = I_out / (8*f*C)", ""),
            formula("eq_context", "test.pdf", 10, "ΔV (2)", "the ripple voltage depends on the capacitor"),
        ];

        linker.link_pages(
            &mut index,
            &[by_text.clone(), by_context.clone(), by_keyword.clone(), unrelated.clone()],
            &[],
            &formulas,
        );

        assert_eq!(index.formula_links(&by_text.chunk_id()).first().map(String::as_str), Some("eq_text"));
        assert_eq!(index.formula_links(&by_context.chunk_id()), ["eq_context".to_string()]);
        assert_eq!(index.formula_links(&by_keyword.chunk_id()).len(), 2);
        assert!(index.formula_links(&unrelated.chunk_id()).is_empty());
    }

    #[test]
    fn relinking_is_idempotent() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let chunk = TextChunk::new("see Fig. 2", "a.pdf", 1);
        let figures = vec![figure("a_fig", "a.pdf", 1, "Fig. 2 Loop gain")];

        let first = linker.link_pages(&mut index, &[chunk.clone()], &figures, &[]);
        let second = linker.link_pages(&mut index, &[chunk.clone()], &figures, &[]);

        assert_eq!(first.figure_links, 1);
        assert_eq!(second.figure_links, 0);
        assert_eq!(index.figure_links(&chunk.chunk_id()).len(), 1);
    }

    #[test]
    fn proximity_pass_stays_within_window_and_document() {
        let linker = linker();
        let mut index = MultimodalIndex::new("unused.json");
        let chunk = TextChunk::new("Loop compensation discussion.", "a.pdf", 4);
        let figures = vec![
            figure("near", "a.pdf", 5, "Bode plot"),
            figure("far", "a.pdf", 7, "Layout"),
            figure("other", "b.pdf", 4, "Bode plot"),
        ];
        let formulas = vec![formula("eq_prev", "a.pdf", 3, "T(s) (4)", "")];

        let report = linker.link(
            &mut index,
            &[chunk.clone()],
            &figures,
            &formulas,
            &LinkOptions {
                proximity_window: Some(1),
            },
        );

        assert_eq!(report.proximity_links, 2);
        assert_eq!(index.figure_links(&chunk.chunk_id()), ["near".to_string()]);
        assert_eq!(index.formula_links(&chunk.chunk_id()), ["eq_prev".to_string()]);

        let again = linker.link_by_proximity(&mut index, &[chunk], &figures, &formulas, 1);
        assert_eq!(again, 0);
    }
}
