use crate::error::IngestError;
use crate::figures::truncate_chars;
use crate::layout::PageLayout;
use crate::models::{BoundingBox, ExtractionOptions};
use crate::rules::RuleChain;
use regex::Regex;
use std::collections::HashSet;

const FORMULA_SYMBOLS: [char; 21] = [
    '∫', '∑', 'Σ', '∏', '√', '∂', '∇', '≈', '≤', '≥', '±', '×', '÷', '∞', 'π', 'Δ', 'α', 'β', 'γ', 'θ',
    'ω',
];
const FEATURE_SYMBOLS: [char; 9] = ['≈', '×', '÷', '/', '=', '∫', '∑', '±', '→'];
const OPERATORS: [char; 5] = ['+', '-', '*', '/', '='];
const CITATION_MARKERS: [&str; 7] = ["IEEE", "J.", "Circuits", "Trans.", "Proc.", "pp.", "vol."];

#[derive(Debug, Clone, PartialEq)]
pub struct EquationNumber {
    pub number: String,
    pub block_index: usize,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberedEquation {
    pub number: EquationNumber,
    /// Body blocks ordered left to right; empty for a blind capture.
    pub content_blocks: Vec<usize>,
    pub bbox: BoundingBox,
    pub is_fallback: bool,
}

impl NumberedEquation {
    pub fn body_text(&self, page: &PageLayout) -> String {
        self.content_blocks
            .iter()
            .filter_map(|index| page.blocks.get(*index))
            .map(|block| block.text())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct FormulaHeuristics {
    options: ExtractionOptions,
    formula_like: RuleChain<str>,
    math_exclusions: RuleChain<str>,
    math_features: RuleChain<str>,
    equation_number: [Regex; 2],
}

impl FormulaHeuristics {
    pub fn new(options: ExtractionOptions) -> Result<Self, IngestError> {
        let variable = Regex::new(r"\b[A-Z]\b|[A-Za-z]_[A-Za-z0-9]")?;
        let ratio = Regex::new(r"[A-Za-z0-9]+\s*/\s*[A-Za-z0-9]+")?;
        let date = Regex::new(r"\d{4}/\d{1,2}/\d{1,2}")?;
        let script = Regex::new(r"[A-Za-z]_[A-Za-z0-9]|[A-Za-z]\^[0-9]")?;
        let single_capital = Regex::new(r"\b[A-Z]\b")?;
        let bibliography = Regex::new(r"^\s*\d+\.\s+[A-Z]")?;
        let subscript = Regex::new(r"[A-Z][A-Z_]*\s*[₀₁₂₃₄₅₆₇₈₉]|[A-Z]\s*S\d|[A-Z]_[A-Z0-9]")?;
        let variable_list = Regex::new(r"\b[A-Z]\s+[A-Z]?\d+\b")?;

        let formula_like = RuleChain::new()
            .with("equation", move |text: &str| {
                let length = text.chars().count();
                text.contains('=') && (10..200).contains(&length) && variable.is_match(text)
            })
            .with("math-symbol", |text: &str| text.chars().any(|ch| FORMULA_SYMBOLS.contains(&ch)))
            .with("ratio", move |text: &str| ratio.is_match(text) && !date.is_match(text))
            .with("script", move |text: &str| script.is_match(text))
            .with("parenthesized-arithmetic", move |text: &str| {
                text.contains('(')
                    && text.contains(')')
                    && text.chars().any(|ch| OPERATORS.contains(&ch))
                    && single_capital.is_match(text)
            })
            .with("operator-dense", |text: &str| {
                text.chars().count() < 100
                    && text.chars().filter(|ch| OPERATORS.contains(ch)).count() >= 2
            });

        let math_exclusions = RuleChain::new()
            .with("too-short", |text: &str| text.chars().count() < 2)
            .with("bibliography-entry", move |text: &str| bibliography.is_match(text))
            .with("citation-marker", |text: &str| {
                CITATION_MARKERS.iter().any(|marker| text.contains(marker))
            });

        let math_features = RuleChain::new()
            .with("math-symbol", |text: &str| text.chars().any(|ch| FEATURE_SYMBOLS.contains(&ch)))
            .with("subscript", move |text: &str| subscript.is_match(text))
            .with("variable-list", move |text: &str| variable_list.is_match(text));

        Ok(Self {
            options,
            formula_like,
            math_exclusions,
            math_features,
            equation_number: [
                Regex::new(r"^\s*\((\d+(?:\.\d+)?)\)\s*$")?,
                Regex::new(r"^\s*\[(\d+(?:\.\d+)?)\]\s*$")?,
            ],
        })
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    pub fn formula_rule(&self, text: &str) -> Option<&'static str> {
        self.formula_like.first_match(text)
    }

    pub fn is_formula_like(&self, text: &str) -> bool {
        self.formula_rule(text).is_some()
    }

    pub fn has_math_features(&self, text: &str) -> bool {
        self.math_exclusions.first_match(text).is_none() && self.math_features.any(text)
    }

    pub fn heuristic_blocks(&self, page: &PageLayout) -> Vec<usize> {
        page.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| {
                let text = block.text();
                !text.is_empty() && self.is_formula_like(&text)
            })
            .map(|(index, _)| index)
            .collect()
    }

    pub fn equation_numbers(&self, page: &PageLayout) -> Vec<EquationNumber> {
        let min_x = page.width * self.options.equation_number_min_x;
        page.blocks
            .iter()
            .enumerate()
            .filter_map(|(block_index, block)| {
                let text = block.text();
                let number = self
                    .equation_number
                    .iter()
                    .find_map(|pattern| pattern.captures(&text))
                    .and_then(|captures| captures.get(1).map(|m| m.as_str().to_string()))?;
                if page.width > 0.0 && block.bbox.x0 < min_x {
                    return None;
                }
                Some(EquationNumber {
                    number,
                    block_index,
                    bbox: block.bbox,
                })
            })
            .collect()
    }

    pub fn numbered_equations(&self, page: &PageLayout) -> Vec<NumberedEquation> {
        let numbers = self.equation_numbers(page);
        let mut consumed: HashSet<usize> = numbers.iter().map(|number| number.block_index).collect();
        let mut equations = Vec::new();

        for number in numbers {
            let anchor_center = number.bbox.center_y();
            let mut content: Vec<usize> = page
                .blocks
                .iter()
                .enumerate()
                .filter(|(index, block)| {
                    *index < number.block_index
                        && !consumed.contains(index)
                        && (block.bbox.center_y() - anchor_center).abs() <= self.options.equation_band
                        && block.bbox.x0 < number.bbox.x0
                        && self.has_math_features(&block.text())
                })
                .map(|(index, _)| index)
                .collect();
            content.sort_by(|left, right| {
                page.blocks[*left].bbox.x0.total_cmp(&page.blocks[*right].bbox.x0)
            });

            if content.is_empty() {
                if let Some(bbox) = self.fallback_region(&number.bbox, page) {
                    equations.push(NumberedEquation {
                        number,
                        content_blocks: Vec::new(),
                        bbox,
                        is_fallback: true,
                    });
                }
                continue;
            }

            let bbox = content
                .iter()
                .fold(number.bbox, |acc, index| acc.union(&page.blocks[*index].bbox));
            consumed.extend(content.iter().copied());
            equations.push(NumberedEquation {
                number,
                content_blocks: content,
                bbox,
                is_fallback: false,
            });
        }

        equations
    }

    pub fn fallback_region(&self, number: &BoundingBox, page: &PageLayout) -> Option<BoundingBox> {
        let margin = self.options.fallback_left_margin;
        if number.x0 < margin + 10.0 {
            return None;
        }
        let x0 = if number.x0 > page.width / 2.0 {
            margin.max(page.width / 2.0)
        } else {
            margin
        };
        let padding = self.options.fallback_padding;
        Some(BoundingBox {
            x0,
            y0: (number.y0 - padding).max(0.0),
            x1: number.x1,
            y1: (number.y1 + padding).min(page.height),
        })
    }

    pub fn context_snippet(&self, page: &PageLayout, block_index: usize) -> String {
        let max_chars = self.options.context_max_chars;
        let previous = block_index
            .checked_sub(1)
            .and_then(|index| page.blocks.get(index))
            .and_then(|block| sentences(&block.text()).pop());
        if let Some(sentence) = previous {
            return truncate_chars(&sentence, max_chars);
        }
        page.blocks
            .get(block_index + 1)
            .and_then(|block| sentences(&block.text()).into_iter().next())
            .map(|sentence| truncate_chars(&sentence, max_chars))
            .unwrap_or_default()
    }
}

fn sentences(text: &str) -> Vec<String> {
    text.split(['。', '\n'])
        .flat_map(|part| part.split(". "))
        .map(|sentence| sentence.trim().to_string())
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextBlock;

    fn heuristics() -> FormulaHeuristics {
        FormulaHeuristics::new(ExtractionOptions::default()).expect("patterns compile")
    }

    fn page(blocks: Vec<TextBlock>) -> PageLayout {
        PageLayout {
            index: 7,
            width: 600.0,
            height: 800.0,
            blocks,
            images: Vec::new(),
        }
    }

    #[test]
    fn formula_rules_name_the_matching_heuristic() {
        let rules = heuristics();
        assert_eq!(rules.formula_rule("V_ripple = I_out / (8*f*C)"), Some("equation"));
        assert_eq!(rules.formula_rule("∫ f(x) dx over the period"), Some("math-symbol"));
        assert_eq!(rules.formula_rule("the Vout/Vin ratio"), Some("ratio"));
        assert_eq!(rules.formula_rule("x^2 grows"), Some("script"));
        assert_eq!(rules.formula_rule("This chapter introduces the regulator."), None);
    }

    #[test]
    fn dates_are_not_ratios() {
        let rules = heuristics();
        let long_dated = "Revision history of this handbook, last updated on 2024/12/08 after a long review cycle with the editorial board of the publisher";
        assert_eq!(rules.formula_rule(long_dated), None);
    }

    #[test]
    fn bibliography_lines_have_no_math_features() {
        let rules = heuristics();
        assert!(rules.has_math_features("V_OUT = V_REF (1 + R_1/R_2)"));
        assert!(rules.has_math_features("resistors R S1, R S2"));
        assert!(!rules.has_math_features("12. Smith, A low-noise LDO = design"));
        assert!(!rules.has_math_features("IEEE J. Solid-State Circuits, vol. 40 = 3"));
    }

    #[test]
    fn numbered_equation_merges_body_and_number() {
        let rules = heuristics();
        let layout = page(vec![
            TextBlock::single("The output voltage is set by the divider:", BoundingBox::new(72.0, 250.0, 520.0, 262.0)),
            TextBlock::single("V_OUT = V_REF (1 + R_1/R_2)", BoundingBox::new(150.0, 300.0, 380.0, 318.0)),
            TextBlock::single("(3.12)", BoundingBox::new(520.0, 302.0, 560.0, 316.0)),
            TextBlock::single("where V_REF is the bandgap voltage.", BoundingBox::new(72.0, 420.0, 520.0, 432.0)),
        ]);

        let equations = rules.numbered_equations(&layout);
        assert_eq!(equations.len(), 1);
        let equation = &equations[0];
        assert_eq!(equation.number.number, "3.12");
        assert!(!equation.is_fallback);
        assert_eq!(equation.content_blocks, vec![1]);
        assert_eq!(equation.bbox, BoundingBox::new(150.0, 300.0, 560.0, 318.0));
        assert_eq!(equation.body_text(&layout), "V_OUT = V_REF (1 + R_1/R_2)");
        assert_eq!(
            rules.context_snippet(&layout, equation.number.block_index),
            "V_OUT = V_REF (1 + R_1/R_2)"
        );
    }

    #[test]
    fn body_blocks_are_not_claimed_twice() {
        let rules = heuristics();
        let layout = page(vec![
            TextBlock::single("I_D = k (V_GS - V_TH)^2", BoundingBox::new(150.0, 300.0, 380.0, 318.0)),
            TextBlock::single("(2.1)", BoundingBox::new(520.0, 302.0, 560.0, 316.0)),
            TextBlock::single("(2.2)", BoundingBox::new(520.0, 340.0, 560.0, 354.0)),
        ]);

        let equations = rules.numbered_equations(&layout);
        assert_eq!(equations.len(), 2);
        assert_eq!(equations[0].content_blocks, vec![0]);
        assert!(equations[1].is_fallback);
        assert_eq!(equations[1].bbox, BoundingBox::new(300.0, 320.0, 560.0, 374.0));
    }

    #[test]
    fn blocks_after_the_number_are_not_merged() {
        let rules = heuristics();
        let layout = page(vec![
            TextBlock::single("P = V^2 / R", BoundingBox::new(150.0, 300.0, 300.0, 318.0)),
            TextBlock::single("(1.4)", BoundingBox::new(520.0, 302.0, 560.0, 316.0)),
            TextBlock::single("with R_L = 8 Ω and V = 12 V", BoundingBox::new(72.0, 330.0, 400.0, 342.0)),
        ]);

        let equations = rules.numbered_equations(&layout);
        assert_eq!(equations.len(), 1);
        assert_eq!(equations[0].content_blocks, vec![0]);
        assert_eq!(equations[0].bbox, BoundingBox::new(150.0, 300.0, 560.0, 318.0));
    }

    #[test]
    fn left_side_numbers_are_ignored() {
        let rules = heuristics();
        let layout = page(vec![TextBlock::single("(4)", BoundingBox::new(80.0, 100.0, 100.0, 112.0))]);
        assert!(rules.equation_numbers(&layout).is_empty());

        let bracketed = page(vec![TextBlock::single("[7]", BoundingBox::new(540.0, 100.0, 560.0, 112.0))]);
        assert_eq!(rules.equation_numbers(&bracketed)[0].number, "7");
    }

    #[test]
    fn context_prefers_previous_block_last_sentence() {
        let rules = heuristics();
        let layout = page(vec![
            TextBlock::single("输出纹波较小。输出纹波电压可以用公式表示", BoundingBox::new(72.0, 100.0, 500.0, 112.0)),
            TextBlock::single("ΔV = I / (8 f C)", BoundingBox::new(150.0, 130.0, 300.0, 142.0)),
        ]);
        assert_eq!(rules.context_snippet(&layout, 1), "输出纹波电压可以用公式表示");
        assert_eq!(rules.context_snippet(&layout, 0), "ΔV = I / (8 f C)");
    }
}
