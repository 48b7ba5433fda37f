use crate::extractor::PageText;
use crate::models::TextChunk;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap_chars: 50,
            min_chars: 20,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn chunk_by_paragraph(text: &str, config: ChunkingConfig) -> Vec<String> {
    let paragraphs = text
        .split("\n\n")
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in paragraphs {
        let paragraph_len = paragraph.chars().count();
        if current.is_empty() {
            current = paragraph;
            current_len = paragraph_len;
            continue;
        }

        if current_len + paragraph_len + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
            current_len += paragraph_len + 2;
        } else {
            if current_len >= config.min_chars {
                chunks.push(std::mem::take(&mut current));
            }
            current = paragraph;
            current_len = paragraph_len;
        }
    }

    if current_len >= config.min_chars {
        chunks.push(current);
    }

    let mut windowed = Vec::new();
    for chunk in chunks {
        let chars: Vec<char> = chunk.chars().collect();
        if chars.len() <= config.max_chars {
            windowed.push(chunk);
            continue;
        }

        let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            windowed.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    windowed
}

pub fn build_chunks(source: &str, pages: &[PageText], config: ChunkingConfig) -> Vec<TextChunk> {
    pages
        .iter()
        .flat_map(|page| {
            chunk_by_paragraph(&page.text, config)
                .into_iter()
                .filter(|chunk| chunk.trim().chars().count() >= config.min_chars)
                .map(move |chunk| TextChunk::new(chunk, source, page.number))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn paragraphs_are_packed_until_the_limit() {
        let config = ChunkingConfig {
            max_chars: 40,
            overlap_chars: 5,
            min_chars: 5,
        };
        let text = "First paragraph here.\n\nSecond one.\n\nThird paragraph is longer than others.";

        let chunks = chunk_by_paragraph(text, config);

        assert_eq!(
            chunks,
            vec![
                "First paragraph here.\n\nSecond one.".to_string(),
                "Third paragraph is longer than others.".to_string(),
            ]
        );
    }

    #[test]
    fn oversized_paragraph_is_windowed_with_overlap() {
        let config = ChunkingConfig {
            max_chars: 10,
            overlap_chars: 4,
            min_chars: 1,
        };
        let chunks = chunk_by_paragraph("abcdefghijklmnop", config);
        assert_eq!(chunks, vec!["abcdefghij", "ghijklmnop"]);
    }

    #[test]
    fn chunks_carry_source_and_page() {
        let pages = vec![
            PageText {
                number: 0,
                text: "too short".to_string(),
            },
            PageText {
                number: 3,
                text: "纹波电压与开关频率和输出电容成反比关系, 因此提高频率可以减小电容。".to_string(),
            },
        ];

        let chunks = build_chunks("/docs/buck.pdf", &pages, ChunkingConfig::default());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, Some(3));
        assert_eq!(chunks[0].source, "/docs/buck.pdf");
        assert!(chunks[0].chunk_id().starts_with("buck.pdf_p3_"));
    }
}
