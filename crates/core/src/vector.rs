use crate::embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder};
use crate::error::{IndexError, SearchError};
use crate::models::{source_basename, TextChunk};
use crate::traits::{ChunkFilter, SearchMode, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

pub const VECTOR_INDEX_FILE: &str = "vector_index.json";
const MMR_LAMBDA: f32 = 0.5;

#[derive(Debug, Serialize, Deserialize)]
struct VectorSnapshot {
    dimensions: usize,
    chunks: Vec<TextChunk>,
}

#[derive(Debug, Clone)]
struct Entry {
    chunk: TextChunk,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct NgramVectorIndex {
    embedder: CharacterNgramEmbedder,
    entries: Vec<Entry>,
}

impl NgramVectorIndex {
    pub fn new(embedder: CharacterNgramEmbedder) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(IndexError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let snapshot: VectorSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| IndexError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let mut index = Self::new(CharacterNgramEmbedder {
            dimensions: snapshot.dimensions,
        });
        index.add_chunks(snapshot.chunks);
        info!(path = %path.display(), chunks = index.len(), "loaded vector index");
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let snapshot = VectorSnapshot {
            dimensions: self.embedder.dimensions(),
            chunks: self.entries.iter().map(|entry| entry.chunk.clone()).collect(),
        };
        let body = serde_json::to_vec(&snapshot)?;
        let temp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&temp, body).map_err(|source| IndexError::Io {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &TextChunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    pub fn add_chunks(&mut self, chunks: impl IntoIterator<Item = TextChunk>) -> usize {
        let mut known: HashSet<String> = self.entries.iter().map(|entry| entry.chunk.chunk_id()).collect();
        let mut added = 0;
        for chunk in chunks {
            if !known.insert(chunk.chunk_id()) {
                continue;
            }
            let vector = self.embedder.embed(&chunk.content);
            self.entries.push(Entry { chunk, vector });
            added += 1;
        }
        debug!(added, total = self.entries.len(), "added chunks to vector index");
        added
    }

    pub fn sources(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .map(|entry| entry.chunk.source_name().to_string())
            .collect()
    }

    pub fn remove_source(&mut self, source: &str) -> usize {
        let name = source_basename(source).to_string();
        let before = self.entries.len();
        self.entries.retain(|entry| entry.chunk.source_name() != name);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries ordered by similarity to `query`, best first.
    fn ranked(&self, query: &[f32], keep: impl Fn(&TextChunk) -> bool) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| keep(&entry.chunk))
            .map(|(position, entry)| (position, cosine_similarity(query, &entry.vector)))
            .collect();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored
    }

    fn maximal_marginal_relevance(&self, candidates: &[(usize, f32)], k: usize) -> Vec<usize> {
        let mut selected: Vec<usize> = Vec::new();
        let mut remaining: Vec<(usize, f32)> = candidates.to_vec();

        while selected.len() < k && !remaining.is_empty() {
            let mut best_slot = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (slot, (position, relevance)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|chosen| {
                        cosine_similarity(&self.entries[*position].vector, &self.entries[*chosen].vector)
                    })
                    .fold(0.0f32, f32::max);
                let score = MMR_LAMBDA * relevance - (1.0 - MMR_LAMBDA) * redundancy;
                if score > best_score {
                    best_score = score;
                    best_slot = slot;
                }
            }
            let (position, _) = remaining.remove(best_slot);
            selected.push(position);
        }

        selected
    }
}

impl VectorIndex for NgramVectorIndex {
    fn search(&self, query: &str, k: usize, mode: SearchMode) -> Result<Vec<TextChunk>, SearchError> {
        let query_vector = self.embedder.embed(query);
        let ranked = self.ranked(&query_vector, |_| true);

        let positions: Vec<usize> = match mode {
            SearchMode::Similarity => ranked.iter().take(k).map(|(position, _)| *position).collect(),
            SearchMode::Diversified { fetch_k } => {
                let pool = &ranked[..ranked.len().min(fetch_k.max(k))];
                self.maximal_marginal_relevance(pool, k)
            }
        };

        Ok(positions
            .into_iter()
            .map(|position| self.entries[position].chunk.clone())
            .collect())
    }

    fn search_with_filter(
        &self,
        query: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<TextChunk>, SearchError> {
        let query_vector = self.embedder.embed(query);
        Ok(self
            .ranked(&query_vector, |chunk| filter.matches(chunk))
            .into_iter()
            .take(k)
            .map(|(position, _)| self.entries[position].chunk.clone())
            .collect())
    }
}
