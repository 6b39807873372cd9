//! Full-text payload: inverted index over indexed chunks with TF-IDF ranking.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::TEXT_FILE;
use crate::error::CacheError;
use crate::handle::{IndexPayload, OpenOptions};
use crate::metadata::IndexVersion;
use crate::storage::{load_compressed, save_compressed};
use crate::{now_secs, tokenize, DEFAULT_MIN_TOKEN_LEN};

/// A posting: document number + line numbers (1-based, within the chunk) where the token appears.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Posting {
    pub doc: u32,
    pub lines: Vec<u32>,
}

/// Inverted index: token → list of postings.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TextIndex {
    pub created_at: u64,
    /// Generation this payload was published with; set by the publisher.
    pub generation: Option<IndexVersion>,
    /// doc number → record id
    pub doc_ids: Vec<u64>,
    /// token (lowercased) → postings
    pub index: HashMap<String, Vec<Posting>>,
    /// doc number → total token count in that doc (for TF-IDF)
    pub doc_token_counts: Vec<u32>,
    pub total_tokens: u64,
}

/// One ranked full-text match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextHit {
    pub id: u64,
    pub score: f64,
    pub occurrences: usize,
    pub lines: Vec<u32>,
}

impl TextIndex {
    /// Build from `(record id, text)` pairs.
    pub fn build<'a>(docs: impl IntoIterator<Item = (u64, &'a str)>) -> TextIndex {
        let mut out = TextIndex {
            created_at: now_secs(),
            ..TextIndex::default()
        };
        for (id, text) in docs {
            out.add_doc(id, text);
        }
        out
    }

    /// Append one document.
    pub fn add_doc(&mut self, id: u64, text: &str) {
        let doc = self.doc_ids.len() as u32;
        self.doc_ids.push(id);
        let mut per_token: HashMap<String, Vec<u32>> = HashMap::new();
        let mut count = 0u32;
        for (line_no, line) in text.lines().enumerate() {
            for token in tokenize(line, DEFAULT_MIN_TOKEN_LEN) {
                count += 1;
                per_token.entry(token).or_default().push(line_no as u32 + 1);
            }
        }
        for (token, mut lines) in per_token {
            lines.dedup();
            self.index.entry(token).or_default().push(Posting { doc, lines });
        }
        self.doc_token_counts.push(count);
        self.total_tokens += count as u64;
    }

    /// Drop the given record ids and renumber the remaining documents.
    ///
    /// Brute-force scan of the inverted index. Doc numbers stay dense, so
    /// `doc_ids.len()` is always the live document count used for IDF.
    pub fn remove_docs(&mut self, ids: &HashSet<u64>) {
        if !self.doc_ids.iter().any(|id| ids.contains(id)) {
            return;
        }

        // old doc number → new doc number, None for removed docs
        let mut remap: Vec<Option<u32>> = Vec::with_capacity(self.doc_ids.len());
        let mut doc_ids = Vec::with_capacity(self.doc_ids.len());
        let mut doc_token_counts = Vec::with_capacity(self.doc_ids.len());
        for (doc, id) in self.doc_ids.iter().enumerate() {
            let count = self.doc_token_counts.get(doc).copied().unwrap_or(0);
            if ids.contains(id) {
                remap.push(None);
                self.total_tokens = self.total_tokens.saturating_sub(count as u64);
            } else {
                remap.push(Some(doc_ids.len() as u32));
                doc_ids.push(*id);
                doc_token_counts.push(count);
            }
        }

        self.index.retain(|_, postings| {
            postings.retain_mut(|p| match remap.get(p.doc as usize).copied().flatten() {
                Some(doc) => {
                    p.doc = doc;
                    true
                }
                None => false,
            });
            !postings.is_empty()
        });
        self.doc_ids = doc_ids;
        self.doc_token_counts = doc_token_counts;
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        save_compressed(path, self, "text-index")
    }

    /// Rank documents for `terms` by summed TF-IDF.
    ///
    /// With `regex`, each term is a pattern matched against whole indexed
    /// tokens (case-insensitive). With `mode_and`, a document must match every
    /// term. `limit == 0` returns everything.
    pub fn search(
        &self,
        terms: &[String],
        mode_and: bool,
        regex: bool,
        limit: usize,
    ) -> Result<Vec<TextHit>, CacheError> {
        // Index tokens are lowercase. Regex patterns keep their case (`\S` is
        // not `\s`) and match case-insensitively instead.
        let raw_terms: Vec<String> = terms
            .iter()
            .map(|t| if regex { t.trim().to_string() } else { t.trim().to_lowercase() })
            .filter(|t| !t.is_empty())
            .collect();
        if raw_terms.is_empty() {
            return Err(CacheError::InvalidQuery("no search terms".to_string()));
        }

        // Each group is the set of index tokens one raw term resolves to.
        let mut groups: Vec<Vec<&str>> = Vec::with_capacity(raw_terms.len());
        for term in &raw_terms {
            if regex {
                let re = regex::Regex::new(&format!("(?i)^(?:{})$", term))
                    .map_err(|e| CacheError::InvalidQuery(format!("invalid regex '{}': {}", term, e)))?;
                groups.push(self.index.keys().filter(|k| re.is_match(k)).map(String::as_str).collect());
            } else {
                groups.push(vec![term.as_str()]);
            }
        }

        let total_docs = self.doc_ids.len() as f64;
        let mut scores: HashMap<u32, (f64, usize, Vec<u32>, usize)> = HashMap::new();

        for group in &groups {
            let mut matched_in_group: Vec<u32> = Vec::new();
            for token in group {
                let Some(postings) = self.index.get(*token) else { continue };
                let doc_freq = postings.len() as f64;
                let idf = (total_docs / doc_freq).ln();
                for posting in postings {
                    let doc_total = self
                        .doc_token_counts
                        .get(posting.doc as usize)
                        .copied()
                        .unwrap_or(1)
                        .max(1) as f64;
                    let tf = posting.lines.len() as f64 / doc_total;
                    let entry = scores.entry(posting.doc).or_insert((0.0, 0, Vec::new(), 0));
                    entry.0 += tf * idf;
                    entry.1 += posting.lines.len();
                    entry.2.extend_from_slice(&posting.lines);
                    if !matched_in_group.contains(&posting.doc) {
                        matched_in_group.push(posting.doc);
                    }
                }
            }
            for doc in matched_in_group {
                if let Some(entry) = scores.get_mut(&doc) {
                    entry.3 += 1;
                }
            }
        }

        let mut hits: Vec<TextHit> = scores
            .into_iter()
            .filter(|(_, s)| !mode_and || s.3 >= groups.len())
            .filter_map(|(doc, (score, occurrences, mut lines, _))| {
                let id = *self.doc_ids.get(doc as usize)?;
                lines.sort_unstable();
                lines.dedup();
                Some(TextHit { id, score, occurrences, lines })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        if limit > 0 {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

impl IndexPayload for TextIndex {
    const KIND: &'static str = "text";
    const FILE_NAME: &'static str = TEXT_FILE;

    fn open_at(path: &Path, _options: &OpenOptions) -> Result<Self, CacheError> {
        let index: TextIndex = load_compressed(path, "text-index")?;
        if index.doc_token_counts.len() != index.doc_ids.len() {
            return Err(CacheError::open(path, "doc table and token counts disagree"));
        }
        Ok(index)
    }

    fn generation(&self) -> Option<&IndexVersion> {
        self.generation.as_ref()
    }
}
