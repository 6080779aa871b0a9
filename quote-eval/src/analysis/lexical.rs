//! BM25 lexical overlap between two quote sets
//!
//! The ground-truth quotes form the reference corpus. Each system quote
//! contributes its best score against that corpus, and the sum is normalized
//! by the score the ground-truth quotes achieve against themselves.

use std::collections::HashMap;

use super::metrics::round4;
use crate::quotes::parse_quotes;

/// Okapi BM25 parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    /// Floor for non-positive IDF, as a fraction of the average IDF
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Lower-case and split on whitespace
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// BM25 index over a small tokenized corpus
#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    doc_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn new(corpus: &[Vec<String>]) -> Self {
        Self::with_params(corpus, Bm25Params::default())
    }

    pub fn with_params(corpus: &[Vec<String>], params: Bm25Params) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut containing: HashMap<String, usize> = HashMap::new();

        for document in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in document {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(document.len());
            doc_freqs.push(freqs);
        }

        let total_len: usize = doc_lens.iter().sum();
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total_len as f64 / corpus.len() as f64
        };

        let idf = Self::compute_idf(corpus.len(), &containing, params.epsilon);

        Self {
            params,
            doc_freqs,
            doc_lens,
            avgdl,
            idf,
        }
    }

    /// Okapi IDF; negative values are replaced by `epsilon * average_idf`.
    fn compute_idf(
        corpus_size: usize,
        containing: &HashMap<String, usize>,
        epsilon: f64,
    ) -> HashMap<String, f64> {
        let n = corpus_size as f64;
        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();

        for (term, &freq) in containing {
            let freq = freq as f64;
            let value = (n - freq + 0.5).ln() - (freq + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }

        if !idf.is_empty() {
            let floor = epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        idf
    }

    /// Number of documents in the corpus
    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Score `query` against every document, in corpus order
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        let Bm25Params { k1, b, .. } = self.params;
        let mut scores = vec![0.0; self.len()];

        for term in query {
            let Some(&idf) = self.idf.get(term) else {
                continue;
            };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                let len_norm = if self.avgdl > 0.0 {
                    self.doc_lens[i] as f64 / self.avgdl
                } else {
                    0.0
                };
                scores[i] += idf * (tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len_norm)));
            }
        }

        scores
    }

    /// Best score of `query` over the corpus, `0` for an empty corpus
    pub fn best_score(&self, query: &[String]) -> f64 {
        self.scores(query)
            .into_iter()
            .reduce(f64::max)
            .unwrap_or(0.0)
    }
}

/// Normalized BM25 score of `system_response` against `ground_truth`.
///
/// Returns a value in `[0, 1]` rounded to four decimals; `0` when either side
/// has no quotes or the self-similarity bound is zero.
pub fn bm25_score(ground_truth: &str, system_response: &str) -> f64 {
    let gt_quotes = parse_quotes(ground_truth);
    let sys_quotes = parse_quotes(system_response);
    if gt_quotes.is_empty() || sys_quotes.is_empty() {
        return 0.0;
    }

    let gt_tokens: Vec<Vec<String>> = gt_quotes.iter().map(|q| tokenize(q)).collect();
    let index = Bm25Index::new(&gt_tokens);

    let system_score: f64 = sys_quotes
        .iter()
        .map(|q| index.best_score(&tokenize(q)))
        .sum();
    let perfect_score: f64 = gt_tokens.iter().map(|q| index.best_score(q)).sum();

    if perfect_score == 0.0 {
        return 0.0;
    }

    let normalized = (system_score / perfect_score).min(1.0);
    if normalized.is_nan() {
        return 0.0;
    }
    // A mixed-sign corpus can push the ratio below zero.
    round4(normalized.max(0.0))
}
