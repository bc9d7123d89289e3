use std::collections::HashMap;

/// Lowercases, strips punctuation and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pairwise TF-IDF cosine similarity. The vector space is built from the two
/// inputs only; nothing is retained between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalService;

impl LexicalService {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, a: &str, b: &str) -> f64 {
        let docs = [term_counts(&normalize(a)), term_counts(&normalize(b))];
        let n = docs.len() as f64;

        let mut vocabulary: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            for term in doc.keys() {
                *vocabulary.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        // smoothed idf: ln((1 + n) / (1 + df)) + 1
        let idf = |term: &str| {
            let df = vocabulary.get(term).copied().unwrap_or(0) as f64;
            ((1.0 + n) / (1.0 + df)).ln() + 1.0
        };

        let weigh = |doc: &HashMap<String, usize>| -> HashMap<String, f64> {
            let mut weights: HashMap<String, f64> = doc
                .iter()
                .map(|(term, count)| (term.clone(), *count as f64 * idf(term)))
                .collect();
            let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm > 0.0 {
                for w in weights.values_mut() {
                    *w /= norm;
                }
            }
            weights
        };

        let left = weigh(&docs[0]);
        let right = weigh(&docs[1]);
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }

        let dot: f64 = left
            .iter()
            .filter_map(|(term, w)| right.get(term).map(|v| w * v))
            .sum();
        dot.clamp(0.0, 1.0)
    }
}

/// Terms are runs of at least two word characters.
fn term_counts(normalized: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in normalized.split_whitespace() {
        if token.chars().count() < 2 {
            continue;
        }
        *counts.entry(token.to_string()).or_insert(0) += 1;
    }
    counts
}
