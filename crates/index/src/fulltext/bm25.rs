//! BM25 scoring

/// Term frequency saturation
pub const K1: f64 = 1.2;
/// Length normalization
pub const B: f64 = 0.75;

/// Corpus-wide statistics for one fulltext index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusStats {
    /// Number of indexed documents
    pub doc_count: u64,
    /// Average document length in tokens
    pub avg_doc_len: f64,
}

/// Inverse document frequency, always positive
pub fn idf(doc_count: u64, doc_freq: u64) -> f64 {
    let n = doc_count as f64;
    let df = doc_freq as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Contribution of one term to a document's score
pub fn term_score(idf: f64, tf: u32, doc_len: u32, stats: &CorpusStats) -> f64 {
    let tf = tf as f64;
    let norm = if stats.avg_doc_len > 0.0 {
        doc_len as f64 / stats.avg_doc_len
    } else {
        1.0
    };
    idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * norm))
}
