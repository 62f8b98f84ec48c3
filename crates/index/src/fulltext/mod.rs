//! Fulltext analysis and ranking
//!
//! - `tokenizer`: word splitting, stopwords, umlaut folding
//! - `stemmer`: simplified English and German suffix stripping
//! - `bm25`: scoring with k1 = 1.2, b = 0.75
//!
//! Postings store per-document term frequency; document lengths are stored
//! separately. Corpus statistics (document count, average length) are
//! computed when a query runs rather than maintained as counters, so
//! concurrent writers never contend on a shared key.

pub mod bm25;
pub mod stemmer;
pub mod tokenizer;

use serde::{Deserialize, Serialize};

pub use bm25::CorpusStats;
pub use tokenizer::{normalize_text, tokenize};

/// Analyzer language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English rules and stopwords
    #[default]
    En,
    /// German rules and stopwords
    De,
    /// No language-specific processing
    None,
}

/// `"en"`, `"de"`, anything else is [`Language::None`]
pub fn parse_language(s: &str) -> Language {
    match s.trim().to_ascii_lowercase().as_str() {
        "en" | "english" => Language::En,
        "de" | "german" | "deutsch" => Language::De,
        _ => Language::None,
    }
}

/// Analyzer settings of a fulltext index
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FulltextConfig {
    /// Apply the language's stemmer
    pub stemming_enabled: bool,
    /// Language for stemming and built-in stopwords
    pub language: Language,
    /// Drop stopwords from documents and queries
    pub stopwords_enabled: bool,
    /// Extra stopwords on top of the built-in list
    pub stopwords: Vec<String>,
    /// Fold ä/ö/ü/ß to ae/oe/ue/ss
    pub normalize_umlauts: bool,
}

/// A query split into AND-ed terms and quoted phrases
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedQuery {
    /// Analyzed tokens of the whole query, deduplicated
    pub tokens: Vec<String>,
    /// Normalized quoted phrases, verified by substring match
    pub phrases: Vec<String>,
}

/// Parse `query` with the index's analyzer.
///
/// Quoted sections become phrases; their words also count as terms.
pub fn parse_query(query: &str, config: &FulltextConfig) -> ParsedQuery {
    let mut phrases = Vec::new();
    for (i, part) in query.split('"').enumerate() {
        // Odd segments are inside quotes
        if i % 2 == 1 {
            let phrase = normalize_text(part, config);
            if !phrase.is_empty() {
                phrases.push(phrase);
            }
        }
    }
    let mut tokens = tokenize(query, config);
    let mut seen = std::collections::HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    ParsedQuery { tokens, phrases }
}
