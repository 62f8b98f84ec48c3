//! Tokenizer and text normalization

use super::stemmer::stem;
use super::{FulltextConfig, Language};
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS_EN: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with",
];

const STOPWORDS_DE: &[&str] = &[
    "aber", "als", "am", "an", "auch", "auf", "aus", "bei", "bin", "bis", "das", "dass", "dem",
    "den", "der", "des", "die", "du", "ein", "eine", "einem", "einen", "einer", "eines", "er",
    "es", "für", "hat", "ich", "im", "in", "ist", "mit", "nicht", "noch", "oder", "sie", "sind",
    "so", "und", "von", "war", "was", "wie", "wir", "zu", "zum", "zur",
];

/// Built-in stopword list of a language
pub fn default_stopwords(language: Language) -> &'static [&'static str] {
    match language {
        Language::En => STOPWORDS_EN,
        Language::De => STOPWORDS_DE,
        Language::None => &[],
    }
}

/// Replace German umlauts and ß with their ASCII transliterations
pub fn normalize_umlauts(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'Ä' => out.push_str("Ae"),
            'Ö' => out.push_str("Oe"),
            'Ü' => out.push_str("Ue"),
            'ß' => out.push_str("ss"),
            other => out.push(other),
        }
    }
    out
}

/// Lowercase, optional umlaut folding, whitespace collapsed.
///
/// Phrase matching compares the normalized field text against the
/// normalized phrase.
pub fn normalize_text(text: &str, config: &FulltextConfig) -> String {
    let lowered = text.to_lowercase();
    let folded = if config.normalize_umlauts {
        normalize_umlauts(&lowered)
    } else {
        lowered
    };
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on whitespace and punctuation, lowercase
pub fn split_words(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Full analysis chain: split, lowercase, umlauts, stopwords, stemming
pub fn tokenize(text: &str, config: &FulltextConfig) -> Vec<String> {
    let builtin = if config.stopwords_enabled {
        default_stopwords(config.language)
    } else {
        &[]
    };
    split_words(text)
        .into_iter()
        .map(|w| {
            if config.normalize_umlauts {
                normalize_umlauts(&w)
            } else {
                w
            }
        })
        .filter(|w| {
            !config.stopwords_enabled
                || !(builtin.contains(&w.as_str()) || config.stopwords.iter().any(|s| s == w))
        })
        .map(|w| {
            if config.stemming_enabled {
                stem(&w, config.language)
            } else {
                w
            }
        })
        .filter(|w| !w.is_empty())
        .collect()
}
