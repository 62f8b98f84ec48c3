//! Simplified suffix-stripping stemmers
//!
//! Not full Porter / Snowball: a handful of rules that collapse the common
//! inflections so `walked`, `walking` and `walks` share a token.

use super::Language;

/// Stem one lowercase word
pub fn stem(word: &str, language: Language) -> String {
    match language {
        Language::En => stem_en(word),
        Language::De => stem_de(word),
        Language::None => word.to_string(),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

fn has_vowel(s: &str) -> bool {
    s.chars().any(is_vowel)
}

fn ends_with_double_consonant(s: &str) -> bool {
    let mut rev = s.chars().rev();
    match (rev.next(), rev.next()) {
        (Some(a), Some(b)) => a == b && !is_vowel(a) && !matches!(a, 'l' | 's' | 'z'),
        _ => false,
    }
}

/// English: plural, past tense, gerund, `y`→`i`, a few derivational suffixes
pub fn stem_en(word: &str) -> String {
    if word.chars().count() <= 2 {
        return word.to_string();
    }
    let mut w = word.to_string();

    // Step 1a: plurals
    if let Some(base) = w.strip_suffix("sses") {
        w = format!("{}ss", base);
    } else if let Some(base) = w.strip_suffix("ies") {
        w = format!("{}i", base);
    } else if w.ends_with("ss") {
        // keep
    } else if w.ends_with('s') && w.chars().count() > 3 {
        w.pop();
    }

    // Step 1b: past tense and gerund
    if let Some(base) = w.strip_suffix("eed") {
        if has_vowel(base) {
            w = format!("{}ee", base);
        }
    } else {
        let stripped = w
            .strip_suffix("ed")
            .or_else(|| w.strip_suffix("ing"))
            .filter(|base| has_vowel(base))
            .map(str::to_string);
        if let Some(mut base) = stripped {
            if ends_with_double_consonant(&base) {
                base.pop();
            }
            w = base;
        }
    }

    // Step 1c: y → i after a consonant
    if let Some(base) = w.strip_suffix('y') {
        let prev_consonant = base.chars().last().map_or(false, |c| !is_vowel(c));
        if prev_consonant && has_vowel(base) {
            w = format!("{}i", base);
        }
    }

    // Step 2: derivational suffixes
    const STEP2: &[(&str, &str)] = &[
        ("ational", "ate"),
        ("tional", "tion"),
        ("alism", "al"),
        ("ation", "ate"),
        ("ness", ""),
        ("enci", "enc"),
    ];
    for (suffix, replacement) in STEP2 {
        if let Some(base) = w.strip_suffix(suffix) {
            if has_vowel(base) {
                w = format!("{}{}", base, replacement);
            }
            break;
        }
    }
    w
}

/// German: inflection endings, then nominal suffixes on long words
pub fn stem_de(word: &str) -> String {
    if word.chars().count() <= 3 {
        return word.to_string();
    }
    let mut w = word.to_string();
    for suffix in ["ern", "em", "en", "er", "es", "e"] {
        if let Some(base) = w.strip_suffix(suffix) {
            w = base.to_string();
            break;
        }
    }
    if w == word && w.ends_with('s') && w.chars().count() > 4 {
        w.pop();
    }
    if w.chars().count() > 5 {
        for suffix in ["ung", "heit", "keit", "lich"] {
            if let Some(base) = w.strip_suffix(suffix) {
                w = base.to_string();
                break;
            }
        }
    }
    w
}
