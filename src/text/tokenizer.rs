//! Text normalization pipeline.
//!
//! Every document and every query passes through the same steps, so a
//! query term always matches the dictionary form of the indexed term:
//!
//! 1. lowercase
//! 2. strip diacritics (the Spanish profile additionally folds `ñ → n`)
//! 3. split on non-alphanumeric characters
//! 4. drop the profile's stopwords
//!
//! Stemming is a deliberate non-feature; profiles only fold and filter.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Language profile controlling diacritic folding and stopword removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English stopwords, plain diacritic stripping.
    English,
    /// Spanish stopwords, diacritic stripping plus `ñ → n`.
    Spanish,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "spanish" | "es" => Ok(Language::Spanish),
            other => Err(format!("unknown language profile {other:?}")),
        }
    }
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "i", "in", "is", "it", "its", "nor", "not", "of", "on", "or", "she", "so",
    "that", "the", "their", "them", "they", "this", "to", "was", "we", "were", "will", "with",
    "you",
];

const SPANISH_STOPWORDS: &[&str] = &[
    "a", "al", "como", "con", "de", "del", "el", "ella", "ellas", "ellos", "en", "entre", "era",
    "es", "esta", "este", "esto", "fue", "ha", "han", "la", "las", "le", "les", "lo", "los",
    "mas", "mi", "muy", "no", "nos", "o", "para", "pero", "por", "que", "se", "si", "sin", "son",
    "su", "sus", "te", "tu", "un", "una", "uno", "y", "ya",
];

impl Language {
    fn stopwords(&self) -> &'static [&'static str] {
        match self {
            Language::English => ENGLISH_STOPWORDS,
            Language::Spanish => SPANISH_STOPWORDS,
        }
    }

    fn is_stopword(&self, token: &str) -> bool {
        self.stopwords().binary_search(&token).is_ok()
    }
}

/// Fold one character to its unaccented lowercase form.
///
/// Covers the Latin accents that occur in the supported profiles; anything
/// else passes through unchanged.
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Normalize and tokenize one piece of text.
pub fn tokenize(text: &str, language: Language) -> Vec<String> {
    let folded: String = text
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(fold_char)
        .collect();

    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !language.is_stopword(t))
        .map(str::to_string)
        .collect()
}

/// Tokenize a query, honoring `field:term` scoping.
///
/// A whitespace-separated chunk of the form `name:rest` produces tokens
/// `name:t` for each token `t` of `rest`; everything else tokenizes
/// plainly.  Scoped tokens match the field-qualified posting variants the
/// indexer writes alongside the plain ones.
pub fn tokenize_query(query: &str, language: Language) -> Vec<String> {
    let mut tokens = Vec::new();
    for chunk in query.split_whitespace() {
        match chunk.split_once(':') {
            Some((field, rest)) if !field.is_empty() => {
                let field = field.to_lowercase();
                for token in tokenize(rest, language) {
                    tokens.push(format!("{field}:{token}"));
                }
            }
            _ => tokens.extend(tokenize(chunk, language)),
        }
    }
    tokens
}
