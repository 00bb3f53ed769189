use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"(?u)[\p{L}\p{M}\p{N}]+").expect("valid regex");
}

/// Tokenize text into lowercase word tokens using NFKC normalization.
///
/// A token is a maximal run of letters, combining marks and digits;
/// punctuation and whitespace only separate tokens. Empty input yields no tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    WORD.find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}
