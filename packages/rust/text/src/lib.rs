//! Text cleanup applied to course descriptions before embedding.
//!
//! Each pass is a function `&str -> String` applied in sequence:
//! lowercase, strip everything that is not an ASCII letter or whitespace,
//! then drop stopwords and short tokens.

mod stopwords;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Tokens of this length or shorter are dropped.
const MAX_DROPPED_TOKEN_LEN: usize = 2;

/// Union of the English and Portuguese stopword vocabularies.
///
/// Built on first use and shared by every caller in the process.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    let set: HashSet<&'static str> = stopwords::ENGLISH
        .iter()
        .chain(stopwords::PORTUGUESE.iter())
        .copied()
        .collect();
    tracing::debug!(count = set.len(), "stopword vocabulary loaded");
    set
});

/// The process-wide stopword set.
pub fn stopwords() -> &'static HashSet<&'static str> {
    &STOPWORDS
}

/// Whether `word` (already lowercase) is a stopword.
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

/// Clean a single text field. `None` and empty input yield `""`.
pub fn normalize(text: Option<&str>) -> String {
    match text {
        Some(t) if !t.trim().is_empty() => filter_tokens(&strip_non_alpha(&t.to_lowercase())),
        _ => String::new(),
    }
}

/// Clean several fields and join the non-empty results with single spaces.
pub fn concat_fields<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    fields
        .into_iter()
        .map(normalize)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_non_alpha(text: &str) -> String {
    static NON_ALPHA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z\s]").expect("valid regex"));

    NON_ALPHA_RE.replace_all(text, "").to_string()
}

fn filter_tokens(text: &str) -> String {
    text.split_whitespace()
        .filter(|w| w.len() > MAX_DROPPED_TOKEN_LEN && !is_stopword(w))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(
            normalize(Some("Graph Theory, 2nd Edition!")),
            "graph theory edition"
        );
    }

    #[test]
    fn removes_english_and_portuguese_stopwords() {
        assert_eq!(
            normalize(Some("The study of algorithms para todos")),
            "study algorithms todos"
        );
        assert!(is_stopword("para"));
        assert!(is_stopword("the"));
        assert!(!is_stopword("graph"));
    }

    #[test]
    fn accented_letters_are_stripped() {
        assert_eq!(normalize(Some("Computação gráfica")), "computao grfica");
    }

    #[test]
    fn short_tokens_dropped() {
        assert_eq!(normalize(Some("ab abc x yz wxyz")), "abc wxyz");
    }

    #[test]
    fn empty_and_missing_input() {
        assert_eq!(normalize(None), "");
        assert_eq!(normalize(Some("")), "");
        assert_eq!(normalize(Some("   \n ")), "");
        assert_eq!(normalize(Some("123 !!! ??")), "");
    }

    #[test]
    fn concat_skips_empty_fields() {
        let joined = concat_fields([Some("Linear algebra"), None, Some("the"), Some("Matrices")]);
        assert_eq!(joined, "linear algebra matrices");
    }

    #[test]
    fn stopword_set_is_shared() {
        let a = stopwords() as *const _;
        let b = stopwords() as *const _;
        assert_eq!(a, b);
        assert!(stopwords().len() > 300);
    }
}
