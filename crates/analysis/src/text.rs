// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Message tokenization into filtered words and n-gram phrases.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use tailscope_pdata::normalize::strip_leading_severity;
use tailscope_pdata::timeparse;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("word regex is valid"));

/// The built-in stop-word list: common English function words that carry
/// no analytic signal as standalone terms. Phrases intentionally keep
/// them for linguistic coherence.
const STOP_WORDS: [&str; 70] = [
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "before", "being", "between", "both", "but", "by", "can", "could", "did", "do", "does",
    "down", "each", "for", "from", "had", "has", "have", "her", "here", "him", "his", "how", "if",
    "in", "into", "is", "it", "its", "just", "like", "more", "most", "my", "no", "not", "now",
    "of", "on", "only", "or", "other", "our", "out", "over", "should", "so", "some", "such",
    "than", "that", "the", "their", "them", "then", "there",
];

/// Minimum length for a token to count as a word.
const MIN_WORD_LEN: usize = 3;

/// Phrase n-gram sizes.
const MIN_PHRASE_LEN: usize = 2;
const MAX_PHRASE_LEN: usize = 4;

/// Tokenization output: filtered words plus every contiguous n-gram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analyzed {
    /// Lowercased identifier-like tokens, length ≥ 3, stop words removed.
    pub words: Vec<String>,
    /// Contiguous n-grams (n ∈ [2, 4]) over the unfiltered token stream.
    pub phrases: Vec<String>,
}

/// The message tokenizer.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    stop_words: HashSet<String>,
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        TextAnalyzer::new(&[])
    }
}

impl TextAnalyzer {
    /// Builds an analyzer with the built-in stop words plus caller
    /// extensions (lowercased; empty strings ignored).
    #[must_use]
    pub fn new(extra_stop_words: &[String]) -> TextAnalyzer {
        let mut stop_words: HashSet<String> =
            STOP_WORDS.iter().map(|w| (*w).to_owned()).collect();
        for word in extra_stop_words {
            let lowered = word.trim().to_lowercase();
            if !lowered.is_empty() {
                let _ = stop_words.insert(lowered);
            }
        }
        TextAnalyzer { stop_words }
    }

    /// Tokenizes one message. A leading timestamp and a leading severity
    /// token are stripped before tokenization so they do not pollute the
    /// frequency views.
    #[must_use]
    pub fn analyze(&self, line: &str) -> Analyzed {
        let without_timestamp = match timeparse::parse_from_text(line) {
            Some((_, rest)) => rest,
            None => line.to_owned(),
        };
        let message = strip_leading_severity(&without_timestamp);

        let tokens: Vec<String> = WORD_RE
            .find_iter(message)
            .map(|m| m.as_str().to_lowercase())
            .collect();

        let words = tokens
            .iter()
            .filter(|t| t.len() >= MIN_WORD_LEN && !self.stop_words.contains(t.as_str()))
            .cloned()
            .collect();

        let mut phrases = Vec::new();
        for n in MIN_PHRASE_LEN..=MAX_PHRASE_LEN {
            if tokens.len() < n {
                break;
            }
            for window in tokens.windows(n) {
                phrases.push(window.join(" "));
            }
        }

        Analyzed { words, phrases }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stop_word_list_has_seventy_entries() {
        assert_eq!(STOP_WORDS.len(), 70);
        let unique: HashSet<&str> = STOP_WORDS.iter().copied().collect();
        assert_eq!(unique.len(), 70);
    }

    #[test]
    fn words_are_lowercased_filtered_and_long_enough() {
        let analyzer = TextAnalyzer::default();
        let analyzed = analyzer.analyze("Connection to DB lost for the worker");
        assert_eq!(analyzed.words, vec!["connection", "lost", "worker"]);
    }

    #[test]
    fn phrases_keep_stop_words() {
        let analyzer = TextAnalyzer::default();
        let analyzed = analyzer.analyze("waiting for quorum");
        assert!(analyzed.phrases.contains(&"waiting for".to_owned()));
        assert!(analyzed.phrases.contains(&"for quorum".to_owned()));
        assert!(analyzed.phrases.contains(&"waiting for quorum".to_owned()));
    }

    #[test]
    fn ngram_sizes_span_two_to_four() {
        let analyzer = TextAnalyzer::default();
        let analyzed = analyzer.analyze("alpha beta gamma delta epsilon");
        // 4 bigrams + 3 trigrams + 2 four-grams.
        assert_eq!(analyzed.phrases.len(), 9);
        assert!(analyzed
            .phrases
            .contains(&"alpha beta gamma delta".to_owned()));
        assert!(!analyzed
            .phrases
            .contains(&"alpha beta gamma delta epsilon".to_owned()));
    }

    #[test]
    fn leading_timestamp_and_severity_stripped() {
        let analyzer = TextAnalyzer::default();
        let analyzed = analyzer.analyze("2024-01-15T10:00:00Z ERROR disk full");
        assert_eq!(analyzed.words, vec!["disk", "full"]);
        // "error" never enters the token stream.
        assert!(analyzed.phrases.iter().all(|p| !p.contains("error")));
    }

    #[test]
    fn custom_stop_words_extend_the_builtin_set() {
        let analyzer = TextAnalyzer::new(&["Kernel".to_owned(), "  ".to_owned()]);
        let analyzed = analyzer.analyze("kernel panic imminent");
        assert_eq!(analyzed.words, vec!["panic", "imminent"]);
    }

    #[test]
    fn identifiers_with_digits_and_underscores() {
        let analyzer = TextAnalyzer::default();
        let analyzed = analyzer.analyze("worker_7 retry2 failed x1");
        assert_eq!(analyzed.words, vec!["worker_7", "retry2", "failed"]);
    }
}
