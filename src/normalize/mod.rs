//! Canonical sort-key computation for artist, album and track names.
//!
//! Names are first decomposed to Unicode Normalization Form KD, which splits
//! accented characters into a base character followed by combining marks and
//! maps compatibility forms (ligatures, full-width letters, superscripts) to
//! their plain equivalents. Combining marks are then dropped, the result is
//! lowercased and runs of whitespace collapse to a single space.
//!
//! The output is used as a deduplication key, so it must never change for a
//! given input and configuration.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_LEADING_ARTICLES: &[&str] = &["the", "a", "an"];

#[derive(Debug, Clone)]
pub struct Normalizer {
    articles: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_LEADING_ARTICLES.iter().copied())
    }
}

impl Normalizer {
    pub fn new<I, S>(articles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let articles = articles
            .into_iter()
            .map(|a| fold(a.as_ref()))
            .filter(|a| !a.is_empty())
            .collect();
        Self { articles }
    }

    /// Produce the sort-key for `raw`.
    ///
    /// When `strip_leading_article` is set, a leading article is removed as
    /// long as at least one other word follows it ("The The" keeps its second
    /// word, "The" alone stays "the").
    pub fn normalize(&self, raw: &str, strip_leading_article: bool) -> String {
        let folded = fold(raw);
        if !strip_leading_article {
            return folded;
        }

        match folded.split_once(' ') {
            Some((first, rest)) if self.articles.iter().any(|a| a == first) => rest.to_string(),
            _ => folded,
        }
    }
}

/// Normalize with the default article list.
pub fn normalize(raw: &str, strip_leading_article: bool) -> String {
    Normalizer::default().normalize(raw, strip_leading_article)
}

fn fold(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.nfkd().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if is_combining_mark(ch) {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        // Letters that have no decomposition but are commonly typed without
        // their stroke or ligature.
        match ch {
            'ø' => out.push('o'),
            'ð' | 'đ' => out.push('d'),
            'ł' => out.push('l'),
            'ħ' => out.push('h'),
            'æ' => out.push_str("ae"),
            'œ' => out.push_str("oe"),
            'ß' => out.push_str("ss"),
            'þ' => out.push_str("th"),
            _ => out.push(ch),
        }
    }

    out
}
