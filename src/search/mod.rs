//! Fuzzy search over artist, album and track names.

mod fuzzy_index;
mod levenshtein;
mod readiness;
mod scoring;

pub use fuzzy_index::{FuzzyIndex, FuzzyIndexStats, IndexEntry};
pub use levenshtein::levenshtein_similarity;
pub use readiness::{IndexReadiness, ReadinessListener, ReadinessSignal};
pub use scoring::{similarity, sort_matches, ScoredMatch, TrigramSignature};
