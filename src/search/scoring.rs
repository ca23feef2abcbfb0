//! Trigram signatures and the similarity score shared by the fuzzy index and
//! the store-side fallback search.
//!
//! The score of a candidate against a query is the mean of two measures over
//! their normalized forms:
//! - the Dice coefficient of their trigram sets, which rewards shared
//!   fragments regardless of word order;
//! - the Levenshtein similarity, which penalizes each edit.
//!
//! Identical normalized forms always score exactly 1.0; anything else scores
//! strictly below it.

use super::levenshtein::levenshtein_similarity;
use crate::identity_store::EntityId;
use serde::Serialize;
use std::cmp::Ordering;
use unicode_segmentation::UnicodeSegmentation;

const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: EntityId,
    pub score: f32,
}

/// Sort by descending score, ties by ascending id.
pub fn sort_matches(matches: &mut [ScoredMatch]) {
    matches.sort_by(compare_matches);
}

pub fn compare_matches(a: &ScoredMatch, b: &ScoredMatch) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Sorted, deduplicated set of packed trigrams.
///
/// Each word is padded with two leading blanks and one trailing blank before
/// being cut into trigrams, so short words and word starts carry weight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrigramSignature {
    trigrams: Vec<u64>,
}

impl TrigramSignature {
    pub fn new(normalized: &str) -> Self {
        let mut trigrams = Vec::new();
        for word in normalized.unicode_words() {
            let padded: Vec<char> = "  "
                .chars()
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for window in padded.windows(3) {
                trigrams.push(pack(window[0], window[1], window[2]));
            }
        }
        trigrams.sort_unstable();
        trigrams.dedup();
        Self { trigrams }
    }

    pub fn trigrams(&self) -> &[u64] {
        &self.trigrams
    }

    pub fn len(&self) -> usize {
        self.trigrams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trigrams.is_empty()
    }

    pub fn shared_with(&self, other: &TrigramSignature) -> usize {
        let (mut i, mut j, mut shared) = (0, 0, 0);
        while i < self.trigrams.len() && j < other.trigrams.len() {
            match self.trigrams[i].cmp(&other.trigrams[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    shared += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        shared
    }

    pub fn dice(&self, other: &TrigramSignature) -> f32 {
        dice_from_counts(self.shared_with(other), self.len(), other.len())
    }
}

fn pack(a: char, b: char, c: char) -> u64 {
    // A char is at most 21 bits wide.
    ((a as u64) << 42) | ((b as u64) << 21) | (c as u64)
}

pub fn dice_from_counts(shared: usize, left: usize, right: usize) -> f32 {
    if left + right == 0 {
        return 0.0;
    }
    (2 * shared) as f32 / (left + right) as f32
}

/// Combine a precomputed Dice coefficient with the edit-distance refinement.
pub fn blend(dice: f32, query: &str, candidate: &str) -> f32 {
    if query == candidate {
        return 1.0;
    }
    let edit = levenshtein_similarity(query, candidate);
    let score = TRIGRAM_WEIGHT * dice + (1.0 - TRIGRAM_WEIGHT) * edit;
    // Only identical strings may reach 1.0
    score.min(0.999)
}

/// Score of a candidate that was not re-scored with edit distance: the blend
/// with zero edit similarity, so never above what `blend` would give it.
pub fn blend_lower_bound(dice: f32) -> f32 {
    (TRIGRAM_WEIGHT * dice).min(0.999)
}

/// Similarity of two normalized strings in [0, 1].
pub fn similarity(query: &str, candidate: &str) -> f32 {
    if query.is_empty() || candidate.is_empty() {
        return if query == candidate { 1.0 } else { 0.0 };
    }
    if query == candidate {
        return 1.0;
    }
    let dice = TrigramSignature::new(query).dice(&TrigramSignature::new(candidate));
    blend(dice, query, candidate)
}
