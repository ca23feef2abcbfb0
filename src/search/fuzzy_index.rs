//! In-memory fuzzy index over artist, album and track names.
//!
//! Every entry is stored with its normalized text and trigram signature. A
//! posting list per (kind, trigram) finds candidates sharing at least one
//! trigram with the query; candidates are ranked by trigram Dice coefficient,
//! and the best `refine_top_k` of them are re-scored with edit distance. The
//! rest keep a lower-bound score and rank after the refined ones.
//!
//! ## Consistency
//!
//! All state sits behind one `RwLock`. Incremental updates take the write lock
//! for a whole entry (or a whole batch), so readers never see an entry whose
//! postings disagree with its signature. A full rebuild scans and computes the
//! new tables without holding any lock and only takes the write lock to swap
//! them in. Changes applied while a scan is in flight are journaled and
//! replayed onto the new tables before the swap, so a scan that started
//! before a change cannot undo it.

use super::readiness::{IndexReadiness, ReadinessListener, ReadinessSignal};
use super::scoring::{
    blend, blend_lower_bound, compare_matches, dice_from_counts, sort_matches, ScoredMatch, TrigramSignature,
};
use crate::identity_store::{EntityId, EntityKind, MutationEvent, SearchableItem};
use crate::normalize::Normalizer;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Instant;
use tracing::{debug, info};

/// The index's unit: one artist, album or track name.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub kind: EntityKind,
    pub id: EntityId,
    /// Owning artist for albums and tracks.
    pub scope: Option<EntityId>,
    pub text: String,
    pub normalized: String,
    pub signature: TrigramSignature,
}

impl IndexEntry {
    pub fn from_item(item: &SearchableItem, normalizer: &Normalizer) -> Self {
        let normalized = normalizer.normalize(&item.name, item.kind.strips_article());
        let signature = TrigramSignature::new(&normalized);
        Self {
            kind: item.kind,
            id: item.id,
            scope: item.artist_id,
            text: item.name.clone(),
            normalized,
            signature,
        }
    }

    fn key(&self) -> (EntityKind, EntityId) {
        (self.kind, self.id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FuzzyIndexStats {
    pub indexed_entries: usize,
    pub readiness: IndexReadiness,
    pub rebuilds: usize,
}

#[derive(Debug, Clone)]
enum IndexChange {
    Upsert(IndexEntry),
    Remove(EntityKind, EntityId),
}

impl IndexChange {
    fn prepare(event: &MutationEvent, normalizer: &Normalizer) -> Self {
        match event {
            MutationEvent::Created(item) | MutationEvent::Updated(item) => {
                IndexChange::Upsert(IndexEntry::from_item(item, normalizer))
            }
            MutationEvent::Removed { kind, id } => IndexChange::Remove(*kind, *id),
        }
    }
}

#[derive(Default)]
struct IndexState {
    tables: IndexTables,
    /// Changes applied since the oldest in-flight scan started.
    journal: Vec<IndexChange>,
    scans_in_flight: usize,
}

impl IndexState {
    /// Returns whether the change touched an existing entry or added one.
    fn apply(&mut self, change: IndexChange) -> bool {
        if self.scans_in_flight > 0 {
            self.journal.push(change.clone());
        }
        self.tables.apply(change)
    }

    fn end_scan(&mut self) {
        self.scans_in_flight -= 1;
        if self.scans_in_flight == 0 {
            self.journal.clear();
        }
    }
}

#[derive(Default)]
struct IndexTables {
    entries: HashMap<(EntityKind, EntityId), IndexEntry>,
    postings: HashMap<(EntityKind, u64), HashSet<EntityId>>,
    exact: HashMap<(EntityKind, String), HashSet<EntityId>>,
}

impl IndexTables {
    fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut tables = IndexTables {
            entries: HashMap::with_capacity(entries.len()),
            ..Default::default()
        };
        for entry in entries {
            tables.insert(entry);
        }
        tables
    }

    fn apply(&mut self, change: IndexChange) -> bool {
        match change {
            IndexChange::Upsert(entry) => {
                self.insert(entry);
                true
            }
            IndexChange::Remove(kind, id) => self.remove(kind, id),
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        self.remove(entry.kind, entry.id);
        for trigram in entry.signature.trigrams() {
            self.postings
                .entry((entry.kind, *trigram))
                .or_default()
                .insert(entry.id);
        }
        self.exact
            .entry((entry.kind, entry.normalized.clone()))
            .or_default()
            .insert(entry.id);
        self.entries.insert(entry.key(), entry);
    }

    fn remove(&mut self, kind: EntityKind, id: EntityId) -> bool {
        let Some(old) = self.entries.remove(&(kind, id)) else {
            return false;
        };
        for trigram in old.signature.trigrams() {
            let key = (kind, *trigram);
            if let Some(ids) = self.postings.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.postings.remove(&key);
                }
            }
        }
        let exact_key = (kind, old.normalized);
        if let Some(ids) = self.exact.get_mut(&exact_key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.exact.remove(&exact_key);
            }
        }
        true
    }
}

pub struct FuzzyIndex {
    normalizer: Normalizer,
    refine_top_k: usize,
    state: RwLock<IndexState>,
    readiness: ReadinessSignal,
    rebuilds: AtomicUsize,
}

impl FuzzyIndex {
    pub fn new(normalizer: Normalizer, refine_top_k: usize) -> Self {
        Self {
            normalizer,
            refine_top_k: refine_top_k.max(1),
            state: RwLock::new(IndexState::default()),
            readiness: ReadinessSignal::new(),
            rebuilds: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Ranked matches for `text` among entries of `kind`. A `limit` of 0
    /// means unbounded.
    pub fn query(&self, text: &str, kind: EntityKind, limit: usize) -> Vec<ScoredMatch> {
        self.query_inner(text, kind, None, limit)
    }

    /// Like `query`, restricted to albums or tracks owned by `artist_id`.
    pub fn query_scoped(
        &self,
        text: &str,
        kind: EntityKind,
        artist_id: EntityId,
        limit: usize,
    ) -> Vec<ScoredMatch> {
        self.query_inner(text, kind, Some(artist_id), limit)
    }

    fn query_inner(
        &self,
        text: &str,
        kind: EntityKind,
        scope: Option<EntityId>,
        limit: usize,
    ) -> Vec<ScoredMatch> {
        let normalized = self.normalizer.normalize(text, kind.strips_article());
        if normalized.is_empty() {
            return Vec::new();
        }
        let signature = TrigramSignature::new(&normalized);

        let state = self.state.read().unwrap();
        let tables = &state.tables;
        let in_scope = |id: &EntityId| match scope {
            None => true,
            Some(artist_id) => tables
                .entries
                .get(&(kind, *id))
                .is_some_and(|e| e.scope == Some(artist_id)),
        };

        let mut shared: HashMap<EntityId, usize> = HashMap::new();
        for trigram in signature.trigrams() {
            if let Some(ids) = tables.postings.get(&(kind, *trigram)) {
                for id in ids.iter().filter(|id| in_scope(*id)) {
                    *shared.entry(*id).or_insert(0) += 1;
                }
            }
        }

        // Entries without any trigram (punctuation-only names) are reachable
        // by exact match only.
        let exact: Vec<EntityId> = tables
            .exact
            .get(&(kind, normalized.clone()))
            .map(|ids| ids.iter().copied().filter(|id| in_scope(id)).collect())
            .unwrap_or_default();

        let mut coarse: Vec<ScoredMatch> = shared
            .into_iter()
            .filter_map(|(id, count)| {
                let entry = tables.entries.get(&(kind, id))?;
                Some(ScoredMatch {
                    id,
                    score: dice_from_counts(count, signature.len(), entry.signature.len()),
                })
            })
            .collect();
        for id in &exact {
            if !coarse.iter().any(|m| m.id == *id) {
                coarse.push(ScoredMatch { id: *id, score: 1.0 });
            }
        }
        coarse.sort_by(compare_matches);
        let refined_count = self.refine_top_k.max(exact.len()).min(coarse.len());
        let unrefined = coarse.split_off(refined_count);

        let mut results: Vec<ScoredMatch> = coarse
            .into_iter()
            .filter_map(|m| {
                let entry = tables.entries.get(&(kind, m.id))?;
                Some(ScoredMatch {
                    id: m.id,
                    score: blend(m.score, &normalized, &entry.normalized),
                })
            })
            .collect();
        drop(state);

        if limit == 0 || limit > results.len() {
            results.extend(unrefined.into_iter().map(|m| ScoredMatch {
                id: m.id,
                score: blend_lower_bound(m.score),
            }));
        }
        sort_matches(&mut results);
        if limit > 0 {
            results.truncate(limit);
        }
        results
    }

    /// Display text of an indexed entry.
    pub fn text_of(&self, kind: EntityKind, id: EntityId) -> Option<String> {
        let state = self.state.read().unwrap();
        state.tables.entries.get(&(kind, id)).map(|e| e.text.clone())
    }

    // =========================================================================
    // Incremental maintenance
    // =========================================================================

    /// Insert or replace an entry.
    pub fn insert(&self, item: &SearchableItem) {
        let entry = IndexEntry::from_item(item, &self.normalizer);
        self.state.write().unwrap().apply(IndexChange::Upsert(entry));
    }

    pub fn update(&self, item: &SearchableItem) {
        self.insert(item)
    }

    /// Returns whether the entry was present.
    pub fn remove(&self, kind: EntityKind, id: EntityId) -> bool {
        self.state
            .write()
            .unwrap()
            .apply(IndexChange::Remove(kind, id))
    }

    /// Apply a batch of mutation events under a single write lock.
    pub fn apply_mutations(&self, events: &[MutationEvent]) {
        if events.is_empty() {
            return;
        }
        let prepared: Vec<IndexChange> = events
            .iter()
            .map(|event| IndexChange::prepare(event, &self.normalizer))
            .collect();

        let mut state = self.state.write().unwrap();
        for change in prepared {
            state.apply(change);
        }
        debug!("Applied {} index mutations", events.len());
    }

    // =========================================================================
    // Full rebuild
    // =========================================================================

    /// Replace the whole index with `items` and mark the index ready.
    pub fn rebuild(&self, items: Vec<SearchableItem>) -> usize {
        match self.rebuild_from(|| Ok::<_, Infallible>(items)) {
            Ok(count) => count,
            Err(never) => match never {},
        }
    }

    /// Replace the whole index with the result of `scan` and mark the index
    /// ready. Changes applied while `scan` runs are kept. If `scan` fails the
    /// current tables stay in place.
    pub fn rebuild_from<E>(
        &self,
        scan: impl FnOnce() -> Result<Vec<SearchableItem>, E>,
    ) -> Result<usize, E> {
        let start = Instant::now();
        let journal_start = {
            let mut state = self.state.write().unwrap();
            state.scans_in_flight += 1;
            state.journal.len()
        };

        let items = match scan() {
            Ok(items) => items,
            Err(e) => {
                self.state.write().unwrap().end_scan();
                return Err(e);
            }
        };
        info!("Rebuilding fuzzy index from {} items", items.len());

        let entries: Vec<IndexEntry> = items
            .par_iter()
            .map(|item| IndexEntry::from_item(item, &self.normalizer))
            .collect();
        let mut fresh = IndexTables::from_entries(entries);

        let count = {
            let mut state = self.state.write().unwrap();
            let missed = &state.journal[journal_start..];
            if !missed.is_empty() {
                debug!("Replaying {} changes made during the scan", missed.len());
            }
            for change in missed {
                fresh.apply(change.clone());
            }
            let count = fresh.entries.len();
            state.tables = fresh;
            state.end_scan();
            count
        };
        self.rebuilds.fetch_add(1, Ordering::SeqCst);

        info!(
            "Fuzzy index rebuilt: {} entries in {:?}",
            count,
            start.elapsed()
        );
        self.readiness.mark_ready();
        Ok(count)
    }

    // =========================================================================
    // Readiness and stats
    // =========================================================================

    pub fn is_ready(&self) -> bool {
        self.readiness.current() == IndexReadiness::Ready
    }

    pub fn readiness(&self) -> ReadinessListener {
        self.readiness.subscribe()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().tables.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FuzzyIndexStats {
        FuzzyIndexStats {
            indexed_entries: self.len(),
            readiness: self.readiness.current(),
            rebuilds: self.rebuilds.load(Ordering::SeqCst),
        }
    }
}
