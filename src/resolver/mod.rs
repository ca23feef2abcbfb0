//! Turns loosely specified (artist, album, track) descriptions into canonical
//! records.
//!
//! Resolution tries the exact identity lookup first. On a miss it ranks artist
//! candidates, searches the track under each of the best few, and accepts the
//! highest `artist score * track score` if it reaches the acceptance
//! threshold. Until the fuzzy index is ready, candidates come from the store's
//! own table search instead.

use crate::config::LibraryConfig;
use crate::error::LibraryResult;
use crate::identity_store::{
    AlbumRecord, ArtistRecord, EntityId, EntityKind, HintDescription, IdentityStore, TrackRecord,
};
use crate::search::{FuzzyIndex, ScoredMatch};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTrack {
    pub track: TrackRecord,
    pub artist: ArtistRecord,
    pub album: Option<AlbumRecord>,
    /// 1.0 for exact and hint resolutions, the combined score otherwise.
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    artist_id: EntityId,
    track_id: EntityId,
    score: f32,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        self.score > other.score || (self.score == other.score && self.track_id < other.track_id)
    }
}

pub struct Resolver {
    store: Arc<dyn IdentityStore>,
    index: Arc<FuzzyIndex>,
    acceptance_threshold: f32,
    artist_fan_out: usize,
}

impl Resolver {
    pub fn new(store: Arc<dyn IdentityStore>, index: Arc<FuzzyIndex>, config: &LibraryConfig) -> Self {
        Self {
            store,
            index,
            acceptance_threshold: config.acceptance_threshold,
            artist_fan_out: config.artist_fan_out.max(1),
        }
    }

    /// True while queries are served by the store-side fallback.
    pub fn is_degraded(&self) -> bool {
        !self.index.is_ready()
    }

    /// Ranked matches for `text` among entries of `kind`.
    pub fn search(&self, text: &str, kind: EntityKind, limit: usize) -> LibraryResult<Vec<ScoredMatch>> {
        self.candidates(text, kind, None, limit)
    }

    fn candidates(
        &self,
        text: &str,
        kind: EntityKind,
        scope: Option<EntityId>,
        limit: usize,
    ) -> LibraryResult<Vec<ScoredMatch>> {
        if self.index.is_ready() {
            return Ok(match scope {
                Some(artist_id) => self.index.query_scoped(text, kind, artist_id, limit),
                None => self.index.query(text, kind, limit),
            });
        }
        self.store.search_table(kind, scope, text, true, limit)
    }

    /// Best-matching track for the description, or `None` when nothing
    /// reaches the acceptance threshold.
    pub fn resolve_track(
        &self,
        artist_name: &str,
        album_name: &str,
        track_name: &str,
    ) -> LibraryResult<Option<ResolvedTrack>> {
        if let Some(artist_id) = self.store.resolve_artist_id(artist_name, false)? {
            if let Some(track_id) = self.store.resolve_track_id(artist_id, track_name, false)? {
                debug!("Exact match for '{} - {}'", artist_name, track_name);
                return self
                    .assemble(artist_id, track_id, album_name, 1.0)
                    .map(Some);
            }
        }

        let artists = self.candidates(artist_name, EntityKind::Artist, None, self.artist_fan_out)?;
        let mut best: Option<Candidate> = None;
        for artist in artists {
            // A track score never exceeds 1.0
            if artist.score < self.acceptance_threshold {
                continue;
            }
            let Some(track) = self
                .candidates(track_name, EntityKind::Track, Some(artist.id), 1)?
                .into_iter()
                .next()
            else {
                continue;
            };
            let candidate = Candidate {
                artist_id: artist.id,
                track_id: track.id,
                score: artist.score * track.score,
            };
            if best.map_or(true, |b| candidate.beats(&b)) {
                best = Some(candidate);
            }
        }

        match best {
            Some(candidate) if candidate.score >= self.acceptance_threshold => {
                debug!(
                    "Fuzzy match for '{} - {}': track {} with score {:.3}",
                    artist_name, track_name, candidate.track_id, candidate.score
                );
                self.assemble(
                    candidate.artist_id,
                    candidate.track_id,
                    album_name,
                    candidate.score,
                )
                .map(Some)
            }
            Some(candidate) => {
                debug!(
                    "Best match for '{} - {}' scored {:.3}, below threshold {}",
                    artist_name, track_name, candidate.score, self.acceptance_threshold
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Trusts the description and resolves it by exact lookup only.
    pub fn resolve_from_hint(&self, hint: &HintDescription) -> LibraryResult<Option<ResolvedTrack>> {
        let Some(track) = self.store.resolve_record_from_hint(hint)? else {
            return Ok(None);
        };
        let artist = self.store.load_artist_record(track.artist_id)?;
        let album = match self.store.resolve_album_id(artist.id, &hint.album, false)? {
            Some(album_id) => Some(self.store.load_album_record(album_id)?),
            None => None,
        };
        Ok(Some(ResolvedTrack {
            track,
            artist,
            album,
            score: 1.0,
        }))
    }

    fn assemble(
        &self,
        artist_id: EntityId,
        track_id: EntityId,
        album_name: &str,
        score: f32,
    ) -> LibraryResult<ResolvedTrack> {
        let track = self.store.load_track_record(track_id)?;
        let artist = self.store.load_artist_record(artist_id)?;
        let album = self.resolve_album(artist_id, album_name)?;
        Ok(ResolvedTrack {
            track,
            artist,
            album,
            score,
        })
    }

    fn resolve_album(&self, artist_id: EntityId, album_name: &str) -> LibraryResult<Option<AlbumRecord>> {
        if album_name.trim().is_empty() {
            return Ok(None);
        }
        let album_id = match self.store.resolve_album_id(artist_id, album_name, false)? {
            Some(id) => Some(id),
            None => self
                .candidates(album_name, EntityKind::Album, Some(artist_id), 1)?
                .into_iter()
                .find(|m| m.score >= self.acceptance_threshold)
                .map(|m| m.id),
        };
        album_id
            .map(|id| self.store.load_album_record(id))
            .transpose()
    }
}
