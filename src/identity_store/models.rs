//! Records and events exposed by the identity store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer identity of an artist, album or track.
pub type EntityId = u32;

/// Opaque reference to a physical or remote resource attached to a track.
pub type FileId = u32;

/// Sentinel artist owning compilations and anything without a known artist.
pub const VARIOUS_ARTISTS_ID: EntityId = 0;
pub const VARIOUS_ARTISTS_NAME: &str = "Various Artists";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Track => "track",
        }
    }

    /// Only artist names lose their leading article ("The Beatles" sorts
    /// under B, while an album called "The Wall" keeps its title).
    pub fn strips_article(&self) -> bool {
        matches!(self, EntityKind::Artist)
    }

    /// Albums and tracks are unique per owning artist.
    pub fn is_artist_scoped(&self) -> bool {
        !matches!(self, EntityKind::Artist)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistRecord {
    pub id: EntityId,
    pub name: String,
    pub sortname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumRecord {
    pub id: EntityId,
    pub artist_id: EntityId,
    pub name: String,
    pub sortname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackRecord {
    pub id: EntityId,
    pub artist_id: EntityId,
    pub name: String,
    pub sortname: String,
    pub file_ids: Vec<FileId>,
}

impl TrackRecord {
    pub fn file_ids(&self) -> &[FileId] {
        &self.file_ids
    }
}

/// A row as seen by the fuzzy index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableItem {
    pub kind: EntityKind,
    pub id: EntityId,
    /// Owning artist for albums and tracks, `None` for artists.
    pub artist_id: Option<EntityId>,
    pub name: String,
}

/// Emitted by the store after a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Created(SearchableItem),
    Updated(SearchableItem),
    Removed { kind: EntityKind, id: EntityId },
}

impl MutationEvent {
    pub fn key(&self) -> (EntityKind, EntityId) {
        match self {
            MutationEvent::Created(item) | MutationEvent::Updated(item) => (item.kind, item.id),
            MutationEvent::Removed { kind, id } => (*kind, *id),
        }
    }
}

/// A near-exact description supplied by a trusted collaborator, such as a
/// peer that already resolved the track on its side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HintDescription {
    pub artist: String,
    #[serde(default)]
    pub album: String,
    pub track: String,
    #[serde(default)]
    pub source_confidence: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub file_links: usize,
}
