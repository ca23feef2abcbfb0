//! IdentityStore and IndexSource trait definitions.
//!
//! `IdentityStore` is what the resolver and library-import flows talk to.
//! `IndexSource` is the narrow view the index maintainer gets: a full scan and
//! the stream of committed mutations, nothing else.

use super::models::*;
use crate::error::LibraryResult;
use crate::search::ScoredMatch;
use tokio::sync::mpsc::UnboundedReceiver;

pub type MutationReceiver = UnboundedReceiver<MutationEvent>;

pub trait IdentityStore: Send + Sync {
    // =========================================================================
    // Get-or-create
    // =========================================================================

    /// Resolve an artist name to its id, creating the row when `auto_create`
    /// is set. Repeated calls with names that normalize equally return the
    /// same id. Names that normalize to nothing resolve to `None`.
    fn resolve_artist_id(&self, name: &str, auto_create: bool) -> LibraryResult<Option<EntityId>>;

    /// Same contract as `resolve_artist_id`, scoped under `artist_id`.
    fn resolve_album_id(
        &self,
        artist_id: EntityId,
        name: &str,
        auto_create: bool,
    ) -> LibraryResult<Option<EntityId>>;

    /// Same contract as `resolve_artist_id`, scoped under `artist_id`.
    fn resolve_track_id(
        &self,
        artist_id: EntityId,
        name: &str,
        auto_create: bool,
    ) -> LibraryResult<Option<EntityId>>;

    // =========================================================================
    // Store-side search
    // =========================================================================

    /// Search the persisted table directly.
    ///
    /// Prefix mode matches sort-keys starting with the normalized text;
    /// fulltext mode matches sort-keys containing any of its words. Results
    /// are sorted by descending score, ties by ascending id. `scope` restricts
    /// albums and tracks to one artist. A `limit` of 0 means unbounded.
    fn search_table(
        &self,
        kind: EntityKind,
        scope: Option<EntityId>,
        text: &str,
        fulltext: bool,
        limit: usize,
    ) -> LibraryResult<Vec<ScoredMatch>>;

    fn search_by_prefix_or_fuzzy(
        &self,
        kind: EntityKind,
        text: &str,
        fulltext: bool,
        limit: usize,
    ) -> LibraryResult<Vec<ScoredMatch>> {
        self.search_table(kind, None, text, fulltext, limit)
    }

    // =========================================================================
    // Record loading
    // =========================================================================

    fn load_artist_record(&self, id: EntityId) -> LibraryResult<ArtistRecord>;

    fn load_album_record(&self, id: EntityId) -> LibraryResult<AlbumRecord>;

    /// Loads the track together with the file ids attached to it.
    fn load_track_record(&self, id: EntityId) -> LibraryResult<TrackRecord>;

    /// Exact-normalized lookup of a trusted description. Never creates rows
    /// and never consults the fuzzy index.
    fn resolve_record_from_hint(&self, hint: &HintDescription)
        -> LibraryResult<Option<TrackRecord>>;

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Change the display name of a row. The sort-key follows; colliding with
    /// another row in the same scope is a `ConstraintViolation`.
    fn correct_display_name(&self, kind: EntityKind, id: EntityId, new_name: &str)
        -> LibraryResult<()>;

    /// Delete a row. Artists that still own albums or tracks, and the
    /// various-artists sentinel, cannot be removed.
    fn remove(&self, kind: EntityKind, id: EntityId) -> LibraryResult<()>;

    /// Attach an opaque file reference to a track. Attaching twice is a no-op.
    fn attach_file(&self, track_id: EntityId, file_id: FileId) -> LibraryResult<()>;

    // =========================================================================
    // Metadata
    // =========================================================================

    fn counts(&self) -> LibraryResult<StoreCounts>;

    /// Identifier of this database, generated once and persisted.
    fn dbid(&self) -> &str;
}

pub trait IndexSource: Send + Sync {
    /// Every artist, album and track currently stored.
    fn enumerate_all_entries(&self) -> LibraryResult<Vec<SearchableItem>>;

    /// Hand out the receiving end of the mutation feed. Only the first caller
    /// gets it.
    fn recent_mutations(&self) -> Option<MutationReceiver>;
}
