//! SQLite-backed identity store.
//!
//! All writes, and every lookup that goes through the recently-resolved
//! caches, run under a single `Mutex` holding the write connection and the
//! caches together. Record loads, store-side search and hint lookups use a
//! round-robin pool of read-only connections.

use super::models::*;
use super::mru_cache::MruCache;
use super::schema::IDENTITY_VERSIONED_SCHEMAS;
use super::trait_def::{IdentityStore, IndexSource, MutationReceiver};
use crate::config::LibraryConfig;
use crate::error::{LibraryError, LibraryResult};
use crate::normalize::Normalizer;
use crate::search::{similarity, sort_matches, ScoredMatch};
use crate::sqlite_persistence::{read_schema_version, write_schema_version};
use anyhow::{bail, Context};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DBID_KEY: &str = "dbid";

type CacheKey = (Option<EntityId>, String);

/// Outcome of inserting a sort-key that was not found moments before.
#[derive(Debug, PartialEq, Eq)]
enum Insertion {
    Created(EntityId),
    /// Another connection committed the same key in between.
    Adopted(EntityId),
}

struct Writer {
    conn: Connection,
    artists: MruCache<CacheKey, EntityId>,
    albums: MruCache<CacheKey, EntityId>,
    tracks: MruCache<CacheKey, EntityId>,
}

impl Writer {
    fn cache(&mut self, kind: EntityKind) -> &mut MruCache<CacheKey, EntityId> {
        match kind {
            EntityKind::Artist => &mut self.artists,
            EntityKind::Album => &mut self.albums,
            EntityKind::Track => &mut self.tracks,
        }
    }

    fn forget(&mut self, kind: EntityKind, id: EntityId) {
        self.cache(kind).retain(|_, cached| *cached != id);
    }
}

pub struct SqliteIdentityStore {
    writer: Mutex<Writer>,
    read_pool: Vec<Arc<Mutex<Connection>>>,
    read_index: AtomicUsize,
    normalizer: Normalizer,
    mutation_feed: Mutex<Option<UnboundedSender<MutationEvent>>>,
    feed_claimed: AtomicBool,
    dbid: String,
}

fn migrate_if_needed(conn: &mut Connection) -> anyhow::Result<()> {
    let latest_version = IDENTITY_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &IDENTITY_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;

    if table_count == 0 {
        info!("Creating identity db schema at version {}", latest_version);
        let tx = conn.transaction()?;
        latest_schema.create(&tx)?;
        tx.execute(
            "INSERT INTO artist (id, name, sortname) VALUES (?1, ?2, ?3)",
            params![
                VARIOUS_ARTISTS_ID,
                VARIOUS_ARTISTS_NAME,
                Normalizer::default().normalize(VARIOUS_ARTISTS_NAME, true)
            ],
        )?;
        tx.commit()?;
        return Ok(());
    }

    let Some(mut current_version) = read_schema_version(conn)? else {
        bail!("Database has tables but no schema version");
    };
    if current_version > latest_version {
        bail!(
            "Database schema version {} is newer than the supported version {}",
            current_version,
            latest_version
        );
    }

    if current_version < latest_version {
        let tx = conn.transaction()?;
        for schema in IDENTITY_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            let Some(migration_fn) = schema.migration else {
                bail!("No migration to schema version {}", schema.version);
            };
            info!(
                "Migrating identity db from version {} to {}",
                current_version, schema.version
            );
            migration_fn(&tx).with_context(|| {
                format!("Migration to schema version {} failed", schema.version)
            })?;
            current_version = schema.version;
        }
        write_schema_version(&tx, current_version)?;
        tx.commit()?;
    }

    latest_schema
        .validate(conn)
        .context("On-disk schema does not match the expected schema")
}

fn load_or_create_dbid(conn: &Connection) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![DBID_KEY],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(dbid) = existing {
        return Ok(dbid);
    }

    let dbid = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)",
        params![DBID_KEY, dbid],
    )?;
    info!("Generated database id {}", dbid);
    Ok(dbid)
}

impl SqliteIdentityStore {
    /// Open (creating if needed) the identity database at `config.db_path`.
    ///
    /// Fails with `SchemaError` if the on-disk schema cannot be brought to the
    /// version this code expects.
    pub fn new(config: &LibraryConfig) -> LibraryResult<Self> {
        Self::open(
            &config.db_path,
            config.normalizer(),
            config.read_pool_size,
            config.identity_cache_size,
        )
    }

    pub fn open<P: AsRef<Path>>(
        db_path: P,
        normalizer: Normalizer,
        read_pool_size: usize,
        cache_size: usize,
    ) -> LibraryResult<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        write_conn.busy_timeout(BUSY_TIMEOUT)?;
        write_conn.pragma_update(None, "foreign_keys", "ON")?;

        migrate_if_needed(&mut write_conn)
            .map_err(|e| LibraryError::SchemaError(format!("{:#}", e)))?;

        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        let dbid = load_or_create_dbid(&write_conn)?;

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.busy_timeout(BUSY_TIMEOUT)?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        let store = SqliteIdentityStore {
            writer: Mutex::new(Writer {
                conn: write_conn,
                artists: MruCache::new(cache_size),
                albums: MruCache::new(cache_size),
                tracks: MruCache::new(cache_size),
            }),
            read_pool,
            read_index: AtomicUsize::new(0),
            normalizer,
            mutation_feed: Mutex::new(None),
            feed_claimed: AtomicBool::new(false),
            dbid,
        };

        let counts = store.counts()?;
        info!(
            "Opened identity db {}: {} artists, {} albums, {} tracks",
            store.dbid, counts.artists, counts.albums, counts.tracks
        );
        Ok(store)
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    /// Push an event to the index maintainer, if one is listening.
    ///
    /// Called with the writer lock held so events arrive in commit order.
    fn emit(&self, event: MutationEvent) {
        let mut feed = self.mutation_feed.lock().unwrap();
        if let Some(tx) = feed.as_ref() {
            if tx.send(event).is_err() {
                debug!("Mutation feed closed, dropping further events");
                *feed = None;
            }
        }
    }

    // =========================================================================
    // Internal Helper Methods
    // =========================================================================

    fn find_id(
        conn: &Connection,
        kind: EntityKind,
        scope: Option<EntityId>,
        sortname: &str,
    ) -> LibraryResult<Option<EntityId>> {
        let found = match scope {
            None => conn
                .prepare_cached("SELECT id FROM artist WHERE sortname = ?1")?
                .query_row(params![sortname], |r| r.get(0))
                .optional()?,
            Some(artist_id) => conn
                .prepare_cached(&format!(
                    "SELECT id FROM {} WHERE artist_id = ?1 AND sortname = ?2",
                    kind.table_name()
                ))?
                .query_row(params![artist_id, sortname], |r| r.get(0))
                .optional()?,
        };
        Ok(found)
    }

    fn insert_row(
        conn: &Connection,
        kind: EntityKind,
        scope: Option<EntityId>,
        name: &str,
        sortname: &str,
    ) -> LibraryResult<EntityId> {
        match scope {
            None => conn.execute(
                "INSERT INTO artist (name, sortname) VALUES (?1, ?2)",
                params![name, sortname],
            )?,
            Some(artist_id) => conn.execute(
                &format!(
                    "INSERT INTO {} (artist_id, name, sortname) VALUES (?1, ?2, ?3)",
                    kind.table_name()
                ),
                params![artist_id, name, sortname],
            )?,
        };
        let rowid = conn.last_insert_rowid();
        match EntityId::try_from(rowid) {
            Ok(id) => Ok(id),
            Err(_) => {
                conn.execute(
                    &format!("DELETE FROM {} WHERE id = ?1", kind.table_name()),
                    params![rowid],
                )?;
                Err(LibraryError::IdOutOfRange(rowid))
            }
        }
    }

    /// Insert a new row, falling back to the row another connection created
    /// with the same key.
    fn insert_or_adopt(
        conn: &Connection,
        kind: EntityKind,
        scope: Option<EntityId>,
        name: &str,
        sortname: &str,
    ) -> LibraryResult<Insertion> {
        match Self::insert_row(conn, kind, scope, name, sortname) {
            Ok(id) => Ok(Insertion::Created(id)),
            Err(LibraryError::ConstraintViolation(reason)) => {
                warn!(
                    "Constraint violation creating {} '{}', retrying read: {}",
                    kind, name, reason
                );
                let existing = Self::find_id(conn, kind, scope, sortname)?
                    .ok_or(LibraryError::ConstraintViolation(reason))?;
                Ok(Insertion::Adopted(existing))
            }
            Err(e) => Err(e),
        }
    }

    fn row_exists(conn: &Connection, kind: EntityKind, id: EntityId) -> LibraryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", kind.table_name()),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn owning_artist(
        conn: &Connection,
        kind: EntityKind,
        id: EntityId,
    ) -> LibraryResult<Option<EntityId>> {
        if !kind.is_artist_scoped() {
            return Ok(None);
        }
        let artist_id = conn.query_row(
            &format!("SELECT artist_id FROM {} WHERE id = ?1", kind.table_name()),
            params![id],
            |r| r.get(0),
        )?;
        Ok(Some(artist_id))
    }

    /// Get-or-create shared by the three `resolve_*_id` operations.
    fn get_or_create(
        &self,
        kind: EntityKind,
        scope: Option<EntityId>,
        name: &str,
        auto_create: bool,
    ) -> LibraryResult<Option<EntityId>> {
        let sortname = self.normalizer.normalize(name, kind.strips_article());
        if sortname.is_empty() {
            return Ok(None);
        }
        let cache_key = (scope, sortname);

        let mut writer = self.writer.lock().unwrap();
        if let Some(id) = writer.cache(kind).get(&cache_key) {
            return Ok(Some(id));
        }

        if let Some(id) = Self::find_id(&writer.conn, kind, scope, &cache_key.1)? {
            writer.cache(kind).insert(cache_key, id);
            return Ok(Some(id));
        }
        if !auto_create {
            return Ok(None);
        }

        if let Some(artist_id) = scope {
            if !Self::row_exists(&writer.conn, EntityKind::Artist, artist_id)? {
                return Err(LibraryError::not_found(EntityKind::Artist, artist_id));
            }
        }

        let display_name = name.trim();
        let id = match Self::insert_or_adopt(&writer.conn, kind, scope, display_name, &cache_key.1)? {
            Insertion::Created(id) => id,
            Insertion::Adopted(existing) => {
                writer.cache(kind).insert(cache_key, existing);
                return Ok(Some(existing));
            }
        };

        debug!("Created {} {} '{}'", kind, id, display_name);
        writer.cache(kind).insert(cache_key, id);
        self.emit(MutationEvent::Created(SearchableItem {
            kind,
            id,
            artist_id: scope,
            name: display_name.to_string(),
        }));
        Ok(Some(id))
    }

    /// Read-only exact lookup, bypassing the caches.
    fn lookup_id(
        &self,
        kind: EntityKind,
        scope: Option<EntityId>,
        name: &str,
    ) -> LibraryResult<Option<EntityId>> {
        let sortname = self.normalizer.normalize(name, kind.strips_article());
        if sortname.is_empty() {
            return Ok(None);
        }
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        Self::find_id(&conn, kind, scope, &sortname)
    }

    pub fn get_track_file_ids(&self, track_id: EntityId) -> LibraryResult<Vec<FileId>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        Self::track_file_ids(&conn, track_id)
    }

    fn track_file_ids(conn: &Connection, track_id: EntityId) -> LibraryResult<Vec<FileId>> {
        let mut stmt = conn
            .prepare_cached("SELECT file_id FROM track_file WHERE track_id = ?1 ORDER BY file_id")?;
        let file_ids = stmt
            .query_map(params![track_id], |r| r.get(0))?
            .collect::<Result<Vec<FileId>, _>>()?;
        Ok(file_ids)
    }

    fn count(conn: &Connection, table: &str) -> LibraryResult<usize> {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
            r.get(0)
        })?;
        Ok(count as usize)
    }
}

/// Escape LIKE wildcards so user text only matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl IdentityStore for SqliteIdentityStore {
    fn resolve_artist_id(&self, name: &str, auto_create: bool) -> LibraryResult<Option<EntityId>> {
        self.get_or_create(EntityKind::Artist, None, name, auto_create)
    }

    fn resolve_album_id(
        &self,
        artist_id: EntityId,
        name: &str,
        auto_create: bool,
    ) -> LibraryResult<Option<EntityId>> {
        self.get_or_create(EntityKind::Album, Some(artist_id), name, auto_create)
    }

    fn resolve_track_id(
        &self,
        artist_id: EntityId,
        name: &str,
        auto_create: bool,
    ) -> LibraryResult<Option<EntityId>> {
        self.get_or_create(EntityKind::Track, Some(artist_id), name, auto_create)
    }

    fn search_table(
        &self,
        kind: EntityKind,
        scope: Option<EntityId>,
        text: &str,
        fulltext: bool,
        limit: usize,
    ) -> LibraryResult<Vec<ScoredMatch>> {
        let normalized = self.normalizer.normalize(text, kind.strips_article());
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let mut conditions = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if fulltext {
            for word in normalized.split(' ') {
                values.push(Value::Text(format!("%{}%", escape_like(word))));
                conditions.push(format!("sortname LIKE ?{} ESCAPE '\\'", values.len()));
            }
        } else {
            values.push(Value::Text(format!("{}%", escape_like(&normalized))));
            conditions.push(format!("sortname LIKE ?{} ESCAPE '\\'", values.len()));
        }
        let mut sql = format!(
            "SELECT id, sortname FROM {} WHERE ({})",
            kind.table_name(),
            conditions.join(" OR ")
        );
        if let (Some(artist_id), true) = (scope, kind.is_artist_scoped()) {
            values.push(Value::Integer(artist_id as i64));
            sql.push_str(&format!(" AND artist_id = ?{}", values.len()));
        }

        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, EntityId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut matches: Vec<ScoredMatch> = rows
            .into_iter()
            .map(|(id, sortname)| ScoredMatch {
                id,
                score: similarity(&normalized, &sortname),
            })
            .collect();
        sort_matches(&mut matches);
        if limit > 0 {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    fn load_artist_record(&self, id: EntityId) -> LibraryResult<ArtistRecord> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let artist = conn
            .prepare_cached("SELECT id, name, sortname FROM artist WHERE id = ?1")?
            .query_row(params![id], |row| {
                Ok(ArtistRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    sortname: row.get(2)?,
                })
            })
            .optional()?;
        artist.ok_or_else(|| LibraryError::not_found(EntityKind::Artist, id))
    }

    fn load_album_record(&self, id: EntityId) -> LibraryResult<AlbumRecord> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let album = conn
            .prepare_cached("SELECT id, artist_id, name, sortname FROM album WHERE id = ?1")?
            .query_row(params![id], |row| {
                Ok(AlbumRecord {
                    id: row.get(0)?,
                    artist_id: row.get(1)?,
                    name: row.get(2)?,
                    sortname: row.get(3)?,
                })
            })
            .optional()?;
        album.ok_or_else(|| LibraryError::not_found(EntityKind::Album, id))
    }

    fn load_track_record(&self, id: EntityId) -> LibraryResult<TrackRecord> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let mut track = conn
            .prepare_cached("SELECT id, artist_id, name, sortname FROM track WHERE id = ?1")?
            .query_row(params![id], |row| {
                Ok(TrackRecord {
                    id: row.get(0)?,
                    artist_id: row.get(1)?,
                    name: row.get(2)?,
                    sortname: row.get(3)?,
                    file_ids: Vec::new(),
                })
            })
            .optional()?
            .ok_or_else(|| LibraryError::not_found(EntityKind::Track, id))?;
        track.file_ids = Self::track_file_ids(&conn, id)?;
        Ok(track)
    }

    fn resolve_record_from_hint(
        &self,
        hint: &HintDescription,
    ) -> LibraryResult<Option<TrackRecord>> {
        let Some(artist_id) = self.lookup_id(EntityKind::Artist, None, &hint.artist)? else {
            return Ok(None);
        };
        let Some(track_id) = self.lookup_id(EntityKind::Track, Some(artist_id), &hint.track)?
        else {
            return Ok(None);
        };
        debug!(
            "Hint '{} - {}' (confidence {}) resolved to track {}",
            hint.artist, hint.track, hint.source_confidence, track_id
        );
        self.load_track_record(track_id).map(Some)
    }

    fn correct_display_name(
        &self,
        kind: EntityKind,
        id: EntityId,
        new_name: &str,
    ) -> LibraryResult<()> {
        let sortname = self.normalizer.normalize(new_name, kind.strips_article());
        if sortname.is_empty() {
            return Err(LibraryError::ConstraintViolation(format!(
                "{} {} cannot be renamed to an empty name",
                kind, id
            )));
        }
        let display_name = new_name.trim();

        let mut writer = self.writer.lock().unwrap();
        let updated = writer.conn.execute(
            &format!(
                "UPDATE {} SET name = ?1, sortname = ?2 WHERE id = ?3",
                kind.table_name()
            ),
            params![display_name, sortname, id],
        )?;
        if updated == 0 {
            return Err(LibraryError::not_found(kind, id));
        }
        let artist_id = Self::owning_artist(&writer.conn, kind, id)?;
        writer.forget(kind, id);
        info!("Renamed {} {} to '{}'", kind, id, display_name);

        self.emit(MutationEvent::Updated(SearchableItem {
            kind,
            id,
            artist_id,
            name: display_name.to_string(),
        }));
        Ok(())
    }

    fn remove(&self, kind: EntityKind, id: EntityId) -> LibraryResult<()> {
        if kind == EntityKind::Artist && id == VARIOUS_ARTISTS_ID {
            return Err(LibraryError::ConstraintViolation(
                "The various-artists sentinel cannot be removed".to_string(),
            ));
        }

        let mut writer = self.writer.lock().unwrap();
        let deleted = writer.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table_name()),
            params![id],
        )?;
        if deleted == 0 {
            return Err(LibraryError::not_found(kind, id));
        }
        writer.forget(kind, id);
        info!("Removed {} {}", kind, id);

        self.emit(MutationEvent::Removed { kind, id });
        Ok(())
    }

    fn attach_file(&self, track_id: EntityId, file_id: FileId) -> LibraryResult<()> {
        let writer = self.writer.lock().unwrap();
        if !Self::row_exists(&writer.conn, EntityKind::Track, track_id)? {
            return Err(LibraryError::not_found(EntityKind::Track, track_id));
        }
        writer.conn.execute(
            "INSERT OR IGNORE INTO track_file (track_id, file_id) VALUES (?1, ?2)",
            params![track_id, file_id],
        )?;
        Ok(())
    }

    fn counts(&self) -> LibraryResult<StoreCounts> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        Ok(StoreCounts {
            artists: Self::count(&conn, "artist")?,
            albums: Self::count(&conn, "album")?,
            tracks: Self::count(&conn, "track")?,
            file_links: Self::count(&conn, "track_file")?,
        })
    }

    fn dbid(&self) -> &str {
        &self.dbid
    }
}

impl IndexSource for SqliteIdentityStore {
    fn enumerate_all_entries(&self) -> LibraryResult<Vec<SearchableItem>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();

        let mut items = Vec::new();
        let mut artists = conn.prepare_cached("SELECT id, name FROM artist ORDER BY id")?;
        for row in artists.query_map([], |row| {
            Ok(SearchableItem {
                kind: EntityKind::Artist,
                id: row.get(0)?,
                artist_id: None,
                name: row.get(1)?,
            })
        })? {
            items.push(row?);
        }

        for kind in [EntityKind::Album, EntityKind::Track] {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT id, artist_id, name FROM {} ORDER BY id",
                kind.table_name()
            ))?;
            for row in stmt.query_map([], |row| {
                Ok(SearchableItem {
                    kind,
                    id: row.get(0)?,
                    artist_id: Some(row.get(1)?),
                    name: row.get(2)?,
                })
            })? {
                items.push(row?);
            }
        }
        Ok(items)
    }

    fn recent_mutations(&self) -> Option<MutationReceiver> {
        if self.feed_claimed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.mutation_feed.lock().unwrap() = Some(tx);
        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteIdentityStore {
        SqliteIdentityStore::new(&LibraryConfig::new(dir.path().join("library.db"))).unwrap()
    }

    #[test]
    fn test_resolve_artist_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let before = store.counts().unwrap().artists;

        let first = store.resolve_artist_id("The Beatles", true).unwrap();
        let second = store.resolve_artist_id("the   beatles", true).unwrap();
        let third = store.resolve_artist_id("Beatles", true).unwrap();

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(store.counts().unwrap().artists, before + 1);

        let artist = store.load_artist_record(first.unwrap()).unwrap();
        assert_eq!(artist.name, "The Beatles");
        assert_eq!(artist.sortname, "beatles");
    }

    #[test]
    fn test_resolve_without_auto_create() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(store.resolve_artist_id("Nobody", false).unwrap(), None);
        assert_eq!(store.counts().unwrap().artists, 1);
        assert_eq!(store.resolve_artist_id("   ", true).unwrap(), None);
    }

    #[test]
    fn test_various_artists_sentinel_is_seeded() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let sentinel = store.load_artist_record(VARIOUS_ARTISTS_ID).unwrap();
        assert_eq!(sentinel.name, VARIOUS_ARTISTS_NAME);
        assert_eq!(
            store.resolve_artist_id("various artists", false).unwrap(),
            Some(VARIOUS_ARTISTS_ID)
        );
        let album = store
            .resolve_album_id(VARIOUS_ARTISTS_ID, "Now 42", true)
            .unwrap()
            .unwrap();
        assert_eq!(
            store.load_album_record(album).unwrap().artist_id,
            VARIOUS_ARTISTS_ID
        );
    }

    #[test]
    fn test_album_and_track_are_scoped_per_artist() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = store.resolve_artist_id("Artist A", true).unwrap().unwrap();
        let b = store.resolve_artist_id("Artist B", true).unwrap().unwrap();

        let track_a = store.resolve_track_id(a, "Intro", true).unwrap().unwrap();
        let track_b = store.resolve_track_id(b, "Intro", true).unwrap().unwrap();
        assert_ne!(track_a, track_b);
        assert_eq!(store.resolve_track_id(a, "INTRO", true).unwrap(), Some(track_a));

        // Articles are kept for albums and tracks
        let wall = store.resolve_album_id(a, "The Wall", true).unwrap().unwrap();
        let other = store.resolve_album_id(a, "Wall", true).unwrap().unwrap();
        assert_ne!(wall, other);

        let record = store.load_track_record(track_b).unwrap();
        assert_eq!(record.artist_id, b);
        assert!(store.load_artist_record(record.artist_id).is_ok());
    }

    #[test]
    fn test_create_under_unknown_artist_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let result = store.resolve_track_id(999, "Orphan", true);
        assert!(matches!(
            result,
            Err(LibraryError::NotFound {
                kind: EntityKind::Artist,
                ..
            })
        ));
        assert_eq!(store.resolve_track_id(999, "Orphan", false).unwrap(), None);
    }

    #[test]
    fn test_load_missing_records() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(matches!(
            store.load_artist_record(4242),
            Err(LibraryError::NotFound { .. })
        ));
        assert!(matches!(
            store.load_album_record(4242),
            Err(LibraryError::NotFound { .. })
        ));
        assert!(matches!(
            store.load_track_record(4242),
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_auto_create_yields_one_row() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.resolve_artist_id("Radiohead", true).unwrap())
            })
            .collect();
        let ids: Vec<Option<EntityId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids[0].is_some());
        assert!(ids.iter().all(|id| *id == ids[0]));
        let read_conn = store.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM artist WHERE sortname = 'radiohead'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_concurrent_writers_on_separate_handles() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(open_store(&dir));
        let second = Arc::new(open_store(&dir));

        let a = {
            let store = first.clone();
            thread::spawn(move || store.resolve_artist_id("Radiohead", true).unwrap())
        };
        let b = {
            let store = second.clone();
            thread::spawn(move || store.resolve_artist_id("radiohead", true).unwrap())
        };
        let (a, b) = (a.join().unwrap(), b.join().unwrap());
        assert_eq!(a, b);
        assert_eq!(first.counts().unwrap().artists, 2);
    }

    #[test]
    fn test_insert_adopts_row_committed_by_other_connection() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut rx = store.recent_mutations().unwrap();

        let other = Connection::open(dir.path().join("library.db")).unwrap();
        other.busy_timeout(BUSY_TIMEOUT).unwrap();
        other
            .execute(
                "INSERT INTO artist (name, sortname) VALUES ('Radiohead', 'radiohead')",
                [],
            )
            .unwrap();
        let committed = other.last_insert_rowid() as EntityId;

        // Lost race: the lookup missed, the insert hits the unique key
        {
            let writer = store.writer.lock().unwrap();
            let outcome = SqliteIdentityStore::insert_or_adopt(
                &writer.conn,
                EntityKind::Artist,
                None,
                "radiohead",
                "radiohead",
            )
            .unwrap();
            assert_eq!(outcome, Insertion::Adopted(committed));
        }

        assert_eq!(
            store.resolve_artist_id("Radiohead", true).unwrap(),
            Some(committed)
        );
        assert_eq!(store.counts().unwrap().artists, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rowid_beyond_entity_id_range_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        {
            let other = Connection::open(dir.path().join("library.db")).unwrap();
            other.busy_timeout(BUSY_TIMEOUT).unwrap();
            other
                .execute(
                    "INSERT INTO artist (id, name, sortname) VALUES (?1, 'Last', 'last')",
                    params![EntityId::MAX],
                )
                .unwrap();
        }

        let result = store.resolve_artist_id("Overflow", true);
        assert!(matches!(
            result,
            Err(LibraryError::IdOutOfRange(rowid)) if rowid == i64::from(EntityId::MAX) + 1
        ));
        assert_eq!(store.resolve_artist_id("Overflow", false).unwrap(), None);
        assert_eq!(
            store.resolve_artist_id("Last", false).unwrap(),
            Some(EntityId::MAX)
        );
    }

    #[test]
    fn test_dbid_is_stable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let dbid = open_store(&dir).dbid().to_string();
        assert_eq!(dbid.len(), 36);
        assert_eq!(open_store(&dir).dbid(), dbid);

        let other_dir = TempDir::new().unwrap();
        assert_ne!(open_store(&other_dir).dbid(), dbid);
    }

    #[test]
    fn test_migrates_v0_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.db");
        {
            let conn = Connection::open(&path).unwrap();
            IDENTITY_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                "INSERT INTO artist (id, name, sortname) VALUES (0, 'Various Artists', 'various artists'), (1, 'Low', 'low')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO track (artist_id, name, sortname) VALUES (1, 'Words', 'words')",
                [],
            )
            .unwrap();
        }

        let store = SqliteIdentityStore::new(&LibraryConfig::new(&path)).unwrap();
        let track = store.resolve_track_id(1, "Words", false).unwrap().unwrap();
        store.attach_file(track, 77).unwrap();
        assert_eq!(store.load_track_record(track).unwrap().file_ids(), &[77]);

        let read_conn = store.get_read_conn();
        let conn = read_conn.lock().unwrap();
        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(IDENTITY_VERSIONED_SCHEMAS.len() - 1)
        );
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.db");
        drop(open_store(&dir));
        {
            let conn = Connection::open(&path).unwrap();
            write_schema_version(&conn, 99).unwrap();
        }

        let result = SqliteIdentityStore::new(&LibraryConfig::new(&path));
        assert!(matches!(result, Err(LibraryError::SchemaError(msg)) if msg.contains("newer")));
    }

    #[test]
    fn test_foreign_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("CREATE TABLE unrelated (x INTEGER)", []).unwrap();
        }
        let result = SqliteIdentityStore::new(&LibraryConfig::new(&path));
        assert!(matches!(result, Err(LibraryError::SchemaError(_))));
    }

    #[test]
    fn test_search_table_prefix_and_fulltext() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let beatles = store.resolve_artist_id("The Beatles", true).unwrap().unwrap();
        let beach = store.resolve_artist_id("Beach House", true).unwrap().unwrap();
        let house = store.resolve_artist_id("House of Pain", true).unwrap().unwrap();

        let prefix = store
            .search_by_prefix_or_fuzzy(EntityKind::Artist, "bea", false, 0)
            .unwrap();
        let ids: Vec<EntityId> = prefix.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&beatles) && ids.contains(&beach));

        let fulltext = store
            .search_by_prefix_or_fuzzy(EntityKind::Artist, "house", true, 0)
            .unwrap();
        let ids: Vec<EntityId> = fulltext.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&beach) && ids.contains(&house));
        assert!(fulltext[0].score >= fulltext[1].score);

        let exact = store
            .search_by_prefix_or_fuzzy(EntityKind::Artist, "The Beatles", false, 1)
            .unwrap();
        assert_eq!(exact, vec![ScoredMatch { id: beatles, score: 1.0 }]);
    }

    #[test]
    fn test_search_table_escapes_wildcards_and_scopes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = store.resolve_artist_id("A", true).unwrap().unwrap();
        let b = store.resolve_artist_id("B", true).unwrap().unwrap();
        let pct = store.resolve_track_id(a, "100% Pure", true).unwrap().unwrap();
        store.resolve_track_id(a, "100 Pure", true).unwrap();
        store.resolve_track_id(b, "100% Pure", true).unwrap();

        let scoped = store
            .search_table(EntityKind::Track, Some(a), "100%", false, 0)
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, pct);
    }

    #[test]
    fn test_correct_display_name() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let typo = store.resolve_artist_id("Radiohaed", true).unwrap().unwrap();
        let other = store.resolve_artist_id("Portishead", true).unwrap().unwrap();

        store
            .correct_display_name(EntityKind::Artist, typo, "Radiohead")
            .unwrap();
        assert_eq!(store.resolve_artist_id("radiohead", false).unwrap(), Some(typo));
        assert_eq!(store.resolve_artist_id("Radiohaed", false).unwrap(), None);

        let collision = store.correct_display_name(EntityKind::Artist, other, "radiohead");
        assert!(matches!(collision, Err(LibraryError::ConstraintViolation(_))));
        assert!(matches!(
            store.correct_display_name(EntityKind::Artist, 4242, "x"),
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_never_reuses_ids() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let artist = store.resolve_artist_id("Low", true).unwrap().unwrap();
        let track = store.resolve_track_id(artist, "Words", true).unwrap().unwrap();

        // Still referenced by a track
        assert!(matches!(
            store.remove(EntityKind::Artist, artist),
            Err(LibraryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            store.remove(EntityKind::Artist, VARIOUS_ARTISTS_ID),
            Err(LibraryError::ConstraintViolation(_))
        ));

        store.remove(EntityKind::Track, track).unwrap();
        store.remove(EntityKind::Artist, artist).unwrap();
        assert_eq!(store.resolve_artist_id("Low", false).unwrap(), None);

        let again = store.resolve_artist_id("Low", true).unwrap().unwrap();
        assert!(again > artist);
        assert!(matches!(
            store.remove(EntityKind::Track, track),
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_attach_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let artist = store.resolve_artist_id("Low", true).unwrap().unwrap();
        let track = store.resolve_track_id(artist, "Words", true).unwrap().unwrap();

        store.attach_file(track, 9).unwrap();
        store.attach_file(track, 3).unwrap();
        store.attach_file(track, 9).unwrap();
        assert_eq!(store.get_track_file_ids(track).unwrap(), vec![3, 9]);
        assert_eq!(store.counts().unwrap().file_links, 2);

        assert!(matches!(
            store.attach_file(4242, 1),
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_hint_resolution_is_exact_only() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let artist = store.resolve_artist_id("The Beatles", true).unwrap().unwrap();
        let track = store.resolve_track_id(artist, "Let It Be", true).unwrap().unwrap();
        store.attach_file(track, 5).unwrap();

        let hint = HintDescription {
            artist: "beatles".to_string(),
            album: "Let It Be".to_string(),
            track: "let it be".to_string(),
            source_confidence: 0.9,
        };
        let record = store.resolve_record_from_hint(&hint).unwrap().unwrap();
        assert_eq!(record.id, track);
        assert_eq!(record.file_ids(), &[5]);

        let near_miss = HintDescription {
            track: "let it b".to_string(),
            ..hint
        };
        assert!(store.resolve_record_from_hint(&near_miss).unwrap().is_none());
        assert_eq!(store.counts().unwrap().tracks, 1);
    }

    #[test]
    fn test_mutation_feed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        // Nothing is queued before the feed is claimed
        let early = store.resolve_artist_id("Early", true).unwrap().unwrap();

        let mut rx = store.recent_mutations().unwrap();
        assert!(store.recent_mutations().is_none());

        let artist = store.resolve_artist_id("Low", true).unwrap().unwrap();
        store.resolve_artist_id("Low", true).unwrap();
        store
            .correct_display_name(EntityKind::Artist, artist, "LOW")
            .unwrap();
        store.remove(EntityKind::Artist, early).unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                MutationEvent::Created(SearchableItem {
                    kind: EntityKind::Artist,
                    id: artist,
                    artist_id: None,
                    name: "Low".to_string(),
                }),
                MutationEvent::Updated(SearchableItem {
                    kind: EntityKind::Artist,
                    id: artist,
                    artist_id: None,
                    name: "LOW".to_string(),
                }),
                MutationEvent::Removed {
                    kind: EntityKind::Artist,
                    id: early,
                },
            ]
        );
    }

    #[test]
    fn test_enumerate_all_entries() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let artist = store.resolve_artist_id("Low", true).unwrap().unwrap();
        let album = store.resolve_album_id(artist, "Things We Lost", true).unwrap().unwrap();
        let track = store.resolve_track_id(artist, "Words", true).unwrap().unwrap();

        let items = store.enumerate_all_entries().unwrap();
        assert_eq!(items.len(), 4);
        assert!(items.contains(&SearchableItem {
            kind: EntityKind::Album,
            id: album,
            artist_id: Some(artist),
            name: "Things We Lost".to_string(),
        }));
        assert!(items.contains(&SearchableItem {
            kind: EntityKind::Track,
            id: track,
            artist_id: Some(artist),
            name: "Words".to_string(),
        }));
    }
}
