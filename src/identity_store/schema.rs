//! SQLite schema definitions for the identity database.
//!
//! Ids are AUTOINCREMENT rowids so a deleted id is never handed out again.
//! Each table carries the display name as entered and the normalized
//! sort-key that deduplication runs on.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};
use rusqlite::Connection;

// =============================================================================
// Core Tables
// =============================================================================

const ARTIST_FK: ForeignKey = ForeignKey {
    foreign_table: "artist",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const TRACK_FK: ForeignKey = ForeignKey {
    foreign_table: "track",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ARTIST_TABLE: Table = Table {
    name: "artist",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_autoincrement = true
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("sortname", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["sortname"]],
};

const ALBUM_TABLE: Table = Table {
    name: "album",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_autoincrement = true
        ),
        sqlite_column!(
            "artist_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ARTIST_FK)
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("sortname", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_album_sortname", "sortname")],
    unique_constraints: &[&["artist_id", "sortname"]],
};

const TRACK_TABLE: Table = Table {
    name: "track",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_autoincrement = true
        ),
        sqlite_column!(
            "artist_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ARTIST_FK)
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("sortname", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_track_sortname", "sortname")],
    unique_constraints: &[&["artist_id", "sortname"]],
};

/// Key/value settings, currently only the database id.
const SETTINGS_TABLE: Table = Table {
    name: "settings",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// V1: file references
// =============================================================================

/// Track <-> file reference. File ids are opaque to this store.
const TRACK_FILE_TABLE: Table = Table {
    name: "track_file",
    columns: &[
        sqlite_column!(
            "track_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TRACK_FK)
        ),
        sqlite_column!("file_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_track_file_file", "file_id")],
    unique_constraints: &[&["track_id", "file_id"]],
};

fn migrate_v0_to_v1(conn: &Connection) -> anyhow::Result<()> {
    TRACK_FILE_TABLE.create(conn)
}

pub const IDENTITY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[ARTIST_TABLE, ALBUM_TABLE, TRACK_TABLE, SETTINGS_TABLE],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            ARTIST_TABLE,
            ALBUM_TABLE,
            TRACK_TABLE,
            SETTINGS_TABLE,
            TRACK_FILE_TABLE,
        ],
        migration: Some(migrate_v0_to_v1),
    },
];
