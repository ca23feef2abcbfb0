//! Seeded library databases.

use super::constants::*;
use catalog_resolver::{IdentityStore, LibraryConfig, SqliteIdentityStore};
use std::path::Path;

/// Create a library at `db_path` holding the catalog described in
/// `constants.rs`. The store is closed before returning.
pub fn create_test_library(db_path: &Path) {
    let config = LibraryConfig::new(db_path);
    let store = SqliteIdentityStore::new(&config).expect("Failed to create test library");

    let beatles = artist(&store, ARTIST_BEATLES);
    album(&store, beatles, ALBUM_LET_IT_BE);
    album(&store, beatles, ALBUM_ABBEY_ROAD);
    track(&store, beatles, TRACK_LET_IT_BE);
    track(&store, beatles, TRACK_GET_BACK);
    track(&store, beatles, TRACK_COME_TOGETHER);

    let radiohead = artist(&store, ARTIST_RADIOHEAD);
    album(&store, radiohead, ALBUM_OK_COMPUTER);
    track(&store, radiohead, TRACK_PARANOID_ANDROID);
    track(&store, radiohead, TRACK_KARMA_POLICE);

    let sigur_ros = artist(&store, ARTIST_SIGUR_ROS);
    track(&store, sigur_ros, TRACK_HOPPIPOLLA);

    let metallica = artist(&store, ARTIST_METALLICA);
    track(&store, metallica, TRACK_ONE);
}

fn artist(store: &SqliteIdentityStore, name: &str) -> u32 {
    store
        .resolve_artist_id(name, true)
        .expect("Failed to create artist")
        .expect("Artist name normalized to nothing")
}

fn album(store: &SqliteIdentityStore, artist_id: u32, name: &str) -> u32 {
    store
        .resolve_album_id(artist_id, name, true)
        .expect("Failed to create album")
        .expect("Album name normalized to nothing")
}

fn track(store: &SqliteIdentityStore, artist_id: u32, name: &str) -> u32 {
    store
        .resolve_track_id(artist_id, name, true)
        .expect("Failed to create track")
        .expect("Track name normalized to nothing")
}
