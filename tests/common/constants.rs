//! Names seeded into every test library.
//!
//! When the seeded catalog changes, update only this file and `fixtures.rs`.

// ============================================================================
// Artists
// ============================================================================

pub const ARTIST_BEATLES: &str = "The Beatles";
pub const ARTIST_RADIOHEAD: &str = "Radiohead";
pub const ARTIST_SIGUR_ROS: &str = "Sigur Rós";
pub const ARTIST_METALLICA: &str = "Metallica";

// ============================================================================
// Albums
// ============================================================================

pub const ALBUM_LET_IT_BE: &str = "Let It Be";
pub const ALBUM_ABBEY_ROAD: &str = "Abbey Road";
pub const ALBUM_OK_COMPUTER: &str = "OK Computer";

// ============================================================================
// Tracks
// ============================================================================

pub const TRACK_LET_IT_BE: &str = "Let It Be";
pub const TRACK_GET_BACK: &str = "Get Back";
pub const TRACK_COME_TOGETHER: &str = "Come Together";
pub const TRACK_PARANOID_ANDROID: &str = "Paranoid Android";
pub const TRACK_KARMA_POLICE: &str = "Karma Police";
pub const TRACK_HOPPIPOLLA: &str = "Hoppípolla";
pub const TRACK_ONE: &str = "One";

/// Entries seeded by `create_test_library`, the sentinel artist included.
pub const SEEDED_ENTRY_COUNT: usize = 5 + 3 + 7;
