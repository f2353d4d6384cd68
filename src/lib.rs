pub mod cache;
pub mod config;
pub mod dataset;
pub mod discovery;
pub mod extract;
pub mod words;

/// Marker files that identify a folder as one song (matched case-insensitively)
pub const SONG_MARKERS: &[&str] = &["info.dat", "info.json"];

/// Extension appended to an audio file's path to form its feature cache
pub const CACHE_SUFFIX: &str = "mfcc.pkl";

/// Bumped whenever the cached frame layout changes; stale caches are recomputed
pub const CACHE_VERSION: u32 = 2;

/// Application name for XDG paths
pub const APP_NAME: &str = "beatmill";
