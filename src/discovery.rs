use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::SONG_MARKERS;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Song corpus root is not a readable directory: {0}")]
    BadRoot(PathBuf),
    #[error("IO error while walking corpus: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Find every song folder under `root`: a folder qualifies iff it directly
/// contains a case-insensitive `info.dat` or `info.json` marker.
///
/// The result is sorted by path so train/val/test slicing over the list is
/// reproducible across runs and machines; directory traversal order is not.
pub fn find_song_folders(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::BadRoot(root.to_path_buf()));
    }

    let mut songs: BTreeSet<PathBuf> = BTreeSet::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if SONG_MARKERS.contains(&name.as_str()) {
            if let Some(parent) = entry.path().parent() {
                songs.insert(parent.to_path_buf());
            }
        }
    }

    log::info!("Discovered {} song folders under {}", songs.len(), root.display());
    Ok(songs.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"{}").unwrap();
    }

    #[test]
    fn test_finds_marker_folders_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a/info.dat"));
        touch(&root.join("b/INFO.DAT"));
        touch(&root.join("c/Info.Json"));
        touch(&root.join("nested/deeper/d/info.dat"));
        touch(&root.join("not_a_song/song.ogg"));

        let songs = find_song_folders(root).unwrap();
        assert_eq!(
            songs,
            vec![
                root.join("a"),
                root.join("b"),
                root.join("c"),
                root.join("nested/deeper/d"),
            ]
        );
    }

    #[test]
    fn test_marker_must_be_direct_child() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("outer/inner/info.dat"));

        let songs = find_song_folders(root).unwrap();
        // only `inner` qualifies, not `outer`
        assert_eq!(songs, vec![root.join("outer/inner")]);
    }

    #[test]
    fn test_result_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("zz/info.dat"));
        touch(&root.join("aa/info.dat"));
        touch(&root.join("mm/info.json"));

        let songs = find_song_folders(root).unwrap();
        let mut sorted = songs.clone();
        sorted.sort();
        assert_eq!(songs, sorted);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            find_song_folders(&missing),
            Err(DiscoveryError::BadRoot(_))
        ));
    }
}
