use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::warn;
use walkdir::WalkDir;

/// Depth-first walk yielding every regular file under `root` exactly once,
/// sorted by file name at each level so the order is deterministic. An entry
/// that cannot be read (a directory removed mid-run, say) is skipped with a
/// warning; the walk continues.
pub fn walk_files(root: &Path) -> impl Iterator<Item = (PathBuf, Metadata)> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable entry: {err}");
                    return None;
                }
            };
            if !entry.file_type().is_file() {
                return None;
            }
            match entry.metadata() {
                Ok(metadata) => Some((entry.into_path(), metadata)),
                Err(err) => {
                    warn!("skipping {}: {err}", entry.path().display());
                    None
                }
            }
        })
}

/// Modification time as seconds since the epoch; the dedup key shared with
/// the remote machine tag. A file without a usable mtime (unreadable, or
/// older than the epoch) falls back to 0 with a warning, since 0 is the
/// timestamp it will dedup and be tagged under.
pub fn modified_unix(path: &Path, metadata: &Metadata) -> i64 {
    match metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
    {
        Some(elapsed) => elapsed.as_secs() as i64,
        None => {
            warn!("no usable mtime for {}, using 0", path.display());
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn yields_every_file_exactly_once() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("nested/c.jpg"), b"c").unwrap();
        std::fs::write(dir.path().join("nested/deeper/d.jpg"), b"d").unwrap();

        let names: Vec<String> = walk_files(dir.path())
            .map(|(path, _)| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 4);
        for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
            assert_eq!(names.iter().filter(|n| *n == name).count(), 1, "{name}");
        }
    }

    #[test]
    fn order_is_deterministic_and_sorted_per_level() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("z.jpg"), b"z").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("m.jpg"), b"m").unwrap();

        let first: Vec<PathBuf> = walk_files(dir.path()).map(|(path, _)| path).collect();
        let second: Vec<PathBuf> = walk_files(dir.path()).map(|(path, _)| path).collect();
        assert_eq!(first, second);
        assert_eq!(first[0].file_name().unwrap(), "a.jpg");
        assert_eq!(first[2].file_name().unwrap(), "z.jpg");
    }

    #[test]
    fn directories_are_not_yielded() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("only_dirs")).unwrap();
        assert_eq!(walk_files(dir.path()).count(), 0);
    }

    #[test]
    fn modified_unix_reports_a_recent_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.jpg");
        std::fs::write(&path, b"f").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(modified_unix(&path, &metadata) > 0);
    }

    #[test]
    fn pre_epoch_mtime_falls_back_to_zero() {
        use std::time::{Duration, UNIX_EPOCH};

        let dir = tempdir().unwrap();
        let path = dir.path().join("ancient.jpg");
        std::fs::write(&path, b"f").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(UNIX_EPOCH - Duration::from_secs(10))
            .unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(modified_unix(&path, &metadata), 0);
    }
}
