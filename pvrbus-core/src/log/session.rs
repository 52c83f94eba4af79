//! Session and shard naming on disk

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::messages::{LogList, LogListEntry};

/// Placeholder replaced by the shard index in a shard filename pattern
pub const SHARD_PLACEHOLDER: &str = "{shard}";

/// Random 16 character lowercase session id
pub fn new_session_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Folder name of a session started now
pub fn session_folder_name(session_id: &str) -> String {
    let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    format!("{}--{}", session_id, stamp)
}

/// Shard filename pattern inside a session folder
pub(crate) fn shard_pattern(session_dir: &Path, folder_name: &str, extension: &str) -> String {
    session_dir
        .join(format!("{}--{}.{}", folder_name, SHARD_PLACEHOLDER, extension))
        .to_string_lossy()
        .into_owned()
}

/// Shard index embedded after the last `--` of a shard filename
pub fn shard_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.rsplit_once("--")?;
    index.parse().ok()
}

/// Shards of a session with the given extension, ordered by index
///
/// Files whose name carries no numeric index are skipped.
pub fn list_shards(session_dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut shards: Vec<(u64, PathBuf)> = std::fs::read_dir(session_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .filter_map(|path| shard_index(&path).map(|index| (index, path)))
        .collect();
    shards.sort_by_key(|(index, _)| *index);
    Ok(shards.into_iter().map(|(_, path)| path).collect())
}

/// Session folders under the log root, oldest modification first
pub fn list_sessions(log_root: &Path) -> std::io::Result<LogList> {
    let mut logs = Vec::new();
    for entry in std::fs::read_dir(log_root)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        logs.push(LogListEntry {
            id: entry.file_name().to_string_lossy().into_owned(),
            mtime,
        });
    }
    logs.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.id.cmp(&b.id)));
    Ok(LogList { logs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn test_shard_index_parsing() {
        assert_eq!(
            shard_index(Path::new("/logs/abc--2024-01-02-03-04-05--12.pvrlog")),
            Some(12)
        );
        assert_eq!(shard_index(Path::new("notes.txt")), None);
        assert_eq!(shard_index(Path::new("abc--x.pvrlog")), None);
    }

    #[test]
    fn test_shards_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for i in [10, 2, 1, 0] {
            std::fs::write(dir.path().join(format!("s--t--{}.pvrlog", i)), b"").unwrap();
        }
        std::fs::write(dir.path().join("README.md"), b"").unwrap();

        let shards = list_shards(dir.path(), "pvrlog").unwrap();
        let indices: Vec<_> = shards.iter().map(|p| shard_index(p).unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2, 10]);
    }

    #[test]
    fn test_list_sessions_skips_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("aaa--2024-01-01-00-00-00")).unwrap();
        std::fs::write(root.path().join("stray.pvrlog"), b"").unwrap();

        let list = list_sessions(root.path()).unwrap();
        assert_eq!(list.logs.len(), 1);
        assert_eq!(list.logs[0].id, "aaa--2024-01-01-00-00-00");
    }
}
