use crate::config::STAGING_VERSION;
use crate::models::EntityClass;
use anyhow::{Context, Result};
use bincode::Options;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// External id → surrogate id, per entity class. Write-once per key.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StagingMap {
    classes: FxHashMap<EntityClass, FxHashMap<String, i64>>,
}

impl StagingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `external_id → surrogate_id` unless the key is already mapped.
    /// Returns the authoritative surrogate id (the first one recorded).
    pub fn record(&mut self, class: EntityClass, external_id: &str, surrogate_id: i64) -> i64 {
        let ids = self.classes.entry(class).or_default();
        if let Some(&existing) = ids.get(external_id) {
            return existing;
        }
        ids.insert(external_id.to_string(), surrogate_id);
        surrogate_id
    }

    pub fn lookup(&self, class: EntityClass, external_id: &str) -> Option<i64> {
        self.classes.get(&class)?.get(external_id).copied()
    }

    pub fn contains(&self, class: EntityClass, external_id: &str) -> bool {
        self.lookup(class, external_id).is_some()
    }

    pub fn len(&self, class: EntityClass) -> usize {
        self.classes.get(&class).map_or(0, FxHashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.values().all(FxHashMap::is_empty)
    }
}

/// A book → author link seen before the author's surrogate id is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub book_id: i64,
    pub author_key: String,
}

/// Everything the linking pass needs from an ingestion run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Staging {
    pub map: StagingMap,
    pub pending: Vec<UnresolvedReference>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, book_id: i64, author_key: &str) {
        self.pending.push(UnresolvedReference {
            book_id,
            author_key: author_key.to_string(),
        });
    }
}

#[derive(Deserialize)]
struct SnapshotDe {
    version: u32,
    input: String,
    staging: Staging,
}

/// Borrows the staging data so saving never clones the maps.
#[derive(Serialize)]
struct SnapshotSer<'a> {
    version: u32,
    input: &'a str,
    staging: &'a Staging,
}

/// Snapshot file kept next to the database.
pub fn snapshot_path(db_path: &str) -> PathBuf {
    PathBuf::from(format!("{db_path}.staging"))
}

/// Writes the snapshot atomically via a temp file and rename.
pub fn save_snapshot(path: &Path, input: &str, staging: &Staging) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let tmp_path = path.with_extension("staging.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp staging file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    bincode::DefaultOptions::new()
        .serialize_into(
            writer,
            &SnapshotSer {
                version: STAGING_VERSION,
                input,
                staging,
            },
        )
        .context("Failed to serialize staging snapshot")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp staging file to: {:?}", path))?;

    info!(
        authors = staging.map.len(EntityClass::Contributor),
        pending = staging.pending.len(),
        path = ?path,
        "Staging snapshot saved"
    );
    Ok(())
}

/// Returns `Ok(None)` when the snapshot is missing, corrupt or from another version.
pub fn load_snapshot(path: &Path) -> Result<Option<(String, Staging)>> {
    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(path).context("Failed to open staging snapshot")?;
    let reader = BufReader::with_capacity(256 * 1024, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let snapshot: SnapshotDe = match options.deserialize_from(reader) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Staging snapshot is corrupt or unreadable");
            return Ok(None);
        }
    };

    if snapshot.version != STAGING_VERSION {
        info!(
            cached = snapshot.version,
            current = STAGING_VERSION,
            "Staging snapshot version mismatch"
        );
        return Ok(None);
    }

    info!(
        input = %snapshot.input,
        pending = snapshot.staging.pending.len(),
        "Staging snapshot loaded"
    );
    Ok(Some((snapshot.input, snapshot.staging)))
}

pub fn discard_snapshot(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove staging snapshot: {:?}", path))?;
        info!("Staging snapshot discarded");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn record_is_first_writer_wins() {
        let mut map = StagingMap::new();
        assert_eq!(map.record(EntityClass::Contributor, "/a/1", 5), 5);
        assert_eq!(map.record(EntityClass::Contributor, "/a/1", 9), 5);
        assert_eq!(map.record(EntityClass::Contributor, "/a/1", 5), 5);
        assert_eq!(map.lookup(EntityClass::Contributor, "/a/1"), Some(5));
        assert_eq!(map.len(EntityClass::Contributor), 1);
    }

    #[test]
    fn classes_are_separate_namespaces() {
        let mut map = StagingMap::new();
        map.record(EntityClass::Contributor, "/x/1", 1);
        map.record(EntityClass::Edition, "/x/1", 2);
        assert_eq!(map.lookup(EntityClass::Contributor, "/x/1"), Some(1));
        assert_eq!(map.lookup(EntityClass::Edition, "/x/1"), Some(2));
        assert_eq!(map.lookup(EntityClass::Genre, "/x/1"), None);
    }

    #[test]
    fn lookup_missing_is_none() {
        let map = StagingMap::new();
        assert!(map.is_empty());
        assert_eq!(map.lookup(EntityClass::Contributor, "/a/404"), None);
        assert!(!map.contains(EntityClass::Contributor, "/a/404"));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path().join("books.db").to_str().unwrap());

        let mut staging = Staging::new();
        staging.map.record(EntityClass::Contributor, "/a/1", 5);
        staging.defer(10, "/a/1");
        staging.defer(11, "/a/2");
        save_snapshot(&path, "dump.txt", &staging).unwrap();

        let (input, loaded) = load_snapshot(&path).unwrap().unwrap();
        assert_eq!(input, "dump.txt");
        assert_eq!(loaded.map.lookup(EntityClass::Contributor, "/a/1"), Some(5));
        assert_eq!(loaded.pending, staging.pending);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_snapshot(&dir.path().join("nothing.staging"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.staging");
        File::create(&path)
            .unwrap()
            .write_all(b"not valid bincode")
            .unwrap();
        assert!(load_snapshot(&path).unwrap().is_none());
    }

    #[test]
    fn discard_removes_file_and_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.staging");
        save_snapshot(&path, "in", &Staging::new()).unwrap();
        assert!(path.exists());
        discard_snapshot(&path).unwrap();
        assert!(!path.exists());
        discard_snapshot(&path).unwrap();
    }
}
