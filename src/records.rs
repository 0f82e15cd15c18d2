use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, RECORD_NOT_FOUND};

pub const LIBRARY_FILE_NAME: &str = "library.json";

/// One stored game. Field names follow the camelCase layout of existing backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub id: String,
    pub name: String,
    pub content: String,
    pub added_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

/// Partial update merged into a stored record by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GameUpdate {
    pub fn last_played(at: i64) -> Self {
        Self {
            last_played: Some(at),
            ..Self::default()
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, record: &mut GameRecord) {
        if let Some(at) = self.last_played {
            record.last_played = Some(at);
        }
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
    }
}

/// Key-value persistence for game records.
pub trait RecordStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<GameRecord>>;

    /// Inserts or replaces the record with the same id.
    fn save(&self, record: &GameRecord) -> Result<()>;

    /// Inserts or replaces every record in `records`.
    fn save_all(&self, records: &[GameRecord]) -> Result<()> {
        for record in records {
            self.save(record)?;
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn get(&self, id: &str) -> Result<GameRecord> {
        self.load_all()?
            .into_iter()
            .find(|record| record.id == id)
            .ok_or_else(|| {
                anyhow!(CodedError::data(
                    RECORD_NOT_FOUND,
                    format!("no game with id '{id}'")
                )
                .with_details(json!({ "id": id })))
            })
    }

    fn apply_update(&self, id: &str, update: &GameUpdate) -> Result<GameRecord> {
        let mut record = self.get(id)?;
        update.apply_to(&mut record);
        self.save(&record)?;
        Ok(record)
    }
}

/// Callback through which a playback session asks the host to persist fields.
pub trait RecordUpdater: Send + Sync {
    fn update_record(&self, id: &str, update: GameUpdate) -> Result<()>;
}

impl<T: RecordStore + ?Sized> RecordUpdater for T {
    fn update_record(&self, id: &str, update: GameUpdate) -> Result<()> {
        self.apply_update(id, &update).map(|_| ())
    }
}

/// Most recently played first, then most recently added, then id.
pub fn sort_for_display(records: &mut [GameRecord]) {
    records.sort_by(|a, b| {
        b.last_played
            .unwrap_or(b.added_at)
            .cmp(&a.last_played.unwrap_or(a.added_at))
            .then_with(|| b.added_at.cmp(&a.added_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, GameRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = GameRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.lock();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, GameRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryRecordStore {
    fn load_all(&self) -> Result<Vec<GameRecord>> {
        Ok(self.lock().values().cloned().collect())
    }

    fn save(&self, record: &GameRecord) -> Result<()> {
        validate_record_id(&record.id)?;
        self.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.lock().remove(id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryFile {
    #[serde(default = "default_library_version")]
    pub version: u32,
    #[serde(default)]
    pub games: Vec<GameRecord>,
}

impl Default for LibraryFile {
    fn default() -> Self {
        Self {
            version: default_library_version(),
            games: Vec::new(),
        }
    }
}

fn default_library_version() -> u32 {
    1
}

/// Record store backed by one pretty-printed JSON file. Output is sorted by id
/// so rewrites are stable, and every write goes through a temp file + rename.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_file(&self) -> Result<LibraryFile> {
        if !self.path.exists() {
            return Ok(LibraryFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read game library {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(LibraryFile::default());
        }
        let mut file: LibraryFile = serde_json::from_str(&content).with_context(|| {
            format!("failed to parse game library JSON {}", self.path.display())
        })?;
        normalize_library_in_place(&mut file)?;
        Ok(file)
    }

    pub fn save_file(&self, file: &LibraryFile) -> Result<()> {
        let mut normalized = file.clone();
        normalize_library_in_place(&mut normalized)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create library directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(&normalized)
            .context("failed to serialize game library JSON")?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            tmp.write_all(json.as_bytes())
                .and_then(|()| tmp.write_all(b"\n"))
                .and_then(|()| tmp.sync_all())
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        }
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut LibraryFile)) -> Result<()> {
        let _guard = self
            .guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = self.load_file()?;
        change(&mut file);
        self.save_file(&file)
    }
}

impl RecordStore for JsonRecordStore {
    fn load_all(&self) -> Result<Vec<GameRecord>> {
        Ok(self.load_file()?.games)
    }

    fn save(&self, record: &GameRecord) -> Result<()> {
        validate_record_id(&record.id)?;
        self.modify(|file| {
            match file.games.iter_mut().find(|entry| entry.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => file.games.push(record.clone()),
            }
        })?;
        tracing::debug!(id = %record.id, path = %self.path.display(), "saved game record");
        Ok(())
    }

    fn save_all(&self, records: &[GameRecord]) -> Result<()> {
        for record in records {
            validate_record_id(&record.id)?;
        }
        self.modify(|file| {
            for record in records {
                match file.games.iter_mut().find(|entry| entry.id == record.id) {
                    Some(existing) => *existing = record.clone(),
                    None => file.games.push(record.clone()),
                }
            }
        })?;
        tracing::debug!(count = records.len(), path = %self.path.display(), "saved game records");
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.modify(|file| file.games.retain(|entry| entry.id != id))
    }

    fn clear(&self) -> Result<()> {
        self.modify(|file| file.games.clear())
    }
}

pub fn validate_record_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("game id cannot be empty");
    }
    if id.trim() != id {
        bail!("game id '{}' must not have surrounding whitespace", id);
    }
    if id.chars().any(char::is_control) {
        bail!("game id '{}' contains control characters", id.escape_debug());
    }
    Ok(())
}

fn normalize_library_in_place(file: &mut LibraryFile) -> Result<()> {
    if file.version == 0 {
        bail!("game library version must be >= 1");
    }

    file.games.sort_by(|a, b| a.id.cmp(&b.id));
    let mut seen = BTreeSet::new();
    for game in &file.games {
        validate_record_id(&game.id)?;
        if !seen.insert(game.id.as_str()) {
            bail!("duplicate game id '{}' in library", game.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::has_code;
    use tempfile::tempdir;

    fn record(id: &str, added_at: i64) -> GameRecord {
        GameRecord {
            id: id.to_owned(),
            name: format!("game {id}"),
            content: "<!DOCTYPE html><title>x</title>".to_owned(),
            added_at,
            last_played: None,
            folder_id: None,
        }
    }

    #[test]
    fn json_store_write_is_stable_and_sorted() {
        let dir = tempdir().expect("tempdir should create");
        let store = JsonRecordStore::new(dir.path().join("library.json"));

        store.save(&record("zeta", 2)).expect("save zeta");
        store.save(&record("alpha", 1)).expect("save alpha");
        let first = fs::read_to_string(store.path()).expect("library should read");

        let reversed = LibraryFile {
            version: 1,
            games: vec![record("alpha", 1), record("zeta", 2)]
                .into_iter()
                .rev()
                .collect(),
        };
        store.save_file(&reversed).expect("library should save again");
        let second = fs::read_to_string(store.path()).expect("library should read again");

        assert_eq!(first, second, "library output should be stable");
        let loaded = store.load_all().expect("library should load");
        assert_eq!(loaded[0].id, "alpha");
        assert_eq!(loaded[1].id, "zeta");
        assert!(!dir.path().join("library.json.tmp").exists());
    }

    #[test]
    fn json_store_rejects_duplicate_ids_on_load() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("library.json");
        let dup = LibraryFile {
            version: 1,
            games: vec![record("same", 1), record("same", 2)],
        };
        fs::write(&path, serde_json::to_string(&dup).expect("serialize"))
            .expect("write should succeed");

        let error = JsonRecordStore::new(&path)
            .load_all()
            .expect_err("duplicates should fail")
            .to_string();
        assert!(error.contains("duplicate game id 'same'"));
    }

    #[test]
    fn missing_or_empty_library_loads_as_empty() {
        let dir = tempdir().expect("tempdir should create");
        let store = JsonRecordStore::new(dir.path().join("nested/library.json"));
        assert!(store.load_all().expect("missing file loads").is_empty());

        fs::create_dir_all(dir.path().join("nested")).expect("mkdir");
        fs::write(store.path(), "  \n").expect("write");
        assert!(store.load_all().expect("blank file loads").is_empty());
    }

    #[test]
    fn update_merges_fields_and_delete_clear_work() {
        let store = MemoryRecordStore::with_records([record("a", 1), record("b", 2)]);
        let updated = store
            .apply_update("a", &GameUpdate::last_played(99))
            .expect("update should apply");
        assert_eq!(updated.last_played, Some(99));
        assert_eq!(updated.content, record("a", 1).content);

        store
            .update_record("b", GameUpdate::rename("Bee"))
            .expect("rename should apply");
        assert_eq!(store.get("b").expect("b exists").name, "Bee");

        let missing = store
            .update_record("nope", GameUpdate::last_played(1))
            .expect_err("missing id should fail");
        assert!(has_code(&missing, RECORD_NOT_FOUND));

        store.delete("a").expect("delete");
        assert_eq!(store.load_all().expect("load").len(), 1);
        store.clear().expect("clear");
        assert!(store.load_all().expect("load").is_empty());
    }

    #[test]
    fn record_serializes_with_camel_case_and_skips_empty_options() {
        let json = serde_json::to_string(&record("a", 5)).expect("serialize");
        assert!(json.contains("\"addedAt\":5"));
        assert!(!json.contains("lastPlayed"));
        assert!(!json.contains("folderId"));

        let parsed: GameRecord = serde_json::from_str(
            r#"{"id":"x","name":"n","content":"c","addedAt":1,"lastPlayed":2,"uploaderName":"z"}"#,
        )
        .expect("extra fields from other exports are ignored");
        assert_eq!(parsed.last_played, Some(2));
    }

    #[test]
    fn display_order_prefers_recent_play() {
        let mut records = vec![record("old", 1), record("new", 5), {
            let mut played = record("played", 2);
            played.last_played = Some(10);
            played
        }];
        sort_for_display(&mut records);
        let ids = records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["played", "new", "old"]);
    }

    #[test]
    fn batch_save_replaces_existing_and_rejects_bad_ids_up_front() {
        let dir = tempdir().expect("tempdir should create");
        let store = JsonRecordStore::new(dir.path().join("library.json"));
        store.save(&record("a", 1)).expect("save a");

        let mut renamed = record("a", 1);
        renamed.name = "Renamed".to_owned();
        store
            .save_all(&[renamed, record("b", 2)])
            .expect("batch save should succeed");
        let loaded = store.load_all().expect("library should load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Renamed");

        assert!(store.save_all(&[record("c", 3), record(" ", 4)]).is_err());
        assert_eq!(store.load_all().expect("library should load").len(), 2);
    }
}
