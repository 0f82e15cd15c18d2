//! Getting games into and out of the library: single uploads, per-entry bulk
//! import, JSON backups and plain-HTML source export.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error_codes::{CodedError, INVALID_BACKUP};
use crate::normalize::{is_importable_filename, Normalizer};
use crate::platform::Platform;
use crate::records::{GameRecord, RecordStore};

pub const LOCAL_ID_PREFIX: &str = "local_";
pub const IMPORT_ID_PREFIX: &str = "imp_zip_";
pub const BACKUP_FORMAT_VERSION: &str = "react-1.0";

const ARCHIVE_METADATA_DIR: &str = "__MACOSX";
const EXPORT_STEM_MAX_CHARS: usize = 50;

static FALLBACK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<prefix><uuid>`, or `<prefix><millis>_<base36 counter>` when the platform
/// has no UUID source.
pub fn generate_id(platform: &dyn Platform, prefix: &str) -> String {
    match platform.random_uuid() {
        Some(uuid) => format!("{prefix}{uuid}"),
        None => {
            let seq = FALLBACK_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("{prefix}{}_{}", platform.now_millis(), to_base36(seq))
        }
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Normalizes one uploaded file into a new record.
pub fn ingest_upload(
    normalizer: &Normalizer,
    platform: &dyn Platform,
    raw: &str,
    filename: &str,
) -> GameRecord {
    let normalized = normalizer.normalize(raw, filename);
    tracing::debug!(
        filename,
        kind = normalized.kind.as_str(),
        title = %normalized.title,
        "ingested upload"
    );
    GameRecord {
        id: generate_id(platform, LOCAL_ID_PREFIX),
        name: normalized.title,
        content: normalized.html,
        added_at: platform.now_millis(),
        last_played: None,
        folder_id: None,
    }
}

/// One file inside an unpacked archive or directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub is_dir: bool,
    pub content: String,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            content: content.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or("Unknown")
    }
}

/// Directories, archive metadata and non-game files are skipped.
pub fn should_import_entry(entry: &ArchiveEntry) -> bool {
    !entry.is_dir
        && !entry.path.contains(ARCHIVE_METADATA_DIR)
        && is_importable_filename(entry.file_name())
}

/// Normalizes every importable entry; each entry is handled on its own.
pub fn ingest_entries(
    normalizer: &Normalizer,
    platform: &dyn Platform,
    entries: impl IntoIterator<Item = ArchiveEntry>,
) -> Vec<GameRecord> {
    let mut records = Vec::new();
    for entry in entries {
        if !should_import_entry(&entry) {
            tracing::debug!(path = %entry.path, "skipping archive entry");
            continue;
        }
        let normalized = normalizer.normalize(&entry.content, entry.file_name());
        records.push(GameRecord {
            id: generate_id(platform, IMPORT_ID_PREFIX),
            name: normalized.title,
            content: normalized.html,
            added_at: platform.now_millis(),
            last_played: None,
            folder_id: None,
        });
    }
    records
}

/// Saves imported records. An empty import alerts the user and leaves the
/// store untouched. Returns how many records were saved.
pub fn store_imported(
    store: &dyn RecordStore,
    platform: &dyn Platform,
    records: &[GameRecord],
    source: &str,
) -> Result<usize> {
    if records.is_empty() {
        platform.alert(&format!("No valid games found in {source}."));
        return Ok(0);
    }
    store.save_all(records)?;
    tracing::debug!(count = records.len(), source, "imported games");
    Ok(records.len())
}

/// Reads every regular file under `root` as an archive entry, paths relative to
/// `root` with `/` separators, sorted. Non-UTF-8 files are skipped.
pub fn read_directory_entries(root: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory {}", dir.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed reading directory entry in {}", dir.display()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let relative = file
            .strip_prefix(root)
            .map_err(|_| anyhow!("failed to relativize {}", file.display()))?
            .to_string_lossy()
            .replace('\\', "/");
        match fs::read_to_string(&file) {
            Ok(content) => entries.push(ArchiveEntry::file(relative, content)),
            Err(error) => {
                tracing::warn!(path = %file.display(), "skipping unreadable file: {error}");
            }
        }
    }
    Ok(entries)
}

/// Parses a JSON backup: either a bare array of games or `{ "games": [...] }`.
/// Entries without a non-empty `name` and `content` are dropped; survivors get
/// fresh ids and keep (or default) `addedAt`.
pub fn parse_backup(json: &str, platform: &dyn Platform) -> Result<Vec<GameRecord>> {
    let value: Value = serde_json::from_str(json).map_err(|error| {
        anyhow!(CodedError::data(
            INVALID_BACKUP,
            format!("backup is not valid JSON: {error}")
        ))
    })?;
    let games = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("games") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(anyhow!(CodedError::data(
                    INVALID_BACKUP,
                    "backup object has no 'games' array"
                )))
            }
        },
        _ => {
            return Err(anyhow!(CodedError::data(
                INVALID_BACKUP,
                "backup must be an array of games or an object with a 'games' array"
            )))
        }
    };

    let now = platform.now_millis();
    let records = games
        .iter()
        .filter_map(|game| {
            let name = non_empty_str(game, "name")?;
            let content = non_empty_str(game, "content")?;
            Some(GameRecord {
                id: generate_id(platform, LOCAL_ID_PREFIX),
                name: name.to_owned(),
                content: content.to_owned(),
                added_at: game
                    .get("addedAt")
                    .and_then(Value::as_i64)
                    .filter(|at| *at > 0)
                    .unwrap_or(now),
                last_played: game.get("lastPlayed").and_then(Value::as_i64),
                folder_id: game
                    .get("folderId")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            })
        })
        .collect::<Vec<_>>();
    tracing::debug!(
        found = games.len(),
        valid = records.len(),
        "parsed backup"
    );
    Ok(records)
}

fn non_empty_str<'a>(game: &'a Value, key: &str) -> Option<&'a str> {
    game.get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

#[derive(Serialize)]
struct BackupFile<'a> {
    v: &'static str,
    games: &'a [GameRecord],
}

pub fn backup_json(records: &[GameRecord]) -> Result<String> {
    serde_json::to_string_pretty(&BackupFile {
        v: BACKUP_FORMAT_VERSION,
        games: records,
    })
    .context("failed to serialize backup JSON")
}

pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("VibeVault_Backup_{}.json", at.timestamp_millis())
}

pub fn source_export_dir_name(at: DateTime<Utc>) -> String {
    format!("VibeVault_Source_{}", at.format("%Y-%m-%d"))
}

/// File stem for a record's exported HTML: non-alphanumerics become `_`,
/// capped at 50 characters, `game_<id>` when nothing is left.
pub fn export_file_stem(record: &GameRecord) -> String {
    let stem = record
        .name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .take(EXPORT_STEM_MAX_CHARS)
        .collect::<String>();
    if stem.is_empty() {
        format!("game_{}", record.id)
    } else {
        stem
    }
}

/// Writes each record's content to `<dir>/<stem>.html`. Colliding stems get a
/// `_2`, `_3`, ... suffix so no export overwrites another.
pub fn export_sources(records: &[GameRecord], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    let mut used = BTreeSet::new();
    let mut written = Vec::with_capacity(records.len());
    for record in records {
        let base = export_file_stem(record);
        let mut stem = base.clone();
        let mut suffix = 2;
        while !used.insert(stem.to_ascii_lowercase()) {
            stem = format!("{base}_{suffix}");
            suffix += 1;
        }
        let path = dir.join(format!("{stem}.html"));
        fs::write(&path, &record.content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
