//! Durable persistence of version records.
//!
//! On-disk layout (all integers big-endian):
//!
//! - 8-byte magic: `0xFFFFFFFF_DEADFACE` (current) or
//!   `0xFFFFFFFF_DEADBEEF` (legacy v1, read-only);
//! - current format only: u16 format version;
//! - a sequence of tagged records, each a 1-byte tag plus a 4-byte payload
//!   length plus the payload. Tag `0x01` carries concatenated version
//!   records; tag `0xFF` is the zero-length terminator. Unknown tags are
//!   skipped by their length.
//! - legacy v1 instead stores an i32 record count followed by that many
//!   records (no per-version `first_seen_by_server`).
//!
//! A deprecated JSON layout (first non-whitespace byte `[`) is still
//! recognized: it is parsed once and rewritten as a binary companion file
//! (suffix `.binary`) next to the original, which later opens prefer.
//! Writes go to a `.tmp` sibling and are renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use relwatch_codec::codec::{Decoder, Encoder};
use relwatch_codec::records::{
    decode_version_info, encode_version_info, CURRENT_SCHEMA, SCHEMA_V2,
};
use relwatch_core::version::VersionInfo;
use relwatch_util::errors::RelwatchError;
use relwatch_util::fs::atomic_replace;

use crate::stats::StoreStatistics;

/// Magic of the current tagged-record format.
pub const MAGIC_CURRENT: u64 = 0xFFFF_FFFF_DEAD_FACE;
/// Magic of the legacy v1 count-prefixed format (read-only).
pub const MAGIC_LEGACY_V1: u64 = 0xFFFF_FFFF_DEAD_BEEF;

/// Tagged record holding concatenated version records.
pub const TAG_VERSION_DATA: u8 = 0x01;
/// Zero-length record terminating the file.
pub const TAG_END_OF_FILE: u8 = 0xFF;

/// Suffix of the binary companion written next to a legacy JSON file.
pub const BINARY_SUFFIX: &str = ".binary";

/// Durable store for all version records at a single file path.
///
/// Reads and writes serialize on an instance lock; statistics are kept
/// under a separate lock. All writes are atomic (tmp file plus rename).
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    io: Mutex<()>,
    stats: Mutex<StoreStatistics>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// When the `.binary` companion exists it is used; when `path` holds
    /// the deprecated JSON layout it is converted to the companion first.
    /// A file in an older binary schema is migrated (backfilling
    /// `first_seen_by_server`) and rewritten immediately. A fresh store
    /// writes the current format at `path`.
    pub fn open(path: impl Into<PathBuf>) -> miette::Result<Self> {
        let requested: PathBuf = path.into();
        let companion = binary_companion(&requested);

        let active = if companion.is_file() {
            companion
        } else if is_json_file(&requested)? {
            let mut records = read_json(&requested)?;
            backfill_first_seen(&mut records, Utc::now());
            write_records(&companion, &records)?;
            tracing::info!(
                from = %requested.display(),
                to = %companion.display(),
                "converted JSON store to binary companion"
            );
            companion
        } else {
            requested
        };

        let store = Self {
            path: active,
            io: Mutex::new(()),
            stats: Mutex::new(StoreStatistics::default()),
        };
        store.migrate_if_needed()?;
        Ok(store)
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record from disk. A missing file is an empty store; a
    /// corrupt file is an error the operator must resolve.
    pub fn load_all(&self) -> miette::Result<Vec<VersionInfo>> {
        let _guard = lock(&self.io);
        self.load_all_locked()
    }

    /// Replace the entire record set.
    pub fn save_all(&self, records: &[VersionInfo]) -> miette::Result<()> {
        let _guard = lock(&self.io);
        self.save_all_locked(records)
    }

    /// Insert or update the given records by (group, artifact).
    ///
    /// Records already on disk but absent from `records` are left
    /// untouched; nothing is ever implicitly deleted by this call.
    pub fn save_or_update(&self, records: &[VersionInfo]) -> miette::Result<()> {
        let _guard = lock(&self.io);
        let mut merged = self.load_all_locked()?;
        for record in records {
            let key = (
                record.artifact.group_id.as_str(),
                record.artifact.artifact_id.as_str(),
            );
            match merged.iter_mut().find(|existing| {
                (
                    existing.artifact.group_id.as_str(),
                    existing.artifact.artifact_id.as_str(),
                ) == key
            }) {
                Some(existing) => *existing = record.clone(),
                None => merged.push(record.clone()),
            }
        }
        self.save_all_locked(&merged)
    }

    /// A snapshot of the activity counters.
    pub fn statistics(&self) -> StoreStatistics {
        lock(&self.stats).clone()
    }

    fn load_all_locked(&self) -> miette::Result<Vec<VersionInfo>> {
        let now = Utc::now();
        {
            let mut stats = lock(&self.stats);
            stats.last_request = Some(now);
        }
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let result = std::fs::read(&self.path)
            .map_err(RelwatchError::Io)
            .map_err(miette::Report::from)
            .and_then(|bytes| decode_store(&bytes).map_err(miette::Report::from));

        let mut stats = lock(&self.stats);
        match &result {
            Ok((records, _)) => {
                stats.reads += 1;
                stats.last_success = Some(now);
                stats.artifact_count = records.len();
                stats.version_count = records.iter().map(|r| r.versions.len()).sum();
            }
            Err(_) => stats.last_failure = Some(now),
        }
        result.map(|(records, _)| records)
    }

    fn save_all_locked(&self, records: &[VersionInfo]) -> miette::Result<()> {
        let now = Utc::now();
        let result = write_records(&self.path, records);

        let mut stats = lock(&self.stats);
        stats.last_request = Some(now);
        match &result {
            Ok(size) => {
                stats.writes += 1;
                stats.last_success = Some(now);
                stats.file_size = *size;
                stats.artifact_count = records.len();
                stats.version_count = records.iter().map(|r| r.versions.len()).sum();
            }
            Err(_) => stats.last_failure = Some(now),
        }
        result.map(|_| ())
    }

    /// Rewrite the file in the current format when it holds an older
    /// schema, backfilling `first_seen_by_server` from the release date
    /// (or now) per version.
    fn migrate_if_needed(&self) -> miette::Result<()> {
        let _guard = lock(&self.io);
        if !self.path.is_file() {
            return Ok(());
        }
        let bytes = std::fs::read(&self.path).map_err(RelwatchError::Io)?;
        let (mut records, schema) = decode_store(&bytes)?;
        if schema >= CURRENT_SCHEMA {
            return Ok(());
        }
        backfill_first_seen(&mut records, Utc::now());
        tracing::info!(
            path = %self.path.display(),
            from_schema = schema,
            "migrating store file to current format"
        );
        self.save_all_locked(&records)
    }
}

/// The `.binary` companion path for a store file.
pub fn binary_companion(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BINARY_SUFFIX);
    PathBuf::from(name)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_json_file(path: &Path) -> miette::Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let bytes = std::fs::read(path).map_err(RelwatchError::Io)?;
    Ok(bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'['))
}

fn read_json(path: &Path) -> miette::Result<Vec<VersionInfo>> {
    let bytes = std::fs::read(path).map_err(RelwatchError::Io)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        RelwatchError::decode(format!("invalid JSON store {}: {e}", path.display()), 0).into()
    })
}

fn backfill_first_seen(records: &mut [VersionInfo], now: DateTime<Utc>) {
    for info in records {
        for version in &mut info.versions {
            if version.first_seen_by_server.is_none() {
                version.first_seen_by_server = Some(version.release_date.unwrap_or(now));
            }
        }
    }
}

/// Encode and atomically write `records` in the current format.
/// Records are sorted by coordinate so identical content yields identical
/// bytes. Returns the file size.
fn write_records(path: &Path, records: &[VersionInfo]) -> miette::Result<u64> {
    let mut sorted: Vec<&VersionInfo> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.artifact.group_id, &a.artifact.artifact_id)
            .cmp(&(&b.artifact.group_id, &b.artifact.artifact_id))
    });

    let mut payload = Encoder::new();
    for record in sorted {
        encode_version_info(&mut payload, record, CURRENT_SCHEMA);
    }

    let mut enc = Encoder::new();
    enc.put_u64(MAGIC_CURRENT);
    enc.put_u16(CURRENT_SCHEMA);
    enc.put_u8(TAG_VERSION_DATA);
    enc.put_u32(payload.len() as u32);
    enc.put_raw(payload.bytes());
    enc.put_u8(TAG_END_OF_FILE);
    enc.put_u32(0);

    let bytes = enc.into_bytes();
    atomic_replace(path, &bytes).map_err(RelwatchError::Io)?;
    Ok(bytes.len() as u64)
}

/// Decode a store file, returning the records and the schema they were
/// stored in.
fn decode_store(bytes: &[u8]) -> Result<(Vec<VersionInfo>, u16), RelwatchError> {
    let mut dec = Decoder::new(bytes);
    let magic = dec.get_u64()?;
    match magic {
        MAGIC_CURRENT => decode_tagged(&mut dec),
        MAGIC_LEGACY_V1 => decode_legacy(&mut dec),
        other => Err(RelwatchError::decode(
            format!("unrecognized store file magic 0x{other:016x}"),
            0,
        )),
    }
}

fn decode_tagged(dec: &mut Decoder<'_>) -> Result<(Vec<VersionInfo>, u16), RelwatchError> {
    let schema_offset = dec.offset();
    let schema = dec.get_u16()?;
    if !(SCHEMA_V2..=CURRENT_SCHEMA).contains(&schema) {
        return Err(RelwatchError::decode(
            format!("unsupported store format version {schema}"),
            schema_offset,
        ));
    }

    let mut records = Vec::new();
    loop {
        let tag_offset = dec.offset();
        let tag = dec.get_u8().map_err(|_| {
            RelwatchError::decode("store file not terminated by END_OF_FILE", tag_offset)
        })?;
        let len = dec.get_u32()? as usize;

        if tag == TAG_END_OF_FILE {
            if len != 0 {
                return Err(RelwatchError::decode(
                    format!("END_OF_FILE record with non-zero length {len}"),
                    tag_offset,
                ));
            }
            break;
        }

        let payload = dec.get_slice(len)?;
        match tag {
            TAG_VERSION_DATA => {
                let mut sub = Decoder::new(payload);
                while !sub.is_empty() {
                    records.push(decode_version_info(&mut sub, schema)?);
                }
            }
            other => {
                tracing::warn!(tag = other, len, "skipping unknown store record tag");
            }
        }
    }
    Ok((records, schema))
}

fn decode_legacy(dec: &mut Decoder<'_>) -> Result<(Vec<VersionInfo>, u16), RelwatchError> {
    let count_offset = dec.offset();
    let count = dec.get_i32()?;
    if count < 0 {
        return Err(RelwatchError::decode(
            format!("negative record count {count}"),
            count_offset,
        ));
    }
    let mut records = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        records.push(decode_version_info(dec, SCHEMA_V2)?);
    }
    Ok((records, SCHEMA_V2))
}
