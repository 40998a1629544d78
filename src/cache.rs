//! Answer cache keyed by question bytes, with gzip snapshot persistence.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::answer::CachedAnswer;
use crate::error::{Error, Result};
use crate::query::Query;

pub const DEFAULT_MAX_ENTRIES: usize = 65536;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    entries: Vec<&'a CachedAnswer>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CachedAnswer>,
}

/// Cached answers, one per distinct question.
///
/// Only the server loop touches the store, so it carries no locking.
pub struct CacheStore {
    entries: FxHashMap<Vec<u8>, CachedAnswer>,
    max_entries: usize,
}

impl CacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            max_entries,
        }
    }

    pub fn lookup(&self, query: &Query) -> Option<&CachedAnswer> {
        self.entries.get(query.question())
    }

    pub fn lookup_mut(&mut self, query: &Query) -> Option<&mut CachedAnswer> {
        self.entries.get_mut(query.question())
    }

    /// Store `answer`, replacing any entry for the same question.
    ///
    /// When the store is full, expired entries are swept first; if that frees
    /// nothing the answer is handed back.
    pub fn insert(
        &mut self,
        answer: CachedAnswer,
        now: u64,
    ) -> std::result::Result<(), CachedAnswer> {
        let replacing = self.entries.contains_key(answer.question());
        if !replacing && self.entries.len() >= self.max_entries {
            self.sweep(now);
            if self.entries.len() >= self.max_entries {
                return Err(answer);
            }
        }

        self.entries.insert(answer.question().to_vec(), answer);
        Ok(())
    }

    pub fn remove(&mut self, query: &Query) -> Option<CachedAnswer> {
        self.entries.remove(query.question())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, answer| !answer.is_expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedAnswer> {
        self.entries.values()
    }

    /// Restore a store saved with [`CacheStore::save`].
    ///
    /// Entries that no longer walk cleanly, or that `insert` would never have
    /// accepted, are dropped one by one. Entries already expired at `now` are
    /// skipped before the size cap applies. A blob that cannot be decoded at
    /// all is an error.
    pub fn load(path: &Path, max_entries: usize, now: u64) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::persistence(path, e))?;
        let reader = BufReader::new(GzDecoder::new(file));
        let snapshot: Snapshot =
            serde_json::from_reader(reader).map_err(|e| Error::persistence(path, e))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::persistence(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported snapshot version {}", snapshot.version),
                ),
            ));
        }

        let mut store = Self::new(max_entries);
        let mut rejected = 0usize;
        let mut expired = 0usize;
        for answer in snapshot.entries {
            if answer.verify().is_err() || !answer.is_cacheable() {
                rejected += 1;
                continue;
            }
            if answer.is_expired(now) {
                expired += 1;
                continue;
            }
            if store.entries.len() >= max_entries {
                rejected += 1;
                continue;
            }
            store.entries.insert(answer.question().to_vec(), answer);
        }

        if rejected > 0 {
            warn!(path = %path.display(), rejected, "Dropped unusable cache entries");
        }
        if expired > 0 {
            debug!(path = %path.display(), expired, "Skipped expired cache entries");
        }

        Ok(store)
    }

    /// Write the whole store to `path`.
    ///
    /// The snapshot goes to a sibling temporary file first and is renamed
    /// into place once complete.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = Path::new(&tmp);

        self.write_snapshot(tmp).map_err(|e| Error::persistence(path, e))?;
        fs::rename(tmp, path).map_err(|e| Error::persistence(path, e))
    }

    fn write_snapshot(&self, path: &Path) -> io::Result<()> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            entries: self.entries.values().collect(),
        };

        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, &snapshot)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
