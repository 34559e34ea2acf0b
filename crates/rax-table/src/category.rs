//! Category registry
//!
//! Categories are stored once and referenced by index from every payload.
//! Indices are assigned in creation order, starting at 0, and never change.
//!
//! ## Record Format
//!
//! ```text
//! [8 bytes: min_timestamp][8 bytes: max_timestamp][8 bytes: logs_count][4 bytes: name_len][name_len bytes: UTF-8 name]
//! ```
//!
//! Records are appended in index order. Only the leading 24 bytes of stats
//! change after creation and are rewritten in place.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rax_storage::Storage;
use rax_storage::codec::{get_i64, get_u32, put_i64, put_u32};
use tracing::trace;

use crate::error::TableError;
use crate::layout::from_micros;

const STATS_SIZE: usize = 24;
const RECORD_HEADER_SIZE: usize = STATS_SIZE + 4;

/// Aggregate stats of one category, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInfo {
    pub index: usize,
    pub name: String,
    pub logs_count: u64,
    /// `None` until a log references the category
    pub min_timestamp: Option<DateTime<Utc>>,
    pub max_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistState {
    Clean,
    /// Stats changed, rewrite the 24-byte header
    Dirty,
    /// Never written, write the full record
    New,
}

#[derive(Debug)]
struct CategoryEntry {
    name: String,
    min_timestamp: i64,
    max_timestamp: i64,
    logs_count: i64,
    /// Offset of the record in the categories storage
    offset: u64,
    state: PersistState,
}

impl CategoryEntry {
    fn encode_stats(&self, out: &mut [u8]) {
        put_i64(out, 0, self.min_timestamp);
        put_i64(out, 8, self.max_timestamp);
        put_i64(out, 16, self.logs_count);
    }
}

/// Registry state captured before a batch, see [`CategoryRegistry::rollback`]
#[derive(Debug)]
pub struct CategoryCheckpoint {
    len: usize,
    next_offset: u64,
    stats: Vec<(i64, i64, i64, PersistState)>,
}

/// In-memory index of every category of a table
#[derive(Debug, Default)]
pub struct CategoryRegistry {
    entries: Vec<CategoryEntry>,
    by_name: HashMap<String, usize>,
    /// End of the last record in the categories storage
    next_offset: u64,
}

impl CategoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `count` records from the start of `storage`.
    ///
    /// Stored names are accepted at any length the record format allows;
    /// the configured name limit only applies to new categories.
    pub fn load(storage: &mut dyn Storage, count: usize) -> Result<Self, TableError> {
        let mut registry = Self::new();
        let mut header = [0u8; RECORD_HEADER_SIZE];
        let mut offset = 0u64;

        for index in 0..count {
            storage.read_at(offset, &mut header)?;
            let name_len = get_u32(&header, STATS_SIZE) as usize;
            let mut raw_name = Vec::new();
            raw_name.try_reserve_exact(name_len).map_err(|_| {
                TableError::corrupted(format!("category {index} has a {name_len}-byte name"))
            })?;
            raw_name.resize(name_len, 0);
            storage.read(&mut raw_name)?;
            let name = String::from_utf8(raw_name)
                .map_err(|e| TableError::corrupted(format!("category {index} name: {e}")))?;

            if registry.by_name.insert(name.clone(), index).is_some() {
                return Err(TableError::corrupted(format!(
                    "category name {name:?} stored twice"
                )));
            }
            registry.entries.push(CategoryEntry {
                name,
                min_timestamp: get_i64(&header, 0),
                max_timestamp: get_i64(&header, 8),
                logs_count: get_i64(&header, 16),
                offset,
                state: PersistState::Clean,
            });
            offset += (RECORD_HEADER_SIZE + name_len) as u64;
        }

        registry.next_offset = offset;
        Ok(registry)
    }

    /// Index of `name`, creating the category if it is new
    pub fn resolve_or_create(&mut self, name: &str) -> usize {
        if let Some(&index) = self.by_name.get(name) {
            return index;
        }
        let index = self.entries.len();
        self.entries.push(CategoryEntry {
            name: name.to_string(),
            min_timestamp: 0,
            max_timestamp: 0,
            logs_count: 0,
            offset: self.next_offset,
            state: PersistState::New,
        });
        self.by_name.insert(name.to_string(), index);
        self.next_offset += (RECORD_HEADER_SIZE + name.len()) as u64;
        trace!(index, name, "Created category");
        index
    }

    /// Account one log at `timestamp` to category `index`
    pub fn observe(&mut self, index: usize, timestamp: i64) {
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        if entry.logs_count == 0 {
            entry.min_timestamp = timestamp;
            entry.max_timestamp = timestamp;
        } else {
            entry.min_timestamp = entry.min_timestamp.min(timestamp);
            entry.max_timestamp = entry.max_timestamp.max(timestamp);
        }
        entry.logs_count += 1;
        if entry.state == PersistState::Clean {
            entry.state = PersistState::Dirty;
        }
    }

    /// Write every new or changed category to `storage`
    pub fn persist(&mut self, storage: &mut dyn Storage) -> Result<usize, TableError> {
        let mut written = 0;
        let mut buf = Vec::new();
        for entry in &mut self.entries {
            match entry.state {
                PersistState::Clean => continue,
                PersistState::Dirty => {
                    buf.resize(STATS_SIZE, 0);
                    entry.encode_stats(&mut buf);
                }
                PersistState::New => {
                    buf.resize(RECORD_HEADER_SIZE + entry.name.len(), 0);
                    entry.encode_stats(&mut buf);
                    put_u32(&mut buf, STATS_SIZE, entry.name.len() as u32);
                    buf[RECORD_HEADER_SIZE..].copy_from_slice(entry.name.as_bytes());
                }
            }
            storage.write_at(entry.offset, &buf)?;
            entry.state = PersistState::Clean;
            written += 1;
        }
        Ok(written)
    }

    /// Capture the current stats so a failed batch can be undone
    pub fn checkpoint(&self) -> CategoryCheckpoint {
        CategoryCheckpoint {
            len: self.entries.len(),
            next_offset: self.next_offset,
            stats: self
                .entries
                .iter()
                .map(|e| (e.min_timestamp, e.max_timestamp, e.logs_count, e.state))
                .collect(),
        }
    }

    /// Return to `checkpoint`, dropping categories created since.
    ///
    /// Entries whose stats changed are marked for rewrite, since the failed
    /// batch may already have stored them.
    pub fn rollback(&mut self, checkpoint: CategoryCheckpoint) {
        for entry in self.entries.drain(checkpoint.len..) {
            self.by_name.remove(&entry.name);
        }
        self.next_offset = checkpoint.next_offset;

        for (entry, (min, max, count, state)) in self.entries.iter_mut().zip(checkpoint.stats) {
            let changed = (entry.min_timestamp, entry.max_timestamp, entry.logs_count)
                != (min, max, count);
            entry.min_timestamp = min;
            entry.max_timestamp = max;
            entry.logs_count = count;
            entry.state = match state {
                PersistState::Clean if changed => PersistState::Dirty,
                state => state,
            };
        }
    }

    /// Name of category `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    /// Index of the category called `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stats of every category, in index order
    pub fn infos(&self) -> Result<Vec<CategoryInfo>, TableError> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let (min_timestamp, max_timestamp) = if entry.logs_count > 0 {
                    (
                        Some(from_micros(entry.min_timestamp)?),
                        Some(from_micros(entry.max_timestamp)?),
                    )
                } else {
                    (None, None)
                };
                Ok(CategoryInfo {
                    index,
                    name: entry.name.clone(),
                    logs_count: entry.logs_count.max(0) as u64,
                    min_timestamp,
                    max_timestamp,
                })
            })
            .collect()
    }
}
