//! Per-minute time index
//!
//! Every calendar year owns one bucket per minute. A bucket records how many
//! logs fall in that minute and the index of the first one. Logs arrive in
//! timestamp order, so the logs of a bucket are always one contiguous run of
//! log indices and a time range maps to one contiguous index range.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use rax_storage::{FixedLayout, RecordIo, Storage};
use tracing::trace;

use crate::error::TableError;
use crate::layout::TimeIndexEntry;

pub const MINUTES_PER_DAY: usize = 24 * 60;

/// Position of a timestamp in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinuteKey {
    pub year: i32,
    pub minute: usize,
}

impl MinuteKey {
    pub fn of(at: &DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            minute: at.ordinal0() as usize * MINUTES_PER_DAY
                + at.hour() as usize * 60
                + at.minute() as usize,
        }
    }
}

/// Number of minute buckets in `year`
pub fn minutes_in_year(year: i32) -> usize {
    let days = NaiveDate::from_ymd_opt(year, 12, 31).map_or(365, |d| d.ordinal() as usize);
    days * MINUTES_PER_DAY
}

/// Contiguous run of log indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRange {
    pub from_log_index: i64,
    pub logs_count: i64,
}

impl LogRange {
    pub fn is_empty(&self) -> bool {
        self.logs_count <= 0
    }
}

/// Minute buckets of one year
#[derive(Debug)]
pub struct YearIndex {
    entries: Vec<TimeIndexEntry>,
    dirty: bool,
}

impl YearIndex {
    /// Empty index for `year`
    pub fn new(year: i32) -> Self {
        Self {
            entries: vec![TimeIndexEntry::default(); minutes_in_year(year)],
            dirty: true,
        }
    }

    /// Read the full index of `year` from `storage`
    pub fn load(storage: &mut dyn Storage, year: i32) -> Result<Self, TableError> {
        let entries = storage.read_records_at(0, minutes_in_year(year))?;
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    /// Rewrite the whole year to `storage`
    pub fn persist(&mut self, storage: &mut dyn Storage) -> Result<(), TableError> {
        let mut buf = vec![0u8; self.entries.len() * TimeIndexEntry::SIZE];
        for (entry, out) in self
            .entries
            .iter()
            .zip(buf.chunks_exact_mut(TimeIndexEntry::SIZE))
        {
            entry.encode(out);
        }
        storage.write_at(0, &buf)?;
        self.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entry(&self, minute: usize) -> Option<&TimeIndexEntry> {
        self.entries.get(minute)
    }

    fn record(&mut self, minute: usize, log_index: i64) -> Result<(), TableError> {
        let len = self.entries.len();
        let entry = self.entries.get_mut(minute).ok_or_else(|| {
            TableError::corrupted(format!("minute {minute} outside a {len}-minute year"))
        })?;
        if entry.logs_count == 0 {
            entry.first_log_index = log_index;
        }
        entry.logs_count += 1;
        self.dirty = true;
        Ok(())
    }

    fn unrecord(&mut self, minute: usize) {
        if let Some(entry) = self.entries.get_mut(minute)
            && entry.logs_count > 0
        {
            entry.logs_count -= 1;
            if entry.logs_count == 0 {
                entry.first_log_index = 0;
            }
            self.dirty = true;
        }
    }
}

/// Minute buckets of every year a table has logs in
#[derive(Debug, Default)]
pub struct TimeIndex {
    years: BTreeMap<i32, YearIndex>,
}

impl TimeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_year(&self, year: i32) -> bool {
        self.years.contains_key(&year)
    }

    pub fn insert_year(&mut self, year: i32, index: YearIndex) {
        self.years.insert(year, index);
    }

    pub fn year(&self, year: i32) -> Option<&YearIndex> {
        self.years.get(&year)
    }

    /// Years with unsaved buckets
    pub fn dirty_years_mut(&mut self) -> impl Iterator<Item = (i32, &mut YearIndex)> {
        self.years
            .iter_mut()
            .filter(|(_, index)| index.is_dirty())
            .map(|(year, index)| (*year, index))
    }

    /// Count log `log_index` in the bucket of `key`. The year must be present.
    pub fn record(&mut self, key: MinuteKey, log_index: i64) -> Result<(), TableError> {
        let year = self.years.get_mut(&key.year).ok_or_else(|| {
            TableError::corrupted(format!("time index for year {} not loaded", key.year))
        })?;
        year.record(key.minute, log_index)
    }

    /// Undo the latest [`TimeIndex::record`] into the bucket of `key`
    pub fn unrecord(&mut self, key: MinuteKey) {
        if let Some(year) = self.years.get_mut(&key.year) {
            year.unrecord(key.minute);
        }
    }

    /// Resolve `[from, to]` plus paging to a contiguous log range.
    ///
    /// Bounds are inclusive at minute granularity. `skip` whole logs are
    /// dropped from the front and at most `take` are returned; a range
    /// shorter than `take` is not an error.
    pub fn lookup(&self, from: MinuteKey, to: MinuteKey, skip: u64, take: u64) -> LogRange {
        if take == 0 || from > to {
            return LogRange::default();
        }
        let mut range: Option<LogRange> = None;
        let take = i64::try_from(take).unwrap_or(i64::MAX);
        let mut skip = i64::try_from(skip).unwrap_or(i64::MAX);

        for (&year, index) in self.years.range(from.year..=to.year) {
            let Some(last_minute) = index.entries.len().checked_sub(1) else {
                continue;
            };
            let first = if year == from.year { from.minute } else { 0 };
            let last = if year == to.year {
                to.minute.min(last_minute)
            } else {
                last_minute
            };
            if first > last {
                continue;
            }

            for entry in &index.entries[first..=last] {
                if entry.logs_count <= 0 {
                    continue;
                }
                if skip >= entry.logs_count {
                    skip -= entry.logs_count;
                    continue;
                }
                let from_log_index = entry.first_log_index + skip;
                let count = entry.logs_count - skip;
                skip = 0;

                let current = range.get_or_insert(LogRange {
                    from_log_index,
                    logs_count: 0,
                });
                current.logs_count += count;
                if current.logs_count >= take {
                    current.logs_count = take;
                    trace!(range = ?current, "Time index lookup filled take");
                    return *current;
                }
            }
        }

        let range = range.unwrap_or_default();
        trace!(?range, "Time index lookup exhausted");
        range
    }
}
