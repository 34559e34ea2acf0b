//! Log table engine
//!
//! A [`LogTable`] owns the storages of one table and keeps the table header,
//! the category registry and the time index in memory. Appends write every
//! structure in a fixed order (categories, records and payload, time index,
//! header) so the header only ever describes data that is already on disk.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rax_storage::codec::get_i64;
use rax_storage::{FixedLayout, MetricsRegistry, RecordIo, Storage, StorageFactory, StorageKind};
use tracing::{debug, info, instrument, warn};

use crate::category::{CategoryInfo, CategoryRegistry};
use crate::config::{OrderingPolicy, TableConfig};
use crate::entry::{LogEntry, NewLog};
use crate::error::TableError;
use crate::layout::{
    CATEGORIES_FILE, CATEGORY_ID_SIZE, FixedLogRecord, LOGS_DATA_FILE, LOGS_FILE, TABLE_FILE,
    TableHeader, decode_text, encode_text, from_micros, to_micros, year_index_file,
};
use crate::time_index::{MinuteKey, TimeIndex, YearIndex};

/// Categories every new table starts with, in index order
pub const BUILTIN_CATEGORIES: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// Category of the record written when a table is created
pub const SYSTEM_CATEGORY: &str = "@SYS_INFO";

/// Text of the record written when a table is created
pub const SYSTEM_READY_TEXT: &str = "SYSTEM READY.";

/// An embedded, append-only table of timestamped, categorized logs.
///
/// One writer at a time: [`LogTable::append_logs`] takes `&mut self`.
/// Queries take `&self` and may run concurrently, e.g. behind an `RwLock`.
#[derive(Debug)]
pub struct LogTable {
    factory: Box<dyn StorageFactory>,
    config: TableConfig,
    header: TableHeader,
    table_storage: Mutex<Box<dyn Storage>>,
    records: Mutex<Box<dyn Storage>>,
    data: Mutex<Box<dyn Storage>>,
    categories_storage: Mutex<Box<dyn Storage>>,
    categories: CategoryRegistry,
    time_index: TimeIndex,
    year_storages: HashMap<i32, Mutex<Box<dyn Storage>>>,
}

impl LogTable {
    /// Open the table served by `factory`, creating it if it does not exist
    #[instrument(skip_all, fields(location = %factory.location()))]
    pub fn open(factory: Box<dyn StorageFactory>, config: TableConfig) -> Result<Self, TableError> {
        let table_storage = factory.create_storage(TABLE_FILE, StorageKind::Plain);
        let records = factory.create_storage(LOGS_FILE, StorageKind::Plain);
        let data = factory.create_storage(LOGS_DATA_FILE, StorageKind::AppendOnly);
        let categories_storage = factory.create_storage(CATEGORIES_FILE, StorageKind::Plain);
        let exists = table_storage.exists();

        let mut table = Self {
            factory,
            config,
            header: TableHeader::default(),
            table_storage: Mutex::new(table_storage),
            records: Mutex::new(records),
            data: Mutex::new(data),
            categories_storage: Mutex::new(categories_storage),
            categories: CategoryRegistry::new(),
            time_index: TimeIndex::new(),
            year_storages: HashMap::new(),
        };

        if exists {
            table.load()?;
        } else {
            table.bootstrap()?;
        }
        Ok(table)
    }

    fn bootstrap(&mut self) -> Result<(), TableError> {
        self.table_storage.get_mut().create()?;
        self.records.get_mut().create()?;
        self.data.get_mut().create()?;
        self.categories_storage.get_mut().create()?;

        self.header = TableHeader::default();
        for name in BUILTIN_CATEGORIES {
            self.categories.resolve_or_create(name);
        }
        self.categories
            .persist(&mut **self.categories_storage.get_mut())?;
        self.header.categories_count = self.categories.len() as i64;
        self.write_header()?;

        let created_at = self.config.bootstrap_timestamp.unwrap_or_else(Utc::now);
        self.append_logs(&[NewLog::new(
            SYSTEM_READY_TEXT,
            [SYSTEM_CATEGORY],
            created_at,
        )])?;

        info!(location = %self.factory.location(), %created_at, "Created log table");
        Ok(())
    }

    fn load(&mut self) -> Result<(), TableError> {
        self.table_storage.get_mut().open()?;
        self.records.get_mut().open()?;
        self.data.get_mut().open()?;
        self.categories_storage.get_mut().open()?;

        self.header = self.table_storage.get_mut().read_record_at(0)?;
        let header = self.header;
        if header.total_logs_count < 0
            || header.categories_count < 0
            || header.next_free_data_offset < 0
        {
            return Err(TableError::corrupted(format!(
                "negative counter in table header {header:?}"
            )));
        }

        self.categories = CategoryRegistry::load(
            &mut **self.categories_storage.get_mut(),
            header.categories_count as usize,
        )?;

        if header.total_logs_count > 0 {
            let first_year = MinuteKey::of(&from_micros(header.min_timestamp)?).year;
            let last_year = MinuteKey::of(&from_micros(header.max_timestamp)?).year;
            for year in first_year..=last_year {
                let mut storage = self
                    .factory
                    .create_storage(&year_index_file(year), StorageKind::Plain);
                if !storage.exists() {
                    continue;
                }
                storage.open()?;
                let index = YearIndex::load(&mut *storage, year)?;
                self.time_index.insert_year(year, index);
                self.year_storages.insert(year, Mutex::new(storage));
            }
        }

        info!(
            location = %self.factory.location(),
            logs = header.total_logs_count,
            categories = header.categories_count,
            years = self.year_storages.len(),
            "Opened log table"
        );
        Ok(())
    }

    /// Load or create the time index of `year`
    fn ensure_year(&mut self, year: i32) -> Result<(), TableError> {
        if self.time_index.contains_year(year) {
            return Ok(());
        }
        let mut storage = self
            .factory
            .create_storage(&year_index_file(year), StorageKind::Plain);
        let index = if storage.exists() {
            storage.open()?;
            YearIndex::load(&mut *storage, year)?
        } else {
            storage.create()?;
            debug!(year, "Created time index year");
            YearIndex::new(year)
        };
        self.time_index.insert_year(year, index);
        self.year_storages.insert(year, Mutex::new(storage));
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), TableError> {
        let header = self.header;
        let storage = self.table_storage.get_mut();
        storage.write_record_at(0, &header)?;
        storage.flush()?;
        Ok(())
    }

    /// Reject a batch before anything is written
    fn validate_batch(&self, logs: &[NewLog]) -> Result<(), TableError> {
        let max_name = self.config.max_category_name_bytes;
        let mut previous = (self.header.total_logs_count > 0).then_some(self.header.max_timestamp);

        for (index, log) in logs.iter().enumerate() {
            if let Some(name) = log.categories.iter().find(|name| name.len() > max_name) {
                warn!(index, length = name.len(), max_name, "Rejected batch with oversized category name");
                return Err(TableError::CategoryNameTooLong {
                    length: name.len(),
                    max: max_name,
                });
            }
            if log.categories.len() > i32::MAX as usize {
                return Err(TableError::TooManyCategories(log.categories.len()));
            }
            // UTF-16 never takes more than twice the UTF-8 length
            if log.text.len() > i32::MAX as usize / 2 {
                let bytes = log.text.encode_utf16().count() * 2;
                if bytes > i32::MAX as usize {
                    return Err(TableError::TextTooLong(bytes));
                }
            }

            let timestamp = to_micros(&log.timestamp);
            if self.config.ordering == OrderingPolicy::Reject
                && let Some(before) = previous
                && timestamp < before
            {
                let previous = from_micros(before)?;
                warn!(index, %previous, timestamp = %log.timestamp, "Rejected out of order batch");
                return Err(TableError::OutOfOrder {
                    index,
                    previous,
                    timestamp: log.timestamp,
                });
            }
            previous = Some(timestamp);
        }
        Ok(())
    }

    /// Append a batch of logs.
    ///
    /// The batch is validated as a whole first; a rejected batch writes
    /// nothing. If a write fails part way, the in-memory header, categories
    /// and time index return to their state before the batch. An empty batch
    /// is a no-op.
    #[instrument(skip_all, fields(batch = logs.len()))]
    pub fn append_logs(&mut self, logs: &[NewLog]) -> Result<(), TableError> {
        if logs.is_empty() {
            return Ok(());
        }
        self.validate_batch(logs)?;

        let mut last_year = None;
        for log in logs {
            let year = MinuteKey::of(&log.timestamp).year;
            if last_year != Some(year) {
                self.ensure_year(year)?;
                last_year = Some(year);
            }
        }

        let header = self.header;
        let checkpoint = self.categories.checkpoint();
        let mut indexed = 0;
        match self.write_batch(logs, &mut indexed) {
            Ok(payload_bytes) => {
                debug!(
                    first_index = header.total_logs_count,
                    payload_bytes,
                    total = self.header.total_logs_count,
                    "Appended batch"
                );
                Ok(())
            }
            Err(err) => {
                self.header = header;
                self.categories.rollback(checkpoint);
                for log in &logs[..indexed] {
                    self.time_index.unrecord(MinuteKey::of(&log.timestamp));
                }
                warn!(first_index = header.total_logs_count, %err, "Rolled back failed batch");
                Err(err)
            }
        }
    }

    /// Write a validated batch. `indexed` counts the logs already added to
    /// the time index. Returns the payload size.
    fn write_batch(&mut self, logs: &[NewLog], indexed: &mut usize) -> Result<usize, TableError> {
        // 1. categories, deduplicated per log
        let mut category_ids: Vec<i64> = Vec::new();
        let mut ids_per_log: Vec<usize> = Vec::with_capacity(logs.len());
        for log in logs {
            let timestamp = to_micros(&log.timestamp);
            let start = category_ids.len();
            for name in &log.categories {
                let index = self.categories.resolve_or_create(name);
                if !category_ids[start..].contains(&(index as i64)) {
                    category_ids.push(index as i64);
                    self.categories.observe(index, timestamp);
                }
            }
            ids_per_log.push(category_ids.len() - start);
        }
        let categories_storage = self.categories_storage.get_mut();
        self.categories.persist(&mut **categories_storage)?;
        categories_storage.flush()?;
        self.header.categories_count = self.categories.len() as i64;

        // 2. fixed records and payload, one contiguous block each
        let first_index = self.header.total_logs_count;
        let mut records = vec![0u8; logs.len() * FixedLogRecord::SIZE];
        let mut payload = Vec::new();
        let mut ids = category_ids.iter();
        let mut data_offset = self.header.next_free_data_offset;
        let mut batch_min = i64::MAX;
        let mut batch_max = i64::MIN;

        for (i, ((log, &id_count), out)) in logs
            .iter()
            .zip(&ids_per_log)
            .zip(records.chunks_exact_mut(FixedLogRecord::SIZE))
            .enumerate()
        {
            let timestamp = to_micros(&log.timestamp);
            let text_len = encode_text(&log.text, &mut payload);
            for id in ids.by_ref().take(id_count) {
                payload.extend_from_slice(&id.to_le_bytes());
            }
            // both bounded by validate_batch
            let record = FixedLogRecord {
                timestamp,
                log_index: first_index + i as i64,
                data_offset,
                text_length_in_bytes: text_len as i32,
                categories_count: id_count as i32,
            };
            record.encode(out);
            data_offset += record.payload_len();
            batch_min = batch_min.min(timestamp);
            batch_max = batch_max.max(timestamp);
        }

        let records_storage = self.records.get_mut();
        records_storage.write_at(first_index as u64 * FixedLogRecord::SIZE as u64, &records)?;
        records_storage.flush()?;
        let data_storage = self.data.get_mut();
        data_storage.write_at(self.header.next_free_data_offset as u64, &payload)?;
        data_storage.flush()?;

        // 3. time index
        for (i, log) in logs.iter().enumerate() {
            self.time_index
                .record(MinuteKey::of(&log.timestamp), first_index + i as i64)?;
            *indexed += 1;
        }
        for (year, index) in self.time_index.dirty_years_mut() {
            let storage = self.year_storages.get_mut(&year).ok_or_else(|| {
                TableError::corrupted(format!("no storage for time index year {year}"))
            })?;
            let storage = storage.get_mut();
            index.persist(&mut **storage)?;
            storage.flush()?;
        }

        // 4. header
        if self.header.total_logs_count == 0 {
            self.header.min_timestamp = batch_min;
            self.header.max_timestamp = batch_max;
        } else {
            self.header.min_timestamp = self.header.min_timestamp.min(batch_min);
            self.header.max_timestamp = self.header.max_timestamp.max(batch_max);
        }
        self.header.total_logs_count += logs.len() as i64;
        self.header.next_free_data_offset = data_offset;
        self.write_header()?;

        Ok(payload.len())
    }

    /// Logs between `min` and `max`, paged by `skip` and `take`.
    ///
    /// Bounds are resolved at minute granularity: every log in the minute of
    /// `min` and the minute of `max` is in range. Fewer than `take` results
    /// means the range is exhausted.
    #[instrument(level = "trace", skip(self))]
    pub fn get_logs(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
        skip: u64,
        take: u64,
    ) -> Result<Vec<LogEntry>, TableError> {
        if take == 0 || min > max {
            return Ok(Vec::new());
        }
        let range = self
            .time_index
            .lookup(MinuteKey::of(&min), MinuteKey::of(&max), skip, take);
        if range.is_empty() {
            return Ok(Vec::new());
        }
        if range.from_log_index < 0
            || range.from_log_index + range.logs_count > self.header.total_logs_count
        {
            return Err(TableError::corrupted(format!(
                "time index points at logs {}..{} of {}",
                range.from_log_index,
                range.from_log_index + range.logs_count,
                self.header.total_logs_count
            )));
        }

        let records: Vec<FixedLogRecord> = self.records.lock().read_records_at(
            range.from_log_index as u64 * FixedLogRecord::SIZE as u64,
            range.logs_count as usize,
        )?;
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Ok(Vec::new());
        };

        let span_start = first.data_offset;
        let span_end = last.data_offset + last.payload_len();
        if span_start < 0 || span_end < span_start || span_end > self.header.next_free_data_offset
        {
            return Err(TableError::corrupted(format!(
                "payload span {span_start}..{span_end} outside 0..{}",
                self.header.next_free_data_offset
            )));
        }
        let mut payload = vec![0u8; (span_end - span_start) as usize];
        self.data.lock().read_at(span_start as u64, &mut payload)?;

        self.decode_entries(&records, range.from_log_index, span_start, &payload)
    }

    fn decode_entries(
        &self,
        records: &[FixedLogRecord],
        first_index: i64,
        span_start: i64,
        payload: &[u8],
    ) -> Result<Vec<LogEntry>, TableError> {
        let mut entries = Vec::with_capacity(records.len());
        let mut offset = span_start;

        for (i, record) in records.iter().enumerate() {
            let index = first_index + i as i64;
            if record.log_index != index
                || record.data_offset != offset
                || record.text_length_in_bytes < 0
                || record.categories_count < 0
            {
                return Err(TableError::corrupted(format!(
                    "log {index} has record {record:?}, expected data at {offset}"
                )));
            }

            let start = (offset - span_start) as usize;
            let text_end = start + record.text_length_in_bytes as usize;
            let end = start + record.payload_len() as usize;
            if end > payload.len() {
                return Err(TableError::corrupted(format!(
                    "log {index} payload ends past the read span"
                )));
            }

            let text = decode_text(&payload[start..text_end])?;
            let categories = payload[text_end..end]
                .chunks_exact(CATEGORY_ID_SIZE)
                .map(|raw| {
                    let id = get_i64(raw, 0);
                    usize::try_from(id)
                        .ok()
                        .and_then(|id| self.categories.name(id))
                        .map(str::to_string)
                        .ok_or_else(|| {
                            TableError::corrupted(format!("log {index} has unknown category {id}"))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            entries.push(LogEntry {
                index: index as u64,
                timestamp: from_micros(record.timestamp)?,
                text,
                categories,
            });
            offset += record.payload_len();
        }
        Ok(entries)
    }

    /// Number of logs in the table
    pub fn total_logs(&self) -> u64 {
        self.header.total_logs_count.max(0) as u64
    }

    /// Earliest log timestamp, `None` for an empty table
    pub fn min_timestamp(&self) -> Option<DateTime<Utc>> {
        if self.header.total_logs_count == 0 {
            return None;
        }
        from_micros(self.header.min_timestamp).ok()
    }

    /// Latest log timestamp, `None` for an empty table
    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        if self.header.total_logs_count == 0 {
            return None;
        }
        from_micros(self.header.max_timestamp).ok()
    }

    /// Every category with its aggregate stats, in index order
    pub fn categories(&self) -> Result<Vec<CategoryInfo>, TableError> {
        self.categories.infos()
    }

    /// Metrics published by this table's storages
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.factory.metrics()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Where the table lives
    pub fn location(&self) -> String {
        self.factory.location()
    }

    /// Flush and release every storage. Any later call fails with a closed
    /// storage error.
    #[instrument(skip_all, fields(location = %self.factory.location()))]
    pub fn close(&mut self) -> Result<(), TableError> {
        let storages = [
            &mut self.table_storage,
            &mut self.records,
            &mut self.data,
            &mut self.categories_storage,
        ];
        for storage in storages.into_iter().chain(self.year_storages.values_mut()) {
            let storage = storage.get_mut();
            if storage.is_open() {
                storage.flush()?;
            }
            storage.close()?;
        }
        info!("Closed log table");
        Ok(())
    }
}
