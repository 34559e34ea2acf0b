//! Persisted layouts of a log table
//!
//! ## File Set
//!
//! ```text
//! _TABLE.BIN                         TableHeader
//! _LOGS.BIN                          FixedLogRecord per log, indexed by log index
//! _LOGS_DATA.BIN (+ .LZ4, .LZ4-HEAD) payloads, compressed append-only stream
//! _CATEGORIES.BIN                    category records in index order
//! _INDEX_BY_YEAR_<YYYY>_MINUTES.BIN  TimeIndexEntry per minute of the year
//! ```
//!
//! ## Payload
//!
//! ```text
//! [text_length_in_bytes: UTF-16LE text][categories_count * 8 bytes: i64 category index]
//! ```

use chrono::{DateTime, Utc};
use rax_storage::FixedLayout;
use rax_storage::codec::{get_i32, get_i64, put_i32, put_i64};

use crate::error::TableError;

pub const TABLE_FILE: &str = "_TABLE.BIN";
pub const LOGS_FILE: &str = "_LOGS.BIN";
pub const LOGS_DATA_FILE: &str = "_LOGS_DATA.BIN";
pub const CATEGORIES_FILE: &str = "_CATEGORIES.BIN";

/// Name of the time index file for `year`
pub fn year_index_file(year: i32) -> String {
    format!("_INDEX_BY_YEAR_{year:04}_MINUTES.BIN")
}

/// Width of one category index in a payload
pub const CATEGORY_ID_SIZE: usize = 8;

/// Singleton header of a table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableHeader {
    pub total_logs_count: i64,
    /// Earliest timestamp, microseconds. Meaningless while the table is empty.
    pub min_timestamp: i64,
    /// Latest timestamp, microseconds. Meaningless while the table is empty.
    pub max_timestamp: i64,
    pub categories_count: i64,
    /// Logical end of the payload stream
    pub next_free_data_offset: i64,
}

impl FixedLayout for TableHeader {
    const SIZE: usize = 40;

    fn encode(&self, out: &mut [u8]) {
        put_i64(out, 0, self.total_logs_count);
        put_i64(out, 8, self.min_timestamp);
        put_i64(out, 16, self.max_timestamp);
        put_i64(out, 24, self.categories_count);
        put_i64(out, 32, self.next_free_data_offset);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            total_logs_count: get_i64(bytes, 0),
            min_timestamp: get_i64(bytes, 8),
            max_timestamp: get_i64(bytes, 16),
            categories_count: get_i64(bytes, 24),
            next_free_data_offset: get_i64(bytes, 32),
        }
    }
}

/// Fixed-width record of one log, stored at `log_index * SIZE`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedLogRecord {
    pub timestamp: i64,
    pub log_index: i64,
    pub data_offset: i64,
    pub text_length_in_bytes: i32,
    pub categories_count: i32,
}

impl FixedLogRecord {
    /// Size of this record's payload
    pub fn payload_len(&self) -> i64 {
        i64::from(self.text_length_in_bytes)
            + i64::from(self.categories_count) * CATEGORY_ID_SIZE as i64
    }
}

impl FixedLayout for FixedLogRecord {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        put_i64(out, 0, self.timestamp);
        put_i64(out, 8, self.log_index);
        put_i64(out, 16, self.data_offset);
        put_i32(out, 24, self.text_length_in_bytes);
        put_i32(out, 28, self.categories_count);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            timestamp: get_i64(bytes, 0),
            log_index: get_i64(bytes, 8),
            data_offset: get_i64(bytes, 16),
            text_length_in_bytes: get_i32(bytes, 24),
            categories_count: get_i32(bytes, 28),
        }
    }
}

/// Stats of one minute bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeIndexEntry {
    pub logs_count: i64,
    /// Index of the first log in the bucket, valid when `logs_count > 0`
    pub first_log_index: i64,
}

impl FixedLayout for TimeIndexEntry {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut [u8]) {
        put_i64(out, 0, self.logs_count);
        put_i64(out, 8, self.first_log_index);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            logs_count: get_i64(bytes, 0),
            first_log_index: get_i64(bytes, 8),
        }
    }
}

/// Persisted timestamp of `at`
pub fn to_micros(at: &DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Timestamp from its persisted form
pub fn from_micros(micros: i64) -> Result<DateTime<Utc>, TableError> {
    DateTime::from_timestamp_micros(micros).ok_or(TableError::InvalidTimestamp(micros))
}

/// Append the UTF-16LE code units of `text` to `out`, returning the byte count
pub fn encode_text(text: &str, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.len() - start
}

/// Decode UTF-16LE text
pub fn decode_text(bytes: &[u8]) -> Result<String, TableError> {
    if bytes.len() % 2 != 0 {
        return Err(TableError::corrupted(format!(
            "text of odd length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| TableError::corrupted(format!("log text: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout_offsets() {
        let record = FixedLogRecord {
            timestamp: 1,
            log_index: 2,
            data_offset: 3,
            text_length_in_bytes: 4,
            categories_count: 5,
        };
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(get_i64(&bytes, 16), 3);
        assert_eq!(get_i32(&bytes, 24), 4);
        assert_eq!(get_i32(&bytes, 28), 5);
        assert_eq!(FixedLogRecord::decode(&bytes), record);
        assert_eq!(record.payload_len(), 4 + 5 * 8);
    }

    #[test]
    fn test_header_layout_offsets() {
        let header = TableHeader {
            total_logs_count: 10,
            min_timestamp: -1,
            max_timestamp: 99,
            categories_count: 7,
            next_free_data_offset: 4096,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(get_i64(&bytes, 8), -1);
        assert_eq!(get_i64(&bytes, 32), 4096);
        assert_eq!(TableHeader::decode(&bytes), header);
    }

    #[test]
    fn test_year_file_name() {
        assert_eq!(year_index_file(2024), "_INDEX_BY_YEAR_2024_MINUTES.BIN");
        assert_eq!(year_index_file(812), "_INDEX_BY_YEAR_0812_MINUTES.BIN");
    }

    #[test]
    fn test_text_utf16() {
        let mut out = Vec::new();
        let len = encode_text("héllo 🌍", &mut out);
        // 6 BMP units + 1 surrogate pair
        assert_eq!(len, 16);
        assert_eq!(decode_text(&out).unwrap(), "héllo 🌍");

        assert!(matches!(decode_text(&out[..3]), Err(TableError::Corrupted(_))));
    }

    #[test]
    fn test_micros_conversion() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap();
        let micros = to_micros(&at);
        assert_eq!(micros, 1_700_000_000_123_456);
        assert_eq!(from_micros(micros).unwrap(), at);
        assert!(matches!(
            from_micros(i64::MAX),
            Err(TableError::InvalidTimestamp(_))
        ));
    }
}
