//! Fixed-layout record encoding
//!
//! Persisted structures are written field by field in little endian with
//! explicit offsets and no padding. The in-memory layout of a Rust struct
//! never reaches the disk.

use crate::{Storage, StorageError};

/// A record with a fixed on-disk width
pub trait FixedLayout: Sized {
    /// Encoded width in bytes
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes long
    fn encode(&self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `SIZE` bytes long
    fn decode(bytes: &[u8]) -> Self;

    /// Encode into a freshly allocated buffer
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode(&mut out);
        out
    }
}

/// Structured record I/O on top of the raw [`Storage`] primitives
pub trait RecordIo: Storage {
    /// Read one record at the cursor
    fn read_record<T: FixedLayout>(&mut self) -> Result<T, StorageError> {
        let mut buf = vec![0u8; T::SIZE];
        self.read(&mut buf)?;
        Ok(T::decode(&buf))
    }

    /// Read one record at `offset`
    fn read_record_at<T: FixedLayout>(&mut self, offset: u64) -> Result<T, StorageError> {
        self.set_position(offset)?;
        self.read_record()
    }

    /// Write one record at the cursor
    fn write_record<T: FixedLayout>(&mut self, record: &T) -> Result<(), StorageError> {
        self.write(&record.to_bytes())
    }

    /// Write one record at `offset`
    fn write_record_at<T: FixedLayout>(
        &mut self,
        offset: u64,
        record: &T,
    ) -> Result<(), StorageError> {
        self.set_position(offset)?;
        self.write_record(record)
    }

    /// Read `count` consecutive records starting at `offset`
    fn read_records_at<T: FixedLayout>(
        &mut self,
        offset: u64,
        count: usize,
    ) -> Result<Vec<T>, StorageError> {
        let mut buf = vec![0u8; T::SIZE * count];
        self.read_at(offset, &mut buf)?;
        Ok(buf.chunks_exact(T::SIZE).map(T::decode).collect())
    }
}

impl<S: Storage + ?Sized> RecordIo for S {}

#[inline]
pub fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_i64(buf: &mut [u8], at: usize, value: i64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub fn get_i32(buf: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(raw)
}

#[inline]
pub fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub fn get_i64(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[derive(Debug, PartialEq)]
    struct Pair {
        a: i64,
        b: u32,
    }

    impl FixedLayout for Pair {
        const SIZE: usize = 12;

        fn encode(&self, out: &mut [u8]) {
            put_i64(out, 0, self.a);
            put_u32(out, 8, self.b);
        }

        fn decode(bytes: &[u8]) -> Self {
            Self {
                a: get_i64(bytes, 0),
                b: get_u32(bytes, 8),
            }
        }
    }

    #[test]
    fn test_field_offsets_are_little_endian() {
        let bytes = Pair { a: 1, b: 0x0102_0304 }.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_record_io_on_storage() {
        let mut storage = MemoryStorage::new("pairs");
        storage.create().unwrap();

        storage.write_record_at(0, &Pair { a: -5, b: 7 }).unwrap();
        storage.write_record(&Pair { a: 9, b: 11 }).unwrap();

        let first: Pair = storage.read_record_at(0).unwrap();
        assert_eq!(first, Pair { a: -5, b: 7 });

        let all: Vec<Pair> = storage.read_records_at(0, 2).unwrap();
        assert_eq!(all[1], Pair { a: 9, b: 11 });
    }

    #[test]
    fn test_signed_round_trip() {
        let mut buf = [0u8; 12];
        put_i32(&mut buf, 0, -42);
        put_u64(&mut buf, 4, u64::MAX - 1);
        assert_eq!(get_i32(&buf, 0), -42);
        assert_eq!(get_u64(&buf, 4), u64::MAX - 1);
    }
}
