//! In-memory storage
//!
//! A growable byte buffer with a cursor, suitable for tests and for tables
//! that never touch the disk.

use tracing::trace;

use crate::Storage;
use crate::error::StorageError;

/// In-memory implementation of [`Storage`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    name: String,
    data: Vec<u8>,
    position: u64,
    exists: bool,
    open: bool,
}

impl MemoryStorage {
    /// Create a new, not yet existing, memory storage
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Current length of the buffer
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.open {
            Ok(())
        } else {
            Err(StorageError::closed(&self.name))
        }
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        self.exists
    }

    fn create(&mut self) -> Result<(), StorageError> {
        if self.open {
            return Err(StorageError::AlreadyOpen(self.name.clone()));
        }
        self.data.clear();
        self.position = 0;
        self.exists = true;
        self.open = true;
        trace!(name = %self.name, "Created memory storage");
        Ok(())
    }

    fn open(&mut self) -> Result<(), StorageError> {
        if self.open {
            return Err(StorageError::AlreadyOpen(self.name.clone()));
        }
        if !self.exists {
            return Err(StorageError::acquire(&self.name, "memory storage does not exist"));
        }
        self.position = 0;
        self.open = true;
        Ok(())
    }

    fn delete(&mut self) -> Result<(), StorageError> {
        self.data = Vec::new();
        self.position = 0;
        self.exists = false;
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_position(&mut self, offset: u64) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.position = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        self.ensure_open()?;
        let start = self.position as usize;
        let end = start.checked_add(buf.len());
        match end {
            Some(end) if end <= self.data.len() => {
                buf.copy_from_slice(&self.data[start..end]);
                self.position = end as u64;
                Ok(())
            }
            _ => Err(StorageError::UnexpectedEof {
                name: self.name.clone(),
                offset: self.position,
                wanted: buf.len(),
                length: self.data.len() as u64,
            }),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        self.ensure_open()?;
        let out_of_range = || StorageError::OutOfRange {
            name: self.name.clone(),
            offset: self.position,
            len: buf.len(),
        };
        let start = usize::try_from(self.position).map_err(|_| out_of_range())?;
        let end = start.checked_add(buf.len()).ok_or_else(out_of_range)?;
        if end > self.data.len() {
            self.data
                .try_reserve(end - self.data.len())
                .map_err(|_| out_of_range())?;
            // gaps between the old end and `start` read back as zeroes
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.ensure_open()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.open = false;
        Ok(())
    }
}
