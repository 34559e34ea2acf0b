//! File-backed storage
//!
//! One storage is one file inside a table's working directory. File names
//! are upper-cased on disk, which is part of the table's file format.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::Storage;
use crate::error::StorageError;

/// File-based implementation of [`Storage`]
#[derive(Debug)]
pub struct FileStorage {
    /// Name as requested by the caller
    name: String,
    /// Full path of the backing file
    path: PathBuf,
    /// Open handle, `None` while closed
    file: Option<File>,
    /// Cursor
    position: u64,
    /// Whether flush also syncs file data to the device
    sync_on_flush: bool,
}

impl FileStorage {
    /// Create a storage for `name` inside `working_dir`. Nothing is touched on
    /// disk until [`Storage::create`] or [`Storage::open`].
    pub fn new(working_dir: impl AsRef<Path>, name: &str, sync_on_flush: bool) -> Self {
        let path = working_dir.as_ref().join(name.to_uppercase());
        Self {
            name: name.to_string(),
            path,
            file: None,
            position: 0,
            sync_on_flush,
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&mut self) -> Result<&mut File, StorageError> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(StorageError::closed(&self.name)),
        }
    }

    fn acquire(&mut self, options: &OpenOptions) -> Result<(), StorageError> {
        if self.file.is_some() {
            return Err(StorageError::AlreadyOpen(self.name.clone()));
        }
        let file = options
            .open(&self.path)
            .map_err(|e| StorageError::acquire(self.path.display().to_string(), e))?;
        self.file = Some(file);
        self.position = 0;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn create(&mut self) -> Result<(), StorageError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        self.acquire(&options)?;
        debug!(path = %self.path.display(), "Created storage file");
        Ok(())
    }

    fn open(&mut self) -> Result<(), StorageError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        self.acquire(&options)?;
        trace!(path = %self.path.display(), "Opened storage file");
        Ok(())
    }

    fn delete(&mut self) -> Result<(), StorageError> {
        self.close()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn set_position(&mut self, offset: u64) -> Result<(), StorageError> {
        self.handle()?;
        self.position = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        let offset = self.position;
        let file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        match file.read_exact(buf) {
            Ok(()) => {
                self.position = offset + buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                let length = file.metadata()?.len();
                Err(StorageError::UnexpectedEof {
                    name: self.name.clone(),
                    offset,
                    wanted: buf.len(),
                    length,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        let offset = self.position;
        let file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        self.position = offset + buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let sync = self.sync_on_flush;
        let file = self.handle()?;
        file.flush()?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            trace!(path = %self.path.display(), "Closed storage file");
        }
        Ok(())
    }
}
