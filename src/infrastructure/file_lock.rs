use crate::domain::ports::BatchLock;
use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Lock directory for the database at `db_path`: a sibling named `<db>.locks`.
pub fn lock_dir_for(db_path: &Path) -> PathBuf {
    match db_path.file_name() {
        Some(name) => {
            let mut dir = name.to_os_string();
            dir.push(".locks");
            db_path.with_file_name(dir)
        }
        None => db_path.join("locks"),
    }
}

/// Advisory lock shared by every process working on the same database.
///
/// Each key is an exclusive OS file lock on `<dir>/<key>.lock`, taken without
/// waiting. The operating system drops it when the holding process exits,
/// so a crashed run never wedges the key.
#[derive(Clone)]
pub struct FileLock {
    dir: PathBuf,
    held: Arc<Mutex<HashMap<i64, File>>>,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            held: Arc::default(),
        }
    }

    pub fn for_database(db_path: &Path) -> Self {
        Self::new(lock_dir_for(db_path))
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.held.lock().map(|held| held.contains_key(&key)).unwrap_or(false)
    }

    fn path(&self, key: i64) -> PathBuf {
        self.dir.join(format!("{key:016x}.lock"))
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[async_trait]
impl BatchLock for FileLock {
    async fn try_acquire(&self, key: i64) -> Result<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| ProcessorError::InternalError(e.to_string().into()))?;
        if held.contains_key(&key) {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path(key))?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                held.insert(key, file);
                Ok(true)
            }
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Closing the file releases the OS lock.
    async fn release(&self, key: i64) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| ProcessorError::InternalError(e.to_string().into()))?;
        held.remove(&key);
        Ok(())
    }
}
