//! Client-side offset persistence
//!
//! Offsets committed to the group coordinator are one option; an
//! [`OffsetStore`] keeps them locally instead, so a consumer can resume from
//! its own record of progress. [`crate::StoredOffsetContext`] plugs a store
//! into rebalance handling.
//!
//! # Example
//!
//! ```ignore
//! use strand_client::{LockFileOffsetStore, OffsetStore};
//! use strand_core::TopicPartition;
//! use std::path::Path;
//!
//! let store = LockFileOffsetStore::open(Path::new("/var/lib/strand/offsets"), "billing")?;
//! let tp = TopicPartition::new("orders", 0);
//!
//! let resume_at = store.load(&tp)?.unwrap_or(0);
//! // ... process records ...
//! store.save(&tp, next_offset)?;
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use strand_core::TopicPartition;

use crate::error::{ClientError, Result};

/// Local persistence of the next offset to consume per partition
pub trait OffsetStore: Send + Sync {
    /// Stored offset for a partition, `None` on first run
    fn load(&self, tp: &TopicPartition) -> Result<Option<i64>>;

    /// Record the next offset to consume
    fn save(&self, tp: &TopicPartition, offset: i64) -> Result<()>;

    fn delete(&self, tp: &TopicPartition) -> Result<()>;

    /// Every stored offset
    fn list_all(&self) -> Result<HashMap<TopicPartition, i64>>;
}

impl<S: OffsetStore + ?Sized> OffsetStore for Arc<S> {
    fn load(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        (**self).load(tp)
    }

    fn save(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        (**self).save(tp, offset)
    }

    fn delete(&self, tp: &TopicPartition) -> Result<()> {
        (**self).delete(tp)
    }

    fn list_all(&self) -> Result<HashMap<TopicPartition, i64>> {
        (**self).list_all()
    }
}

/// In-memory offset store for tests and ephemeral consumers
#[derive(Debug, Default, Clone)]
pub struct MemoryOffsetStore {
    offsets: Arc<RwLock<HashMap<TopicPartition, i64>>>,
}

impl MemoryOffsetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        let offsets = self.offsets.read().map_err(ClientError::poisoned)?;
        Ok(offsets.get(tp).copied())
    }

    fn save(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let mut offsets = self.offsets.write().map_err(ClientError::poisoned)?;
        offsets.insert(tp.clone(), offset);
        Ok(())
    }

    fn delete(&self, tp: &TopicPartition) -> Result<()> {
        let mut offsets = self.offsets.write().map_err(ClientError::poisoned)?;
        offsets.remove(tp);
        Ok(())
    }

    fn list_all(&self) -> Result<HashMap<TopicPartition, i64>> {
        let offsets = self.offsets.read().map_err(ClientError::poisoned)?;
        Ok(offsets.clone())
    }
}

/// File-based offset store with lock file protection
///
/// One file per partition under a per-consumer directory:
/// ```text
/// {base_dir}/{consumer_name}/
/// ├── {topic}-{partition}.offset
/// └── {topic}-{partition}.lock
/// ```
///
/// Writes go through a temp file and rename while holding an exclusive
/// `flock` on the partition's lock file.
#[derive(Debug)]
pub struct LockFileOffsetStore {
    base_dir: PathBuf,
    consumer_name: String,
    cache: RwLock<HashMap<TopicPartition, i64>>,
}

impl LockFileOffsetStore {
    /// Open or create the store at `base_dir/consumer_name`, loading any
    /// offsets already on disk.
    ///
    /// # Errors
    /// I/O errors creating or scanning the directory.
    pub fn open(base_dir: &Path, consumer_name: &str) -> Result<Self> {
        let dir = base_dir.join(consumer_name);
        fs::create_dir_all(&dir)?;

        let store = Self {
            base_dir: dir,
            consumer_name: consumer_name.to_string(),
            cache: RwLock::new(HashMap::new()),
        };
        store.load_all_into_cache()?;

        tracing::debug!(
            dir = %store.base_dir.display(),
            offsets = store.cache.read().map(|c| c.len()).unwrap_or(0),
            "offset store opened"
        );
        Ok(store)
    }

    fn offset_file_path(&self, tp: &TopicPartition) -> PathBuf {
        self.base_dir
            .join(format!("{}-{}.offset", tp.topic, tp.partition))
    }

    fn lock_file_path(&self, tp: &TopicPartition) -> PathBuf {
        self.base_dir.join(format!("{}-{}.lock", tp.topic, tp.partition))
    }

    fn load_all_into_cache(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(ClientError::poisoned)?;

        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ClientError::IoError(e)),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(tp) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(Self::parse_offset_filename)
            else {
                continue;
            };
            match Self::read_offset_file(&path) {
                Ok(offset) => {
                    cache.insert(tp, offset);
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable offset file");
                },
            }
        }

        Ok(())
    }

    /// `{topic}-{partition}.offset`; topics may themselves contain `-`.
    fn parse_offset_filename(name: &str) -> Option<TopicPartition> {
        let stem = name.strip_suffix(".offset")?;
        let (topic, partition) = stem.rsplit_once('-')?;
        if topic.is_empty() {
            return None;
        }
        Some(TopicPartition::new(topic, partition.parse().ok()?))
    }

    fn read_offset_file(path: &Path) -> Result<i64> {
        let mut file = File::open(path)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        content
            .trim()
            .parse()
            .map_err(|e| ClientError::IoError(std::io::Error::other(e)))
    }

    fn write_offset_file(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let path = self.offset_file_path(tp);
        let temp_path = path.with_extension("offset.tmp");

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.lock_file_path(tp))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            // SAFETY: fd is a valid open descriptor owned by lock_file
            unsafe {
                if libc::flock(fd, libc::LOCK_EX) != 0 {
                    return Err(ClientError::IoError(std::io::Error::last_os_error()));
                }
            }
        }

        let mut temp_file = File::create(&temp_path)?;
        writeln!(temp_file, "{offset}")?;
        temp_file.sync_all()?;
        drop(temp_file);

        fs::rename(&temp_path, &path)?;

        // Unlocks
        drop(lock_file);
        Ok(())
    }

    #[must_use]
    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl OffsetStore for LockFileOffsetStore {
    fn load(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        {
            let cache = self.cache.read().map_err(ClientError::poisoned)?;
            if let Some(&offset) = cache.get(tp) {
                return Ok(Some(offset));
            }
        }

        let path = self.offset_file_path(tp);
        if !path.exists() {
            return Ok(None);
        }
        let offset = Self::read_offset_file(&path)?;

        let mut cache = self.cache.write().map_err(ClientError::poisoned)?;
        cache.insert(tp.clone(), offset);
        Ok(Some(offset))
    }

    fn save(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.write_offset_file(tp, offset)?;

        let mut cache = self.cache.write().map_err(ClientError::poisoned)?;
        cache.insert(tp.clone(), offset);
        Ok(())
    }

    fn delete(&self, tp: &TopicPartition) -> Result<()> {
        {
            let mut cache = self.cache.write().map_err(ClientError::poisoned)?;
            cache.remove(tp);
        }

        for path in [self.offset_file_path(tp), self.lock_file_path(tp)] {
            match fs::remove_file(&path) {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(ClientError::IoError(e)),
            }
        }
        Ok(())
    }

    fn list_all(&self) -> Result<HashMap<TopicPartition, i64>> {
        let cache = self.cache.read().map_err(ClientError::poisoned)?;
        Ok(cache.clone())
    }
}
