use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use memmap2::Mmap;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use crate::error::StorageError;
use crate::model::{Counters, MessageRecord};

pub const SNAPSHOT_FORMAT: u32 = 2;

/// Point-in-time image of the record store plus counters.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Snapshot {
    pub format: u32,
    /// Increases with every capture; a write never replaces a higher one
    pub generation: u64,
    pub dimension: u32,
    pub records: Vec<MessageRecord>,
    pub counters: Counters,
}

impl Snapshot {
    pub fn new(generation: u64, dimension: usize, records: Vec<MessageRecord>, counters: Counters) -> Self {
        Self {
            format: SNAPSHOT_FORMAT,
            generation,
            dimension: dimension as u32,
            records,
            counters,
        }
    }
}

/// Single-file snapshot persistence. Writes go to a sibling temp file and
/// are renamed into place, so readers only ever see a complete archive.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    strict_durability: bool,
    // Generation of the last snapshot written through this store
    written: Mutex<u64>,
}

impl SnapshotStore {
    pub fn new(path: &Path, strict_durability: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            strict_durability,
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of bytes written, or `None` when a newer
    /// generation is already on disk and `snapshot` was dropped.
    pub fn save(&self, snapshot: &Snapshot) -> Result<Option<usize>, StorageError> {
        let bytes = rkyv::to_bytes::<_, 4096>(snapshot)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        // Serialize writers; a poisoned guard still protects the temp file
        let mut written = self.written.lock().unwrap_or_else(|p| p.into_inner());
        if snapshot.generation <= *written {
            return Ok(None);
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            if self.strict_durability {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &self.path)?;
        *written = snapshot.generation;
        Ok(Some(bytes.len()))
    }

    /// `Ok(None)` when no snapshot exists yet.
    pub fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if file.metadata()?.len() == 0 {
            return Err(StorageError::Corrupt("empty snapshot file".into()));
        }

        // Safety: the file is only ever replaced by rename, never written in place
        let mmap = unsafe { Mmap::map(&file)? };

        let archived = rkyv::check_archived_root::<Snapshot>(&mmap[..])
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let snapshot: Snapshot = archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| StorageError::Corrupt("cannot deserialize archive".into()))?;

        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(StorageError::Incompatible(format!(
                "format {} (expected {})",
                snapshot.format, SNAPSHOT_FORMAT
            )));
        }
        Ok(Some(snapshot))
    }
}
