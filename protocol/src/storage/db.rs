//! # MarketDb: Persistent Storage Engine
//!
//! Built on sled's embedded key-value store. All on-disk data flows through
//! this module.
//!
//! ## Tree Layout
//!
//! | Tree        | Key                 | Value               |
//! |-------------|---------------------|---------------------|
//! | `snapshots` | name (UTF-8)        | `bincode(T)`        |
//! | `events`    | `seq` (8B BE)       | `bincode(E)`        |
//! | `metadata`  | key (UTF-8)         | value (UTF-8)       |
//!
//! Event sequence numbers are stored as big-endian u64 so that sled's
//! lexicographic ordering matches numeric ordering, which makes range scans
//! over the log work naturally.

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Metadata key holding the next event sequence number.
const META_NEXT_EVENT_SEQ: &[u8] = b"next_event_seq";

// ---------------------------------------------------------------------------
// MarketDb
// ---------------------------------------------------------------------------

/// Persistent storage for node snapshots and the event log.
///
/// sled trees support concurrent reads and serialized writes, so a
/// `MarketDb` can be shared via `Arc` or cloned freely.
#[derive(Debug, Clone)]
pub struct MarketDb {
    db: Db,
    snapshots: Tree,
    events: Tree,
    metadata: Tree,
}

impl MarketDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database, deleted when dropped. Ideal for tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let snapshots = db.open_tree("snapshots")?;
        let events = db.open_tree("events")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            snapshots,
            events,
            metadata,
        })
    }

    // -- Snapshots ----------------------------------------------------------

    /// Stores a snapshot under `name`, replacing any previous one.
    pub fn put_snapshot<T: Serialize>(&self, name: &str, value: &T) -> DbResult<()> {
        self.snapshots.insert(name.as_bytes(), encode(value)?)?;
        Ok(())
    }

    /// Loads the snapshot stored under `name`, if any.
    pub fn get_snapshot<T: DeserializeOwned>(&self, name: &str) -> DbResult<Option<T>> {
        match self.snapshots.get(name.as_bytes())? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // -- Commits ------------------------------------------------------------

    /// Replaces the snapshot under `name` and appends `events` to the log
    /// in one transaction: either both land or neither does. Returns the
    /// sequence number of the first appended event.
    pub fn commit<T: Serialize, E: Serialize>(
        &self,
        name: &str,
        snapshot: &T,
        events: &[E],
    ) -> DbResult<u64> {
        let snapshot = encode(snapshot)?;
        let encoded = events.iter().map(encode).collect::<DbResult<Vec<_>>>()?;

        let result = (&self.snapshots, &self.events, &self.metadata).transaction(
            |(snapshots, log, metadata)| -> ConflictableTransactionResult<u64, DbError> {
                let first = match metadata.get(META_NEXT_EVENT_SEQ)? {
                    Some(bytes) => decode_seq(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => 0,
                };
                snapshots.insert(name.as_bytes(), snapshot.as_slice())?;
                for (offset, bytes) in encoded.iter().enumerate() {
                    let seq = first + offset as u64;
                    log.insert(seq.to_be_bytes().to_vec(), bytes.as_slice())?;
                }
                let next = first + encoded.len() as u64;
                metadata.insert(META_NEXT_EVENT_SEQ, next.to_be_bytes().to_vec())?;
                Ok(first)
            },
        );
        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => DbError::Sled(e),
        })
    }

    // -- Event log ----------------------------------------------------------

    /// Reads up to `limit` events starting at sequence `from`.
    pub fn events_from<E: DeserializeOwned>(
        &self,
        from: u64,
        limit: usize,
    ) -> DbResult<Vec<(u64, E)>> {
        let mut out = Vec::new();
        for entry in self.events.range(from.to_be_bytes()..).take(limit) {
            let (key, value) = entry?;
            let seq_bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| DbError::Serialization("corrupt event key".to_string()))?;
            let event = bincode::deserialize(&value)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            out.push((u64::from_be_bytes(seq_bytes), event));
        }
        Ok(out)
    }

    /// Number of events in the log.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // -- Metadata -----------------------------------------------------------

    pub fn put_meta(&self, key: &str, value: &str) -> DbResult<()> {
        self.metadata.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self
            .metadata
            .get(key.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_seq(bytes: &[u8]) -> DbResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("corrupt event sequence".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}
