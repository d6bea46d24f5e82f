//! File-backed WAL store.
//!
//! Records are persisted as length-prefixed bincode frames in a single
//! append-only log file, fsync'd per append when configured. Startup
//! recovery scans the file, truncates a torn tail, rebuilds the in-memory
//! header index, and seeds the LSN allocator with the high-water mark.
//! Payloads are wrapped in the compression envelope at rest; reads strip it
//! transparently.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use timberdb_core::{
    BranchId, CompressionConfig, Lsn, NewRecord, Operation, ProjectId, TimberConfig, TimberError,
    TimberResult, WalRecord,
};

use super::WalStore;
use crate::allocator::LsnAllocator;
use crate::compression::PayloadCodec;

/// Configuration for [`FileWalStore`].
#[derive(Debug, Clone)]
pub struct FileWalStoreConfig {
    /// Directory holding the log file.
    pub dir: PathBuf,

    /// Log file stem; the file is `{dir}/{namespace}.wal`.
    pub namespace: String,

    /// fsync on every append (default: true).
    pub sync_on_write: bool,

    /// Upper bound on concurrent appends before `Busy` is reported.
    pub max_inflight_appends: usize,

    /// Payload compression settings.
    pub compression: CompressionConfig,
}

impl Default for FileWalStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./timberdb"),
            namespace: "wal".to_string(),
            sync_on_write: true,
            max_inflight_appends: 64,
            compression: CompressionConfig::default(),
        }
    }
}

impl FileWalStoreConfig {
    /// Derives store settings from the engine configuration.
    #[must_use]
    pub fn from_config(config: &TimberConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.storage.path),
            namespace: config.storage.namespace.clone(),
            sync_on_write: config.storage.sync_on_write,
            max_inflight_appends: config.storage.max_inflight_appends,
            compression: config.compression.clone(),
        }
    }
}

/// On-disk frame body. The payload carries the compression envelope.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    lsn: Lsn,
    timestamp: DateTime<Utc>,
    project_id: ProjectId,
    branch_id: BranchId,
    op: Operation,
    collection: String,
    document_id: String,
    payload: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

/// Record header plus the payload's frame location; kept in memory so range
/// and history queries filter without touching the file.
#[derive(Debug, Clone)]
struct IndexEntry {
    lsn: Lsn,
    timestamp: DateTime<Utc>,
    project_id: ProjectId,
    branch_id: BranchId,
    op: Operation,
    collection: String,
    document_id: String,
    offset: u64,
    len: u32,
}

struct WriterState {
    file: BufWriter<File>,
    offset: u64,
    last_timestamp: DateTime<Utc>,
}

/// Append-only, crash-recoverable WAL store over a single log file.
pub struct FileWalStore {
    log_path: PathBuf,
    writer: Mutex<WriterState>,
    reader: Mutex<File>,
    index: RwLock<Vec<IndexEntry>>,
    allocator: LsnAllocator,
    committed: AtomicI64,
    codec: PayloadCodec,
    sync_on_write: bool,
    append_permits: Arc<Semaphore>,
}

impl FileWalStore {
    /// Opens (or creates) the log, recovering any existing records.
    ///
    /// # Errors
    ///
    /// Returns `Io`/`Validation` when the directory cannot be prepared, the
    /// log cannot be opened, or the compression configuration is invalid.
    pub async fn open(config: FileWalStoreConfig) -> TimberResult<Self> {
        let codec = PayloadCodec::from_config(&config.compression)?;

        tokio::fs::create_dir_all(&config.dir).await?;
        let log_path = config.dir.join(format!("{}.wal", config.namespace));

        let recovered = recover(&log_path)?;
        info!(
            path = %log_path.display(),
            records = recovered.entries.len(),
            last_lsn = %recovered.last_lsn,
            "opened WAL log"
        );

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let reader = File::open(&log_path)?;

        Ok(Self {
            writer: Mutex::new(WriterState {
                file: BufWriter::new(file),
                offset: recovered.length,
                last_timestamp: recovered.last_timestamp,
            }),
            reader: Mutex::new(reader),
            index: RwLock::new(recovered.entries),
            allocator: LsnAllocator::new(recovered.last_lsn),
            committed: AtomicI64::new(recovered.last_lsn.value()),
            codec,
            sync_on_write: config.sync_on_write,
            append_permits: Arc::new(Semaphore::new(config.max_inflight_appends)),
            log_path,
        })
    }

    /// Path of the backing log file.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn read_frame(&self, entry: &IndexEntry) -> TimberResult<WalRecord> {
        let mut buf = vec![0u8; entry.len as usize];
        {
            let mut reader = self.reader.lock();
            reader.seek(SeekFrom::Start(entry.offset))?;
            reader.read_exact(&mut buf)?;
        }

        let stored: StoredRecord = bincode::deserialize(&buf).map_err(|e| {
            TimberError::storage(
                format!("wal read lsn={}", entry.lsn),
                format!("corrupt frame: {e}"),
            )
        })?;
        let payload = PayloadCodec::decode(&stored.payload)?;

        Ok(WalRecord {
            lsn: stored.lsn,
            timestamp: stored.timestamp,
            project_id: stored.project_id,
            branch_id: stored.branch_id,
            op: stored.op,
            collection: stored.collection,
            document_id: stored.document_id,
            payload,
            metadata: stored.metadata,
        })
    }

    fn read_all<F>(&self, filter: F) -> TimberResult<Vec<WalRecord>>
    where
        F: Fn(&IndexEntry) -> bool,
    {
        let matching: Vec<IndexEntry> = {
            let index = self.index.read();
            index.iter().filter(|e| filter(e)).cloned().collect()
        };

        matching.iter().map(|entry| self.read_frame(entry)).collect()
    }
}

#[async_trait]
impl WalStore for FileWalStore {
    async fn append(&self, record: NewRecord) -> TimberResult<Lsn> {
        let Ok(_permit) = self.append_permits.clone().try_acquire_owned() else {
            return Err(TimberError::busy("WAL append queue is full"));
        };

        let envelope = self.codec.encode(&record.payload)?;

        // The writer lock serializes allocation and persistence so the
        // visibility order always matches LSN order.
        let mut writer = self.writer.lock();
        let lsn = self.allocator.allocate();
        let timestamp = Utc::now().max(writer.last_timestamp);

        let stored = StoredRecord {
            lsn,
            timestamp,
            project_id: record.project_id,
            branch_id: record.branch_id,
            op: record.op,
            collection: record.collection.clone(),
            document_id: record.document_id.clone(),
            payload: envelope.to_vec(),
            metadata: record.metadata.clone(),
        };

        let body = bincode::serialize(&stored)
            .map_err(|e| TimberError::Serialization(e.to_string()))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| TimberError::validation("record frame exceeds 4 GiB"))?;

        let write = |w: &mut WriterState| -> std::io::Result<()> {
            w.file.write_u32::<LittleEndian>(body_len)?;
            w.file.write_all(&body)?;
            w.file.flush()?;
            if self.sync_on_write {
                w.file.get_ref().sync_all()?;
            }
            Ok(())
        };

        if let Err(e) = write(&mut writer) {
            // The allocated LSN is burned; the torn tail (if any) is
            // truncated on the next recovery.
            return Err(TimberError::storage(
                format!("wal append lsn={lsn}"),
                e.to_string(),
            ));
        }

        let body_offset = writer.offset + 4;
        writer.offset += 4 + u64::from(body_len);
        writer.last_timestamp = timestamp;

        self.index.write().push(IndexEntry {
            lsn,
            timestamp,
            project_id: record.project_id,
            branch_id: record.branch_id,
            op: record.op,
            collection: record.collection,
            document_id: record.document_id,
            offset: body_offset,
            len: body_len,
        });
        self.committed.store(lsn.value(), Ordering::SeqCst);
        drop(writer);

        debug!(%lsn, "appended WAL record");
        Ok(lsn)
    }

    async fn get(&self, lsn: Lsn) -> TimberResult<WalRecord> {
        let entry = {
            let index = self.index.read();
            index
                .binary_search_by_key(&lsn, |e| e.lsn)
                .ok()
                .map(|i| index[i].clone())
        };

        match entry {
            Some(entry) => self.read_frame(&entry),
            None => Err(TimberError::not_found("wal record", lsn.to_string())),
        }
    }

    async fn get_branch_entries(
        &self,
        branch_id: BranchId,
        collection: Option<&str>,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<Vec<WalRecord>> {
        self.read_all(|e| {
            e.branch_id == branch_id
                && lo <= e.lsn
                && e.lsn <= hi
                && collection.map_or(true, |c| e.collection == c)
        })
    }

    async fn get_entries_by_time(
        &self,
        project_id: ProjectId,
        at_or_before: DateTime<Utc>,
    ) -> TimberResult<Vec<WalRecord>> {
        self.read_all(|e| e.project_id == project_id && e.timestamp <= at_or_before)
    }

    async fn get_document_history(
        &self,
        branch_id: BranchId,
        collection: &str,
        document_id: &str,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<Vec<WalRecord>> {
        self.read_all(|e| {
            e.branch_id == branch_id
                && e.collection == collection
                && e.document_id == document_id
                && lo <= e.lsn
                && e.lsn <= hi
        })
    }

    async fn current_lsn(&self) -> TimberResult<Lsn> {
        Ok(Lsn::new(self.committed.load(Ordering::SeqCst)))
    }
}

struct Recovered {
    entries: Vec<IndexEntry>,
    length: u64,
    last_lsn: Lsn,
    last_timestamp: DateTime<Utc>,
}

/// Scans the log, indexing every intact frame. A torn tail (partial length
/// prefix, short body, or undecodable frame) ends the scan and is truncated
/// so the next append starts from a clean boundary.
fn recover(path: &Path) -> TimberResult<Recovered> {
    let mut entries = Vec::new();
    let mut last_lsn = Lsn::ZERO;
    let mut last_timestamp = DateTime::<Utc>::MIN_UTC;
    let mut good_offset: u64 = 0;

    let Ok(mut file) = File::open(path) else {
        return Ok(Recovered {
            entries,
            length: 0,
            last_lsn,
            last_timestamp,
        });
    };
    let file_len = file.metadata()?.len();

    loop {
        let body_len = match file.read_u32::<LittleEndian>() {
            Ok(len) => u64::from(len),
            Err(_) => break,
        };
        if good_offset + 4 + body_len > file_len {
            break;
        }

        let mut body = vec![0u8; body_len as usize];
        if file.read_exact(&mut body).is_err() {
            break;
        }

        let Ok(stored) = bincode::deserialize::<StoredRecord>(&body) else {
            break;
        };

        if stored.lsn > last_lsn {
            last_lsn = stored.lsn;
        }
        if stored.timestamp > last_timestamp {
            last_timestamp = stored.timestamp;
        }
        entries.push(IndexEntry {
            lsn: stored.lsn,
            timestamp: stored.timestamp,
            project_id: stored.project_id,
            branch_id: stored.branch_id,
            op: stored.op,
            collection: stored.collection,
            document_id: stored.document_id,
            offset: good_offset + 4,
            len: body_len as u32,
        });
        good_offset += 4 + body_len;
    }

    if good_offset < file_len {
        warn!(
            path = %path.display(),
            torn_bytes = file_len - good_offset,
            "truncating torn WAL tail"
        );
        drop(file);
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(good_offset)?;
        file.sync_all()?;
    }

    entries.sort_by_key(|e| e.lsn);

    Ok(Recovered {
        entries,
        length: good_offset,
        last_lsn,
        last_timestamp,
    })
}
