//! Write-Ahead Logging (WAL) and snapshot persistence for the score store

use crate::core::{EntityId, LeaderboardVariant, Result, ScoreDelta, ScoreRecord, TenantId, XpError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// One logical mutation of the score store.
///
/// Every entry carries its own timestamp so that replay reproduces
/// `updated_at` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    Batch {
        tenant: TenantId,
        batch_id: Option<String>,
        deltas: Vec<ScoreDelta>,
        at: DateTime<Utc>,
    },
    DecrementLifetime {
        tenant: TenantId,
        entity: EntityId,
        amount: u64,
        at: DateTime<Utc>,
    },
    SetLifetime {
        tenant: TenantId,
        entity: EntityId,
        value: u64,
        at: DateTime<Utc>,
    },
    SetClan {
        tenant: TenantId,
        entity: EntityId,
        clan_id: Option<u16>,
        at: DateTime<Utc>,
    },
    ResetPeriod {
        tenant: Option<TenantId>,
        variant: LeaderboardVariant,
        at: DateTime<Utc>,
    },
    ResetTenant {
        tenant: TenantId,
    },
    DeleteEntity {
        tenant: TenantId,
        entity: EntityId,
    },
}

/// A WAL frame: the entry plus its position in the log.
///
/// Sequence numbers keep increasing across checkpoints, so recovery can
/// skip entries a snapshot already contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub entry: WalEntry,
}

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    /// Sequence of the last WAL entry folded into this snapshot.
    pub last_seq: u64,
    pub records: Vec<ScoreRecord>,
    pub applied_batches: Vec<(TenantId, String, DateTime<Utc>)>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub record_count: usize,
    pub tenant_count: usize,
}

impl StoreSnapshot {
    pub fn new(
        records: Vec<ScoreRecord>,
        applied_batches: Vec<(TenantId, String, DateTime<Utc>)>,
    ) -> Self {
        let mut tenants: Vec<&TenantId> = records.iter().map(|r| &r.tenant_id).collect();
        tenants.sort();
        tenants.dedup();
        let tenant_count = tenants.len();
        let record_count = records.len();

        Self {
            version: 1,
            last_seq: 0,
            records,
            applied_batches,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                record_count,
                tenant_count,
            },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every WAL append
    Sync,
    /// flush to the OS, no fsync
    #[default]
    Async,
    /// no WAL, no snapshots
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = XpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(DurabilityMode::Sync),
            "async" => Ok(DurabilityMode::Async),
            "none" => Ok(DurabilityMode::None),
            other => Err(XpError::ConfigError(format!("unknown durability mode '{}'", other))),
        }
    }
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    /// Bytes of complete frames on disk.
    committed_len: u64,
    last_seq: u64,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| XpError::IoError(format!("Failed to create WAL directory: {}", e)))?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| XpError::IoError(format!("Failed to open WAL file: {}", e)))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        let committed_len = match &wal_file {
            Some(file) => file.get_ref().metadata()?.len(),
            None => 0,
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            committed_len,
            last_seq: 0,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    /// Append one length-prefixed MessagePack frame and return its sequence.
    ///
    /// A frame that fails half way is cut off again, so the log never holds
    /// a torn frame in front of later ones.
    pub fn append(&mut self, entry: &WalEntry) -> Result<u64> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(self.last_seq);
        }
        let record = WalRecord {
            seq: self.last_seq + 1,
            entry: entry.clone(),
        };
        let serialized = rmp_serde::to_vec(&record)?;

        if let Err(err) = self.write_frame(&serialized) {
            if let Err(rollback) = self.truncate_to(self.committed_len) {
                tracing::error!(
                    path = %self.wal_path.display(),
                    error = %rollback,
                    "failed to cut back partial WAL frame"
                );
            }
            return Err(err);
        }

        self.committed_len += 4 + serialized.len() as u64;
        self.last_seq = record.seq;
        self.entries_since_checkpoint += 1;
        Ok(record.seq)
    }

    fn write_frame(&mut self, serialized: &[u8]) -> Result<()> {
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| XpError::IoError("WAL file not initialized".to_string()))?;
        let len = u32::try_from(serialized.len())
            .map_err(|_| XpError::SerializationError("WAL entry too large".to_string()))?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(serialized)?;
        file.flush()?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut().sync_all()?;
        }
        Ok(())
    }

    /// Drop everything past `len` bytes and reopen for appending.
    fn truncate_to(&mut self, len: u64) -> Result<()> {
        // Discard buffered bytes of the failed frame without writing them.
        if let Some(writer) = self.wal_file.take() {
            let _ = writer.into_parts();
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.wal_path)
            .map_err(|e| XpError::IoError(format!("Failed to reopen WAL: {}", e)))?;
        file.set_len(len)?;
        file.sync_all()?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.wal_path)
            .map_err(|e| XpError::IoError(format!("Failed to reopen WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.committed_len = len;
        Ok(())
    }

    /// Reads every complete frame. A torn trailing frame is ignored.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| XpError::IoError(format!("Failed to open WAL for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = %self.wal_path.display(), "ignoring torn WAL tail");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            entries.push(rmp_serde::from_slice(&data)?);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| XpError::IoError(format!("Failed to truncate WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.committed_len = 0;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Continue numbering after `seq`.
    pub fn resume_after(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Written to a temp file in the same directory, fsynced, then renamed over the old one.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let dir = self
            .snapshot_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| XpError::IoError(format!("Failed to create snapshot directory: {}", e)))?;

        let serialized = rmp_serde::to_vec(snapshot)?;
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| XpError::IoError(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| XpError::IoError(format!("Failed to persist snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| XpError::IoError(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(rmp_serde::from_slice(&data)?))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join("xpcache.wal"), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join("xpcache.snapshot"));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<u64> {
        self.wal.append(entry)
    }

    /// Save a snapshot of everything logged so far, then truncate the WAL.
    pub fn checkpoint(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.save_snapshot(snapshot)?;
        self.wal.clear()?;
        Ok(())
    }

    /// First half of a checkpoint. On its own it leaves the WAL in place,
    /// which recovery handles by skipping entries the snapshot covers.
    pub fn save_snapshot(&mut self, mut snapshot: StoreSnapshot) -> Result<()> {
        snapshot.last_seq = self.wal.last_seq();
        self.snapshot.save(&snapshot)
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Last snapshot (if any) plus the WAL entries logged after it.
    pub fn recover(&mut self) -> Result<(Option<StoreSnapshot>, Vec<WalEntry>)> {
        let snapshot = self.snapshot.load()?;
        let records = self.wal.read_all()?;

        let covered = snapshot.as_ref().map(|s| s.last_seq).unwrap_or(0);
        let newest = records.iter().map(|r| r.seq).max().unwrap_or(0);
        self.wal.resume_after(covered.max(newest));

        let skipped = records.iter().filter(|r| r.seq <= covered).count();
        if skipped > 0 {
            tracing::warn!(skipped, covered, "WAL entries already in snapshot, skipping");
        }

        let entries = records
            .into_iter()
            .filter(|r| r.seq > covered)
            .map(|r| r.entry)
            .collect();
        Ok((snapshot, entries))
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }
}
