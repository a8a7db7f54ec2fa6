//! Write-ahead log ledger.
//!
//! Every commit is appended to a JSONL (JSON Lines) file under an exclusive
//! file lock before it becomes visible to queries. On open, the latest
//! snapshot is loaded and the log is replayed on top of it.

use crate::ledger::{Ledger, LedgerEntry, LedgerRecord, LedgerResult, Receipt};
use crate::policy::{Clock, SystemClock};
use crate::state::LedgerState;
use crate::types::{
    BloodGroup, BloodRequest, Donor, HospitalRef, Identity, InventoryRecord, RequestFilter,
    RequestId, ScheduledDonation,
};
use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use uuid::Uuid;

const LOG_FILE: &str = "ledger.wal";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Durable ledger backed by a JSONL log plus snapshots
///
/// Several handles, in this process or others, may share one directory.
/// Queries and commits first apply whatever other writers appended since
/// this handle last read the log. Each commit then checks its entry against
/// that state under the exclusive file lock: entries carry the prior count,
/// points total or request status they were computed from, and are rejected
/// if another writer changed it in between. A stale writer therefore never
/// overdraws inventory, completes a donation twice or skips a request
/// status.
pub struct JsonlLedger {
    dir: PathBuf,
    replica: RwLock<Replica>,
    clock: Arc<dyn Clock>,
}

/// In-memory state plus how much of the log it reflects
#[derive(Default)]
struct Replica {
    state: LedgerState,
    /// Bytes of the log already applied
    offset: u64,
    /// Highest sequence seen in the log, including records that were skipped
    log_sequence: u64,
}

impl JsonlLedger {
    /// Open (or create) a ledger in `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_clock(dir, Arc::new(SystemClock))
    }

    pub fn open_with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut replica = Replica {
            state: LedgerState::load_snapshot(&dir.join(SNAPSHOT_FILE))?,
            ..Replica::default()
        };
        let base = replica.state.sequence();

        let log_path = dir.join(LOG_FILE);
        let mut replayed = 0;
        if log_path.exists() {
            let file = File::open(&log_path)?;
            file.lock_shared()?;
            let tail = catch_up(&file, &mut replica);
            file.unlock()?;
            replayed = tail?.replayed;
        }

        tracing::info!(
            "Opened ledger at {:?} (snapshot sequence {}, {} records replayed)",
            dir,
            base,
            replayed
        );

        Ok(Self {
            dir,
            replica: RwLock::new(replica),
            clock,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Fold the log into a fresh snapshot and archive it
    ///
    /// The snapshot is fsynced before the log is renamed to
    /// `ledger.wal.processed`, so a crash in between only leaves records the
    /// next open skips by sequence number. Returns the snapshot sequence.
    ///
    /// Other processes must not hold this ledger open while it compacts.
    pub fn compact(&self) -> Result<u64> {
        let mut replica = self.write();
        let log_path = self.log_path();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;
        file.lock_exclusive()?;
        let result = self.compact_locked(&file, &mut replica);
        file.unlock()?;
        result
    }

    fn compact_locked(&self, file: &File, replica: &mut Replica) -> Result<u64> {
        catch_up(file, replica)?;
        replica.state.save_snapshot(&self.snapshot_path())?;

        let log_path = self.log_path();
        let processed_path = log_path.with_extension("wal.processed");
        std::fs::rename(&log_path, &processed_path)?;
        replica.offset = 0;
        tracing::info!(
            "Compacted ledger at sequence {}, archived log to {:?}",
            replica.state.sequence(),
            processed_path
        );

        Ok(replica.state.sequence())
    }

    /// Catch up with records other writers appended, then check and append
    fn commit_locked(
        &self,
        file: &File,
        replica: &mut Replica,
        entry: LedgerEntry,
    ) -> LedgerResult<Receipt> {
        let tail = catch_up(file, replica)?;
        replica.state.check(&entry)?;

        let record = LedgerRecord {
            receipt: Receipt {
                id: Uuid::new_v4(),
                sequence: replica
                    .state
                    .next_sequence()
                    .max(replica.log_sequence + 1),
                committed_at: self.clock.now(),
            },
            entry,
        };
        write_line(file, &record, tail.torn)?;
        replica.state.replay(&record)?;
        replica.log_sequence = record.receipt.sequence;
        replica.offset = file.metadata()?.len();
        Ok(record.receipt)
    }

    /// State including every record appended so far, by any writer
    fn refreshed(&self) -> LedgerResult<RwLockWriteGuard<'_, Replica>> {
        let mut replica = self.write();
        let file = match File::open(self.log_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(replica),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let tail = catch_up(&file, &mut replica);
        file.unlock()?;
        tail?;
        Ok(replica)
    }

    #[cfg(test)]
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Replica> {
        self.replica.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Replica> {
        self.replica.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ledger for JsonlLedger {
    fn commit(&self, entry: LedgerEntry) -> LedgerResult<Receipt> {
        let mut replica = self.write();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.log_path())?;
        file.lock_exclusive()?;
        let result = self.commit_locked(&file, &mut replica, entry);
        file.unlock()?;

        let receipt = result?;
        tracing::debug!("Appended ledger record at sequence {}", receipt.sequence);
        Ok(receipt)
    }

    fn query_donor(&self, identity: &Identity) -> LedgerResult<Option<Donor>> {
        Ok(self.refreshed()?.state.donor(identity))
    }

    fn query_donors(&self) -> LedgerResult<Vec<Donor>> {
        Ok(self.refreshed()?.state.donors())
    }

    fn query_scheduled_donations(&self, donor: &Identity) -> LedgerResult<Vec<ScheduledDonation>> {
        Ok(self.refreshed()?.state.scheduled_donations(donor))
    }

    fn query_inventory(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
    ) -> LedgerResult<Option<InventoryRecord>> {
        Ok(self.refreshed()?.state.inventory(hospital, blood_group))
    }

    fn query_hospital_inventory(&self, hospital: &HospitalRef) -> LedgerResult<Vec<InventoryRecord>> {
        Ok(self.refreshed()?.state.hospital_inventory(hospital))
    }

    fn query_request(&self, id: RequestId) -> LedgerResult<Option<BloodRequest>> {
        Ok(self.refreshed()?.state.request(id))
    }

    fn query_requests(&self, filter: &RequestFilter) -> LedgerResult<Vec<BloodRequest>> {
        Ok(self.refreshed()?.state.requests(filter))
    }
}

/// What a catch-up found at the end of the log
struct LogTail {
    /// Records applied by this catch-up
    replayed: usize,
    /// The log ends in a partial line that the next append must terminate
    torn: bool,
}

/// Apply complete lines past the replica's offset; caller holds a file lock
fn catch_up(file: &File, replica: &mut Replica) -> LedgerResult<LogTail> {
    let len = file.metadata()?.len();
    if len < replica.offset {
        tracing::warn!("Ledger log shrank below applied offset, rereading from start");
        replica.offset = 0;
    }

    let mut reader = file;
    reader.seek(SeekFrom::Start(replica.offset))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    // Only whole lines are consumed; a partial tail is read again next time
    let complete = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |newline| newline + 1);
    let mut tail = LogTail {
        replayed: 0,
        torn: complete < bytes.len(),
    };

    for line in String::from_utf8_lossy(&bytes[..complete]).lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<LedgerRecord>(line) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping unreadable ledger line: {}", e);
                continue;
            }
        };
        replica.log_sequence = replica.log_sequence.max(record.receipt.sequence);
        if record.receipt.sequence <= replica.state.sequence() {
            continue;
        }
        match replica.state.replay(&record) {
            Ok(()) => {
                tail.replayed += 1;
                tracing::debug!("Applied ledger record {}", record.receipt.sequence);
            }
            Err(e) => tracing::warn!(
                "Skipping ledger record {}: {}",
                record.receipt.sequence,
                e
            ),
        }
    }

    replica.offset += complete as u64;
    Ok(tail)
}

/// Append one record as a JSON line and sync it
fn write_line(file: &File, record: &LedgerRecord, torn: bool) -> LedgerResult<()> {
    let line = serde_json::to_string(record)?;
    let mut writer = std::io::BufWriter::new(file);
    if torn {
        tracing::warn!("Terminating partial line at end of ledger log");
        writer.write_all(b"\n")?;
    }
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    drop(writer);
    file.sync_data()?;
    Ok(())
}

/// Read all records from a ledger log
///
/// Lines that fail to parse are logged and skipped.
pub fn read_records(path: &Path) -> Result<Vec<LedgerRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<LedgerRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse ledger record at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} records from ledger log", records.len());
    Ok(records)
}

/// Remove archived `*.processed` logs from a ledger directory
pub fn cleanup_processed_logs(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "processed") {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed log: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed ledger logs", count);
    }
    Ok(count)
}
