//! In-process ledger.
//!
//! Holds [`LedgerState`] behind a `RwLock`: commits take the write lock, so
//! readers always see a whole entry or none of it. Commits of a given kind
//! can be made to fail once, which lets callers exercise their
//! failure and rollback paths.

use crate::ledger::{CommitKind, Ledger, LedgerEntry, LedgerError, LedgerResult, Receipt};
use crate::policy::{Clock, SystemClock};
use crate::state::{LedgerSnapshot, LedgerState};
use crate::types::{
    BloodGroup, BloodRequest, Donor, HospitalRef, Identity, InventoryRecord, RequestFilter,
    RequestId, ScheduledDonation,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ledger kept entirely in memory
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    clock: Arc<dyn Clock>,
    fail_next: Mutex<HashSet<CommitKind>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp receipts with the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            clock,
            fail_next: Mutex::new(HashSet::new()),
        }
    }

    /// Make the next commit of `kind` fail with [`LedgerError::Unavailable`]
    pub fn fail_next(&self, kind: CommitKind) {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read().to_snapshot()
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_injected_failure(&self, kind: CommitKind) -> bool {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
    }
}

impl Ledger for InMemoryLedger {
    fn commit(&self, entry: LedgerEntry) -> LedgerResult<Receipt> {
        let kind = entry.kind();
        if self.take_injected_failure(kind) {
            tracing::warn!("Injected ledger failure for {:?}", kind);
            return Err(LedgerError::Unavailable(format!(
                "injected failure for {:?}",
                kind
            )));
        }

        let record = self.write().record(entry, self.clock.now())?;
        tracing::debug!(
            "Committed {:?} at sequence {}",
            kind,
            record.receipt.sequence
        );
        Ok(record.receipt)
    }

    fn query_donor(&self, identity: &Identity) -> LedgerResult<Option<Donor>> {
        Ok(self.read().donor(identity))
    }

    fn query_donors(&self) -> LedgerResult<Vec<Donor>> {
        Ok(self.read().donors())
    }

    fn query_scheduled_donations(&self, donor: &Identity) -> LedgerResult<Vec<ScheduledDonation>> {
        Ok(self.read().scheduled_donations(donor))
    }

    fn query_inventory(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
    ) -> LedgerResult<Option<InventoryRecord>> {
        Ok(self.read().inventory(hospital, blood_group))
    }

    fn query_hospital_inventory(&self, hospital: &HospitalRef) -> LedgerResult<Vec<InventoryRecord>> {
        Ok(self.read().hospital_inventory(hospital))
    }

    fn query_request(&self, id: RequestId) -> LedgerResult<Option<BloodRequest>> {
        Ok(self.read().request(id))
    }

    fn query_requests(&self, filter: &RequestFilter) -> LedgerResult<Vec<BloodRequest>> {
        Ok(self.read().requests(filter))
    }
}
