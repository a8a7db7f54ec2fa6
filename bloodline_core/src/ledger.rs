//! Ledger collaborator interface.
//!
//! The ledger is the system of record. The core validates intents against
//! what the ledger reports, then commits the resulting state change as a
//! single [`LedgerEntry`]. Each commit is atomic and authoritative; the core
//! never reorders or batches them.

use crate::types::{
    BloodGroup, BloodRequest, Donor, HospitalRef, Identity, InventoryRecord, RequestFilter,
    RequestId, RequestStatus, ScheduledDonation, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

/// Errors raised by ledger implementations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Backend could not be reached or refused service
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the entry because its expected prior state no longer
    /// holds (stale transition, stale count, duplicate)
    #[error("commit rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted data cannot be interpreted
    #[error("ledger data corrupt: {0}")]
    Corrupt(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Proof that an entry was committed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub sequence: u64,
    pub committed_at: Timestamp,
}

/// One durable state change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    DonorRegistered {
        donor: Donor,
    },
    /// `previous_points` must match the stored total
    RewardPointsUpdated {
        donor: Identity,
        previous_points: u64,
        reward_points: u64,
    },
    /// `last_donation_time` is the donor's value the eligibility check used
    DonationScheduled {
        donation: ScheduledDonation,
        last_donation_time: Option<Timestamp>,
    },
    /// Completion carries the updated donor so points and last donation
    /// time land together with the completed flag. Rejected if the donation
    /// is already completed or the donor's points moved past
    /// `previous_points`.
    DonationCompleted {
        donor: Donor,
        donation: ScheduledDonation,
        previous_points: u64,
    },
    /// `previous_units` is the count the new record was computed from, 0
    /// for a record that doesn't exist yet
    InventoryAdjusted {
        record: InventoryRecord,
        previous_units: u32,
    },
    /// `from` is `None` when the request is first created
    RequestTransitioned {
        request: BloodRequest,
        from: Option<RequestStatus>,
    },
}

/// Discriminant of a [`LedgerEntry`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitKind {
    DonorRegistration,
    RewardPoints,
    ScheduledDonation,
    Completion,
    InventoryAdjustment,
    RequestTransition,
}

impl LedgerEntry {
    pub fn kind(&self) -> CommitKind {
        match self {
            LedgerEntry::DonorRegistered { .. } => CommitKind::DonorRegistration,
            LedgerEntry::RewardPointsUpdated { .. } => CommitKind::RewardPoints,
            LedgerEntry::DonationScheduled { .. } => CommitKind::ScheduledDonation,
            LedgerEntry::DonationCompleted { .. } => CommitKind::Completion,
            LedgerEntry::InventoryAdjusted { .. } => CommitKind::InventoryAdjustment,
            LedgerEntry::RequestTransitioned { .. } => CommitKind::RequestTransition,
        }
    }
}

/// An entry together with its commit metadata, as persisted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub receipt: Receipt,
    pub entry: LedgerEntry,
}

/// System of record for donors, donations, inventory and requests
///
/// Implementors provide [`Ledger::commit`] and the query accessors; the
/// typed `commit_*` helpers build the matching entry.
pub trait Ledger: Send + Sync {
    /// Atomically commit one entry
    fn commit(&self, entry: LedgerEntry) -> LedgerResult<Receipt>;

    fn query_donor(&self, identity: &Identity) -> LedgerResult<Option<Donor>>;

    fn query_donors(&self) -> LedgerResult<Vec<Donor>>;

    /// All scheduled donations for a donor, oldest first
    fn query_scheduled_donations(&self, donor: &Identity) -> LedgerResult<Vec<ScheduledDonation>>;

    fn query_inventory(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
    ) -> LedgerResult<Option<InventoryRecord>>;

    /// All inventory records of a hospital, in blood-group order
    fn query_hospital_inventory(&self, hospital: &HospitalRef) -> LedgerResult<Vec<InventoryRecord>>;

    fn query_request(&self, id: RequestId) -> LedgerResult<Option<BloodRequest>>;

    /// Requests matching the filter, oldest first
    fn query_requests(&self, filter: &RequestFilter) -> LedgerResult<Vec<BloodRequest>>;

    fn commit_donor_registration(&self, donor: &Donor) -> LedgerResult<Receipt> {
        self.commit(LedgerEntry::DonorRegistered {
            donor: donor.clone(),
        })
    }

    fn commit_reward_points(
        &self,
        donor: &Identity,
        previous_points: u64,
        reward_points: u64,
    ) -> LedgerResult<Receipt> {
        self.commit(LedgerEntry::RewardPointsUpdated {
            donor: donor.clone(),
            previous_points,
            reward_points,
        })
    }

    fn commit_scheduled_donation(
        &self,
        donation: &ScheduledDonation,
        last_donation_time: Option<Timestamp>,
    ) -> LedgerResult<Receipt> {
        self.commit(LedgerEntry::DonationScheduled {
            donation: donation.clone(),
            last_donation_time,
        })
    }

    fn commit_completion(
        &self,
        donor: &Donor,
        donation: &ScheduledDonation,
        previous_points: u64,
    ) -> LedgerResult<Receipt> {
        self.commit(LedgerEntry::DonationCompleted {
            donor: donor.clone(),
            donation: donation.clone(),
            previous_points,
        })
    }

    fn commit_inventory_adjustment(
        &self,
        record: &InventoryRecord,
        previous_units: u32,
    ) -> LedgerResult<Receipt> {
        self.commit(LedgerEntry::InventoryAdjusted {
            record: record.clone(),
            previous_units,
        })
    }

    fn commit_request_transition(
        &self,
        request: &BloodRequest,
        from: Option<RequestStatus>,
    ) -> LedgerResult<Receipt> {
        self.commit(LedgerEntry::RequestTransitioned {
            request: request.clone(),
            from,
        })
    }
}
