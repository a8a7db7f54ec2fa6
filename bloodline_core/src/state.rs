//! Applied ledger state and snapshot persistence.
//!
//! [`LedgerState`] is the aggregate view every ledger implementation keeps:
//! entries are checked against it, applied to it, and queries read from it.
//! Snapshots are written with file locking and an atomic rename so a crash
//! never leaves a half-written snapshot behind.

use crate::ledger::{LedgerEntry, LedgerError, LedgerRecord, LedgerResult, Receipt};
use crate::types::{
    BloodGroup, BloodRequest, Donor, HospitalRef, Identity, InventoryRecord, RequestFilter,
    RequestId, ScheduledDonation, Timestamp,
};
use crate::{Error, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Aggregate state built from committed entries
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    sequence: u64,
    donors: HashMap<Identity, Donor>,
    scheduled: HashMap<Identity, BTreeMap<Timestamp, ScheduledDonation>>,
    inventory: HashMap<(HospitalRef, BloodGroup), InventoryRecord>,
    requests: HashMap<RequestId, BloodRequest>,
}

/// Serialized form of [`LedgerState`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub sequence: u64,
    pub donors: Vec<Donor>,
    pub scheduled: Vec<ScheduledDonation>,
    pub inventory: Vec<InventoryRecord>,
    pub requests: Vec<BloodRequest>,
}

impl LedgerState {
    /// Sequence number of the last committed entry
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Verify an entry is consistent with the current state
    pub fn check(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        match entry {
            LedgerEntry::DonorRegistered { donor } => {
                if self.donors.contains_key(&donor.address) {
                    return Err(LedgerError::Rejected(format!(
                        "donor {} already exists",
                        donor.address
                    )));
                }
            }
            LedgerEntry::RewardPointsUpdated {
                donor,
                previous_points,
                ..
            } => {
                self.require_points(donor, *previous_points)?;
            }
            LedgerEntry::DonationScheduled {
                donation,
                last_donation_time,
            } => {
                let current = self.require_donor(&donation.donor)?.last_donation_time;
                if current != *last_donation_time {
                    return Err(LedgerError::Rejected(format!(
                        "stale last donation time for {}: expected {:?}, found {:?}",
                        donation.donor, last_donation_time, current
                    )));
                }
                if self.find_scheduled(&donation.donor, donation.scheduled_for).is_some() {
                    return Err(LedgerError::Rejected(format!(
                        "donation for {} at {} already exists",
                        donation.donor, donation.scheduled_for
                    )));
                }
            }
            LedgerEntry::DonationCompleted {
                donor,
                donation,
                previous_points,
            } => {
                self.require_points(&donor.address, *previous_points)?;
                match self.find_scheduled(&donation.donor, donation.scheduled_for) {
                    None => {
                        return Err(LedgerError::Rejected(format!(
                            "no donation for {} at {}",
                            donation.donor, donation.scheduled_for
                        )))
                    }
                    Some(existing) if existing.completed => {
                        return Err(LedgerError::Rejected(format!(
                            "donation for {} at {} is already completed",
                            donation.donor, donation.scheduled_for
                        )))
                    }
                    Some(_) => {}
                }
            }
            LedgerEntry::InventoryAdjusted {
                record,
                previous_units,
            } => {
                let current = self
                    .inventory
                    .get(&(record.hospital.clone(), record.blood_group))
                    .map_or(0, |existing| existing.units);
                if current != *previous_units {
                    return Err(LedgerError::Rejected(format!(
                        "stale {} inventory at {}: expected {} units, found {}",
                        record.blood_group, record.hospital, previous_units, current
                    )));
                }
            }
            LedgerEntry::RequestTransitioned { request, from } => {
                let current = self.requests.get(&request.id).map(|r| r.status);
                if current != *from {
                    return Err(LedgerError::Rejected(format!(
                        "stale transition for request {}: expected {:?}, found {:?}",
                        request.id, from, current
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check and apply an entry
    pub fn apply(&mut self, entry: &LedgerEntry) -> LedgerResult<()> {
        self.check(entry)?;
        match entry {
            LedgerEntry::DonorRegistered { donor } => {
                self.donors.insert(donor.address.clone(), donor.clone());
            }
            LedgerEntry::RewardPointsUpdated {
                donor,
                reward_points,
                ..
            } => {
                if let Some(existing) = self.donors.get_mut(donor) {
                    existing.reward_points = *reward_points;
                }
            }
            LedgerEntry::DonationScheduled { donation, .. } => {
                self.insert_scheduled(donation.clone());
            }
            LedgerEntry::DonationCompleted { donor, donation, .. } => {
                self.donors.insert(donor.address.clone(), donor.clone());
                self.insert_scheduled(donation.clone());
            }
            LedgerEntry::InventoryAdjusted { record, .. } => {
                self.inventory.insert(
                    (record.hospital.clone(), record.blood_group),
                    record.clone(),
                );
            }
            LedgerEntry::RequestTransitioned { request, .. } => {
                self.requests.insert(request.id, request.clone());
            }
        }
        Ok(())
    }

    /// Apply a fresh entry and stamp it with the next receipt
    pub fn record(&mut self, entry: LedgerEntry, now: Timestamp) -> LedgerResult<LedgerRecord> {
        self.apply(&entry)?;
        self.sequence += 1;
        Ok(LedgerRecord {
            receipt: Receipt {
                id: Uuid::new_v4(),
                sequence: self.sequence,
                committed_at: now,
            },
            entry,
        })
    }

    /// Sequence number the next committed entry receives
    pub fn next_sequence(&self) -> u64 {
        self.sequence + 1
    }

    /// Re-apply a previously persisted record
    ///
    /// Sequences must strictly increase; anything else means the log was
    /// edited or interleaved by a writer that skipped the file lock.
    pub fn replay(&mut self, record: &LedgerRecord) -> LedgerResult<()> {
        if record.receipt.sequence <= self.sequence {
            return Err(LedgerError::Corrupt(format!(
                "record sequence {} does not follow {}",
                record.receipt.sequence, self.sequence
            )));
        }
        self.apply(&record.entry)?;
        self.sequence = self.sequence.max(record.receipt.sequence);
        Ok(())
    }

    fn require_donor(&self, identity: &Identity) -> LedgerResult<&Donor> {
        self.donors
            .get(identity)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown donor {}", identity)))
    }

    fn require_points(&self, identity: &Identity, expected: u64) -> LedgerResult<()> {
        let current = self.require_donor(identity)?.reward_points;
        if current != expected {
            return Err(LedgerError::Rejected(format!(
                "stale reward points for {}: expected {}, found {}",
                identity, expected, current
            )));
        }
        Ok(())
    }

    fn find_scheduled(&self, donor: &Identity, at: Timestamp) -> Option<&ScheduledDonation> {
        self.scheduled.get(donor).and_then(|by_time| by_time.get(&at))
    }

    fn insert_scheduled(&mut self, donation: ScheduledDonation) {
        self.scheduled
            .entry(donation.donor.clone())
            .or_default()
            .insert(donation.scheduled_for, donation);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn donor(&self, identity: &Identity) -> Option<Donor> {
        self.donors.get(identity).cloned()
    }

    pub fn donors(&self) -> Vec<Donor> {
        let mut donors: Vec<Donor> = self.donors.values().cloned().collect();
        donors.sort_by(|a, b| a.address.cmp(&b.address));
        donors
    }

    pub fn scheduled_donations(&self, donor: &Identity) -> Vec<ScheduledDonation> {
        self.scheduled
            .get(donor)
            .map(|by_time| by_time.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn inventory(&self, hospital: &HospitalRef, blood_group: BloodGroup) -> Option<InventoryRecord> {
        self.inventory
            .get(&(hospital.clone(), blood_group))
            .cloned()
    }

    pub fn hospital_inventory(&self, hospital: &HospitalRef) -> Vec<InventoryRecord> {
        let mut records: Vec<InventoryRecord> = self
            .inventory
            .values()
            .filter(|record| record.hospital == *hospital)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.blood_group);
        records
    }

    pub fn request(&self, id: RequestId) -> Option<BloodRequest> {
        self.requests.get(&id).cloned()
    }

    pub fn requests(&self, filter: &RequestFilter) -> Vec<BloodRequest> {
        let mut requests: Vec<BloodRequest> = self
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        requests
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    pub fn to_snapshot(&self) -> LedgerSnapshot {
        let mut scheduled: Vec<ScheduledDonation> = self
            .scheduled
            .values()
            .flat_map(|by_time| by_time.values().cloned())
            .collect();
        scheduled.sort_by(|a, b| {
            a.donor
                .cmp(&b.donor)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
        });

        let mut inventory: Vec<InventoryRecord> = self.inventory.values().cloned().collect();
        inventory.sort_by(|a, b| {
            a.hospital
                .cmp(&b.hospital)
                .then(a.blood_group.cmp(&b.blood_group))
        });

        LedgerSnapshot {
            sequence: self.sequence,
            donors: self.donors(),
            scheduled,
            inventory,
            requests: self.requests(&RequestFilter::all()),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut state = LedgerState {
            sequence: snapshot.sequence,
            ..Default::default()
        };
        for donor in snapshot.donors {
            state.donors.insert(donor.address.clone(), donor);
        }
        for donation in snapshot.scheduled {
            state.insert_scheduled(donation);
        }
        for record in snapshot.inventory {
            state
                .inventory
                .insert((record.hospital.clone(), record.blood_group), record);
        }
        for request in snapshot.requests {
            state.requests.insert(request.id, request);
        }
        state
    }

    /// Load a snapshot with shared locking
    ///
    /// Returns empty state if the file doesn't exist. A snapshot that exists
    /// but cannot be parsed is an error: silently starting empty would drop
    /// committed history.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No snapshot found at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let snapshot: LedgerSnapshot = serde_json::from_str(&contents).map_err(|e| {
            Error::State(format!("Failed to parse snapshot {:?}: {}", path, e))
        })?;

        tracing::debug!(
            "Loaded snapshot from {:?} at sequence {}",
            path,
            snapshot.sequence
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Save a snapshot atomically
    ///
    /// Writes to a temp file in the same directory, syncs it, then renames
    /// it over the original.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::State(format!("Snapshot path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(&self.to_snapshot())?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved snapshot to {:?} at sequence {}", path, self.sequence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RequestStatus, Urgency};
    use chrono::{TimeZone, Utc};

    fn at(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, day, 8, 0, 0).unwrap()
    }

    fn registered(state: &mut LedgerState, id: &str) -> Donor {
        let donor = Donor::new(Identity::from(id), BloodGroup::OPositive);
        state
            .record(
                LedgerEntry::DonorRegistered {
                    donor: donor.clone(),
                },
                at(1),
            )
            .unwrap();
        donor
    }

    fn pending_request(hospital: &str) -> BloodRequest {
        BloodRequest {
            id: RequestId::new(),
            recipient: Identity::from("r1"),
            hospital: HospitalRef::from(hospital),
            blood_group: BloodGroup::OPositive,
            units: 2,
            urgency: Urgency::Urgent,
            status: RequestStatus::Pending,
            created_at: at(2),
            updated_at: at(2),
            rejection_reason: None,
        }
    }

    #[test]
    fn test_record_assigns_increasing_sequence() {
        let mut state = LedgerState::default();
        registered(&mut state, "d1");
        let donor = Donor::new(Identity::from("d2"), BloodGroup::ANegative);
        let record = state
            .record(LedgerEntry::DonorRegistered { donor }, at(1))
            .unwrap();
        assert_eq!(record.receipt.sequence, 2);
        assert_eq!(state.sequence(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut state = LedgerState::default();
        let donor = registered(&mut state, "d1");
        let result = state.record(LedgerEntry::DonorRegistered { donor }, at(1));
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(state.sequence(), 1);
    }

    #[test]
    fn test_stale_request_transition_rejected() {
        let mut state = LedgerState::default();
        let request = pending_request("h1");
        state
            .record(
                LedgerEntry::RequestTransitioned {
                    request: request.clone(),
                    from: None,
                },
                at(2),
            )
            .unwrap();

        let mut approved = request.clone();
        approved.status = RequestStatus::Approved;
        let stale = LedgerEntry::RequestTransitioned {
            request: approved,
            from: Some(RequestStatus::Approved),
        };
        assert!(state.check(&stale).is_err());
    }

    fn inventory_entry(units: u32, previous_units: u32) -> LedgerEntry {
        LedgerEntry::InventoryAdjusted {
            record: InventoryRecord {
                hospital: HospitalRef::from("h1"),
                blood_group: BloodGroup::OPositive,
                units,
                last_updated: at(3),
            },
            previous_units,
        }
    }

    #[test]
    fn test_stale_inventory_count_rejected() {
        let mut state = LedgerState::default();
        state.record(inventory_entry(2, 0), at(3)).unwrap();

        // Two writers both computed their deduction from 2 units
        state.record(inventory_entry(0, 2), at(3)).unwrap();
        let result = state.record(inventory_entry(0, 2), at(3));
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(state.sequence(), 2);
    }

    #[test]
    fn test_completion_rejected_once_completed() {
        let mut state = LedgerState::default();
        let donor = registered(&mut state, "d1");
        let donation = ScheduledDonation::new(
            donor.address.clone(),
            HospitalRef::from("h1"),
            at(20),
            "",
        );
        state
            .record(
                LedgerEntry::DonationScheduled {
                    donation: donation.clone(),
                    last_donation_time: None,
                },
                at(2),
            )
            .unwrap();

        let completed = ScheduledDonation {
            completed: true,
            points_earned: 10,
            ..donation
        };
        let entry = LedgerEntry::DonationCompleted {
            donor: Donor {
                reward_points: 10,
                last_donation_time: Some(at(20)),
                ..donor.clone()
            },
            donation: completed,
            previous_points: 0,
        };
        state.record(entry.clone(), at(20)).unwrap();

        assert!(matches!(state.check(&entry), Err(LedgerError::Rejected(_))));
        assert_eq!(state.donor(&donor.address).unwrap().reward_points, 10);
    }

    #[test]
    fn test_stale_reward_points_rejected() {
        let mut state = LedgerState::default();
        registered(&mut state, "d1");
        let award = |previous_points, reward_points| LedgerEntry::RewardPointsUpdated {
            donor: Identity::from("d1"),
            previous_points,
            reward_points,
        };

        state.record(award(0, 5), at(4)).unwrap();
        assert!(matches!(
            state.record(award(0, 5), at(4)),
            Err(LedgerError::Rejected(_))
        ));
        state.record(award(5, 10), at(4)).unwrap();
        assert_eq!(state.donor(&Identity::from("d1")).unwrap().reward_points, 10);
    }

    #[test]
    fn test_hospital_inventory_sorted_by_group() {
        let mut state = LedgerState::default();
        for group in [BloodGroup::ONegative, BloodGroup::APositive, BloodGroup::AbPositive] {
            state
                .record(
                    LedgerEntry::InventoryAdjusted {
                        record: InventoryRecord {
                            hospital: HospitalRef::from("h1"),
                            blood_group: group,
                            units: 4,
                            last_updated: at(3),
                        },
                        previous_units: 0,
                    },
                    at(3),
                )
                .unwrap();
        }
        let groups: Vec<BloodGroup> = state
            .hospital_inventory(&HospitalRef::from("h1"))
            .iter()
            .map(|r| r.blood_group)
            .collect();
        assert_eq!(
            groups,
            vec![BloodGroup::APositive, BloodGroup::AbPositive, BloodGroup::ONegative]
        );
        assert!(state.hospital_inventory(&HospitalRef::from("h2")).is_empty());
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("snapshot.json");

        let mut state = LedgerState::default();
        registered(&mut state, "d1");
        state
            .record(
                LedgerEntry::DonationScheduled {
                    donation: ScheduledDonation::new(
                        Identity::from("d1"),
                        HospitalRef::from("h1"),
                        at(20),
                        "morning",
                    ),
                    last_donation_time: None,
                },
                at(2),
            )
            .unwrap();
        let request = pending_request("h1");
        state
            .record(
                LedgerEntry::RequestTransitioned {
                    request: request.clone(),
                    from: None,
                },
                at(2),
            )
            .unwrap();

        state.save_snapshot(&path).unwrap();
        let loaded = LedgerState::load_snapshot(&path).unwrap();

        assert_eq!(loaded.sequence(), 3);
        assert_eq!(loaded.donor(&Identity::from("d1")), state.donor(&Identity::from("d1")));
        assert_eq!(loaded.scheduled_donations(&Identity::from("d1")).len(), 1);
        assert_eq!(loaded.request(request.id), Some(request));
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = LedgerState::load_snapshot(&temp_dir.path().join("none.json")).unwrap();
        assert_eq!(state.sequence(), 0);
        assert!(state.donors().is_empty());
    }

    #[test]
    fn test_corrupted_snapshot_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("snapshot.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        match LedgerState::load_snapshot(&path) {
            Err(Error::State(msg)) => assert!(msg.contains("snapshot")),
            other => panic!("Expected State error, got {:?}", other.map(|s| s.sequence())),
        }
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("snapshot.json");

        LedgerState::default().save_snapshot(&path).unwrap();

        assert!(path.exists());
        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "snapshot.json")
            .collect();
        assert!(extras.is_empty(), "Unexpected files: {:?}", extras);
    }

    #[test]
    fn test_replay_rejects_out_of_order_sequence() {
        let mut state = LedgerState::default();
        registered(&mut state, "d1");

        let record = LedgerRecord {
            receipt: Receipt {
                id: Uuid::new_v4(),
                sequence: 1,
                committed_at: at(4),
            },
            entry: LedgerEntry::DonorRegistered {
                donor: Donor::new(Identity::from("d2"), BloodGroup::BPositive),
            },
        };
        assert!(matches!(state.replay(&record), Err(LedgerError::Corrupt(_))));
        assert!(state.donor(&Identity::from("d2")).is_none());
    }
}
