//! Scheduling engine: booking and completing donations.
//!
//! A scheduled donation moves `Scheduled → Completed` and never back.
//! Scheduling checks, in order:
//! 1. The donor is registered
//! 2. The requested time is strictly in the future
//! 3. The minimum interval since the last completed donation has passed
//! 4. No other donation is booked for the donor at the same instant
//!
//! Completion records the donation against the donor (last donation time,
//! reward points) and credits the hospital inventory in one step.

use crate::events::{DomainEvent, EventBus};
use crate::inventory::InventoryLedger;
use crate::ledger::Ledger;
use crate::policy::{Clock, Policy};
use crate::locks::retry_rejected;
use crate::registry::DonorRegistry;
use crate::types::{
    DonationHistoryEntry, Donor, HospitalRef, Identity, InventoryRecord, ScheduledDonation, Timestamp,
};
use crate::{Error, Result};
use std::sync::Arc;

pub struct SchedulingEngine {
    ledger: Arc<dyn Ledger>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    registry: Arc<DonorRegistry>,
    inventory: Arc<InventoryLedger>,
}

impl SchedulingEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        policy: Policy,
        registry: Arc<DonorRegistry>,
        inventory: Arc<InventoryLedger>,
    ) -> Self {
        Self {
            ledger,
            events,
            clock,
            policy,
            registry,
            inventory,
        }
    }

    /// Book a donation for `requested_time`
    pub fn schedule_donation(
        &self,
        donor: &Identity,
        hospital: HospitalRef,
        notes: &str,
        requested_time: Timestamp,
    ) -> Result<ScheduledDonation> {
        self.registry.with_donor_lock(donor, || {
            let donation = retry_rejected(|| {
                self.book(donor, hospital.clone(), notes, requested_time)
            })?;
            tracing::info!(
                "Scheduled donation for {} at {} on {}",
                donor,
                donation.hospital,
                requested_time
            );

            self.events.publish(DomainEvent::DonationScheduled {
                donor: donor.clone(),
                hospital: donation.hospital.clone(),
                scheduled_for: requested_time,
            });
            Ok(donation)
        })
    }

    /// Mark the donation booked at `scheduled_time` as done
    ///
    /// Sets the donor's last donation time to the scheduled time (never
    /// moving it backwards), awards the per-donation points and credits the
    /// hospital's inventory for the donor's blood group. Completing twice
    /// fails with [`Error::AlreadyCompleted`] and awards nothing.
    pub fn complete_scheduled_donation(
        &self,
        donor: &Identity,
        scheduled_time: Timestamp,
    ) -> Result<ScheduledDonation> {
        self.registry.with_donor_lock(donor, || {
            let (record, completed, credited) =
                retry_rejected(|| self.record_completion(donor, scheduled_time))?;

            tracing::info!(
                "Completed donation for {} at {} (points now {})",
                donor,
                completed.hospital,
                record.reward_points
            );

            if let Some(inventory) = &credited {
                self.inventory.publish(inventory);
            }
            self.events.publish(DomainEvent::DonationRecorded {
                donor: donor.clone(),
                hospital: completed.hospital.clone(),
                blood_group: record.blood_group,
                scheduled_for: scheduled_time,
            });
            self.events.publish(DomainEvent::RewardPointsUpdated {
                donor: donor.clone(),
                reward_points: record.reward_points,
            });
            Ok(completed)
        })
    }

    /// All bookings for a donor, oldest first
    pub fn scheduled_donations(&self, donor: &Identity) -> Result<Vec<ScheduledDonation>> {
        self.registry.get_donor(donor)?;
        Ok(self.ledger.query_scheduled_donations(donor)?)
    }

    /// Reconciled history, most recent first
    pub fn donation_history(&self, donor: &Identity) -> Result<Vec<DonationHistoryEntry>> {
        let mut history: Vec<DonationHistoryEntry> = self
            .scheduled_donations(donor)?
            .iter()
            .map(DonationHistoryEntry::from)
            .collect();
        history.sort_by(|a, b| b.scheduled_for.cmp(&a.scheduled_for));
        Ok(history)
    }

    /// Run the scheduling checks and commit; caller holds the donor lock
    fn book(
        &self,
        donor: &Identity,
        hospital: HospitalRef,
        notes: &str,
        requested_time: Timestamp,
    ) -> Result<ScheduledDonation> {
        let record = self.registry.get_donor(donor)?;

        let now = self.clock.now();
        if requested_time <= now {
            return Err(Error::InvalidSchedule {
                requested_for: requested_time,
                now,
            });
        }

        if !self
            .policy
            .check_eligibility(record.last_donation_time, requested_time)
        {
            let eligible_from = self
                .policy
                .next_eligible_at(record.last_donation_time)
                .unwrap_or(requested_time);
            tracing::warn!(
                "Donor {} not eligible for {} (eligible from {})",
                donor,
                requested_time,
                eligible_from
            );
            return Err(Error::EligibilityWindowViolation {
                donor: donor.clone(),
                requested_for: requested_time,
                eligible_from,
            });
        }

        if self.find(donor, requested_time)?.is_some() {
            return Err(Error::DuplicateSchedule {
                donor: donor.clone(),
                scheduled_for: requested_time,
            });
        }

        let donation = ScheduledDonation::new(donor.clone(), hospital, requested_time, notes);
        self.ledger
            .commit_scheduled_donation(&donation, record.last_donation_time)?;
        Ok(donation)
    }

    /// Check and commit one completion; caller holds the donor lock
    fn record_completion(
        &self,
        donor: &Identity,
        scheduled_time: Timestamp,
    ) -> Result<(Donor, ScheduledDonation, Option<InventoryRecord>)> {
        let donation = self
            .find(donor, scheduled_time)?
            .ok_or_else(|| Error::ScheduleNotFound {
                donor: donor.clone(),
                scheduled_for: scheduled_time,
            })?;
        if donation.completed {
            return Err(Error::AlreadyCompleted {
                donor: donor.clone(),
                scheduled_for: scheduled_time,
            });
        }

        let mut record = self.registry.get_donor(donor)?;
        let previous_points = record.reward_points;
        record.reward_points = self.policy.accrue(previous_points);
        record.last_donation_time = Some(
            record
                .last_donation_time
                .map_or(scheduled_time, |last| last.max(scheduled_time)),
        );

        let completed = ScheduledDonation {
            completed: true,
            points_earned: self.policy.points_per_donation,
            completed_at: Some(self.clock.now()),
            ..donation
        };

        let credited = self.commit_with_credit(&record, &completed, || {
            self.ledger
                .commit_completion(&record, &completed, previous_points)
        })?;
        Ok((record, completed, credited))
    }

    fn find(&self, donor: &Identity, at: Timestamp) -> Result<Option<ScheduledDonation>> {
        Ok(self
            .ledger
            .query_scheduled_donations(donor)?
            .into_iter()
            .find(|donation| donation.scheduled_for == at))
    }

    /// Credit inventory, then run `commit`; undo the credit if `commit` fails
    fn commit_with_credit<T, E>(
        &self,
        donor: &Donor,
        donation: &ScheduledDonation,
        commit: impl FnOnce() -> std::result::Result<T, E>,
    ) -> Result<Option<InventoryRecord>>
    where
        Error: From<E>,
    {
        let units = i64::from(self.policy.units_per_donation);
        if units == 0 {
            commit()?;
            return Ok(None);
        }

        let blood_group = donor.blood_group;
        let hospital = &donation.hospital;
        self.inventory.with_record_lock(hospital, blood_group, || {
            let credited = self.inventory.apply_delta(hospital, blood_group, units)?;
            if let Err(e) = commit() {
                tracing::warn!(
                    "Completion commit failed for {}, reverting inventory credit",
                    donor.address
                );
                if let Err(undo) =
                    retry_rejected(|| self.inventory.apply_delta(hospital, blood_group, -units))
                {
                    tracing::error!(
                        "Failed to revert {} credit at {}: {}",
                        blood_group,
                        hospital,
                        undo
                    );
                }
                return Err(Error::from(e));
            }
            Ok(Some(credited))
        })
    }
}
