//! Coordinator wiring the components over one ledger.
//!
//! Callers (CLI, API, UI bindings) issue intents here. Each intent is
//! validated against state read from the ledger, committed, and announced
//! to observers.

use crate::events::{EventBus, EventObserver};
use crate::inventory::InventoryLedger;
use crate::ledger::Ledger;
use crate::policy::{Clock, Policy, SystemClock};
use crate::registry::{DonorRegistry, DonorStatus};
use crate::requests::RequestLifecycle;
use crate::scheduling::SchedulingEngine;
use crate::types::{
    BloodGroup, BloodRequest, DonationHistoryEntry, Donor, HospitalRef, Identity,
    InventoryRecord, RequestFilter, RequestId, ScheduledDonation, Timestamp, Urgency,
};
use crate::Result;
use std::sync::Arc;

/// Entry point for every blood-donation intent
pub struct BloodBank {
    registry: Arc<DonorRegistry>,
    scheduling: SchedulingEngine,
    inventory: Arc<InventoryLedger>,
    requests: RequestLifecycle,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    policy: Policy,
}

impl BloodBank {
    /// Coordinator on the wall clock with default policy
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self::with_clock(ledger, Arc::new(SystemClock), Policy::default())
    }

    pub fn with_clock(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>, policy: Policy) -> Self {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(DonorRegistry::new(
            Arc::clone(&ledger),
            Arc::clone(&events),
            policy.clone(),
        ));
        let inventory = Arc::new(InventoryLedger::new(
            Arc::clone(&ledger),
            Arc::clone(&events),
            Arc::clone(&clock),
        ));
        let scheduling = SchedulingEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&events),
            Arc::clone(&clock),
            policy.clone(),
            Arc::clone(&registry),
            Arc::clone(&inventory),
        );
        let requests = RequestLifecycle::new(
            ledger,
            Arc::clone(&events),
            Arc::clone(&clock),
            policy.fulfillment,
            Arc::clone(&inventory),
        );

        Self {
            registry,
            scheduling,
            inventory,
            requests,
            events,
            clock,
            policy,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.events.subscribe(observer);
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // Donors

    pub fn register_donor(&self, identity: Identity, blood_group: BloodGroup) -> Result<Donor> {
        self.registry.register_donor(identity, blood_group)
    }

    pub fn get_donor(&self, identity: &Identity) -> Result<Donor> {
        self.registry.get_donor(identity)
    }

    pub fn donors(&self) -> Result<Vec<Donor>> {
        self.registry.donors()
    }

    pub fn award_points(&self, identity: &Identity, amount: u64) -> Result<Donor> {
        self.registry.award_points(identity, amount)
    }

    pub fn donor_status(&self, identity: &Identity) -> Result<DonorStatus> {
        self.registry.donor_status(identity)
    }

    // Scheduling

    pub fn schedule_donation(
        &self,
        donor: &Identity,
        hospital: HospitalRef,
        notes: &str,
        requested_time: Timestamp,
    ) -> Result<ScheduledDonation> {
        self.scheduling
            .schedule_donation(donor, hospital, notes, requested_time)
    }

    pub fn complete_scheduled_donation(
        &self,
        donor: &Identity,
        scheduled_time: Timestamp,
    ) -> Result<ScheduledDonation> {
        self.scheduling
            .complete_scheduled_donation(donor, scheduled_time)
    }

    pub fn scheduled_donations(&self, donor: &Identity) -> Result<Vec<ScheduledDonation>> {
        self.scheduling.scheduled_donations(donor)
    }

    pub fn donation_history(&self, donor: &Identity) -> Result<Vec<DonationHistoryEntry>> {
        self.scheduling.donation_history(donor)
    }

    // Inventory

    pub fn get_units(&self, hospital: &HospitalRef, blood_group: BloodGroup) -> Result<u32> {
        self.inventory.get_units(hospital, blood_group)
    }

    pub fn adjust_units(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        delta: i64,
    ) -> Result<InventoryRecord> {
        self.inventory.adjust_units(hospital, blood_group, delta)
    }

    pub fn set_units(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        absolute: i64,
    ) -> Result<InventoryRecord> {
        self.inventory.set_units(hospital, blood_group, absolute)
    }

    pub fn hospital_inventory(&self, hospital: &HospitalRef) -> Result<Vec<InventoryRecord>> {
        self.inventory.hospital_inventory(hospital)
    }

    // Requests

    pub fn create_request(
        &self,
        recipient: Identity,
        hospital: HospitalRef,
        blood_group: BloodGroup,
        units: i64,
        urgency: Urgency,
    ) -> Result<BloodRequest> {
        self.requests
            .create_request(recipient, hospital, blood_group, units, urgency)
    }

    pub fn approve_request(&self, id: RequestId) -> Result<BloodRequest> {
        self.requests.approve_request(id)
    }

    pub fn fulfill_request(&self, id: RequestId) -> Result<BloodRequest> {
        self.requests.fulfill_request(id)
    }

    pub fn reject_request(&self, id: RequestId, reason: &str) -> Result<BloodRequest> {
        self.requests.reject_request(id, reason)
    }

    pub fn get_request(&self, id: RequestId) -> Result<BloodRequest> {
        self.requests.get_request(id)
    }

    pub fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<BloodRequest>> {
        self.requests.list_requests(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::memory::InMemoryLedger;
    use crate::policy::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_components_share_one_ledger_and_bus() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.clone()));
        let bank = BloodBank::with_clock(ledger.clone(), clock.clone(), Policy::default());
        let observer = Arc::new(RecordingObserver::new());
        bank.subscribe(observer.clone());

        let donor = Identity::from("d1");
        bank.register_donor(donor.clone(), BloodGroup::AbNegative).unwrap();
        let at = bank.now() + Duration::days(1);
        bank.schedule_donation(&donor, HospitalRef::from("h1"), "", at)
            .unwrap();
        bank.complete_scheduled_donation(&donor, at).unwrap();

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.donors[0].reward_points, 10);
        assert_eq!(snapshot.inventory[0].units, 1);
        assert_eq!(observer.events().len(), 5);
        assert_eq!(bank.policy().points_per_donation, 10);
    }

    #[test]
    fn test_default_coordinator_uses_wall_clock() {
        let bank = BloodBank::new(Arc::new(InMemoryLedger::new()));
        let before = Utc::now();
        assert!(bank.now() >= before);
        assert!(bank.donors().unwrap().is_empty());
    }
}
