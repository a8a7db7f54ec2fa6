//! Inventory ledger: per-hospital, per-blood-group unit counts.
//!
//! Records are created lazily by the first adjustment. Units never go below
//! zero; an adjustment that would do so is rejected and leaves the record
//! untouched. Every commit names the count it was computed from, so a
//! writer working from a stale count is refused by the ledger.

use crate::events::{DomainEvent, EventBus};
use crate::ledger::Ledger;
use crate::locks::{retry_rejected, KeyedLocks};
use crate::policy::Clock;
use crate::types::{BloodGroup, HospitalRef, InventoryRecord};
use crate::{Error, Result};
use std::sync::Arc;

type RecordKey = (HospitalRef, BloodGroup);

pub struct InventoryLedger {
    ledger: Arc<dyn Ledger>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<RecordKey>,
}

impl InventoryLedger {
    pub fn new(ledger: Arc<dyn Ledger>, events: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            events,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Current units, 0 if the record doesn't exist yet
    pub fn get_units(&self, hospital: &HospitalRef, blood_group: BloodGroup) -> Result<u32> {
        Ok(self
            .ledger
            .query_inventory(hospital, blood_group)?
            .map_or(0, |record| record.units))
    }

    pub fn hospital_inventory(&self, hospital: &HospitalRef) -> Result<Vec<InventoryRecord>> {
        Ok(self.ledger.query_hospital_inventory(hospital)?)
    }

    /// Add (positive) or remove (negative) units
    pub fn adjust_units(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        delta: i64,
    ) -> Result<InventoryRecord> {
        self.with_record_lock(hospital, blood_group, || {
            let record = retry_rejected(|| self.apply_delta(hospital, blood_group, delta))?;
            self.publish(&record);
            Ok(record)
        })
    }

    /// Administrative override of the unit count
    pub fn set_units(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        absolute: i64,
    ) -> Result<InventoryRecord> {
        let units =
            u32::try_from(absolute).map_err(|_| Error::InvalidQuantity { quantity: absolute })?;

        self.with_record_lock(hospital, blood_group, || {
            let record = retry_rejected(|| {
                let previous = self.get_units(hospital, blood_group)?;
                self.commit_units(hospital, blood_group, previous, units)
            })?;
            tracing::info!(
                "Set {} inventory at {} to {} units",
                blood_group,
                hospital,
                units
            );
            self.publish(&record);
            Ok(record)
        })
    }

    /// Hold the lock for one (hospital, blood group) record
    pub(crate) fn with_record_lock<R>(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        f: impl FnOnce() -> R,
    ) -> R {
        self.locks.with_lock(&(hospital.clone(), blood_group), f)
    }

    /// Check and commit a delta; caller holds the record lock and publishes
    pub(crate) fn apply_delta(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        delta: i64,
    ) -> Result<InventoryRecord> {
        if delta == 0 {
            return Err(Error::InvalidQuantity { quantity: 0 });
        }

        let available = self.get_units(hospital, blood_group)?;
        let target = i64::from(available) + delta;
        if target < 0 {
            tracing::warn!(
                "Rejected adjustment of {} {} units at {} ({} available)",
                delta,
                blood_group,
                hospital,
                available
            );
            return Err(Error::InsufficientInventory {
                hospital: hospital.clone(),
                blood_group,
                available,
                requested: delta.unsigned_abs(),
            });
        }
        let units = u32::try_from(target).map_err(|_| Error::InvalidQuantity { quantity: delta })?;

        let record = self.commit_units(hospital, blood_group, available, units)?;
        tracing::info!(
            "Adjusted {} inventory at {} by {} to {} units",
            blood_group,
            hospital,
            delta,
            units
        );
        Ok(record)
    }

    pub(crate) fn publish(&self, record: &InventoryRecord) {
        self.events.publish(DomainEvent::InventoryAdjusted {
            hospital: record.hospital.clone(),
            blood_group: record.blood_group,
            units: record.units,
        });
    }

    fn commit_units(
        &self,
        hospital: &HospitalRef,
        blood_group: BloodGroup,
        previous: u32,
        units: u32,
    ) -> Result<InventoryRecord> {
        let record = InventoryRecord {
            hospital: hospital.clone(),
            blood_group,
            units,
            last_updated: self.clock.now(),
        };
        self.ledger.commit_inventory_adjustment(&record, previous)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::RecordingObserver;
    use crate::ledger::CommitKind;
    use crate::memory::InMemoryLedger;
    use crate::policy::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        inventory: InventoryLedger,
        ledger: Arc<InMemoryLedger>,
        clock: Arc<FixedClock>,
        observer: Arc<RecordingObserver>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.clone()));
        let events = Arc::new(EventBus::new());
        let observer = Arc::new(RecordingObserver::new());
        events.subscribe(observer.clone());
        Fixture {
            inventory: InventoryLedger::new(ledger.clone(), events, clock.clone()),
            ledger,
            clock,
            observer,
        }
    }

    fn city() -> HospitalRef {
        HospitalRef::from("city-general")
    }

    #[test]
    fn test_missing_record_reads_zero() {
        let f = fixture();
        assert_eq!(f.inventory.get_units(&city(), BloodGroup::OPositive).unwrap(), 0);
        assert!(f.inventory.hospital_inventory(&city()).unwrap().is_empty());
    }

    #[test]
    fn test_first_adjustment_creates_record() {
        let f = fixture();
        let record = f
            .inventory
            .adjust_units(&city(), BloodGroup::APositive, 10)
            .unwrap();
        assert_eq!(record.units, 10);
        assert_eq!(record.last_updated, f.clock.now());
        assert_eq!(f.inventory.hospital_inventory(&city()).unwrap(), vec![record]);
    }

    #[test]
    fn test_adjustment_below_zero_rejected_unchanged() {
        let f = fixture();
        f.inventory.adjust_units(&city(), BloodGroup::BPositive, 5).unwrap();
        f.observer.take();

        let err = f
            .inventory
            .adjust_units(&city(), BloodGroup::BPositive, -6)
            .unwrap_err();
        match err {
            Error::InsufficientInventory {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 5);
                assert_eq!(requested, 6);
            }
            other => panic!("Expected InsufficientInventory, got {:?}", other),
        }
        assert_eq!(f.inventory.get_units(&city(), BloodGroup::BPositive).unwrap(), 5);
        assert!(f.observer.events().is_empty());
    }

    #[test]
    fn test_units_never_negative_over_sequence() {
        let f = fixture();
        let deltas = [3, -1, -5, 4, -6, -6, 2, -2, 10, -11];
        let mut expected: i64 = 0;
        for delta in deltas {
            let result = f.inventory.adjust_units(&city(), BloodGroup::ONegative, delta);
            if expected + delta >= 0 {
                expected += delta;
                assert!(result.is_ok());
            } else {
                assert_eq!(result.unwrap_err().kind(), ErrorKind::InsufficientInventory);
            }
            let units = f.inventory.get_units(&city(), BloodGroup::ONegative).unwrap();
            assert_eq!(i64::from(units), expected);
        }
    }

    #[test]
    fn test_set_units_overrides_and_validates() {
        let f = fixture();
        f.inventory.adjust_units(&city(), BloodGroup::OPositive, 2).unwrap();
        f.clock.advance(Duration::hours(1));

        let record = f.inventory.set_units(&city(), BloodGroup::OPositive, 5).unwrap();
        assert_eq!(record.units, 5);
        assert_eq!(record.last_updated, f.clock.now());

        let err = f
            .inventory
            .set_units(&city(), BloodGroup::OPositive, -1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
        assert_eq!(f.inventory.get_units(&city(), BloodGroup::OPositive).unwrap(), 5);
    }

    #[test]
    fn test_zero_delta_rejected() {
        let f = fixture();
        let err = f
            .inventory
            .adjust_units(&city(), BloodGroup::OPositive, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);

        // Setting an absolute zero is a valid override
        f.inventory.adjust_units(&city(), BloodGroup::OPositive, 4).unwrap();
        let record = f.inventory.set_units(&city(), BloodGroup::OPositive, 0).unwrap();
        assert_eq!(record.units, 0);
    }

    #[test]
    fn test_ledger_failure_leaves_units_and_emits_nothing() {
        let f = fixture();
        f.inventory.adjust_units(&city(), BloodGroup::OPositive, 4).unwrap();
        f.observer.take();

        f.ledger.fail_next(CommitKind::InventoryAdjustment);
        let err = f
            .inventory
            .adjust_units(&city(), BloodGroup::OPositive, -1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LedgerFailure);
        assert_eq!(f.inventory.get_units(&city(), BloodGroup::OPositive).unwrap(), 4);
        assert!(f.observer.events().is_empty());
    }
}
