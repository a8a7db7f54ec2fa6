//! End-to-end scenarios through the `BloodBank` coordinator.
//!
//! These tests drive every component over a shared ledger with a fixed
//! clock, checking:
//! - Donor eligibility and reward accrual
//! - Hospital inventory and request fulfillment
//! - Events emitted per successful commit
//! - Durability across a JSONL ledger reopen

use bloodline_core::events::RecordingObserver;
use bloodline_core::ledger::CommitKind;
use bloodline_core::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
}

struct Harness {
    bank: BloodBank,
    ledger: Arc<InMemoryLedger>,
    clock: Arc<FixedClock>,
    events: Arc<RecordingObserver>,
}

fn harness_with(policy: Policy) -> Harness {
    let clock = Arc::new(FixedClock::new(t0()));
    let ledger = Arc::new(InMemoryLedger::with_clock(clock.clone()));
    let bank = BloodBank::with_clock(ledger.clone(), clock.clone(), policy);
    let events = Arc::new(RecordingObserver::new());
    bank.subscribe(events.clone());
    Harness {
        bank,
        ledger,
        clock,
        events,
    }
}

fn harness() -> Harness {
    harness_with(Policy::default())
}

fn hospital() -> HospitalRef {
    HospitalRef::from("st-marys")
}

#[test]
fn test_donor_eligibility_scenario() {
    let h = harness();
    let d = Identity::from("donor-d");

    h.bank.register_donor(d.clone(), BloodGroup::OPositive).unwrap();

    let first = t0() + Duration::days(10);
    h.bank
        .schedule_donation(&d, hospital(), "first visit", first)
        .unwrap();
    h.bank.complete_scheduled_donation(&d, first).unwrap();

    let donor = h.bank.get_donor(&d).unwrap();
    assert_eq!(donor.last_donation_time, Some(first));
    assert_eq!(donor.reward_points, 10);

    let err = h
        .bank
        .schedule_donation(&d, hospital(), "", t0() + Duration::days(50))
        .unwrap_err();
    match err {
        Error::EligibilityWindowViolation { eligible_from, .. } => {
            assert_eq!(eligible_from, first + Duration::days(90));
        }
        other => panic!("Expected EligibilityWindowViolation, got {:?}", other),
    }

    h.bank
        .schedule_donation(&d, hospital(), "", t0() + Duration::days(101))
        .unwrap();
}

#[test]
fn test_insufficient_then_fulfilled_scenario() {
    let h = harness();
    let r = Identity::from("recipient-r");

    assert_eq!(h.bank.get_units(&hospital(), BloodGroup::OPositive).unwrap(), 0);

    let request = h
        .bank
        .create_request(r, hospital(), BloodGroup::OPositive, 2, Urgency::Urgent)
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);

    let approved = h.bank.approve_request(request.id).unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);

    let err = h.bank.fulfill_request(request.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientInventory);
    assert_eq!(
        h.bank.get_request(request.id).unwrap().status,
        RequestStatus::Approved
    );
    assert_eq!(h.bank.get_units(&hospital(), BloodGroup::OPositive).unwrap(), 0);

    h.bank.set_units(&hospital(), BloodGroup::OPositive, 5).unwrap();
    let fulfilled = h.bank.fulfill_request(request.id).unwrap();
    assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
    assert_eq!(h.bank.get_units(&hospital(), BloodGroup::OPositive).unwrap(), 3);
}

#[test]
fn test_points_equal_ten_per_completed_donation() {
    let h = harness();
    let d = Identity::from("regular");
    h.bank.register_donor(d.clone(), BloodGroup::BNegative).unwrap();

    for n in 1..=6u64 {
        let at = h.clock.now() + Duration::days(1);
        h.bank.schedule_donation(&d, hospital(), "", at).unwrap();
        h.bank.complete_scheduled_donation(&d, at).unwrap();
        assert_eq!(h.bank.get_donor(&d).unwrap().reward_points, 10 * n);
        h.clock.set(at + Duration::days(90));
    }

    let status = h.bank.donor_status(&d).unwrap();
    assert_eq!(status.tier, RewardTier::Gold);
    assert_eq!(status.pending_donations, 0);
}

#[test]
fn test_completion_is_idempotent_once() {
    let h = harness();
    let d = Identity::from("donor");
    h.bank.register_donor(d.clone(), BloodGroup::APositive).unwrap();

    let at = t0() + Duration::days(3);
    h.bank.schedule_donation(&d, hospital(), "", at).unwrap();
    h.bank.complete_scheduled_donation(&d, at).unwrap();

    let err = h.bank.complete_scheduled_donation(&d, at).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyCompleted);
    assert_eq!(h.bank.get_donor(&d).unwrap().reward_points, 10);
    assert_eq!(h.bank.get_units(&hospital(), BloodGroup::APositive).unwrap(), 1);
}

#[test]
fn test_direct_fulfillment_depends_on_policy() {
    let strict = harness();
    strict.bank.set_units(&hospital(), BloodGroup::ONegative, 4).unwrap();
    let request = strict
        .bank
        .create_request(
            Identity::from("r"),
            hospital(),
            BloodGroup::ONegative,
            1,
            Urgency::Emergency,
        )
        .unwrap();
    let err = strict.bank.fulfill_request(request.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert_eq!(strict.bank.get_units(&hospital(), BloodGroup::ONegative).unwrap(), 4);

    let lenient = harness_with(Policy {
        fulfillment: FulfillmentPolicy::AllowDirect,
        ..Policy::default()
    });
    lenient.bank.set_units(&hospital(), BloodGroup::ONegative, 4).unwrap();
    let request = lenient
        .bank
        .create_request(
            Identity::from("r"),
            hospital(),
            BloodGroup::ONegative,
            1,
            Urgency::Emergency,
        )
        .unwrap();
    let fulfilled = lenient.bank.fulfill_request(request.id).unwrap();
    assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
    assert_eq!(lenient.bank.get_units(&hospital(), BloodGroup::ONegative).unwrap(), 3);
}

#[test]
fn test_no_transition_escapes_terminal_states() {
    let h = harness();
    h.bank.set_units(&hospital(), BloodGroup::AbPositive, 10).unwrap();
    let r = Identity::from("r");

    let rejected = h
        .bank
        .create_request(r.clone(), hospital(), BloodGroup::AbPositive, 1, Urgency::Normal)
        .unwrap();
    h.bank.reject_request(rejected.id, "no matching donor").unwrap();

    let fulfilled = h
        .bank
        .create_request(r, hospital(), BloodGroup::AbPositive, 1, Urgency::Normal)
        .unwrap();
    h.bank.approve_request(fulfilled.id).unwrap();
    h.bank.fulfill_request(fulfilled.id).unwrap();

    for id in [rejected.id, fulfilled.id] {
        assert!(h.bank.approve_request(id).is_err());
        assert!(h.bank.fulfill_request(id).is_err());
        assert!(h.bank.reject_request(id, "late").is_err());
    }
    assert_eq!(h.bank.get_units(&hospital(), BloodGroup::AbPositive).unwrap(), 9);
}

#[test]
fn test_failed_status_commit_restores_inventory() {
    let h = harness();
    h.bank.set_units(&hospital(), BloodGroup::OPositive, 5).unwrap();
    let request = h
        .bank
        .create_request(
            Identity::from("r"),
            hospital(),
            BloodGroup::OPositive,
            2,
            Urgency::Normal,
        )
        .unwrap();
    h.bank.approve_request(request.id).unwrap();
    h.events.take();

    h.ledger.fail_next(CommitKind::RequestTransition);
    let err = h.bank.fulfill_request(request.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerFailure);

    assert_eq!(h.bank.get_units(&hospital(), BloodGroup::OPositive).unwrap(), 5);
    assert_eq!(
        h.bank.get_request(request.id).unwrap().status,
        RequestStatus::Approved
    );
    assert!(h.events.events().is_empty());
}

#[test]
fn test_events_emitted_once_per_commit() {
    let h = harness();
    let d = Identity::from("donor");
    h.bank.register_donor(d.clone(), BloodGroup::OPositive).unwrap();
    let at = t0() + Duration::days(1);
    h.bank.schedule_donation(&d, hospital(), "", at).unwrap();
    h.events.take();

    h.bank.complete_scheduled_donation(&d, at).unwrap();
    let events = h.events.take();
    assert_eq!(
        events,
        vec![
            DomainEvent::InventoryAdjusted {
                hospital: hospital(),
                blood_group: BloodGroup::OPositive,
                units: 1,
            },
            DomainEvent::DonationRecorded {
                donor: d.clone(),
                hospital: hospital(),
                blood_group: BloodGroup::OPositive,
                scheduled_for: at,
            },
            DomainEvent::RewardPointsUpdated {
                donor: d.clone(),
                reward_points: 10,
            },
        ]
    );

    // Rejected intents emit nothing
    assert!(h.bank.complete_scheduled_donation(&d, at).is_err());
    assert!(h.bank.register_donor(d, BloodGroup::OPositive).is_err());
    assert!(h.events.events().is_empty());
}

#[test]
fn test_history_reconciles_across_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(t0()));
    let d = Identity::from("donor");
    let first = t0() + Duration::days(2);
    let second = t0() + Duration::days(120);

    {
        let ledger = Arc::new(JsonlLedger::open_with_clock(temp_dir.path(), clock.clone()).unwrap());
        let bank = BloodBank::with_clock(ledger, clock.clone(), Policy::default());
        bank.register_donor(d.clone(), BloodGroup::ANegative).unwrap();
        bank.schedule_donation(&d, hospital(), "morning", first).unwrap();
        bank.complete_scheduled_donation(&d, first).unwrap();
        bank.schedule_donation(&d, hospital(), "follow-up", second).unwrap();
    }

    let ledger = Arc::new(JsonlLedger::open_with_clock(temp_dir.path(), clock.clone()).unwrap());
    let bank = BloodBank::with_clock(ledger, clock, Policy::default());

    let history = bank.donation_history(&d).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].scheduled_for, second);
    assert_eq!(history[0].status, DonationStatus::Scheduled);
    assert_eq!(history[0].points_earned, 0);
    assert_eq!(history[1].status, DonationStatus::Completed);
    assert_eq!(history[1].points_earned, 10);

    assert_eq!(bank.get_donor(&d).unwrap().reward_points, 10);
    assert_eq!(bank.get_units(&hospital(), BloodGroup::ANegative).unwrap(), 1);
}
