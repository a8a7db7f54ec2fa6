//! Domain events and observers.
//!
//! Components publish an event after each successful ledger commit, exactly
//! once per commit. Delivery is synchronous and in commit order; anything
//! stronger (persistence, retries) belongs to the observer.

use crate::types::{BloodGroup, HospitalRef, Identity, RequestId, RequestStatus, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// State change visible to observers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    DonorRegistered {
        donor: Identity,
        blood_group: BloodGroup,
    },
    DonationScheduled {
        donor: Identity,
        hospital: HospitalRef,
        scheduled_for: Timestamp,
    },
    DonationRecorded {
        donor: Identity,
        hospital: HospitalRef,
        blood_group: BloodGroup,
        scheduled_for: Timestamp,
    },
    RewardPointsUpdated {
        donor: Identity,
        reward_points: u64,
    },
    RequestStatusChanged {
        request_id: RequestId,
        status: RequestStatus,
    },
    InventoryAdjusted {
        hospital: HospitalRef,
        blood_group: BloodGroup,
        units: u32,
    },
}

/// Receives domain events
pub trait EventObserver: Send + Sync {
    fn notify(&self, event: &DomainEvent);
}

/// Synchronous fan-out to registered observers
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn publish(&self, event: DomainEvent) {
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer.notify(&event);
        }
    }
}

/// Forwards every event to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingObserver;

impl EventObserver for LoggingObserver {
    fn notify(&self, event: &DomainEvent) {
        tracing::info!(?event, "domain event");
    }
}

/// Keeps every event it sees
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain collected events
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventObserver for RecordingObserver {
    fn notify(&self, event: &DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
