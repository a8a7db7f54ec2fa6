//! Request lifecycle: recipients ask, hospitals decide.
//!
//! `Pending → Approved → Fulfilled` and `Pending → Rejected`; see
//! [`RequestStatus::can_transition_to`]. Fulfillment deducts the requested
//! units from the hospital's inventory and is all-or-nothing: if either the
//! deduction or the status commit fails, neither is visible afterwards.

use crate::events::{DomainEvent, EventBus};
use crate::inventory::InventoryLedger;
use crate::ledger::Ledger;
use crate::locks::{retry_rejected, KeyedLocks};
use crate::policy::{Clock, FulfillmentPolicy};
use crate::types::{
    BloodGroup, BloodRequest, HospitalRef, Identity, InventoryRecord, RequestFilter, RequestId,
    RequestStatus, Urgency,
};
use crate::{Error, Result};
use std::sync::Arc;

pub struct RequestLifecycle {
    ledger: Arc<dyn Ledger>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    fulfillment: FulfillmentPolicy,
    inventory: Arc<InventoryLedger>,
    locks: KeyedLocks<RequestId>,
}

impl RequestLifecycle {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        fulfillment: FulfillmentPolicy,
        inventory: Arc<InventoryLedger>,
    ) -> Self {
        Self {
            ledger,
            events,
            clock,
            fulfillment,
            inventory,
            locks: KeyedLocks::new(),
        }
    }

    /// Open a new request in `Pending`
    pub fn create_request(
        &self,
        recipient: Identity,
        hospital: HospitalRef,
        blood_group: BloodGroup,
        units: i64,
        urgency: Urgency,
    ) -> Result<BloodRequest> {
        let units = u32::try_from(units)
            .ok()
            .filter(|units| *units > 0)
            .ok_or(Error::InvalidQuantity { quantity: units })?;

        let now = self.clock.now();
        let request = BloodRequest {
            id: RequestId::new(),
            recipient,
            hospital,
            blood_group,
            units,
            urgency,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            rejection_reason: None,
        };

        self.ledger.commit_request_transition(&request, None)?;
        tracing::info!(
            "Created request {} for {} units of {} at {} ({})",
            request.id,
            units,
            blood_group,
            request.hospital,
            urgency
        );
        self.publish(&request);
        Ok(request)
    }

    pub fn approve_request(&self, id: RequestId) -> Result<BloodRequest> {
        self.locks.with_lock(&id, || {
            let approved = retry_rejected(|| {
                let request = self.get_request(id)?;
                let approved = self.advance(&request, RequestStatus::Approved)?;
                self.ledger
                    .commit_request_transition(&approved, Some(request.status))?;
                Ok(approved)
            })?;
            tracing::info!("Approved request {}", id);
            self.publish(&approved);
            Ok(approved)
        })
    }

    /// Deduct inventory and close the request as fulfilled
    pub fn fulfill_request(&self, id: RequestId) -> Result<BloodRequest> {
        self.locks.with_lock(&id, || {
            let (fulfilled, inventory) = retry_rejected(|| self.settle(id))?;

            tracing::info!(
                "Fulfilled request {} ({} units of {} from {})",
                id,
                fulfilled.units,
                fulfilled.blood_group,
                fulfilled.hospital
            );
            self.inventory.publish(&inventory);
            self.publish(&fulfilled);
            Ok(fulfilled)
        })
    }

    /// Close a pending request with a reason
    pub fn reject_request(&self, id: RequestId, reason: &str) -> Result<BloodRequest> {
        let reason = reason.trim();
        self.locks.with_lock(&id, || {
            let rejected = retry_rejected(|| {
                let request = self.get_request(id)?;
                let mut rejected = self.advance(&request, RequestStatus::Rejected)?;
                if reason.is_empty() {
                    return Err(Error::MissingReason { request_id: id });
                }
                rejected.rejection_reason = Some(reason.to_string());

                self.ledger
                    .commit_request_transition(&rejected, Some(request.status))?;
                Ok(rejected)
            })?;
            tracing::info!("Rejected request {}: {}", id, reason);
            self.publish(&rejected);
            Ok(rejected)
        })
    }

    pub fn get_request(&self, id: RequestId) -> Result<BloodRequest> {
        self.ledger
            .query_request(id)?
            .ok_or(Error::RequestNotFound { request_id: id })
    }

    pub fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<BloodRequest>> {
        Ok(self.ledger.query_requests(filter)?)
    }

    /// Deduct inventory and commit the status change, or neither
    ///
    /// Caller holds the request lock; the record lock is taken here.
    fn settle(&self, id: RequestId) -> Result<(BloodRequest, InventoryRecord)> {
        let request = self.get_request(id)?;
        let fulfilled = self.advance(&request, RequestStatus::Fulfilled)?;
        let units = i64::from(request.units);

        let deducted = self
            .inventory
            .with_record_lock(&request.hospital, request.blood_group, || {
                let deducted =
                    self.inventory
                        .apply_delta(&request.hospital, request.blood_group, -units)?;

                if let Err(e) = self
                    .ledger
                    .commit_request_transition(&fulfilled, Some(request.status))
                {
                    tracing::warn!(
                        "Status commit failed for request {}, restoring {} units",
                        id,
                        units
                    );
                    if let Err(undo) = retry_rejected(|| {
                        self.inventory
                            .apply_delta(&request.hospital, request.blood_group, units)
                    }) {
                        tracing::error!(
                            "Failed to restore inventory for request {}: {}",
                            id,
                            undo
                        );
                    }
                    return Err(Error::from(e));
                }
                Ok(deducted)
            })?;
        Ok((fulfilled, deducted))
    }

    /// Copy of `request` moved to `to`, if the transition table allows it
    fn advance(&self, request: &BloodRequest, to: RequestStatus) -> Result<BloodRequest> {
        if !request.status.can_transition_to(to, self.fulfillment) {
            tracing::warn!(
                "Rejected transition of request {} from {} to {}",
                request.id,
                request.status,
                to
            );
            return Err(Error::InvalidTransition {
                request_id: request.id,
                from: request.status,
                to,
            });
        }
        Ok(BloodRequest {
            status: to,
            updated_at: self.clock.now(),
            ..request.clone()
        })
    }

    fn publish(&self, request: &BloodRequest) {
        self.events.publish(DomainEvent::RequestStatusChanged {
            request_id: request.id,
            status: request.status,
        });
    }
}
