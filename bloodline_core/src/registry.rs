//! Donor registry: identity, registration state and reward points.

use crate::events::{DomainEvent, EventBus};
use crate::ledger::Ledger;
use crate::locks::{retry_rejected, KeyedLocks};
use crate::policy::{Policy, RewardTier};
use crate::types::{BloodGroup, Donor, Identity, Timestamp};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// Dashboard view of a donor
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DonorStatus {
    pub donor: Donor,
    pub tier: RewardTier,
    /// `None` if the donor has never donated
    pub next_eligible_at: Option<Timestamp>,
    pub pending_donations: usize,
}

pub struct DonorRegistry {
    ledger: Arc<dyn Ledger>,
    events: Arc<EventBus>,
    policy: Policy,
    locks: KeyedLocks<Identity>,
}

impl DonorRegistry {
    pub fn new(ledger: Arc<dyn Ledger>, events: Arc<EventBus>, policy: Policy) -> Self {
        Self {
            ledger,
            events,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    /// Register an identity as a donor
    ///
    /// Fails with [`Error::AlreadyRegistered`] if a donor record exists.
    pub fn register_donor(&self, identity: Identity, blood_group: BloodGroup) -> Result<Donor> {
        self.with_donor_lock(&identity, || {
            let donor = retry_rejected(|| {
                if self.ledger.query_donor(&identity)?.is_some() {
                    tracing::warn!("Rejected duplicate registration for {}", identity);
                    return Err(Error::AlreadyRegistered {
                        identity: identity.clone(),
                    });
                }

                let donor = Donor::new(identity.clone(), blood_group);
                self.ledger.commit_donor_registration(&donor)?;
                Ok(donor)
            })?;
            tracing::info!("Registered donor {} ({})", donor.address, blood_group);

            self.events.publish(DomainEvent::DonorRegistered {
                donor: donor.address.clone(),
                blood_group,
            });
            Ok(donor)
        })
    }

    pub fn get_donor(&self, identity: &Identity) -> Result<Donor> {
        self.ledger
            .query_donor(identity)?
            .ok_or_else(|| Error::NotRegistered {
                identity: identity.clone(),
            })
    }

    pub fn donors(&self) -> Result<Vec<Donor>> {
        Ok(self.ledger.query_donors()?)
    }

    /// Add reward points to a donor
    pub fn award_points(&self, identity: &Identity, amount: u64) -> Result<Donor> {
        if amount == 0 {
            return Err(Error::InvalidQuantity { quantity: 0 });
        }

        self.with_donor_lock(identity, || {
            let updated = retry_rejected(|| {
                let donor = self.get_donor(identity)?;
                let previous = donor.reward_points;
                let updated = with_points(donor, amount);
                self.ledger
                    .commit_reward_points(identity, previous, updated.reward_points)?;
                Ok(updated)
            })?;
            tracing::info!(
                "Awarded {} points to {} (total {})",
                amount,
                identity,
                updated.reward_points
            );

            self.events.publish(DomainEvent::RewardPointsUpdated {
                donor: identity.clone(),
                reward_points: updated.reward_points,
            });
            Ok(updated)
        })
    }

    /// Reward tier, next eligible time and pending bookings for a donor
    pub fn donor_status(&self, identity: &Identity) -> Result<DonorStatus> {
        let donor = self.get_donor(identity)?;
        let pending_donations = self
            .ledger
            .query_scheduled_donations(identity)?
            .iter()
            .filter(|donation| !donation.completed)
            .count();

        Ok(DonorStatus {
            tier: self.policy.tier(donor.reward_points),
            next_eligible_at: self.policy.next_eligible_at(donor.last_donation_time),
            pending_donations,
            donor,
        })
    }

    /// Serialize every mutation touching this donor
    pub(crate) fn with_donor_lock<R>(&self, identity: &Identity, f: impl FnOnce() -> R) -> R {
        self.locks.with_lock(identity, f)
    }
}

/// Donor with `amount` more reward points
pub(crate) fn with_points(mut donor: Donor, amount: u64) -> Donor {
    donor.reward_points = donor.reward_points.saturating_add(amount);
    donor
}
