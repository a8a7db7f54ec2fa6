//! Clock and policy rules.
//!
//! Everything here is a pure function of its inputs (plus the injected clock):
//! - Minimum interval between completed donations
//! - Reward accrual and reward tiers
//! - The blood-request transition table

use crate::types::{RequestStatus, Timestamp};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Default minimum interval between donations, in days
pub const MINIMUM_INTERVAL_DAYS: i64 = 90;

/// Default reward for one completed donation
pub const POINTS_PER_DONATION: u64 = 10;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for every temporal check
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock for deterministic runs
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Reward Tiers
// ============================================================================

/// Points needed to reach each tier above Bronze
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardThresholds {
    #[serde(default = "default_silver")]
    pub silver: u64,
    #[serde(default = "default_gold")]
    pub gold: u64,
    #[serde(default = "default_platinum")]
    pub platinum: u64,
}

fn default_silver() -> u64 {
    20
}

fn default_gold() -> u64 {
    50
}

fn default_platinum() -> u64 {
    100
}

impl Default for RewardThresholds {
    fn default() -> Self {
        Self {
            silver: default_silver(),
            gold: default_gold(),
            platinum: default_platinum(),
        }
    }
}

/// Donor recognition level derived from reward points
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl RewardTier {
    pub fn for_points(points: u64, thresholds: &RewardThresholds) -> Self {
        if points >= thresholds.platinum {
            RewardTier::Platinum
        } else if points >= thresholds.gold {
            RewardTier::Gold
        } else if points >= thresholds.silver {
            RewardTier::Silver
        } else {
            RewardTier::Bronze
        }
    }
}

impl std::fmt::Display for RewardTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RewardTier::Bronze => "Bronze",
            RewardTier::Silver => "Silver",
            RewardTier::Gold => "Gold",
            RewardTier::Platinum => "Platinum",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Request Transitions
// ============================================================================

/// Which statuses a request may be fulfilled from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentPolicy {
    /// Approved → Fulfilled only
    #[default]
    RequireApproval,
    /// Also allow Pending → Fulfilled
    AllowDirect,
}

impl RequestStatus {
    /// The request transition table
    ///
    /// Pending → {Approved, Rejected}, Approved → Fulfilled, plus
    /// Pending → Fulfilled under [`FulfillmentPolicy::AllowDirect`].
    /// Nothing leaves Fulfilled or Rejected.
    pub fn can_transition_to(&self, next: RequestStatus, policy: FulfillmentPolicy) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (Pending, Approved) | (Pending, Rejected) | (Approved, Fulfilled) => true,
            (Pending, Fulfilled) => policy == FulfillmentPolicy::AllowDirect,
            _ => false,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Tunable rules shared by every component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub minimum_interval: Duration,
    pub points_per_donation: u64,
    /// Units credited to the hospital inventory per completed donation
    pub units_per_donation: u32,
    pub fulfillment: FulfillmentPolicy,
    pub reward_thresholds: RewardThresholds,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            minimum_interval: Duration::days(MINIMUM_INTERVAL_DAYS),
            points_per_donation: POINTS_PER_DONATION,
            units_per_donation: 1,
            fulfillment: FulfillmentPolicy::default(),
            reward_thresholds: RewardThresholds::default(),
        }
    }
}

impl Policy {
    /// Earliest time a donor may donate again, `None` if never donated
    pub fn next_eligible_at(&self, last_donation: Option<Timestamp>) -> Option<Timestamp> {
        last_donation.map(|last| last + self.minimum_interval)
    }

    /// Whether a donation at `requested` respects the minimum interval
    pub fn check_eligibility(
        &self,
        last_donation: Option<Timestamp>,
        requested: Timestamp,
    ) -> bool {
        match last_donation {
            None => true,
            Some(last) => requested - last >= self.minimum_interval,
        }
    }

    /// Reward total after one more completed donation
    pub fn accrue(&self, current_points: u64) -> u64 {
        current_points.saturating_add(self.points_per_donation)
    }

    pub fn tier(&self, points: u64) -> RewardTier {
        RewardTier::for_points(points, &self.reward_thresholds)
    }
}
