//! Core domain types for the blood-donation coordination model.
//!
//! This module defines the fundamental types used throughout the system:
//! - Actor references (donors, recipients, hospitals)
//! - Blood groups and request urgency
//! - Donors, scheduled donations and their history
//! - Hospital inventory records
//! - Blood requests and their status

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Point in time used for every schedule, completion and audit field
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// Actor References
// ============================================================================

/// Opaque reference to a donor or recipient
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Reference to a hospital holding an inventory
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HospitalRef(String);

impl HospitalRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HospitalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HospitalRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for a blood request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

// ============================================================================
// Blood Groups and Urgency
// ============================================================================

/// ABO/Rh blood group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BloodGroup {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

/// Label lookup built once for parsing user input
static BLOOD_GROUP_LABELS: Lazy<HashMap<&'static str, BloodGroup>> = Lazy::new(|| {
    BloodGroup::ALL
        .iter()
        .map(|group| (group.label(), *group))
        .collect()
});

impl BloodGroup {
    /// Every blood group, in dashboard display order
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::APositive,
        BloodGroup::ANegative,
        BloodGroup::BPositive,
        BloodGroup::BNegative,
        BloodGroup::AbPositive,
        BloodGroup::AbNegative,
        BloodGroup::OPositive,
        BloodGroup::ONegative,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BloodGroup::APositive => "A+",
            BloodGroup::ANegative => "A-",
            BloodGroup::BPositive => "B+",
            BloodGroup::BNegative => "B-",
            BloodGroup::AbPositive => "AB+",
            BloodGroup::AbNegative => "AB-",
            BloodGroup::OPositive => "O+",
            BloodGroup::ONegative => "O-",
        }
    }
}

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BloodGroup {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        BLOOD_GROUP_LABELS
            .get(normalized.as_str())
            .copied()
            .ok_or_else(|| Error::UnknownBloodGroup(s.to_string()))
    }
}

/// How urgently a recipient needs the requested blood
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    Urgent,
    Emergency,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Urgency::Normal => "normal",
            Urgency::Urgent => "urgent",
            Urgency::Emergency => "emergency",
        };
        f.write_str(label)
    }
}

impl FromStr for Urgency {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Urgency::Normal),
            "urgent" => Ok(Urgency::Urgent),
            "emergency" => Ok(Urgency::Emergency),
            other => Err(Error::UnknownUrgency(other.to_string())),
        }
    }
}

// ============================================================================
// Donors and Scheduled Donations
// ============================================================================

/// A registered donor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donor {
    pub address: Identity,
    pub is_registered: bool,
    pub blood_group: BloodGroup,
    pub reward_points: u64,
    /// `None` until the first donation is completed
    pub last_donation_time: Option<Timestamp>,
}

impl Donor {
    /// A freshly registered donor with no points and no donation history
    pub fn new(address: Identity, blood_group: BloodGroup) -> Self {
        Self {
            address,
            is_registered: true,
            blood_group,
            reward_points: 0,
            last_donation_time: None,
        }
    }
}

/// A donation booked by a donor at a hospital
///
/// Identified by `(donor, scheduled_for)`. Once `completed` is set only
/// `points_earned` and `completed_at` carry new information.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDonation {
    pub donor: Identity,
    pub hospital: HospitalRef,
    pub scheduled_for: Timestamp,
    pub notes: String,
    pub completed: bool,
    #[serde(default)]
    pub points_earned: u64,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl ScheduledDonation {
    pub fn new(
        donor: Identity,
        hospital: HospitalRef,
        scheduled_for: Timestamp,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            donor,
            hospital,
            scheduled_for,
            notes: notes.into(),
            completed: false,
            points_earned: 0,
            completed_at: None,
        }
    }
}

/// Whether a history entry is still pending or already done
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Scheduled,
    Completed,
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DonationStatus::Scheduled => f.write_str("Scheduled"),
            DonationStatus::Completed => f.write_str("Completed"),
        }
    }
}

/// One row of a donor's reconciled donation history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationHistoryEntry {
    pub scheduled_for: Timestamp,
    pub hospital: HospitalRef,
    pub status: DonationStatus,
    pub points_earned: u64,
    pub notes: String,
}

impl From<&ScheduledDonation> for DonationHistoryEntry {
    fn from(donation: &ScheduledDonation) -> Self {
        let status = if donation.completed {
            DonationStatus::Completed
        } else {
            DonationStatus::Scheduled
        };
        Self {
            scheduled_for: donation.scheduled_for,
            hospital: donation.hospital.clone(),
            status,
            points_earned: donation.points_earned,
            notes: donation.notes.clone(),
        }
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// Unit count for one blood group at one hospital
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub hospital: HospitalRef,
    pub blood_group: BloodGroup,
    pub units: u32,
    pub last_updated: Timestamp,
}

// ============================================================================
// Blood Requests
// ============================================================================

/// Lifecycle status of a blood request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Fulfilled,
    Rejected,
}

impl RequestStatus {
    /// Fulfilled and Rejected requests never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Fulfilled | RequestStatus::Rejected)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Fulfilled => "FULFILLED",
            RequestStatus::Rejected => "REJECTED",
        };
        f.write_str(label)
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "fulfilled" => Ok(RequestStatus::Fulfilled),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(Error::UnknownRequestStatus(other.to_string())),
        }
    }
}

/// A recipient's request for blood from a hospital
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodRequest {
    pub id: RequestId,
    pub recipient: Identity,
    pub hospital: HospitalRef,
    pub blood_group: BloodGroup,
    pub units: u32,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub rejection_reason: Option<String>,
}

/// Selection criteria for listing blood requests
#[derive(Clone, Debug, Default)]
pub struct RequestFilter {
    pub recipient: Option<Identity>,
    pub hospital: Option<HospitalRef>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    /// Matches every request
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_recipient(recipient: Identity) -> Self {
        Self {
            recipient: Some(recipient),
            ..Default::default()
        }
    }

    pub fn for_hospital(hospital: HospitalRef) -> Self {
        Self {
            hospital: Some(hospital),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, request: &BloodRequest) -> bool {
        self.recipient
            .as_ref()
            .map_or(true, |r| *r == request.recipient)
            && self
                .hospital
                .as_ref()
                .map_or(true, |h| *h == request.hospital)
            && self.status.map_or(true, |s| s == request.status)
    }
}
