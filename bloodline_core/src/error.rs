//! Error types for the bloodline_core library.

use std::io;

use crate::ledger::LedgerError;
use crate::types::{BloodGroup, HospitalRef, Identity, RequestId, RequestStatus, Timestamp};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for bloodline_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Identity has no donor record
    #[error("Donor {identity} is not registered")]
    NotRegistered { identity: Identity },

    /// Identity already has a donor record
    #[error("Donor {identity} is already registered")]
    AlreadyRegistered { identity: Identity },

    /// Requested time is not in the future
    #[error("Donation must be scheduled in the future (requested {requested_for}, now {now})")]
    InvalidSchedule {
        requested_for: Timestamp,
        now: Timestamp,
    },

    /// Requested time falls inside the minimum interval since the last donation
    #[error("Donor {donor} is not eligible until {eligible_from} (requested {requested_for})")]
    EligibilityWindowViolation {
        donor: Identity,
        requested_for: Timestamp,
        eligible_from: Timestamp,
    },

    /// Donor already has a donation at this exact time
    #[error("Donor {donor} already has a donation scheduled for {scheduled_for}")]
    DuplicateSchedule {
        donor: Identity,
        scheduled_for: Timestamp,
    },

    /// No scheduled donation at this time
    #[error("No donation scheduled for donor {donor} at {scheduled_for}")]
    ScheduleNotFound {
        donor: Identity,
        scheduled_for: Timestamp,
    },

    /// Scheduled donation was already completed
    #[error("Donation for donor {donor} at {scheduled_for} is already completed")]
    AlreadyCompleted {
        donor: Identity,
        scheduled_for: Timestamp,
    },

    /// Adjustment would take units below zero
    #[error("Insufficient {blood_group} inventory at {hospital}: {available} available, {requested} requested")]
    InsufficientInventory {
        hospital: HospitalRef,
        blood_group: BloodGroup,
        available: u32,
        requested: u64,
    },

    /// Quantity is zero, negative or out of range
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    /// Request status change not allowed from the current status
    #[error("Request {request_id} cannot move from {from} to {to}")]
    InvalidTransition {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Rejection without a reason
    #[error("Rejecting request {request_id} requires a reason")]
    MissingReason { request_id: RequestId },

    /// Unknown request id
    #[error("Request {request_id} not found")]
    RequestNotFound { request_id: RequestId },

    /// Ledger collaborator failed to commit or answer a query
    #[error("Ledger failure: {0}")]
    LedgerFailure(#[from] LedgerError),

    /// Unrecognised blood group label
    #[error("Unknown blood group: {0}")]
    UnknownBloodGroup(String),

    /// Unrecognised urgency label
    #[error("Unknown urgency: {0}")]
    UnknownUrgency(String),

    /// Unrecognised request status label
    #[error("Unknown request status: {0}")]
    UnknownRequestStatus(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot/state management error
    #[error("State error: {0}")]
    State(String),
}

/// Payload-free classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotRegistered,
    AlreadyRegistered,
    InvalidSchedule,
    EligibilityWindowViolation,
    DuplicateSchedule,
    ScheduleNotFound,
    AlreadyCompleted,
    InsufficientInventory,
    InvalidQuantity,
    InvalidTransition,
    MissingReason,
    RequestNotFound,
    LedgerFailure,
    InvalidInput,
    System,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotRegistered { .. } => ErrorKind::NotRegistered,
            Error::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            Error::InvalidSchedule { .. } => ErrorKind::InvalidSchedule,
            Error::EligibilityWindowViolation { .. } => ErrorKind::EligibilityWindowViolation,
            Error::DuplicateSchedule { .. } => ErrorKind::DuplicateSchedule,
            Error::ScheduleNotFound { .. } => ErrorKind::ScheduleNotFound,
            Error::AlreadyCompleted { .. } => ErrorKind::AlreadyCompleted,
            Error::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
            Error::InvalidQuantity { .. } => ErrorKind::InvalidQuantity,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::MissingReason { .. } => ErrorKind::MissingReason,
            Error::RequestNotFound { .. } => ErrorKind::RequestNotFound,
            Error::LedgerFailure(_) => ErrorKind::LedgerFailure,
            Error::UnknownBloodGroup(_)
            | Error::UnknownUrgency(_)
            | Error::UnknownRequestStatus(_)
            | Error::Config(_) => ErrorKind::InvalidInput,
            Error::Io(_) | Error::Json(_) | Error::Csv(_) | Error::Toml(_) | Error::State(_) => {
                ErrorKind::System
            }
        }
    }
}
