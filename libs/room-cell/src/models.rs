// libs/room-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// CORE ROOM MODELS
// ==============================================================================

/// Canonical room types. Legacy spellings from the old validation schemas are
/// accepted on input: `ICU` maps to `icu` and `ward` to `general`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    #[serde(alias = "ward")]
    General,
    Private,
    #[serde(alias = "ICU")]
    Icu,
    Emergency,
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Occupied,
    /// Explicit override: blocks new assignments regardless of occupancy.
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub room_number: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub capacity: u32,
    pub occupied_beds: u32,
    pub status: RoomStatus,
    pub patient_ids: Vec<Uuid>,
    pub admitted_date: Option<DateTime<Utc>>,
    pub discharged_date: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

fn default_capacity() -> u32 {
    1
}

/// Rooms are created empty; occupancy only moves through assign/discharge.
/// A `maintenance` status may be requested at creation, anything else is
/// derived from the (zero) occupancy.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub room_number: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub status: Option<RoomStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRoomRequest {
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(rename = "type", default)]
    pub room_type: Option<RoomType>,
    #[serde(default)]
    pub capacity: Option<u32>,
    /// `maintenance` sets the override; any other value clears it and the
    /// stored status is re-derived from the occupancy count.
    #[serde(default)]
    pub status: Option<RoomStatus>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Patient is not assigned to this room")]
    PatientNotInRoom,

    #[error("Patient is already assigned to this room")]
    PatientAlreadyAssigned,

    #[error("Room is at full capacity")]
    RoomFull,

    #[error("Room is under maintenance")]
    UnderMaintenance,

    #[error("Room number {0} already exists")]
    DuplicateRoomNumber(String),

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Room was modified concurrently, please retry")]
    ConcurrentUpdate,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::RoomNotFound | RoomError::PatientNotInRoom => {
                AppError::NotFound(err.to_string())
            }
            RoomError::PatientNotFound | RoomError::InvalidCapacity(_) => {
                AppError::ValidationError(err.to_string())
            }
            RoomError::PatientAlreadyAssigned
            | RoomError::RoomFull
            | RoomError::UnderMaintenance
            | RoomError::DuplicateRoomNumber(_)
            | RoomError::ConcurrentUpdate => AppError::Conflict(err.to_string()),
            RoomError::DatabaseError(_) => AppError::Database(err.to_string()),
        }
    }
}
