// libs/room-cell/src/services/occupancy.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::DocumentStore;

use crate::models::{CreateRoomRequest, Room, RoomError, RoomStatus, UpdateRoomRequest};

const ROOMS: &str = "rooms";
const PATIENTS: &str = "patients";

/// Occupancy mutations commit through a conditional write keyed on the
/// occupancy count observed at read time. Interleaved writers miss the
/// precondition and retry against fresh state, so the count can never
/// overshoot capacity.
const MAX_CAS_ATTEMPTS: u32 = 3;

pub struct OccupancyService {
    store: Arc<dyn DocumentStore>,
}

impl OccupancyService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<Room, RoomError> {
        debug!("Creating room {}", request.room_number);

        if request.capacity < 1 {
            return Err(RoomError::InvalidCapacity(
                "capacity must be at least 1".to_string(),
            ));
        }

        let room_number = request.room_number.trim().to_string();
        self.ensure_room_number_free(&room_number, None).await?;

        let maintenance = request.status == Some(RoomStatus::Maintenance);
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            room_number,
            room_type: request.room_type,
            capacity: request.capacity,
            occupied_beds: 0,
            status: derive_status(0, request.capacity, maintenance),
            patient_ids: Vec::new(),
            admitted_date: None,
            discharged_date: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let doc = to_doc(&room)?;
        let stored = self.store.create(ROOMS, doc).await.map_err(db_err)?;
        let room: Room = from_doc(stored)?;

        info!("Room {} created with {} beds", room.room_number, room.capacity);
        Ok(room)
    }

    pub async fn get_room(&self, id: Uuid) -> Result<Room, RoomError> {
        self.fetch_room(id).await
    }

    pub async fn list_rooms(&self, include_deleted: bool) -> Result<Vec<Room>, RoomError> {
        let filter = if include_deleted {
            json!({})
        } else {
            json!({ "is_deleted": false })
        };

        let docs = self.store.find(ROOMS, &filter).await.map_err(db_err)?;

        let mut rooms = docs
            .into_iter()
            .map(from_doc::<Room>)
            .collect::<Result<Vec<_>, _>>()?;
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rooms)
    }

    /// Update room metadata. The stored status is always re-derived from the
    /// occupancy count; only the maintenance override survives as caller
    /// intent. The write commits through the same conditional update as
    /// assign/discharge: a capacity shrink validated against stale occupancy
    /// must miss and re-read, never land over a bed count it did not see.
    pub async fn update_room(
        &self,
        id: Uuid,
        patch: UpdateRoomRequest,
    ) -> Result<Room, RoomError> {
        if let Some(capacity) = patch.capacity {
            if capacity < 1 {
                return Err(RoomError::InvalidCapacity(
                    "capacity must be at least 1".to_string(),
                ));
            }
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self.fetch_room(id).await?;
            let mut update = Map::new();

            if let Some(room_number) = &patch.room_number {
                let room_number = room_number.trim().to_string();
                if room_number != stored.room_number {
                    self.ensure_room_number_free(&room_number, Some(id)).await?;
                    update.insert("room_number".to_string(), json!(room_number));
                }
            }

            if let Some(room_type) = &patch.room_type {
                update.insert("type".to_string(), json!(room_type));
            }

            let capacity = match patch.capacity {
                Some(capacity) => {
                    if capacity < stored.occupied_beds {
                        return Err(RoomError::InvalidCapacity(format!(
                            "capacity {} is below current occupancy {}",
                            capacity, stored.occupied_beds
                        )));
                    }
                    update.insert("capacity".to_string(), json!(capacity));
                    capacity
                }
                None => stored.capacity,
            };

            let maintenance = match patch.status {
                Some(status) => status == RoomStatus::Maintenance,
                None => stored.status == RoomStatus::Maintenance,
            };

            if patch.capacity.is_some() || patch.status.is_some() {
                update.insert(
                    "status".to_string(),
                    json!(derive_status(stored.occupied_beds, capacity, maintenance)),
                );
            }

            update.insert("updated_at".to_string(), json!(Utc::now()));

            let expected = json!({
                "occupied_beds": stored.occupied_beds,
                "status": stored.status,
            });

            match self
                .store
                .update_where(ROOMS, id, &expected, Value::Object(update))
                .await
                .map_err(db_err)?
            {
                Some(doc) => {
                    let room: Room = from_doc(doc)?;
                    info!("Room {} updated", room.room_number);
                    return Ok(room);
                }
                None => {
                    warn!(
                        "Concurrent update on room {}, retrying attempt {}/{}",
                        id, attempt, MAX_CAS_ATTEMPTS
                    );
                }
            }
        }

        Err(RoomError::ConcurrentUpdate)
    }

    /// Soft delete: the record stays in the store but disappears from reads.
    pub async fn delete_room(&self, id: Uuid) -> Result<(), RoomError> {
        let room = self.fetch_room(id).await?;

        self.store
            .update_by_id(
                ROOMS,
                id,
                json!({ "is_deleted": true, "updated_at": Utc::now() }),
            )
            .await
            .map_err(db_err)?
            .ok_or(RoomError::RoomNotFound)?;

        info!("Room {} deleted", room.room_number);
        Ok(())
    }

    /// Assign a patient to a bed. Fails with a conflict when the room is full
    /// or under maintenance, or when the patient already occupies a bed there.
    /// Failed preconditions leave the room unchanged.
    pub async fn assign_patient(
        &self,
        room_id: Uuid,
        patient_id: Uuid,
        admitted_date: Option<DateTime<Utc>>,
    ) -> Result<Room, RoomError> {
        debug!("Assigning patient {} to room {}", patient_id, room_id);

        self.verify_patient_exists(patient_id).await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let room = self.fetch_room(room_id).await?;

            if room.status == RoomStatus::Maintenance {
                warn!("Rejected assignment to room {} under maintenance", room.room_number);
                return Err(RoomError::UnderMaintenance);
            }
            if room.occupied_beds >= room.capacity {
                warn!("Rejected assignment to full room {}", room.room_number);
                return Err(RoomError::RoomFull);
            }
            if room.patient_ids.contains(&patient_id) {
                return Err(RoomError::PatientAlreadyAssigned);
            }

            let mut patient_ids = room.patient_ids.clone();
            patient_ids.push(patient_id);
            let occupied_beds = room.occupied_beds + 1;

            let patch = json!({
                "patient_ids": patient_ids,
                "occupied_beds": occupied_beds,
                "status": derive_status(occupied_beds, room.capacity, false),
                "admitted_date": admitted_date.unwrap_or_else(Utc::now),
                "updated_at": Utc::now(),
            });
            let expected = json!({
                "occupied_beds": room.occupied_beds,
                "status": room.status,
            });

            match self
                .store
                .update_where(ROOMS, room_id, &expected, patch)
                .await
                .map_err(db_err)?
            {
                Some(doc) => {
                    let room: Room = from_doc(doc)?;
                    info!(
                        "Patient {} assigned to room {} ({}/{} beds occupied)",
                        patient_id, room.room_number, room.occupied_beds, room.capacity
                    );
                    return Ok(room);
                }
                None => {
                    warn!(
                        "Concurrent update on room {}, retrying attempt {}/{}",
                        room_id, attempt, MAX_CAS_ATTEMPTS
                    );
                }
            }
        }

        Err(RoomError::ConcurrentUpdate)
    }

    /// Discharge a patient from a room. Not idempotent: discharging a patient
    /// who is not in the room fails rather than succeeding silently.
    pub async fn discharge_patient(
        &self,
        room_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Room, RoomError> {
        debug!("Discharging patient {} from room {}", patient_id, room_id);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let room = self.fetch_room(room_id).await?;

            let position = room
                .patient_ids
                .iter()
                .position(|id| *id == patient_id)
                .ok_or(RoomError::PatientNotInRoom)?;

            let mut patient_ids = room.patient_ids.clone();
            patient_ids.remove(position);
            let occupied_beds = room.occupied_beds.saturating_sub(1);
            let maintenance = room.status == RoomStatus::Maintenance;

            let patch = json!({
                "patient_ids": patient_ids,
                "occupied_beds": occupied_beds,
                "status": derive_status(occupied_beds, room.capacity, maintenance),
                "discharged_date": Utc::now(),
                "updated_at": Utc::now(),
            });
            let expected = json!({
                "occupied_beds": room.occupied_beds,
                "status": room.status,
            });

            match self
                .store
                .update_where(ROOMS, room_id, &expected, patch)
                .await
                .map_err(db_err)?
            {
                Some(doc) => {
                    let room: Room = from_doc(doc)?;
                    info!(
                        "Patient {} discharged from room {} ({}/{} beds occupied)",
                        patient_id, room.room_number, room.occupied_beds, room.capacity
                    );
                    return Ok(room);
                }
                None => {
                    warn!(
                        "Concurrent update on room {}, retrying attempt {}/{}",
                        room_id, attempt, MAX_CAS_ATTEMPTS
                    );
                }
            }
        }

        Err(RoomError::ConcurrentUpdate)
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    async fn fetch_room(&self, id: Uuid) -> Result<Room, RoomError> {
        let doc = self
            .store
            .find_by_id(ROOMS, id)
            .await
            .map_err(db_err)?
            .filter(|d| d.get("is_deleted").and_then(Value::as_bool) != Some(true))
            .ok_or(RoomError::RoomNotFound)?;

        from_doc(doc)
    }

    async fn verify_patient_exists(&self, patient_id: Uuid) -> Result<(), RoomError> {
        self.store
            .find_by_id(PATIENTS, patient_id)
            .await
            .map_err(db_err)?
            .filter(|d| d.get("is_deleted").and_then(Value::as_bool) != Some(true))
            .map(|_| ())
            .ok_or(RoomError::PatientNotFound)
    }

    async fn ensure_room_number_free(
        &self,
        room_number: &str,
        exclude: Option<Uuid>,
    ) -> Result<(), RoomError> {
        let existing = self
            .store
            .find(
                ROOMS,
                &json!({ "room_number": room_number, "is_deleted": false }),
            )
            .await
            .map_err(db_err)?;

        let collision = existing.iter().any(|doc| {
            let doc_id = doc
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| id.parse::<Uuid>().ok());
            match exclude {
                Some(own_id) => doc_id != Some(own_id),
                None => true,
            }
        });

        if collision {
            warn!("Rejected duplicate room number {}", room_number);
            return Err(RoomError::DuplicateRoomNumber(room_number.to_string()));
        }

        Ok(())
    }
}

/// A room's status is a pure function of its occupancy, never stored
/// independently of the count it describes. The maintenance override wins.
pub fn derive_status(occupied_beds: u32, capacity: u32, maintenance: bool) -> RoomStatus {
    if maintenance {
        RoomStatus::Maintenance
    } else if occupied_beds >= capacity {
        RoomStatus::Occupied
    } else {
        RoomStatus::Available
    }
}

fn db_err(err: anyhow::Error) -> RoomError {
    RoomError::DatabaseError(err.to_string())
}

fn to_doc<T: serde::Serialize>(value: &T) -> Result<Value, RoomError> {
    serde_json::to_value(value).map_err(|e| RoomError::DatabaseError(e.to_string()))
}

fn from_doc<T: serde::de::DeserializeOwned>(doc: Value) -> Result<T, RoomError> {
    serde_json::from_value(doc).map_err(|e| RoomError::DatabaseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maintenance_override_wins() {
        assert_eq!(derive_status(0, 2, true), RoomStatus::Maintenance);
        assert_eq!(derive_status(2, 2, true), RoomStatus::Maintenance);
    }

    #[test]
    fn test_status_tracks_occupancy() {
        assert_eq!(derive_status(0, 2, false), RoomStatus::Available);
        assert_eq!(derive_status(1, 2, false), RoomStatus::Available);
        assert_eq!(derive_status(2, 2, false), RoomStatus::Occupied);
    }
}
