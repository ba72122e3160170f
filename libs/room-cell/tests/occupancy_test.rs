use std::sync::{Arc, Mutex};

use anyhow::Result;
use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use room_cell::models::{CreateRoomRequest, RoomError, RoomStatus, RoomType, UpdateRoomRequest};
use room_cell::OccupancyService;
use shared_database::{DocumentStore, MemoryStore};

/// Store wrapper that lets one competing occupancy write land between a
/// service read and its conditional commit. Arming it with a patient id makes
/// the next conditional room write race against that patient taking a bed.
struct ContendedStore {
    inner: Arc<MemoryStore>,
    intruder: Mutex<Option<Uuid>>,
}

#[async_trait]
impl DocumentStore for ContendedStore {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>> {
        self.inner.find_by_id(collection, id).await
    }

    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        self.inner.find(collection, filter).await
    }

    async fn create(&self, collection: &str, doc: Value) -> Result<Value> {
        self.inner.create(collection, doc).await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        patch: Value,
    ) -> Result<Option<Value>> {
        self.inner.update_by_id(collection, id, patch).await
    }

    async fn update_where(
        &self,
        collection: &str,
        id: Uuid,
        expected: &Value,
        patch: Value,
    ) -> Result<Option<Value>> {
        let intruder = self.intruder.lock().unwrap().take();
        if let Some(patient_id) = intruder {
            let room = self.inner.find_by_id(collection, id).await?.unwrap();
            let occupied = room["occupied_beds"].as_u64().unwrap() + 1;
            let mut patient_ids = room["patient_ids"].as_array().unwrap().clone();
            patient_ids.push(json!(patient_id));
            let status = if occupied >= room["capacity"].as_u64().unwrap() {
                "occupied"
            } else {
                "available"
            };
            self.inner
                .update_by_id(
                    collection,
                    id,
                    json!({
                        "occupied_beds": occupied,
                        "patient_ids": patient_ids,
                        "status": status,
                    }),
                )
                .await?;
        }
        self.inner.update_where(collection, id, expected, patch).await
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        self.inner.next_sequence(name).await
    }
}

async fn seed_patient(store: &MemoryStore) -> Uuid {
    let id = Uuid::new_v4();
    store
        .create(
            "patients",
            json!({
                "id": id,
                "first_name": "Mary",
                "last_name": "Byrne",
                "is_deleted": false,
            }),
        )
        .await
        .unwrap();
    id
}

fn room_request(room_number: &str, capacity: u32) -> CreateRoomRequest {
    CreateRoomRequest {
        room_number: room_number.to_string(),
        room_type: RoomType::General,
        capacity,
        status: None,
    }
}

async fn setup() -> (Arc<MemoryStore>, OccupancyService) {
    let store = Arc::new(MemoryStore::new());
    let service = OccupancyService::new(store.clone());
    (store, service)
}

#[tokio::test]
async fn test_create_room_starts_empty_and_available() {
    let (_store, service) = setup().await;

    let room = service.create_room(room_request("101", 2)).await.unwrap();

    assert_eq!(room.room_number, "101");
    assert_eq!(room.capacity, 2);
    assert_eq!(room.occupied_beds, 0);
    assert_eq!(room.status, RoomStatus::Available);
    assert!(room.patient_ids.is_empty());
}

#[tokio::test]
async fn test_create_room_validation() {
    let (_store, service) = setup().await;

    let err = service.create_room(room_request("101", 0)).await.unwrap_err();
    assert_matches!(err, RoomError::InvalidCapacity(_));

    service.create_room(room_request("101", 2)).await.unwrap();
    let err = service.create_room(room_request("101", 4)).await.unwrap_err();
    assert_matches!(err, RoomError::DuplicateRoomNumber(_));
}

#[tokio::test]
async fn test_assignment_fills_beds_and_derives_status() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("201", 2)).await.unwrap();
    let first = seed_patient(&store).await;
    let second = seed_patient(&store).await;

    let after_first = service.assign_patient(room.id, first, None).await.unwrap();
    assert_eq!(after_first.occupied_beds, 1);
    assert_eq!(after_first.status, RoomStatus::Available);
    assert!(after_first.admitted_date.is_some());

    let after_second = service.assign_patient(room.id, second, None).await.unwrap();
    assert_eq!(after_second.occupied_beds, 2);
    assert_eq!(after_second.status, RoomStatus::Occupied);
    assert_eq!(after_second.patient_ids, vec![first, second]);
}

#[tokio::test]
async fn test_full_room_rejects_assignment_and_state_is_unchanged() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("202", 2)).await.unwrap();
    let first = seed_patient(&store).await;
    let second = seed_patient(&store).await;
    let third = seed_patient(&store).await;

    service.assign_patient(room.id, first, None).await.unwrap();
    service.assign_patient(room.id, second, None).await.unwrap();

    let err = service.assign_patient(room.id, third, None).await.unwrap_err();
    assert_matches!(err, RoomError::RoomFull);

    let unchanged = service.get_room(room.id).await.unwrap();
    assert_eq!(unchanged.occupied_beds, 2);
    assert_eq!(unchanged.patient_ids.len(), 2);
    assert!(!unchanged.patient_ids.contains(&third));
}

#[tokio::test]
async fn test_maintenance_blocks_assignment_regardless_of_occupancy() {
    let (store, service) = setup().await;

    let room = service
        .create_room(CreateRoomRequest {
            room_number: "203".to_string(),
            room_type: RoomType::Icu,
            capacity: 2,
            status: Some(RoomStatus::Maintenance),
        })
        .await
        .unwrap();
    assert_eq!(room.status, RoomStatus::Maintenance);

    let patient = seed_patient(&store).await;
    let err = service.assign_patient(room.id, patient, None).await.unwrap_err();
    assert_matches!(err, RoomError::UnderMaintenance);

    // Clearing the override re-derives the status and unblocks assignment.
    let cleared = service
        .update_room(
            room.id,
            UpdateRoomRequest {
                status: Some(RoomStatus::Available),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cleared.status, RoomStatus::Available);

    let assigned = service.assign_patient(room.id, patient, None).await.unwrap();
    assert_eq!(assigned.occupied_beds, 1);
}

#[tokio::test]
async fn test_assignment_reference_checks() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("204", 2)).await.unwrap();
    let patient = seed_patient(&store).await;

    let err = service
        .assign_patient(room.id, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert_matches!(err, RoomError::PatientNotFound);

    let err = service
        .assign_patient(Uuid::new_v4(), patient, None)
        .await
        .unwrap_err();
    assert_matches!(err, RoomError::RoomNotFound);

    service.assign_patient(room.id, patient, None).await.unwrap();
    let err = service.assign_patient(room.id, patient, None).await.unwrap_err();
    assert_matches!(err, RoomError::PatientAlreadyAssigned);
}

#[tokio::test]
async fn test_discharge_frees_a_bed_and_rederives_status() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("301", 2)).await.unwrap();
    let first = seed_patient(&store).await;
    let second = seed_patient(&store).await;

    service.assign_patient(room.id, first, None).await.unwrap();
    let full = service.assign_patient(room.id, second, None).await.unwrap();
    assert_eq!(full.status, RoomStatus::Occupied);

    // One bed frees up: below capacity and not under maintenance means
    // available again.
    let after = service.discharge_patient(room.id, first).await.unwrap();
    assert_eq!(after.occupied_beds, 1);
    assert_eq!(after.status, RoomStatus::Available);
    assert_eq!(after.patient_ids, vec![second]);
    assert!(after.discharged_date.is_some());

    let empty = service.discharge_patient(room.id, second).await.unwrap();
    assert_eq!(empty.occupied_beds, 0);
    assert_eq!(empty.status, RoomStatus::Available);
}

#[tokio::test]
async fn test_discharge_is_not_idempotent() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("302", 1)).await.unwrap();
    let patient = seed_patient(&store).await;

    service.assign_patient(room.id, patient, None).await.unwrap();
    service.discharge_patient(room.id, patient).await.unwrap();

    let err = service.discharge_patient(room.id, patient).await.unwrap_err();
    assert_matches!(err, RoomError::PatientNotInRoom);

    let room = service.get_room(room.id).await.unwrap();
    assert_eq!(room.occupied_beds, 0);
}

#[tokio::test]
async fn test_concurrent_assignments_cannot_overshoot_capacity() {
    let (store, service) = setup().await;
    let service = Arc::new(service);

    let room = service.create_room(room_request("303", 1)).await.unwrap();
    let first = seed_patient(&store).await;
    let second = seed_patient(&store).await;

    let (a, b) = tokio::join!(
        service.assign_patient(room.id, first, None),
        service.assign_patient(room.id, second, None),
    );

    // Exactly one of the racing assignments can take the last bed.
    assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1);

    let room = service.get_room(room.id).await.unwrap();
    assert_eq!(room.occupied_beds, 1);
    assert!(room.occupied_beds <= room.capacity);
}

#[tokio::test]
async fn test_discharge_keeps_maintenance_override() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("304", 2)).await.unwrap();
    let patient = seed_patient(&store).await;
    service.assign_patient(room.id, patient, None).await.unwrap();

    let maintained = service
        .update_room(
            room.id,
            UpdateRoomRequest {
                status: Some(RoomStatus::Maintenance),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(maintained.status, RoomStatus::Maintenance);

    // Discharge still works under maintenance, but freeing a bed must not
    // clear the override.
    let after = service.discharge_patient(room.id, patient).await.unwrap();
    assert_eq!(after.occupied_beds, 0);
    assert_eq!(after.status, RoomStatus::Maintenance);
    assert!(after.discharged_date.is_some());
}

#[tokio::test]
async fn test_update_room_capacity_guards_occupancy() {
    let (store, service) = setup().await;

    let room = service.create_room(room_request("401", 3)).await.unwrap();
    let first = seed_patient(&store).await;
    let second = seed_patient(&store).await;
    service.assign_patient(room.id, first, None).await.unwrap();
    service.assign_patient(room.id, second, None).await.unwrap();

    let err = service
        .update_room(
            room.id,
            UpdateRoomRequest {
                capacity: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, RoomError::InvalidCapacity(_));

    // Shrinking to exactly the occupancy re-derives the status to occupied.
    let shrunk = service
        .update_room(
            room.id,
            UpdateRoomRequest {
                capacity: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(shrunk.capacity, 2);
    assert_eq!(shrunk.status, RoomStatus::Occupied);
}

#[tokio::test]
async fn test_capacity_shrink_loses_race_against_assignment() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(ContendedStore {
        inner: inner.clone(),
        intruder: Mutex::new(None),
    });
    let service = OccupancyService::new(store.clone());

    let room = service.create_room(room_request("402", 3)).await.unwrap();
    let first = seed_patient(&inner).await;
    let second = seed_patient(&inner).await;
    let third = seed_patient(&inner).await;
    service.assign_patient(room.id, first, None).await.unwrap();
    service.assign_patient(room.id, second, None).await.unwrap();

    // A competing assignment takes the third bed between the shrink's read
    // and its commit. The shrink must miss, re-read, and reject rather than
    // land a capacity below the new occupancy.
    *store.intruder.lock().unwrap() = Some(third);

    let err = service
        .update_room(
            room.id,
            UpdateRoomRequest {
                capacity: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, RoomError::InvalidCapacity(_));

    let room = service.get_room(room.id).await.unwrap();
    assert_eq!(room.capacity, 3);
    assert_eq!(room.occupied_beds, 3);
    assert!(room.occupied_beds <= room.capacity);
}

#[tokio::test]
async fn test_soft_delete_hides_room_from_reads() {
    let (_store, service) = setup().await;

    let room = service.create_room(room_request("501", 1)).await.unwrap();
    service.delete_room(room.id).await.unwrap();

    let err = service.get_room(room.id).await.unwrap_err();
    assert_matches!(err, RoomError::RoomNotFound);

    assert!(service.list_rooms(false).await.unwrap().is_empty());
    assert_eq!(service.list_rooms(true).await.unwrap().len(), 1);

    // A deleted room's number is free for reuse.
    let reused = service.create_room(room_request("501", 2)).await.unwrap();
    assert_eq!(reused.room_number, "501");
}
