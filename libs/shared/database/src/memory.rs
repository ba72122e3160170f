use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::store::DocumentStore;

/// In-memory document store for tests and local runs. A single lock guards
/// each map, so `update_where` and `next_sequence` are genuinely atomic here,
/// matching what the REST backend gets from the database.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<Uuid, Value>>>,
    sequences: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(doc: &Value, filter: &Value) -> bool {
        filter
            .as_object()
            .map(|map| map.iter().all(|(field, value)| doc.get(field) == Some(value)))
            .unwrap_or(true)
    }

    fn merge(doc: &mut Value, patch: &Value) {
        if let (Some(target), Some(changes)) = (doc.as_object_mut(), patch.as_object()) {
            for (field, value) in changes {
                target.insert(field.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(&id))
            .cloned())
    }

    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| Self::matches(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, collection: &str, mut doc: Value) -> Result<Value> {
        let map = doc
            .as_object_mut()
            .ok_or_else(|| anyhow!("Document must be a JSON object"))?;

        let id = match map.get("id").and_then(|v| v.as_str()) {
            Some(existing) => existing
                .parse::<Uuid>()
                .map_err(|_| anyhow!("Document id is not a valid UUID"))?,
            None => {
                let id = Uuid::new_v4();
                map.insert("id".to_string(), json!(id));
                id
            }
        };

        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, doc.clone());

        Ok(doc)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        patch: Value,
    ) -> Result<Option<Value>> {
        let mut collections = self.collections.lock().unwrap();
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(&id));

        Ok(doc.map(|doc| {
            Self::merge(doc, &patch);
            doc.clone()
        }))
    }

    async fn update_where(
        &self,
        collection: &str,
        id: Uuid,
        expected: &Value,
        patch: Value,
    ) -> Result<Option<Value>> {
        let mut collections = self.collections.lock().unwrap();
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(&id));

        Ok(doc
            .filter(|doc| Self::matches(doc, expected))
            .map(|doc| {
                Self::merge(doc, &patch);
                doc.clone()
            }))
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let mut sequences = self.sequences.lock().unwrap();
        let counter = sequences.entry(name.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_find_roundtrip() {
        let store = MemoryStore::new();

        let created = store
            .create("rooms", json!({ "room_number": "101", "is_deleted": false }))
            .await
            .unwrap();
        let id: Uuid = serde_json::from_value(created["id"].clone()).unwrap();

        let found = store.find_by_id("rooms", id).await.unwrap().unwrap();
        assert_eq!(found["room_number"], "101");

        let filtered = store
            .find("rooms", &json!({ "is_deleted": false }))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let none = store
            .find("rooms", &json!({ "is_deleted": true }))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_where_precondition() {
        let store = MemoryStore::new();

        let created = store
            .create("rooms", json!({ "occupied_beds": 1 }))
            .await
            .unwrap();
        let id: Uuid = serde_json::from_value(created["id"].clone()).unwrap();

        // Stale precondition does not write.
        let missed = store
            .update_where("rooms", id, &json!({ "occupied_beds": 0 }), json!({ "occupied_beds": 2 }))
            .await
            .unwrap();
        assert!(missed.is_none());

        let hit = store
            .update_where("rooms", id, &json!({ "occupied_beds": 1 }), json!({ "occupied_beds": 2 }))
            .await
            .unwrap();
        assert_eq!(hit.unwrap()["occupied_beds"], 2);
    }

    #[tokio::test]
    async fn test_sequences_are_independent_and_monotonic() {
        let store = MemoryStore::new();

        assert_eq!(store.next_sequence("invoices").await.unwrap(), 1);
        assert_eq!(store.next_sequence("invoices").await.unwrap(), 2);
        assert_eq!(store.next_sequence("receipts").await.unwrap(), 1);
    }
}
