use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_database::{DocumentStore, RestStore};

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        store_url: server.uri(),
        store_service_key: "service-key".to_string(),
        hospital_name: String::new(),
        hospital_address: String::new(),
        hospital_contact: String::new(),
    }
}

#[tokio::test]
async fn test_find_by_id_unwraps_single_row() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/rooms"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(header("apikey", "service-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": id, "room_number": "101" }])),
        )
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server));
    let found = store.find_by_id("rooms", id).await.unwrap().unwrap();
    assert_eq!(found["room_number"], "101");

    let missing = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/rooms"))
        .and(query_param("id", format!("eq.{}", missing)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    assert!(store.find_by_id("rooms", missing).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_builds_equality_filters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .and(query_param("invoice_number", "eq.INV-2025-0001"))
        .and(query_param("is_deleted", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server));
    let rows = store
        .find(
            "invoices",
            &json!({ "invoice_number": "INV-2025-0001", "is_deleted": false }),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_create_asks_for_representation() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/invoices"))
        .and(header("Prefer", "return=representation"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!([{ "id": id, "invoice_number": "INV-2025-0001" }])),
        )
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server));
    let created = store
        .create("invoices", json!({ "id": id, "invoice_number": "INV-2025-0001" }))
        .await
        .unwrap();
    assert_eq!(created["invoice_number"], "INV-2025-0001");
}

#[tokio::test]
async fn test_update_where_misses_precondition_as_none() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    // The conditional filter excluded the row: PostgREST answers with an
    // empty representation, which the store surfaces as a missed write.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/rooms"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("occupied_beds", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server));
    let result = store
        .update_where(
            "rooms",
            id,
            &json!({ "occupied_beds": 1 }),
            json!({ "occupied_beds": 2 }),
        )
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_next_sequence_calls_rpc() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/next_sequence"))
        .and(body_json(json!({ "sequence_name": "invoices" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(7)))
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server));
    assert_eq!(store.next_sequence("invoices").await.unwrap(), 7);
}

#[tokio::test]
async fn test_error_status_is_surfaced() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/rooms"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = RestStore::new(&config_for(&server));
    assert!(store.find_by_id("rooms", id).await.is_err());
}
