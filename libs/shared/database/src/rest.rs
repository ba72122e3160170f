use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::store::DocumentStore;

/// Document store backed by a PostgREST-style HTTP API. Equality filters
/// become `field=eq.value` query parameters; writes ask for
/// `Prefer: return=representation` so the stored row comes back in the
/// response; the atomic sequence is a server-side RPC.
pub struct RestStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl RestStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.store_url.clone(),
            service_key: config.store_service_key.clone(),
        }
    }

    fn get_headers(&self, representation: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.service_key).unwrap());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_key)).unwrap(),
        );

        if representation {
            headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        }

        headers
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        representation: bool,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let mut req = self
            .client
            .request(method, &url)
            .headers(self.get_headers(representation));

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("Store API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("Store API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Renders one filter value into PostgREST `eq.` syntax. Strings go in
    /// bare; everything else uses its JSON rendering.
    fn eq_param(value: &Value) -> String {
        match value {
            Value::String(s) => format!("eq.{}", s),
            other => format!("eq.{}", other),
        }
    }

    fn filter_query(filter: &Value) -> String {
        filter
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(field, value)| format!("{}={}", field, Self::eq_param(value)))
                    .collect::<Vec<_>>()
                    .join("&")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for RestStore {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>> {
        let path = format!("/rest/v1/{}?id=eq.{}", collection, id);
        let rows: Vec<Value> = self.request(Method::GET, &path, None, false).await?;
        Ok(rows.into_iter().next())
    }

    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let query = Self::filter_query(filter);
        let path = if query.is_empty() {
            format!("/rest/v1/{}", collection)
        } else {
            format!("/rest/v1/{}?{}", collection, query)
        };
        self.request(Method::GET, &path, None, false).await
    }

    async fn create(&self, collection: &str, mut doc: Value) -> Result<Value> {
        if let Some(map) = doc.as_object_mut() {
            map.entry("id").or_insert_with(|| json!(Uuid::new_v4()));
        }

        let path = format!("/rest/v1/{}", collection);
        let rows: Vec<Value> = self.request(Method::POST, &path, Some(doc), true).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("Store returned no representation for created document"))
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        patch: Value,
    ) -> Result<Option<Value>> {
        let path = format!("/rest/v1/{}?id=eq.{}", collection, id);
        let rows: Vec<Value> = self.request(Method::PATCH, &path, Some(patch), true).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_where(
        &self,
        collection: &str,
        id: Uuid,
        expected: &Value,
        patch: Value,
    ) -> Result<Option<Value>> {
        let mut path = format!("/rest/v1/{}?id=eq.{}", collection, id);
        let query = Self::filter_query(expected);
        if !query.is_empty() {
            path = format!("{}&{}", path, query);
        }

        // An empty result set means the precondition filtered the row out.
        let rows: Vec<Value> = self.request(Method::PATCH, &path, Some(patch), true).await?;
        Ok(rows.into_iter().next())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let body = json!({ "sequence_name": name });
        let value: Value = self
            .request(Method::POST, "/rest/v1/rpc/next_sequence", Some(body), false)
            .await?;

        value
            .as_u64()
            .ok_or_else(|| anyhow!("next_sequence returned a non-integer value: {}", value))
    }
}
