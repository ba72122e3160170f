use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// The persistence seam consumed by every cell: a document store offering
/// per-collection reads, writes and two atomic primitives. Each operation is
/// atomic for a single document; nothing here spans documents.
///
/// Filters are flat JSON objects matched by field equality.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>>;

    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>>;

    /// Stores a new document, assigning an `id` when the caller supplied none,
    /// and returns the stored representation.
    async fn create(&self, collection: &str, doc: Value) -> Result<Value>;

    /// Shallow-merges `patch` into the matching document in one write.
    /// Returns `None` when no document has that id.
    async fn update_by_id(&self, collection: &str, id: Uuid, patch: Value)
        -> Result<Option<Value>>;

    /// Conditional write: the patch is applied only while every field in
    /// `expected` still holds on the stored document. `None` means the
    /// precondition no longer held (or the document is gone) and the caller
    /// should re-read and retry.
    async fn update_where(
        &self,
        collection: &str,
        id: Uuid,
        expected: &Value,
        patch: Value,
    ) -> Result<Option<Value>>;

    /// Atomically increments and returns the named counter. Backs
    /// human-readable invoice numbering without a count-then-insert race.
    async fn next_sequence(&self, name: &str) -> Result<u64>;
}
