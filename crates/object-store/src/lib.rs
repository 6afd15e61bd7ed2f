//! Access to the bucket that holds uploaded objects.
//!
//! [`ObjectStore`] is the narrow surface the rest of the workspace needs: a full listing, a
//! whole-object read and a whole-object write that reports which zone accepted it.
//! [`S3ObjectStore`] talks to an S3-compatible gateway, [`InMemoryObjectStore`] backs local runs
//! and tests.

use async_trait::async_trait;
use bytes::Bytes;

mod error;
mod memory;
mod s3;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use s3::{S3ObjectStore, S3StoreConfig};

/// Response header the global ingress sets to name the zone that served a request.
pub const SERVED_BY_HEADER: &str = "x-served-by";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub public_read: bool,
}

impl PutOptions {
    pub fn json() -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            public_read: false,
        }
    }

    pub fn public_upload() -> Self {
        Self {
            content_type: None,
            public_read: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub key: String,
    pub size_bytes: u64,
    /// Zone reported through [`SERVED_BY_HEADER`], when the gateway sent one.
    pub served_by: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Lists every object in the bucket in key order, following pagination.
    async fn list_objects(&self) -> StoreResult<Vec<StoredObject>>;

    /// Reads a whole object; a missing key is [`StoreError::NotFound`].
    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    async fn put_object(
        &self,
        key: &str,
        payload: Bytes,
        options: PutOptions,
    ) -> StoreResult<PutOutcome>;
}

/// Normalizes the served-by header value, treating blank values as absent.
pub(crate) fn served_by_zone(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
