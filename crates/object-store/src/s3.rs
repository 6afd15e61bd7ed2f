use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::interceptors::BeforeDeserializationInterceptorContextRef;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{ConfigBag, Credentials, Intercept, Region, RuntimeComponents};
use aws_sdk_s3::error::{BoxError, DisplayErrorContext};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use tracing::debug;

use crate::{
    ObjectStore, PutOptions, PutOutcome, SERVED_BY_HEADER, StoreError, StoreResult, StoredObject,
    served_by_zone,
};

#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub operation_timeout: Duration,
}

impl S3StoreConfig {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Object store backed by an S3-compatible gateway, addressed path-style.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn connect(config: &S3StoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "zonewatch-static",
            ));
        }

        let shared = loader.load().await;
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(config.operation_timeout)
            .build();

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(&config.endpoint)
            .force_path_style(true)
            .timeout_config(timeouts)
            .build();

        debug!(endpoint = %config.endpoint, bucket = %config.bucket, "configured s3 object store");

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(&self) -> StoreResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|err| StoreError::backend("list_objects", DisplayErrorContext(&err)))?;

            for object in response.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(StoredObject {
                    key: key.to_string(),
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false)
                    || err
                        .raw_response()
                        .map(|raw| raw.status().as_u16() == 404)
                        .unwrap_or(false);

                if missing {
                    return Err(StoreError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(StoreError::backend("get_object", DisplayErrorContext(&err)));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|err| StoreError::InvalidResponse(format!("body of {key}: {err}")))?;

        Ok(body.into_bytes())
    }

    async fn put_object(
        &self,
        key: &str,
        payload: Bytes,
        options: PutOptions,
    ) -> StoreResult<PutOutcome> {
        let size_bytes = payload.len() as u64;
        let capture = ServedByCapture::default();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(payload));

        if let Some(content_type) = options.content_type {
            request = request.content_type(content_type);
        }
        if options.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request
            .customize()
            .interceptor(capture.clone())
            .send()
            .await
            .map_err(|err| StoreError::backend("put_object", DisplayErrorContext(&err)))?;

        Ok(PutOutcome {
            key: key.to_string(),
            size_bytes,
            served_by: capture.take(),
        })
    }
}

/// Records the served-by header of the raw put response, which the typed output drops.
#[derive(Debug, Clone, Default)]
struct ServedByCapture {
    zone: Arc<Mutex<Option<String>>>,
}

impl ServedByCapture {
    fn take(&self) -> Option<String> {
        self.zone.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Intercept for ServedByCapture {
    fn name(&self) -> &'static str {
        "ServedByCapture"
    }

    fn read_before_deserialization(
        &self,
        context: &BeforeDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let zone = served_by_zone(context.response().headers().get(SERVED_BY_HEADER));
        if let Ok(mut slot) = self.zone.lock() {
            *slot = zone;
        }
        Ok(())
    }
}
