//! S3-compatible implementation of [`ObjectStoreGateway`].

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use secrecy::ExposeSecret;

use crate::config::StorageConfig;
use crate::error::GatewayError;
use crate::gateway::ObjectStoreGateway;
use crate::urls::parse_url;

const BACKEND: &str = "object-store";

/// Bucket and key addressed by an object URL such as `s3://bucket/path/key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn parse(url: &str) -> Result<Self, GatewayError> {
        let invalid = |reason: String| GatewayError::InvalidObjectUrl {
            url: url.to_string(),
            reason,
        };

        let parsed = parse_url(url).map_err(invalid)?;
        let key = parsed.path.trim_start_matches('/');
        if key.is_empty() {
            return Err(invalid("missing object key".to_string()));
        }

        Ok(Self {
            bucket: parsed.host,
            key: key.to_string(),
        })
    }
}

/// Artifact store backed by the AWS SDK.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    access_url_expiry: Duration,
    timeout: Duration,
}

impl S3ObjectStore {
    pub fn new(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            access_url_expiry: config.access_url_expiry,
            timeout: config.timeout,
        }
    }

    /// Build a client from the storage config, falling back to the standard
    /// AWS credential chain when no explicit keys are configured.
    pub async fn connect(config: &StorageConfig) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(config.timeout)
            .operation_timeout(config.timeout)
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeouts);
        if let Some(ref region) = config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key.expose_secret(),
                None,
                None,
                "browserkube-env",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            prefix = %config.prefix,
            "Object store client configured"
        );
        Self::new(Client::from_conf(builder.build()), config)
    }

    fn sdk_error<E, R>(&self, operation: String, err: SdkError<E, R>) -> GatewayError
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        match err {
            SdkError::TimeoutError(_) => GatewayError::Timeout {
                backend: BACKEND,
                operation,
                secs: self.timeout.as_secs(),
            },
            other => GatewayError::Request {
                backend: BACKEND,
                operation,
                reason: aws_sdk_s3::error::DisplayErrorContext(&other).to_string(),
            },
        }
    }
}

#[async_trait]
impl ObjectStoreGateway for S3ObjectStore {
    async fn delete_object(&self, url: &str) -> Result<(), GatewayError> {
        let location = ObjectLocation::parse(url)?;
        tracing::info!(url, "Deleting archived artifact");

        self.client
            .delete_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| self.sdk_error(format!("delete {}", url), e))?;
        Ok(())
    }

    async fn presigned_url(
        &self,
        url: &str,
        download_filename: Option<&str>,
    ) -> Result<String, GatewayError> {
        let location = ObjectLocation::parse(url)?;
        let presigning = PresigningConfig::expires_in(self.access_url_expiry).map_err(|e| {
            GatewayError::Request {
                backend: BACKEND,
                operation: format!("presign {}", url),
                reason: e.to_string(),
            }
        })?;

        let mut request = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key);
        if let Some(filename) = download_filename {
            request =
                request.response_content_disposition(format!("attachment; filename={}", filename));
        }

        let presigned = request
            .presigned(presigning)
            .await
            .map_err(|e| self.sdk_error(format!("presign {}", url), e))?;
        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::operation::delete_object::DeleteObjectError;

    use super::*;

    fn store() -> S3ObjectStore {
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .build(),
        );
        let config = StorageConfig {
            prefix: "s3://captures".to_string(),
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            access_url_expiry: Duration::from_secs(3600),
            artifact_extension: "wacz".to_string(),
            timeout: Duration::from_secs(7),
        };
        S3ObjectStore::new(client, &config)
    }

    #[test]
    fn test_sdk_timeout_maps_to_timeout() {
        let err = store().sdk_error(
            "delete s3://captures/a.wacz".to_string(),
            SdkError::<DeleteObjectError, ()>::timeout_error("operation timed out"),
        );
        match err {
            GatewayError::Timeout {
                backend,
                operation,
                secs,
            } => {
                assert_eq!(backend, "object-store");
                assert_eq!(operation, "delete s3://captures/a.wacz");
                assert_eq!(secs, 7);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_other_sdk_errors_map_to_request() {
        let err = store().sdk_error(
            "presign s3://captures/a.wacz".to_string(),
            SdkError::<DeleteObjectError, ()>::construction_failure("bad request"),
        );
        assert!(matches!(err, GatewayError::Request { .. }));
    }

    #[test]
    fn test_object_location_from_s3_url() {
        let loc = ObjectLocation::parse("s3://captures/archives/abc.wacz").unwrap();
        assert_eq!(loc.bucket, "captures");
        assert_eq!(loc.key, "archives/abc.wacz");
    }

    #[test]
    fn test_object_location_requires_key() {
        let err = ObjectLocation::parse("s3://captures/").unwrap_err();
        assert!(err.to_string().contains("missing object key"));
        assert!(ObjectLocation::parse("captures/abc.wacz").is_err());
    }
}
