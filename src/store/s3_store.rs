//! S3-compatible backend built on aws-sdk-s3

use crate::config::S3Config;
use crate::model::ContentHash;
use crate::store::{persist, read_source, BlobStore};
use crate::{Error, Result};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Blob store backed by a single bucket on an S3-compatible server
///
/// The bucket is checked (and created if missing) once, in [`S3Store::new`].
/// Requests use path-style addressing so endpoints without per-bucket DNS
/// (MinIO, Ceph RGW, localstack) work.
///
/// The API is blocking: the store owns a Tokio runtime and waits on each SDK
/// request. Do not call it from inside another async runtime.
pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint: String,
    // Declared after `client` so the client's connections are dropped first.
    runtime: Runtime,
}

impl S3Store {
    /// Connect to the backend and make sure the bucket exists
    ///
    /// Two stores racing to create the same new bucket is tolerated: an
    /// "already exists" answer to the create call counts as success.
    pub fn new(config: S3Config) -> Result<Self> {
        config.validate()?;
        let s3_config = sdk_config(&config).build();
        Self::connect(config, s3_config)
    }

    fn connect(config: S3Config, s3_config: aws_sdk_s3::Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let store = S3Store {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            endpoint: config.endpoint,
            runtime,
        };

        let created = store.ensure_bucket()?;
        info!(
            bucket = %store.bucket,
            endpoint = %store.endpoint,
            created,
            "S3 store initialized"
        );

        Ok(store)
    }

    /// Name of the target bucket
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Endpoint URL the store was configured with
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The underlying SDK client, for operations the store does not wrap
    ///
    /// Its futures must be driven by an async runtime; the store's own
    /// runtime is not exposed.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns whether the bucket had to be created
    fn ensure_bucket(&self) -> Result<bool> {
        let head = self
            .runtime
            .block_on(self.client.head_bucket().bucket(&self.bucket).send());

        match head {
            Ok(_) => {
                debug!(bucket = %self.bucket, "bucket exists");
                return Ok(false);
            }
            Err(e) => {
                if let Some(err) = connection_failure(&e) {
                    return Err(err);
                }
                let missing = status_of(&e) == Some(404)
                    || e.as_service_error().is_some_and(|se| se.is_not_found());
                if !missing {
                    return Err(Error::BucketCreation {
                        bucket: self.bucket.clone(),
                        message: describe(&e),
                    });
                }
            }
        }

        debug!(bucket = %self.bucket, "bucket missing, creating");
        let created = self
            .runtime
            .block_on(self.client.create_bucket().bucket(&self.bucket).send());

        match created {
            Ok(_) => Ok(true),
            Err(e) => {
                if let Some(err) = connection_failure(&e) {
                    return Err(err);
                }
                let already = e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                });
                if already {
                    debug!(bucket = %self.bucket, "bucket created concurrently");
                    Ok(false)
                } else {
                    Err(Error::BucketCreation {
                        bucket: self.bucket.clone(),
                        message: describe(&e),
                    })
                }
            }
        }
    }
}

impl BlobStore for S3Store {
    fn upload(&self, file_path: &Path, _post_name: &str) -> Result<ContentHash> {
        // The display name never reaches the bucket: no metadata is stored.
        let data = read_source(file_path)?;
        let hash = ContentHash::digest(&data);
        let key = hash.to_hex();
        let size = data.len();

        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .body(ByteStream::from(data))
                    .send(),
            )
            .map_err(|e| Error::Write {
                key: key.clone(),
                message: describe(&e),
            })?;

        debug!(key = %key, bytes = size, "uploaded object");
        Ok(hash)
    }

    fn download(&self, hash: &ContentHash, save_path: Option<&Path>) -> Result<Vec<u8>> {
        let key = hash.to_hex();

        let data = self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    // A bare 404 still means the key is absent; NoSuchBucket
                    // and friends do not.
                    let missing = e.as_service_error().is_some_and(|se| se.is_no_such_key())
                        || is_bare_not_found(&e);
                    if missing {
                        Error::NotFound(key.clone())
                    } else {
                        connection_failure(&e).unwrap_or_else(|| Error::Backend(describe(&e)))
                    }
                })?;

            let body = output.body.collect().await.map_err(|e| {
                Error::Backend(format!("Failed to read body of {}: {}", key, e))
            })?;
            Ok::<_, Error>(body.into_bytes().to_vec())
        })?;

        debug!(key = %key, bytes = data.len(), "downloaded object");
        persist(save_path, &data)?;
        Ok(data)
    }

    fn delete(&self, hash: &ContentHash) -> Result<()> {
        let key = hash.to_hex();

        let result = self.runtime.block_on(
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send(),
        );

        match result {
            Ok(_) => {
                debug!(key = %key, "deleted object");
                Ok(())
            }
            // S3 answers 204 for absent keys; some compatible servers send 404.
            Err(e) if is_bare_not_found(&e) || error_code(&e) == Some("NoSuchKey") => {
                debug!(key = %key, "delete of absent object");
                Ok(())
            }
            Err(e) => Err(connection_failure(&e).unwrap_or_else(|| Error::Backend(describe(&e)))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Client settings for `config`: static credentials, path-style addressing
fn sdk_config(config: &S3Config) -> aws_sdk_s3::config::Builder {
    let credentials = Credentials::new(
        &config.access_key,
        &config.secret_key,
        None,
        None,
        "hashbox",
    );

    aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(&config.endpoint)
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .force_path_style(true)
}

fn error_code<E>(err: &SdkError<E, HttpResponse>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|se| se.code())
}

/// 404 whose body named no error code
///
/// The SDK reports an empty-bodied 404 with the code `NotFound`.
fn is_bare_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool
where
    E: ProvideErrorMetadata,
{
    status_of(err) == Some(404) && matches!(error_code(err), None | Some("NotFound"))
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|resp| resp.status().as_u16())
}

fn describe<E>(err: &SdkError<E, HttpResponse>) -> String
where
    E: std::error::Error + 'static,
{
    DisplayErrorContext(err).to_string()
}

/// Unreachable backend or rejected credentials
fn connection_failure<E>(err: &SdkError<E, HttpResponse>) -> Option<Error>
where
    E: std::error::Error + 'static,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            Some(Error::Connection(describe(err)))
        }
        _ => match status_of(err) {
            Some(401 | 403) => Some(Error::Connection(format!(
                "credentials rejected: {}",
                describe(err)
            ))),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use aws_smithy_http_client::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;

    const ENDPOINT: &str = "http://localhost:9000";
    const ABC_KEY: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    /// Canned answers, one per request, in order
    fn replay(responses: Vec<(u16, &'static str)>) -> StaticReplayClient {
        let events = responses
            .into_iter()
            .map(|(status, body)| {
                ReplayEvent::new(
                    http::Request::builder()
                        .uri(format!("{}/", ENDPOINT))
                        .body(SdkBody::empty())
                        .unwrap(),
                    http::Response::builder()
                        .status(status)
                        .body(SdkBody::from(body))
                        .unwrap(),
                )
            })
            .collect();
        StaticReplayClient::new(events)
    }

    fn connect(http: &StaticReplayClient) -> Result<S3Store> {
        let config = S3Config::new(ENDPOINT, "key", "secret");
        let s3_config = sdk_config(&config)
            .http_client(http.clone())
            .retry_config(RetryConfig::disabled())
            .build();
        S3Store::connect(config, s3_config)
    }

    /// (method, path) of every request sent, query string dropped
    fn sent(http: &StaticReplayClient) -> Vec<(String, String)> {
        http.actual_requests()
            .map(|req| {
                let uri = req.uri().trim_start_matches(ENDPOINT);
                let path = uri.split('?').next().unwrap_or(uri).trim_end_matches('/');
                (req.method().to_string(), path.to_string())
            })
            .collect()
    }

    fn request(method: &str, path: &str) -> (String, String) {
        (method.to_string(), path.to_string())
    }

    fn abc_hash() -> ContentHash {
        ABC_KEY.parse().unwrap()
    }

    fn s3_error(code: &str) -> &'static str {
        match code {
            "NoSuchKey" => "<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
            "NoSuchBucket" => "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
            "BucketAlreadyOwnedByYou" => "<Error><Code>BucketAlreadyOwnedByYou</Code><Message>Your previous request to create the named bucket succeeded.</Message></Error>",
            "AccessDenied" => "<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
            _ => "",
        }
    }

    #[test]
    fn test_invalid_config_fails_before_connecting() {
        let config = S3Config::new("not-a-url", "key", "secret");
        let err = S3Store::new(config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unreachable_endpoint_is_connection_error() {
        // Nothing listens on port 1; the request fails at dispatch.
        let config = S3Config::new("http://127.0.0.1:1", "key", "secret");
        let err = S3Store::new(config).err().unwrap();
        assert!(matches!(err, Error::Connection(_)), "got {:?}", err);
    }

    #[test]
    fn test_requests_use_path_style_keys() {
        let http = replay(vec![(200, ""), (200, ""), (200, "abc"), (204, "")]);
        let store = connect(&http).unwrap();
        assert_eq!(store.bucket(), "file-server");
        assert_eq!(store.endpoint(), ENDPOINT);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        let hash = store.upload(&path, "ignored.txt").unwrap();
        assert_eq!(hash.to_hex(), ABC_KEY);
        assert_eq!(store.download(&hash, None).unwrap(), b"abc");
        store.delete(&hash).unwrap();

        let object = format!("/file-server/{}", ABC_KEY);
        assert_eq!(
            sent(&http),
            vec![
                request("HEAD", "/file-server"),
                request("PUT", &object),
                request("GET", &object),
                request("DELETE", &object),
            ]
        );
    }

    #[test]
    fn test_missing_bucket_is_created() {
        let http = replay(vec![(404, ""), (200, "")]);
        connect(&http).unwrap();
        assert_eq!(
            sent(&http),
            vec![request("HEAD", "/file-server"), request("PUT", "/file-server")]
        );
    }

    #[test]
    fn test_bucket_created_concurrently_is_ok() {
        let http = replay(vec![(404, ""), (409, s3_error("BucketAlreadyOwnedByYou"))]);
        connect(&http).unwrap();
        assert_eq!(sent(&http).len(), 2);
    }

    #[test]
    fn test_rejected_credentials_are_connection_errors() {
        let http = replay(vec![(403, "")]);
        let err = connect(&http).err().unwrap();
        assert!(matches!(err, Error::Connection(_)), "got {:?}", err);

        let http = replay(vec![(404, ""), (401, s3_error("AccessDenied"))]);
        let err = connect(&http).err().unwrap();
        assert!(matches!(err, Error::Connection(_)), "got {:?}", err);
    }

    #[test]
    fn test_other_bucket_check_failure_is_bucket_creation_error() {
        let http = replay(vec![(400, "")]);
        let err = connect(&http).err().unwrap();
        assert!(
            matches!(err, Error::BucketCreation { ref bucket, .. } if bucket == "file-server"),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_download_missing_key_is_not_found() {
        let http = replay(vec![(200, ""), (404, s3_error("NoSuchKey"))]);
        let store = connect(&http).unwrap();

        let err = store.download(&abc_hash(), None).unwrap_err();
        assert!(matches!(err, Error::NotFound(ref key) if key == ABC_KEY), "got {:?}", err);
    }

    #[test]
    fn test_download_from_missing_bucket_is_backend_error() {
        let http = replay(vec![(200, ""), (404, s3_error("NoSuchBucket"))]);
        let store = connect(&http).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let err = store.download(&abc_hash(), Some(&target)).unwrap_err();
        assert!(matches!(err, Error::Backend(_)), "got {:?}", err);
        assert!(!target.exists(), "nothing is saved after a failed fetch");
    }

    #[test]
    fn test_download_forbidden_is_connection_error() {
        let http = replay(vec![(200, ""), (403, s3_error("AccessDenied"))]);
        let store = connect(&http).unwrap();

        let err = store.download(&abc_hash(), None).unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "got {:?}", err);
    }

    #[test]
    fn test_delete_answered_with_404_is_ok() {
        let http = replay(vec![(200, ""), (404, ""), (404, s3_error("NoSuchKey"))]);
        let store = connect(&http).unwrap();

        store.delete(&abc_hash()).unwrap();
        store.delete(&abc_hash()).unwrap();
    }

    #[test]
    fn test_delete_in_missing_bucket_is_backend_error() {
        let http = replay(vec![(200, ""), (404, s3_error("NoSuchBucket"))]);
        let store = connect(&http).unwrap();

        let err = store.delete(&abc_hash()).unwrap_err();
        assert!(matches!(err, Error::Backend(_)), "got {:?}", err);
    }

    #[test]
    fn test_rejected_put_is_write_error() {
        let http = replay(vec![(200, ""), (403, s3_error("AccessDenied"))]);
        let store = connect(&http).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        let err = store.upload(&path, "").unwrap_err();
        assert!(matches!(err, Error::Write { ref key, .. } if key == ABC_KEY), "got {:?}", err);
    }

    #[test]
    fn test_client_accessor_shares_configuration() {
        let http = replay(vec![(200, "")]);
        let store = connect(&http).unwrap();
        let region = store.client().config().region().map(|r| r.to_string());
        assert_eq!(region.as_deref(), Some("us-east-1"));
    }
}
