//! Authenticated two-phase upload client.
//!
//! An upload first registers the artifact with the control plane, which
//! answers with a short-lived signed storage URL, then PUTs the payload to
//! that URL. Only the PUT is retried; see [`RetryPolicy`].
//!
//! ```no_run
//! use symdrop_core::client::{ApiClient, ClientConfig, UploadRequest};
//!
//! # async fn run() -> symdrop_core::Result<()> {
//! let client = ApiClient::new(ClientConfig::new("org:app:secret"))?;
//! client.check_status().await?;
//!
//! let response = client
//!     .upload_file(UploadRequest::new("release-artifacts", "ab/cdef/meta", "1.2.3", "{}"))
//!     .await?;
//! assert!(response.ok());
//! # Ok(())
//! # }
//! ```

mod retry;
mod status;
mod transport;

use crate::error::{Error, Result};
use crate::macho::Arch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use retry::{is_retryable, RetryPolicy, RETRYABLE_STATUSES};
pub use status::{describe_failure, StatusMessage};
pub use transport::{Body, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

/// Default control-plane host
pub const DEFAULT_API_HOST: &str = "https://api.logrocket.com";

/// Header carrying the client version on control-plane requests
pub const CLIENT_VERSION_HEADER: &str = "X-Client-Version";

const STATUS_UNVERIFIED: &str = "Could not verify CLI status. Check your network connection \
     and reinstall the CLI if the problem persists.";

/// Connection settings for the control plane
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key of the form `<org>:<app>:<key>`
    pub api_key: String,
    /// Base URL of the control plane
    pub api_host: String,
    /// Version reported in [`CLIENT_VERSION_HEADER`]
    pub client_version: String,
}

impl ClientConfig {
    /// Creates a config for `api_key` against the default host
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_host: DEFAULT_API_HOST.to_string(),
            client_version: crate::VERSION.to_string(),
        }
    }

    /// Sets the control-plane host
    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    /// Sets the reported client version
    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }
}

/// Storage bucket notification settings.
///
/// When present, every successful storage PUT is followed by a notification
/// so the artifact is processed immediately instead of waiting on the bucket's
/// own change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWebhook {
    /// Channel token expected by the webhook
    pub token: String,
    /// Bucket the artifacts land in
    pub bucket: String,
}

/// One artifact to upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Control-plane resource to register the artifact with
    pub url: String,
    /// Artifact path within the release
    pub filepath: String,
    /// Release identifier
    pub release: String,
    /// Architecture metadata, sent with debug binary registrations
    pub arch: Option<Arch>,
    /// Payload PUT to the signed URL
    pub contents: Body,
    /// Retry limits for the PUT
    pub retry: RetryPolicy,
}

impl UploadRequest {
    /// Creates a request with no architecture metadata and no retries
    pub fn new(
        url: impl Into<String>,
        filepath: impl Into<String>,
        release: impl Into<String>,
        contents: impl Into<Body>,
    ) -> Self {
        Self {
            url: url.into(),
            filepath: filepath.into(),
            release: release.into(),
            arch: None,
            contents: contents.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Attaches architecture metadata to the registration
    pub fn arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    /// Sets the retry policy for the PUT
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    filepath: &'a str,
    release: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arch: Option<Arch>,
}

#[derive(Deserialize)]
struct SignedUpload {
    signed_url: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    bucket: &'a str,
}

/// Client for the artifact control plane and signed-URL storage.
///
/// Cheap to clone; clones share the transport and credentials read-only.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ClientConfig,
    org: String,
    app: String,
    transport: Arc<dyn Transport>,
    webhook: Option<StorageWebhook>,
}

impl ApiClient {
    /// Creates a client using [`ReqwestTransport`]
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Creates a client over a custom transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let mut parts = config.api_key.splitn(3, ':');
        let (org, app) = match (parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(app), Some(_)) if !org.is_empty() && !app.is_empty() => {
                (org.to_string(), app.to_string())
            }
            _ => return Err(Error::InvalidApiKey),
        };

        Ok(Self {
            config,
            org,
            app,
            transport,
            webhook: None,
        })
    }

    /// Enables the post-upload storage notification
    pub fn with_storage_webhook(mut self, webhook: StorageWebhook) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Returns the connection settings
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn host(&self) -> &str {
        self.config.api_host.trim_end_matches('/')
    }

    fn control_headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Token {}", self.config.api_key),
            ),
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                CLIENT_VERSION_HEADER.to_string(),
                self.config.client_version.clone(),
            ),
        ]
    }

    fn control_url(&self, resource: &str) -> String {
        format!(
            "{}/v1/orgs/{}/apps/{}/{}/",
            self.host(),
            self.org,
            self.app,
            resource.trim_matches('/')
        )
    }

    /// Checks that the service accepts this client version.
    ///
    /// A 204 passes silently; a 2xx with a message logs it; anything else
    /// fails with the service's message.
    pub async fn check_status(&self) -> Result<()> {
        let request = HttpRequest::new(Method::Get, format!("{}/cli/status/", self.host()))
            .headers(self.control_headers());
        let response = self.transport.send(request).await?;

        if response.status == 204 {
            return Ok(());
        }

        let body: StatusBody = response
            .json()
            .map_err(|_| Error::status_check(STATUS_UNVERIFIED))?;
        if !response.ok() {
            return Err(Error::status_check(body.message));
        }
        if !body.message.is_empty() {
            info!("{}", body.message);
        }
        Ok(())
    }

    /// Registers an artifact and uploads its contents.
    ///
    /// A rejected registration, or a storage PUT that still fails after the
    /// retry budget, is returned as the response; callers check
    /// [`HttpResponse::ok`]. Errors are reserved for transport failures and a
    /// registration that returns no signed URL.
    pub async fn upload_file(&self, request: UploadRequest) -> Result<HttpResponse> {
        let body = serde_json::to_vec(&RegisterBody {
            filepath: &request.filepath,
            release: &request.release,
            arch: request.arch,
        })?;
        let register = HttpRequest::new(Method::Post, self.control_url(&request.url))
            .headers(self.control_headers())
            .body(body);

        debug!("Registering {}", request.filepath);
        let response = self.transport.send(register).await?;
        if !response.ok() {
            return Ok(response);
        }

        let signed = response.json::<SignedUpload>().ok();
        let (signed_url, name) = match signed {
            Some(SignedUpload {
                signed_url: Some(url),
                name,
            }) if !url.is_empty() => (url, name),
            _ => return Err(Error::missing_signed_url(&request.filepath)),
        };

        let put = HttpRequest::new(Method::Put, signed_url).body(request.contents);
        let result = retry::send_with_retry(self.transport.as_ref(), put, &request.retry).await?;

        if result.ok() {
            if let Some(webhook) = &self.webhook {
                self.notify_storage(webhook, name.as_deref()).await;
            }
        }

        Ok(result)
    }

    /// Fire-and-forget storage notification; failures are only logged
    async fn notify_storage(&self, webhook: &StorageWebhook, name: Option<&str>) {
        let body = match serde_json::to_vec(&WebhookBody {
            name,
            bucket: &webhook.bucket,
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode storage notification: {}", e);
                return;
            }
        };

        let request = HttpRequest::new(Method::Post, format!("{}/gcloud/", self.host()))
            .header("Content-Type", "application/json")
            .header("X-Goog-Channel-Token", webhook.token.as_str())
            .body(body);

        match self.transport.send(request).await {
            Ok(response) if !response.ok() => {
                warn!("Storage notification returned {}", response.status);
            }
            Ok(_) => {}
            Err(e) => warn!("Storage notification failed: {}", e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use pretty_assertions::assert_eq;

    fn client(transport: &Arc<ScriptedTransport>) -> ApiClient {
        let config = ClientConfig::new("org:app:key")
            .api_host("http://example.com/")
            .client_version("9.9.9");
        ApiClient::with_transport(config, transport.clone()).unwrap()
    }

    fn debug_upload() -> UploadRequest {
        UploadRequest::new("release-artifacts", "ab/cdef/debuginfo", "1.0.2", "stuff!")
            .arch(Arch::Arm64)
    }

    #[tokio::test]
    async fn test_upload_is_two_phase() {
        let transport = Arc::new(ScriptedTransport::default());
        let response = client(&transport).upload_file(debug_upload()).await.unwrap();
        assert!(response.ok());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);

        let register = &requests[0];
        assert_eq!(register.method, Method::Post);
        assert_eq!(
            register.url,
            "http://example.com/v1/orgs/org/apps/app/release-artifacts/"
        );
        assert_eq!(register.header_value("Authorization"), Some("Token org:app:key"));
        assert_eq!(register.header_value("Accept"), Some("application/json"));
        assert_eq!(register.header_value("Content-Type"), Some("application/json"));
        assert_eq!(register.header_value(CLIENT_VERSION_HEADER), Some("9.9.9"));
        assert_eq!(
            register.body,
            Body::from(r#"{"filepath":"ab/cdef/debuginfo","release":"1.0.2","arch":"arm64"}"#)
        );

        let put = &requests[1];
        assert_eq!(put.method, Method::Put);
        assert_eq!(put.url, "https://storage.test/ab/cdef/debuginfo");
        assert!(put.headers.is_empty());
        assert_eq!(put.body, Body::from("stuff!"));
    }

    #[tokio::test]
    async fn test_register_body_omits_missing_arch() {
        let transport = Arc::new(ScriptedTransport::default());
        let request = UploadRequest::new("release-artifacts", "ab/cdef/meta", "1.0.2", "{}");
        client(&transport).upload_file(request).await.unwrap();

        assert_eq!(
            transport.requests()[0].body,
            Body::from(r#"{"filepath":"ab/cdef/meta","release":"1.0.2"}"#)
        );
    }

    #[tokio::test]
    async fn test_rejected_registration_is_returned() {
        let transport = Arc::new(ScriptedTransport::default().register_status(403));
        let response = client(&transport).upload_file(debug_upload()).await.unwrap();

        assert_eq!(response.status, 403);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_signed_url_is_fatal() {
        let transport = Arc::new(ScriptedTransport::default().without_signed_url());
        let err = client(&transport).upload_file(debug_upload()).await.unwrap_err();

        assert!(matches!(err, Error::MissingSignedUrl { ref filepath } if filepath == "ab/cdef/debuginfo"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_signed_url_is_fatal() {
        let transport = Arc::new(ScriptedTransport::default().with_empty_signed_url());
        let err = client(&transport).upload_file(debug_upload()).await.unwrap_err();

        assert!(matches!(err, Error::MissingSignedUrl { ref filepath } if filepath == "ab/cdef/debuginfo"));
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
    }

    #[tokio::test]
    async fn test_file_contents_are_streamed_by_path() {
        let transport = Arc::new(ScriptedTransport::default());
        let request = UploadRequest::new(
            "release-artifacts",
            "ab/cdef/debuginfo",
            "1.0.2",
            Body::file("/build/App.dSYM/Contents/Resources/DWARF/App"),
        )
        .arch(Arch::Arm64);
        client(&transport).upload_file(request).await.unwrap();

        let put = &transport.requests()[1];
        assert_eq!(
            put.body.path(),
            Some(std::path::Path::new("/build/App.dSYM/Contents/Resources/DWARF/App"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_failure_after_retries_is_returned() {
        let transport = Arc::new(ScriptedTransport::with_put_statuses([503, 503, 503]));
        let request = debug_upload().retry(RetryPolicy::new().max_retries(2));
        let response = client(&transport).upload_file(request).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_storage_webhook_after_successful_put() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport).with_storage_webhook(StorageWebhook {
            token: "channel-token".to_string(),
            bucket: "debug-bucket".to_string(),
        });
        client.upload_file(debug_upload()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        let notify = &requests[2];
        assert_eq!(notify.url, "http://example.com/gcloud/");
        assert_eq!(notify.header_value("X-Goog-Channel-Token"), Some("channel-token"));
        assert_eq!(notify.header_value("Authorization"), None);
        assert_eq!(
            notify.body,
            Body::from(r#"{"name":"ab/cdef/debuginfo","bucket":"debug-bucket"}"#)
        );
    }

    #[tokio::test]
    async fn test_no_webhook_after_failed_put() {
        let transport = Arc::new(ScriptedTransport::with_put_statuses([400]));
        let client = client(&transport).with_storage_webhook(StorageWebhook {
            token: "t".to_string(),
            bucket: "b".to_string(),
        });
        let response = client.upload_file(debug_upload()).await.unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_check_status() {
        let transport = Arc::new(ScriptedTransport::default());
        client(&transport).check_status().await.unwrap();
        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "http://example.com/cli/status/");
        assert_eq!(request.header_value("Authorization"), Some("Token org:app:key"));

        let transport = Arc::new(ScriptedTransport::default().other_status(200));
        client(&transport).check_status().await.unwrap();

        let transport = Arc::new(ScriptedTransport::default().other_status(400));
        let err = client(&transport).check_status().await.unwrap_err();
        assert!(matches!(err, Error::StatusCheck { ref message } if message == "hello"));
    }

    #[test]
    fn test_api_key_must_name_org_and_app() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::default());
        for key in ["", "org", "org:app", ":app:key", "org::key"] {
            let result = ApiClient::with_transport(ClientConfig::new(key), transport.clone());
            assert!(matches!(result, Err(Error::InvalidApiKey)), "{key:?}");
        }
        assert!(ApiClient::with_transport(ClientConfig::new("o:a:k"), transport).is_ok());
    }
}
