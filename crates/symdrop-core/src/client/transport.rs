//! HTTP transport abstraction.
//!
//! The upload client talks to the network through [`Transport`], so the
//! retry and two-phase logic can run against a scripted transport in tests.

use crate::error::{classify_io, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;

/// HTTP methods used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        })
    }
}

/// Payload of an outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// In-memory bytes
    Bytes(Bytes),
    /// File streamed from disk, reopened on every send
    File(PathBuf),
}

impl Body {
    /// Creates a body streamed from the file at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Body::File(path.into())
    }

    /// Returns the bytes of an in-memory body
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Bytes(bytes) => Some(&bytes[..]),
            Body::File(_) => None,
        }
    }

    /// Returns the path of a streamed body
    pub fn path(&self) -> Option<&Path> {
        match self {
            Body::File(path) => Some(path.as_path()),
            Body::Bytes(_) => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Bytes(Bytes::new())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// An outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Header name/value pairs, sent in order
    pub headers: Vec<(String, String)>,
    /// Request body (ignored for GET)
    pub body: Body,
}

impl HttpRequest {
    /// Creates a request with no headers and an empty body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Body::default(),
        }
    }

    /// Adds a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds every header in `headers`
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets the body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header value, ignoring ASCII case in the name
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A fully-read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Canonical reason phrase for the status, empty if unknown
    pub status_text: String,
    /// Response body
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response, filling in the canonical reason phrase
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends requests and reads responses in full.
///
/// Implementations return `Err` only for transport-level failures; any HTTP
/// status, including 4xx and 5xx, is a successful [`HttpResponse`].
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends one request
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default `reqwest` client
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport reusing an existing `reqwest` client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match request.body {
            _ if request.method == Method::Get => {}
            Body::Bytes(bytes) => builder = builder.body(bytes),
            Body::File(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    classify_io(format!("failed to open '{}'", path.display()), e)
                })?;
                let length = file
                    .metadata()
                    .await
                    .map_err(|e| classify_io(format!("failed to stat '{}'", path.display()), e))?
                    .len();
                builder = builder
                    .header(reqwest::header::CONTENT_LENGTH, length)
                    .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::http(&request.url, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::http(&request.url, e))?;

        Ok(HttpResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_helpers() {
        let response = HttpResponse::new(403, "{\"error\":\"nope\"}");
        assert!(!response.ok());
        assert_eq!(response.status_text, "Forbidden");
        assert_eq!(response.text(), "{\"error\":\"nope\"}");

        assert!(HttpResponse::new(204, "").ok());
        assert!(!HttpResponse::new(302, "").ok());
        assert_eq!(HttpResponse::new(599, "").status_text, "");
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Body {
            signed_url: String,
        }
        let response = HttpResponse::new(200, "{\"signed_url\":\"https://x\"}");
        assert_eq!(response.json::<Body>().unwrap().signed_url, "https://x");
        assert!(HttpResponse::new(200, "not json").json::<Body>().is_err());
    }

    #[test]
    fn test_body_variants() {
        let bytes = Body::from("payload");
        assert_eq!(bytes.as_bytes(), Some(&b"payload"[..]));
        assert_eq!(bytes.path(), None);

        let file = Body::file("/build/App.dSYM/Contents/Resources/DWARF/App");
        assert_eq!(file.as_bytes(), None);
        assert_eq!(
            file.path(),
            Some(Path::new("/build/App.dSYM/Contents/Resources/DWARF/App"))
        );
        assert_eq!(Body::default().as_bytes(), Some(&b""[..]));
    }

    #[tokio::test]
    async fn test_missing_file_body_is_classified() {
        let dir = tempfile::TempDir::new().unwrap();
        let request = HttpRequest::new(Method::Put, "http://127.0.0.1:9/upload")
            .body(Body::file(dir.path().join("missing")));

        let err = ReqwestTransport::new().send(request).await.unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::FileNotFound));
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = HttpRequest::new(Method::Post, "https://example.com")
            .header("Authorization", "Token a:b:c")
            .body("{}");
        assert_eq!(request.header_value("authorization"), Some("Token a:b:c"));
        assert_eq!(request.header_value("x-missing"), None);
        assert_eq!(request.method.to_string(), "POST");
    }
}
