//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the same
//! transport runs over reqwest in production and over an in-process
//! [`LoopbackClient`] in tests.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use syncq_sync_protocol::{
    endpoints, DownloadRequest, DownloadResponse, ErrorBody, RegisterRequest, RegisterResponse,
    ReportRequest, ReportResponse, StatusRequest, StatusResponse, UploadRequest, UploadResponse,
};

/// Status and body of an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body. Empty when a successful GET streamed into a sink.
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `Err` means no HTTP exchange happened (timeout, DNS, refused
/// connection). Any received status, including errors, is an `Ok` reply.
pub trait HttpClient: Send + Sync {
    /// Sends a JSON POST request.
    fn post(&self, url: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Result<HttpReply, String>;

    /// Sends a GET request, streaming a successful body into `sink`.
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        sink: &mut dyn Write,
    ) -> Result<HttpReply, String>;

    /// Checks if the client is usable.
    fn is_healthy(&self) -> bool;
}

/// Blocking reqwest client with the configured timeouts.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client from the sync configuration.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("syncq/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Result<HttpReply, String> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.body(body).send().map_err(describe)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(describe)?.to_vec();
        Ok(HttpReply { status, body })
    }

    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        sink: &mut dyn Write,
    ) -> Result<HttpReply, String> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let mut response = request.send().map_err(describe)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.bytes().map_err(describe)?.to_vec();
            return Ok(HttpReply { status, body });
        }
        response.copy_to(sink).map_err(describe)?;
        Ok(HttpReply {
            status,
            body: Vec::new(),
        })
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

fn describe(e: reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

/// HTTP-based sync transport using JSON bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the hub (e.g., "https://hub.example.org").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn record<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }

    fn post_json<Req, Res>(&self, endpoint: &str, api_key: Option<&str>, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.client.is_healthy() {
            return self.record(Err(SyncError::connectivity("HTTP client is not healthy")));
        }

        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::protocol(format!("Failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let mut headers = Vec::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            headers.push((endpoints::API_KEY_HEADER, key));
        }

        let reply = match self.client.post(&url, &headers, body) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "hub unreachable");
                return self.record(Err(SyncError::connectivity(e)));
            }
        };

        let result = classify(&reply).and_then(|()| {
            serde_json::from_slice(&reply.body)
                .map_err(|e| SyncError::protocol(format!("Malformed response from {endpoint}: {e}")))
        });
        if let Err(e) = &result {
            tracing::warn!(endpoint, status = reply.status, error = %e, "hub request failed");
        }
        self.record(result)
    }
}

/// Sorts a reply into authentication, protocol or success.
fn classify(reply: &HttpReply) -> SyncResult<()> {
    if let Some(error) = ErrorBody::detect(&reply.body) {
        return Err(match (reply.status, error.errorcode.as_str()) {
            (401 | 403, _) | (_, "invalidapikey" | "nodenotregistered" | "nodenotactive") => {
                SyncError::Authentication(error.message)
            }
            (status, code) => SyncError::Protocol {
                status: Some(status),
                message: format!("{} ({code})", error.message),
            },
        });
    }
    match reply.status {
        401 | 403 => Err(SyncError::Authentication(format!("HTTP {}", reply.status))),
        _ if reply.is_success() => Ok(()),
        status => Err(SyncError::http_status(status, format!("HTTP {status}"))),
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn check_status(&self, request: &StatusRequest) -> SyncResult<StatusResponse> {
        self.post_json(endpoints::STATUS, request.apikey.as_deref(), request)
    }

    fn register(&self, request: &RegisterRequest) -> SyncResult<RegisterResponse> {
        self.post_json(endpoints::REGISTER, None, request)
    }

    fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        self.post_json(endpoints::UPLOAD, Some(&request.apikey), request)
    }

    fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadResponse> {
        self.post_json(endpoints::DOWNLOAD, Some(&request.apikey), request)
    }

    fn report(&self, request: &ReportRequest) -> SyncResult<ReportResponse> {
        self.post_json(endpoints::REPORT, Some(&request.apikey), request)
    }

    fn fetch_artifact(
        &self,
        node_id: &str,
        api_key: &str,
        name: &str,
        sink: &mut dyn Write,
    ) -> SyncResult<u64> {
        let url = format!("{}{}{}", self.base_url, endpoints::ARTIFACT_PREFIX, name);
        let headers = [
            (endpoints::NODE_ID_HEADER, node_id),
            (endpoints::API_KEY_HEADER, api_key),
        ];
        let mut counting = CountingWriter {
            inner: sink,
            written: 0,
        };

        let reply = match self.client.get(&url, &headers, &mut counting) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(artifact = name, error = %e, "artifact download failed");
                return self.record(Err(SyncError::connectivity(e)));
            }
        };
        let written = counting.written;
        let result = classify(&reply).map(|()| written);
        if result.is_ok() {
            tracing::info!(artifact = name, bytes = written, "artifact downloaded");
        }
        self.record(result)
    }
}

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the status and body.
    fn handle_post(&self, path: &str, api_key: Option<&str>, body: &[u8]) -> (u16, Vec<u8>);

    /// Opens an artifact, or returns the error status and body.
    fn open_artifact(
        &self,
        node_id: &str,
        api_key: &str,
        name: &str,
    ) -> Result<Box<dyn Read + Send>, (u16, Vec<u8>)>;
}

/// A loopback HTTP client that routes requests directly to a hub.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// The wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

fn header<'a>(headers: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

fn sync_path(url: &str) -> &str {
    url.find("/sync/").map(|i| &url[i..]).unwrap_or(url)
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Result<HttpReply, String> {
        let api_key = header(headers, endpoints::API_KEY_HEADER);
        let (status, body) = self.server.handle_post(sync_path(url), api_key, &body);
        Ok(HttpReply { status, body })
    }

    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        sink: &mut dyn Write,
    ) -> Result<HttpReply, String> {
        let path = sync_path(url);
        let Some(name) = path.strip_prefix(endpoints::ARTIFACT_PREFIX) else {
            let body = ErrorBody::new("invalidendpoint", format!("Unknown endpoint: {path}"));
            return Ok(HttpReply {
                status: 404,
                body: body.encode().map_err(|e| e.to_string())?,
            });
        };
        let node_id = header(headers, endpoints::NODE_ID_HEADER).unwrap_or_default();
        let api_key = header(headers, endpoints::API_KEY_HEADER).unwrap_or_default();

        match self.server.open_artifact(node_id, api_key, name) {
            Ok(mut reader) => {
                io::copy(&mut reader, sink).map_err(|e| e.to_string())?;
                Ok(HttpReply {
                    status: 200,
                    body: Vec::new(),
                })
            }
            Err((status, body)) => Ok(HttpReply { status, body }),
        }
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
