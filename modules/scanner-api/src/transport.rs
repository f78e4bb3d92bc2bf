use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;
use vulnsync_core::{SyncError, SyncResult};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Export files can be large; downloads get their own ceiling.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// A fully resolved request: token already substituted.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    /// Sent as `X-Cookie: token=<value>;`.
    pub cookie_token: Option<String>,
}

impl ApiRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Expired or missing token. The only status the retry client acts on.
pub fn is_unauthorized(status: u16) -> bool {
    status == 401
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self, url: &str) -> SyncResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| SyncError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Fail with the status unless it is 2xx.
    pub fn require_success(self, url: &str) -> SyncResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::Status { status: self.status, url: url.to_string() })
        }
    }
}

/// The single seam between the protocol logic and the wire.
pub trait Transport: Send + Sync {
    fn execute(&self, req: &ApiRequest) -> SyncResult<ApiResponse>;

    /// Streams a successful body into `sink`; returns the HTTP status.
    /// Nothing is written when the status is not 2xx.
    fn download(&self, req: &ApiRequest, sink: &mut dyn Write) -> SyncResult<u16>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(verify_tls: bool) -> SyncResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(format!("vulnsync/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("http client: {e}")))?;
        Ok(HttpTransport { client })
    }

    fn builder(&self, req: &ApiRequest) -> reqwest::blocking::RequestBuilder {
        let mut rb = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Post => self.client.post(&req.url),
            Method::Delete => self.client.delete(&req.url),
        };
        if !req.query.is_empty() {
            rb = rb.query(&req.query);
        }
        if let Some(body) = &req.json {
            rb = rb.json(body);
        }
        if let Some(tok) = &req.cookie_token {
            rb = rb.header("X-Cookie", format!("token={tok};"));
        }
        rb
    }
}

fn network(url: &str, err: impl fmt::Display) -> SyncError {
    SyncError::Network { url: url.to_string(), message: err.to_string() }
}

impl Transport for HttpTransport {
    fn execute(&self, req: &ApiRequest) -> SyncResult<ApiResponse> {
        let resp = self.builder(req).send().map_err(|e| network(&req.url, e))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(|e| network(&req.url, e))?.to_vec();
        Ok(ApiResponse { status, body })
    }

    fn download(&self, req: &ApiRequest, sink: &mut dyn Write) -> SyncResult<u16> {
        let mut resp = self
            .builder(req)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .map_err(|e| network(&req.url, e))?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Ok(status);
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = resp.read(&mut buf).map_err(|e| network(&req.url, e))?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])?;
        }
        sink.flush()?;
        Ok(status)
    }
}
