use crate::session::Session;
use crate::transport::{is_unauthorized, ApiRequest, ApiResponse, Method, Transport};
use log::{trace, warn};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Arc;
use vulnsync_core::{SyncError, SyncResult};

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// Where the session token travels on a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPlacement {
    None,
    /// `token` key in the query string (GET/DELETE) or JSON body (POST).
    Payload,
    /// `X-Cookie` header.
    Cookie,
    PayloadAndCookie,
}

impl TokenPlacement {
    fn in_payload(self) -> bool {
        matches!(self, TokenPlacement::Payload | TokenPlacement::PayloadAndCookie)
    }

    fn in_cookie(self) -> bool {
        matches!(self, TokenPlacement::Cookie | TokenPlacement::PayloadAndCookie)
    }
}

/// A request before the token is known. Re-resolved on every attempt so a
/// refreshed token lands in the payload or cookie.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub payload: Map<String, Value>,
    pub query: Vec<(String, String)>,
    pub token: TokenPlacement,
}

impl Call {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Call { method, path: path.into(), payload: Map::new(), query: Vec::new(), token: TokenPlacement::Payload }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Call::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Call::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Call::new(Method::Delete, path)
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Query-string parameter regardless of method.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn token(mut self, placement: TokenPlacement) -> Self {
        self.token = placement;
        self
    }

    fn resolve(&self, url: &str, token: Option<&str>) -> ApiRequest {
        let mut payload = self.payload.clone();
        if let (true, Some(tok)) = (self.token.in_payload(), token) {
            payload.insert("token".to_string(), Value::String(tok.to_string()));
        }
        let mut query = self.query.clone();
        let json = match self.method {
            Method::Post => Some(Value::Object(payload)),
            Method::Get | Method::Delete => {
                query.extend(payload.into_iter().map(|(k, v)| (k, query_value(v))));
                None
            }
        };
        ApiRequest {
            method: self.method,
            url: url.to_string(),
            query,
            json,
            cookie_token: token.filter(|_| self.token.in_cookie()).map(str::to_string),
        }
    }
}

fn query_value(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Sends calls with the session token, retrying only on 401.
///
/// Every other status comes back to the caller untouched; callers check it.
pub struct RetryClient {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    attempts: u32,
}

impl RetryClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>) -> Self {
        RetryClient { transport, session, attempts: DEFAULT_RETRY_ATTEMPTS }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        self.session.url(path)
    }

    pub fn request(&self, call: &Call) -> SyncResult<ApiResponse> {
        self.with_retry(call, |req| {
            let resp = self.transport.execute(req)?;
            Ok((resp.status, resp))
        })
    }

    /// Like `request`, but streams a successful body into `sink`.
    pub fn download(&self, call: &Call, sink: &mut dyn Write) -> SyncResult<u16> {
        self.with_retry(call, |req| {
            let status = self.transport.download(req, &mut *sink)?;
            Ok((status, status))
        })
    }

    /// Closes the server-side session.
    pub fn logout(&self) -> SyncResult<()> {
        self.session.logout(&*self.transport)
    }

    fn with_retry<T>(
        &self,
        call: &Call,
        mut send: impl FnMut(&ApiRequest) -> SyncResult<(u16, T)>,
    ) -> SyncResult<T> {
        let url = self.session.url(&call.path);
        if call.token == TokenPlacement::None {
            return send(&call.resolve(&url, None)).map(|(_, out)| out);
        }
        let mut token = self.session.get_token(&*self.transport, false)?;
        for attempt in 1..=self.attempts {
            let req = call.resolve(&url, Some(&token));
            trace!("{} {} (attempt {attempt})", call.method, url);
            let (status, out) = send(&req)?;
            if !is_unauthorized(status) {
                return Ok(out);
            }
            if attempt == self.attempts {
                break;
            }
            warn!("{} {} returned 401 (attempt {attempt}/{})", call.method, url, self.attempts);
            token = self.session.renew(&*self.transport, &token)?;
        }
        self.session.invalidate();
        Err(SyncError::Auth(format!(
            "{} {} still unauthorized after {} attempts",
            call.method, url, self.attempts
        )))
    }
}
