use crate::transport::{ApiRequest, Method, Transport};
use log::{debug, warn};
use serde::Deserialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use vulnsync_core::{SyncError, SyncResult};

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

/// Bearer-token holder for one scanner. Shared by handle between the
/// retry client and anything else that talks to the same server.
///
/// The token lock is held across authentication, so concurrent callers
/// wait on a single login instead of racing their own.
pub struct Session {
    server: String,
    credentials: Credentials,
    token: Mutex<Option<String>>,
}

impl Session {
    pub fn new(server: impl Into<String>, credentials: Credentials) -> Self {
        Session {
            server: server.into().trim_end_matches('/').to_string(),
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Start from a token obtained elsewhere.
    pub fn with_token(server: impl Into<String>, credentials: Credentials, token: impl Into<String>) -> Self {
        let s = Session::new(server, credentials);
        *s.token.lock().unwrap_or_else(|p| p.into_inner()) = Some(token.into());
        s
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        // A poisoned lock only means another caller panicked mid-login; the
        // cached value is still either a token or nothing.
        self.token.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached token, authenticating first when there is none or when forced.
    pub fn get_token(&self, transport: &dyn Transport, force_reauth: bool) -> SyncResult<String> {
        let mut guard = self.lock();
        if let Some(tok) = guard.as_ref() {
            if !force_reauth {
                return Ok(tok.clone());
            }
        }
        let tok = self.authenticate(transport)?;
        *guard = Some(tok.clone());
        Ok(tok)
    }

    /// Re-authenticate because `stale` was refused. If another caller already
    /// replaced it, their token is returned without a second login.
    pub fn renew(&self, transport: &dyn Transport, stale: &str) -> SyncResult<String> {
        let mut guard = self.lock();
        if let Some(tok) = guard.as_ref() {
            if tok != stale {
                return Ok(tok.clone());
            }
        }
        warn!("session token expired, re-authenticating against {}", self.server);
        let tok = self.authenticate(transport)?;
        *guard = Some(tok.clone());
        Ok(tok)
    }

    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    pub fn has_token(&self) -> bool {
        self.lock().is_some()
    }

    fn authenticate(&self, transport: &dyn Transport) -> SyncResult<String> {
        let url = self.url("/session");
        debug!("authenticating as {}", self.credentials.username);
        let req = ApiRequest {
            method: Method::Post,
            url: url.clone(),
            query: Vec::new(),
            json: Some(serde_json::json!({
                "username": self.credentials.username,
                "password": self.credentials.password,
            })),
            cookie_token: None,
        };
        let resp = transport.execute(&req)?;
        if resp.status != 200 {
            return Err(SyncError::Auth(format!(
                "scanner at {} rejected credentials for {} (HTTP {})",
                self.server, self.credentials.username, resp.status
            )));
        }
        let body: TokenBody = resp.json(&url)?;
        Ok(body.token)
    }

    /// Invalidate the token server-side. A session that never logged in is a no-op.
    pub fn logout(&self, transport: &dyn Transport) -> SyncResult<()> {
        let Some(tok) = self.lock().take() else {
            return Ok(());
        };
        let url = self.url("/session");
        let req = ApiRequest {
            method: Method::Delete,
            url: url.clone(),
            query: vec![("token".to_string(), tok)],
            json: None,
            cookie_token: None,
        };
        transport.execute(&req)?.require_success(&url)?;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.server)
            .field("credentials", &self.credentials)
            .field("authenticated", &self.has_token())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{json, MockTransport};

    fn creds() -> Credentials {
        Credentials { username: "svc".into(), password: "hunter2".into() }
    }

    #[test]
    fn authenticates_lazily_once() {
        let mock = MockTransport::new(|_| json(200, serde_json::json!({"token": "t1"})));
        let s = Session::new("https://scanner:8834/", creds());
        assert!(!s.has_token());
        assert_eq!(s.get_token(&mock, false).unwrap(), "t1");
        assert_eq!(s.get_token(&mock, false).unwrap(), "t1");
        assert_eq!(mock.count(Method::Post, "/session"), 1);
        let first = &mock.requests()[0];
        assert_eq!(first.url, "https://scanner:8834/session");
        assert_eq!(first.json.as_ref().unwrap()["username"], "svc");
    }

    #[test]
    fn forced_reauth_replaces_token() {
        let n = std::sync::atomic::AtomicU32::new(0);
        let mock = MockTransport::new(move |_| {
            let i = n.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            json(200, serde_json::json!({"token": format!("t{i}")}))
        });
        let s = Session::new("https://scanner", creds());
        assert_eq!(s.get_token(&mock, false).unwrap(), "t0");
        assert_eq!(s.get_token(&mock, true).unwrap(), "t1");
    }

    #[test]
    fn rejected_credentials_are_auth_error() {
        let mock = MockTransport::new(|_| json(401, serde_json::json!({"error": "Invalid Credentials"})));
        let s = Session::new("https://scanner", creds());
        let err = s.get_token(&mock, false).unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(!err.to_string().contains("hunter2"));
        assert!(!s.has_token());
    }

    #[test]
    fn renew_skips_login_when_token_already_replaced() {
        let mock = MockTransport::new(|_| json(200, serde_json::json!({"token": "fresh"})));
        let s = Session::with_token("https://scanner", creds(), "current");
        assert_eq!(s.renew(&mock, "older").unwrap(), "current");
        assert_eq!(mock.count(Method::Post, "/session"), 0);
        assert_eq!(s.renew(&mock, "current").unwrap(), "fresh");
        assert_eq!(mock.count(Method::Post, "/session"), 1);
    }

    #[test]
    fn logout_sends_token_and_clears_it() {
        let mock = MockTransport::new(|_| json(200, serde_json::json!({})));
        let s = Session::with_token("https://scanner", creds(), "abc");
        s.logout(&mock).unwrap();
        assert!(!s.has_token());
        let reqs = mock.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, Method::Delete);
        assert_eq!(reqs[0].query_value("token"), Some("abc"));
        s.logout(&mock).unwrap();
        assert_eq!(mock.requests().len(), 1);
    }

    #[test]
    fn debug_output_redacts_password() {
        let s = Session::new("https://scanner", creds());
        assert!(!format!("{s:?}").contains("hunter2"));
    }
}
