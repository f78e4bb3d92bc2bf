//! In-process transport for protocol tests.

use crate::transport::{ApiRequest, ApiResponse, Method, Transport};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;
use vulnsync_core::SyncResult;

type Handler = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

/// Routes every request through a closure and records it.
pub struct MockTransport {
    handler: Handler,
    log: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static) -> Self {
        MockTransport { handler: Box::new(handler), log: Mutex::new(Vec::new()) }
    }

    /// Replays `responses` in order, repeating the last one once exhausted.
    pub fn scripted(responses: Vec<ApiResponse>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        MockTransport::new(move |_| {
            let mut q = queue.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap_or(ApiResponse { status: 500, body: Vec::new() })
            }
        })
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Requests with the given method whose URL ends with `suffix`.
    pub fn count(&self, method: Method, suffix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(suffix))
            .count()
    }

    fn handle(&self, req: &ApiRequest) -> ApiResponse {
        self.log.lock().unwrap().push(req.clone());
        (self.handler)(req)
    }
}

impl Transport for MockTransport {
    fn execute(&self, req: &ApiRequest) -> SyncResult<ApiResponse> {
        Ok(self.handle(req))
    }

    fn download(&self, req: &ApiRequest, sink: &mut dyn Write) -> SyncResult<u16> {
        let resp = self.handle(req);
        if resp.is_success() {
            sink.write_all(&resp.body)?;
        }
        Ok(resp.status)
    }
}

pub fn json(status: u16, body: Value) -> ApiResponse {
    ApiResponse { status, body: body.to_string().into_bytes() }
}

pub fn raw(status: u16, body: impl Into<Vec<u8>>) -> ApiResponse {
    ApiResponse { status, body: body.into() }
}
