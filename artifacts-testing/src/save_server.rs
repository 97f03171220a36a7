//! A fake artifacts save service, for testing the save service upload provider without the real
//! thing.
//!
//! The server accepts any request on any path, records it, and answers with a configurable status
//! code.
use crate::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, Uri},
    Router,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::task::JoinHandle;
use tracing::debug;

pub use axum::http::StatusCode;

/// One request received by the [`SaveServer`]
#[derive(Clone, Debug)]
pub struct SaveRequest {
    pub method: Method,
    pub path: String,

    /// Header names are lower case
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl SaveRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug)]
struct ServerState {
    requests: Mutex<Vec<SaveRequest>>,
    status: AtomicU16,
    failures_remaining: AtomicUsize,
}

pub struct SaveServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl SaveServer {
    /// Start a server on a random local port, answering `200 OK` to everything.
    ///
    /// Must be called from within a tokio runtime; the server runs until it's dropped.
    pub async fn start() -> Result<Self> {
        let state = Arc::new(ServerState {
            requests: Mutex::new(Vec::new()),
            status: AtomicU16::new(StatusCode::OK.as_u16()),
            failures_remaining: AtomicUsize::new(0),
        });

        let router = Router::new()
            .fallback(record_request)
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router.into_make_service()).await {
                eprintln!("Fake save server failed: {e}");
            }
        });

        debug!(%addr, "Fake save server started");

        Ok(Self { addr, state, task })
    }

    /// Base URL to use as the save host
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer all further requests with `status`
    pub fn respond_with(&self, status: StatusCode) {
        self.state.status.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Answer the next `count` requests with `500 Internal Server Error`, then go back to the
    /// normal status
    pub fn fail_next(&self, count: usize) {
        self.state.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Every request received so far, in the order they arrived
    pub fn requests(&self) -> Vec<SaveRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for SaveServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn record_request(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let request = SaveRequest {
        method,
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    };

    debug!(method = %request.method, path = %request.path, size = request.body.len(), "Fake save server got request");

    state.requests.lock().unwrap().push(request);

    let failing = state
        .failures_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok();

    if failing {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::from_u16(state.status.load(Ordering::SeqCst))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
