//! Embedded HTTP file server.
//!
//! Serves the shared root read-only: directories as HTML listings, regular
//! files as `application/octet-stream` streams. Each connection is handled on
//! its own task by hyper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::browser::{DirectoryBrowser, Resolved};
use super::listing::{render_listing, render_unauthorized, Notice};

/// Default time in-flight requests get to finish on stop.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Errors from the file server lifecycle.
#[derive(Debug, Error)]
pub enum FileServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Generates a per-session access token (32 hex characters).
pub fn generate_access_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[derive(Clone)]
struct AppState {
    browser: Arc<DirectoryBrowser>,
    token: Option<Arc<str>>,
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// HTTP server exposing a [`DirectoryBrowser`].
pub struct FileServer {
    bind: SocketAddr,
    state: AppState,
    grace_period: Duration,
    running: Mutex<Option<Running>>,
}

impl FileServer {
    /// Creates a server. When `token` is set, every request must carry it as
    /// the `token` query parameter.
    pub fn new(browser: DirectoryBrowser, bind: SocketAddr, token: Option<String>) -> Self {
        Self {
            bind,
            state: AppState {
                browser: Arc::new(browser),
                token: token.map(Arc::from),
            },
            grace_period: DEFAULT_GRACE_PERIOD,
            running: Mutex::new(None),
        }
    }

    /// Sets how long `stop` waits for in-flight connections before aborting them.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The access token, if token access is enabled.
    pub fn token(&self) -> Option<&str> {
        self.state.token.as_deref()
    }

    /// Address the server is listening on, if running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Starts listening. Calling it on a running server returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, FileServerError> {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            return Ok(r.addr);
        }

        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| FileServerError::Bind {
                addr: self.bind,
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| FileServerError::Bind {
                addr: self.bind,
                source,
            })?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(self.state.clone());

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!("File server terminated: {}", e);
            }
        });

        info!(%addr, root = %self.state.browser.root().display(), "File server listening");
        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Stops listening. Safe to call on a server that never started.
    pub async fn stop(&self) {
        let Some(mut r) = self.running.lock().await.take() else {
            return;
        };

        r.shutdown.cancel();
        match tokio::time::timeout(self.grace_period, &mut r.task).await {
            Ok(_) => debug!(addr = %r.addr, "File server drained"),
            Err(_) => {
                warn!(addr = %r.addr, "File server did not drain in time, aborting");
                r.task.abort();
            }
        }
        info!(addr = %r.addr, "File server stopped");
    }
}

fn router(state: AppState) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
            "method not allowed",
        )
            .into_response();
    }

    let token = state.token.as_deref();
    if let Some(expected) = token {
        if !query_token(&uri).is_some_and(|t| tokens_match(&t, expected)) {
            debug!(path = %uri.path(), "Rejected request without a valid token");
            return (StatusCode::UNAUTHORIZED, Html(render_unauthorized())).into_response();
        }
    }

    let path = match urlencoding::decode(uri.path()) {
        Ok(p) => p.into_owned(),
        Err(_) => {
            return not_found(uri.path().trim_matches('/'), token);
        }
    };

    let browser = Arc::clone(&state.browser);
    let lookup = path.clone();
    let resolved = match tokio::task::spawn_blocking(move || browser.resolve(&lookup)).await {
        Ok(r) => r,
        Err(e) => {
            warn!("Path resolution task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match resolved {
        Ok(Resolved::File { path: file_path, size }) => {
            debug!(path = %path, size, "Serving file");
            match tokio::fs::File::open(&file_path).await {
                Ok(file) => (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    Body::from_stream(ReaderStream::new(file)),
                )
                    .into_response(),
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    access_denied(path.trim_matches('/'), token)
                }
                Err(e) => {
                    debug!(path = %path, "Failed to open file: {}", e);
                    not_found(path.trim_matches('/'), token)
                }
            }
        }
        Ok(Resolved::Directory { rel_path, entries }) => {
            Html(render_listing(&rel_path, &entries, None, token)).into_response()
        }
        Ok(Resolved::Missing { rel_path }) => not_found(&rel_path, token),
        Err(e) if e.is_access_denied() => {
            debug!(path = %path, "Access denied: {}", e);
            access_denied("", token)
        }
        Err(e) => {
            warn!(path = %path, "Failed to resolve path: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn not_found(rel_path: &str, token: Option<&str>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(render_listing(rel_path, &[], Some(Notice::NotFound), token)),
    )
        .into_response()
}

fn access_denied(rel_path: &str, token: Option<&str>) -> Response {
    (
        StatusCode::FORBIDDEN,
        Html(render_listing(rel_path, &[], Some(Notice::AccessDenied), token)),
    )
        .into_response()
}

fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

/// Compares without short-circuiting on the first differing byte.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
