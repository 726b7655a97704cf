//! IPC server that answers CLI requests for a running agent.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{IpcRequest, IpcResponse};
use crate::lifecycle::Agent;

/// Listens for IPC connections on a Unix domain socket.
///
/// The socket file is removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Binds to `path`, creating parent directories and replacing a stale
    /// socket file.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }

    /// Serves requests against `agent` until `shutdown` is cancelled.
    ///
    /// A `Stop` request stops the agent and cancels `shutdown`.
    pub async fn serve(self, agent: Agent, shutdown: CancellationToken) {
        let started = Instant::now();
        info!(path = %self.path.display(), "IPC server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.accept() => match accepted {
                    Ok(conn) => {
                        tokio::spawn(handle_connection(
                            conn,
                            agent.clone(),
                            started,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("IPC accept failed: {}", e),
                },
            }
        }
        debug!("IPC server stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection(
    mut conn: IpcConnection,
    agent: Agent,
    started: Instant,
    shutdown: CancellationToken,
) {
    loop {
        let response = match conn.read_request().await {
            Ok(Some(request)) => handle_request(&agent, started, &shutdown, request),
            Ok(None) => break,
            Err(IpcError::Json(e)) => IpcResponse::Error {
                message: format!("invalid request: {}", e),
            },
            Err(e) => {
                debug!("IPC connection closed: {}", e);
                break;
            }
        };
        if let Err(e) = conn.send_response(&response).await {
            debug!("Failed to send IPC response: {}", e);
            break;
        }
    }
}

/// Answers a single request.
pub fn handle_request(
    agent: &Agent,
    started: Instant,
    shutdown: &CancellationToken,
    request: IpcRequest,
) -> IpcResponse {
    debug!(?request, "IPC request");
    match request {
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Status => IpcResponse::Status {
            state: agent.state(),
            uptime_secs: started.elapsed().as_secs(),
            session: agent.session(),
        },
        IpcRequest::Stop => {
            let outcome = agent.stop();
            info!(?outcome, "Stop requested over IPC");
            shutdown.cancel();
            IpcResponse::Stopping
        }
        IpcRequest::Diagnostics => IpcResponse::Diagnostics {
            entries: agent.diagnostics(),
        },
    }
}

/// A connection to an IPC client.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Reads the next request. `None` once the client disconnects.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = serde_json::from_str(line.trim())?;
        Ok(Some(request))
    }

    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("agent closed the connection")]
    Disconnected,

    /// The agent answered with [`IpcResponse::Error`].
    #[error("agent returned error: {0}")]
    Agent(String),

    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(Box<IpcResponse>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{headless_factory, EngineProbe};
    use crate::config::Config;
    use crate::identity::FixedAddress;
    use crate::indicator::TerminalIndicator;
    use crate::lifecycle::{Collaborators, SessionState};
    use crate::store::MemoryStore;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn idle_agent() -> Agent {
        Agent::new(
            Config::default(),
            Collaborators {
                store: Arc::new(MemoryStore::new()),
                engines: Arc::new(headless_factory(EngineProbe::new())),
                addresses: Arc::new(FixedAddress(Ipv4Addr::LOCALHOST)),
                indicator: Arc::new(TerminalIndicator),
            },
        )
    }

    #[tokio::test]
    async fn test_server_bind_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nested").join("dir").join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_bind_replaces_stale_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let _server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_handle_status_when_idle() {
        let agent = idle_agent();
        let shutdown = CancellationToken::new();
        match handle_request(&agent, Instant::now(), &shutdown, IpcRequest::Status) {
            IpcResponse::Status { state, session, .. } => {
                assert_eq!(state, SessionState::Idle);
                assert!(session.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_stop_cancels_shutdown() {
        let agent = idle_agent();
        let shutdown = CancellationToken::new();
        let response = handle_request(&agent, Instant::now(), &shutdown, IpcRequest::Stop);
        assert_eq!(response, IpcResponse::Stopping);
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_serve_answers_and_rejects_garbage() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(idle_agent(), shutdown.clone()));

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        write_half.write_all(b"not json\n").await.unwrap();
        reader.read_line(&mut line).await.unwrap();
        let response: IpcResponse = serde_json::from_str(line.trim()).unwrap();
        assert!(matches!(response, IpcResponse::Error { .. }));

        line.clear();
        write_half.write_all(b"\"Ping\"\n").await.unwrap();
        reader.read_line(&mut line).await.unwrap();
        let response: IpcResponse = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response, IpcResponse::Pong);

        shutdown.cancel();
        task.await.unwrap();
    }
}
