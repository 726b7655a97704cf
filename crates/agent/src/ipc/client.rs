//! IPC client used by the CLI to talk to a running agent.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;
use crate::diagnostics::Diagnostic;
use crate::lifecycle::{SessionInfo, SessionState};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// What `status` reports about a running agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub state: SessionState,
    pub uptime_secs: u64,
    pub session: Option<SessionInfo>,
}

/// One connection to the agent socket. Requests are answered in order.
pub struct IpcClient {
    lines: BufReader<ReadHalf<UnixStream>>,
    out: WriteHalf<UnixStream>,
    timeout: Duration,
}

impl IpcClient {
    /// Connects to the agent socket. Fails when no agent is running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        Self::connect_with_timeout(path, DEFAULT_TIMEOUT).await
    }

    /// Connects, giving up after `timeout`. The same timeout then applies
    /// to every request.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| IpcError::Timeout("connect"))??;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            lines: BufReader::new(read_half),
            out: write_half,
            timeout,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends a request and waits for the raw response.
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.round_trip(&request))
            .await
            .map_err(|_| IpcError::Timeout("request"))?
    }

    async fn round_trip(&mut self, request: &IpcRequest) -> Result<IpcResponse, IpcError> {
        let mut frame = serde_json::to_vec(request)?;
        frame.push(b'\n');
        self.out.write_all(&frame).await?;
        self.out.flush().await?;

        let mut line = String::new();
        if self.lines.read_line(&mut line).await? == 0 {
            return Err(IpcError::Disconnected);
        }
        match serde_json::from_str(line.trim())? {
            IpcResponse::Error { message } => Err(IpcError::Agent(message)),
            response => Ok(response),
        }
    }

    /// Returns `true` if the agent answers with `Pong`.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        Ok(matches!(self.send(IpcRequest::Ping).await?, IpcResponse::Pong))
    }

    pub async fn status(&mut self) -> Result<AgentStatus, IpcError> {
        match self.send(IpcRequest::Status).await? {
            IpcResponse::Status {
                state,
                uptime_secs,
                session,
            } => Ok(AgentStatus {
                state,
                uptime_secs,
                session,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Asks the agent to end its session and exit. Returns once the request
    /// is acknowledged, not when the agent is gone.
    pub async fn stop(&mut self) -> Result<(), IpcError> {
        match self.send(IpcRequest::Stop).await? {
            IpcResponse::Stopping => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn diagnostics(&mut self) -> Result<Vec<Diagnostic>, IpcError> {
        match self.send(IpcRequest::Diagnostics).await? {
            IpcResponse::Diagnostics { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: IpcResponse) -> IpcError {
    IpcError::UnexpectedResponse(Box::new(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::IpcServer;
    use tempfile::tempdir;

    /// Serves exactly one request with a canned response.
    async fn answer_once(
        server: IpcServer,
        expected: IpcRequest,
        response: IpcResponse,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_request().await.unwrap().unwrap();
            assert_eq!(request, expected);
            conn.send_response(&response).await.unwrap();
        })
    }

    #[tokio::test]
    async fn test_connect_fails_without_agent() {
        let temp_dir = tempdir().unwrap();
        let result = IpcClient::connect(&temp_dir.path().join("missing.sock")).await;
        assert!(matches!(result, Err(IpcError::Io(_))));
    }

    #[tokio::test]
    async fn test_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("agent.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();
        let task = answer_once(server, IpcRequest::Ping, IpcResponse::Pong).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(client.ping().await.unwrap());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_is_typed() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("agent.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();
        let task = answer_once(
            server,
            IpcRequest::Status,
            IpcResponse::Status {
                state: SessionState::Stopped,
                uptime_secs: 42,
                session: None,
            },
        )
        .await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let status = client.status().await.unwrap();
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(status.uptime_secs, 42);
        assert!(status.session.is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_error_surfaces() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("agent.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();
        let task = answer_once(
            server,
            IpcRequest::Diagnostics,
            IpcResponse::Error {
                message: "busy".to_string(),
            },
        )
        .await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        match client.diagnostics().await {
            Err(IpcError::Agent(message)) => assert_eq!(message, "busy"),
            other => panic!("unexpected {:?}", other),
        }
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_response_rejected() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("agent.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();
        let task = answer_once(server, IpcRequest::Stop, IpcResponse::Pong).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(matches!(
            client.stop().await,
            Err(IpcError::UnexpectedResponse(_))
        ));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection_reported() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("agent.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let task = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let _ = conn.read_request().await;
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(matches!(client.status().await, Err(IpcError::Disconnected)));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("agent.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let _task = tokio::spawn(async move {
            let _conn = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut client = IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(
            client.ping().await,
            Err(IpcError::Timeout("request"))
        ));
    }
}
