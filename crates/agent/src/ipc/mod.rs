//! Unix domain socket IPC between the CLI and a running agent.
//!
//! Newline-delimited JSON: each request and response is one JSON value on
//! its own line.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/liveshare/agent.sock`
//! - Fallback: `/tmp/liveshare-$UID/agent.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent::ipc::{get_socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     if client.ping().await? {
//!         println!("Agent is running");
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;

pub use client::{AgentStatus, IpcClient};
pub use messages::{IpcRequest, IpcResponse};
pub use server::{handle_request, IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Socket path of the running agent.
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("liveshare")
            .join("agent.sock")
    } else {
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/liveshare-{}", uid)).join("agent.sock")
    }
}

#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/liveshare-unsupported/agent.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_runtime_dir<F: FnOnce()>(value: Option<&str>, f: F) {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();
        // SAFETY: env tests are serialized
        unsafe {
            match value {
                Some(v) => std::env::set_var("XDG_RUNTIME_DIR", v),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
        f();
        // SAFETY: env tests are serialized
        unsafe {
            match original {
                Some(v) => std::env::set_var("XDG_RUNTIME_DIR", v),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_socket_path_with_xdg_runtime_dir() {
        with_runtime_dir(Some("/run/user/1000"), || {
            assert_eq!(
                get_socket_path(),
                PathBuf::from("/run/user/1000/liveshare/agent.sock")
            );
        });
    }

    #[test]
    #[serial]
    fn test_socket_path_without_xdg_runtime_dir() {
        with_runtime_dir(None, || {
            let path = get_socket_path();
            let text = path.to_str().unwrap();
            assert!(text.starts_with("/tmp/liveshare-"));
            assert!(text.ends_with("/agent.sock"));
        });
    }
}
