//! # LiveShare Agent Library
//!
//! This crate provides the background agent of LiveShare. While a user is
//! signed in, the agent broadcasts the device camera, serves a directory
//! over HTTP on the local network and follows camera commands written by a
//! remote controller.
//!
//! ## Overview
//!
//! A session ties together:
//!
//! - **Network Identity**: The local IPv4 address peers can reach
//! - **File Server**: Read-only HTTP access to a shared directory
//! - **Broadcast**: A live channel named after the user id
//! - **Presence**: A record announcing the session to controllers
//! - **Commands**: A subscription to the user's command document
//! - **Activity Indicator**: A visible notice while the session runs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Agent Lifecycle                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │   Identity   │  │     File     │  │      Broadcast       │  │
//! │  │   Resolver   │  │    Server    │  │       Adapter        │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘  │
//! │                                                                  │
//! │  ┌───────────────────┐  ┌───────────────────────────────────┐  │
//! │  │     Presence      │  │        Command Channel            │  │
//! │  └───────────────────┘  └───────────────────────────────────┘  │
//! │                                                                  │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                     Document Store                         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! use agent::broadcast::{headless_factory, EngineProbe};
//! use agent::identity::FixedAddress;
//! use agent::indicator::TerminalIndicator;
//! use agent::store::MemoryStore;
//! use agent::{Agent, Collaborators, Config, StartOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let agent = Agent::new(
//!         Config::default(),
//!         Collaborators {
//!             store: Arc::new(MemoryStore::new()),
//!             engines: Arc::new(headless_factory(EngineProbe::new())),
//!             addresses: Arc::new(FixedAddress(Ipv4Addr::LOCALHOST)),
//!             indicator: Arc::new(TerminalIndicator),
//!         },
//!     );
//!
//!     if let StartOutcome::Started(info) = agent.start("user-1", None).await? {
//!         println!("sharing files at {:?}", info.share_url);
//!     }
//!
//!     agent.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`lifecycle`]: Session state machine and startup/teardown ordering
//! - [`identity`]: Local IPv4 address resolution
//! - [`files`]: Directory browsing and the HTTP file server
//! - [`broadcast`]: Broadcast engine adapter
//! - [`presence`]: Presence record publishing
//! - [`commands`]: Remote command subscription and dispatch
//! - [`store`]: Document store abstraction with in-memory and remote backends
//! - [`indicator`]: User-visible activity notice
//! - [`diagnostics`]: Recorded subsystem failures
//! - [`ipc`]: Local control socket for the CLI
//! - [`ui`]: QR code rendering

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod files;
pub mod identity;
pub mod indicator;
pub mod ipc;
pub mod lifecycle;
pub mod presence;
pub mod store;
pub mod ui;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;

pub use lifecycle::{
    Agent, AgentError, AgentEvent, Collaborators, SessionInfo, SessionState, StartOutcome,
    StopOutcome,
};

pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Subsystem};

pub use files::{DirectoryBrowser, FileServer};

pub use ui::{generate_png_qr, generate_terminal_qr};
