//! Local file sharing over HTTP.
//!
//! This module provides the read-only file share:
//! - Path resolution and directory listing under a fixed root
//! - HTML listing pages with percent-encoded links
//! - An axum server streaming files and listings
//!
//! # Security
//!
//! Containment is enforced by default: `..` segments are rejected and
//! canonical targets must stay under the canonical root. Token access is the
//! default policy; the token travels in the share URL.

pub mod browser;
pub mod listing;
pub mod server;

use std::net::Ipv4Addr;

pub use browser::{BrowserError, DirectoryBrowser, DirectoryEntry, EntryKind, Resolved};
pub use listing::{render_listing, Notice};
pub use server::{generate_access_token, FileServer, FileServerError};

/// `http://<ip>:<port>`, the address viewers reach the server at.
pub fn server_url(ip: Ipv4Addr, port: u16) -> String {
    format!("http://{}:{}", ip, port)
}

/// Root listing URL carrying the access token when one is set.
pub fn share_url(server_url: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("{}/?token={}", server_url, token),
        None => format!("{}/", server_url),
    }
}
