//! User-visible activity indicator.
//!
//! The agent captures audio and video and serves files, so the host must make
//! that visible. [`ActivityIndicator::show`] is called before capture starts
//! and [`ActivityIndicator::hide`] once teardown has released everything.

use std::io::Write;

use tracing::info;

/// What the agent is about to do, shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityNotice {
    pub user_id: String,
    pub display_name: String,
    /// Share URL of the file server, when it started.
    pub share_url: Option<String>,
}

/// Host hook that tells the user the agent is active.
pub trait ActivityIndicator: Send + Sync {
    fn show(&self, notice: &ActivityNotice);
    fn hide(&self);
}

/// Prints a banner to stderr, for terminal hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalIndicator;

impl ActivityIndicator for TerminalIndicator {
    fn show(&self, notice: &ActivityNotice) {
        info!(user_id = %notice.user_id, "Activity indicator shown");
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "\n*** LIVE: broadcasting camera and microphone as {} ({}) ***",
            notice.display_name, notice.user_id
        );
        match &notice.share_url {
            Some(url) => {
                let _ = writeln!(err, "*** Sharing files at {} ***\n", url);
            }
            None => {
                let _ = writeln!(err, "*** File sharing unavailable ***\n");
            }
        }
    }

    fn hide(&self) {
        info!("Activity indicator hidden");
        let _ = writeln!(std::io::stderr(), "*** Broadcast ended ***");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_indicator_is_object_safe() {
        let indicator: Box<dyn ActivityIndicator> = Box::new(TerminalIndicator);
        indicator.show(&ActivityNotice {
            user_id: "u1".to_string(),
            display_name: "Ann".to_string(),
            share_url: None,
        });
        indicator.hide();
    }
}
