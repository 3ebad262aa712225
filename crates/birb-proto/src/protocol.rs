use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier handed out per stream entry.  Ids are never reused, so
/// an id from a superseded list never matches an entry of the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of the stream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Resolver-addressable URL, opaque to us.
    pub url: String,
}

/// Health and playback flags for one descriptor, valid for one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    /// `None` until the probe reports.
    pub healthy: Option<bool>,
    pub quality: Option<String>,
    pub playing: bool,
}

impl StreamStatus {
    pub fn is_playable(&self) -> bool {
        self.healthy == Some(true)
    }

    /// Short badge used by list views: `?`, `OK` or `ERR`.
    pub fn health_label(&self) -> &'static str {
        match self.healthy {
            None => "?",
            Some(true) => "OK",
            Some(false) => "ERR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: StreamId,
    pub descriptor: StreamDescriptor,
    pub status: StreamStatus,
}

/// Requests a front end sends into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Start a new fetch-then-validate cycle, superseding any in flight.
    Refresh,
    /// Change the selected entry (`None` clears the selection).
    Select { id: Option<StreamId> },
    /// Start proxying the selected entry.
    Play,
    /// Leave the player: stop the proxy.
    ShowSettings,
}

/// Everything the engine reports to front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    RefreshStarted,
    Getting,
    Validating,
    /// Full list snapshot after a fetch; replaces whatever the front end had.
    ListReplaced { entries: Vec<StreamEntry> },
    /// One entry changed (probe result or playing flag).
    ItemUpdated { entry: StreamEntry },
    ValidatingProgress { completed: usize, total: usize },
    RefreshDone,
    SelectedChanged { id: Option<StreamId>, playable: bool },
    /// The play request was accepted and the proxy is starting.
    PlayerShown,
    SettingsShown,
    /// The proxy confirmed it is listening; the player may connect now.
    ProxyReady { id: StreamId, url: String },
    /// The proxy went away without being asked to.
    ProxyExited { id: Option<StreamId> },
    NotPlayable { reason: String },
    Log { message: String },
}

impl Notification {
    /// Status-bar text for this notification, if it sets one.
    pub fn status_message(&self) -> Option<String> {
        match self {
            Notification::RefreshStarted => Some("Refreshing streams...".to_string()),
            Notification::Getting => Some("Getting streams...".to_string()),
            Notification::Validating => Some("Validating streams...".to_string()),
            Notification::ValidatingProgress { completed, total } => {
                Some(format!("Validating streams ({}/{})", completed, total))
            }
            Notification::RefreshDone => Some("Done refreshing streams.".to_string()),
            Notification::PlayerShown => Some("Starting stream...".to_string()),
            Notification::ProxyReady { .. } => Some("Streaming...".to_string()),
            Notification::SettingsShown => Some("Ready.".to_string()),
            Notification::ProxyExited { .. } => Some("Stream ended.".to_string()),
            Notification::NotPlayable { reason } => Some(format!("Not playable: {}", reason)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&Command::Select {
            id: Some(StreamId(3)),
        })
        .unwrap();
        assert_eq!(json, r#"{"cmd":"Select","id":3}"#);
        let back: Command = serde_json::from_str(r#"{"cmd":"Refresh"}"#).unwrap();
        assert_eq!(back, Command::Refresh);
    }

    #[test]
    fn test_status_messages() {
        let progress = Notification::ValidatingProgress {
            completed: 2,
            total: 5,
        };
        assert_eq!(
            progress.status_message().as_deref(),
            Some("Validating streams (2/5)")
        );
        assert_eq!(
            Notification::SettingsShown.status_message().as_deref(),
            Some("Ready.")
        );
        assert!(Notification::Log {
            message: "x".into()
        }
        .status_message()
        .is_none());
    }

    #[test]
    fn test_health_label() {
        let mut status = StreamStatus::default();
        assert_eq!(status.health_label(), "?");
        assert!(!status.is_playable());
        status.healthy = Some(false);
        assert_eq!(status.health_label(), "ERR");
        status.healthy = Some(true);
        assert_eq!(status.health_label(), "OK");
        assert!(status.is_playable());
    }
}
