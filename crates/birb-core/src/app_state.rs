use std::fmt;
use std::str::FromStr;

use birb_proto::protocol::Notification;
use tracing::warn;

/// Named transitions of [`ApplicationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    RefreshStarted,
    ValidatingStarted,
    RefreshDone,
    PlayerShown,
    SettingsShown,
}

impl StateEvent {
    pub fn name(self) -> &'static str {
        match self {
            StateEvent::RefreshStarted => "refreshStarted",
            StateEvent::ValidatingStarted => "validatingStarted",
            StateEvent::RefreshDone => "refreshDone",
            StateEvent::PlayerShown => "playerShown",
            StateEvent::SettingsShown => "settingsShown",
        }
    }

    /// The state transition a notification implies, if any.
    pub fn from_notification(n: &Notification) -> Option<Self> {
        match n {
            Notification::RefreshStarted => Some(StateEvent::RefreshStarted),
            Notification::Validating => Some(StateEvent::ValidatingStarted),
            Notification::RefreshDone => Some(StateEvent::RefreshDone),
            Notification::PlayerShown => Some(StateEvent::PlayerShown),
            Notification::SettingsShown => Some(StateEvent::SettingsShown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application state event '{0}'")]
pub struct StateViolation(pub String);

impl FromStr for StateEvent {
    type Err = StateViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refreshStarted" => Ok(StateEvent::RefreshStarted),
            "validatingStarted" => Ok(StateEvent::ValidatingStarted),
            "refreshDone" => Ok(StateEvent::RefreshDone),
            "playerShown" => Ok(StateEvent::PlayerShown),
            "settingsShown" => Ok(StateEvent::SettingsShown),
            other => Err(StateViolation(other.to_string())),
        }
    }
}

/// idle / refreshing / streaming flags.  Changes only through `apply`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplicationState {
    getting_list: bool,
    validating_list: bool,
    streaming: bool,
}

impl ApplicationState {
    pub fn getting_list(&self) -> bool {
        self.getting_list
    }

    pub fn validating_list(&self) -> bool {
        self.validating_list
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn idle(&self) -> bool {
        !self.getting_list && !self.validating_list && !self.streaming
    }

    pub fn refreshing(&self) -> bool {
        self.getting_list || self.validating_list
    }

    pub fn apply(&mut self, event: StateEvent) {
        match event {
            StateEvent::RefreshStarted => self.getting_list = true,
            StateEvent::ValidatingStarted => {
                self.getting_list = false;
                self.validating_list = true;
            }
            StateEvent::RefreshDone => self.validating_list = false,
            StateEvent::PlayerShown => self.streaming = true,
            StateEvent::SettingsShown => self.streaming = false,
        }
    }

    /// Apply an event by name.  An unknown name is a bug in the caller:
    /// debug builds panic, release builds log it and leave the state alone.
    pub fn apply_named(&mut self, name: &str) -> Result<(), StateViolation> {
        match name.parse::<StateEvent>() {
            Ok(event) => {
                self.apply(event);
                Ok(())
            }
            Err(violation) => {
                if cfg!(debug_assertions) {
                    panic!("{}", violation);
                }
                warn!("app state: {}", violation);
                Err(violation)
            }
        }
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.getting_list {
            flags.push("getting");
        }
        if self.validating_list {
            flags.push("validating");
        }
        if self.streaming {
            flags.push("streaming");
        }
        if flags.is_empty() {
            write!(f, "idle")
        } else {
            write!(f, "{}", flags.join("+"))
        }
    }
}
