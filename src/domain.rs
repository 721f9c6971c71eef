//! Domain types exchanged between the daemon's tasks and the coordinator.

use tokio::sync::oneshot;

/// Everything the coordinator reacts to arrives as an `Event`.
#[derive(Debug)]
pub enum Event {
    /// Raw signal from the session bus or logind.
    Session(SessionSignal),

    /// Signal from the display-idle channel.
    Display(IdleSignal),

    /// The external unlock prompt exited; `true` means the user authenticated.
    UnlockFinished(bool),
}

/// Raw session-level signals, before normalization by the session listener.
#[derive(Debug)]
pub enum SessionSignal {
    /// `Lock` method call.
    Lock,
    /// `Quit` method call.
    Quit,
    /// `Cycle` method call.
    Cycle,
    /// `SetActive` method call; the answer goes back on `reply`.
    SetActive {
        active: bool,
        reply: Option<oneshot::Sender<bool>>,
    },
    /// `Throttle` method call.
    Throttle(bool),
    /// `SimulateUserActivity` method call.
    SimulateUserActivity,
    /// `ShowMessage` method call.
    ShowMessage(StatusMessage),
    /// logind asked the session to lock.
    LogindLock,
    /// logind asked the session to unlock.
    LogindUnlock,
    /// logind `PrepareForSleep`; `true` before suspend, `false` after resume.
    PrepareForSleep(bool),
    /// logind session `IdleHint` changed.
    IdleHint(bool),
}

/// Normalized listener events, the vocabulary the coordinator acts on.
#[derive(Debug)]
pub enum ListenerEvent {
    Lock,
    Activate,
    Deactivate,
    Cycle,
    Quit,
    ThrottleChanged(bool),
    ActiveChanged {
        active: bool,
        reply: Option<oneshot::Sender<bool>>,
    },
    SimulateActivity,
    ShowMessage(StatusMessage),
}

/// Signals from the display-server idle extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleSignal {
    /// Idle timeout reached with the saver enabled.
    Activate,
    /// Idle timeout reached with the saver disabled.
    Lock,
    /// The idle counter went back down: the user touched the input.
    Resumed,
}

/// Message shown to the user on the lock screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusMessage {
    pub summary: String,
    pub body: String,
    pub icon: String,
}

impl StatusMessage {
    /// Create a new status message.
    pub fn new(
        summary: impl Into<String>,
        body: impl Into<String>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            body: body.into(),
            icon: icon.into(),
        }
    }

    /// Single-line rendering: "summary: body", or just the summary.
    pub fn to_line(&self) -> String {
        if self.body.is_empty() {
            self.summary.clone()
        } else {
            format!("{}: {}", self.summary, self.body)
        }
    }
}
