//! Activity sources.
//!
//! Two independent origins feed the coordinator:
//! - the session level: our own session-bus service plus logind
//! - the display server: the X11 MIT-SCREEN-SAVER idle counter
//!
//! The session listener normalizes raw session signals into
//! [`ListenerEvent`]s and owns the "active" flag mirrored to bus clients.

pub mod dbus;
pub mod logind;
pub mod x11;

use crate::domain::{ListenerEvent, SessionSignal};
use crate::error::{DisplayError, StartError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Session-level channel: name ownership and the `ActiveChanged` signal.
#[async_trait]
pub trait SessionBus: Send {
    /// Claim the session channel. Fails when another instance owns it.
    async fn acquire(&mut self) -> Result<(), StartError>;

    /// Publish a change of the active flag to bus clients.
    fn emit_active_changed(&mut self, active: bool);
}

/// Display-server idle channel.
pub trait DisplayIdle: Send {
    /// Connect and start watching idle time.
    fn acquire(&mut self) -> Result<(), DisplayError>;

    fn set_activation_enabled(&mut self, enabled: bool);

    fn set_timeout(&mut self, timeout: Duration);

    fn set_saver_enabled(&mut self, enabled: bool);

    /// Reset the server's idle counter as if the user had touched the input.
    fn simulate_activity(&mut self) -> Result<(), DisplayError>;
}

/// Session-level activity source.
pub struct SessionListener {
    bus: Box<dyn SessionBus>,
    active: bool,
    active_since: Option<Instant>,
    activation_enabled: bool,
    sleep_activation_enabled: bool,
    throttled: bool,
}

impl SessionListener {
    pub fn new(bus: Box<dyn SessionBus>) -> Self {
        Self {
            bus,
            active: false,
            active_since: None,
            activation_enabled: true,
            sleep_activation_enabled: true,
            throttled: false,
        }
    }

    /// Claim the session channel.
    pub async fn acquire(&mut self) -> Result<(), StartError> {
        self.bus.acquire().await
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time since the listener went active, zero while inactive.
    pub fn active_time(&self) -> Duration {
        self.active_since
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }

    pub fn set_activation_enabled(&mut self, enabled: bool) {
        self.activation_enabled = enabled;
    }

    pub fn set_sleep_activation_enabled(&mut self, enabled: bool) {
        self.sleep_activation_enabled = enabled;
    }

    /// Change the active flag.
    ///
    /// `on_active_changed` decides whether the change is accepted (it is
    /// where the display actually gets captured or released). Returns
    /// `false` when the flag already had that value or the change was
    /// refused; the flag is left untouched in both cases.
    pub fn set_active(&mut self, active: bool, on_active_changed: impl FnOnce(bool) -> bool) -> bool {
        if self.active == active {
            debug!("Trying to set active state when already: {}", active);
            return false;
        }

        if !on_active_changed(active) {
            debug!("Active-changed not handled, staying {}", self.active);
            return false;
        }

        self.active = active;
        self.active_since = active.then(Instant::now);
        self.bus.emit_active_changed(active);
        true
    }

    /// Translate a raw session signal into the listener vocabulary.
    ///
    /// Returns `None` for signals that do not apply in the current state.
    pub fn normalize(&mut self, signal: SessionSignal) -> Option<ListenerEvent> {
        let event = match signal {
            SessionSignal::Lock | SessionSignal::LogindLock => ListenerEvent::Lock,
            SessionSignal::LogindUnlock => ListenerEvent::Deactivate,
            SessionSignal::Quit => ListenerEvent::Quit,
            SessionSignal::Cycle => ListenerEvent::Cycle,
            SessionSignal::SetActive { active, reply } => {
                ListenerEvent::ActiveChanged { active, reply }
            }
            SessionSignal::SimulateUserActivity => ListenerEvent::SimulateActivity,
            SessionSignal::ShowMessage(message) => ListenerEvent::ShowMessage(message),
            SessionSignal::Throttle(throttled) => {
                if self.throttled == throttled {
                    trace!("Throttle unchanged: {}", throttled);
                    return None;
                }
                self.throttled = throttled;
                ListenerEvent::ThrottleChanged(throttled)
            }
            SessionSignal::PrepareForSleep(true) => {
                if !self.sleep_activation_enabled {
                    debug!("Going to sleep, but sleep activation is disabled");
                    return None;
                }
                debug!("Going to sleep, requesting lock");
                ListenerEvent::Lock
            }
            SessionSignal::PrepareForSleep(false) => {
                if !self.active {
                    return None;
                }
                debug!("Resumed from sleep while active");
                ListenerEvent::SimulateActivity
            }
            SessionSignal::IdleHint(true) => {
                if !self.activation_enabled || self.active {
                    trace!(
                        "Session idle ignored (activation_enabled={}, active={})",
                        self.activation_enabled, self.active
                    );
                    return None;
                }
                ListenerEvent::Activate
            }
            SessionSignal::IdleHint(false) => return None,
        };

        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBus;

    fn listener() -> (SessionListener, RecordingBus) {
        let bus = RecordingBus::default();
        (SessionListener::new(Box::new(bus.clone())), bus)
    }

    #[test]
    fn test_set_active_accepted() {
        let (mut listener, bus) = listener();

        assert!(listener.set_active(true, |_| true));
        assert!(listener.is_active());
        assert_eq!(bus.log().emitted, vec![true]);
    }

    #[test]
    fn test_set_active_refused() {
        let (mut listener, bus) = listener();

        assert!(!listener.set_active(true, |_| false));
        assert!(!listener.is_active());
        assert!(bus.log().emitted.is_empty());
        assert_eq!(listener.active_time(), Duration::ZERO);
    }

    #[test]
    fn test_set_active_same_value_skips_handler() {
        let (mut listener, bus) = listener();
        let mut called = false;

        assert!(!listener.set_active(false, |_| {
            called = true;
            true
        }));
        assert!(!called);
        assert!(bus.log().emitted.is_empty());
    }

    #[test]
    fn test_normalize_lock_sources() {
        let (mut listener, _bus) = listener();
        assert!(matches!(
            listener.normalize(SessionSignal::Lock),
            Some(ListenerEvent::Lock)
        ));
        assert!(matches!(
            listener.normalize(SessionSignal::LogindLock),
            Some(ListenerEvent::Lock)
        ));
        assert!(matches!(
            listener.normalize(SessionSignal::LogindUnlock),
            Some(ListenerEvent::Deactivate)
        ));
    }

    #[test]
    fn test_normalize_sleep() {
        let (mut listener, _bus) = listener();

        assert!(matches!(
            listener.normalize(SessionSignal::PrepareForSleep(true)),
            Some(ListenerEvent::Lock)
        ));

        // Resume only matters while active
        assert!(listener.normalize(SessionSignal::PrepareForSleep(false)).is_none());
        listener.set_active(true, |_| true);
        assert!(matches!(
            listener.normalize(SessionSignal::PrepareForSleep(false)),
            Some(ListenerEvent::SimulateActivity)
        ));

        listener.set_sleep_activation_enabled(false);
        assert!(listener.normalize(SessionSignal::PrepareForSleep(true)).is_none());
    }

    #[test]
    fn test_normalize_idle_hint() {
        let (mut listener, _bus) = listener();

        assert!(matches!(
            listener.normalize(SessionSignal::IdleHint(true)),
            Some(ListenerEvent::Activate)
        ));
        assert!(listener.normalize(SessionSignal::IdleHint(false)).is_none());

        listener.set_activation_enabled(false);
        assert!(listener.normalize(SessionSignal::IdleHint(true)).is_none());
    }

    #[test]
    fn test_normalize_throttle_deduplicates() {
        let (mut listener, _bus) = listener();

        assert!(listener.normalize(SessionSignal::Throttle(false)).is_none());
        assert!(matches!(
            listener.normalize(SessionSignal::Throttle(true)),
            Some(ListenerEvent::ThrottleChanged(true))
        ));
        assert!(listener.normalize(SessionSignal::Throttle(true)).is_none());
    }
}
