//! Lock/saver state machine.
//!
//! The manager owns three independent flags:
//! - `active`: the display is under the locker's control
//! - `lock_active`: dismissing requires authentication
//! - `saver_active`: the saver is (or will be) shown
//!
//! `lock_active` and `saver_active` are only raised through
//! [`LockManager::begin_activation`], which hands back a [`PendingActivation`]
//! that must be committed or rolled back. A failed activation therefore always
//! restores the pre-attempt value.

use crate::config::Mode;
use crate::domain::StatusMessage;
use crate::error::ManagerError;
use crate::presenter::{Presenter, UnlockOptions, View};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Notifications emitted on `active` transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    Activated,
    Deactivated,
}

/// Which flag an activation attempt targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Lock,
    Saver,
}

/// An activation attempt in flight.
#[must_use = "a pending activation must be committed or rolled back"]
#[derive(Debug)]
pub struct PendingActivation {
    target: Target,
    previous: bool,
}

impl PendingActivation {
    pub fn target(&self) -> Target {
        self.target
    }

    /// Flag value before the attempt started.
    pub fn previous(&self) -> bool {
        self.previous
    }
}

/// Values fanned out from preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub lock_enabled: bool,
    pub lock_with_saver_enabled: bool,
    pub lock_timeout: Duration,
    pub logout_enabled: bool,
    pub logout_timeout: Duration,
    pub logout_command: Option<String>,
    pub keyboard_enabled: bool,
    pub keyboard_command: Option<String>,
    pub status_message_enabled: bool,
    pub user_switch_enabled: bool,
    pub cycle_timeout: Duration,
    pub mode: Mode,
    pub saver_enabled: bool,
    pub themes: Vec<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            lock_enabled: true,
            lock_with_saver_enabled: true,
            lock_timeout: Duration::ZERO,
            logout_enabled: false,
            logout_timeout: Duration::ZERO,
            logout_command: None,
            keyboard_enabled: false,
            keyboard_command: None,
            status_message_enabled: true,
            user_switch_enabled: false,
            cycle_timeout: Duration::ZERO,
            mode: Mode::Blank,
            saver_enabled: true,
            themes: Vec::new(),
        }
    }
}

/// Lock/saver state machine. Rendering is delegated to a [`Presenter`].
pub struct LockManager {
    presenter: Box<dyn Presenter>,

    active: bool,
    lock_active: bool,
    saver_active: bool,
    throttled: bool,

    /// Set once preferences have been applied.
    configured: bool,

    settings: ManagerSettings,

    activated_at: Option<Instant>,
    last_cycle: Option<Instant>,
    theme: Option<usize>,
    message: Option<StatusMessage>,
    prompt_up: bool,
}

impl LockManager {
    /// Create an idle, unconfigured manager.
    pub fn new(presenter: Box<dyn Presenter>) -> Self {
        Self {
            presenter,
            active: false,
            lock_active: false,
            saver_active: false,
            throttled: false,
            configured: false,
            settings: ManagerSettings::default(),
            activated_at: None,
            last_cycle: None,
            theme: None,
            message: None,
            prompt_up: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn lock_active(&self) -> bool {
        self.lock_active
    }

    pub fn saver_active(&self) -> bool {
        self.saver_active
    }

    pub fn throttled(&self) -> bool {
        self.throttled
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Whether the unlock prompt is currently up.
    pub fn prompt_up(&self) -> bool {
        self.prompt_up
    }

    /// Whether `request_unlock` would raise the prompt rather than dismiss.
    pub fn unlock_needs_prompt(&self) -> bool {
        self.active && self.lock_active && !self.prompt_up
    }

    /// Name of the theme currently selected, if any.
    pub fn current_theme(&self) -> Option<&str> {
        self.theme
            .and_then(|index| self.settings.themes.get(index))
            .map(String::as_str)
    }

    /// Mark preferences as applied; `set_active` refuses to run before this.
    pub fn mark_configured(&mut self) {
        self.configured = true;
    }

    /// Raise the target flag ahead of an activation attempt.
    ///
    /// Anything observing state while the attempt runs already sees the
    /// intended end state.
    pub fn begin_activation(&mut self, target: Target) -> PendingActivation {
        let previous = self.flag(target);
        debug!("Beginning {:?} activation (previous={})", target, previous);
        self.set_flag(target, true);
        PendingActivation { target, previous }
    }

    /// Keep the flag raised by `begin_activation`.
    pub fn commit(&mut self, pending: PendingActivation) {
        trace!("Committed {:?} activation", pending.target);
    }

    /// Restore the flag to its value before `begin_activation`.
    pub fn rollback(&mut self, pending: PendingActivation) {
        debug!(
            "Rolling back {:?} activation to {}",
            pending.target, pending.previous
        );
        self.set_flag(pending.target, pending.previous);
    }

    /// Transition between idle and active.
    ///
    /// Setting the current value again is a no-op and emits nothing.
    /// Deactivation leaves `lock_active` and `saver_active` untouched.
    pub fn set_active(&mut self, active: bool) -> Result<Option<ManagerEvent>, ManagerError> {
        if !self.configured {
            return Err(ManagerError::NotConfigured);
        }

        if self.active == active {
            trace!("Manager already {}", if active { "active" } else { "inactive" });
            return Ok(None);
        }

        let now = Instant::now();
        self.active = active;

        if active {
            self.activated_at = Some(now);
            self.last_cycle = Some(now);
            self.select_theme();
            self.presenter.show(&self.view());
            info!(
                "Activated (locked={}, saver={})",
                self.lock_active, self.saver_active
            );
            Ok(Some(ManagerEvent::Activated))
        } else {
            self.activated_at = None;
            self.last_cycle = None;
            self.prompt_up = false;
            self.message = None;
            self.presenter.hide();
            info!("Deactivated");
            Ok(Some(ManagerEvent::Deactivated))
        }
    }

    /// Advance to the next theme. No effect unless active and not throttled.
    pub fn cycle(&mut self) -> bool {
        if !self.active || self.throttled {
            debug!(
                "Not cycling (active={}, throttled={})",
                self.active, self.throttled
            );
            return false;
        }

        self.last_cycle = Some(Instant::now());

        let Some(next) = self.next_theme() else {
            trace!("Nothing to cycle to in {:?} mode", self.settings.mode);
            return false;
        };

        self.theme = Some(next);
        debug!("Cycled to theme {:?}", self.current_theme());
        self.presenter.show(&self.view());
        true
    }

    /// Present the unlock prompt, or dismiss the saver when not locked.
    ///
    /// Never changes `lock_active` or `saver_active`.
    pub fn request_unlock(&mut self) -> Option<ManagerEvent> {
        if !self.active {
            trace!("Unlock requested while inactive");
            return None;
        }

        if !self.lock_active {
            debug!("Saver dismissed by user activity");
            return self.set_active(false).ok().flatten();
        }

        if self.prompt_up {
            trace!("Unlock prompt already up");
            return None;
        }

        let options = self.unlock_options(Instant::now());
        self.prompt_up = self.presenter.prompt_unlock(&options);
        None
    }

    /// Result of the unlock prompt.
    ///
    /// A successful authentication clears both flags and deactivates.
    pub fn unlock_finished(&mut self, authenticated: bool) -> Option<ManagerEvent> {
        self.prompt_up = false;

        if !authenticated {
            debug!("Unlock prompt did not authenticate; staying locked");
            return None;
        }

        self.unlock()
    }

    /// Authenticated unlock from outside (e.g. logind): clear both flags and deactivate.
    pub fn unlock(&mut self) -> Option<ManagerEvent> {
        info!("Session unlocked");
        self.lock_active = false;
        self.saver_active = false;
        self.set_active(false).ok().flatten()
    }

    /// Forward a status message to the lock surface.
    pub fn show_message(&mut self, message: StatusMessage) {
        if !self.settings.status_message_enabled {
            debug!("Status messages disabled, dropping: {}", message.summary);
            return;
        }

        if !self.active {
            debug!("Not active, dropping status message: {}", message.summary);
            return;
        }

        self.presenter.show_message(&message);
        self.message = Some(message);
    }

    /// Run the time-based transitions: lock-with-saver and theme cycling.
    pub fn poll(&mut self, now: Instant) {
        let Some(activated_at) = self.activated_at else {
            return;
        };

        if self.saver_active
            && !self.lock_active
            && self.settings.lock_enabled
            && self.settings.lock_with_saver_enabled
            && now.saturating_duration_since(activated_at) >= self.settings.lock_timeout
        {
            info!("Saver active for {:?}, locking", self.settings.lock_timeout);
            self.lock_active = true;
            self.presenter.show(&self.view());
        }

        if self.settings.mode == Mode::Random
            && !self.settings.cycle_timeout.is_zero()
            && self
                .last_cycle
                .is_some_and(|last| now.saturating_duration_since(last) >= self.settings.cycle_timeout)
        {
            self.cycle();
        }
    }

    pub fn set_throttled(&mut self, throttled: bool) {
        if self.throttled != throttled {
            debug!("Throttled: {}", throttled);
        }
        self.throttled = throttled;
    }

    pub fn set_lock_enabled(&mut self, enabled: bool) {
        self.settings.lock_enabled = enabled;
    }

    pub fn set_lock_with_saver_enabled(&mut self, enabled: bool) {
        self.settings.lock_with_saver_enabled = enabled;
    }

    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.settings.lock_timeout = timeout;
    }

    pub fn set_logout_enabled(&mut self, enabled: bool) {
        self.settings.logout_enabled = enabled;
    }

    pub fn set_logout_timeout(&mut self, timeout: Duration) {
        self.settings.logout_timeout = timeout;
    }

    pub fn set_logout_command(&mut self, command: Option<String>) {
        self.settings.logout_command = command;
    }

    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.settings.keyboard_enabled = enabled;
    }

    pub fn set_keyboard_command(&mut self, command: Option<String>) {
        self.settings.keyboard_command = command;
    }

    pub fn set_status_message_enabled(&mut self, enabled: bool) {
        self.settings.status_message_enabled = enabled;
    }

    pub fn set_user_switch_enabled(&mut self, enabled: bool) {
        self.settings.user_switch_enabled = enabled;
    }

    pub fn set_cycle_timeout(&mut self, timeout: Duration) {
        self.settings.cycle_timeout = timeout;
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.settings.mode == mode {
            return;
        }
        self.settings.mode = mode;
        self.refresh_theme();
    }

    pub fn set_saver_enabled(&mut self, enabled: bool) {
        if self.settings.saver_enabled == enabled {
            return;
        }
        self.settings.saver_enabled = enabled;
        self.refresh_theme();
    }

    pub fn set_themes(&mut self, themes: Vec<String>) {
        if self.settings.themes == themes {
            return;
        }
        self.settings.themes = themes;
        self.refresh_theme();
    }

    /// Snapshot handed to the presenter.
    pub fn view(&self) -> View {
        View {
            lock_active: self.lock_active,
            saver_active: self.saver_active,
            theme: if self.settings.saver_enabled {
                self.current_theme().map(str::to_string)
            } else {
                None
            },
        }
    }

    /// Options for the unlock prompt at `now`.
    pub fn unlock_options(&self, now: Instant) -> UnlockOptions {
        let logout_due = self
            .activated_at
            .is_some_and(|at| now.saturating_duration_since(at) >= self.settings.logout_timeout);

        UnlockOptions {
            logout_command: if self.settings.logout_enabled && logout_due {
                self.settings.logout_command.clone()
            } else {
                None
            },
            keyboard_command: if self.settings.keyboard_enabled {
                self.settings.keyboard_command.clone()
            } else {
                None
            },
            user_switch_enabled: self.settings.user_switch_enabled,
            status_message: self.message.clone(),
        }
    }

    fn flag(&self, target: Target) -> bool {
        match target {
            Target::Lock => self.lock_active,
            Target::Saver => self.saver_active,
        }
    }

    fn set_flag(&mut self, target: Target, value: bool) {
        let slot = match target {
            Target::Lock => &mut self.lock_active,
            Target::Saver => &mut self.saver_active,
        };

        if *slot == value {
            return;
        }
        *slot = value;

        if self.active {
            self.presenter.show(&self.view());
        }
    }

    /// Re-select after mode/theme changes, refreshing the surface if shown.
    fn refresh_theme(&mut self) {
        self.select_theme();
        if self.active {
            self.presenter.show(&self.view());
        }
    }

    fn select_theme(&mut self) {
        self.theme = match self.settings.mode {
            _ if self.settings.themes.is_empty() => None,
            Mode::Blank => None,
            Mode::Single => Some(0),
            Mode::Random => Some(fastrand::usize(..self.settings.themes.len())),
        };
    }

    /// A different random theme, or `None` when there is nothing to switch to.
    fn next_theme(&self) -> Option<usize> {
        if self.settings.mode != Mode::Random || self.settings.themes.len() < 2 {
            return None;
        }

        let mut next = fastrand::usize(..self.settings.themes.len() - 1);
        if let Some(current) = self.theme
            && next >= current
        {
            next += 1;
        }
        Some(next)
    }
}
