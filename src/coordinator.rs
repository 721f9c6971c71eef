//! Top-level wiring between the activity sources and the lock manager.
//!
//! The coordinator owns every component and runs on a single task. Other
//! tasks (the bus interface, logind, the X11 idle poller, the unlock prompt)
//! only talk to it through [`Event`]s, so state changes are serialized.
//!
//! Locking and saving follow the same two-phase pattern: the manager flag is
//! raised first, then the listener is asked to go active. If the listener
//! refuses (input could not be grabbed, the manager rejected the change) the
//! flag is put back to what it was before the attempt.
//!
//! While the unlock prompt is up the input grab is handed over to it, since an
//! exclusive grab would swallow the password. It is taken back if the prompt
//! exits without authenticating.

use crate::config::Config;
use crate::domain::{Event, IdleSignal, ListenerEvent};
use crate::error::StartError;
use crate::grab::InputGrab;
use crate::listener::{DisplayIdle, SessionBus, SessionListener};
use crate::manager::{LockManager, ManagerEvent, Target};
use crate::prefs::Preferences;
use crate::presenter::Presenter;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Period of the manager's timer checks (lock-with-saver, theme cycling).
const MANAGER_TICK: Duration = Duration::from_secs(1);

/// Result of a lock or save-screen request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The display went active.
    Activated,
    /// Already active; only the flag was updated.
    AlreadyActive,
    /// The activation was refused and the flag restored.
    Failed,
    /// Locking is disabled in preferences.
    Disabled,
}

/// The lock manager together with the input grab it needs while active.
struct DisplayControl {
    manager: LockManager,
    grab: Box<dyn InputGrab>,
    /// Deferred grab release after deactivation.
    release_at: Option<Instant>,
    release_delay: Duration,
}

impl DisplayControl {
    /// Handler for the listener's active flag.
    fn on_active_changed(&mut self, active: bool) -> bool {
        if active {
            if !self.grab.acquire() {
                debug!("Unable to grab keyboard or mouse, not activating");
                return false;
            }
            self.release_at = None;
        }

        match self.manager.set_active(active) {
            Ok(event) => {
                trace!("Manager set_active({}) -> {:?}", active, event);
                if !active {
                    self.schedule_release();
                }
                true
            }
            Err(e) => {
                debug!("Unable to set manager active={}: {}", active, e);
                if active {
                    self.grab.release();
                }
                false
            }
        }
    }

    fn schedule_release(&mut self) {
        if self.grab.is_held() && self.release_at.is_none() {
            debug!("Releasing input grab in {:?}", self.release_delay);
            self.release_at = Some(Instant::now() + self.release_delay);
        }
    }

    /// Let the unlock prompt take the input.
    fn hand_over_grab(&mut self) {
        debug!("Handing input over to the unlock prompt");
        self.release_now();
    }

    /// Take the input back after the prompt went away while still locked.
    fn reclaim_grab(&mut self) {
        if !self.manager.is_active() || self.grab.is_held() {
            return;
        }
        if !self.grab.acquire() {
            warn!("Unable to grab keyboard or mouse again after the unlock prompt");
        }
    }

    fn release_now(&mut self) {
        self.release_at = None;
        if self.grab.is_held() {
            self.grab.release();
        }
    }
}

/// Owns and wires the listener, the display idle channel, and the manager.
///
/// Fields drop in reverse order of acquisition: the grab is released in
/// `Drop`, then the display channel, the session listener, and preferences.
pub struct Coordinator {
    display: Box<dyn DisplayIdle>,
    listener: SessionListener,
    control: DisplayControl,
    prefs: Preferences,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Build the component graph and apply the current preferences.
    ///
    /// Nothing is acquired yet; call [`Coordinator::start`] next.
    pub fn new(
        prefs: Preferences,
        bus: Box<dyn SessionBus>,
        display: Box<dyn DisplayIdle>,
        grab: Box<dyn InputGrab>,
        presenter: Box<dyn Presenter>,
        shutdown: CancellationToken,
    ) -> Self {
        let config = prefs.snapshot();

        let mut coordinator = Self {
            prefs,
            listener: SessionListener::new(bus),
            display,
            control: DisplayControl {
                manager: LockManager::new(presenter),
                grab,
                release_at: None,
                release_delay: config.grab_release_delay(),
            },
            shutdown,
        };

        coordinator.update_from_prefs(&config);
        coordinator.control.manager.mark_configured();
        coordinator
    }

    /// Claim the session channel, then start watching the display.
    ///
    /// Losing the session channel is fatal. The display channel is not:
    /// without it only idle activation is lost.
    pub async fn start(&mut self) -> Result<(), StartError> {
        self.listener.acquire().await?;

        if let Err(e) = self.display.acquire() {
            warn!("Display idle detection unavailable: {}", e);
        }

        info!("Coordinator started");
        Ok(())
    }

    pub fn manager(&self) -> &LockManager {
        &self.control.manager
    }

    pub fn listener(&self) -> &SessionListener {
        &self.listener
    }

    /// When the deferred grab release fires, if one is pending.
    pub fn pending_grab_release(&self) -> Option<Instant> {
        self.control.release_at
    }

    /// Lock the session.
    pub fn request_lock(&mut self) -> ActivationOutcome {
        if !self.prefs.current().lock_enabled {
            debug!("Locking disabled, ignoring lock request");
            return ActivationOutcome::Disabled;
        }

        self.activate(Target::Lock)
    }

    /// Start the saver without locking.
    pub fn request_save_screen(&mut self) -> ActivationOutcome {
        self.activate(Target::Saver)
    }

    /// Treat the call as user input: reset display idle and ask to unlock.
    pub fn simulate_user_activity(&mut self) {
        if let Err(e) = self.display.simulate_activity() {
            debug!("Could not reset display idle time: {}", e);
        }

        self.request_unlock();
    }

    /// Dismiss the saver, or raise the unlock prompt when locked.
    fn request_unlock(&mut self) {
        let prompting = self.control.manager.unlock_needs_prompt();
        if prompting {
            self.control.hand_over_grab();
        }

        if let Some(event) = self.control.manager.request_unlock() {
            self.on_manager_event(event);
        }

        if prompting && !self.control.manager.prompt_up() {
            self.control.reclaim_grab();
        }
    }

    fn activate(&mut self, target: Target) -> ActivationOutcome {
        let pending = self.control.manager.begin_activation(target);

        if self.control.manager.is_active() {
            self.control.manager.commit(pending);
            debug!("Already active, {:?} flag set", target);
            return ActivationOutcome::AlreadyActive;
        }

        let control = &mut self.control;
        let accepted = self
            .listener
            .set_active(true, |active| control.on_active_changed(active));

        if accepted {
            self.control.manager.commit(pending);
            ActivationOutcome::Activated
        } else {
            self.control.manager.rollback(pending);
            warn!("Unable to activate for {:?}", target);
            ActivationOutcome::Failed
        }
    }

    /// Apply a preferences snapshot to every component.
    pub fn update_from_prefs(&mut self, config: &Config) {
        let manager = &mut self.control.manager;
        manager.set_lock_enabled(config.lock_enabled);
        manager.set_lock_with_saver_enabled(config.lock_with_saver_enabled);
        manager.set_lock_timeout(config.lock_timeout());
        manager.set_logout_enabled(config.logout_enabled);
        manager.set_logout_timeout(config.logout_timeout());
        manager.set_logout_command(config.logout_command.clone());
        manager.set_keyboard_enabled(config.keyboard_enabled);
        manager.set_keyboard_command(config.keyboard_command.clone());
        manager.set_status_message_enabled(config.status_message_enabled);
        manager.set_user_switch_enabled(config.user_switch_enabled);
        manager.set_cycle_timeout(config.cycle_timeout());
        manager.set_mode(config.mode);
        manager.set_saver_enabled(config.saver_enabled);
        manager.set_themes(config.themes.clone());

        self.listener
            .set_activation_enabled(config.idle_activation_enabled);
        self.listener
            .set_sleep_activation_enabled(config.sleep_activation_enabled);

        self.display
            .set_activation_enabled(config.idle_activation_enabled);
        self.display.set_timeout(config.idle_timeout());
        self.display.set_saver_enabled(config.saver_enabled);

        self.control.release_delay = config.grab_release_delay();

        debug!(
            "Preferences applied (lock={}, idle_activation={}, idle_timeout={}s)",
            config.lock_enabled, config.idle_activation_enabled, config.idle_timeout_seconds
        );
    }

    /// Dispatch one event.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Session(signal) => {
                if let Some(event) = self.listener.normalize(signal) {
                    self.on_listener_event(event);
                }
            }
            Event::Display(IdleSignal::Activate) => {
                self.request_save_screen();
            }
            Event::Display(IdleSignal::Lock) => {
                self.request_lock();
            }
            Event::Display(IdleSignal::Resumed) => {
                if self.control.manager.is_active() {
                    self.request_unlock();
                } else {
                    trace!("User input while inactive");
                }
            }
            Event::UnlockFinished(authenticated) => {
                match self.control.manager.unlock_finished(authenticated) {
                    Some(event) => self.on_manager_event(event),
                    None => self.control.reclaim_grab(),
                }
            }
        }
    }

    fn on_listener_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Lock => {
                self.request_lock();
            }
            ListenerEvent::Activate => {
                self.request_save_screen();
            }
            ListenerEvent::Deactivate => {
                if let Some(event) = self.control.manager.unlock() {
                    self.on_manager_event(event);
                }
                self.force_inactive();
            }
            ListenerEvent::Cycle => {
                self.control.manager.cycle();
            }
            ListenerEvent::Quit => self.quit(),
            ListenerEvent::ThrottleChanged(throttled) => {
                self.control.manager.set_throttled(throttled);
            }
            ListenerEvent::ActiveChanged { active, reply } => {
                let control = &mut self.control;
                let accepted = self
                    .listener
                    .set_active(active, |active| control.on_active_changed(active));

                if !accepted {
                    debug!("SetActive({}) not applied", active);
                }

                if let Some(reply) = reply
                    && reply.send(accepted).is_err()
                {
                    debug!("SetActive caller went away");
                }
            }
            ListenerEvent::SimulateActivity => self.simulate_user_activity(),
            ListenerEvent::ShowMessage(message) => self.control.manager.show_message(message),
        }
    }

    fn on_manager_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Activated => trace!("Manager activated"),
            ManagerEvent::Deactivated => {
                self.control.schedule_release();
                self.force_inactive();
            }
        }
    }

    /// Bring the listener's flag in line with an inactive manager.
    fn force_inactive(&mut self) {
        let control = &mut self.control;
        self.listener
            .set_active(false, |active| control.on_active_changed(active));
    }

    fn quit(&mut self) {
        info!("Quit requested");
        self.force_inactive();
        self.control.release_now();
        self.shutdown.cancel();
    }

    /// Process events until quit, shutdown, or every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let shutdown = self.shutdown.clone();
        let mut tick = tokio::time::interval(MANAGER_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prefs_open = true;

        info!("Coordinator running");

        loop {
            let release_at = self.control.release_at;

            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutting down");
                    break;
                }
                // The owned bus, display and presenter keep senders alive,
                // so the queue never closes while the coordinator runs.
                Some(event) = events.recv() => self.handle_event(event),
                changed = self.prefs.changed(), if prefs_open => match changed {
                    Some(config) => self.update_from_prefs(&config),
                    None => {
                        debug!("Preferences loader gone, keeping current settings");
                        prefs_open = false;
                    }
                },
                () = release_deadline(release_at) => {
                    debug!("Releasing input grab");
                    self.control.release_now();
                }
                _ = tick.tick() => {
                    self.control.manager.poll(std::time::Instant::now());
                }
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.control.release_now();
        debug!("Coordinator torn down");
    }
}

async fn release_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
