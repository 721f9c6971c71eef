//! Display idle detection via the X11 MIT-SCREEN-SAVER extension.
//!
//! Polls `ScreenSaverQueryInfo` for the time since the last user input. Fires
//! once per idle period when the idle timeout is crossed, and reports input
//! whenever the counter drops between two polls.

use super::DisplayIdle;
use crate::domain::{Event, IdleSignal};
use crate::error::DisplayError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::screensaver::{self, ConnectionExt as _};
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

/// Settings shared with the polling task.
#[derive(Debug)]
struct IdleSettings {
    activation_enabled: AtomicBool,
    saver_enabled: AtomicBool,
    timeout_ms: AtomicU64,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            activation_enabled: AtomicBool::new(true),
            saver_enabled: AtomicBool::new(true),
            timeout_ms: AtomicU64::new(0),
        }
    }
}

impl IdleSettings {
    fn snapshot(&self) -> IdlePolicy {
        IdlePolicy {
            activation_enabled: self.activation_enabled.load(Ordering::Relaxed),
            saver_enabled: self.saver_enabled.load(Ordering::Relaxed),
            timeout: Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time view of the idle settings.
#[derive(Debug, Clone, Copy)]
struct IdlePolicy {
    activation_enabled: bool,
    saver_enabled: bool,
    /// Zero disables idle activation.
    timeout: Duration,
}

/// Edge detector: one signal per idle period, plus input detection.
#[derive(Debug, Default)]
struct IdleTracker {
    fired: bool,
    last_idle: Option<Duration>,
}

impl IdleTracker {
    fn update(&mut self, idle: Duration, policy: IdlePolicy) -> Option<IdleSignal> {
        // Grabs do not stop the server's idle counter, so input while locked
        // shows up here too.
        let resumed = self.last_idle.is_some_and(|last| idle < last);
        self.last_idle = Some(idle);

        if policy.timeout.is_zero() || idle < policy.timeout {
            if self.fired {
                debug!("User input resumed after idle period");
            }
            self.fired = false;
            return resumed.then_some(IdleSignal::Resumed);
        }

        if self.fired {
            return None;
        }

        // Mark the period as handled even when activation is off, so that
        // enabling activation mid-period does not fire immediately.
        self.fired = true;

        if !policy.activation_enabled {
            debug!("Idle for {:?} but idle activation is disabled", idle);
            return None;
        }

        Some(if policy.saver_enabled {
            IdleSignal::Activate
        } else {
            IdleSignal::Lock
        })
    }
}

/// X11 implementation of [`DisplayIdle`].
pub struct X11Idle {
    settings: Arc<IdleSettings>,
    events: mpsc::Sender<Event>,
    poll_interval: Duration,
    conn: Option<Arc<RustConnection>>,
    task: Option<JoinHandle<()>>,
}

impl X11Idle {
    pub fn new(events: mpsc::Sender<Event>, poll_interval: Duration) -> Self {
        Self {
            settings: Arc::new(IdleSettings::default()),
            events,
            poll_interval,
            conn: None,
            task: None,
        }
    }
}

impl DisplayIdle for X11Idle {
    fn acquire(&mut self) -> Result<(), DisplayError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or(DisplayError::NoScreen(screen_num))?;

        if conn
            .extension_information(screensaver::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(DisplayError::MissingExtension(screensaver::X11_EXTENSION_NAME));
        }

        let version = conn.screensaver_query_version(1, 1)?.reply()?;
        info!(
            "Using {} {}.{}",
            screensaver::X11_EXTENSION_NAME,
            version.server_major_version,
            version.server_minor_version
        );

        let conn = Arc::new(conn);
        self.task = Some(tokio::spawn(poll_idle(
            Arc::clone(&conn),
            root,
            Arc::clone(&self.settings),
            self.events.clone(),
            self.poll_interval,
        )));
        self.conn = Some(conn);

        Ok(())
    }

    fn set_activation_enabled(&mut self, enabled: bool) {
        self.settings
            .activation_enabled
            .store(enabled, Ordering::Relaxed);
    }

    fn set_timeout(&mut self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.settings.timeout_ms.store(millis, Ordering::Relaxed);
    }

    fn set_saver_enabled(&mut self, enabled: bool) {
        self.settings.saver_enabled.store(enabled, Ordering::Relaxed);
    }

    fn simulate_activity(&mut self) -> Result<(), DisplayError> {
        let conn = self.conn.as_ref().ok_or(DisplayError::NotAcquired)?;

        // Suspending and resuming resets the server's idle counter.
        conn.screensaver_suspend(1)?.check()?;
        conn.screensaver_suspend(0)?.check()?;
        trace!("Simulated user activity");
        Ok(())
    }
}

impl Drop for X11Idle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_idle(
    conn: Arc<RustConnection>,
    root: Window,
    settings: Arc<IdleSettings>,
    events: mpsc::Sender<Event>,
    interval: Duration,
) {
    let mut tracker = IdleTracker::default();
    let mut ticker = tokio::time::interval(interval);

    info!("Display idle watcher started, polling every {:?}", interval);

    loop {
        ticker.tick().await;

        let idle = match query_idle(&conn, root) {
            Ok(idle) => idle,
            Err(e) => {
                warn!("Failed to query idle time: {}", e);
                continue;
            }
        };

        if let Some(signal) = tracker.update(idle, settings.snapshot()) {
            match signal {
                IdleSignal::Resumed => trace!("User input detected"),
                _ => info!("Idle for {:?}, sending {:?}", idle, signal),
            }
            if events.send(Event::Display(signal)).await.is_err() {
                debug!("Coordinator gone, stopping display idle watcher");
                return;
            }
        }
    }
}

fn query_idle(conn: &RustConnection, root: Window) -> Result<Duration, DisplayError> {
    let info = conn.screensaver_query_info(root)?.reply()?;
    Ok(Duration::from_millis(u64::from(info.ms_since_user_input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(timeout_secs: u64) -> IdlePolicy {
        IdlePolicy {
            activation_enabled: true,
            saver_enabled: true,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[test]
    fn test_fires_once_per_idle_period() {
        let mut tracker = IdleTracker::default();
        let policy = policy(60);

        assert_eq!(tracker.update(Duration::from_secs(10), policy), None);
        assert_eq!(
            tracker.update(Duration::from_secs(60), policy),
            Some(IdleSignal::Activate)
        );
        assert_eq!(tracker.update(Duration::from_secs(90), policy), None);

        // Input resets the period
        assert_eq!(
            tracker.update(Duration::from_secs(1), policy),
            Some(IdleSignal::Resumed)
        );
        assert_eq!(
            tracker.update(Duration::from_secs(61), policy),
            Some(IdleSignal::Activate)
        );
    }

    #[test]
    fn test_saver_disabled_locks() {
        let mut tracker = IdleTracker::default();
        let policy = IdlePolicy {
            saver_enabled: false,
            ..policy(60)
        };

        assert_eq!(
            tracker.update(Duration::from_secs(120), policy),
            Some(IdleSignal::Lock)
        );
    }

    #[test]
    fn test_activation_disabled() {
        let mut tracker = IdleTracker::default();
        let disabled = IdlePolicy {
            activation_enabled: false,
            ..policy(60)
        };

        assert_eq!(tracker.update(Duration::from_secs(120), disabled), None);
        // Enabling mid-period waits for the next period
        assert_eq!(tracker.update(Duration::from_secs(130), policy(60)), None);
    }

    #[test]
    fn test_input_after_fired_period_reports_resume() {
        let mut tracker = IdleTracker::default();
        let policy = policy(60);

        assert_eq!(
            tracker.update(Duration::from_secs(61), policy),
            Some(IdleSignal::Activate)
        );
        assert_eq!(
            tracker.update(Duration::from_millis(10), policy),
            Some(IdleSignal::Resumed)
        );
        // Counter still rising: no new input
        assert_eq!(tracker.update(Duration::from_secs(2), policy), None);
    }

    #[test]
    fn test_input_reported_without_idle_timeout() {
        let mut tracker = IdleTracker::default();

        // Locked over the bus with idle activation off: input still counts.
        assert_eq!(tracker.update(Duration::from_secs(30), policy(0)), None);
        assert_eq!(
            tracker.update(Duration::from_millis(200), policy(0)),
            Some(IdleSignal::Resumed)
        );
    }

    #[test]
    fn test_zero_timeout_never_fires() {
        let mut tracker = IdleTracker::default();
        assert_eq!(tracker.update(Duration::from_secs(86_400), policy(0)), None);
    }

    #[test]
    fn test_settings_snapshot() {
        let (tx, _rx) = mpsc::channel(1);
        let mut idle = X11Idle::new(tx, Duration::from_secs(5));
        idle.set_timeout(Duration::from_secs(300));
        idle.set_saver_enabled(false);
        idle.set_activation_enabled(false);

        let snapshot = idle.settings.snapshot();
        assert_eq!(snapshot.timeout, Duration::from_secs(300));
        assert!(!snapshot.saver_enabled);
        assert!(!snapshot.activation_enabled);
    }

    #[test]
    fn test_simulate_activity_requires_acquire() {
        let (tx, _rx) = mpsc::channel(1);
        let mut idle = X11Idle::new(tx, Duration::from_secs(5));
        assert!(matches!(
            idle.simulate_activity(),
            Err(DisplayError::NotAcquired)
        ));
    }
}
