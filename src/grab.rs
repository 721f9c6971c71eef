//! Exclusive keyboard and pointer capture.

use crate::error::DisplayError;
use std::thread::sleep;
use tokio::runtime::{Handle, RuntimeFlavor};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, EventMask, GrabMode, GrabStatus, Window};
use x11rb::rust_connection::RustConnection;
use x11rb::{CURRENT_TIME, NONE};

/// Attempts before giving up on a grab.
const GRAB_ATTEMPTS: u32 = 4;

/// Pause between grab attempts. Another client (a menu, a drag) usually
/// drops its own grab within this window.
const GRAB_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Run `try_once` up to `attempts` times, pausing `delay` between refusals.
///
/// X requests here are synchronous round trips. On a multi-thread runtime the
/// pause runs under `block_in_place`, so other tasks move off this worker.
fn retry_grab(
    attempts: u32,
    delay: Duration,
    mut try_once: impl FnMut() -> Result<bool, DisplayError>,
) -> Result<bool, DisplayError> {
    for attempt in 1..=attempts {
        if try_once()? {
            debug!("Input grabbed on attempt {}", attempt);
            return Ok(true);
        }
        if attempt < attempts {
            pause(delay);
        }
    }
    Ok(false)
}

fn pause(delay: Duration) {
    let multi_thread = Handle::try_current()
        .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);

    if multi_thread {
        tokio::task::block_in_place(|| sleep(delay));
    } else {
        sleep(delay);
    }
}

/// Acquires and releases exclusive input capture.
pub trait InputGrab: Send {
    /// Try to capture keyboard and pointer. Best-effort, bounded.
    fn acquire(&mut self) -> bool;

    /// Release any capture. Safe to call when nothing is held.
    fn release(&mut self);

    /// Whether a capture is currently held.
    fn is_held(&self) -> bool;
}

/// Keyboard and pointer grab on the X root window.
pub struct X11Grab {
    conn: RustConnection,
    root: Window,
    held: bool,
    dry_run: bool,
}

impl X11Grab {
    /// Connect to the X display named by `$DISPLAY`.
    pub fn connect(dry_run: bool) -> Result<Self, DisplayError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or(DisplayError::NoScreen(screen_num))?;

        info!("Input grab ready on root window 0x{:x}", root);

        Ok(Self {
            conn,
            root,
            held: false,
            dry_run,
        })
    }

    /// One grab attempt. `Ok(false)` means another client holds a grab.
    fn try_grab(&self) -> Result<bool, DisplayError> {
        let keyboard = self
            .conn
            .grab_keyboard(false, self.root, CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)?
            .reply()?;

        if keyboard.status != GrabStatus::SUCCESS {
            debug!("Keyboard grab refused: {:?}", keyboard.status);
            return Ok(false);
        }

        let pointer = self
            .conn
            .grab_pointer(
                false,
                self.root,
                EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::POINTER_MOTION,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                NONE,
                NONE,
                CURRENT_TIME,
            )?
            .reply()?;

        if pointer.status != GrabStatus::SUCCESS {
            debug!("Pointer grab refused: {:?}", pointer.status);
            // Never keep half a grab
            self.conn.ungrab_keyboard(CURRENT_TIME)?;
            self.conn.flush()?;
            return Ok(false);
        }

        Ok(true)
    }

    fn ungrab(&self) -> Result<(), DisplayError> {
        self.conn.ungrab_pointer(CURRENT_TIME)?;
        self.conn.ungrab_keyboard(CURRENT_TIME)?;
        self.conn.flush()?;
        Ok(())
    }
}

impl InputGrab for X11Grab {
    fn acquire(&mut self) -> bool {
        if self.held {
            trace!("Input grab already held");
            return true;
        }

        if self.dry_run {
            info!("[DRY RUN] Would grab keyboard and pointer");
            self.held = true;
            return true;
        }

        match retry_grab(GRAB_ATTEMPTS, GRAB_RETRY_DELAY, || self.try_grab()) {
            Ok(true) => {
                self.held = true;
                true
            }
            Ok(false) => {
                debug!("Could not grab input after {} attempts", GRAB_ATTEMPTS);
                false
            }
            Err(e) => {
                debug!("Input grab failed: {}", e);
                false
            }
        }
    }

    fn release(&mut self) {
        if !self.held {
            trace!("No input grab to release");
            return;
        }

        self.held = false;

        if self.dry_run {
            info!("[DRY RUN] Would release keyboard and pointer");
            return;
        }

        match self.ungrab() {
            Ok(()) => debug!("Input grab released"),
            Err(e) => warn!("Failed to release input grab: {}", e),
        }
    }

    fn is_held(&self) -> bool {
        self.held
    }
}
