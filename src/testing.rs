//! Recording test doubles for the daemon's seams.

use crate::domain::StatusMessage;
use crate::error::{DisplayError, StartError};
use crate::grab::InputGrab;
use crate::listener::{DisplayIdle, SessionBus};
use crate::presenter::{Presenter, UnlockOptions, View};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// Shared, cloneable log behind a mutex.
#[derive(Debug, Default)]
pub struct Shared<T>(Arc<Mutex<T>>);

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Shared<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}

#[derive(Debug, Default)]
pub struct PresenterLog {
    pub shown: Vec<View>,
    pub hidden: usize,
    pub prompts: Vec<UnlockOptions>,
    pub messages: Vec<StatusMessage>,
    /// What `prompt_unlock` answers.
    pub prompt_result: bool,
}

#[derive(Debug, Default, Clone)]
pub struct RecordingPresenter(Shared<PresenterLog>);

impl RecordingPresenter {
    pub fn log(&self) -> MutexGuard<'_, PresenterLog> {
        self.0.lock()
    }
}

impl Presenter for RecordingPresenter {
    fn show(&mut self, view: &View) {
        self.log().shown.push(view.clone());
    }

    fn hide(&mut self) {
        self.log().hidden += 1;
    }

    fn prompt_unlock(&mut self, options: &UnlockOptions) -> bool {
        let mut log = self.log();
        log.prompts.push(options.clone());
        log.prompt_result
    }

    fn show_message(&mut self, message: &StatusMessage) {
        self.log().messages.push(message.clone());
    }
}

#[derive(Debug)]
pub struct GrabLog {
    pub acquires: usize,
    pub releases: usize,
    pub held: bool,
    /// What `acquire` answers.
    pub succeed: bool,
}

impl Default for GrabLog {
    fn default() -> Self {
        Self {
            acquires: 0,
            releases: 0,
            held: false,
            succeed: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordingGrab(Shared<GrabLog>);

impl RecordingGrab {
    pub fn log(&self) -> MutexGuard<'_, GrabLog> {
        self.0.lock()
    }
}

impl InputGrab for RecordingGrab {
    fn acquire(&mut self) -> bool {
        let mut log = self.log();
        log.acquires += 1;
        if log.succeed {
            log.held = true;
        }
        log.succeed
    }

    fn release(&mut self) {
        let mut log = self.log();
        log.releases += 1;
        log.held = false;
    }

    fn is_held(&self) -> bool {
        self.log().held
    }
}

#[derive(Debug, Default)]
pub struct BusLog {
    pub acquired: bool,
    /// Name reported as taken by another instance.
    pub taken: bool,
    /// Every `ActiveChanged` emission, in order.
    pub emitted: Vec<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct RecordingBus(Shared<BusLog>);

impl RecordingBus {
    pub fn log(&self) -> MutexGuard<'_, BusLog> {
        self.0.lock()
    }
}

#[async_trait]
impl SessionBus for RecordingBus {
    async fn acquire(&mut self) -> Result<(), StartError> {
        let mut log = self.log();
        if log.taken {
            return Err(StartError::AlreadyOwned {
                name: "org.screensaverd.ScreenSaver".to_string(),
            });
        }
        log.acquired = true;
        Ok(())
    }

    fn emit_active_changed(&mut self, active: bool) {
        self.log().emitted.push(active);
    }
}

#[derive(Debug, Default)]
pub struct DisplayLog {
    pub acquired: bool,
    pub unavailable: bool,
    pub activation_enabled: Vec<bool>,
    pub timeouts: Vec<Duration>,
    pub saver_enabled: Vec<bool>,
    pub simulated: usize,
}

#[derive(Debug, Default, Clone)]
pub struct RecordingDisplay(Shared<DisplayLog>);

impl RecordingDisplay {
    pub fn log(&self) -> MutexGuard<'_, DisplayLog> {
        self.0.lock()
    }
}

impl DisplayIdle for RecordingDisplay {
    fn acquire(&mut self) -> Result<(), DisplayError> {
        let mut log = self.log();
        if log.unavailable {
            return Err(DisplayError::MissingExtension("MIT-SCREEN-SAVER"));
        }
        log.acquired = true;
        Ok(())
    }

    fn set_activation_enabled(&mut self, enabled: bool) {
        self.log().activation_enabled.push(enabled);
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.log().timeouts.push(timeout);
    }

    fn set_saver_enabled(&mut self, enabled: bool) {
        self.log().saver_enabled.push(enabled);
    }

    fn simulate_activity(&mut self) -> Result<(), DisplayError> {
        self.log().simulated += 1;
        Ok(())
    }
}

/// Counts WARN events.
struct WarnCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Number of WARN events emitted on this thread while `f` runs.
pub fn count_warnings(f: impl FnOnce()) -> usize {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&count)));
    tracing::subscriber::with_default(subscriber, f);
    count.load(Ordering::SeqCst)
}
