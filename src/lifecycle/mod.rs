//! Lifecycle controller for the listening service.
//!
//! The controller owns configuration and the platform collaborators; the
//! event loop runs on a dedicated thread and reports back through the shared
//! state. Observers follow the lifecycle through `subscribe`.
//!
//! ```text
//! Stopped --start--> Starting --bind ok--> Running --stop/fatal--> Stopping --> Stopped
//!                       |
//!                       +--bind failure (ERROR)--> Stopped
//! ```

mod collaborators;
mod resolve;

pub use collaborators::{
    ErrorHandler, Fix, KeepAlive, LocationProvider, LogKeepAlive, LoggingProvider, NoopMonitor,
    OomScoreMonitor, PrivilegedMonitor, ProviderGuard, DEFAULT_OOM_SCORE_ADJ,
};
pub use resolve::{
    parse_port, resolve_bind_targets, InterfaceTable, Resolution, SystemInterfaces,
};

use crate::config::{Settings, FOREGROUND_SERVICE, OOM_ADJ};
use crate::error::ServiceError;
use crate::runtime::{BindTarget, Dispatcher, EventLoop, LoopOptions, StopSignal};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Builds a fresh dispatcher for each run of the loop.
pub type DispatcherFactory = Arc<dyn Fn() -> Box<dyn Dispatcher> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started,
    Stopped,
    Error(String),
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Started => "STARTED",
            LifecycleEvent::Stopped => "STOPPED",
            LifecycleEvent::Error(_) => "ERROR",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Error(message) => write!(f, "ERROR: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

struct State {
    run: RunState,
    stop: Option<StopSignal>,
    handle: Option<JoinHandle<()>>,
    last_error: Option<(String, DateTime<Utc>)>,
    local_addrs: Vec<SocketAddr>,
    keep_alive_active: bool,
    monitor_active: bool,
}

struct Shared {
    settings: Settings,
    options: LoopOptions,
    dispatcher: DispatcherFactory,
    keep_alive: Arc<dyn KeepAlive>,
    monitor: Arc<dyn PrivilegedMonitor>,
    provider: Arc<dyn LocationProvider>,
    interfaces: Arc<dyn InterfaceTable>,
    state: Mutex<State>,
    stopped: Condvar,
    subscribers: Mutex<Vec<Sender<LifecycleEvent>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(event = event.as_str(), "Lifecycle event");
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn report_error(&self, message: String) {
        error!("{message}");
        self.state().last_error = Some((message.clone(), Utc::now()));
        self.emit(LifecycleEvent::Error(message));
    }

    /// Listeners are up: switch on collaborators unless a stop already
    /// arrived while starting.
    fn on_started(self: &Arc<Self>, local_addrs: Vec<SocketAddr>) {
        let foreground = self.settings.get_bool(FOREGROUND_SERVICE, false);
        let oom_adj = self.settings.get_bool(OOM_ADJ, false);

        {
            let mut state = self.state();
            if state.run != RunState::Starting {
                debug!("Stop requested during startup");
                return;
            }
            state.run = RunState::Running;
            state.local_addrs = local_addrs;
            state.keep_alive_active = foreground;
            state.monitor_active = oom_adj;
        }

        if foreground {
            self.keep_alive.start();
        }
        if oom_adj {
            let shared = Arc::downgrade(self);
            self.monitor.start(Box::new(move |message: String| {
                if let Some(shared) = Weak::upgrade(&shared) {
                    shared.report_error(message);
                }
            }));
        }

        info!("Service started");
        self.emit(LifecycleEvent::Started);
    }
}

/// Publishes the stop exactly once when the loop thread exits, however it
/// exits.
struct StoppedReport {
    shared: Arc<Shared>,
}

impl Drop for StoppedReport {
    fn drop(&mut self) {
        let (keep_alive, monitor) = {
            let mut state = self.shared.state();
            (
                std::mem::take(&mut state.keep_alive_active),
                std::mem::take(&mut state.monitor_active),
            )
        };
        if monitor {
            self.shared.monitor.stop();
        }
        if keep_alive {
            self.shared.keep_alive.stop();
        }

        {
            let mut state = self.shared.state();
            state.run = RunState::Stopped;
            state.stop = None;
            state.local_addrs.clear();
        }
        self.shared.stopped.notify_all();

        info!("Service stopped");
        self.shared.emit(LifecycleEvent::Stopped);
    }
}

fn serve(shared: &Arc<Shared>, targets: &[BindTarget], stop: StopSignal) -> Result<(), ServiceError> {
    let mut event_loop = EventLoop::bind(targets, shared.options, (shared.dispatcher)(), stop)?;
    let _provider = ProviderGuard::register(shared.provider.clone())?;

    shared.on_started(event_loop.local_addrs());
    event_loop.run()
}

fn run_loop(shared: Arc<Shared>, targets: Vec<BindTarget>, stop: StopSignal) {
    let report = StoppedReport {
        shared: shared.clone(),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| serve(&shared, &targets, stop)));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => shared.report_error(e.to_string()),
        Err(payload) => {
            shared.report_error(ServiceError::Panicked(panic_message(payload.as_ref())).to_string())
        }
    }

    drop(report);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct ControllerBuilder {
    settings: Settings,
    options: LoopOptions,
    dispatcher: DispatcherFactory,
    keep_alive: Arc<dyn KeepAlive>,
    monitor: Arc<dyn PrivilegedMonitor>,
    provider: Arc<dyn LocationProvider>,
    interfaces: Arc<dyn InterfaceTable>,
}

impl ControllerBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn PrivilegedMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn interfaces(mut self, interfaces: Arc<dyn InterfaceTable>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn build(self) -> Controller {
        Controller {
            shared: Arc::new(Shared {
                settings: self.settings,
                options: self.options,
                dispatcher: self.dispatcher,
                keep_alive: self.keep_alive,
                monitor: self.monitor,
                provider: self.provider,
                interfaces: self.interfaces,
                state: Mutex::new(State {
                    run: RunState::Stopped,
                    stop: None,
                    handle: None,
                    last_error: None,
                    local_addrs: Vec::new(),
                    keep_alive_active: false,
                    monitor_active: false,
                }),
                stopped: Condvar::new(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Starts and stops the listening service.
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    pub fn builder<F, D>(dispatcher: F) -> ControllerBuilder
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Dispatcher + 'static,
    {
        ControllerBuilder {
            settings: Settings::new(),
            options: LoopOptions::default(),
            dispatcher: Arc::new(move || Box::new(dispatcher()) as Box<dyn Dispatcher>),
            keep_alive: Arc::new(LogKeepAlive),
            monitor: Arc::new(NoopMonitor),
            provider: Arc::new(LoggingProvider::new()),
            interfaces: Arc::new(SystemInterfaces),
        }
    }

    /// True from `start` until the loop has fully stopped.
    pub fn is_running(&self) -> bool {
        self.state() != RunState::Stopped
    }

    pub fn state(&self) -> RunState {
        self.shared.state().run
    }

    /// Resolve bind targets and launch the loop thread. Does nothing if a
    /// loop is already active.
    pub fn start(&self) {
        let stop = StopSignal::new();
        let previous = {
            let mut state = self.shared.state();
            if state.run != RunState::Stopped {
                debug!(state = ?state.run, "Start ignored, already running");
                return;
            }
            state.run = RunState::Starting;
            state.stop = Some(stop.clone());
            state.handle.take()
        };

        // The previous loop thread has already reported its stop
        if let Some(handle) = previous {
            let _ = handle.join();
        }

        let resolution = resolve_bind_targets(&self.shared.settings, self.shared.interfaces.as_ref());
        for e in resolution.errors {
            self.shared.report_error(e.to_string());
        }

        let shared = self.shared.clone();
        let targets = resolution.targets;
        let spawned = thread::Builder::new()
            .name("geofix-loop".to_string())
            .spawn(move || run_loop(shared, targets, stop));

        match spawned {
            Ok(handle) => self.shared.state().handle = Some(handle),
            Err(e) => {
                self.shared.report_error(ServiceError::Spawn(e).to_string());
                let mut state = self.shared.state();
                state.run = RunState::Stopped;
                state.stop = None;
                drop(state);
                self.shared.stopped.notify_all();
            }
        }
    }

    /// Ask the loop to stop and return without waiting.
    pub fn stop(&self) {
        let mut state = self.shared.state();
        match state.run {
            RunState::Starting | RunState::Running => {
                state.run = RunState::Stopping;
                if let Some(stop) = &state.stop {
                    stop.request();
                }
                debug!("Stop requested");
            }
            RunState::Stopping | RunState::Stopped => {}
        }
    }

    /// Block until the loop has stopped or `timeout` elapses. Returns whether
    /// the service is stopped.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let state = self.shared.state();
        let (state, _) = self
            .shared
            .stopped
            .wait_timeout_while(state, timeout, |s| s.run != RunState::Stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.run == RunState::Stopped
    }

    /// Most recent error message, kept until the next error replaces it.
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .state()
            .last_error
            .as_ref()
            .map(|(message, _)| message.clone())
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.shared.state().last_error.as_ref().map(|(_, at)| *at)
    }

    /// Addresses the listeners are bound to while running.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.shared.state().local_addrs.clone()
    }

    /// Receive every lifecycle event published from now on.
    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
        let handle = self.shared.state().handle.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
