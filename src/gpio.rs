use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::descriptor::{EdgeDetect, PinDescriptor, PinKind};
use crate::error::AppError;
use crate::events::{EventBus, IoEvent};
use crate::io::IoSnapshot;

pub type LineRef = Arc<dyn LineHandle>;

/// Opens lines on the physical board.
pub trait GpioBackend: Send + Sync {
    fn open_output(&self, line: u32) -> Result<LineRef, AppError>;
    fn open_input(
        &self,
        line: u32,
        edge: EdgeDetect,
        debounce: Duration,
    ) -> Result<LineRef, AppError>;
}

/// An opened line. Reads and writes block until the hardware call completes.
pub trait LineHandle: Send + Sync {
    fn line(&self) -> u32;
    fn read_value(&self) -> Result<u8, AppError>;
    fn write_value(&self, value: u8) -> Result<(), AppError>;
    /// Starts forwarding level transitions, filtered by the line's edge policy, into `sink`.
    fn watch(&self, sink: WatchSink) -> Result<(), AppError>;
}

#[derive(Debug)]
pub struct LineNotification {
    pub name: String,
    pub line: u32,
    pub value: Result<u8, String>,
}

/// Sending half of the watch channel, bound to one descriptor.
#[derive(Debug, Clone)]
pub struct WatchSink {
    name: String,
    line: u32,
    tx: mpsc::UnboundedSender<LineNotification>,
}

impl WatchSink {
    pub fn new(name: String, line: u32, tx: mpsc::UnboundedSender<LineNotification>) -> Self {
        Self { name, line, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns false once the dispatcher is gone and the watch should stop.
    pub fn notify(&self, value: Result<u8, String>) -> bool {
        self.tx
            .send(LineNotification {
                name: self.name.clone(),
                line: self.line,
                value,
            })
            .is_ok()
    }
}

const WATCH_BACKOFF_MIN: Duration = Duration::from_millis(10);
const WATCH_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Paces a watch loop whose line keeps failing.
///
/// A failure is reported once until a different failure or a success; the wait before the
/// next attempt doubles up to one second.
#[derive(Debug, Default)]
pub struct WatchBackoff {
    last_error: Option<String>,
    wait: Duration,
}

impl WatchBackoff {
    /// Returns whether to report `message` and how long to wait before retrying.
    pub fn fail(&mut self, message: &str) -> (bool, Duration) {
        let report = self.last_error.as_deref() != Some(message);
        if report {
            self.last_error = Some(message.to_string());
        }
        self.wait = (self.wait * 2).clamp(WATCH_BACKOFF_MIN, WATCH_BACKOFF_MAX);
        (report, self.wait)
    }

    pub fn reset(&mut self) {
        self.last_error = None;
        self.wait = Duration::ZERO;
    }
}

#[derive(Clone)]
pub struct PinState {
    /// Absent in development mode.
    pub handle: Option<LineRef>,
    /// Last observed level for inputs, last written level for outputs.
    pub state: Option<u8>,
}

pub type StateMap = Arc<RwLock<FxHashMap<String, PinState>>>;

/// Live board: the validated pin list, the opened lines and their state.
pub struct BoardIo {
    pub(crate) config: Vec<PinDescriptor>,
    pub(crate) state: StateMap,
    pub(crate) emitter: EventBus,
    pub(crate) settings: Settings,
    pub(crate) data: Mutex<IoSnapshot>,
    // every opened line, including duplicates superseded in the state map
    lines: Vec<LineRef>,
    dispatcher: Option<JoinHandle<()>>,
}

impl BoardIo {
    /// Opens every pin in list order. A line that fails to open is logged and left without
    /// state; the remaining lines are still brought up.
    ///
    /// Must be called from within a tokio runtime outside development mode, where a
    /// dispatcher task is spawned to apply watch notifications.
    pub fn bring_up(
        config: Vec<PinDescriptor>,
        backend: Arc<dyn GpioBackend>,
        emitter: EventBus,
        settings: &Settings,
    ) -> Self {
        let mode = settings.mode;
        let state: StateMap = Arc::new(RwLock::new(FxHashMap::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut lines = Vec::with_capacity(config.len());

        for pin in &config {
            debug!(
                "setup line {} ({}) as {}",
                pin.gpio,
                pin.name,
                pin.kind.as_str()
            );

            if mode.is_development() {
                let entry = PinState {
                    handle: None,
                    state: match pin.kind {
                        PinKind::Output => Some(pin.init),
                        PinKind::Input => None,
                    },
                };
                state.write().insert(pin.name.clone(), entry);
                continue;
            }

            let opened = match pin.kind {
                PinKind::Output => open_output(backend.as_ref(), pin),
                PinKind::Input => open_input(backend.as_ref(), pin, &tx),
            };
            match opened {
                Ok(entry) => {
                    lines.extend(entry.handle.clone());
                    state.write().insert(pin.name.clone(), entry);
                }
                Err(e) => error!("setup line {} ({}): {e}", pin.gpio, pin.name),
            }
        }
        drop(tx);

        let dispatcher = if mode.is_development() {
            None
        } else {
            Some(tokio::spawn(dispatch(rx, state.clone(), emitter.clone())))
        };

        info!(
            "brought up {} of {} pins ({:?} mode)",
            state.read().len(),
            config.len(),
            mode
        );

        Self {
            config,
            state,
            emitter,
            settings: settings.clone(),
            data: Mutex::new(IoSnapshot::default()),
            lines,
            dispatcher,
        }
    }

    /// The validated pin list, in bring-up order.
    pub fn config(&self) -> &[PinDescriptor] {
        &self.config
    }

    pub fn state(&self) -> StateMap {
        self.state.clone()
    }

    pub fn emitter(&self) -> &EventBus {
        &self.emitter
    }

    pub fn pin_state(&self, name: &str) -> Option<u8> {
        self.state.read().get(name).and_then(|pin| pin.state)
    }

    /// Number of lines held open, duplicates included.
    pub fn open_line_count(&self) -> usize {
        self.lines.len()
    }
}

impl Drop for BoardIo {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

fn open_output(backend: &dyn GpioBackend, pin: &PinDescriptor) -> Result<PinState, AppError> {
    let handle = backend.open_output(pin.gpio)?;
    handle.write_value(pin.init)?;

    Ok(PinState {
        handle: Some(handle),
        state: Some(pin.init),
    })
}

fn open_input(
    backend: &dyn GpioBackend,
    pin: &PinDescriptor,
    tx: &mpsc::UnboundedSender<LineNotification>,
) -> Result<PinState, AppError> {
    let handle = backend.open_input(pin.gpio, pin.edge, pin.debounce_period())?;
    handle.watch(WatchSink::new(pin.name.clone(), pin.gpio, tx.clone()))?;

    Ok(PinState {
        handle: Some(handle),
        state: None,
    })
}

/// Sole writer of input state and sole publisher of watch events.
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<LineNotification>,
    state: StateMap,
    emitter: EventBus,
) {
    while let Some(notification) = rx.recv().await {
        let LineNotification { name, line, value } = notification;
        match value {
            Err(e) => {
                error!("watch {name} line {line}: {e}");
                emitter.publish(IoEvent::Error(format!("gpio {name} line {line}, {e}")));
            }
            Ok(level) => {
                let value = u8::from(level != 0);
                if let Some(pin) = state.write().get_mut(&name) {
                    pin.state = Some(value);
                }
                emitter.publish(IoEvent::Data { name, value });
            }
        }
    }
}
