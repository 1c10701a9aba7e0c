use log::warn;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{FairMutex, Mutex};

use crate::descriptor::EdgeDetect;
use crate::error::AppError;
use crate::gpio::{GpioBackend, LineHandle, LineRef, WatchBackoff, WatchSink};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

/// Backend talking to a gpiochip character device through libgpiod.
pub struct LibgpiodBackend {
    chip: PathBuf,
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &PathBuf, line_cfg: &line::Config) -> Result<Self, AppError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &PathBuf) -> Result<Chip, AppError> {
        Chip::open(path).map_err(|e| AppError::Gpio(format!("open chip {}: {e}", path.display())))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::Gpio(format!("request lines: {e}")))
    }
}

pub struct LibgpiodLine {
    line: u32,
    output: bool,
    edge: EdgeDetect,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
    listener: Mutex<Option<EdgeListener>>,
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        line: u32,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        sink: WatchSink,
    ) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::Gpio(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            let mut backoff = WatchBackoff::default();
            while !cancel_flag.load(Ordering::Relaxed) {
                let hdl = gpiod_handle.lock();
                let req = &hdl.request;

                let has_event =
                    match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(v) => v,
                        Err(e) => {
                            let message = format!("wait edge events: {e}");
                            let (report, wait) = backoff.fail(&message);
                            if report {
                                warn!("{message} for line {line}");
                                if !sink.notify(Err(message)) {
                                    break;
                                }
                            }
                            drop(hdl);
                            std::thread::sleep(wait);
                            continue;
                        }
                    };
                if !has_event {
                    continue;
                }

                let events = match req.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        let message = format!("read edge events: {e}");
                        let (report, wait) = backoff.fail(&message);
                        if report {
                            warn!("{message} for line {line}");
                            if !sink.notify(Err(message)) {
                                break;
                            }
                        }
                        drop(hdl);
                        std::thread::sleep(wait);
                        continue;
                    }
                };
                backoff.reset();
                for evt in events {
                    let evt = match evt {
                        Ok(e) => e,
                        Err(_) => continue,
                    };
                    let value = match evt.event_type() {
                        Ok(line::EdgeKind::Rising) => 1,
                        Ok(line::EdgeKind::Falling) => 0,
                        Err(_) => continue,
                    };

                    if !sink.notify(Ok(value)) {
                        // dispatcher is gone, nobody listens any more
                        cancel_flag.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LibgpiodBackend {
    pub fn new(chip: impl Into<PathBuf>) -> Result<Self, AppError> {
        let chip = chip.into();
        if !chip.exists() {
            return Err(AppError::Gpio(format!(
                "gpio chip {} does not exist",
                chip.display()
            )));
        }
        Ok(Self { chip })
    }

    fn make_output_settings() -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;
        ls.set_direction(line::Direction::Output)
            .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
        ls.set_drive(line::Drive::PushPull)
            .map_err(|e| AppError::Gpio(format!("set drive: {e}")))?;
        Ok(ls)
    }

    fn make_input_settings(
        edge: EdgeDetect,
        debounce: Duration,
    ) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;
        ls.set_direction(line::Direction::Input)
            .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;

        let edge = match edge {
            EdgeDetect::None => None,
            EdgeDetect::Rising => Some(line::Edge::Rising),
            EdgeDetect::Falling => Some(line::Edge::Falling),
            EdgeDetect::Both => Some(line::Edge::Both),
        };
        if edge.is_some() {
            ls.set_edge_detection(edge)
                .map_err(|e| AppError::Gpio(format!("set edge detection: {e}")))?;
            ls.set_event_clock(EventClock::Realtime)
                .map_err(|e| AppError::Gpio(format!("set event clock: {e}")))?;
            ls.set_debounce_period(debounce);
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn open(
        &self,
        line: u32,
        output: bool,
        edge: EdgeDetect,
        settings: line::Settings,
    ) -> Result<LineRef, AppError> {
        let line_cfg = Self::make_line_config(line, settings)?;
        let gpiod_handle = Arc::new(FairMutex::new(GpiodHandle::new(&self.chip, &line_cfg)?));

        Ok(Arc::new(LibgpiodLine {
            line,
            output,
            edge,
            gpiod_handle,
            listener: Mutex::new(None),
        }))
    }
}

impl GpioBackend for LibgpiodBackend {
    fn open_output(&self, line: u32) -> Result<LineRef, AppError> {
        self.open(line, true, EdgeDetect::None, Self::make_output_settings()?)
    }

    fn open_input(
        &self,
        line: u32,
        edge: EdgeDetect,
        debounce: Duration,
    ) -> Result<LineRef, AppError> {
        self.open(line, false, edge, Self::make_input_settings(edge, debounce)?)
    }
}

impl LineHandle for LibgpiodLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn read_value(&self) -> Result<u8, AppError> {
        let value = self
            .gpiod_handle
            .lock()
            .request
            .value(self.line)
            .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => 0,
            line::Value::Active => 1,
        })
    }

    fn write_value(&self, value: u8) -> Result<(), AppError> {
        if !self.output {
            return Err(AppError::InvalidValue(format!(
                "line {} must be an output to set value",
                self.line
            )));
        }

        self.gpiod_handle
            .lock()
            .request
            .set_value(
                self.line,
                match value {
                    0 => line::Value::InActive,
                    _ => line::Value::Active,
                },
            )
            .map_err(|e| AppError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    fn watch(&self, sink: WatchSink) -> Result<(), AppError> {
        if self.output {
            return Err(AppError::Gpio(format!(
                "line {} must be an input to watch",
                self.line
            )));
        }
        // a line without edge detection never reports, nothing to listen for
        if self.edge == EdgeDetect::None {
            return Ok(());
        }

        let listener = EdgeListener::new(self.line, self.gpiod_handle.clone(), sink)?;
        // replacing an old listener drops it, which joins its thread
        *self.listener.lock() = Some(listener);
        Ok(())
    }
}
