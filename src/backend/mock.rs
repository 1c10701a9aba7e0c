use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::descriptor::EdgeDetect;
use crate::error::AppError;
use crate::gpio::{GpioBackend, LineHandle, LineRef, WatchSink};

/// In-memory board used in tests and on hosts without a GPIO chip.
#[derive(Default)]
pub struct MockGpioBackend {
    lines: RwLock<FxHashMap<u32, Arc<MockLine>>>, // keyed by line offset
    failing: RwLock<FxHashSet<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockDirection {
    Input,
    Output,
}

pub struct MockLine {
    line: u32,
    direction: MockDirection,
    edge: EdgeDetect,
    debounce: Duration,
    inner: Mutex<MockLineState>,
}

#[derive(Default)]
struct MockLineState {
    value: u8,
    writes: Vec<u8>,
    watcher: Option<WatchSink>,
    last_event: Option<Instant>,
    read_fails: bool,
}

impl MockGpioBackend {
    /// Makes every later open of `line` fail.
    pub fn fail_line(&self, line: u32) {
        self.failing.write().insert(line);
    }

    pub fn line(&self, line: u32) -> Option<Arc<MockLine>> {
        self.lines.read().get(&line).cloned()
    }

    pub fn opened_lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.lines.read().keys().copied().collect();
        lines.sort_unstable();
        lines
    }

    /// Drives the physical level of an input, notifying its watcher when the transition
    /// passes the edge policy and debounce window.
    pub fn set_level(&self, line: u32, value: u8) -> Result<(), AppError> {
        self.line(line)
            .ok_or_else(|| AppError::NotFoundLine(format!("line {line} is not open")))?
            .drive(value);
        Ok(())
    }

    /// Delivers a failed notification to the watcher of `line`.
    pub fn inject_error(&self, line: u32, message: &str) -> Result<(), AppError> {
        let line = self
            .line(line)
            .ok_or_else(|| AppError::NotFoundLine(format!("line {line} is not open")))?;
        if let Some(watcher) = &line.inner.lock().watcher {
            watcher.notify(Err(message.to_string()));
        }
        Ok(())
    }

    fn open(
        &self,
        line: u32,
        direction: MockDirection,
        edge: EdgeDetect,
        debounce: Duration,
    ) -> Result<LineRef, AppError> {
        if self.failing.read().contains(&line) {
            return Err(AppError::Gpio(format!("request line {line}: device busy")));
        }

        let handle = Arc::new(MockLine {
            line,
            direction,
            edge,
            debounce,
            inner: Mutex::new(MockLineState::default()),
        });
        self.lines.write().insert(line, handle.clone());
        Ok(handle)
    }
}

impl GpioBackend for MockGpioBackend {
    fn open_output(&self, line: u32) -> Result<LineRef, AppError> {
        self.open(line, MockDirection::Output, EdgeDetect::None, Duration::ZERO)
    }

    fn open_input(
        &self,
        line: u32,
        edge: EdgeDetect,
        debounce: Duration,
    ) -> Result<LineRef, AppError> {
        self.open(line, MockDirection::Input, edge, debounce)
    }
}

impl MockLine {
    pub fn direction(&self) -> MockDirection {
        self.direction
    }

    pub fn edge(&self) -> EdgeDetect {
        self.edge
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn value(&self) -> u8 {
        self.inner.lock().value
    }

    /// Every value written through the handle, oldest first.
    pub fn writes(&self) -> Vec<u8> {
        self.inner.lock().writes.clone()
    }

    pub fn is_watched(&self) -> bool {
        self.inner.lock().watcher.is_some()
    }

    /// Makes later reads of this line fail until cleared.
    pub fn set_read_failure(&self, fail: bool) {
        self.inner.lock().read_fails = fail;
    }

    fn drive(&self, value: u8) {
        let mut pin = self.inner.lock();
        let old = pin.value;
        pin.value = value;

        let Some(edge_kind) = (match (old, value) {
            (0, 1) => Some(EdgeDetect::Rising),
            (1, 0) => Some(EdgeDetect::Falling),
            _ => None,
        }) else {
            return;
        };
        if !edge_matches(self.edge, edge_kind) {
            return;
        }

        let now = Instant::now();
        let allow = pin
            .last_event
            .map(|t| now.duration_since(t) >= self.debounce)
            .unwrap_or(true);
        if allow {
            pin.last_event = Some(now);
            if let Some(watcher) = &pin.watcher {
                watcher.notify(Ok(value));
            }
        }
    }
}

impl LineHandle for MockLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn read_value(&self) -> Result<u8, AppError> {
        let pin = self.inner.lock();
        if pin.read_fails {
            return Err(AppError::Gpio(format!("get value line {}: I/O error", self.line)));
        }
        Ok(pin.value)
    }

    fn write_value(&self, value: u8) -> Result<(), AppError> {
        if self.direction != MockDirection::Output {
            return Err(AppError::InvalidValue(format!(
                "line {} must be an output to set value",
                self.line
            )));
        }
        let mut pin = self.inner.lock();
        pin.value = value;
        pin.writes.push(value);
        Ok(())
    }

    fn watch(&self, sink: WatchSink) -> Result<(), AppError> {
        if self.direction != MockDirection::Input {
            return Err(AppError::Gpio(format!(
                "line {} must be an input to watch",
                self.line
            )));
        }
        self.inner.lock().watcher = Some(sink);
        Ok(())
    }
}

fn edge_matches(configured: EdgeDetect, observed: EdgeDetect) -> bool {
    match configured {
        EdgeDetect::None => false,
        EdgeDetect::Rising => observed == EdgeDetect::Rising,
        EdgeDetect::Falling => observed == EdgeDetect::Falling,
        EdgeDetect::Both => matches!(observed, EdgeDetect::Rising | EdgeDetect::Falling),
    }
}
