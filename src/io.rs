use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::board::USERLED_NAME;
use crate::compiler::compile;
use crate::config::{BoardConfig, Settings};
use crate::descriptor::PinDescriptor;
use crate::error::AppError;
use crate::events::EventBus;
use crate::gpio::{BoardIo, GpioBackend, LineRef};
use crate::validation::validate;

/// Levels of every readable line, grouped by direction prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSnapshot {
    #[serde(rename = "IN", default)]
    pub inputs: BTreeMap<String, u8>,
    #[serde(rename = "OUT", default)]
    pub outputs: BTreeMap<String, u8>,
}

impl IoSnapshot {
    fn direction_mut(&mut self, direction: &str) -> Option<&mut BTreeMap<String, u8>> {
        match direction {
            "IN" => Some(&mut self.inputs),
            "OUT" => Some(&mut self.outputs),
            _ => None,
        }
    }

    pub fn get(&self, direction: &str, slot: &str) -> Option<u8> {
        match direction {
            "IN" => self.inputs.get(slot).copied(),
            "OUT" => self.outputs.get(slot).copied(),
            _ => None,
        }
    }
}

impl BoardIo {
    /// Reads every live line into the shared snapshot and returns a copy of it.
    ///
    /// Development mode returns the application's fixture instead, or an empty snapshot when
    /// the fixture cannot be loaded.
    pub async fn read(&self) -> IoSnapshot {
        if self.settings.mode.is_development() {
            return match self.load_fixture() {
                Ok(snapshot) => {
                    *self.data.lock() = snapshot.clone();
                    snapshot
                }
                Err(e) => {
                    warn!("{e}");
                    IoSnapshot::default()
                }
            };
        }

        let lines: Vec<(&PinDescriptor, Option<LineRef>)> = {
            let state = self.state.read();
            self.config
                .iter()
                .filter_map(|pin| match state.get(&pin.name) {
                    Some(entry) => Some((pin, entry.handle.clone())),
                    None => {
                        if pin.name != USERLED_NAME {
                            error!("pin {} does not exist", pin.name);
                        }
                        None
                    }
                })
                .collect()
        };

        let mut data = self.data.lock();
        for (pin, handle) in lines {
            let Some(handle) = handle else {
                continue;
            };
            let Some((direction, slot)) = pin.direction_and_slot() else {
                warn!("pin {} has no direction prefix, skipping", pin.name);
                continue;
            };
            let Some(values) = data.direction_mut(direction) else {
                warn!("pin {} has unknown direction {direction}, skipping", pin.name);
                continue;
            };
            match handle.read_value() {
                Ok(value) => {
                    values.insert(slot.to_string(), value);
                }
                Err(e) => error!("read {} line {}: {e}", pin.name, pin.gpio),
            }
        }

        data.clone()
    }

    /// Drives the output declared as `output` in the board config. Failures are only logged.
    pub async fn write(&self, output: &str, value: u8) {
        if value > 1 {
            error!("output {output}: value must be 0 or 1, got {value}");
            return;
        }

        let name = format!("OUT_{output}");
        let handle = self
            .state
            .read()
            .get(&name)
            .and_then(|pin| pin.handle.clone());
        let Some(handle) = handle else {
            error!("output {output} does not exist");
            return;
        };

        match handle.write_value(value) {
            Ok(()) => {
                if let Some(pin) = self.state.write().get_mut(&name) {
                    pin.state = Some(value);
                }
            }
            Err(e) => error!("write output {output} line {}: {e}", handle.line()),
        }
    }

    fn load_fixture(&self) -> Result<IoSnapshot, AppError> {
        let path = self
            .settings
            .fixture_path()
            .ok_or_else(|| AppError::Fixture("no active application set".into()))?;
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Fixture(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Fixture(format!("parse {}: {e}", path.display())))
    }
}

/// Slot the host application keeps for the IO subsystem.
///
/// Until [`IoHost::setup`] succeeds the subsystem is closed: reads return an empty
/// snapshot and writes are logged no-ops.
#[derive(Default)]
pub struct IoHost {
    emitter: Option<EventBus>,
    board: Option<BoardIo>,
}

impl IoHost {
    pub fn new(emitter: EventBus) -> Self {
        Self {
            emitter: Some(emitter),
            board: None,
        }
    }

    /// Host whose bus is sized from `settings`, ready to be subscribed before setup.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(EventBus::new(settings.event_capacity))
    }

    /// The bus is created on first use and kept across every later setup.
    pub fn emitter(&mut self) -> &EventBus {
        self.emitter.get_or_insert_with(EventBus::default)
    }

    pub fn board(&self) -> Option<&BoardIo> {
        self.board.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.board.is_some()
    }

    pub fn config(&self) -> &[PinDescriptor] {
        self.board.as_ref().map(BoardIo::config).unwrap_or_default()
    }

    /// Loads `pigeonio.json` from the configured directory and brings the board up.
    pub async fn setup(
        &mut self,
        settings: &Settings,
        backend: Arc<dyn GpioBackend>,
    ) -> Result<(), AppError> {
        let loaded = BoardConfig::load_from_file(settings.config_path());
        self.setup_from(loaded, settings, backend).await
    }

    /// Brings the board up from an already fetched config.
    ///
    /// A config that failed to load is logged and leaves the subsystem closed. A config
    /// that fails validation is returned as an error.
    pub async fn setup_from(
        &mut self,
        loaded: Result<BoardConfig, AppError>,
        settings: &Settings,
        backend: Arc<dyn GpioBackend>,
    ) -> Result<(), AppError> {
        self.board = None;
        let emitter = self
            .emitter
            .get_or_insert_with(|| EventBus::new(settings.event_capacity))
            .clone();

        let config = match loaded {
            Ok(config) => config,
            Err(e) => {
                error!("pigeonio {e}");
                return Ok(());
            }
        };

        let pins = validate(compile(&config))?;
        let board = BoardIo::bring_up(pins, backend, emitter, settings);
        let snapshot = board.read().await;
        info!(
            "pigeonio ready: {} inputs, {} outputs readable",
            snapshot.inputs.len(),
            snapshot.outputs.len()
        );
        self.board = Some(board);

        Ok(())
    }

    pub async fn read(&self) -> IoSnapshot {
        match &self.board {
            Some(board) => board.read().await,
            None => IoSnapshot::default(),
        }
    }

    pub async fn write(&self, output: &str, value: u8) {
        match &self.board {
            Some(board) => board.write(output, value).await,
            None => error!("pigeonio is not initialized, cannot write output {output}"),
        }
    }
}
