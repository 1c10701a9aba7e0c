use std::{env, fmt, fs, path::Path, path::PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::AppError;

pub const CONFIG_FILE_NAME: &str = "pigeonio.json";
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Development,
    #[default]
    Production,
}

impl RunMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RunMode::Development)
    }
}

/// Process-level settings for the IO subsystem.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub mode: RunMode,
    /// Active application, selects the development fixture.
    pub app: Option<String>,
    pub app_root: PathBuf,
    pub chip: String,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            mode: RunMode::Production,
            app: None,
            app_root: PathBuf::from("."),
            chip: "/dev/gpiochip0".to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Settings::default();

        let mode = match env::var("PIGEONIO_ENV").as_deref() {
            Ok("development") => RunMode::Development,
            _ => RunMode::Production,
        };
        let event_capacity = match env::var("PIGEONIO_EVENT_CAPACITY") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|e| {
                AppError::Config(format!("Invalid PIGEONIO_EVENT_CAPACITY {raw:?}: {e}"))
            })?,
            Err(_) => defaults.event_capacity,
        };
        if event_capacity == 0 {
            return Err(AppError::Config(
                "PIGEONIO_EVENT_CAPACITY must be greater than zero".into(),
            ));
        }

        Ok(Self {
            config_dir: env::var("PIGEONIO_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_dir),
            mode,
            app: env::var("PIGEONIO_APP").ok().filter(|a| !a.is_empty()),
            app_root: env::var("PIGEONIO_APP_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.app_root),
            chip: env::var("PIGEONIO_CHIP").unwrap_or(defaults.chip),
            event_capacity,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn fixture_path(&self) -> Option<PathBuf> {
        self.app.as_ref().map(|app| {
            self.app_root
                .join("apps")
                .join(app)
                .join("devdata")
                .join(CONFIG_FILE_NAME)
        })
    }
}

/// One slot entry as written in the board config file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SlotConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Value>,
}

/// Raw board config. Slots keep the order they were declared in.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct BoardConfig {
    #[serde(default, deserialize_with = "ordered_slots")]
    pub outputs: Vec<(String, SlotConfig)>,
    #[serde(default, deserialize_with = "ordered_slots")]
    pub inputs: Vec<(String, SlotConfig)>,
}

impl BoardConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, AppError> {
        serde_json::from_str(contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

fn ordered_slots<'de, D>(deserializer: D) -> Result<Vec<(String, SlotConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SlotsVisitor;

    impl<'de> Visitor<'de> for SlotsVisitor {
        type Value = Vec<(String, SlotConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of board slot names to slot entries")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut slots = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((slot, entry)) = map.next_entry::<String, SlotConfig>()? {
                slots.push((slot, entry));
            }
            Ok(slots)
        }
    }

    deserializer.deserialize_map(SlotsVisitor)
}
