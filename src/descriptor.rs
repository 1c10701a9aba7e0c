use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    None,
    Rising,
    Falling,
    #[default]
    Both,
}

impl EdgeDetect {
    pub const NAMES: [&'static str; 4] = ["none", "rising", "falling", "both"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(EdgeDetect::None),
            "rising" => Some(EdgeDetect::Rising),
            "falling" => Some(EdgeDetect::Falling),
            "both" => Some(EdgeDetect::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PinKind {
    #[default]
    Input,
    Output,
}

impl PinKind {
    pub const NAMES: [&'static str; 2] = ["input", "output"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "input" => Some(PinKind::Input),
            "output" => Some(PinKind::Output),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PinKind::Input => "input",
            PinKind::Output => "output",
        }
    }
}

/// Descriptor as emitted by the compiler, before validation.
///
/// Fields hold untyped JSON so the validator can report exactly what was wrong with them.
/// An explicit `null` stays `Some(Value::Null)` and is rejected instead of defaulted.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RawDescriptor {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub gpio: Option<Value>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub init: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub edge: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub debounce: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A validated pin with every default materialized.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PinDescriptor {
    pub name: String,
    pub gpio: u32,
    #[serde(rename = "type")]
    pub kind: PinKind,
    pub init: u8,
    pub edge: EdgeDetect,
    /// Debounce period in milliseconds.
    pub debounce: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PinDescriptor {
    pub fn debounce_period(&self) -> Duration {
        Duration::from_millis(self.debounce)
    }

    /// Splits `OUT_PUMP` into `("OUT", "PUMP")` on the first separator.
    pub fn direction_and_slot(&self) -> Option<(&str, &str)> {
        self.name.split_once('_')
    }
}
