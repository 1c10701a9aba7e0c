//! Schema gate between the compiler and the pin state manager.
//!
//! Validation is all-or-nothing: every violation in the list is collected and reported
//! in one [`AppError::Validation`], and no descriptor is accepted unless all of them are.

use serde_json::Value;

use crate::board;
use crate::descriptor::{EdgeDetect, PinDescriptor, PinKind, RawDescriptor};
use crate::error::AppError;

pub const DEFAULT_NAME: &str = "GPIO22";
pub const DEFAULT_LINE: u32 = 22;
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

pub fn validate(pins: Vec<RawDescriptor>) -> Result<Vec<PinDescriptor>, AppError> {
    let mut errors = Vec::new();
    let validated: Vec<PinDescriptor> = pins
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| check(index, raw, &mut errors))
        .collect();

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(AppError::Validation(errors))
    }
}

/// Validates arbitrary JSON. Anything but an array is replaced by one fully defaulted pin.
pub fn validate_value(input: Value) -> Result<Vec<PinDescriptor>, AppError> {
    let Value::Array(items) = input else {
        return validate(vec![RawDescriptor::default()]);
    };

    let mut errors = Vec::new();
    let mut validated = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            errors.push(format!("\"[{index}]\" must be of type object"));
            continue;
        }
        match serde_json::from_value::<RawDescriptor>(item) {
            Ok(raw) => {
                if let Some(pin) = check(index, raw, &mut errors) {
                    validated.push(pin);
                }
            }
            Err(e) => errors.push(format!("\"[{index}]\" {e}")),
        }
    }

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(AppError::Validation(errors))
    }
}

fn check(index: usize, raw: RawDescriptor, errors: &mut Vec<String>) -> Option<PinDescriptor> {
    let before = errors.len();
    let mut reject = |field: &str, rule: String| {
        errors.push(format!("\"[{index}].{field}\" {rule}"));
    };

    let name = match raw.name {
        None => Some(DEFAULT_NAME.to_string()),
        Some(Value::String(name)) => Some(name),
        Some(_) => {
            reject("name", "must be a string".into());
            None
        }
    };

    let kind = match &raw.kind {
        None => Some(PinKind::default()),
        Some(value) => {
            let kind = value.as_str().and_then(PinKind::from_name);
            if kind.is_none() {
                reject("type", one_of(&PinKind::NAMES));
            }
            kind
        }
    };

    let init = match &raw.init {
        None => Some(0),
        Some(value) => {
            let init = match value.as_f64() {
                Some(v) if v == 0.0 => Some(0),
                Some(v) if v == 1.0 => Some(1),
                _ => None,
            };
            if init.is_none() {
                reject("init", one_of(&[0, 1]));
            }
            init
        }
    };

    let edge = match &raw.edge {
        None => Some(EdgeDetect::default()),
        Some(value) => {
            let edge = value.as_str().and_then(EdgeDetect::from_name);
            if edge.is_none() {
                reject("edge", one_of(&EdgeDetect::NAMES));
            }
            edge
        }
    };

    let debounce = match &raw.debounce {
        None => Some(DEFAULT_DEBOUNCE_MS),
        Some(value) => {
            // negative periods clamp to no debounce
            let debounce = value.as_u64().or_else(|| {
                value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .map(|v| v.max(0.0).round() as u64)
            });
            if debounce.is_none() {
                reject("debounce", "must be a number".into());
            }
            debounce
        }
    };

    let gpio = match &raw.gpio {
        None => Some(DEFAULT_LINE),
        Some(value) => {
            let gpio = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|line| board::is_allowed_line(*line));
            if gpio.is_none() {
                reject("gpio", one_of(&board::allowed_lines()));
            }
            gpio
        }
    };

    if errors.len() > before {
        return None;
    }

    Some(PinDescriptor {
        name: name?,
        gpio: gpio?,
        kind: kind?,
        init: init?,
        edge: edge?,
        debounce: debounce?,
        extra: raw.extra,
    })
}

fn one_of<T: std::fmt::Display>(allowed: &[T]) -> String {
    let allowed: Vec<String> = allowed.iter().map(ToString::to_string).collect();
    format!("must be one of [{}]", allowed.join(", "))
}
