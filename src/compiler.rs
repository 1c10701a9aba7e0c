//! Turns the board config file into the raw descriptor list handed to the validator.

use log::warn;
use serde_json::Value;

use crate::board::{self, ENABLE_LINE, ENABLE_NAME, USERLED_LINE, USERLED_NAME};
use crate::config::{BoardConfig, SlotConfig};
use crate::descriptor::{PinKind, RawDescriptor};

pub fn compile(config: &BoardConfig) -> Vec<RawDescriptor> {
    let mut pins = Vec::with_capacity(config.outputs.len() + config.inputs.len() + 2);

    // the driver enable and the status LED only exist alongside user outputs
    if !config.outputs.is_empty() {
        pins.push(output(ENABLE_NAME.to_string(), Value::from(ENABLE_LINE), 0));
        pins.push(output(USERLED_NAME.to_string(), Value::from(USERLED_LINE), 0));

        for (slot, entry) in &config.outputs {
            let init = u8::from(entry.init.as_deref() == Some("high"));
            pins.push(output(
                format!("OUT_{}", entry.name),
                resolve(slot, board::output_line(slot), "output"),
                init,
            ));
        }
    }

    for (slot, entry) in &config.inputs {
        pins.push(input(slot, entry));
    }

    pins
}

fn output(name: String, gpio: Value, init: u8) -> RawDescriptor {
    RawDescriptor {
        name: Some(Value::String(name)),
        gpio: Some(gpio),
        kind: Some(Value::from(PinKind::Output.as_str())),
        init: Some(Value::from(init)),
        ..Default::default()
    }
}

fn input(slot: &str, entry: &SlotConfig) -> RawDescriptor {
    RawDescriptor {
        name: Some(Value::String(format!("IN_{}", entry.name))),
        gpio: Some(resolve(slot, board::input_line(slot), "input")),
        kind: Some(Value::from(PinKind::Input.as_str())),
        edge: entry.edge.clone(),
        ..Default::default()
    }
}

// unknown slots stay in the list with a null line so validation reports them
fn resolve(slot: &str, line: Option<u32>, direction: &str) -> Value {
    match line {
        Some(line) => Value::from(line),
        None => {
            warn!("unknown {direction} slot {slot}");
            Value::Null
        }
    }
}
