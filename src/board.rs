//! Fixed wiring of the Pigeon controller board.
//!
//! Logical slot names printed on the board map to kernel line offsets. The tables never
//! change at runtime.

/// Line driving the output driver enable.
pub const ENABLE_LINE: u32 = 34;
/// Line driving the user status LED.
pub const USERLED_LINE: u32 = 45;

pub const ENABLE_NAME: &str = "OUT_ENABLE";
pub const USERLED_NAME: &str = "OUT_USERLED";

pub const INPUTS: &[(&str, u32)] = &[
    ("ID1", 30),
    ("ID2", 31),
    ("ID3", 32),
    ("ID4", 33),
    ("I1+", 12),
    ("I2+", 13),
    ("I3+", 18),
    ("I4+", 19),
    ("I5+", 20),
    ("I6+", 21),
    ("I7+", 22),
    ("I8+", 23),
];

pub const OUTPUTS: &[(&str, u32)] = &[
    ("O1", 35),
    ("O2", 36),
    ("O3", 37),
    ("O4", 38),
    ("O5", 39),
    ("O6", 40),
    ("O7", 41),
    ("O8", 42),
];

pub fn input_line(slot: &str) -> Option<u32> {
    lookup(INPUTS, slot)
}

pub fn output_line(slot: &str) -> Option<u32> {
    lookup(OUTPUTS, slot)
}

/// Every line a descriptor may address: all inputs, all outputs and the two board-control lines.
pub fn allowed_lines() -> Vec<u32> {
    let mut lines: Vec<u32> = INPUTS
        .iter()
        .chain(OUTPUTS)
        .map(|(_, line)| *line)
        .chain([ENABLE_LINE, USERLED_LINE])
        .collect();
    lines.sort_unstable();
    lines
}

pub fn is_allowed_line(line: u32) -> bool {
    line == ENABLE_LINE
        || line == USERLED_LINE
        || INPUTS.iter().chain(OUTPUTS).any(|(_, l)| *l == line)
}

fn lookup(table: &[(&str, u32)], slot: &str) -> Option<u32> {
    table
        .iter()
        .find(|(name, _)| *name == slot)
        .map(|(_, line)| *line)
}
