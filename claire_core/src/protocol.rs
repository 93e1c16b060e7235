//! Text wire protocol of the demonstrator firmware.
//!
//! Outbound commands are ASCII `"<opcode> <args>;"`. Inbound traffic is a
//! stream of lines mixing free-text log output, one-line state dumps (flat
//! object literals), the `Finished` sentinel after a level move, and the boot
//! banner. Every inbound line is classified exactly once, by the reader.
use std::collections::BTreeMap;
use std::fmt;

/// Command terminator.
pub const TERMINATOR: char = ';';
/// Printed by the firmware when an asynchronous level move completes.
pub const FINISHED_SENTINEL: &str = "Finished";
pub const BANNER_PREFIX: &str = "Initialising";
/// `Initialising <three-word product> <version>`
pub const BANNER_TOKENS: usize = 5;

/// Raw-distance channel names, indexed by tube (0-based on the wire).
pub const DISTANCE_FIELDS: [&str; 2] = ["Tube0_water_mm", "Tube1_water_mm"];
pub const INFLOW_FIELDS: [&str; 2] = ["Tube0_inflow_duty", "Tube1_inflow_duty"];
pub const OUTFLOW_FIELDS: [&str; 2] = ["Tube0_outflow_duty", "Tube1_outflow_duty"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inflow,
    Outflow,
}

/// Actuator index for a tube's pump/valve: inflow of tube 1 is 1, outflow of
/// tube 1 is 2, inflow of tube 2 is 3, outflow of tube 2 is 4.
#[inline]
pub fn actuator_index(tube: u8, direction: Direction) -> u8 {
    match direction {
        Direction::Inflow => (tube - 1) * 2 + 1,
        Direction::Outflow => tube * 2,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `1;` - device answers with one state dump line.
    RequestState,
    /// `3;` - stop every actuator and abort a running level move.
    EmergencyStop,
    /// `4 <actuator> <percent>;`
    SetDuty { actuator: u8, percent: u8 },
    /// `5 <tube> <distance>;` - asynchronous, completes with `Finished`.
    MoveTo { tube: u8, distance_mm: f64 },
}

impl Command {
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Commands refused while a level move is in flight.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::SetDuty { .. } | Command::MoveTo { .. })
    }

    /// Commands whose completion is signalled later by the sentinel.
    pub fn is_async(&self) -> bool {
        matches!(self, Command::MoveTo { .. })
    }

    /// Commands after which a cached state no longer describes the device.
    pub fn invalidates_state(&self) -> bool {
        !matches!(self, Command::RequestState)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::RequestState => write!(f, "1{TERMINATOR}"),
            Command::EmergencyStop => write!(f, "3{TERMINATOR}"),
            Command::SetDuty { actuator, percent } => {
                write!(f, "4 {actuator} {percent}{TERMINATOR}")
            }
            Command::MoveTo { tube, distance_mm } => {
                write!(f, "5 {tube} {distance_mm}{TERMINATOR}")
            }
        }
    }
}

/// A value in a state dump.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

/// A state dump in device units: raw sonar distances and duty percentages.
#[derive(Debug, Clone, PartialEq)]
pub struct RawState {
    pub distance_mm: [f64; 2],
    pub inflow_duty: [f64; 2],
    pub outflow_duty: [f64; 2],
    /// Every other channel, e.g. `Stream_inflow_duty`.
    pub aux: BTreeMap<String, FieldValue>,
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a flat object literal with identifier keys and number or string
/// values. Nested values, arrays, booleans and nulls make the line malformed.
pub fn parse_record(line: &str) -> Option<BTreeMap<String, FieldValue>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(trimmed).ok()?;
    let mut out = BTreeMap::new();
    for (key, value) in map {
        if !is_identifier(&key) {
            return None;
        }
        let v = match value {
            serde_json::Value::Number(n) => FieldValue::Number(n.as_f64()?),
            serde_json::Value::String(s) => FieldValue::Text(s),
            _ => return None,
        };
        out.insert(key, v);
    }
    Some(out)
}

/// Interpret a line as a device state dump.
///
/// Returns `None` for anything that is not a complete record: free text,
/// truncated lines, missing channels or duties outside [0, 100].
pub fn try_parse_state(line: &str) -> Option<RawState> {
    let mut record = parse_record(line)?;
    let mut take = |name: &str| record.remove(name).and_then(|v| v.as_f64());
    let distance_mm = [take(DISTANCE_FIELDS[0])?, take(DISTANCE_FIELDS[1])?];
    let inflow_duty = [take(INFLOW_FIELDS[0])?, take(INFLOW_FIELDS[1])?];
    let outflow_duty = [take(OUTFLOW_FIELDS[0])?, take(OUTFLOW_FIELDS[1])?];
    let duty_ok = |d: &f64| (0.0..=100.0).contains(d);
    if !inflow_duty.iter().chain(outflow_duty.iter()).all(duty_ok) {
        return None;
    }
    Some(RawState {
        distance_mm,
        inflow_duty,
        outflow_duty,
        aux: record,
    })
}

/// Boot banner printed once by the firmware after reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub product: String,
    pub version: String,
}

impl Banner {
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != BANNER_TOKENS || tokens[0] != BANNER_PREFIX {
            return None;
        }
        Some(Self {
            product: tokens[1..BANNER_TOKENS - 1].join(" "),
            version: tokens[BANNER_TOKENS - 1].to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Banner(Banner),
    State(RawState),
    /// The whole line is the completion sentinel; substrings do not count.
    Finished,
    Text,
}

pub fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed == FINISHED_SENTINEL {
        return LineKind::Finished;
    }
    if let Some(state) = try_parse_state(trimmed) {
        return LineKind::State(state);
    }
    if let Some(banner) = Banner::parse(trimmed) {
        return LineKind::Banner(banner);
    }
    LineKind::Text
}
