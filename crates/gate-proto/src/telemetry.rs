use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Bind,
    Arm,
    TakeOff,
    Tick,
    Stop,
    FailSafe,
}

/// One flight-log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEvent {
    pub ts_unix_ms: i64,
    pub kind: EventKind,
    /// `unarmed`, `armed` or `flying` after the event.
    pub state: String,
    pub height_cm: Option<f64>,
    pub throttle: Option<f64>,
    pub missed: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
}

pub fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl FlightEvent {
    pub fn new(kind: EventKind, state: impl Into<String>) -> Self {
        Self {
            ts_unix_ms: now_unix_ms(),
            kind,
            state: state.into(),
            height_cm: None,
            throttle: None,
            missed: 0,
            msg: String::new(),
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    /// NDJSON line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}
