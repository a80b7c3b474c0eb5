use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

pub const MIN_VALUE: i32 = 204;
pub const MAX_VALUE: i32 = 1844;

/// Settle time the receiver needs after a bind request.
pub const BIND_SETTLE: Duration = Duration::from_secs(1);

const WAKE: &[u8] = b"\n";
const DISARM: &[u8] = b"d";
const ARM: &[u8] = b"a";
const BIND: &[u8] = b"q";

/// Maps `[-1.0, 1.0]` linearly onto `[MIN_VALUE, MAX_VALUE]`; out-of-range input clamps.
pub fn normalize(value: f64) -> i32 {
    let v = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
    let span = (MAX_VALUE - MIN_VALUE) as f64;
    let raw = MIN_VALUE as f64 + (v + 1.0) / 2.0 * span;
    (raw.round() as i32).clamp(MIN_VALUE, MAX_VALUE)
}

/// Four control axes, each in `[-1, 1]` with 0 as neutral.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlCommand {
    pub throttle: f64,
    pub direction: f64,
    pub forward: f64,
    pub rotation: f64,
}

impl ControlCommand {
    /// Throttle only, lateral axes neutral.
    pub fn altitude(throttle: f64) -> Self {
        Self { throttle, ..Self::default() }
    }

    /// Parses one to four whitespace-separated numbers in axis order. Missing axes are neutral.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        anyhow::ensure!(!parts.is_empty(), "must have at least one number");
        anyhow::ensure!(parts.len() <= 4, "at most four numbers (throttle, direction, forward, rotation)");
        let mut axes = [0.0f64; 4];
        for (slot, p) in axes.iter_mut().zip(&parts) {
            *slot = p.parse().with_context(|| format!("bad number: {}", p))?;
        }
        let [throttle, direction, forward, rotation] = axes;
        Ok(Self { throttle, direction, forward, rotation })
    }

    pub fn encode(&self) -> String {
        format!(
            "!{} {} {} {}\n",
            normalize(self.throttle),
            normalize(self.direction),
            normalize(self.forward),
            normalize(self.rotation)
        )
    }
}

/// Sole writer on the transmitter link. Writes are fire-and-forget; failures
/// propagate because flight cannot continue without command authority.
pub struct Transmitter<W: Write> {
    port: W,
    bind_settle: Duration,
}

impl Transmitter<Box<dyn tokio_serial::SerialPort>> {
    pub fn open(dev: &str, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| format!("open transmitter serial device {}", dev))?;
        info!("transmitter: opened {} @ {}", dev, baud);
        Self::new(port)
    }
}

impl<W: Write> Transmitter<W> {
    /// Flushes any partial line on the receiver, then disarms.
    pub fn new(port: W) -> Result<Self> {
        let mut tx = Self { port, bind_settle: BIND_SETTLE };
        tx.write(WAKE)?;
        tx.disarm()?;
        Ok(tx)
    }

    /// Overrides the bind settle delay; the hardware needs [`BIND_SETTLE`].
    pub fn with_bind_settle(mut self, settle: Duration) -> Self {
        self.bind_settle = settle;
        self
    }

    /// Blocks for the settle delay, then disarms.
    pub fn bind(&mut self) -> Result<()> {
        self.write(BIND)?;
        std::thread::sleep(self.bind_settle);
        self.disarm()
    }

    pub fn arm(&mut self) -> Result<()> {
        self.write(ARM)
    }

    pub fn disarm(&mut self) -> Result<()> {
        self.write(DISARM)
    }

    pub fn command(&mut self, cmd: &ControlCommand) -> Result<()> {
        let line = cmd.encode();
        debug!("transmitter: {}", line.trim_end());
        self.write(line.as_bytes())
    }

    pub fn get_ref(&self) -> &W {
        &self.port
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).context("transmitter write")?;
        self.port.flush().context("transmitter flush")?;
        Ok(())
    }
}
