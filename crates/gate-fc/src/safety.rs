/// Consecutive frames without a gate before the fail-safe disarms.
pub const MAX_ALLOWED_MISSES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissVerdict {
    /// Still within tolerance; keep flying on the last command.
    Tolerated(u32),
    /// Tolerance exceeded; the caller must disarm.
    Abort(u32),
}

/// Counts consecutive lost-tracking frames.
///
/// This counts frames, not seconds: at an irregular frame rate the abort
/// latency varies with it.
#[derive(Debug, Clone)]
pub struct MissCounter {
    missed: u32,
    max_allowed: u32,
}

impl Default for MissCounter {
    fn default() -> Self {
        Self::new(MAX_ALLOWED_MISSES)
    }
}

impl MissCounter {
    pub fn new(max_allowed: u32) -> Self {
        Self { missed: 0, max_allowed }
    }

    pub fn record_miss(&mut self) -> MissVerdict {
        self.missed = self.missed.saturating_add(1);
        if self.missed > self.max_allowed {
            MissVerdict::Abort(self.missed)
        } else {
            MissVerdict::Tolerated(self.missed)
        }
    }

    pub fn reset(&mut self) {
        self.missed = 0;
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }
}
