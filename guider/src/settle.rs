//! Settling after a dither or guide start.
//!
//! A settle completes when the star has stayed locked within tolerance for
//! the configured time, or when the frame budget runs out. It fails when the
//! timeout elapses first. Time is measured from frame timestamps.

use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettleParams {
    /// Maximum guide error, in pixels, counted as settled
    pub tolerance_px: f64,
    /// Time the error must stay within tolerance; zero settles on the first
    /// in-range frame
    pub settle_time: Duration,
    pub timeout: Duration,
    /// Succeed after this many frames regardless of error
    pub frames: Option<u32>,
}

impl Default for SettleParams {
    fn default() -> Self {
        Self {
            tolerance_px: 1.5,
            settle_time: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            frames: None,
        }
    }
}

/// Progress report for a frame that did not finish the settle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlingInfo {
    pub distance: f64,
    pub time_in_range: f64,
    pub settle_time: f64,
    pub star_locked: bool,
}

/// Final result of a settle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleOutcome {
    /// `None` on success
    pub error: Option<String>,
    pub settle_frames: u32,
    pub dropped_frames: u32,
}

impl SettleOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettleStatus {
    Settling(SettlingInfo),
    Done(SettleOutcome),
}

pub const SETTLE_TIMEOUT_MESSAGE: &str = "timed-out waiting for guider to settle";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleMonitor {
    params: SettleParams,
    started: Timestamp,
    in_range_since: Option<Timestamp>,
    frames: u32,
    dropped: u32,
}

impl SettleMonitor {
    pub fn begin(params: SettleParams, at: Timestamp) -> Self {
        Self {
            params,
            started: at,
            in_range_since: None,
            frames: 0,
            dropped: 0,
        }
    }

    pub fn params(&self) -> &SettleParams {
        &self.params
    }

    fn outcome(&self, error: Option<String>) -> SettleOutcome {
        SettleOutcome {
            error,
            settle_frames: self.frames,
            dropped_frames: self.dropped,
        }
    }

    /// Account for one guided frame.
    pub fn update(&mut self, star_locked: bool, current_error: f64, at: Timestamp) -> SettleStatus {
        let in_range = star_locked && current_error <= self.params.tolerance_px;
        let settle_time = self.params.settle_time.as_secs_f64();
        let mut time_in_range = 0.0;

        self.frames += 1;
        if !star_locked {
            self.dropped += 1;
        }

        debug!(
            "settling, locked = {} distance = {:.2} ({:.2}) frame = {}",
            star_locked, current_error, self.params.tolerance_px, self.frames
        );

        if self.params.frames.is_some_and(|limit| self.frames >= limit) {
            return SettleStatus::Done(self.outcome(None));
        }

        if in_range {
            match self.in_range_since {
                None if settle_time <= 0.0 => return SettleStatus::Done(self.outcome(None)),
                None => self.in_range_since = Some(at),
                Some(since) => {
                    time_in_range = at.seconds_since(since);
                    if time_in_range >= settle_time {
                        return SettleStatus::Done(self.outcome(None));
                    }
                }
            }
        } else {
            self.in_range_since = None;
        }

        if at.seconds_since(self.started) >= self.params.timeout.as_secs_f64() {
            return SettleStatus::Done(self.outcome(Some(SETTLE_TIMEOUT_MESSAGE.to_string())));
        }

        SettleStatus::Settling(SettlingInfo {
            distance: current_error,
            time_in_range,
            settle_time,
            star_locked,
        })
    }

    /// Abandon the settle, e.g. because guiding stopped.
    pub fn fail(&self, reason: &str) -> SettleOutcome {
        self.outcome(Some(reason.to_string()))
    }
}
