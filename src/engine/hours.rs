//! Operating hours: the daily window that bounds every booking.
//!
//! The window is a single injectable configuration value (`CALLBOARD_HOURS`),
//! interpreted per UTC day. Callers working in a venue timezone convert at
//! the boundary; everything in here is UTC arithmetic on millisecond instants.

use crate::model::{Ms, Span};

use super::EngineError;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    /// Opening time, minutes after UTC midnight.
    open_min: u32,
    /// Closing time, minutes after UTC midnight. Exclusive bound for starts,
    /// inclusive bound for ends.
    close_min: u32,
}

impl OperatingHours {
    pub const DEFAULT: Self = Self {
        open_min: 9 * 60,
        close_min: 19 * 60,
    };

    pub fn new(open_min: u32, close_min: u32) -> Result<Self, String> {
        if close_min > 24 * 60 {
            return Err(format!("closing time {close_min}min is past midnight"));
        }
        if open_min >= close_min {
            return Err(format!(
                "opening time {open_min}min is not before closing time {close_min}min"
            ));
        }
        Ok(Self {
            open_min,
            close_min,
        })
    }

    /// Parse `"HH:MM-HH:MM"`, e.g. `"09:00-19:00"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (open, close) = s
            .split_once('-')
            .ok_or_else(|| format!("expected HH:MM-HH:MM, got {s:?}"))?;
        Self::new(parse_hhmm(open)?, parse_hhmm(close)?)
    }

    /// The UTC day an instant falls on (days since epoch, floor division).
    pub fn day_of(t: Ms) -> i64 {
        t.div_euclid(DAY_MS)
    }

    /// The absolute operating window on a given UTC day.
    pub fn window_for_day(&self, day: i64) -> Span {
        let midnight = day * DAY_MS;
        Span::new(
            midnight + Ms::from(self.open_min) * MINUTE_MS,
            midnight + Ms::from(self.close_min) * MINUTE_MS,
        )
    }

    /// Validate a proposed booking interval.
    ///
    /// `[start, end)` must sit inside the operating window of `start`'s UTC
    /// day — an end exactly at closing is allowed, and single-day containment
    /// also rejects intervals that cross midnight. Pure; no I/O.
    pub fn validate(&self, start: Ms, end: Ms) -> Result<(), EngineError> {
        let window = self.window_for_day(Self::day_of(start));
        if start < window.start || end > window.end {
            return Err(EngineError::OutOfHours { start, end });
        }
        if start >= end {
            return Err(EngineError::InvalidOrder { start, end });
        }
        Ok(())
    }
}

fn parse_hhmm(s: &str) -> Result<u32, String> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got {s:?}"))?;
    let h: u32 = h.parse().map_err(|_| format!("bad hour in {s:?}"))?;
    let m: u32 = m.parse().map_err(|_| format!("bad minute in {s:?}"))?;
    if h > 24 || m > 59 {
        return Err(format!("{s:?} is not a valid time of day"));
    }
    Ok(h * 60 + m)
}
