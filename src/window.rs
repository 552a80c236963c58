// src/window.rs
use chrono::{DateTime, FixedOffset, Local, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Daily delivery window `[start, end)` in local clock time.
/// `start > end` wraps past midnight; `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn all_day() -> Self {
        Self::new(NaiveTime::MIN, NaiveTime::MIN)
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        use std::cmp::Ordering::*;
        match self.start.cmp(&self.end) {
            Equal => true,
            Less => self.start <= t && t < self.end,
            Greater => t >= self.start || t < self.end,
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::new(clock(8, 0), clock(20, 0))
    }
}

fn clock(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Local clock time of `now`. A fixed offset wins over the host timezone.
pub fn local_time(now: DateTime<Utc>, utc_offset_minutes: Option<i32>) -> NaiveTime {
    let t = match utc_offset_minutes.and_then(|m| FixedOffset::east_opt(m * 60)) {
        Some(offset) => now.with_timezone(&offset).time(),
        None => now.with_timezone(&Local).time(),
    };
    // sub-second precision is irrelevant for window checks
    t.with_nanosecond(0).unwrap_or(t)
}
