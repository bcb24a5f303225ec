//! Frame numbers to timecodes
//!
//! Plain timecodes have the shape `HH:MM:SS.ffff`; dated timecodes prefix the recording
//! start date and use wall-clock time: `YYYY-MM-DD-HH:MM:SS.ffff`.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::sources::FirstMinute;

/// Formats a duration in seconds as `HH:MM:SS.ffff`
pub fn seconds_to_timecode(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    // Round once at the printed precision so 59.99999 does not print as 60.0000
    let ten_thousandths = (seconds * 10_000.0).round() as u64;
    let hours = ten_thousandths / 36_000_000;
    let minutes = (ten_thousandths / 600_000) % 60;
    let rest = ten_thousandths % 600_000;
    format!(
        "{:02}:{:02}:{:02}.{:04}",
        hours,
        minutes,
        rest / 10_000,
        rest % 10_000
    )
}

/// Formats a frame number as `HH:MM:SS.ffff` at `fps`
pub fn frames_to_timecode(frames: usize, fps: f32) -> String {
    if fps <= 0.0 {
        return seconds_to_timecode(0.0);
    }
    seconds_to_timecode(frames as f64 / fps as f64)
}

/// Wall-clock anchor of a recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionClock {
    pub fps: f32,
    /// Local date and time of frame 0, when known
    pub start: Option<NaiveDateTime>,
}

impl SessionClock {
    pub fn new(fps: f32, start: Option<NaiveDateTime>) -> Self {
        Self { fps, start }
    }

    /// Reads the start time from a stem ending in `YYYY-MM-DD-HH-MM-SS`
    pub fn from_stem(stem: &str, fps: f32) -> Self {
        Self::new(fps, parse_stem_start(stem))
    }

    /// Refines the start from a first-minute file
    ///
    /// The recording started `60 * (fps*60 - frames) / (fps*60)` seconds into the given
    /// minute. The date is kept from the current start; without one nothing changes.
    pub fn with_first_minute(mut self, first: &FirstMinute) -> Self {
        let Some(start) = self.start else {
            log::warn!("First-minute data ignored: recording date unknown");
            return self;
        };
        let per_minute = self.fps as f64 * 60.0;
        if per_minute <= 0.0 {
            return self;
        }
        let offset = 60.0 * (per_minute - first.frames as f64) / per_minute;
        let Some(minute) = NaiveTime::from_hms_opt(first.hour, first.minute, 0) else {
            log::warn!("First-minute data ignored: invalid time {}:{}", first.hour, first.minute);
            return self;
        };
        let micros = (offset.max(0.0) * 1_000_000.0).round() as i64;
        self.start = Some(start.date().and_time(minute) + Duration::microseconds(micros));
        self
    }

    /// Seconds from frame 0 to `frame`
    pub fn seconds(&self, frame: usize) -> f64 {
        if self.fps <= 0.0 {
            0.0
        } else {
            frame as f64 / self.fps as f64
        }
    }

    pub fn timecode(&self, frame: usize) -> String {
        frames_to_timecode(frame, self.fps)
    }

    /// `YYYY-MM-DD-HH:MM:SS.ffff`, or a plain timecode when the start is unknown
    pub fn dated_timecode(&self, frame: usize) -> String {
        match self.start {
            Some(start) => {
                let micros = (self.seconds(frame) * 1_000_000.0).round() as i64;
                let at = start + Duration::microseconds(micros);
                let time = at.time();
                let seconds = time.num_seconds_from_midnight() as f64
                    + time.nanosecond() as f64 / 1_000_000_000.0;
                format!("{}-{}", at.format("%Y-%m-%d"), seconds_to_timecode(seconds))
            }
            None => self.timecode(frame),
        }
    }

    /// Frame at which a wall-clock instant falls, if it is not before the start
    pub fn frame_at(&self, time: NaiveDateTime) -> Option<usize> {
        let start = self.start?;
        let millis = (time - start).num_milliseconds();
        if millis < 0 || self.fps <= 0.0 {
            return None;
        }
        Some((millis as f64 / 1000.0 * self.fps as f64).floor() as usize)
    }
}

fn parse_stem_start(stem: &str) -> Option<NaiveDateTime> {
    let fields: Vec<&str> = stem.split('-').collect();
    if fields.len() < 6 {
        return None;
    }
    let numbers: Vec<u32> = fields[fields.len() - 6..]
        .iter()
        .map(|f| f.parse::<u32>().ok())
        .collect::<Option<_>>()?;
    let date = NaiveDate::from_ymd_opt(numbers[0] as i32, numbers[1], numbers[2])?;
    date.and_hms_opt(numbers[3], numbers[4], numbers[5])
}
