use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DAY_MINUTES: i32 = 24 * 60;
pub const DEFAULT_SNAP_MINUTES: i32 = 15;
pub const DEFAULT_ANCHOR_MINUTES: i32 = 6 * 60;
pub const DEFAULT_PIXELS_PER_HOUR: f64 = 64.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("invalid time format: {0}")]
    InvalidFormat(String),
    #[error("invalid interval: end {end} must be after start {start}")]
    InvalidInterval { start: i32, end: i32 },
}

/// Parses `HH:MM` or `HH:MM:SS` into minutes since midnight. Seconds are
/// dropped.
pub fn time_to_minutes(value: &str) -> Result<i32, TimeError> {
    let invalid = || TimeError::InvalidFormat(value.to_string());
    let parts = value.trim().split(':').collect::<Vec<_>>();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(invalid());
    }

    let mut fields = [0i32; 3];
    for (index, part) in parts.iter().enumerate() {
        if part.len() != 2 || !part.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(invalid());
        }
        fields[index] = part.parse::<i32>().map_err(|_| invalid())?;
    }

    let [hour, minute, second] = fields;
    if hour > 23 || minute > 59 || second > 59 {
        return Err(invalid());
    }
    Ok(hour * 60 + minute)
}

pub fn minutes_to_time(minutes: i32) -> Result<String, TimeError> {
    if !(0..DAY_MINUTES).contains(&minutes) {
        return Err(TimeError::InvalidFormat(format!("{minutes} minutes")));
    }
    Ok(format!("{:02}:{:02}:00", minutes / 60, minutes % 60))
}

pub fn duration_minutes(start: &str, end: &str) -> Result<i32, TimeError> {
    let start = time_to_minutes(start)?;
    let end = time_to_minutes(end)?;
    if end <= start {
        return Err(TimeError::InvalidInterval { start, end });
    }
    Ok(end - start)
}

/// Rounds to the nearest multiple of `resolution`; exact halves round up.
pub fn snap_to_grid(minutes: i32, resolution: i32) -> i32 {
    if resolution <= 0 {
        return minutes;
    }
    (2 * minutes + resolution).div_euclid(2 * resolution) * resolution
}

pub fn snap_fractional_minutes(minutes: f64, resolution: i32) -> i32 {
    if resolution <= 0 {
        return minutes.round() as i32;
    }
    let resolution_f = f64::from(resolution);
    (minutes / resolution_f + 0.5).floor() as i32 * resolution
}

pub fn pixels_to_minutes(pixels: f64, pixels_per_hour: f64) -> f64 {
    if pixels_per_hour <= 0.0 {
        return 0.0;
    }
    pixels / pixels_per_hour * 60.0
}

pub fn minutes_from_anchor(minutes: i32, anchor_minutes: i32) -> i32 {
    (minutes - anchor_minutes).rem_euclid(DAY_MINUTES)
}

pub fn minutes_to_pixels(minutes: i32, anchor_minutes: i32, pixels_per_hour: f64) -> f64 {
    f64::from(minutes_from_anchor(minutes, anchor_minutes)) / 60.0 * pixels_per_hour
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGrid {
    pub snap_minutes: i32,
    pub pixels_per_hour: f64,
    pub anchor_minutes: i32,
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self {
            snap_minutes: DEFAULT_SNAP_MINUTES,
            pixels_per_hour: DEFAULT_PIXELS_PER_HOUR,
            anchor_minutes: DEFAULT_ANCHOR_MINUTES,
        }
    }
}

impl TimeGrid {
    pub fn snap(&self, minutes: i32) -> i32 {
        snap_to_grid(minutes, self.snap_minutes)
    }

    pub fn snap_pixel_delta(&self, pixels: f64) -> i32 {
        snap_fractional_minutes(
            pixels_to_minutes(pixels, self.pixels_per_hour),
            self.snap_minutes,
        )
    }

    pub fn minutes_from_anchor(&self, minutes: i32) -> i32 {
        minutes_from_anchor(minutes, self.anchor_minutes)
    }

    pub fn minutes_to_pixels(&self, minutes: i32) -> f64 {
        minutes_to_pixels(minutes, self.anchor_minutes, self.pixels_per_hour)
    }

    pub fn min_duration(&self) -> i32 {
        self.snap_minutes.max(1)
    }

    pub fn latest_end(&self) -> i32 {
        let step = self.min_duration();
        (DAY_MINUTES - 1) / step * step
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: i32,
    pub end: i32,
}

impl Interval {
    pub fn new(start: i32, end: i32) -> Result<Self, TimeError> {
        if start < 0 || end >= DAY_MINUTES || end <= start {
            return Err(TimeError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, TimeError> {
        Self::new(time_to_minutes(start)?, time_to_minutes(end)?)
    }

    pub fn duration(&self) -> i32 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn start_time(&self) -> Result<String, TimeError> {
        minutes_to_time(self.start)
    }

    pub fn end_time(&self) -> Result<String, TimeError> {
        minutes_to_time(self.end)
    }
}

pub fn format_time_label(minutes: i32) -> String {
    let minutes = minutes.rem_euclid(DAY_MINUTES) as u32;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
        .map(|time| time.format("%-I:%M %p").to_string())
        .unwrap_or_default()
}

pub fn format_hour_label(hour: u32) -> String {
    NaiveTime::from_hms_opt(hour % 24, 0, 0)
        .map(|time| time.format("%-I %p").to_string())
        .unwrap_or_default()
}

pub fn format_duration(minutes: i32) -> String {
    if minutes < 60 {
        return format!("{minutes}m");
    }
    if minutes % 60 == 0 {
        return format!("{}h", minutes / 60);
    }
    format!("{:.1}h", f64::from(minutes) / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!(time_to_minutes("09:30"), Ok(570));
        assert_eq!(time_to_minutes("09:30:00"), Ok(570));
        assert_eq!(time_to_minutes("00:00"), Ok(0));
        assert_eq!(time_to_minutes("23:59:00"), Ok(1439));
        assert_eq!(time_to_minutes("09:00:30"), Ok(540));
        assert_eq!(time_to_minutes("09:00:59"), Ok(540));
    }

    #[test]
    fn rejects_malformed_times() {
        for value in ["", "9:30", "24:00", "12:60", "12:30:60", "12-30", "ab:cd", "12:30:00:00"] {
            assert!(
                matches!(time_to_minutes(value), Err(TimeError::InvalidFormat(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn minutes_to_time_does_not_wrap() {
        assert_eq!(minutes_to_time(0).as_deref(), Ok("00:00:00"));
        assert_eq!(minutes_to_time(14 * 60 + 5).as_deref(), Ok("14:05:00"));
        assert!(minutes_to_time(DAY_MINUTES).is_err());
        assert!(minutes_to_time(-15).is_err());
    }

    #[test]
    fn duration_requires_end_after_start() {
        assert_eq!(duration_minutes("09:00", "10:15:00"), Ok(75));
        assert_eq!(
            duration_minutes("10:00", "10:00"),
            Err(TimeError::InvalidInterval { start: 600, end: 600 })
        );
    }

    #[test]
    fn snap_rounds_to_nearest_and_halves_up() {
        assert_eq!(snap_to_grid(47, 15), 45);
        assert_eq!(snap_to_grid(53, 15), 60);
        assert_eq!(snap_to_grid(-8, 15), -15);
        assert_eq!(snap_to_grid(-7, 15), 0);
        assert_eq!(snap_to_grid(5, 10), 10);
        assert_eq!(snap_to_grid(-5, 10), 0);
        assert_eq!(snap_fractional_minutes(7.5, 15), 15);
        assert_eq!(snap_fractional_minutes(-7.5, 15), 0);
    }

    #[test]
    fn pixel_conversion_uses_anchor_with_wraparound() {
        let grid = TimeGrid::default();
        assert_eq!(grid.minutes_to_pixels(6 * 60), 0.0);
        assert_eq!(grid.minutes_to_pixels(7 * 60 + 30), 96.0);
        // 01:00 sits 19 hours below the anchor, not above it.
        assert_eq!(grid.minutes_to_pixels(60), 19.0 * 64.0);
        assert_eq!(pixels_to_minutes(32.0, 64.0), 30.0);
        assert_eq!(grid.snap_pixel_delta(47.0 / 60.0 * 64.0), 45);
    }

    #[test]
    fn latest_end_stays_before_midnight() {
        assert_eq!(TimeGrid::default().latest_end(), 23 * 60 + 45);
    }

    #[test]
    fn labels_and_durations() {
        assert_eq!(format_time_label(6 * 60), "6:00 AM");
        assert_eq!(format_time_label(13 * 60 + 30), "1:30 PM");
        assert_eq!(format_hour_label(0), "12 AM");
        assert_eq!(format_hour_label(23), "11 PM");
        assert_eq!(format_duration(45), "45m");
        assert_eq!(format_duration(60), "1h");
        assert_eq!(format_duration(90), "1.5h");
    }

    // Feature: timegrid, Property 1: time strings round-trip through minutes
    proptest! {
        #[test]
        fn property1_time_string_roundtrip(hour in 0i32..24, minute in 0i32..60) {
            let value = format!("{hour:02}:{minute:02}:00");
            let minutes = time_to_minutes(&value).expect("valid time");
            prop_assert_eq!(minutes_to_time(minutes).expect("in range"), value);
        }
    }

    // Feature: timegrid, Property 2: snapping is idempotent
    proptest! {
        #[test]
        fn property2_snap_idempotent(minutes in -5000i32..5000, resolution in 1i32..120) {
            let once = snap_to_grid(minutes, resolution);
            prop_assert_eq!(snap_to_grid(once, resolution), once);
            prop_assert_eq!(once % resolution, 0);
        }
    }
}
