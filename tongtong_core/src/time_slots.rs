use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::{MotionProfile, MotionProfileOverride};

pub const HOURS_PER_DAY: f32 = 24.0;

/// Hour value as written in the configuration: `"HH:MM"`, a numeric string,
/// or a bare JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HourValue {
    Number(f32),
    Text(String),
}

impl HourValue {
    pub fn parse(&self) -> Result<f32, HourParseError> {
        match self {
            HourValue::Number(value) if value.is_finite() => Ok(*value),
            HourValue::Number(value) => Err(HourParseError::NotFinite(*value)),
            HourValue::Text(text) => parse_hour(text),
        }
    }
}

impl From<&str> for HourValue {
    fn from(value: &str) -> Self {
        HourValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HourParseError {
    #[error("hour string is empty")]
    Empty,
    #[error("expected HH:MM but found {0:?}")]
    Malformed(String),
    #[error("{0:?} is not a number")]
    NotNumeric(String),
    #[error("hour value {0} is not finite")]
    NotFinite(f32),
}

/// Parses `"HH:MM"` (hour = H + M/60) or a plain numeric hour.
pub fn parse_hour(text: &str) -> Result<f32, HourParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(HourParseError::Empty);
    }

    if trimmed.contains(':') {
        let mut parts = trimmed.split(':');
        let (Some(hours), Some(minutes), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(HourParseError::Malformed(trimmed.to_string()));
        };
        let hours: i32 = hours
            .trim()
            .parse()
            .map_err(|_| HourParseError::Malformed(trimmed.to_string()))?;
        let minutes: i32 = minutes
            .trim()
            .parse()
            .map_err(|_| HourParseError::Malformed(trimmed.to_string()))?;
        return Ok(hours as f32 + minutes as f32 / 60.0);
    }

    let value: f32 = trimmed
        .parse()
        .map_err(|_| HourParseError::NotNumeric(trimmed.to_string()))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(HourParseError::NotFinite(value))
    }
}

/// Wraps any hour into `[0, 24)`.
pub fn wrap_hour(hour: f32) -> f32 {
    let wrapped = hour.rem_euclid(HOURS_PER_DAY);
    // rem_euclid can round up to exactly 24.0 for tiny negative inputs
    if wrapped >= HOURS_PER_DAY {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlotRecord {
    pub id: String,
    pub start_time: HourValue,
    pub end_time: HourValue,
    #[serde(default)]
    pub motion: Option<MotionProfileOverride>,
}

impl TimeSlotRecord {
    pub fn new(id: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            id: id.to_string(),
            start_time: start_time.into(),
            end_time: end_time.into(),
            motion: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Slice {
    id: String,
    start: f32,
    end: f32,
}

impl Slice {
    fn contains(&self, hour: f32) -> bool {
        if approximately(self.start, self.end) {
            return true;
        }
        if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

fn approximately(a: f32, b: f32) -> bool {
    (a - b).abs() <= f32::EPSILON * 8.0
}

/// Ordered table of half-open hour ranges; the first range containing a query
/// hour names its slot.
#[derive(Debug, Clone, Default)]
pub struct TimeSlotTable {
    slices: Vec<Slice>,
    records: Vec<TimeSlotRecord>,
}

impl TimeSlotTable {
    /// Builds the lookup table, skipping records with an empty id or an hour
    /// that fails to parse.
    pub fn new(records: Vec<TimeSlotRecord>) -> Self {
        let mut slices = Vec::with_capacity(records.len());
        for record in &records {
            if record.id.trim().is_empty() {
                log::warn!("time slot record without id skipped");
                continue;
            }
            let start = match record.start_time.parse() {
                Ok(hour) => wrap_hour(hour),
                Err(err) => {
                    log::warn!("time slot {}: start_time ignored ({err})", record.id);
                    continue;
                }
            };
            let end = match record.end_time.parse() {
                Ok(hour) => wrap_hour(hour),
                Err(err) => {
                    log::warn!("time slot {}: end_time ignored ({err})", record.id);
                    continue;
                }
            };
            slices.push(Slice {
                id: record.id.clone(),
                start,
                end,
            });
        }
        Self { slices, records }
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn resolve(&self, hour: f32) -> Option<&str> {
        if !hour.is_finite() {
            return None;
        }
        let hour = wrap_hour(hour);
        self.slices
            .iter()
            .find(|slice| slice.contains(hour))
            .map(|slice| slice.id.as_str())
    }

    pub fn record(&self, id: &str) -> Option<&TimeSlotRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Motion settings for a slot: the slot's overrides layered on `defaults`.
    pub fn motion_profile(&self, id: &str, defaults: &MotionProfile) -> MotionProfile {
        match self.record(id).and_then(|record| record.motion.as_ref()) {
            Some(overrides) => overrides.apply_to(defaults),
            None => defaults.clone(),
        }
    }
}

/// Formats an hour as `HH:MM`, truncating seconds.
pub fn format_clock(hour: f32) -> String {
    let hours = hour.floor();
    let minutes = ((hour - hours) * 60.0).floor();
    format!("{:02}:{:02}", hours as i32, minutes as i32)
}

/// Current hour plus the slot it resolves to. Setting the hour reports
/// whether the slot id changed, which is what drives re-matching.
#[derive(Debug, Clone)]
pub struct TimeController {
    table: TimeSlotTable,
    hour: f32,
    current_id: Option<String>,
}

const STUDY_BANNER: &str = "Tongtong is studying next door, come join her to study!";

impl TimeController {
    pub fn new(table: TimeSlotTable, initial_hour: f32) -> Self {
        let hour = wrap_hour(initial_hour);
        let current_id = table.resolve(hour).map(str::to_string);
        Self {
            table,
            hour,
            current_id,
        }
    }

    pub fn hour(&self) -> f32 {
        self.hour
    }

    pub fn time_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn table(&self) -> &TimeSlotTable {
        &self.table
    }

    /// Returns true when the resolved slot id differs from the previous one.
    pub fn set_hour(&mut self, hour: f32) -> bool {
        if !hour.is_finite() {
            log::warn!("time input {hour} ignored");
            return false;
        }
        self.hour = wrap_hour(hour);
        let next = self.table.resolve(self.hour).map(str::to_string);
        if next == self.current_id {
            return false;
        }
        log::debug!(
            "time slot {} -> {} at {}",
            self.current_id.as_deref().unwrap_or("-"),
            next.as_deref().unwrap_or("-"),
            format_clock(self.hour)
        );
        self.current_id = next;
        true
    }

    pub fn status_label(&self) -> String {
        format!(
            "{} - {}",
            format_clock(self.hour),
            self.current_id.as_deref().unwrap_or("-")
        )
    }

    pub fn banner(&self) -> String {
        let whole = self.hour.floor() as i32;
        if (8..10).contains(&whole) || (12..18).contains(&whole) {
            return STUDY_BANNER.to_string();
        }
        format!(
            "{} Welcome to the world of Tongtong, Tongtong will grow with you",
            format_clock(self.hour)
        )
    }
}
