//! Display formatting for dashboard views.
//!
//! Turns API records into the text a front end shows: cards for
//! recognitions, rows for cameras, persons and event handlers, and the
//! placeholder lines shown when a view is empty or failed to load.

use crate::types::{Camera, EventHandler, Person, RecognitionResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Local, TimeZone};
use std::fmt;

const UNKNOWN_PERSON: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";
const UNNAMED_CAMERA: &str = "Unnamed Camera";
const TIME_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Score tier boundaries.
const HIGH_SCORE: f64 = 0.85;
const MEDIUM_SCORE: f64 = 0.70;

/// Dashboard views that render a list fetched from the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Cameras,
    Persons,
    Events,
    Recognitions,
}

impl View {
    pub fn name(self) -> &'static str {
        match self {
            Self::Cameras => "cameras",
            Self::Persons => "persons",
            Self::Events => "events",
            Self::Recognitions => "recognitions",
        }
    }

    /// Placeholder shown when the list came back empty.
    pub fn empty_message(self) -> &'static str {
        match self {
            Self::Cameras => "No cameras registered yet",
            Self::Persons => "No persons registered yet",
            Self::Events => "No events configured yet",
            Self::Recognitions => "No recognition results found",
        }
    }

    /// Inline message shown in place of the list when the fetch failed.
    pub fn failed_message(self) -> &'static str {
        match self {
            Self::Cameras => "Error loading cameras",
            Self::Persons => "Error loading persons",
            Self::Events => "Error loading events",
            Self::Recognitions => "Error loading recognitions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTier {
    High,
    Medium,
    Low,
}

impl ScoreTier {
    pub fn for_score(score: f64) -> Self {
        if score >= HIGH_SCORE {
            Self::High
        } else if score >= MEDIUM_SCORE {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Confidence as a percentage with one decimal, e.g. `87.0%`.
pub fn format_score(score: f64) -> String {
    format!("{:.1}%", score * 100.0)
}

/// Render an epoch-millisecond timestamp in the given time zone.
pub fn format_timestamp<Tz>(millis: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    match DateTime::from_timestamp_millis(millis) {
        Some(utc) => utc.with_timezone(tz).format(TIME_DISPLAY_FORMAT).to_string(),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Decode a base64 snapshot, tolerating a `data:image/...;base64,` prefix.
pub fn decode_snapshot(snapshot: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let raw = match snapshot.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => snapshot,
    };
    BASE64.decode(raw.trim())
}

/// A recognition as displayed in the live feed and the query results.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionCard {
    pub title: String,
    pub employee: String,
    pub camera: String,
    pub time: String,
    pub score: String,
    pub tier: ScoreTier,
}

impl RecognitionCard {
    /// Build a card with times shown in the local time zone.
    pub fn new(result: &RecognitionResult) -> Self {
        Self::in_timezone(result, &Local)
    }

    pub fn in_timezone<Tz>(result: &RecognitionResult, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self {
            title: result.fullname().unwrap_or(UNKNOWN_PERSON).to_string(),
            employee: result.employeeno().unwrap_or(NOT_AVAILABLE).to_string(),
            camera: result.channel.clone(),
            time: format_timestamp(result.timestamp, tz),
            score: format_score(result.score),
            tier: ScoreTier::for_score(result.score),
        }
    }
}

impl fmt::Display for RecognitionCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} employee {:<10} camera {:<12} {}  score {} ({})",
            self.title,
            self.employee,
            self.camera,
            self.time,
            self.score,
            self.tier.label()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRow {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub port: String,
    pub status: &'static str,
}

impl From<&Camera> for CameraRow {
    fn from(camera: &Camera) -> Self {
        Self {
            id: camera.id.clone(),
            name: camera
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| UNNAMED_CAMERA.to_string()),
            ip: camera
                .ip
                .clone()
                .filter(|ip| !ip.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            port: camera
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            status: if camera.online { "Online" } else { "Offline" },
        }
    }
}

impl fmt::Display for CameraRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:<24} {:<16} {:<6} {}",
            self.id, self.name, self.ip, self.port, self.status
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRow {
    pub id: String,
    pub fullname: String,
    pub employeeno: String,
}

impl From<&Person> for PersonRow {
    fn from(person: &Person) -> Self {
        Self {
            id: person.id.clone(),
            fullname: person.fullname.clone(),
            employeeno: person
                .employeeno
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }
}

impl fmt::Display for PersonRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12} {:<28} {}", self.id, self.fullname, self.employeeno)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub id: String,
    pub name: String,
    pub action: String,
    pub status: &'static str,
    pub url: String,
}

impl From<&EventHandler> for EventRow {
    fn from(handler: &EventHandler) -> Self {
        Self {
            id: handler.id.clone(),
            name: handler.name.clone(),
            action: handler.action().to_string(),
            status: if handler.enable { "Enabled" } else { "Disabled" },
            url: handler
                .url
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }
}

impl fmt::Display for EventRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:<24} {:<6} {:<9} {}",
            self.id, self.name, self.action, self.status, self.url
        )
    }
}
