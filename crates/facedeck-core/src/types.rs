use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wire format for the historical query bounds (`datetime-local` style).
pub const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Default lookback for the historical recognition query.
pub const DEFAULT_QUERY_WINDOW_HOURS: i64 = 24;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("invalid time {0:?} (expected YYYY-MM-DDTHH:MM)")]
    InvalidTime(String),
    #[error("start time {start} is after end time {end}")]
    InvertedRange { start: String, end: String },
}

/// Error parsing a pushed recognition record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("malformed recognition record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("score out of range: {0}")]
    ScoreOutOfRange(f64),
}

/// A camera registered with the appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "lenient::port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl Camera {
    /// Name for selection lists: the display name, or the ID when unnamed.
    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }
}

/// Registration form for a new camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCamera {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl NewCamera {
    /// RTSP source URL the appliance pulls from.
    pub fn rtsp_url(&self) -> String {
        format!("rtsp://{}:{}/stream", self.ip, self.port)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.ip.trim().is_empty() {
            return Err(ValidationError::MissingField("ip"));
        }
        Ok(())
    }

    /// JSON body for `POST /api/cameras` and `PUT /api/cameras/{id}`.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "ip": self.ip,
            "port": self.port,
            "username": self.username,
            "password": self.password,
            "url": self.rtsp_url(),
        })
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub employeeno: Option<String>,
}

/// Enrollment form for a new person. The photo travels base64-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPerson {
    pub fullname: String,
    pub employeeno: Option<String>,
    pub photo: Option<Vec<u8>>,
}

impl NewPerson {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fullname.trim().is_empty() {
            return Err(ValidationError::MissingField("fullname"));
        }
        Ok(())
    }

    pub fn payload(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "fullname": self.fullname,
            "employeeno": self.employeeno,
        });
        // An empty upload is treated as no photo at all.
        if let Some(photo) = self.photo.as_deref().filter(|p| !p.is_empty()) {
            body["photo"] = serde_json::Value::String(BASE64.encode(photo));
        }
        body
    }
}

/// HTTP method an event handler uses when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ValidationError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// A webhook-style event handler configured on the appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandler {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub enable: bool,
}

impl EventHandler {
    /// Action type, which the appliance omits for plain HTTP handlers.
    pub fn action(&self) -> &str {
        self.action_type.as_deref().unwrap_or("http")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewEventHandler {
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub enable: bool,
}

impl NewEventHandler {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingField("url"));
        }
        Ok(())
    }
}

/// Identity attached to a recognition when the face matched an enrolled person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonInfo {
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub employeeno: Option<String>,
}

/// One recognition event, either from the historical query or pushed live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    #[serde(rename = "type", default)]
    pub kind: Option<i64>,
    /// Match confidence in [0.0, 1.0].
    pub score: f64,
    #[serde(default)]
    pub target_score: Option<f64>,
    /// Base64-encoded JPEG of the detected face.
    #[serde(default)]
    pub snapshot: String,
    #[serde(default, deserialize_with = "lenient::string_or_empty")]
    pub channel: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// `None` means the face did not match anyone ("Unknown").
    #[serde(default)]
    pub person_info: Option<PersonInfo>,
}

impl RecognitionResult {
    /// Parse a pushed subscription message.
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_str(text)?;
        if !record.score.is_finite() || !(0.0..=1.0).contains(&record.score) {
            return Err(RecordError::ScoreOutOfRange(record.score));
        }
        Ok(record)
    }

    pub fn fullname(&self) -> Option<&str> {
        self.person_info
            .as_ref()
            .and_then(|p| p.fullname.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn employeeno(&self) -> Option<&str> {
        self.person_info
            .as_ref()
            .and_then(|p| p.employeeno.as_deref())
            .filter(|n| !n.is_empty())
    }
}

/// Filters for `GET /api/recognitions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionQuery {
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub person_id: Option<String>,
    pub camera_id: Option<String>,
}

impl RecognitionQuery {
    /// The default window: the 24 hours ending at `now`.
    pub fn last_day(now: NaiveDateTime) -> Self {
        Self {
            start_time: Some(now - Duration::hours(DEFAULT_QUERY_WINDOW_HOURS)),
            end_time: Some(now),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ValidationError::InvertedRange {
                    start: start.format(QUERY_TIME_FORMAT).to_string(),
                    end: end.format(QUERY_TIME_FORMAT).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Query parameters, omitting unset filters.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(4);
        if let Some(start) = self.start_time {
            params.push(("start_time", start.format(QUERY_TIME_FORMAT).to_string()));
        }
        if let Some(end) = self.end_time {
            params.push(("end_time", end.format(QUERY_TIME_FORMAT).to_string()));
        }
        if let Some(person) = &self.person_id {
            params.push(("person_id", person.clone()));
        }
        if let Some(camera) = &self.camera_id {
            params.push(("camera_id", camera.clone()));
        }
        params
    }
}

/// Parse a query bound, accepting minute or second precision.
pub fn parse_query_time(s: &str) -> Result<NaiveDateTime, ValidationError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, QUERY_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .map_err(|_| ValidationError::InvalidTime(s.to_string()))
}

/// `GET /api/health` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub aira_api: Option<String>,
    #[serde(default)]
    pub token_valid: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// `GET /api/websocket/info` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsocketInfo {
    pub websocket_url: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `POST /api/token/refresh` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

// List envelopes. The appliance omits the array entirely when there is nothing to list.

#[derive(Debug, Default, Deserialize)]
pub struct CameraList {
    #[serde(default)]
    pub cameras: Vec<Camera>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PersonList {
    #[serde(default)]
    pub persons: Vec<Person>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<EventHandler>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecognitionList {
    #[serde(default)]
    pub results: Vec<RecognitionResult>,
}

/// `{"error": "..."}` body returned with non-success statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// The appliance is loose about JSON types for IDs and ports.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(D::Error::custom(format!("expected string or number, got {other}"))),
        }
    }

    pub fn string_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(D::Error::custom(format!("expected string or number, got {other}"))),
        }
    }

    pub fn port<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid port {n}"))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid port {s:?}"))),
            other => Err(D::Error::custom(format!("invalid port {other}"))),
        }
    }
}
