//! Alert records and the intake normalizer

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Type assigned to alerts that arrive without one
pub const UNKNOWN_ALERT_TYPE: &str = "Unknown Alert";

/// Alert severity, ordered from most to least urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Numeric priority, 1 is the most urgent
    pub fn priority(self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Case-insensitive parse of a severity label
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured alert payload.
///
/// Keys are kept sorted, so the serialized form of two equal payloads is
/// always identical regardless of the order producers built them in.
/// Well-known keys have typed accessors; everything else is an open bag of
/// producer-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertData(Map<String, JsonValue>);

impl AlertData {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_address(&self) -> Option<&str> {
        self.get_str("from")
    }

    pub fn to_address(&self) -> Option<&str> {
        self.get_str("to")
    }

    pub fn recipient(&self) -> Option<&str> {
        self.get_str("recipient")
    }

    /// Numeric amount; producers send it either as a number or a decimal string
    pub fn amount(&self) -> Option<f64> {
        match self.0.get("amount")? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn severity(&self) -> Severity {
        self.get_str("severity")
            .and_then(Severity::parse)
            .unwrap_or_default()
    }

    /// Canonical JSON encoding
    pub fn to_canonical_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn into_inner(self) -> Map<String, JsonValue> {
        self.0
    }
}

impl From<Map<String, JsonValue>> for AlertData {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

/// A single normalized alert signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "type")]
    pub alert_type: String,
    #[serde(default)]
    pub data: AlertData,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl AlertRecord {
    pub fn severity(&self) -> Severity {
        self.data.severity()
    }

    /// Incident signature used to collapse repeats of the same alert.
    /// Volatile per-occurrence keys are excluded.
    pub fn fingerprint(&self) -> String {
        let mut stable = self.data.clone().into_inner();
        stable.remove("timestamp");
        format!(
            "{}|{}",
            self.alert_type,
            serde_json::to_string(&stable).unwrap_or_default()
        )
    }
}

/// Alert as submitted by a producer, before normalization.
///
/// Fields are kept as raw JSON so a mistyped field still reaches
/// [`normalize`] instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAlert {
    #[serde(rename = "type", default)]
    pub alert_type: Option<JsonValue>,
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub timestamp: Option<JsonValue>,
}

impl RawAlert {
    pub fn new(alert_type: impl Into<String>, data: AlertData) -> Self {
        Self {
            alert_type: Some(JsonValue::String(alert_type.into())),
            data: Some(JsonValue::Object(data.into_inner())),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(JsonValue::from(timestamp));
        self
    }

    /// Build from any JSON value. Objects contribute `type`, `data` and
    /// `timestamp`; anything else becomes the payload of an untyped alert.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(mut obj) => {
                let mut field = |key: &str| obj.remove(key).filter(|v| !v.is_null());
                Self {
                    alert_type: field("type"),
                    data: field("data"),
                    timestamp: field("timestamp"),
                }
            }
            other => Self {
                data: Some(other),
                ..Self::default()
            },
        }
    }

    /// Type label after coercion: strings are trimmed, numbers and booleans
    /// use their JSON text. `None` when nothing usable was sent.
    pub fn type_name(&self) -> Option<String> {
        let name = match self.alert_type.as_ref()? {
            JsonValue::String(s) => s.trim().to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!name.is_empty()).then_some(name)
    }

    /// Producer timestamp in ms, if it can be read as one. Fractional
    /// values are truncated, numeric strings are parsed.
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self.timestamp.as_ref()? {
            JsonValue::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f.trunc() as i64)
            }),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Coerce a raw producer alert into a valid record.
///
/// Never fails: a missing or unusable type becomes [`UNKNOWN_ALERT_TYPE`], a
/// non-object payload is wrapped under `value`, an unreadable timestamp is
/// replaced by `now`, and the severity falls back to `low`.
pub fn normalize(raw: RawAlert, now: i64) -> AlertRecord {
    let alert_type = match raw.type_name() {
        Some(t) => t,
        None => {
            tracing::warn!(
                alert_type = ?raw.alert_type,
                "Alert submitted without a usable type, using '{}'",
                UNKNOWN_ALERT_TYPE
            );
            UNKNOWN_ALERT_TYPE.to_string()
        }
    };

    let timestamp = match (raw.timestamp_ms(), &raw.timestamp) {
        (Some(ts), _) => ts,
        (None, None) | (None, Some(JsonValue::Null)) => now,
        (None, Some(other)) => {
            tracing::warn!(
                alert_type = %alert_type,
                timestamp = %other,
                "Unreadable alert timestamp, using receive time"
            );
            now
        }
    };

    let mut data = match raw.data {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };

    let severity = match data.get("severity") {
        Some(JsonValue::String(s)) => match Severity::parse(s) {
            Some(sev) => sev,
            None => {
                tracing::warn!(
                    alert_type = %alert_type,
                    severity = %s,
                    "Unrecognized severity, defaulting to low"
                );
                Severity::Low
            }
        },
        _ => Severity::Low,
    };
    data.insert(
        "severity".to_string(),
        JsonValue::String(severity.as_str().to_string()),
    );

    AlertRecord {
        alert_type,
        data: AlertData(data),
        timestamp,
    }
}
