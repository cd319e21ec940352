//! Build events and their persisted envelopes.
//!
//! Events are stored as versioned envelopes: a type discriminator, a schema
//! version and the JSON payload. Readers decode envelopes back into
//! [`Event`]s and reject type/version pairs they do not know.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::build::BuildStatus;
use crate::{BuildId, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Status,
    Log,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Status => "status",
            EventType::Log => "log",
            EventType::Error => "error",
        }
    }

    /// Schema version of the payloads this build writes for the type.
    pub fn current_version(&self) -> &'static str {
        match self {
            EventType::Status => "1.0",
            EventType::Log => "5.1",
            EventType::Error => "4.1",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "status" => Ok(EventType::Status),
            "log" => Ok(EventType::Log),
            "error" => Ok(EventType::Error),
            other => Err(Error::InvalidInput(format!("unknown event type: {other}"))),
        }
    }
}

/// Build status change. `time` is Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: BuildStatus,
    pub time: i64,
}

/// Where inside a build a log line or error came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub origin: Origin,
    pub payload: String,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub origin: Origin,
    pub message: String,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status(Status),
    Log(Log),
    Error(ErrorEvent),
}

impl Event {
    pub fn status(status: BuildStatus, time: i64) -> Self {
        Event::Status(Status { status, time })
    }

    pub fn log(payload: impl Into<String>) -> Self {
        Event::Log(Log {
            origin: Origin::default(),
            payload: payload.into(),
            time: 0,
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Event::Status(_) => EventType::Status,
            Event::Log(_) => EventType::Log,
            Event::Error(_) => EventType::Error,
        }
    }

    pub fn version(&self) -> &'static str {
        self.event_type().current_version()
    }

    pub fn envelope(&self) -> Result<Envelope> {
        let data = match self {
            Event::Status(e) => serde_json::to_value(e)?,
            Event::Log(e) => serde_json::to_value(e)?,
            Event::Error(e) => serde_json::to_value(e)?,
        };
        Ok(Envelope {
            event: self.event_type(),
            version: self.version().to_string(),
            data,
        })
    }
}

/// Persisted, typed and versioned event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventType,
    pub version: String,
    pub data: Value,
}

impl Envelope {
    /// Decode the payload. Only the schema versions this build writes are
    /// understood; anything else is an [`Error::UnknownEvent`].
    pub fn decode(&self) -> Result<Event> {
        if self.version != self.event.current_version() {
            return Err(Error::UnknownEvent {
                event_type: self.event.to_string(),
                version: self.version.clone(),
            });
        }

        let data = self.data.clone();
        Ok(match self.event {
            EventType::Status => Event::Status(serde_json::from_value(data)?),
            EventType::Log => Event::Log(serde_json::from_value(data)?),
            EventType::Error => Event::Error(serde_json::from_value(data)?),
        })
    }
}

/// An envelope at its position in a build's event sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub build_id: BuildId,
    pub event_id: u64,
    pub envelope: Envelope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_envelope_shape() {
        let envelope = Event::status(BuildStatus::Started, 1_700_000_000).envelope().unwrap();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "event": "status",
                "version": "1.0",
                "data": {"status": "started", "time": 1_700_000_000},
            })
        );
    }

    #[test]
    fn test_envelope_decodes_back_to_event() {
        let event = Event::log("some ");
        let decoded = event.envelope().unwrap().decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let envelope = Envelope {
            event: EventType::Log,
            version: "9.9".to_string(),
            data: json!({"payload": "x"}),
        };
        assert!(matches!(
            envelope.decode(),
            Err(Error::UnknownEvent { .. })
        ));
    }
}
