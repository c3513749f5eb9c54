// Analytics event model
//
// An Event is created once at intake and never mutated afterwards. Flushing
// only moves it between the in-memory buffer and the column store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form JSON object used for event properties and metadata
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Version tag applied when a request does not carry one
pub const DEFAULT_EVENT_VERSION: &str = "1.0.0";

/// Closed set of event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    UserInteraction,
    LearningEvent,
    PerformanceEvent,
    BusinessEvent,
    SystemEvent,
    ErrorEvent,
}

impl EventCategory {
    pub const ALL: [EventCategory; 6] = [
        EventCategory::UserInteraction,
        EventCategory::LearningEvent,
        EventCategory::PerformanceEvent,
        EventCategory::BusinessEvent,
        EventCategory::SystemEvent,
        EventCategory::ErrorEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::UserInteraction => "USER_INTERACTION",
            EventCategory::LearningEvent => "LEARNING_EVENT",
            EventCategory::PerformanceEvent => "PERFORMANCE_EVENT",
            EventCategory::BusinessEvent => "BUSINESS_EVENT",
            EventCategory::SystemEvent => "SYSTEM_EVENT",
            EventCategory::ErrorEvent => "ERROR_EVENT",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for EventCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Where an event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    #[default]
    WebApp,
    MobileApp,
    Api,
    BackgroundJob,
    System,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::WebApp => "WEB_APP",
            EventSource::MobileApp => "MOBILE_APP",
            EventSource::Api => "API",
            EventSource::BackgroundJob => "BACKGROUND_JOB",
            EventSource::System => "SYSTEM",
        }
    }
}

/// Client platform that produced the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    #[default]
    Web,
    Ios,
    Android,
    Desktop,
    Server,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "WEB",
            Platform::Ios => "IOS",
            Platform::Android => "ANDROID",
            Platform::Desktop => "DESKTOP",
            Platform::Server => "SERVER",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// A validated analytics event.
///
/// Serialized in camelCase, which is also the shape of the cached snapshot
/// and of the entries in the real-time list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub event_type: EventCategory,
    pub event_name: String,
    #[serde(default)]
    pub properties: JsonMap,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub version: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub metadata: JsonMap,
}

/// Intake request for a single event.
///
/// Every field is optional here so validation can report all violated rules
/// together. `event_type` stays a raw string and `properties` an arbitrary
/// JSON value until validation has looked at them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub metadata: Option<JsonMap>,
}

impl CreateEventRequest {
    /// Minimal request with a category and a name
    pub fn new(event_type: EventCategory, event_name: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.as_str().to_string()),
            event_name: Some(event_name.into()),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }
}

impl Event {
    /// Build an event from a request that already passed validation.
    ///
    /// Applies intake defaults for every optional attribute and assigns a
    /// fresh time-ordered id.
    pub(crate) fn from_validated(
        request: CreateEventRequest,
        event_type: EventCategory,
        now: DateTime<Utc>,
    ) -> Self {
        let properties = match request.properties {
            Some(serde_json::Value::Object(map)) => map,
            _ => JsonMap::new(),
        };

        Self {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            session_id: request.session_id,
            event_type,
            event_name: request.event_name.unwrap_or_default(),
            properties,
            timestamp: request.timestamp.unwrap_or(now),
            source: request.source.unwrap_or_default(),
            version: request
                .version
                .unwrap_or_else(|| DEFAULT_EVENT_VERSION.to_string()),
            platform: request.platform.unwrap_or_default(),
            user_agent: request.user_agent,
            ip_address: request.ip_address,
            location: request.location,
            metadata: request.metadata.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_round_trips_through_str() {
        for category in EventCategory::ALL {
            assert_eq!(category.as_str().parse::<EventCategory>(), Ok(category));
        }
        assert!("CLICK".parse::<EventCategory>().is_err());
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: CreateEventRequest = serde_json::from_value(json!({
            "userId": "u1",
            "eventType": "LEARNING_EVENT",
            "eventName": "LessonCompleted",
            "properties": {"lesson": 3},
            "platform": "IOS"
        }))
        .unwrap();

        assert_eq!(request.user_id.as_deref(), Some("u1"));
        assert_eq!(request.event_type.as_deref(), Some("LEARNING_EVENT"));
        assert_eq!(request.platform, Some(Platform::Ios));
        assert_eq!(request.properties, Some(json!({"lesson": 3})));
    }

    #[test]
    fn test_defaults_applied_at_intake() {
        let now = Utc::now();
        let request = CreateEventRequest::new(EventCategory::SystemEvent, "Ping");
        let event = Event::from_validated(request, EventCategory::SystemEvent, now);

        assert_eq!(event.event_name, "Ping");
        assert_eq!(event.timestamp, now);
        assert_eq!(event.source, EventSource::WebApp);
        assert_eq!(event.platform, Platform::Web);
        assert_eq!(event.version, DEFAULT_EVENT_VERSION);
        assert!(event.properties.is_empty());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_event_snapshot_shape() {
        let request = CreateEventRequest::new(EventCategory::UserInteraction, "ButtonClick")
            .with_user_id("u1")
            .with_properties(json!({"button": "start"}));
        let event = Event::from_validated(request, EventCategory::UserInteraction, Utc::now());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "USER_INTERACTION");
        assert_eq!(value["eventName"], "ButtonClick");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["properties"]["button"], "start");
        assert!(value.get("sessionId").is_none());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
