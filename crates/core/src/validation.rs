// Intake validation for analytics events
//
// Every rule is checked; violations are collected and returned together so
// the caller sees all problems with a request at once.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::event::{CreateEventRequest, EventCategory};

static EVENT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid event name pattern"));

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid identifier pattern"));

/// A single violated intake rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingEventName,
    InvalidEventName,
    MissingEventType,
    UnknownEventType(String),
    PropertiesNotObject,
    FutureTimestamp,
    InvalidUserId,
    InvalidSessionId,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingEventName => f.write_str("Event name is required"),
            ValidationIssue::InvalidEventName => f.write_str(
                "Event name must start with a letter and contain only letters, numbers, and underscores",
            ),
            ValidationIssue::MissingEventType => f.write_str("Event type is required"),
            ValidationIssue::UnknownEventType(value) => {
                write!(f, "Event type '{}' is not a recognized category", value)
            }
            ValidationIssue::PropertiesNotObject => f.write_str("Properties must be an object"),
            ValidationIssue::FutureTimestamp => f.write_str("Timestamp cannot be in the future"),
            ValidationIssue::InvalidUserId => f.write_str("User ID contains invalid characters"),
            ValidationIssue::InvalidSessionId => {
                f.write_str("Session ID contains invalid characters")
            }
        }
    }
}

/// Structured rejection of an intake request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join(", "))
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    /// Human-readable reason for each violated rule
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }

    pub fn contains(&self, issue: &ValidationIssue) -> bool {
        self.issues.contains(issue)
    }
}

/// Validate a request against all intake rules, using `now` as the upper
/// bound for the occurrence timestamp.
///
/// Returns the parsed category on success.
pub fn validate_event(
    request: &CreateEventRequest,
    now: DateTime<Utc>,
) -> Result<EventCategory, ValidationError> {
    let mut issues = Vec::new();

    match request.event_name.as_deref() {
        None | Some("") => issues.push(ValidationIssue::MissingEventName),
        Some(name) if !EVENT_NAME_PATTERN.is_match(name) => {
            issues.push(ValidationIssue::InvalidEventName)
        }
        Some(_) => {}
    }

    let category = match request.event_type.as_deref() {
        None | Some("") => {
            issues.push(ValidationIssue::MissingEventType);
            None
        }
        Some(raw) => match raw.parse::<EventCategory>() {
            Ok(category) => Some(category),
            Err(_) => {
                issues.push(ValidationIssue::UnknownEventType(raw.to_string()));
                None
            }
        },
    };

    if let Some(properties) = &request.properties {
        if !properties.is_object() && !properties.is_null() {
            issues.push(ValidationIssue::PropertiesNotObject);
        }
    }

    if let Some(timestamp) = request.timestamp {
        if timestamp > now {
            issues.push(ValidationIssue::FutureTimestamp);
        }
    }

    if let Some(user_id) = request.user_id.as_deref() {
        if !IDENTIFIER_PATTERN.is_match(user_id) {
            issues.push(ValidationIssue::InvalidUserId);
        }
    }

    if let Some(session_id) = request.session_id.as_deref() {
        if !IDENTIFIER_PATTERN.is_match(session_id) {
            issues.push(ValidationIssue::InvalidSessionId);
        }
    }

    match category {
        Some(category) if issues.is_empty() => Ok(category),
        _ => Err(ValidationError { issues }),
    }
}
