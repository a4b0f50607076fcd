use crate::property::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Represents a single analytics event.
///
/// An event may be a regular capture event or a session replay snapshot;
/// both travel through the transport in ordered batches.
#[derive(serde::Serialize, Debug, PartialEq)]
pub struct Event {
    event: String,

    distinct_id: String,

    uuid: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    properties: HashMap<String, Value>,
}

impl Event {
    /// Create a new event with a name and a distinct id, and assign it a
    /// fresh unique identifier.
    pub fn new(event: &str, distinct_id: &str) -> Event {
        Event {
            event: event.to_string(),
            distinct_id: distinct_id.to_string(),
            uuid: Uuid::new_v4().to_string(),
            timestamp: None,
            properties: HashMap::new(),
        }
    }

    /// Set the event name. This is a required field.
    pub fn event(mut self, event: &str) -> Self {
        self.event = event.to_string();
        self
    }

    pub fn set_event(&mut self, event: &str) {
        self.event = event.to_string();
    }

    /// Set the distinct id of the person this event belongs to. This is a
    /// required field.
    pub fn distinct_id(mut self, distinct_id: &str) -> Self {
        self.distinct_id = distinct_id.to_string();
        self
    }

    pub fn set_distinct_id(&mut self, distinct_id: &str) {
        self.distinct_id = distinct_id.to_string();
    }

    /// Override the unique identifier assigned at construction.
    ///
    /// The identifier enables the ingestion service to deduplicate events
    /// that are delivered more than once.
    pub fn uuid(mut self, uuid: &str) -> Self {
        self.uuid = uuid.to_string();
        self
    }

    pub fn set_uuid(&mut self, uuid: &str) {
        self.uuid = uuid.to_string();
    }

    /// Set the capture time of the event, in milliseconds since the epoch.
    /// If unset, the ingestion service assigns the time of arrival.
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = Some(timestamp);
    }

    /// Set a property on the event.
    pub fn property<T: Into<Value>>(mut self, key: &str, value: T) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn set_property<T: Into<Value>>(&mut self, key: &str, value: T) {
        self.properties.insert(key.to_string(), value.into());
    }
}
