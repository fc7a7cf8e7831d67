//! Queued unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Payload;

/// Generate a job identifier.
///
/// Uses UUIDv7, so identifiers are unique and ordered by creation time.
pub fn new_job_id() -> String {
    Uuid::now_v7().to_string()
}

/// A background job.
///
/// The queue treats the serialized form as opaque; `kind` is interpreted by
/// consumers only. `retries` is caller-managed and never touched by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID (assigned on enqueue when empty)
    #[serde(default)]
    pub id: String,
    /// Type tag used by consumers for routing
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary structured payload
    #[serde(default)]
    pub payload: Payload,
    /// Creation time (assigned on enqueue when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Retry counter maintained by the caller
    #[serde(default)]
    pub retries: u32,
}

impl Job {
    /// Create a job with no ID or timestamp; both are filled in on enqueue.
    pub fn new(kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: String::new(),
            kind: kind.into(),
            payload,
            created_at: None,
            retries: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Assign an ID and creation time if the caller left them unset.
    ///
    /// Values the caller provided are never overwritten.
    pub fn ensure_defaults(&mut self) {
        if self.id.is_empty() {
            self.id = new_job_id();
        }
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn ensure_defaults_fills_missing_id_and_timestamp() {
        let mut job = Job::new("email", payload(json!({"to": "a@b.com"})));
        job.ensure_defaults();

        assert!(!job.id.is_empty());
        assert!(job.created_at.is_some());
    }

    #[test]
    fn ensure_defaults_keeps_caller_values() {
        let at = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut job = Job::new("email", Payload::new())
            .with_id("job-1")
            .with_created_at(at);
        job.ensure_defaults();

        assert_eq!(job.id, "job-1");
        assert_eq!(job.created_at, Some(at));
    }

    #[test]
    fn wire_form_uses_documented_field_names() {
        let at = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let job = Job::new("email", payload(json!({"to": "a@b.com"})))
            .with_id("job-1")
            .with_created_at(at)
            .with_retries(2);

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "job-1",
                "type": "email",
                "payload": {"to": "a@b.com"},
                "created_at": "2024-01-02T03:04:05Z",
                "retries": 2
            })
        );
    }

    #[test]
    fn decoding_tolerates_missing_optional_fields() {
        let job: Job = serde_json::from_value(json!({"type": "report"})).unwrap();

        assert_eq!(job.kind, "report");
        assert!(job.id.is_empty());
        assert!(job.payload.is_empty());
        assert_eq!(job.created_at, None);
        assert_eq!(job.retries, 0);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = new_job_id();
        let b = new_job_id();
        assert_ne!(a, b);
    }
}
