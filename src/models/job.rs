//! # Job Model
//!
//! The unit of work carried on the queue, mirrored in the `job` table.
//!
//! ## Overview
//!
//! A producer serializes a `Job` as a JSON object and enqueues it. A worker
//! parses the payload back, stamps it as it moves through the lifecycle, and
//! writes the full record to the job store after every transition.
//!
//! ## Payload compatibility
//!
//! - Keys the model does not know about are preserved in [`Job::extra`] and
//!   written back out unchanged, so producers can attach handler settings.
//! - The legacy state name `pending` is read as `submitted`.
//! - `started`/`completed` use second resolution local wall-clock time.
//!
//! ## Parse outcomes
//!
//! [`Job::from_payload`] separates two failure modes. Bytes that are not a JSON
//! object cannot be attributed to any job and are handed back to the broker.
//! A JSON object that does not fit the schema still identifies a job, so its
//! recognizable fields are salvaged and the job is failed in the store.

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::constants::TIMESTAMP_FORMAT;
use crate::state_machine::JobState;

/// Local wall-clock timestamp with second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobTimestamp(NaiveDateTime);

impl JobTimestamp {
    pub fn now() -> Self {
        Self::from_naive(Local::now().naive_local())
    }

    /// Truncates sub-second precision
    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self(value.with_nanosecond(0).unwrap_or(value))
    }

    pub fn parse(text: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Local).naive_local())
            })
            .map(Self::from_naive)
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for JobTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl Serialize for JobTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {text}")))
    }
}

/// A queued unit of work and its lifecycle record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the store on first write; immutable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<i64>,

    /// Handler family, e.g. `book_publisher`
    pub class: String,

    /// Handler method, e.g. `create-pdf`
    pub operation: String,

    #[serde(default)]
    pub identifiers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rstar_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Appended verbatim to handler command lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Broker priority requested by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(default)]
    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<JobTimestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<JobTimestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Producer-supplied keys outside the schema
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why a payload could not be turned into a [`Job`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    /// Not a JSON object; nothing identifies the job
    #[error("payload is not a JSON object: {0}")]
    NotAnObject(String),
    /// A JSON object that does not fit the schema; carries what could be recovered
    #[error("malformed job payload: {reason}")]
    Malformed { job: Box<Job>, reason: String },
}

impl Job {
    pub fn new(class: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            job_id: None,
            batch_id: None,
            class: class.into(),
            operation: operation.into(),
            identifiers: Vec::new(),
            rstar_dir: None,
            input_path: None,
            output_path: None,
            extra_args: None,
            user_id: None,
            priority: None,
            state: JobState::Submitted,
            worker_host: None,
            started: None,
            completed: None,
            output: None,
            extra: Map::new(),
        }
    }

    pub fn with_identifiers<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifiers = identifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rstar_dir(mut self, rstar_dir: impl Into<String>) -> Self {
        self.rstar_dir = Some(rstar_dir.into());
        self
    }

    /// Parse a raw message body
    pub fn from_payload(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| PayloadError::NotAnObject(e.to_string()))?;
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(PayloadError::NotAnObject(format!(
                    "found {}",
                    json_kind(&other)
                )))
            }
        };

        match serde_json::from_value::<Job>(Value::Object(object.clone())) {
            Ok(job) => Ok(job),
            Err(e) => Err(PayloadError::Malformed {
                job: Box::new(Self::salvage(&object)),
                reason: e.to_string(),
            }),
        }
    }

    /// Recover whatever identifies the job from an object that failed to parse
    fn salvage(object: &Map<String, Value>) -> Self {
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let int = |key: &str| object.get(key).and_then(Value::as_i64);

        let mut job = Self::new(
            text("class").unwrap_or_default(),
            text("operation").unwrap_or_default(),
        );
        job.job_id = int("job_id");
        job.batch_id = int("batch_id");
        job.user_id = text("user_id");
        job.rstar_dir = text("rstar_dir");
        job.input_path = text("input_path");
        job.output_path = text("output_path");
        if let Some(Value::Array(ids)) = object.get("identifiers") {
            job.identifiers = ids
                .iter()
                .filter_map(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
        }
        job
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn to_json_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// `rstar_dir` as a path
    pub fn rstar_path(&self) -> Option<&Path> {
        self.rstar_dir.as_deref().map(Path::new)
    }

    /// `(provider, collection)` from the last two components of `rstar_dir`
    pub fn provider_collection(&self) -> Option<(String, String)> {
        let path = PathBuf::from(self.rstar_dir.as_deref()?.trim_end_matches('/'));
        let mut parts = path
            .components()
            .rev()
            .filter_map(|c| c.as_os_str().to_str().map(str::to_string));
        let collection = parts.next()?;
        let provider = parts.next()?;
        if provider == "/" {
            return None;
        }
        Some((provider, collection))
    }

    /// First identifier, when the job names exactly one object
    pub fn primary_identifier(&self) -> Option<&str> {
        self.identifiers.first().map(String::as_str)
    }

    /// Copy of this job narrowed to a single identifier, ready to be recorded afresh
    pub fn for_identifier(&self, identifier: impl Into<String>) -> Self {
        let mut job = self.clone();
        job.job_id = None;
        job.identifiers = vec![identifier.into()];
        job
    }

    /// Stamp the fields set when a worker claims the job
    pub fn mark_started(&mut self, worker_host: impl Into<String>) {
        self.worker_host = Some(worker_host.into());
        self.started = Some(JobTimestamp::now());
    }

    /// Stamp completion time and captured output
    pub fn mark_completed(&mut self, output: impl Into<String>) {
        self.completed = Some(JobTimestamp::now());
        self.output = Some(output.into());
    }

    /// Output as stored: blank output becomes NULL
    pub fn stored_output(&self) -> Option<&str> {
        self.output.as_deref().filter(|o| !o.trim().is_empty())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_payload_defaults() {
        let job = Job::from_payload(br#"{"class": "util", "operation": "ping"}"#).unwrap();
        assert_eq!(job.class, "util");
        assert_eq!(job.operation, "ping");
        assert_eq!(job.state, JobState::Submitted);
        assert!(job.identifiers.is_empty());
        assert!(job.job_id.is_none());
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let payload = json!({
            "class": "video",
            "operation": "transcode",
            "state": "pending",
            "job_id": 42,
            "crf": 23,
            "preset": {"size": "720p"}
        });
        let job = Job::from_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(job.job_id, Some(42));
        assert_eq!(job.extra.get("crf"), Some(&json!(23)));

        let emitted = job.to_json_value().unwrap();
        assert_eq!(emitted["preset"], json!({"size": "720p"}));
        assert_eq!(emitted["state"], json!("submitted"));
    }

    #[test]
    fn test_non_object_payloads() {
        assert!(matches!(
            Job::from_payload(b"not json at all"),
            Err(PayloadError::NotAnObject(_))
        ));
        assert!(matches!(
            Job::from_payload(b"[1, 2, 3]"),
            Err(PayloadError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_malformed_object_is_salvaged() {
        let payload = json!({"job_id": 7, "class": "util", "identifiers": "abc"});
        match Job::from_payload(payload.to_string().as_bytes()) {
            Err(PayloadError::Malformed { job, reason }) => {
                assert_eq!(job.job_id, Some(7));
                assert_eq!(job.class, "util");
                assert!(!reason.is_empty());
            }
            other => panic!("expected malformed payload, got {other:?}"),
        }
    }

    #[test]
    fn test_timestamp_format() {
        let ts = JobTimestamp::parse("2024-03-05 07:08:09").unwrap();
        assert_eq!(ts.to_string(), "2024-03-05 07:08:09");
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"2024-03-05 07:08:09\"");
        assert!(JobTimestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_provider_collection() {
        let job = Job::new("video", "transcode").with_rstar_dir("/content/prod/rstar/content/nyu/aco/");
        assert_eq!(
            job.provider_collection(),
            Some(("nyu".to_string(), "aco".to_string()))
        );
        assert!(Job::new("util", "ping").provider_collection().is_none());
    }

    #[test]
    fn test_blank_output_is_not_stored() {
        let mut job = Job::new("util", "nope");
        job.mark_completed("  \n");
        assert!(job.stored_output().is_none());
        job.mark_completed("done");
        assert_eq!(job.stored_output(), Some("done"));
    }

    #[test]
    fn test_for_identifier_clears_job_id() {
        let mut job = Job::new("book_publisher", "create-pdf").with_identifiers(["a", "b"]);
        job.job_id = Some(3);
        let single = job.for_identifier("b");
        assert_eq!(single.identifiers, vec!["b".to_string()]);
        assert!(single.job_id.is_none());
    }
}
