//! # Job Submission
//!
//! Turns one producer invocation into a batch of jobs: the batch row is
//! written first, then each job is recorded as submitted, announced on the
//! logging exchange and enqueued on the work queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::constants::DEFAULT_MAX_PRIORITY;
use crate::error::{Result, TaskQueueError};
use crate::lifecycle::{JobStore, LifecycleTracker};
use crate::messaging::{JobProducer, LifecyclePublisher};
use crate::models::{Batch, Job};

/// Everything a producer asks for in one invocation
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// `class:operation`, e.g. `video:transcode`
    pub service: String,
    pub identifiers: Vec<String>,
    pub rstar_dir: Option<PathBuf>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub extra_args: String,
    pub priority: u8,
    /// Extra keys merged into every job (handler configuration)
    pub json_config: Option<Map<String, Value>>,
    pub user_id: String,
    pub cmd_line: String,
}

impl SubmitRequest {
    /// Split `class:operation`
    pub fn service_parts(&self) -> Result<(&str, &str)> {
        match self.service.split_once(':') {
            Some((class, operation)) if !class.is_empty() && !operation.is_empty() => {
                Ok((class, operation))
            }
            _ => Err(TaskQueueError::Validation(format!(
                "service must look like <class>:<operation>, got '{}'",
                self.service
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (class, _) = self.service_parts()?;
        if self.priority > DEFAULT_MAX_PRIORITY {
            return Err(TaskQueueError::Validation(format!(
                "priority must be between 0 and {DEFAULT_MAX_PRIORITY}"
            )));
        }
        if class == "util" {
            return Ok(());
        }

        let has_rstar = self.rstar_dir.is_some();
        let has_input = self.input_path.is_some();
        let has_output = self.output_path.is_some();
        if has_rstar && (has_input || has_output) {
            return Err(TaskQueueError::Validation(
                "rstar_dir can't be used with input/output paths".to_string(),
            ));
        }
        if has_input != has_output {
            return Err(TaskQueueError::Validation(
                "input/output paths must be set together".to_string(),
            ));
        }
        if !has_rstar && !has_input {
            return Err(TaskQueueError::Validation(
                "Missing rstar_dir or input/output path pair".to_string(),
            ));
        }
        Ok(())
    }

    /// The jobs to submit: one per identifier with `rstar_dir` (every
    /// subdirectory when none are given), otherwise a single job
    pub fn build_jobs(&self, batch_id: i64) -> Result<Vec<Job>> {
        let (class, operation) = self.service_parts()?;
        let mut template = Job::new(class, operation);
        template.batch_id = Some(batch_id);
        template.user_id = Some(self.user_id.clone());
        template.extra_args = Some(self.extra_args.clone());
        template.priority = Some(self.priority);
        template.rstar_dir = self.rstar_dir.as_ref().map(|p| p.display().to_string());
        template.input_path = self.input_path.as_ref().map(|p| p.display().to_string());
        template.output_path = self.output_path.as_ref().map(|p| p.display().to_string());
        template.identifiers = self.identifiers.clone();

        if let Some(extra) = &self.json_config {
            template = merge_config(&template, extra)?;
        }

        let Some(rstar_dir) = &self.rstar_dir else {
            return Ok(vec![template]);
        };
        let identifiers = if self.identifiers.is_empty() {
            subdirectories(rstar_dir)?
        } else {
            self.identifiers.clone()
        };
        Ok(identifiers
            .into_iter()
            .map(|id| template.for_identifier(id))
            .collect())
    }
}

fn merge_config(job: &Job, extra: &Map<String, Value>) -> Result<Job> {
    let mut value = job.to_json_value()?;
    if let Value::Object(object) = &mut value {
        for (key, v) in extra {
            object.insert(key.clone(), v.clone());
        }
    }
    let bytes = serde_json::to_vec(&value)?;
    Job::from_payload(&bytes).map_err(|e| TaskQueueError::Validation(e.to_string()))
}

/// Sorted names of the directories directly under `dir`
fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// What a submission produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub batch_id: i64,
    pub job_ids: Vec<i64>,
}

pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    tracker: LifecycleTracker,
    producer: Arc<dyn JobProducer>,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn LifecyclePublisher>,
        producer: Arc<dyn JobProducer>,
    ) -> Self {
        Self {
            tracker: LifecycleTracker::new(store.clone(), publisher),
            store,
            producer,
        }
    }

    /// Validate, then record and enqueue every job. Store and broker
    /// failures abort the submission.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmitReceipt> {
        request.validate()?;

        let batch_id = self
            .store
            .create_batch(&Batch::new(&request.user_id, &request.cmd_line))
            .await?;
        let jobs = request.build_jobs(batch_id)?;
        debug!(batch_id, jobs = jobs.len(), "Submitting batch");

        let mut job_ids = Vec::with_capacity(jobs.len());
        for mut job in jobs {
            let job_id = self.store.insert(&job).await?;
            job.job_id = Some(job_id);
            self.tracker.publish(&job).await;
            self.producer.enqueue(&job.to_json()?, job.priority).await?;
            info!(
                job_id,
                batch_id,
                class = %job.class,
                operation = %job.operation,
                identifiers = ?job.identifiers,
                "📨 SUBMIT: Job enqueued"
            );
            job_ids.push(job_id);
        }

        Ok(SubmitReceipt { batch_id, job_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::InMemoryJobStore;
    use crate::messaging::InMemoryBroker;
    use crate::state_machine::JobState;

    fn request(service: &str) -> SubmitRequest {
        SubmitRequest {
            service: service.to_string(),
            user_id: "jdoe".to_string(),
            cmd_line: "task-queue submit".to_string(),
            ..SubmitRequest::default()
        }
    }

    #[test]
    fn test_path_rules() {
        let mut req = request("video:transcode");
        assert!(req.validate().is_err());

        req.rstar_dir = Some(PathBuf::from("/rstar/nyu/aco"));
        assert!(req.validate().is_ok());

        req.input_path = Some(PathBuf::from("/in"));
        assert!(req.validate().is_err());

        req.rstar_dir = None;
        assert!(req.validate().is_err());

        req.output_path = Some(PathBuf::from("/out"));
        assert!(req.validate().is_ok());

        assert!(request("util:ping").validate().is_ok());
        assert!(request("util").validate().is_err());
    }

    #[test]
    fn test_identifiers_default_to_subdirectories() {
        let rstar = tempfile::tempdir().unwrap();
        for dir in ["b2", "a1"] {
            std::fs::create_dir(rstar.path().join(dir)).unwrap();
        }
        std::fs::write(rstar.path().join("README"), b"").unwrap();

        let mut req = request("video:transcode");
        req.rstar_dir = Some(rstar.path().to_path_buf());
        let jobs = req.build_jobs(1).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.identifiers[0].as_str()).collect();
        assert_eq!(ids, vec!["a1", "b2"]);
    }

    #[test]
    fn test_json_config_is_merged() {
        let mut req = request("util:ping");
        let mut extra = Map::new();
        extra.insert("profile".to_string(), Value::from("hd"));
        extra.insert("extra_args".to_string(), Value::from("-x"));
        req.json_config = Some(extra);

        let jobs = req.build_jobs(3).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].extra_args.as_deref(), Some("-x"));
        assert_eq!(jobs[0].extra.get("profile"), Some(&Value::from("hd")));
    }

    #[tokio::test]
    async fn test_submit_records_publishes_and_enqueues() {
        let store = Arc::new(InMemoryJobStore::new());
        let broker = InMemoryBroker::new();
        let submitter = JobSubmitter::new(
            store.clone(),
            Arc::new(broker.clone()),
            Arc::new(broker.producer("task_queue")),
        );

        let mut req = request("video:transcode");
        req.rstar_dir = Some(PathBuf::from("/rstar/nyu/aco"));
        req.identifiers = vec!["x1".to_string(), "x2".to_string()];
        req.priority = 5;

        let receipt = submitter.submit(&req).await.unwrap();
        assert_eq!(receipt.job_ids.len(), 2);
        assert_eq!(store.batch(receipt.batch_id).unwrap().user_id, "jdoe");
        for job_id in &receipt.job_ids {
            assert_eq!(store.job(*job_id).unwrap().state, JobState::Submitted);
        }
        assert_eq!(broker.ready_count("task_queue"), 2);
        let keys: Vec<String> = broker.published().into_iter().map(|e| e.routing_key).collect();
        assert_eq!(keys, vec!["task_queue.submitted", "task_queue.submitted"]);
    }
}
