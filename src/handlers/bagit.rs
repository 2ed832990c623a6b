//! BagIt package validation.

use async_trait::async_trait;

use crate::execution::{CommandExecutor, CommandOutcome};
use crate::models::Job;
use crate::registry::{DispatchError, HandlerContext, JobHandler};

pub struct Bagit {
    job: Job,
    ctx: HandlerContext,
}

impl Bagit {
    pub fn create(job: Job, ctx: HandlerContext) -> Box<dyn JobHandler> {
        Box::new(Self { job, ctx })
    }

    async fn validate(&self) -> CommandOutcome {
        let Some(input_path) = self.job.input_path.as_deref() else {
            return CommandOutcome::failure("Bagit.validate: Must specify input_path.");
        };
        CommandExecutor::new()
            .run([format!(
                "{} verifyvalid {}",
                self.ctx.config.bagit_command, input_path
            )])
            .await
    }
}

#[async_trait]
impl JobHandler for Bagit {
    fn class_name(&self) -> &'static str {
        "Bagit"
    }

    fn operations(&self) -> &'static [&'static str] {
        &["validate"]
    }

    async fn call(&self, method: &str) -> Result<CommandOutcome, DispatchError> {
        match method {
            "validate" => Ok(self.validate().await),
            other => Err(DispatchError::unknown_operation(self.class_name(), other)),
        }
    }
}
