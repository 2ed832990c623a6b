//! Video derivatives via the rstar tool chain.

use async_trait::async_trait;

use super::run_rstar;
use crate::execution::CommandOutcome;
use crate::models::Job;
use crate::registry::{DispatchError, HandlerContext, JobHandler};

pub struct Video {
    job: Job,
    ctx: HandlerContext,
}

impl Video {
    pub fn create(job: Job, ctx: HandlerContext) -> Box<dyn JobHandler> {
        Box::new(Self { job, ctx })
    }

    async fn run(&self, script: &str) -> CommandOutcome {
        run_rstar(self, &self.job, &self.ctx.config.rstar_bin_dir, &[script]).await
    }
}

#[async_trait]
impl JobHandler for Video {
    fn class_name(&self) -> &'static str {
        "Video"
    }

    fn operations(&self) -> &'static [&'static str] {
        &["transcode", "make_contact_sheet"]
    }

    async fn call(&self, method: &str) -> Result<CommandOutcome, DispatchError> {
        match method {
            "transcode" => Ok(self.run("create-mp4").await),
            "make_contact_sheet" => Ok(self.run("vcs").await),
            other => Err(DispatchError::unknown_operation(self.class_name(), other)),
        }
    }
}
