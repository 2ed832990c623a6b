//! Built-in handler families.
//!
//! Each family is a thin wrapper over [`CommandExecutor`]: it turns the job
//! record into one or more shell commands and reports their combined output.
//!
//! [`CommandExecutor`]: crate::execution::CommandExecutor

pub mod audio;
pub mod bagit;
pub mod book_publisher;
pub mod util;
pub mod video;

pub use audio::Audio;
pub use bagit::Bagit;
pub use book_publisher::BookPublisher;
pub use util::Util;
pub use video::Video;

use crate::execution::{CommandExecutor, CommandOutcome, RstarInvocation};
use crate::models::Job;
use crate::registry::{HandlerRegistry, JobHandler};
use std::path::Path;

/// Register every built-in family under its type name
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register("Util", Util::create);
    registry.register("BookPublisher", BookPublisher::create);
    registry.register("Bagit", Bagit::create);
    registry.register("Video", Video::create);
    registry.register("Audio", Audio::create);
}

/// Run `scripts` in rstar mode against the job's `rstar_dir` and identifiers.
/// Jobs without `rstar_dir` fail without running anything.
pub(crate) async fn run_rstar(
    handler: &dyn JobHandler,
    job: &Job,
    bin_dir: &Path,
    scripts: &[&str],
) -> CommandOutcome {
    let Some(rstar_dir) = job.rstar_dir.as_deref() else {
        return CommandOutcome::failure(format!(
            "{}: rstar_dir is required",
            handler.class_name()
        ));
    };
    CommandExecutor::new()
        .with_rstar(RstarInvocation::new(
            bin_dir,
            rstar_dir,
            job.identifiers.clone(),
        ))
        .run(scripts.iter().map(|script| script.to_string()).collect::<Vec<_>>())
        .await
}
