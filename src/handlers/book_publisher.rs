//! Book derivatives: images, stitched pages, PDF, OCR and KML.
//!
//! With `rstar_dir` the scripts run in rstar mode over the job's identifiers.
//! Otherwise `input_path`/`output_path` are wrapped in a throwaway rstar
//! layout, `<tmp>/wip/se/<id>/{data,aux}`, and the scripts run against that.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::run_rstar;
use crate::execution::{CommandExecutor, CommandOutcome};
use crate::models::Job;
use crate::registry::{DispatchError, HandlerContext, JobHandler};

const OPERATIONS: &[&str] = &[
    "create_derivatives",
    "stitch_pages",
    "create_pdf",
    "create_ocr",
    "create_map",
    "gen_all",
];

const METS_SUFFIX: &str = "_mets.xml";

pub struct BookPublisher {
    job: Job,
    ctx: HandlerContext,
}

impl BookPublisher {
    pub fn create(job: Job, ctx: HandlerContext) -> Box<dyn JobHandler> {
        Box::new(Self { job, ctx })
    }

    fn scripts(method: &str) -> Option<&'static [&'static str]> {
        let scripts: &'static [&'static str] = match method {
            "create_derivatives" => &["create-deriv-images.pl"],
            "stitch_pages" => &["stitch-pages.pl"],
            "create_pdf" => &["create-pdf.pl"],
            "create_ocr" => &["create-ocr.pl"],
            "create_map" => &["gen-kml.pl"],
            "gen_all" => &[
                "create-deriv-images.pl",
                "stitch-pages.pl",
                "create-pdf.pl",
            ],
            _ => return None,
        };
        Some(scripts)
    }

    async fn exec(&self, scripts: &[&str]) -> Result<CommandOutcome, DispatchError> {
        if self.job.rstar_dir.is_some() {
            return Ok(run_rstar(
                self,
                &self.job,
                &self.ctx.config.book_publisher_bin_dir,
                scripts,
            )
            .await);
        }
        self.wrapped(scripts).await
    }

    async fn wrapped(&self, scripts: &[&str]) -> Result<CommandOutcome, DispatchError> {
        let (Some(input), Some(output)) = (
            self.job.input_path.as_deref(),
            self.job.output_path.as_deref(),
        ) else {
            return Ok(CommandOutcome::failure(
                "BookPublisher: input_path and output_path are required without rstar_dir",
            ));
        };

        let id = object_id(Path::new(input));
        let tmp = tempfile::Builder::new()
            .prefix("task-queue")
            .tempdir()
            .map_err(|e| DispatchError::handler_setup(format!("temporary rstar dir: {e}")))?;
        let object_dir = tmp.path().join("wip").join("se").join(&id);
        std::fs::create_dir_all(&object_dir)
            .and_then(|_| std::os::unix::fs::symlink(input, object_dir.join("data")))
            .and_then(|_| std::os::unix::fs::symlink(output, object_dir.join("aux")))
            .map_err(|e| DispatchError::handler_setup(format!("rstar layout for {id}: {e}")))?;
        debug!(rstar_dir = %tmp.path().display(), id = %id, "Wrapped paths in rstar layout");

        let bin_dir = self.ctx.config.book_publisher_bin_dir.display().to_string();
        let extra_args = self.job.extra_args.as_deref().unwrap_or_default();
        let commands: Vec<String> = scripts
            .iter()
            .map(|script| {
                let mut command = format!("{bin_dir}/{script} -q -r {}", tmp.path().display());
                if !extra_args.trim().is_empty() {
                    command.push(' ');
                    command.push_str(extra_args.trim());
                }
                command.push(' ');
                command.push_str(&id);
                command
            })
            .collect();

        Ok(CommandExecutor::new().run(commands).await)
    }
}

/// Object id from the first `*_mets.xml` in `input`, or a fresh UUID
fn object_id(input: &Path) -> String {
    let mut mets: Vec<String> = std::fs::read_dir(input)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .filter(|name| name.ends_with(METS_SUFFIX) && name.len() > METS_SUFFIX.len())
                .collect()
        })
        .unwrap_or_default();
    mets.sort();

    match mets.first() {
        Some(name) => name.trim_end_matches(METS_SUFFIX).to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            warn!(input = %input.display(), id = %id, "No METS file found, using a random id");
            id
        }
    }
}

#[async_trait]
impl JobHandler for BookPublisher {
    fn class_name(&self) -> &'static str {
        "BookPublisher"
    }

    fn operations(&self) -> &'static [&'static str] {
        OPERATIONS
    }

    async fn call(&self, method: &str) -> Result<CommandOutcome, DispatchError> {
        let scripts = Self::scripts(method)
            .ok_or_else(|| DispatchError::unknown_operation(self.class_name(), method))?;
        self.exec(scripts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tracing::Span;

    /// Bin dir whose scripts echo their name and arguments
    fn fake_bin(scripts: &[&str]) -> tempfile::TempDir {
        let bin = tempfile::tempdir().unwrap();
        for script in scripts {
            let path = bin.path().join(script);
            std::fs::write(&path, format!("#!/bin/sh\necho {script} \"$@\"\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        bin
    }

    fn publisher(job: Job, bin: &Path) -> Box<dyn JobHandler> {
        let config = HandlerConfig {
            book_publisher_bin_dir: PathBuf::from(bin),
            ..HandlerConfig::default()
        };
        BookPublisher::create(job, HandlerContext::new(Arc::new(config), Span::none()))
    }

    #[test]
    fn test_object_id_from_mets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nyu_book_42_mets.xml"), b"").unwrap();
        std::fs::write(dir.path().join("page_0001.tif"), b"").unwrap();
        assert_eq!(object_id(dir.path()), "nyu_book_42");

        let empty = tempfile::tempdir().unwrap();
        assert!(uuid::Uuid::parse_str(&object_id(empty.path())).is_ok());
    }

    #[tokio::test]
    async fn test_gen_all_runs_three_scripts_in_rstar_mode() {
        let bin = fake_bin(&["create-deriv-images.pl", "stitch-pages.pl", "create-pdf.pl"]);
        let job = Job::new("book_publisher", "gen_all")
            .with_rstar_dir("/rstar/nyu/books")
            .with_identifiers(["b1"]);
        let outcome = publisher(job, bin.path()).call("gen_all").await.unwrap();
        assert!(outcome.success);
        let lines: Vec<&str> = outcome.output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "create-deriv-images.pl -q -r /rstar/nyu/books b1",
                "stitch-pages.pl -q -r /rstar/nyu/books b1",
                "create-pdf.pl -q -r /rstar/nyu/books b1",
            ]
        );
    }

    #[tokio::test]
    async fn test_paths_are_wrapped_in_temporary_layout() {
        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("create-pdf.pl");
        // Print the id and list the wrapped data directory
        std::fs::write(
            &script,
            "#!/bin/sh\nrstar=\"$3\"\nfor id; do :; done\necho \"$4 $id\"\nls \"$rstar/wip/se/$id/data/\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("book7_mets.xml"), b"").unwrap();
        let output = tempfile::tempdir().unwrap();

        let mut job = Job::new("book_publisher", "create-pdf");
        job.input_path = Some(input.path().display().to_string());
        job.output_path = Some(output.path().display().to_string());
        job.extra_args = Some("--dpi=300".to_string());

        let outcome = publisher(job, bin.path()).call("create_pdf").await.unwrap();
        assert!(outcome.success, "{}", outcome.output);
        assert_eq!(outcome.output, "--dpi=300 book7\nbook7_mets.xml\n");
    }

    #[tokio::test]
    async fn test_missing_paths_fail() {
        let bin = tempfile::tempdir().unwrap();
        let outcome = publisher(Job::new("book_publisher", "create_ocr"), bin.path())
            .call("create_ocr")
            .await
            .unwrap();
        assert!(!outcome.success);
    }
}
