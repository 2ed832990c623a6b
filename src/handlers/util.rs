//! Diagnostics: network probe, fortune, a guaranteed failure, and a runtime dump.

use async_trait::async_trait;

use crate::execution::{CommandExecutor, CommandOutcome};
use crate::models::Job;
use crate::registry::{DispatchError, HandlerContext, JobHandler};

const OPERATIONS: &[&str] = &["ping", "fortune", "nope", "env"];

/// Variable name fragments whose values never reach the job output
const SENSITIVE_NAME_PARTS: &[&str] = &["URL", "PASSWORD", "SECRET", "TOKEN"];

pub struct Util {
    job: Job,
    ctx: HandlerContext,
}

impl Util {
    pub fn create(job: Job, ctx: HandlerContext) -> Box<dyn JobHandler> {
        Box::new(Self { job, ctx })
    }

    async fn env(&self) -> CommandOutcome {
        let mut report = format!(
            "{} {}\npid: {}\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::process::id()
        );
        if let Ok(dir) = std::env::current_dir() {
            report.push_str(&format!("cwd: {}\n", dir.display()));
        }
        if let Ok(exe) = std::env::current_exe() {
            report.push_str(&format!("exe: {}\n", exe.display()));
        }
        report.push_str(&format!("job: {}\n", self.job.class));

        let uname = CommandExecutor::new().run(["uname -a"]).await;
        report.push_str(&uname.output);

        let mut vars: Vec<(String, String)> = std::env::vars().collect();
        vars.sort();
        for (key, value) in vars {
            report.push_str(&env_line(&key, &value));
        }
        CommandOutcome::success(report)
    }
}

fn env_line(key: &str, value: &str) -> String {
    let upper = key.to_ascii_uppercase();
    if SENSITIVE_NAME_PARTS.iter().any(|part| upper.contains(part)) {
        format!("{key}=[REDACTED]\n")
    } else {
        format!("{key}={value}\n")
    }
}

#[async_trait]
impl JobHandler for Util {
    fn class_name(&self) -> &'static str {
        "Util"
    }

    fn operations(&self) -> &'static [&'static str] {
        OPERATIONS
    }

    async fn call(&self, method: &str) -> Result<CommandOutcome, DispatchError> {
        let executor = CommandExecutor::new();
        let outcome = match method {
            "ping" => {
                let config = &self.ctx.config;
                executor
                    .run([format!("{} {}", config.ping_command, config.ping_target)])
                    .await
            }
            "fortune" => executor.run(["fortune"]).await,
            "nope" => executor.run(["false"]).await,
            "env" => self.env().await,
            other => return Err(DispatchError::unknown_operation(self.class_name(), other)),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use std::sync::Arc;
    use tracing::Span;

    fn util(config: HandlerConfig) -> Box<dyn JobHandler> {
        Util::create(
            Job::new("util", "ping"),
            HandlerContext::new(Arc::new(config), Span::none()),
        )
    }

    #[tokio::test]
    async fn test_ping_captures_output() {
        let config = HandlerConfig {
            ping_command: "echo reply from".to_string(),
            ping_target: "localhost".to_string(),
            ..HandlerConfig::default()
        };
        let outcome = util(config).call("ping").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "reply from localhost\n");
    }

    #[tokio::test]
    async fn test_nope_fails() {
        let outcome = util(HandlerConfig::default()).call("nope").await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_env_reports_runtime() {
        let outcome = util(HandlerConfig::default()).call("env").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_credentials_are_redacted() {
        assert_eq!(
            env_line("DATABASE_URL", "postgresql://tq:hunter2@db/task_queue"),
            "DATABASE_URL=[REDACTED]\n"
        );
        assert_eq!(
            env_line("TASK_QUEUE__DATABASE__URL", "postgresql://tq:hunter2@db"),
            "TASK_QUEUE__DATABASE__URL=[REDACTED]\n"
        );
        assert_eq!(env_line("PGPASSWORD", "hunter2"), "PGPASSWORD=[REDACTED]\n");
        assert_eq!(env_line("aws_secret_key", "abc"), "aws_secret_key=[REDACTED]\n");
        assert_eq!(env_line("GITHUB_TOKEN", "ghp_x"), "GITHUB_TOKEN=[REDACTED]\n");
        assert_eq!(env_line("HOME", "/home/tq"), "HOME=/home/tq\n");
    }

    #[tokio::test]
    async fn test_env_report_hides_broker_credentials() {
        std::env::set_var("TQ_UTIL_TEST_BROKER_URL", "amqp://tq:hunter2@mq/%2f");
        let outcome = util(HandlerConfig::default()).call("env").await.unwrap();
        assert!(outcome.output.contains("TQ_UTIL_TEST_BROKER_URL=[REDACTED]"));
        assert!(!outcome.output.contains("hunter2"));
    }
}
