//! configure-host: run a list of commands on a target, in order.
//!
//! Each command gets its own timeout. The first command that fails stops
//! the job; later commands are never started.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::JobContext;
use crate::domain::{JobError, JobKind, Outcome, ValidationError};
use crate::exec::CommandOutput;
use crate::typed::{Handler, JobSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureHost {
    pub target: String,
    pub commands: Vec<String>,
    /// Per command, not for the whole job.
    #[serde(default, with = "crate::config::duration_opt")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub workdir: Option<String>,
}

impl JobSpec for ConfigureHost {
    const KIND: JobKind = JobKind::ConfigureHost;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CommandReport {
    command: String,
    exit_code: Option<i32>,
    truncated: bool,
}

impl CommandReport {
    fn new(command: &str, output: &CommandOutput) -> Self {
        Self {
            command: command.to_string(),
            exit_code: output.exit_code,
            truncated: output.truncated,
        }
    }
}

pub struct ConfigureHostHandler;

#[async_trait]
impl Handler<ConfigureHost> for ConfigureHostHandler {
    async fn execute(&self, params: ConfigureHost, ctx: &JobContext) -> Result<Outcome, JobError> {
        if params.commands.is_empty() {
            return Err(ValidationError::InvalidParams {
                kind: JobKind::ConfigureHost,
                reason: "at least one command is required".to_string(),
            }
            .into());
        }
        let executor = ctx.executor()?;
        let timeout = params.timeout.unwrap_or_else(|| ctx.default_command_timeout());
        let total = params.commands.len() as u32;

        let mut reports = Vec::with_capacity(params.commands.len());
        for (i, command) in params.commands.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.step(i as u32 + 1, total, command.as_str()).await;
            let output = executor
                .run(
                    &params.target,
                    command,
                    timeout,
                    params.workdir.as_deref(),
                    Some(ctx.log()),
                    ctx.cancellation(),
                )
                .await?;
            if !output.success {
                let code = output
                    .exit_code
                    .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
                let reason = format!("command {} of {total} ({command}) exited with {code}", i + 1);
                ctx.log().error(&reason);
                return Ok(Outcome::failure(reason));
            }
            reports.push(CommandReport::new(command, &output));
        }

        ctx.log()
            .info(format!("{total} commands completed on {}", params.target));
        Ok(Outcome::success_with(reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Collaborators;
    use crate::domain::ErrorKind;
    use crate::handlers::fakes::local_executor;

    fn ctx() -> JobContext {
        JobContext::detached(JobKind::ConfigureHost).with_collaborators(Collaborators {
            executor: Some(local_executor()),
            ..Collaborators::default()
        })
    }

    fn configure(commands: &[&str], timeout: Option<Duration>) -> ConfigureHost {
        ConfigureHost {
            target: "localhost".to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            timeout,
            workdir: None,
        }
    }

    #[tokio::test]
    async fn runs_every_command_in_order() {
        let ctx = ctx();
        let outcome = ConfigureHostHandler
            .execute(configure(&["echo one", "echo two"], None), &ctx)
            .await
            .unwrap();

        assert!(outcome.is_success());
        let messages: Vec<_> = ctx.log().recent(20).into_iter().map(|e| e.message).collect();
        let one = messages.iter().position(|m| m == "one").unwrap();
        let two = messages.iter().position(|m| m == "two").unwrap();
        assert!(one < two);
    }

    #[tokio::test]
    async fn stops_at_the_first_failure() {
        let ctx = ctx();
        let outcome = ConfigureHostHandler
            .execute(configure(&["echo one", "exit 4", "echo never"], None), &ctx)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::failure("command 2 of 3 (exit 4) exited with status 4")
        );
        let messages: Vec<_> = ctx.log().recent(20).into_iter().map(|e| e.message).collect();
        assert!(!messages.iter().any(|m| m == "never"));
    }

    #[tokio::test]
    async fn timeout_applies_to_each_command() {
        let outcome = ConfigureHostHandler
            .execute(
                configure(&["sleep 0.3", "sleep 0.3"], Some(Duration::from_secs(1))),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(outcome.is_success());

        let err = ConfigureHostHandler
            .execute(
                configure(&["sleep 5"], Some(Duration::from_millis(200))),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn empty_command_list_is_rejected() {
        let err = ConfigureHostHandler
            .execute(configure(&[], None), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
