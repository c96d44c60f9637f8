//! remote-exec: run one shell command on a target and capture its output.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::JobContext;
use crate::domain::{JobError, JobKind, Outcome};
use crate::typed::{Handler, JobSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteExec {
    pub target: String,
    pub command: String,
    /// Falls back to the engine's default command timeout.
    #[serde(default, with = "crate::config::duration_opt")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub workdir: Option<String>,
}

impl JobSpec for RemoteExec {
    const KIND: JobKind = JobKind::RemoteExec;
}

pub struct RemoteExecHandler;

#[async_trait]
impl Handler<RemoteExec> for RemoteExecHandler {
    async fn execute(&self, params: RemoteExec, ctx: &JobContext) -> Result<Outcome, JobError> {
        let timeout = params.timeout.unwrap_or_else(|| ctx.default_command_timeout());
        ctx.log()
            .info(format!("$ {} (on {})", params.command, params.target));
        let output = ctx
            .executor()?
            .run(
                &params.target,
                &params.command,
                timeout,
                params.workdir.as_deref(),
                Some(ctx.log()),
                ctx.cancellation(),
            )
            .await?;

        if output.success {
            return Ok(Outcome::success_with(output));
        }
        let status = match output.exit_code {
            Some(code) => format!("command exited with status {code}"),
            None => "command was terminated by a signal".to_string(),
        };
        ctx.log().error(&status);
        Ok(Outcome::failure(status))
    }
}
