//! deploy-stack: hand one container stack to the stack deployer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider_error;
use crate::app::JobContext;
use crate::domain::{JobError, JobKind, Outcome};
use crate::ports::StackDefinition;
use crate::typed::{Handler, JobSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployStack {
    pub target: String,
    pub stack: String,
    /// Inline definition; without it the deployer looks the stack up by name.
    #[serde(default)]
    pub compose: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl JobSpec for DeployStack {
    const KIND: JobKind = JobKind::DeployStack;
}

pub struct DeployStackHandler;

#[async_trait]
impl Handler<DeployStack> for DeployStackHandler {
    async fn execute(&self, params: DeployStack, ctx: &JobContext) -> Result<Outcome, JobError> {
        let stacks = ctx.stacks()?;
        ctx.checkpoint()?;
        ctx.log()
            .info(format!("deploying stack {} to {}", params.stack, params.target));
        let definition = StackDefinition {
            name: params.stack.clone(),
            compose: params.compose,
        };
        let outcome = stacks
            .deploy_stack(&params.target, &definition, &params.vars)
            .await
            .map_err(|e| provider_error(&format!("deploy {}", params.stack), e))?;

        if outcome.success {
            ctx.log().info(format!("stack {} is up", params.stack));
            Ok(Outcome::success_with(outcome))
        } else {
            let reason = outcome
                .error
                .unwrap_or_else(|| "no error reported".to_string());
            ctx.log().error(format!("stack {} failed: {reason}", params.stack));
            Ok(Outcome::failure(reason))
        }
    }
}
