//! deploy-app: install an application and its dependencies on a target.
//!
//! resolve order → drop what is already installed → deploy the rest one by
//! one. The first failed deploy aborts the job with that deploy's error.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider_error;
use crate::app::JobContext;
use crate::domain::{JobError, JobKind, Outcome};
use crate::ports::StackDefinition;
use crate::typed::{Handler, JobSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployApp {
    pub app: String,
    pub target: String,
    /// Variables passed to every stack deployed by this job.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl JobSpec for DeployApp {
    const KIND: JobKind = JobKind::DeployApp;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployAppResult {
    pub installed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct DeployAppHandler;

#[async_trait]
impl Handler<DeployApp> for DeployAppHandler {
    async fn execute(&self, params: DeployApp, ctx: &JobContext) -> Result<Outcome, JobError> {
        let log = ctx.log();
        log.info(format!("resolving dependencies of {}", params.app));
        let order = ctx.resolver()?.resolve(&params.app).await?;
        log.info(format!("install order: {}", order.join(", ")));
        ctx.checkpoint()?;

        let present: HashSet<String> = ctx
            .catalog()?
            .list_installed(&params.target)
            .await
            .map_err(|e| JobError::execution(format!("list installed on {}: {e}", params.target)))?
            .into_iter()
            .collect();
        let (skipped, pending): (Vec<String>, Vec<String>) =
            order.into_iter().partition(|app| present.contains(app));
        for app in &skipped {
            log.info(format!("{app} already installed, skipping"));
        }

        let stacks = ctx.stacks()?;
        let total = pending.len() as u32;
        let mut installed = Vec::with_capacity(pending.len());
        for (i, app) in pending.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.step(i as u32 + 1, total, format!("deploying {app}")).await;
            let outcome = stacks
                .deploy_stack(&params.target, &StackDefinition::named(app), &params.vars)
                .await
                .map_err(|e| provider_error(&format!("deploy {app}"), e))?;
            if !outcome.success {
                let reason = outcome.error.unwrap_or_else(|| "no error reported".to_string());
                log.error(format!("deploy of {app} failed: {reason}"));
                return Ok(Outcome::failure(format!("deploy {app}: {reason}")));
            }
            log.info(format!("{app} deployed"));
            installed.push(app.clone());
        }

        Ok(Outcome::success_with(DeployAppResult { installed, skipped }))
    }
}
