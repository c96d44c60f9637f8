//! provision-host: create a machine, optionally point DNS at it and wait
//! until it accepts remote commands.
//!
//! Once the instance exists, any failure or cancellation in a later step
//! deletes it again before the job finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::provider_error;
use crate::app::JobContext;
use crate::domain::{ErrorKind, JobError, JobKind, Outcome};
use crate::ports::{ComputeProvider, Instance, InstanceSpec};
use crate::typed::{Handler, JobSpec};

const REACH_COMMAND: &str = "true";
const REACH_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
const REACH_INTERVAL: Duration = Duration::from_secs(2);

fn default_ssh_timeout() -> Option<Duration> {
    Some(Duration::from_secs(120))
}

/// Record to create for the new host; the value is its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordSpec {
    pub zone: String,
    pub name: String,
}

impl DnsRecordSpec {
    pub fn fqdn(&self) -> String {
        if self.name == "@" || self.name.is_empty() {
            self.zone.clone()
        } else {
            format!("{}.{}", self.name, self.zone)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionHost {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub dns: Option<DnsRecordSpec>,
    #[serde(default)]
    pub wait_for_ssh: bool,
    #[serde(
        default = "default_ssh_timeout",
        with = "crate::config::duration_opt"
    )]
    pub ssh_timeout: Option<Duration>,
}

impl JobSpec for ProvisionHost {
    const KIND: JobKind = JobKind::ProvisionHost;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedHost {
    pub instance_id: String,
    pub name: String,
    pub address: Option<String>,
    pub fqdn: Option<String>,
}

pub struct ProvisionHostHandler;

#[async_trait]
impl Handler<ProvisionHost> for ProvisionHostHandler {
    async fn execute(&self, params: ProvisionHost, ctx: &JobContext) -> Result<Outcome, JobError> {
        let compute = ctx.compute()?.clone();
        let total = 1 + u32::from(params.dns.is_some()) + u32::from(params.wait_for_ssh);
        ctx.checkpoint()?;

        ctx.step(1, total, format!("creating instance {}", params.name))
            .await;
        let spec = InstanceSpec {
            name: params.name.clone(),
            region: params.region.clone(),
            size: params.size.clone(),
            image: params.image.clone(),
        };
        let instance = compute
            .create_instance(&spec)
            .await
            .map_err(|e| provider_error("create instance", e))?;
        ctx.log().info(format!(
            "instance {} created (address {})",
            instance.id,
            instance.address.as_deref().unwrap_or("pending")
        ));

        let result = finish(&params, &instance, total, ctx).await;
        if !matches!(result, Ok(Outcome::Success(_))) {
            rollback(&compute, &instance, ctx).await;
        }
        result
    }
}

/// Every step after the instance exists.
async fn finish(
    params: &ProvisionHost,
    instance: &Instance,
    total: u32,
    ctx: &JobContext,
) -> Result<Outcome, JobError> {
    let mut step = 1;
    let mut fqdn = None;

    if let Some(record) = &params.dns {
        ctx.checkpoint()?;
        step += 1;
        let Some(address) = instance.address.as_deref() else {
            return Ok(Outcome::failure(
                "instance has no address to register in DNS",
            ));
        };
        let name = record.fqdn();
        ctx.step(step, total, format!("registering {name}")).await;
        ctx.dns()?
            .upsert_record(&record.zone, &record.name, "A", address)
            .await
            .map_err(|e| provider_error("register DNS", e))?;
        fqdn = Some(name);
    }

    if params.wait_for_ssh {
        ctx.checkpoint()?;
        step += 1;
        let Some(address) = instance.address.as_deref() else {
            return Ok(Outcome::failure(
                "instance has no address to connect to",
            ));
        };
        ctx.step(step, total, format!("waiting for {address} to accept commands"))
            .await;
        let limit = params.ssh_timeout.unwrap_or(REACH_ATTEMPT_TIMEOUT);
        wait_until_reachable(address, limit, ctx).await?;
    }

    Ok(Outcome::success_with(ProvisionedHost {
        instance_id: instance.id.clone(),
        name: instance.name.clone(),
        address: instance.address.clone(),
        fqdn,
    }))
}

async fn wait_until_reachable(
    address: &str,
    limit: Duration,
    ctx: &JobContext,
) -> Result<(), JobError> {
    let executor = ctx.executor()?;
    let deadline = Instant::now() + limit;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let reached = executor
            .run(
                address,
                REACH_COMMAND,
                remaining.min(REACH_ATTEMPT_TIMEOUT),
                None,
                None,
                ctx.cancellation(),
            )
            .await;
        match reached {
            Ok(output) if output.success => {
                ctx.log()
                    .info(format!("{address} reachable after {attempt} attempt(s)"));
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::Execution | ErrorKind::Timeout) => {
                ctx.log().debug(format!("reachability check {attempt} failed: {e}"));
            }
            Err(e) => return Err(e),
        }
        if Instant::now() + REACH_INTERVAL >= deadline {
            return Err(JobError::Timeout { after: limit });
        }
        tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(JobError::Cancelled),
            _ = tokio::time::sleep(REACH_INTERVAL) => {}
        }
    }
}

async fn rollback(compute: &Arc<dyn ComputeProvider>, instance: &Instance, ctx: &JobContext) {
    ctx.log()
        .warn(format!("deleting instance {} after failed provisioning", instance.id));
    if let Err(e) = compute.delete_instance(&instance.id).await {
        ctx.log()
            .error(format!("could not delete instance {}: {e}", instance.id));
    }
}
