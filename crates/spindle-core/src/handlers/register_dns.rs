//! register-dns: create or update one DNS record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider_error;
use crate::app::JobContext;
use crate::domain::{JobError, JobKind, Outcome, ValidationError};
use crate::typed::{Handler, JobSpec};

fn default_record_type() -> String {
    "A".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDns {
    pub zone: String,
    pub name: String,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    pub value: String,
}

impl JobSpec for RegisterDns {
    const KIND: JobKind = JobKind::RegisterDns;
}

pub struct RegisterDnsHandler;

#[async_trait]
impl Handler<RegisterDns> for RegisterDnsHandler {
    async fn execute(&self, params: RegisterDns, ctx: &JobContext) -> Result<Outcome, JobError> {
        if params.value.trim().is_empty() {
            return Err(ValidationError::InvalidParams {
                kind: JobKind::RegisterDns,
                reason: "record value must not be empty".to_string(),
            }
            .into());
        }
        let dns = ctx.dns()?;
        ctx.log().info(format!(
            "{} {}.{} -> {}",
            params.record_type, params.name, params.zone, params.value
        ));
        dns.upsert_record(&params.zone, &params.name, &params.record_type, &params.value)
            .await
            .map_err(|e| provider_error("upsert record", e))?;
        Ok(Outcome::success_with(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Collaborators;
    use crate::domain::{ErrorKind, JobParams};
    use crate::handlers::fakes::FakeDns;
    use std::sync::Arc;

    fn ctx(dns: Arc<FakeDns>) -> JobContext {
        JobContext::detached(JobKind::RegisterDns).with_collaborators(Collaborators {
            dns: Some(dns),
            ..Collaborators::default()
        })
    }

    fn decode(value: serde_json::Value) -> RegisterDns {
        let serde_json::Value::Object(map) = value else {
            panic!("params must be an object");
        };
        let params: JobParams = map.into_iter().collect();
        RegisterDns::from_params(&params).unwrap()
    }

    #[tokio::test]
    async fn record_type_defaults_to_a() {
        let dns = Arc::new(FakeDns::default());
        let params = decode(serde_json::json!({
            "zone": "example.com", "name": "web", "value": "203.0.113.7"
        }));

        let outcome = RegisterDnsHandler.execute(params, &ctx(dns.clone())).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            *dns.records.lock().unwrap(),
            vec![(
                "example.com".to_string(),
                "web".to_string(),
                "A".to_string(),
                "203.0.113.7".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn provider_error_is_an_execution_error() {
        let dns = Arc::new(FakeDns {
            fail: true,
            ..FakeDns::default()
        });
        let params = decode(serde_json::json!({
            "zone": "example.com", "name": "web", "record_type": "CNAME", "value": "lb.example.com"
        }));

        let err = RegisterDnsHandler.execute(params, &ctx(dns)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("zone is locked"));
    }

    #[tokio::test]
    async fn empty_value_is_rejected() {
        let params = decode(serde_json::json!({
            "zone": "example.com", "name": "web", "value": " "
        }));
        let err = RegisterDnsHandler
            .execute(params, &ctx(Arc::new(FakeDns::default())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
