//! Recording fakes for the provider ports.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::exec::RemoteExecutor;
use crate::impls::{LocalTransport, StaticCredentials};
use crate::ports::{
    ComputeProvider, Credentials, DnsProvider, Instance, InstanceSpec, ProviderError,
    StackDefinition, StackDeployer, StackOutcome,
};

/// Executor that runs every "remote" command on this machine.
pub fn local_executor() -> RemoteExecutor {
    RemoteExecutor::new(
        Arc::new(LocalTransport::new()),
        Arc::new(StaticCredentials::new().with_default(Credentials::default())),
    )
}

#[derive(Default)]
pub struct FakeStacks {
    failing: HashSet<String>,
    pub deployed: Mutex<Vec<(String, String)>>,
}

impl FakeStacks {
    pub fn failing_on(app: &str) -> Self {
        Self {
            failing: HashSet::from([app.to_string()]),
            ..Self::default()
        }
    }

    pub fn deployed_names(&self) -> Vec<String> {
        self.deployed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl StackDeployer for FakeStacks {
    async fn deploy_stack(
        &self,
        target: &str,
        definition: &StackDefinition,
        _vars: &BTreeMap<String, String>,
    ) -> Result<StackOutcome, ProviderError> {
        self.deployed
            .lock()
            .unwrap()
            .push((target.to_string(), definition.name.clone()));
        if self.failing.contains(&definition.name) {
            return Ok(StackOutcome::failed(format!("{} crashed on start", definition.name)));
        }
        Ok(StackOutcome::ok())
    }
}

#[derive(Default)]
pub struct FakeCompute {
    pub address: Option<String>,
    pub fail_create: bool,
    pub created: Mutex<Vec<InstanceSpec>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeCompute {
    pub fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ProviderError> {
        if self.fail_create {
            return Err(ProviderError::Request("quota exceeded".to_string()));
        }
        self.created.lock().unwrap().push(spec.clone());
        Ok(Instance {
            id: format!("i-{}", spec.name),
            name: spec.name.clone(),
            address: self.address.clone(),
        })
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDns {
    pub fail: bool,
    pub records: Mutex<Vec<(String, String, String, String)>>,
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn upsert_record(
        &self,
        zone: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        if self.fail {
            return Err(ProviderError::Request("zone is locked".to_string()));
        }
        self.records.lock().unwrap().push((
            zone.to_string(),
            name.to_string(),
            record_type.to_string(),
            value.to_string(),
        ));
        Ok(())
    }
}
