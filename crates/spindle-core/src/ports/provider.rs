//! Provider ports - compute / container-stack / DNS collaborators
//!
//! 実装は外部（各クラウド API クライアント）。エンジンは呼び出すだけです。
//! transient な失敗のリトライは実装側の責務。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ProviderError>;

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError>;
}

/// What to deploy: a named stack, optionally with an inline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<String>,
}

impl StackDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compose: None,
        }
    }
}

/// Structured deploy result. `success == false` is a failure even though
/// the call itself returned `Ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl StackOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            detail: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            detail: None,
        }
    }
}

#[async_trait]
pub trait StackDeployer: Send + Sync {
    async fn deploy_stack(
        &self,
        target: &str,
        definition: &StackDefinition,
        vars: &BTreeMap<String, String>,
    ) -> Result<StackOutcome, ProviderError>;
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn upsert_record(
        &self,
        zone: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<(), ProviderError>;
}
