//! StaticCredentials - ターゲットごとの接続情報（テスト・CLI 用）

use std::collections::HashMap;

use async_trait::async_trait;

use crate::ports::{CredentialStore, Credentials, TransportError};

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    default: Option<Credentials>,
    targets: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials used for any target without an explicit entry.
    pub fn with_default(mut self, credentials: Credentials) -> Self {
        self.default = Some(credentials);
        self
    }

    pub fn with_target(mut self, target: &str, credentials: Credentials) -> Self {
        self.targets.insert(target.to_string(), credentials);
        self
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credentials(&self, target: &str) -> Result<Credentials, TransportError> {
        self.targets
            .get(target)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| TransportError::MissingCredentials(target.to_string()))
    }
}
