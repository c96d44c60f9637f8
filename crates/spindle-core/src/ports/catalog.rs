//! AppCatalog port - アプリケーションカタログ
//!
//! Dependency Resolver と installed-set フィルタの入力になります。

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown application '{0}'")]
    UnknownApp(String),

    #[error("catalog backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AppCatalog: Send + Sync {
    /// Direct dependencies of `app`, in declaration order.
    async fn get_dependencies(&self, app: &str) -> Result<Vec<String>, CatalogError>;

    /// Applications already present on `target`.
    async fn list_installed(&self, target: &str) -> Result<Vec<String>, CatalogError>;
}
