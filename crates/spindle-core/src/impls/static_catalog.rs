//! StaticCatalog - メモリ上のアプリケーションカタログ（TOML から読み込み可）
//!
//! ```toml
//! [apps]
//! n8n = ["postgres", "redis"]
//! postgres = []
//! redis = []
//!
//! [installed]
//! "10.0.0.5" = ["postgres"]
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::{AppCatalog, CatalogError};

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    apps: HashMap<String, Vec<String>>,
    #[serde(default)]
    installed: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct StaticCatalog {
    apps: HashMap<String, Vec<String>>,
    installed: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app<I, S>(mut self, app: &str, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apps
            .insert(app.to_string(), deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_installed<I, S>(self, target: &str, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.to_string(), apps.into_iter().map(Into::into).collect());
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| CatalogError::Backend(e.to_string()))?;
        Ok(Self {
            apps: file.apps,
            installed: RwLock::new(file.installed),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Backend(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Record `app` as present on `target`.
    pub fn mark_installed(&self, target: &str, app: &str) {
        let mut installed = self.installed.write().unwrap_or_else(|e| e.into_inner());
        let apps = installed.entry(target.to_string()).or_default();
        if !apps.iter().any(|a| a == app) {
            apps.push(app.to_string());
        }
    }
}

#[async_trait]
impl AppCatalog for StaticCatalog {
    async fn get_dependencies(&self, app: &str) -> Result<Vec<String>, CatalogError> {
        self.apps
            .get(app)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownApp(app.to_string()))
    }

    async fn list_installed(&self, target: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .installed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_apps_and_installed_from_toml() {
        let catalog = StaticCatalog::from_toml_str(
            r#"
            [apps]
            n8n = ["postgres", "redis"]
            postgres = []
            redis = []

            [installed]
            "10.0.0.5" = ["postgres"]
            "#,
        )
        .unwrap();

        assert_eq!(
            catalog.get_dependencies("n8n").await.unwrap(),
            vec!["postgres", "redis"]
        );
        assert_eq!(
            catalog.list_installed("10.0.0.5").await.unwrap(),
            vec!["postgres"]
        );
        assert!(catalog.list_installed("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_app_is_an_error() {
        let catalog = StaticCatalog::new();
        assert_eq!(
            catalog.get_dependencies("ghost").await,
            Err(CatalogError::UnknownApp("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn mark_installed_is_idempotent() {
        let catalog = StaticCatalog::new();
        catalog.mark_installed("h", "redis");
        catalog.mark_installed("h", "redis");
        assert_eq!(catalog.list_installed("h").await.unwrap(), vec!["redis"]);
    }
}
