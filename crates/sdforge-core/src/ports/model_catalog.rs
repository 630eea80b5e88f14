//! Model catalog port and a static in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ModelConfig;

/// Catalog lookup failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog error: {0}")]
    Internal(String),
}

/// Read-only supplier of model configurations.
///
/// The core never mutates configs; an unknown id is `Ok(None)`, not an
/// error, so callers decide how to fail the referencing job.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Look up one model by id.
    async fn get(&self, model_id: &str) -> Result<Option<ModelConfig>, CatalogError>;

    /// All configured models.
    async fn all(&self) -> Result<Vec<ModelConfig>, CatalogError>;
}

/// Fixed in-memory catalog, loaded once at startup.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    models: HashMap<String, ModelConfig>,
}

impl StaticCatalog {
    /// Build a catalog from a list of configs. Later duplicates replace
    /// earlier ones.
    #[must_use]
    pub fn new(configs: impl IntoIterator<Item = ModelConfig>) -> Self {
        Self {
            models: configs
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
        }
    }

    /// Number of configured models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when no models are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[async_trait]
impl ModelCatalog for StaticCatalog {
    async fn get(&self, model_id: &str) -> Result<Option<ModelConfig>, CatalogError> {
        Ok(self.models.get(model_id).cloned())
    }

    async fn all(&self) -> Result<Vec<ModelConfig>, CatalogError> {
        Ok(self.models.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExecMode;

    fn config(id: &str) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            exec_mode: ExecMode::Server,
            command: "sd-server".to_string(),
            args: vec![],
            port: None,
            endpoint: None,
            generation_defaults: Default::default(),
        }
    }

    #[tokio::test]
    async fn lookup_hits_and_misses() {
        let catalog = StaticCatalog::new([config("sdxl"), config("sd15")]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("sdxl").await.unwrap().is_some());
        assert!(catalog.get("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_last_wins() {
        let mut newer = config("sdxl");
        newer.name = "SDXL v2".to_string();
        let catalog = StaticCatalog::new([config("sdxl"), newer]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("sdxl").await.unwrap().unwrap().name, "SDXL v2");
    }
}
