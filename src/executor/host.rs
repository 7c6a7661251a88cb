//! Local Model Host
//!
//! Owns the models loaded on this node. The actual inference engine is
//! plugged in as an async loader closure, type-erased so hosts with
//! different engines share one concrete type.

use crate::registry::types::ModelId;
use crate::task::types::now_ms;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Per-model result of a local unload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnloadStatus {
    Unloaded,
    NotFound,
    Error(String),
}

impl fmt::Display for UnloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnloadStatus::Unloaded => f.write_str("unloaded"),
            UnloadStatus::NotFound => f.write_str("not_found"),
            UnloadStatus::Error(error) => write!(f, "error: {}", error),
        }
    }
}

/// Runs models on the local node.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn load_local(&self, model_id: &ModelId) -> Result<()>;

    /// Unloads the given models, or every loaded model if `model_ids` is empty.
    async fn unload_local(&self, model_ids: &[ModelId]) -> BTreeMap<ModelId, UnloadStatus>;

    /// Re-reads model configuration. `full_refresh` reloads everything, not
    /// just the predictor.
    async fn refresh_local_cache(&self, model_id: &ModelId, full_refresh: bool) -> Result<()>;

    fn local_models(&self) -> Vec<ModelId>;
}

/// Async function turning a model id into a ready-to-serve model.
pub type ModelLoaderFn =
    Arc<dyn Fn(ModelId) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadedModel {
    pub model_id: ModelId,
    pub loaded_at: u64,
    pub predictor_refreshes: u32,
    pub full_refreshes: u32,
}

pub struct InMemoryModelHost {
    loader: ModelLoaderFn,
    models: DashMap<ModelId, LoadedModel>,
    /// Held for the duration of a model's load so concurrent loads of the
    /// same model run the loader once.
    loading: DashMap<ModelId, Arc<tokio::sync::Mutex<()>>>,
}

impl InMemoryModelHost {
    /// Host whose loads always succeed immediately.
    pub fn new() -> Self {
        Self::with_loader(|_model_id| async { Ok(()) })
    }

    pub fn with_loader<F, Fut>(loader: F) -> Self
    where
        F: Fn(ModelId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let loader: ModelLoaderFn = Arc::new(move |model_id: ModelId| {
            Box::pin(loader(model_id)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        Self {
            loader,
            models: DashMap::new(),
            loading: DashMap::new(),
        }
    }

    pub fn get(&self, model_id: &ModelId) -> Option<LoadedModel> {
        self.models.get(model_id).map(|entry| entry.value().clone())
    }

    pub fn is_loaded(&self, model_id: &ModelId) -> bool {
        self.models.contains_key(model_id)
    }
}

impl Default for InMemoryModelHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelExecutor for InMemoryModelHost {
    async fn load_local(&self, model_id: &ModelId) -> Result<()> {
        if self.models.contains_key(model_id) {
            tracing::debug!("Model {} already loaded", model_id);
            return Ok(());
        }

        let lock = self.loading.entry(model_id.clone()).or_default().clone();
        let _guard = lock.lock().await;
        if self.models.contains_key(model_id) {
            tracing::debug!("Model {} loaded by a concurrent request", model_id);
            return Ok(());
        }

        (self.loader)(model_id.clone()).await?;

        self.models.insert(
            model_id.clone(),
            LoadedModel {
                model_id: model_id.clone(),
                loaded_at: now_ms(),
                predictor_refreshes: 0,
                full_refreshes: 0,
            },
        );
        tracing::info!("Loaded model {}", model_id);
        Ok(())
    }

    async fn unload_local(&self, model_ids: &[ModelId]) -> BTreeMap<ModelId, UnloadStatus> {
        let targets = if model_ids.is_empty() {
            self.local_models()
        } else {
            model_ids.to_vec()
        };

        targets
            .into_iter()
            .map(|model_id| {
                let status = match self.models.remove(&model_id) {
                    Some(_) => {
                        tracing::info!("Unloaded model {}", model_id);
                        UnloadStatus::Unloaded
                    }
                    None => UnloadStatus::NotFound,
                };
                (model_id, status)
            })
            .collect()
    }

    async fn refresh_local_cache(&self, model_id: &ModelId, full_refresh: bool) -> Result<()> {
        let mut model = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| anyhow::anyhow!("Model {} is not loaded on this node", model_id))?;

        if full_refresh {
            model.full_refreshes += 1;
        } else {
            model.predictor_refreshes += 1;
        }
        tracing::debug!(
            "Refreshed cache of model {} ({})",
            model_id,
            if full_refresh { "full" } else { "predictor" }
        );
        Ok(())
    }

    fn local_models(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.models.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}
