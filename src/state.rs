//! Shared application state for all routes. The model is an immutable snapshot swapped on reload.

use crate::catalog::load_from_pool;
use crate::endpoints::ResolvedModel;
use crate::error::CatalogError;
use crate::settings::Settings;
use arc_swap::ArcSwap;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub model: Arc<ArcSwap<ResolvedModel>>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(pool: PgPool, model: ResolvedModel, settings: Settings) -> Self {
        AppState {
            pool,
            model: Arc::new(ArcSwap::from_pointee(model)),
            settings: Arc::new(settings),
        }
    }

    /// Current model. Requests hold the snapshot they started with.
    pub fn snapshot(&self) -> Arc<ResolvedModel> {
        self.model.load_full()
    }

    /// Re-introspect the database and swap in the new model. On failure the old model stays.
    pub async fn reload(&self) -> Result<Arc<ResolvedModel>, CatalogError> {
        let catalog = match load_from_pool(&self.pool, &self.settings).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "catalog reload failed; keeping current model");
                return Err(e);
            }
        };
        let model = Arc::new(ResolvedModel::resolve(catalog));
        self.model.store(model.clone());
        tracing::info!(tables = model.len(), "catalog reloaded");
        Ok(model)
    }
}
