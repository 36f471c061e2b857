//! Shared application state
//!
//! One state value wires every pipeline stage to the HTTP surface. All
//! members are cheap to clone; the heavyweight pieces live behind Arcs.

use anyhow::Result;
use lakeflow_catalog::SchemaRegistrar;
use lakeflow_cdc::{CdcController, SourceDatabase};
use lakeflow_config::RuntimeConfig;
use lakeflow_ingest::{BatchWriter, Gateway};
use lakeflow_storage::ZoneStore;
use lakeflow_transform::TransformEngine;
use lakeflow_warehouse::{BulkLoader, QueryEngine};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub store: ZoneStore,
    pub gateway: Gateway,
    pub writer: BatchWriter,
    pub catalog: SchemaRegistrar,
    pub transform: Arc<TransformEngine>,
    pub cdc: Arc<CdcController>,
    pub query: Arc<QueryEngine>,
    pub loader: Arc<BulkLoader>,
    /// Source database for replication tasks. Wired by the embedder;
    /// CDC endpoints answer 503 when absent.
    pub cdc_source: Option<Arc<dyn SourceDatabase>>,
}

impl AppState {
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        let store = ZoneStore::from_config(&config.storage)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: RuntimeConfig, store: ZoneStore) -> Self {
        let gateway = Gateway::new(config.ingest.clone());
        let writer = BatchWriter::new(store.clone(), &config.ingest);
        let catalog = SchemaRegistrar::new(store.clone(), &config.catalog);
        let transform = Arc::new(TransformEngine::new(store.clone(), &config.transform));
        let cdc = Arc::new(CdcController::new(store.clone()));
        let query = Arc::new(QueryEngine::new(
            store.clone(),
            catalog.clone(),
            config.query.max_scanned_bytes,
        ));
        let loader = Arc::new(BulkLoader::new(store.clone()));

        Self {
            config: Arc::new(config),
            store,
            gateway,
            writer,
            catalog,
            transform,
            cdc,
            query,
            loader,
            cdc_source: None,
        }
    }

    pub fn with_cdc_source(mut self, source: Arc<dyn SourceDatabase>) -> Self {
        self.cdc_source = Some(source);
        self
    }
}
