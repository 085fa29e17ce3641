//! Built-in toolkits and registry assembly

pub mod catalog;
pub mod knowledge;
pub mod messaging;
pub mod report;
pub mod warehouse;

use crate::error::ToolError;
use crate::registry::ToolRegistry;
use mostrador_core::{AppConfig, Error, Result};
use mostrador_knowledge::Retriever;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use catalog::CatalogToolkit;
pub use knowledge::KnowledgeToolkit;
pub use messaging::MessagingToolkit;
pub use report::{blob_store_from_config, BlobStore, HttpBlobStore, InMemoryBlobStore, ReportToolkit};
pub use warehouse::{ClickHouseHttp, QueryResult, Warehouse, WarehouseToolkit};

fn setup_error(tool_id: &str, e: ToolError) -> Error {
    Error::ConfigError(format!("cannot set up toolkit '{}': {}", tool_id, e))
}

/// A registry sized from `config` with every built-in toolkit registered.
pub fn build_registry(config: &AppConfig, retriever: Retriever) -> Result<Arc<ToolRegistry>> {
    let registry = ToolRegistry::new(
        config.cache.capacity,
        config.runtime.invocation_log_capacity,
        Duration::from_secs(config.runtime.tool_timeout_s),
    );

    let clickhouse = ClickHouseHttp::new(&config.warehouse).map_err(|e| setup_error(warehouse::TOOL_ID, e))?;
    registry.register_toolkit(Arc::new(WarehouseToolkit::new(
        Arc::new(clickhouse),
        config.warehouse.row_cap,
        config.warehouse.cache_ttl_s,
    )))?;
    registry.register_toolkit(Arc::new(
        CatalogToolkit::new(&config.backend).map_err(|e| setup_error(catalog::TOOL_ID, e))?,
    ))?;
    registry.register_toolkit(Arc::new(KnowledgeToolkit::for_agents(retriever, &config.agents)))?;
    registry.register_toolkit(Arc::new(
        MessagingToolkit::new(&config.backend).map_err(|e| setup_error(messaging::TOOL_ID, e))?,
    ))?;
    registry.register_toolkit(Arc::new(ReportToolkit::new(blob_store_from_config(&config.blob))))?;

    info!(tools = ?registry.tool_ids(), "tool registry ready");
    Ok(Arc::new(registry))
}
