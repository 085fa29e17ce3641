//! Markdown report builder backed by blob storage

use crate::descriptor::ToolDescriptor;
use crate::error::ToolError;
use crate::registry::{InvocationCtx, ToolHandler, Toolkit};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mostrador_core::config::BlobConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const TOOL_ID: &str = "report";

/// Stores a blob and returns the URL users can open.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, content: Vec<u8>, content_type: &str) -> Result<String, ToolError>;
}

/// Azure-style container addressed by URL plus SAS token.
pub struct HttpBlobStore {
    client: Client,
    container_url: String,
    sas_token: Option<String>,
    public_base_url: String,
}

impl HttpBlobStore {
    pub fn new(container_url: impl Into<String>, sas_token: Option<String>, public_base_url: Option<String>) -> Self {
        let container_url = container_url.into().trim_end_matches('/').to_string();
        let public_base_url = public_base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| container_url.clone());
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            container_url,
            sas_token: sas_token.map(|t| t.trim_start_matches('?').to_string()),
            public_base_url,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, name: &str, content: Vec<u8>, content_type: &str) -> Result<String, ToolError> {
        let mut url = format!("{}/{}", self.container_url, name);
        if let Some(sas) = &self.sas_token {
            url = format!("{}?{}", url, sas);
        }
        let response = self
            .client
            .put(&url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", content_type)
            .body(content)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::from_status(status.as_u16(), format!("blob upload returned {}", status)));
        }
        Ok(format!("{}/{}", self.public_base_url, name))
    }
}

/// Process-local blobs, used when no container is configured.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.get(name).map(|b| b.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, name: &str, content: Vec<u8>, _content_type: &str) -> Result<String, ToolError> {
        self.blobs.insert(name.to_string(), content);
        Ok(format!("memory://{}", name))
    }
}

/// HTTP container when configured, otherwise process-local.
pub fn blob_store_from_config(config: &BlobConfig) -> Arc<dyn BlobStore> {
    match &config.container_url {
        Some(url) => Arc::new(HttpBlobStore::new(
            url.clone(),
            config.sas_token.clone(),
            config.public_base_url.clone(),
        )),
        None => {
            warn!("no blob container configured; reports are kept in memory");
            Arc::new(InMemoryBlobStore::new())
        }
    }
}

/// `# title`, then one `## heading` block per section.
pub fn render_markdown(title: &str, sections: &[Value]) -> String {
    let mut out = format!("# {}\n", title.trim());
    for section in sections {
        let heading = section.get("titulo").and_then(Value::as_str).unwrap_or_default();
        let body = section.get("contenido").and_then(Value::as_str).unwrap_or_default();
        out.push('\n');
        if !heading.is_empty() {
            out.push_str(&format!("## {}\n\n", heading.trim()));
        }
        out.push_str(body.trim());
        out.push('\n');
    }
    out
}

fn slug(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-");
    if slug.is_empty() {
        "reporte".to_string()
    } else {
        slug.chars().take(60).collect()
    }
}

pub struct ReportToolkit {
    blobs: Arc<dyn BlobStore>,
}

impl ReportToolkit {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl ToolHandler for ReportToolkit {
    async fn call(&self, op_name: &str, args: Value, ctx: &InvocationCtx) -> Result<Value, ToolError> {
        if op_name != "build_report" {
            return Err(ToolError::UnknownOperation(format!("{}.{}", TOOL_ID, op_name)));
        }
        let title = args.get("titulo").and_then(Value::as_str).unwrap_or("Reporte");
        let sections = args.get("secciones").and_then(Value::as_array).cloned().unwrap_or_default();
        let markdown = render_markdown(title, &sections);

        let name = format!(
            "reportes/{}/{}-{}.md",
            Utc::now().format("%Y-%m-%d"),
            slug(title),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let url = self
            .blobs
            .put(&name, markdown.into_bytes(), "text/markdown; charset=utf-8")
            .await?;
        info!(session_id = %ctx.session_id, blob = %name, "report stored");
        Ok(json!({"url": url}))
    }
}

impl Toolkit for ReportToolkit {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            TOOL_ID,
            "build_report",
            "Genera un reporte en markdown, lo publica y devuelve su URL.",
            json!({
                "type": "object",
                "properties": {
                    "titulo": {"type": "string"},
                    "secciones": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "titulo": {"type": "string"},
                                "contenido": {"type": "string", "description": "Texto markdown de la sección"}
                            },
                            "required": ["contenido"]
                        }
                    }
                },
                "required": ["titulo", "secciones"]
            }),
        )
        .returns(json!({"type": "object", "properties": {"url": {"type": "string"}}}))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_has_title_and_sections() {
        let md = render_markdown(
            "Ventas octubre",
            &[json!({"titulo": "Resumen", "contenido": "Total: $1.200.000"}), json!({"contenido": "Sin título"})],
        );
        assert_eq!(md, "# Ventas octubre\n\n## Resumen\n\nTotal: $1.200.000\n\nSin título\n");
    }

    #[test]
    fn slug_is_url_safe() {
        assert_eq!(slug("Ventas  Q3 / Sucursal Ñuñoa"), "ventas-q3-sucursal-u-oa");
        assert_eq!(slug("!!!"), "reporte");
    }

    #[tokio::test]
    async fn report_is_uploaded_and_url_returned() {
        let store = Arc::new(InMemoryBlobStore::new());
        let toolkit = ReportToolkit::new(store.clone());
        let ctx = InvocationCtx::new("s".into(), "u", "analista_ventas");
        let out = toolkit
            .call(
                "build_report",
                json!({"titulo": "Margen", "secciones": [{"contenido": "42%"}]}),
                &ctx,
            )
            .await
            .unwrap();
        let url = out["url"].as_str().unwrap();
        let name = url.strip_prefix("memory://").unwrap();
        assert!(name.starts_with("reportes/"));
        assert_eq!(String::from_utf8(store.get(name).unwrap()).unwrap(), "# Margen\n\n42%\n");
    }
}
