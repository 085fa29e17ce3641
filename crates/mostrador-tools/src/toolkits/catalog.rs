//! Operational back-end: catalogue, stock, vehicles, logistics and orders

use crate::descriptor::{RetryPolicy, ToolDescriptor};
use crate::error::ToolError;
use crate::registry::{InvocationCtx, ToolHandler, Toolkit};
use async_trait::async_trait;
use mostrador_core::config::BackendConfig;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

pub const TOOL_ID: &str = "catalog";

struct OpSpec {
    name: &'static str,
    description: &'static str,
    path: &'static str,
    params: &'static [(&'static str, &'static str)],
    required: &'static [&'static str],
    ttl_s: u64,
}

const OPS: &[OpSpec] = &[
    OpSpec {
        name: "product_by_sku",
        description: "Ficha de producto por SKU: descripción, marca, precio y atributos.",
        path: "/catalogo/productos/{sku}",
        params: &[("sku", "SKU del producto")],
        required: &["sku"],
        ttl_s: 3600,
    },
    OpSpec {
        name: "stock_by_sku",
        description: "Stock disponible de un SKU, opcionalmente en una tienda.",
        path: "/inventario/stock/{sku}",
        params: &[("sku", "SKU del producto"), ("tienda", "Código de tienda, p. ej. SAN BRNRDO")],
        required: &["sku"],
        ttl_s: 300,
    },
    OpSpec {
        name: "vehicle_by_plate",
        description: "Datos del vehículo (marca, modelo, año, motor) a partir de la patente chilena.",
        path: "/vehiculos/patente/{patente}",
        params: &[("patente", "Patente, p. ej. ABCD12")],
        required: &["patente"],
        ttl_s: 86_400,
    },
    OpSpec {
        name: "vehicle_by_vin",
        description: "Datos del vehículo a partir del VIN.",
        path: "/vehiculos/vin/{vin}",
        params: &[("vin", "Número VIN de 17 caracteres")],
        required: &["vin"],
        ttl_s: 86_400,
    },
    OpSpec {
        name: "oem_crossref",
        description: "SKUs equivalentes a un código OEM.",
        path: "/catalogo/oem/{oem}",
        params: &[("oem", "Código OEM del fabricante")],
        required: &["oem"],
        ttl_s: 86_400,
    },
    OpSpec {
        name: "pickup_dates",
        description: "Fechas de retiro en tienda para un SKU y cantidad.",
        path: "/logistica/retiro",
        params: &[("sku", "SKU"), ("tienda", "Código de tienda"), ("cantidad", "Unidades")],
        required: &["sku", "tienda"],
        ttl_s: 300,
    },
    OpSpec {
        name: "delivery_dates",
        description: "Fechas de despacho a domicilio para un SKU, comuna y cantidad.",
        path: "/logistica/despacho",
        params: &[("sku", "SKU"), ("comuna", "Comuna de destino"), ("cantidad", "Unidades")],
        required: &["sku", "comuna"],
        ttl_s: 300,
    },
    OpSpec {
        name: "order_tracking",
        description: "Estado y seguimiento de una orden de venta.",
        path: "/ventas/ordenes/{ov}/seguimiento",
        params: &[("ov", "Número de orden de venta")],
        required: &["ov"],
        ttl_s: 60,
    },
];

fn op_spec(name: &str) -> Option<&'static OpSpec> {
    OPS.iter().find(|op| op.name == name)
}

fn param_schema(op: &OpSpec) -> Value {
    let properties: serde_json::Map<String, Value> = op
        .params
        .iter()
        .map(|(name, description)| {
            let ty = if *name == "cantidad" { "integer" } else { "string" };
            (name.to_string(), json!({"type": ty, "description": description}))
        })
        .collect();
    json!({"type": "object", "properties": properties, "required": op.required})
}

fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fill `{placeholders}` of `template` from `args`. Unused args are returned
/// as query pairs.
pub fn build_url(base_url: &str, template: &str, args: &Value) -> Result<Url, ToolError> {
    let mut url = Url::parse(base_url).map_err(|e| ToolError::fatal(None, format!("invalid base url: {}", e)))?;
    let mut remaining: BTreeMap<String, String> = args
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), arg_to_string(v))).collect())
        .unwrap_or_default();

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ToolError::fatal(None, "base url cannot carry a path"))?;
        segments.pop_if_empty();
        for segment in template.split('/').filter(|s| !s.is_empty()) {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    let value = remaining
                        .remove(name)
                        .ok_or_else(|| ToolError::Input(format!("missing '{}'", name)))?;
                    segments.push(&value);
                }
                None => {
                    segments.push(segment);
                }
            }
        }
    }

    if !remaining.is_empty() {
        url.query_pairs_mut().extend_pairs(remaining.iter());
    }
    Ok(url)
}

pub struct CatalogToolkit {
    client: Client,
    base_url: String,
    basic_auth: Option<(String, String)>,
    paths: BTreeMap<String, String>,
    cache_ttl_s: BTreeMap<String, u64>,
}

impl CatalogToolkit {
    pub fn new(config: &BackendConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| ToolError::fatal(None, e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            basic_auth: config.basic_auth_pair(),
            paths: config.paths.clone(),
            cache_ttl_s: config.cache_ttl_s.clone(),
        })
    }

    fn path_for(&self, op: &OpSpec) -> String {
        self.paths.get(op.name).cloned().unwrap_or_else(|| op.path.to_string())
    }

    fn ttl_for(&self, op: &OpSpec) -> u64 {
        self.cache_ttl_s.get(op.name).copied().unwrap_or(op.ttl_s)
    }

    async fn get(&self, op: &OpSpec, args: &Value) -> Result<Value, ToolError> {
        let url = build_url(&self.base_url, &self.path_for(op), args)?;
        debug!(op = op.name, url = %url.path(), "catalog request");

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 404 {
            return Err(ToolError::fatal(Some(404), format!("no results for {}", op.name)));
        }
        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(ToolError::from_status(status.as_u16(), snippet));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl ToolHandler for CatalogToolkit {
    async fn call(&self, op_name: &str, args: Value, _ctx: &InvocationCtx) -> Result<Value, ToolError> {
        let op = op_spec(op_name).ok_or_else(|| ToolError::UnknownOperation(format!("{}.{}", TOOL_ID, op_name)))?;
        self.get(op, &args).await
    }
}

impl Toolkit for CatalogToolkit {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        OPS.iter()
            .map(|op| {
                ToolDescriptor::new(TOOL_ID, op.name, op.description, param_schema(op))
                    .returns(json!({"type": "object"}))
                    .cached(self.ttl_for(op))
                    .retry(RetryPolicy::gateway_errors(3))
            })
            .collect()
    }
}
