//! Read-only SQL over the OLAP warehouse (ClickHouse HTTP interface)

use crate::descriptor::{RetryPolicy, ToolDescriptor};
use crate::error::ToolError;
use crate::registry::{InvocationCtx, ToolHandler, Toolkit};
use async_trait::async_trait;
use mostrador_core::config::WarehouseConfig;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

pub const TOOL_ID: &str = "warehouse";

const SCHEMA_DESCRIPTION: &str = "\
Base de datos: implementos (ClickHouse). Solo consultas SELECT.

Tabla implementos.ventasrealtime (una fila por línea de venta):
  fecha Date, hora DateTime, ov String (orden de venta), sucursal String,
  uen String (unidad de negocio), sku String, descripcion String,
  cantidad Float64, venta_neta Float64, costo Float64, margen Float64,
  cod_vendedor String, nombre_vendedor String, rut_cliente String,
  nombre_cliente String, canal String.

Tabla implementos.productos:
  sku String, descripcion String, uen String, categoria String,
  linea String, marca String, precio_lista Float64.

Tabla implementos.stock:
  sku String, bodega String, sucursal String, stock Float64,
  fecha_actualizacion DateTime.

Convenciones: montos en pesos chilenos sin IVA; usar toStartOfMonth(fecha)
para agrupar por mes; limitar resultados con LIMIT.";

static COMMENT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--[^\n]*").expect("valid regex"));
static COMMENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));
static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^'\\]|\\.)*'").expect("valid regex"));
static LEADING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\(*\s*(select|with)\b").expect("valid regex"));
static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|rename|attach|detach|optimize|grant|revoke|kill|outfile)\b",
    )
    .expect("valid regex")
});
/// Commands that only mean something where a statement starts; elsewhere
/// these words are ordinary column names or aliases.
static STATEMENT_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|;)\s*\(*\s*(system|set|use)\b").expect("valid regex"));
/// A trailing `FORMAT <name>` clause. `format` as a column or function is fine.
static FORMAT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(format)\s+[a-z_][a-z0-9_]*\s*$").expect("valid regex"));
static SYSTEM_TABLES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bsystem\s*\.").expect("valid regex"));

/// Reject anything but a single SELECT/WITH statement. Returns the query
/// without trailing semicolons.
pub fn guard_select(query: &str) -> Result<String, ToolError> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(ToolError::Policy("empty query".to_string()));
    }

    let without_comments = COMMENT_BLOCK.replace_all(trimmed, " ");
    let without_comments = COMMENT_LINE.replace_all(&without_comments, " ");
    let skeleton = STRING_LITERAL.replace_all(&without_comments, "''");

    if skeleton.contains(';') {
        return Err(ToolError::Policy("only one statement is allowed".to_string()));
    }
    if !LEADING_KEYWORD.is_match(&skeleton) {
        return Err(ToolError::Policy("only SELECT queries are allowed".to_string()));
    }
    let keyword = [&*FORBIDDEN, &*STATEMENT_COMMAND, &*FORMAT_CLAUSE]
        .iter()
        .find_map(|re| re.captures(&skeleton).and_then(|c| c.get(1)));
    if let Some(m) = keyword {
        return Err(ToolError::Policy(format!(
            "keyword '{}' is not allowed in read-only queries",
            m.as_str().to_uppercase()
        )));
    }
    if SYSTEM_TABLES.is_match(&skeleton) {
        return Err(ToolError::Policy("system tables are not available".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Integers for |x| >= 10, one decimal otherwise. Integers pass through.
pub fn round_number(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => {
            let x = n.as_f64().unwrap_or_default();
            if x.abs() >= 10.0 {
                json!(x.round() as i64)
            } else {
                json!((x * 10.0).round() / 10.0)
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(round_number).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), round_number(v))).collect()),
        other => other.clone(),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Rows as `{column: value}` objects with floats rounded.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let record: Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, v)| (col.clone(), round_number(v)))
                    .collect();
                Value::Object(record)
            })
            .collect()
    }
}

/// Executes read-only SQL. `row_limit` bounds how many rows are fetched.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn query(&self, sql: &str, row_limit: usize) -> Result<QueryResult, ToolError>;
}

/// ClickHouse over its HTTP interface.
pub struct ClickHouseHttp {
    client: Client,
    base_url: String,
    user: String,
    password: Option<String>,
    database: String,
}

impl ClickHouseHttp {
    pub fn new(config: &WarehouseConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_s))
            .timeout(Duration::from_secs(config.send_receive_timeout_s))
            .danger_accept_invalid_certs(config.secure && !config.verify)
            .build()
            .map_err(|e| ToolError::fatal(None, e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
        })
    }
}

#[derive(Deserialize)]
struct CompactResponse {
    meta: Vec<ColumnMeta>,
    data: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct ColumnMeta {
    name: String,
}

#[async_trait]
impl Warehouse for ClickHouseHttp {
    async fn query(&self, sql: &str, row_limit: usize) -> Result<QueryResult, ToolError> {
        let max_rows = (row_limit + 1).to_string();
        let mut request = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&[
                ("database", self.database.as_str()),
                ("default_format", "JSONCompact"),
                ("readonly", "1"),
                ("max_result_rows", max_rows.as_str()),
                ("result_overflow_mode", "break"),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .header("X-ClickHouse-User", &self.user)
            .body(sql.to_string());
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            // ClickHouse puts "Code: N. DB::Exception: ..." first; keep it short.
            let first_line: String = body.lines().next().unwrap_or_default().chars().take(300).collect();
            return Err(ToolError::from_status(status.as_u16(), first_line));
        }

        let parsed: CompactResponse = serde_json::from_str(&body)
            .map_err(|e| ToolError::fatal(Some(status.as_u16()), format!("unexpected warehouse response: {}", e)))?;
        Ok(QueryResult {
            columns: parsed.meta.into_iter().map(|m| m.name).collect(),
            rows: parsed.data,
        })
    }
}

pub struct WarehouseToolkit {
    warehouse: Arc<dyn Warehouse>,
    row_cap: usize,
    cache_ttl_s: u64,
}

impl WarehouseToolkit {
    pub fn new(warehouse: Arc<dyn Warehouse>, row_cap: usize, cache_ttl_s: u64) -> Self {
        Self {
            warehouse,
            row_cap: row_cap.max(1),
            cache_ttl_s,
        }
    }

    async fn run_select(&self, query: &str) -> Result<Value, ToolError> {
        let query = guard_select(query)?;
        let result = self.warehouse.query(&query, self.row_cap).await?;
        if result.rows.len() > self.row_cap {
            return Err(ToolError::Policy(format!(
                "the query returned more than {} rows; add filters, aggregation or LIMIT",
                self.row_cap
            )));
        }
        debug!(rows = result.rows.len(), "warehouse query ok");
        Ok(json!({
            "row_count": result.rows.len(),
            "rows": result.to_records(),
        }))
    }
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Input(format!("missing '{}'", name)))
}

#[async_trait]
impl ToolHandler for WarehouseToolkit {
    async fn call(&self, op_name: &str, args: Value, _ctx: &InvocationCtx) -> Result<Value, ToolError> {
        match op_name {
            "list_schema" => Ok(Value::String(SCHEMA_DESCRIPTION.to_string())),
            "run_select_query" => self.run_select(str_arg(&args, "query")?).await,
            "run_query_batch" => {
                let items = args
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ToolError::Input("missing 'items'".to_string()))?;
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let objetivo = item.get("objetivo").cloned().unwrap_or(Value::Null);
                    let outcome = match str_arg(item, "query") {
                        Ok(query) => self.run_select(query).await,
                        Err(e) => Err(e),
                    };
                    results.push(match outcome {
                        Ok(result) => json!({"objetivo": objetivo, "status": "ok", "result": result}),
                        Err(e) => json!({"objetivo": objetivo, "status": "error", "error": e.model_message()}),
                    });
                }
                Ok(Value::Array(results))
            }
            other => Err(ToolError::UnknownOperation(format!("{}.{}", TOOL_ID, other))),
        }
    }
}

impl Toolkit for WarehouseToolkit {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let query_item = json!({
            "type": "object",
            "properties": {
                "objetivo": {"type": "string", "description": "Qué se busca responder con la consulta"},
                "query": {"type": "string", "description": "Consulta SELECT de ClickHouse"}
            },
            "required": ["objetivo", "query"]
        });
        let retry = RetryPolicy::gateway_errors(2);
        vec![
            ToolDescriptor::new(
                TOOL_ID,
                "list_schema",
                "Describe las tablas y columnas disponibles en el data warehouse.",
                json!({"type": "object", "properties": {}}),
            ),
            ToolDescriptor::new(
                TOOL_ID,
                "run_select_query",
                "Ejecuta una consulta SELECT de solo lectura y devuelve las filas.",
                query_item.clone(),
            )
            .returns(json!({"type": "object"}))
            .cached(self.cache_ttl_s)
            .retry(retry.clone()),
            ToolDescriptor::new(
                TOOL_ID,
                "run_query_batch",
                "Ejecuta varias consultas SELECT en orden; cada una informa su propio estado.",
                json!({
                    "type": "object",
                    "properties": {"items": {"type": "array", "items": query_item}},
                    "required": ["items"]
                }),
            )
            .returns(json!({"type": "array"}))
            .retry(retry),
        ]
    }
}
