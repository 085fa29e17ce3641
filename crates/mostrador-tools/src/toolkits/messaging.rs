//! Outbound notifications: one POST per product or image

use crate::descriptor::ToolDescriptor;
use crate::error::ToolError;
use crate::registry::{InvocationCtx, ToolHandler, Toolkit};
use async_trait::async_trait;
use mostrador_core::config::BackendConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const TOOL_ID: &str = "messaging";

pub struct MessagingToolkit {
    client: Client,
    url: Option<String>,
    basic_auth: Option<(String, String)>,
}

impl MessagingToolkit {
    pub fn new(config: &BackendConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| ToolError::fatal(None, e.to_string()))?;
        Ok(Self {
            client,
            url: config.messaging_url.clone(),
            basic_auth: config.basic_auth_pair(),
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<(), ToolError> {
        let mut request = self.client.post(url).json(body);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ToolError::from_status(status.as_u16(), format!("messaging returned {}", status)))
        }
    }

    /// Posts each payload in order. Failures are counted, not retried, so a
    /// recipient never gets the same message twice.
    async fn send_each(&self, payloads: Vec<Value>) -> Result<Value, ToolError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ToolError::fatal(None, "messaging is not configured"))?;
        let mut sent = 0;
        let mut failed = 0;
        for payload in &payloads {
            match self.post(url, payload).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(error = %e, "message not delivered");
                    failed += 1;
                }
            }
        }
        debug!(sent, failed, "messages posted");
        if sent == 0 && failed > 0 {
            return Err(ToolError::fatal(None, "no message could be delivered"));
        }
        Ok(json!({"sent": sent, "failed": failed}))
    }
}

fn recipient(args: &Value, ctx: &InvocationCtx) -> String {
    args.get("destinatario")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| ctx.user_id.clone())
}

fn items<'a>(args: &'a Value, name: &str) -> Result<&'a Vec<Value>, ToolError> {
    args.get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Input(format!("missing '{}'", name)))
}

#[async_trait]
impl ToolHandler for MessagingToolkit {
    async fn call(&self, op_name: &str, args: Value, ctx: &InvocationCtx) -> Result<Value, ToolError> {
        let to = recipient(&args, ctx);
        let payloads: Vec<Value> = match op_name {
            "send_products" => items(&args, "productos")?
                .iter()
                .map(|product| json!({"destinatario": to, "tipo": "producto", "producto": product}))
                .collect(),
            "send_images" => items(&args, "imagenes")?
                .iter()
                .map(|url| json!({"destinatario": to, "tipo": "imagen", "url": url}))
                .collect(),
            other => return Err(ToolError::UnknownOperation(format!("{}.{}", TOOL_ID, other))),
        };
        self.send_each(payloads).await
    }
}

impl Toolkit for MessagingToolkit {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                TOOL_ID,
                "send_products",
                "Envía al cliente un mensaje por cada producto indicado.",
                json!({
                    "type": "object",
                    "properties": {
                        "destinatario": {"type": "string", "description": "Teléfono o id del cliente; por defecto el usuario actual"},
                        "productos": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "sku": {"type": "string"},
                                    "nombre": {"type": "string"},
                                    "precio": {"type": "number"}
                                },
                                "required": ["sku"]
                            }
                        }
                    },
                    "required": ["productos"]
                }),
            )
            .returns(json!({"type": "object"})),
            ToolDescriptor::new(
                TOOL_ID,
                "send_images",
                "Envía al cliente un mensaje por cada imagen indicada.",
                json!({
                    "type": "object",
                    "properties": {
                        "destinatario": {"type": "string"},
                        "imagenes": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["imagenes"]
                }),
            )
            .returns(json!({"type": "object"})),
        ]
    }
}
