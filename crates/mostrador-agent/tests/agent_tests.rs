//! Tests for mostrador-agent: turn loop, tool rounds, streaming, admission and hooks

use async_trait::async_trait;
use mostrador_agent::*;
use mostrador_core::config::{BusyPolicy, RuntimeConfig};
use mostrador_core::{AgentDescriptor, ErrorKind, InvocationStatus, Role, SessionKey, TurnStatus};
use mostrador_knowledge::{Document, HashingEmbedder, InMemoryVectorStore, Retriever};
use mostrador_llm::{ContentBlock, LlmContent, LlmRequest, ProviderRegistry, ScriptStep, ScriptedProvider};
use mostrador_memory::{InMemoryStore, MemoryStore, StoreRegistry};
use mostrador_tools::{InvocationCtx, ToolDescriptor, ToolError, ToolHandler, ToolRegistry, Toolkit};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================
// Harness
// ============================================================

/// Catalog stand-in. SKU `ROTO` fails, SKU `LENTO` takes 300 ms.
struct FakeCatalog {
    calls: AtomicU32,
}

#[async_trait]
impl ToolHandler for FakeCatalog {
    async fn call(&self, op_name: &str, args: Value, _ctx: &InvocationCtx) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sku = args["sku"].as_str().unwrap_or_default().to_string();
        if sku == "LENTO" {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if sku == "ROTO" {
            return Err(ToolError::fatal(Some(404), "no results for product_by_sku"));
        }
        match op_name {
            "product_by_sku" => Ok(json!({"sku": sku, "nombre": "Filtro de aceite", "marca": "WUXI"})),
            "stock_by_sku" => Ok(json!({"sku": sku, "tienda": args["tienda"], "stock": 12})),
            other => Err(ToolError::UnknownOperation(other.to_string())),
        }
    }
}

impl Toolkit for FakeCatalog {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "catalog",
                "product_by_sku",
                "Ficha de producto por SKU",
                json!({"type": "object", "properties": {"sku": {"type": "string"}}, "required": ["sku"]}),
            ),
            ToolDescriptor::new(
                "catalog",
                "stock_by_sku",
                "Stock por SKU y tienda",
                json!({
                    "type": "object",
                    "properties": {"sku": {"type": "string"}, "tienda": {"type": "string"}},
                    "required": ["sku", "tienda"]
                }),
            ),
        ]
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryStore>,
    catalog: Arc<FakeCatalog>,
    factory: AgentFactory,
}

impl Harness {
    fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, RuntimeConfig::default())
    }

    fn with_config(provider: ScriptedProvider, config: RuntimeConfig) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryStore::new());
        let catalog = Arc::new(FakeCatalog {
            calls: AtomicU32::new(0),
        });
        let tools = Arc::new(ToolRegistry::new(100, 64, Duration::from_secs(5)));
        tools.register_toolkit(catalog.clone()).unwrap();

        let factory = AgentFactory::new(
            ProviderRegistry::new().with("openai", provider.clone()),
            StoreRegistry::new().with("ia", store.clone()),
            tools,
            config,
        );
        Self {
            provider,
            store,
            catalog,
            factory,
        }
    }

    fn agent(&self, extra: &str) -> Arc<AgentRuntime> {
        Arc::new(self.factory.build(&descriptor(extra)).unwrap())
    }
}

fn descriptor(extra: &str) -> AgentDescriptor {
    toml::from_str(&format!(
        r#"
agent_id = "vendedor"
name = "Vendedor"
model_ref = "openai:gpt-4.1"
persona = "Eres un vendedor de repuestos."
tool_refs = ["catalog"]
{}
"#,
        extra
    ))
    .unwrap()
}

fn tool_results(request: &LlmRequest) -> Vec<(String, String, Option<bool>)> {
    request
        .messages
        .iter()
        .flat_map(|m| match &m.content {
            LlmContent::Blocks(blocks) => blocks.clone(),
            LlmContent::Text(_) => Vec::new(),
        })
        .filter_map(|b| match b {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id, content, is_error)),
            _ => None,
        })
        .collect()
}

async fn drain(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// ============================================================
// Turn loop
// ============================================================

#[tokio::test]
async fn plain_turn_persists_user_and_assistant() {
    let h = Harness::new(ScriptedProvider::sequence(vec![ScriptStep::text("Hola, ¿en qué te ayudo?")]));
    let agent = h.agent("");

    let outcome = agent
        .run(RunRequest::new("s1", "jperez", "hola"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, "Hola, ¿en qué te ayudo?");
    assert_eq!(outcome.turn_seq, 2);

    let turns = h.store.load_turns(&SessionKey::from("s1")).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);

    let session = h.store.get_session(&SessionKey::from("s1")).await.unwrap().unwrap();
    assert_eq!(session.agent_id, "vendedor");

    let requests = h.provider.requests().await;
    let request = &requests[0];
    assert_eq!(request.model, "gpt-4.1");
    assert!(request.system.as_deref().unwrap().starts_with("Eres un vendedor"));
    let tool_names: Vec<String> = request.tools.as_ref().unwrap().iter().map(|t| t.name.clone()).collect();
    assert_eq!(tool_names, vec!["product_by_sku", "stock_by_sku"]);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::text("x")));
    let err = h
        .agent("")
        .run(RunRequest::new("s1", "u", "   "), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(h.provider.call_count().await, 0);
}

#[tokio::test]
async fn history_is_replayed_on_next_turn() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::text("Tenemos filtros WUXI."),
        ScriptStep::text("Cuesta $5.990."),
    ]));
    let agent = h.agent("");
    agent
        .run(RunRequest::new("s1", "u", "¿tienen filtros?"), None, CancellationToken::new())
        .await
        .unwrap();
    let second = agent
        .run(RunRequest::new("s1", "u", "¿cuánto cuesta?"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.turn_seq, 4);

    let requests = h.provider.requests().await;
    let texts: Vec<String> = requests[1].messages.iter().map(|m| m.content.text()).collect();
    assert_eq!(texts, vec!["¿tienen filtros?", "Tenemos filtros WUXI.", "¿cuánto cuesta?"]);
}

#[tokio::test]
async fn session_of_another_user_is_refused() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::text("Tu patente ABCD12 es un Volvo FH.")));
    let agent = h.agent("");
    agent
        .run(
            RunRequest::new("s1", "alicia", "mi patente es ABCD12, RUT 11.111.111-1"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let err = agent
        .run(RunRequest::new("s1", "mario", "hola"), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    // Refused before any prompt was built from the session's history.
    assert_eq!(h.provider.call_count().await, 1);

    let session = SessionKey::from("s1");
    assert_eq!(h.store.load_turns(&session).await.unwrap().len(), 2);
    assert_eq!(h.store.get_session(&session).await.unwrap().unwrap().user_id, "alicia");
}

#[tokio::test]
async fn tool_round_records_turns_and_invocations() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::ToolCalls(vec![
            ("product_by_sku".into(), json!({"sku": "WUXACC0001"})),
            ("stock_by_sku".into(), json!({"sku": "WUXACC0001", "tienda": "SAN BRNRDO"})),
        ]),
        ScriptStep::text("El filtro WUXI tiene 12 unidades en SAN BRNRDO."),
    ]));
    let agent = h.agent("");

    let outcome = agent
        .run(
            RunRequest::new("s1", "u", "muéstrame el SKU WUXACC0001 en SAN BRNRDO"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.turn_seq, 5);

    let session = SessionKey::from("s1");
    let turns = h.store.load_turns(&session).await.unwrap();
    let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]);
    assert_eq!(turns[1].tool_calls.len(), 2);
    assert_eq!(turns[2].tool_results[0].name, "product_by_sku");
    assert_eq!(turns[3].tool_results[0].name, "stock_by_sku");

    let invocations = h.store.load_invocations(&session).await.unwrap();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].op_ref, "catalog.product_by_sku");
    assert_eq!(invocations[0].turn_seq, 3);
    assert_eq!(invocations[1].turn_seq, 4);

    let requests = h.provider.requests().await;
    let results = tool_results(&requests[1]);
    assert_eq!(results.len(), 2);
    assert!(results[1].1.contains("\"stock\":12"));
    assert_eq!(results[1].2, Some(false));

    // The playground view omits nothing here since every turn committed.
    assert_eq!(agent.transcript(&session).await.unwrap().len(), 5);
}

#[tokio::test]
async fn tool_error_is_observed_and_recovered() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::tool("product_by_sku", json!({"sku": "ROTO"})),
        ScriptStep::tool("product_by_sku", json!({"sku": "WUXACC0001"})),
        ScriptStep::text("Encontré el filtro WUXI."),
    ]));
    let agent = h.agent("");

    let outcome = agent
        .run(RunRequest::new("s1", "u", "busca el filtro"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, "Encontré el filtro WUXI.");

    let turns = h.store.load_turns(&SessionKey::from("s1")).await.unwrap();
    let tool_statuses: Vec<InvocationStatus> = turns
        .iter()
        .flat_map(|t| t.tool_results.iter().map(|r| r.status))
        .collect();
    assert_eq!(tool_statuses, vec![InvocationStatus::Error, InvocationStatus::Ok]);

    let results = tool_results(&h.provider.requests().await[1]);
    assert_eq!(results[0].2, Some(true));
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_tool() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::tool("stock_by_sku", json!({"sku": "WUXACC0001"})),
        ScriptStep::tool("borrar_todo", json!({})),
        ScriptStep::text("Necesito la tienda."),
    ]));
    let agent = h.agent("");
    agent
        .run(RunRequest::new("s1", "u", "stock del filtro"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 0);

    let invocations = h.store.load_invocations(&SessionKey::from("s1")).await.unwrap();
    assert_eq!(invocations.len(), 2);
    assert!(invocations.iter().all(|i| i.status == InvocationStatus::Error));
}

#[tokio::test]
async fn tool_rounds_are_capped() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::tool(
        "product_by_sku",
        json!({"sku": "WUXACC0001"}),
    )));
    let agent = h.agent("max_tool_rounds = 2");

    let outcome = agent
        .run(RunRequest::new("s1", "u", "dame todo"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, EXHAUSTED_MESSAGE);
    assert_eq!(h.provider.call_count().await, 3);

    let invocations = h.store.load_invocations(&SessionKey::from("s1")).await.unwrap();
    assert_eq!(invocations.len(), 2);
    let last = h.store.load_turns(&SessionKey::from("s1")).await.unwrap().pop().unwrap();
    assert_eq!(last.content, EXHAUSTED_MESSAGE);
}

// ============================================================
// Streaming
// ============================================================

#[tokio::test]
async fn streaming_emits_only_terminal_text_as_chunks() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::TextThenTools(
            "Déjame revisar el catálogo".into(),
            vec![("product_by_sku".into(), json!({"sku": "WUXACC0001"}))],
        ),
        ScriptStep::text("El filtro de aceite WUXI cuesta $5.990 y hay stock en tu tienda."),
    ]));
    let agent = h.agent("");
    let (tx, rx) = mpsc::channel(64);

    let outcome = agent
        .run(
            RunRequest::new("s1", "u", "precio del WUXACC0001").with_intermediate_steps(true),
            Some(tx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let events = drain(rx).await;

    let chunks: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, outcome.message);
    assert!(!chunks.contains("Déjame"));

    assert!(matches!(&events[0], AgentEvent::ToolCall { name, .. } if name == "product_by_sku"));
    assert!(matches!(&events[1], AgentEvent::ToolResult { status: InvocationStatus::Ok, .. }));
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Final {
            message: outcome.message.clone(),
            turn_seq: outcome.turn_seq
        })
    );
}

#[tokio::test]
async fn intermediate_steps_are_opt_in() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::tool("product_by_sku", json!({"sku": "WUXACC0001"})),
        ScriptStep::text("Listo."),
    ]));
    let (tx, rx) = mpsc::channel(64);
    h.agent("")
        .run(RunRequest::new("s1", "u", "ficha"), Some(tx), CancellationToken::new())
        .await
        .unwrap();
    let events = drain(rx).await;
    assert!(events
        .iter()
        .all(|e| matches!(e, AgentEvent::Chunk { .. } | AgentEvent::Final { .. })));
}

#[tokio::test]
async fn streaming_failure_ends_with_error_event() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::Error("boom".into())));
    let (tx, rx) = mpsc::channel(8);
    let err = h
        .agent("")
        .run(RunRequest::new("s1", "u", "hola"), Some(tx), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFatal);

    let events = drain(rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        AgentEvent::Error { error, message } => {
            assert_eq!(error, "upstream_fatal");
            assert!(!message.contains("boom"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

// ============================================================
// Admission, timeouts and cancellation
// ============================================================

#[tokio::test]
async fn concurrent_run_on_same_session_is_busy() {
    let config = RuntimeConfig {
        session_wait_ms: 100,
        busy_policy: BusyPolicy::Wait,
        ..Default::default()
    };
    let h = Harness::with_config(
        ScriptedProvider::sequence(vec![
            ScriptStep::text("primera").delayed(Duration::from_millis(500)),
            ScriptStep::text("tercera"),
        ]),
        config,
    );
    let agent = h.agent("");

    let first = {
        let agent = agent.clone();
        tokio::spawn(async move {
            agent
                .run(RunRequest::new("s1", "u", "uno"), None, CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = agent
        .run(RunRequest::new("s1", "u", "dos"), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionBusy);

    // Other sessions are unaffected.
    assert!(!h.factory.locks().is_busy(&SessionKey::from("s2")));

    let first = first.await.unwrap().unwrap();
    let third = agent
        .run(RunRequest::new("s1", "u", "tres"), None, CancellationToken::new())
        .await
        .unwrap();
    let turns = h.store.load_turns(&SessionKey::from("s1")).await.unwrap();
    let user_turn = turns.iter().find(|t| t.content == "tres").unwrap();
    assert_eq!(user_turn.seq, first.turn_seq + 1);
    assert_eq!(third.turn_seq, first.turn_seq + 2);
}

#[tokio::test]
async fn model_timeout_is_retried_once() {
    let config = RuntimeConfig {
        model_timeout_s: 1,
        ..Default::default()
    };
    let h = Harness::with_config(
        ScriptedProvider::sequence(vec![
            ScriptStep::text("tarde").delayed(Duration::from_millis(1500)),
            ScriptStep::text("a tiempo"),
        ]),
        config,
    );
    let outcome = h
        .agent("")
        .run(RunRequest::new("s1", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, "a tiempo");
    assert_eq!(h.provider.call_count().await, 2);
}

#[tokio::test]
async fn second_model_timeout_surfaces() {
    let config = RuntimeConfig {
        model_timeout_s: 1,
        ..Default::default()
    };
    let h = Harness::with_config(
        ScriptedProvider::constant(ScriptStep::text("tarde").delayed(Duration::from_millis(1500))),
        config,
    );
    let err = h
        .agent("")
        .run(RunRequest::new("s1", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.provider.call_count().await, 2);
}

#[tokio::test]
async fn cancelled_turn_still_records_in_flight_tool() {
    let h = Harness::new(ScriptedProvider::sequence(vec![ScriptStep::tool(
        "product_by_sku",
        json!({"sku": "LENTO"}),
    )]));
    let agent = h.agent("");
    let cancel = CancellationToken::new();

    let run = {
        let agent = agent.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(RunRequest::new("s1", "u", "ficha lenta"), None, cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    assert!(run.await.unwrap().is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let session = SessionKey::from("s1");
    let invocations = h.store.load_invocations(&session).await.unwrap();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].status, InvocationStatus::Ok);
    let turns = h.store.load_turns(&session).await.unwrap();
    assert_eq!(turns.last().unwrap().role, Role::Tool);
    assert!(turns.iter().all(|t| t.status == TurnStatus::Committed));
}

#[tokio::test]
async fn cancelled_round_answers_every_call() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        ScriptStep::ToolCalls(vec![
            ("product_by_sku".into(), json!({"sku": "LENTO"})),
            ("stock_by_sku".into(), json!({"sku": "LENTO", "tienda": "TEMUCO"})),
        ]),
        ScriptStep::text("¿En qué más te ayudo?"),
    ]));
    let agent = h.agent("");
    let cancel = CancellationToken::new();

    let run = {
        let agent = agent.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(RunRequest::new("s1", "u", "ficha y stock"), None, cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    assert!(run.await.unwrap().is_err());
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Only the call in flight reached the catalog.
    assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 1);

    let session = SessionKey::from("s1");
    let turns = h.store.load_turns(&session).await.unwrap();
    let assistant = turns.iter().find(|t| !t.tool_calls.is_empty()).unwrap();
    for call in &assistant.tool_calls {
        assert!(
            turns
                .iter()
                .filter(|t| t.role == Role::Tool)
                .any(|t| t.tool_results.iter().any(|r| r.invocation_id == call.invocation_id)),
            "call {} has no tool turn",
            call.invocation_id
        );
    }
    assert!(turns.iter().all(|t| t.status == TurnStatus::Committed));

    let invocations = h.store.load_invocations(&session).await.unwrap();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].status, InvocationStatus::Ok);
    assert_eq!(invocations[1].status, InvocationStatus::Error);
    assert_eq!(invocations[1].attempts, 0);

    let skipped = turns.last().unwrap();
    assert!(skipped.content.contains("cancelled"));

    let next = agent
        .run(RunRequest::new("s1", "u", "¿sigues ahí?"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(next.message, "¿En qué más te ayudo?");
}

// ============================================================
// Knowledge and memory
// ============================================================

#[tokio::test]
async fn knowledge_is_injected_under_reference() {
    let retriever = Retriever::new(Arc::new(HashingEmbedder::new(64)), Arc::new(InMemoryVectorStore::new()));
    retriever
        .load(
            "politicas",
            vec![Document {
                id: "despacho".into(),
                text: "El despacho a domicilio es gratis sobre $50.000".into(),
                payload: Value::Null,
            }],
        )
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::constant(ScriptStep::text("Es gratis sobre $50.000.")));
    let store = Arc::new(InMemoryStore::new());
    let factory = AgentFactory::new(
        ProviderRegistry::new().with("openai", provider.clone()),
        StoreRegistry::new().with("ia", store),
        Arc::new(ToolRegistry::default()),
        RuntimeConfig::default(),
    )
    .with_retriever(retriever);

    let mut with_knowledge = descriptor("[knowledge]\ncollection = \"politicas\"\nk = 1");
    with_knowledge.tool_refs.clear();
    let agent = factory.build(&with_knowledge).unwrap();
    agent
        .run(RunRequest::new("s1", "u", "¿el despacho es gratis?"), None, CancellationToken::new())
        .await
        .unwrap();

    let system = provider.requests().await[0].system.clone().unwrap();
    assert!(system.contains("## Reference\n[despacho] El despacho a domicilio es gratis"));
}

fn memory_provider() -> ScriptedProvider {
    ScriptedProvider::from_fn(|request| {
        let system = request.system.clone().unwrap_or_default();
        if system.starts_with("You extract durable facts") {
            ScriptStep::text(r#"[{"text": "Tiene un camión Volvo FH 2018", "importance": 0.8}]"#)
        } else if system.starts_with("Summarize the conversation") {
            ScriptStep::text("El usuario busca filtros para su Volvo FH.")
        } else {
            ScriptStep::text("Anotado.")
        }
    })
}

#[tokio::test]
async fn hooks_distill_memories_without_duplicates() {
    let h = Harness::new(memory_provider());
    let agent = h.agent("[memory_policy]\nenable_user_memories = true\nenable_session_summaries = true");

    for message in ["tengo un Volvo FH 2018", "filtro para mi Volvo", "¿y el de aire?"] {
        agent
            .run(RunRequest::new("s1", "jperez", message), None, CancellationToken::new())
            .await
            .unwrap();
    }

    let memories = h.store.get_user_memories("jperez", "vendedor", 10).await.unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].text, "Tiene un camión Volvo FH 2018");

    let summary = h
        .store
        .get_session_summary("vendedor", &SessionKey::from("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.text, "El usuario busca filtros para su Volvo FH.");

    let requests = h.provider.requests().await;
    let last_turn_prompt = requests
        .iter()
        .filter_map(|r| r.system.clone())
        .filter(|s| s.starts_with("Eres un vendedor"))
        .last()
        .unwrap();
    assert!(last_turn_prompt.contains("## User memories\n- Tiene un camión Volvo FH 2018"));
    assert!(last_turn_prompt.contains("## Session summary\nEl usuario busca filtros"));
}

#[tokio::test]
async fn hook_failure_does_not_fail_the_turn() {
    let provider = ScriptedProvider::from_fn(|request| {
        if request.system.as_deref().map_or(false, |s| s.starts_with("You extract")) {
            ScriptStep::Error("overloaded".into())
        } else {
            ScriptStep::text("Hola.")
        }
    });
    let h = Harness::new(provider);
    let agent = h.agent("[memory_policy]\nenable_user_memories = true");
    let outcome = agent
        .run(RunRequest::new("s1", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, "Hola.");
    assert!(h.store.get_user_memories("u", "vendedor", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_memory_model_cannot_hold_the_reply() {
    let provider = ScriptedProvider::from_fn(|request| {
        if request.system.as_deref().map_or(false, |s| s.starts_with("You extract")) {
            ScriptStep::text("[]").delayed(Duration::from_secs(30))
        } else {
            ScriptStep::text("Hola.")
        }
    });
    let config = RuntimeConfig {
        model_timeout_s: 1,
        ..Default::default()
    };
    let h = Harness::with_config(provider, config);
    let agent = h.agent("[memory_policy]\nenable_user_memories = true");

    let started = std::time::Instant::now();
    let outcome = agent
        .run(RunRequest::new("s1", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, "Hola.");
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================
// Factory and registry
// ============================================================

#[tokio::test]
async fn factory_rejects_unknown_provider_store_and_tool() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::text("x")));

    let mut bad_provider = descriptor("");
    bad_provider.model_ref = "anthropic:claude-sonnet-4-5".into();
    assert!(h.factory.build(&bad_provider).is_err());

    let bad_store = descriptor("store = \"nube\"");
    assert_eq!(h.factory.build(&bad_store).err().map(|e| e.kind()), Some(ErrorKind::Config));

    let mut bad_tool = descriptor("");
    bad_tool.tool_refs = vec!["warehouse".into()];
    assert_eq!(h.factory.build(&bad_tool).err().map(|e| e.kind()), Some(ErrorKind::Config));
}

#[tokio::test]
async fn registry_lists_in_declaration_order() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::text("ok")));
    let mut analista = descriptor("description = \"Ventas\"\nprofile_tags = [\"gerencia\"]");
    analista.agent_id = "analista".into();
    let registry = h.factory.build_all(&[descriptor(""), analista]).unwrap();

    let ids: Vec<String> = registry.list().into_iter().map(|a| a.agent_id).collect();
    assert_eq!(ids, vec!["vendedor", "analista"]);
    assert_eq!(registry.list()[1].profile_tags, vec!["gerencia"]);

    let err = registry
        .run("inexistente", RunRequest::new("s", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let outcome = registry
        .run("analista", RunRequest::new("s", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.message, "ok");
}
