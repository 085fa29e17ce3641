//! Tests for mostrador-team: classification, delegation, follow-ups and misroutes

use mostrador_agent::{AgentEvent, AgentFactory, AgentRegistry, CancellationToken, RunRequest};
use mostrador_core::config::RuntimeConfig;
use mostrador_core::{AgentDescriptor, ErrorKind, Role, SessionKey, TeamDescriptor};
use mostrador_llm::{ProviderRegistry, ScriptStep, ScriptedProvider};
use mostrador_memory::{InMemoryStore, MemoryStore, StoreRegistry};
use mostrador_team::*;
use mostrador_tools::ToolRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;

const SALES_ANSWER: &str = "Las ventas del mes pasado fueron $1.200 millones.";
const STOCK_ANSWER: &str = "El SKU WUXACC0001 tiene 12 unidades.";

// ============================================================
// Harness
// ============================================================

struct Harness {
    classifier: Arc<ScriptedProvider>,
    members: Arc<ScriptedProvider>,
    store: Arc<InMemoryStore>,
    factory: AgentFactory,
    agents: AgentRegistry,
}

impl Harness {
    fn new(classifier: ScriptedProvider) -> Self {
        Self::with_store(classifier, Arc::new(InMemoryStore::new()))
    }

    fn with_store(classifier: ScriptedProvider, store: Arc<InMemoryStore>) -> Self {
        let classifier = Arc::new(classifier);
        let members = Arc::new(ScriptedProvider::from_fn(|request| {
            let system = request.system.clone().unwrap_or_default();
            if system.starts_with("Eres el analista") {
                ScriptStep::text(SALES_ANSWER)
            } else {
                ScriptStep::text(STOCK_ANSWER)
            }
        }));
        let factory = AgentFactory::new(
            ProviderRegistry::new()
                .with("anthropic", classifier.clone())
                .with("openai", members.clone()),
            StoreRegistry::new().with("ia", store.clone()),
            Arc::new(ToolRegistry::default()),
            RuntimeConfig::default(),
        );
        let agents = factory
            .build_all(&[
                agent("vendedor", "Vendedor", "Eres el vendedor."),
                agent("analista", "Analista de ventas", "Eres el analista."),
            ])
            .unwrap();
        Self {
            classifier,
            members,
            store,
            factory,
            agents,
        }
    }

    fn teams(&self) -> TeamRegistry {
        TeamRegistry::build(&[team()], &self.factory, &self.agents).unwrap()
    }
}

fn agent(id: &str, name: &str, persona: &str) -> AgentDescriptor {
    toml::from_str(&format!(
        "agent_id = \"{}\"\nname = \"{}\"\nmodel_ref = \"openai:gpt-4.1\"\npersona = \"{}\"",
        id, name, persona
    ))
    .unwrap()
}

fn team() -> TeamDescriptor {
    toml::from_str(
        r#"
team_id = "mesa"
name = "Mesa de ayuda"
model_ref = "anthropic:claude-haiku-4-5"
instructions = ["Preguntas de ventas, márgenes o metas van al analista", "Productos, stock y precios van al vendedor"]

[[members]]
agent_id = "vendedor"
intents = ["sku", "stock", "precio"]

[[members]]
agent_id = "analista"
intents = ["ventas", "mes pasado", "margen"]
"#,
    )
    .unwrap()
}

fn decision(json: &str) -> ScriptStep {
    ScriptStep::text(json)
}

async fn route(teams: &TeamRegistry, session: &str, message: &str) -> TeamOutcome {
    teams
        .route("mesa", RunRequest::new(session, "jperez", message), None, CancellationToken::new())
        .await
        .unwrap()
}

// ============================================================
// Delegation
// ============================================================

#[tokio::test]
async fn delegates_unchanged_message_to_one_member() {
    let h = Harness::new(ScriptedProvider::sequence(vec![decision(r#"{"member": "analista"}"#)]));
    let teams = h.teams();
    let message = "¿cuáles fueron las ventas totales del mes pasado?";

    let outcome = route(&teams, "t1", message).await;
    assert_eq!(outcome.member, "analista");
    assert_eq!(outcome.message, SALES_ANSWER);

    let member_requests = h.members.requests().await;
    assert_eq!(member_requests.len(), 1);
    assert_eq!(member_requests[0].last_user_text().as_deref(), Some(message));

    let member_turns = h.store.load_turns(&SessionKey::from("t1::analista")).await.unwrap();
    assert_eq!(member_turns.len(), 2);

    let team_log = h.store.load_turns(&SessionKey::from("t1")).await.unwrap();
    let log: Vec<(Role, &str)> = team_log.iter().map(|t| (t.role, t.content.as_str())).collect();
    assert_eq!(
        log,
        vec![
            (Role::User, message),
            (Role::System, "delegated_to=analista"),
            (Role::Assistant, SALES_ANSWER),
        ]
    );
    assert_eq!(outcome.turn_seq, 3);

    let classifier_request = &h.classifier.requests().await[0];
    let system = classifier_request.system.clone().unwrap();
    assert!(system.contains("- analista: Analista de ventas (intents: ventas, mes pasado, margen)"));
    assert!(system.contains("## Rubric\n- Preguntas de ventas"));
}

#[tokio::test]
async fn follow_up_inherits_previous_member() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        decision(r#"{"member": "analista"}"#),
        decision(r#"{"member": "vendedor", "follow_up": true}"#),
    ]));
    let teams = h.teams();
    route(&teams, "t1", "ventas del mes pasado").await;
    let second = route(&teams, "t1", "¿y comparado con el año anterior?").await;
    assert_eq!(second.member, "analista");

    let classifier_input = h.classifier.requests().await[1].last_user_text().unwrap();
    assert!(classifier_input.starts_with("Previous member: analista"));
    assert!(classifier_input.contains(&format!("Assistant: {}", SALES_ANSWER)));
}

#[tokio::test]
async fn misroute_apologizes_and_switches_member() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        decision(r#"{"member": "vendedor"}"#),
        decision(r#"{"member": "vendedor", "misrouted": true}"#),
    ]));
    let teams = h.teams();
    route(&teams, "t1", "¿cómo vamos este mes?").await;
    let second = route(&teams, "t1", "no te pregunté eso, quiero el resultado del mes").await;

    assert_eq!(second.member, "analista");
    assert_eq!(second.message, format!("{}{}", APOLOGY, SALES_ANSWER));
    assert!(second.message.starts_with("Disculpa la confusión. "));
}

#[tokio::test]
async fn classifier_failure_falls_back_to_keywords() {
    let h = Harness::new(ScriptedProvider::constant(ScriptStep::Error("overloaded".into())));
    let teams = h.teams();
    let outcome = route(&teams, "t1", "precio del SKU WUXACC0001").await;
    assert_eq!(outcome.member, "vendedor");
    assert_eq!(outcome.message, STOCK_ANSWER);
}

#[tokio::test]
async fn unknown_member_answer_falls_back_to_first_member() {
    let h = Harness::new(ScriptedProvider::constant(decision(r#"{"member": "gerente"}"#)));
    let outcome = route(&h.teams(), "t1", "hola").await;
    assert_eq!(outcome.member, "vendedor");
}

#[tokio::test]
async fn previous_member_survives_rebuild() {
    let store = Arc::new(InMemoryStore::new());
    let first = Harness::with_store(
        ScriptedProvider::sequence(vec![decision(r#"{"member": "analista"}"#)]),
        store.clone(),
    );
    route(&first.teams(), "t1", "ventas del mes pasado").await;

    let second = Harness::with_store(ScriptedProvider::constant(decision("no sé")), store);
    let outcome = route(&second.teams(), "t1", "¿y la semana pasada?").await;
    assert_eq!(outcome.member, "analista");
}

// ============================================================
// Streaming and registry
// ============================================================

#[tokio::test]
async fn streaming_forwards_member_chunks_with_team_final() {
    let h = Harness::new(ScriptedProvider::sequence(vec![
        decision(r#"{"member": "vendedor"}"#),
        decision(r#"{"member": "vendedor", "misrouted": true}"#),
    ]));
    let teams = h.teams();
    route(&teams, "t1", "stock del filtro").await;

    let (tx, mut rx) = mpsc::channel(64);
    let outcome = teams
        .route(
            "mesa",
            RunRequest::new("t1", "jperez", "te equivocaste, quiero las ventas"),
            Some(tx),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events.first(),
        Some(&AgentEvent::Chunk {
            content: APOLOGY.to_string()
        })
    );
    let finals: Vec<&AgentEvent> = events.iter().filter(|e| matches!(e, AgentEvent::Final { .. })).collect();
    assert_eq!(finals.len(), 1);
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Final {
            message: outcome.message.clone(),
            turn_seq: outcome.turn_seq
        })
    );
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, outcome.message);
}

#[tokio::test]
async fn registry_lists_and_rejects_unknown_teams() {
    let h = Harness::new(ScriptedProvider::constant(decision(r#"{"member": "vendedor"}"#)));
    let teams = h.teams();
    let listed = teams.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].members, vec!["vendedor", "analista"]);

    let err = teams
        .route("otra", RunRequest::new("t1", "u", "hola"), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut broken = team();
    broken.members[1].agent_id = "bodeguero".into();
    let err = TeamRegistry::build(&[broken], &h.factory, &h.agents).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}
