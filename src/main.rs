//! mostrador - multi-agent assistant runtime for the auto-parts counter
//!
//! Usage:
//!   mostrador serve --config mostrador.toml   → start the HTTP gateway
//!   mostrador agents                          → list configured agents and teams
//!   mostrador config                          → print the effective config, secrets redacted

use clap::{Parser, Subcommand};
use mostrador_agent::AgentFactory;
use mostrador_core::AppConfig;
use mostrador_gateway::{start_gateway, AppState, AuthService};
use mostrador_knowledge::Retriever;
use mostrador_llm::ProviderRegistry;
use mostrador_memory::StoreRegistry;
use mostrador_team::TeamRegistry;
use mostrador_tools::toolkits::build_registry;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "mostrador",
    about = "Multi-agent assistant runtime: tools, memory, routing teams and an HTTP gateway",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "mostrador.toml")]
    config: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List configured agents and teams
    Agents,
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?.with_env();

    match cli.command {
        Some(Commands::Agents) => print_agents(&config),
        Some(Commands::Config) => print!("{}", config.redacted().to_toml()),
        Some(Commands::Serve { port }) => {
            let _guard = init_tracing(cli.log_file.as_deref(), cli.log_json)?;
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
        None => {
            let _guard = init_tracing(cli.log_file.as_deref(), cli.log_json)?;
            serve(config).await?;
        }
    }
    Ok(())
}

fn init_tracing(log_file: Option<&Path>, json: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mostrador=info,tower_http=info".into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log-file needs a file name"))?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let state = build_state(&config).await?;
    start_gateway(state, &config.server).await
}

async fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let stores = StoreRegistry::from_config(&config.stores).await?;
    let providers = ProviderRegistry::from_config(&config.providers);
    let retriever = Retriever::from_config(&config.vector, config.providers.openai.api_key.as_deref());
    let tools = build_registry(config, retriever.clone())?;

    let factory = AgentFactory::new(providers, stores, tools, config.runtime.clone()).with_retriever(retriever);
    let agents = factory.build_all(&config.agents)?;
    let teams = TeamRegistry::build(&config.teams, &factory, &agents)?;
    let auth = AuthService::new(&config.auth, factory.stores().auth(&config.server.auth_store)?);

    info!(agents = agents.len(), teams = teams.len(), "runtime assembled");
    Ok(AppState::new(agents, teams, auth))
}

fn print_agents(config: &AppConfig) {
    println!("Agents:");
    for agent in &config.agents {
        println!("  {:<24} {:<28} {}", agent.agent_id, agent.model_ref, agent.name);
        if !agent.tool_refs.is_empty() {
            println!("  {:<24} tools: {}", "", agent.tool_refs.join(", "));
        }
    }
    println!("Teams:");
    for team in &config.teams {
        let members: Vec<&str> = team.members.iter().map(|m| m.agent_id.as_str()).collect();
        println!("  {:<24} {:<28} {}", team.team_id, team.model_ref, members.join(", "));
    }
}
