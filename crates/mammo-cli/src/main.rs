//! mammo - chat with a memory-backed assistant

mod commands;
mod config;
mod health;
mod ui;
mod utils;

use clap::Parser;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mammo_ai::providers::openai::OpenAICompatProvider;
use mammo_ai::CompletionOptions;
use mammo_chat::{
    AgentBackend, ApiKeySession, CircuitBreaker, ConversationState, DirectBackend,
    HttpMemoryGateway, MemoryGateway, SessionAuth, StreamOrchestrator, TurnOptions,
};

/// mammo - chat with a memory-backed assistant
#[derive(Parser, Debug)]
#[command(name = "mammo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Probe the LLM and memory endpoints and exit
    #[arg(long)]
    health: bool,

    /// List memory scopes and exit
    #[arg(long)]
    scopes: bool,

    /// Restrict memory search to a scope (repeatable)
    #[arg(long = "scope")]
    scope: Vec<String>,

    /// Skip the memory agent and stream replies directly
    #[arg(long)]
    no_agent: bool,
}

/// Cancellation for the turn in flight; Ctrl-C with no turn running exits
type ActiveTurn = Arc<Mutex<Option<CancellationToken>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so piped replies stay clean
    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("mammo=debug,mammo_chat=debug,mammo_ai=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let client = cfg.http.build_client()?;

    let gateway: Option<Arc<dyn MemoryGateway>> = match cfg.memory.api_key {
        Some(ref key) => Some(Arc::new(HttpMemoryGateway::new(
            client.clone(),
            key.clone(),
            cfg.memory.base_url.clone(),
        )?)),
        None => None,
    };

    if args.scopes {
        return list_scopes(gateway.as_deref()).await;
    }

    if let Err(e) = cfg.llm.ensure_valid() {
        eprintln!("Error: {}", e);
        eprintln!("Set your API key with: export DEEPSEEK_API_KEY=your-key");
        eprintln!("Or add it to config file: mammo --init-config");
        std::process::exit(1);
    }
    let api_key = cfg.llm.api_key.clone().unwrap_or_default();

    if args.health {
        let provider = OpenAICompatProvider::new(client.clone(), &api_key, cfg.llm.model())?;
        return run_health(&provider, gateway.as_deref()).await;
    }

    let auth = Arc::new(ApiKeySession::new(cfg.memory.api_key.clone()));
    if !auth.is_authenticated() {
        eprintln!("Error: a memory service key is required to chat");
        eprintln!("Set it with: export HEYSOL_API_KEY=your-key");
        std::process::exit(1);
    }

    let orchestrator =
        build_orchestrator(&cfg, &args, client, &api_key, gateway.clone(), auth)?;

    let mut conversation =
        ConversationState::with_limits(cfg.chat.max_messages, cfg.chat.max_execution_steps);
    conversation.set_memory_scope_ids(args.scope.clone());

    let active: ActiveTurn = Arc::new(Mutex::new(None));
    spawn_interrupt_handler(active.clone());

    // Non-interactive mode
    if let Some(command) = args.command {
        run_turn(&orchestrator, &mut conversation, &command, &active).await?;
        return Ok(());
    }

    run_interactive(&orchestrator, &mut conversation, gateway, &active).await
}

fn build_orchestrator(
    cfg: &config::Config,
    args: &Args,
    client: reqwest::Client,
    api_key: &str,
    gateway: Option<Arc<dyn MemoryGateway>>,
    auth: Arc<ApiKeySession>,
) -> anyhow::Result<StreamOrchestrator> {
    let system_prompt = cfg.llm.resolve_system_prompt()?;
    let breaker = Arc::new(CircuitBreaker::new(&cfg.breaker));

    let direct = DirectBackend::connect(
        client.clone(),
        api_key,
        cfg.llm.model(),
        breaker,
        system_prompt.replace("{tools}", "(memory tools are unavailable for this reply)\n"),
    )?
    .with_options(CompletionOptions {
        temperature: Some(cfg.llm.temperature),
        max_tokens: cfg.llm.max_tokens,
    })
    .with_timeout(cfg.turn_timeout());

    let mut orchestrator =
        StreamOrchestrator::new(Arc::new(direct), auth, cfg.orchestrator_config());

    if let Some(gateway) = gateway.filter(|_| cfg.agent_available() && !args.no_agent) {
        let agent = AgentBackend::connect(
            client,
            api_key,
            cfg.llm.model(),
            cfg.agent_config(system_prompt),
        )?
        .with_memory(gateway);
        orchestrator = orchestrator.with_agent(Arc::new(agent));
    }
    tracing::debug!(agent = orchestrator.has_agent(), "orchestrator ready");

    Ok(orchestrator)
}

fn spawn_interrupt_handler(active: ActiveTurn) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match active.lock().take() {
                Some(token) => token.cancel(),
                None => std::process::exit(130),
            }
        }
    });
}

/// Stream one turn to the terminal. Ctrl-C drops the stream, which leaves the
/// conversation marked failed.
async fn run_turn(
    orchestrator: &StreamOrchestrator,
    conversation: &mut ConversationState,
    input: &str,
    active: &ActiveTurn,
) -> anyhow::Result<()> {
    let mut stream = match orchestrator.stream_turn(conversation, input, TurnOptions::default()) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            return Ok(());
        }
    };

    let cancel = CancellationToken::new();
    *active.lock() = Some(cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                println!();
                eprintln!("[cancelled]");
                break;
            }
            item = stream.next() => match item {
                Some(Ok(event)) => ui::print_event(&event)?,
                Some(Err(e)) => {
                    // Already rendered from the ERROR event
                    tracing::debug!(kind = ?e.kind(), "turn failed: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    active.lock().take();
    Ok(())
}

async fn run_interactive(
    orchestrator: &StreamOrchestrator,
    conversation: &mut ConversationState,
    gateway: Option<Arc<dyn MemoryGateway>>,
    active: &ActiveTurn,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        let mode = if orchestrator.has_agent() {
            "memory agent"
        } else {
            "direct"
        };
        eprintln!("mammo ({}) session: {}", mode, utils::short_id(conversation.id()));
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, conversation) {
            match result {
                commands::CommandResult::Clear => {
                    conversation.clear();
                    ui::print_event(&mammo_chat::ChatStreamEvent::System {
                        message: "Started a new conversation".into(),
                    })?;
                }
                commands::CommandResult::ListScopes => match gateway {
                    Some(ref gateway) => print_scopes(gateway.as_ref()).await,
                    None => println!("No memory service configured."),
                },
                commands::CommandResult::SetScopes(ids) => {
                    if ids.is_empty() {
                        println!("Searching all scopes.");
                    } else {
                        println!("Searching scopes: {}", ids.join(", "));
                    }
                    conversation.set_memory_scope_ids(ids);
                }
                commands::CommandResult::Message(msg) => println!("{}", msg),
                commands::CommandResult::Exit => break,
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        run_turn(orchestrator, conversation, input, active).await?;
        println!();
    }

    Ok(())
}

async fn print_scopes(gateway: &dyn MemoryGateway) {
    match gateway.list_scopes().await {
        Ok(scopes) if scopes.is_empty() => println!("No memory scopes found."),
        Ok(scopes) => {
            for scope in scopes {
                let description = scope
                    .description
                    .as_deref()
                    .map(|d| format!("  {}", utils::truncate_chars(d, 60)))
                    .unwrap_or_default();
                println!("  {}  {}{}", scope.id, scope.name, description);
            }
        }
        Err(e) => eprintln!("Error: {}", e.user_message()),
    }
}

async fn list_scopes(gateway: Option<&dyn MemoryGateway>) -> anyhow::Result<()> {
    let Some(gateway) = gateway else {
        eprintln!("Error: no memory service key; set HEYSOL_API_KEY");
        std::process::exit(1);
    };
    print_scopes(gateway).await;
    Ok(())
}

async fn run_health(
    provider: &OpenAICompatProvider,
    gateway: Option<&dyn MemoryGateway>,
) -> anyhow::Result<()> {
    let mut results = vec![health::probe_llm(provider).await];
    match gateway {
        Some(gateway) => results.push(health::probe_memory(gateway).await),
        None => println!("memory   skip  no HEYSOL_API_KEY"),
    }

    for result in &results {
        println!("{}", result.line());
    }
    if results.iter().any(|r| !r.is_ok()) {
        std::process::exit(1);
    }
    Ok(())
}
