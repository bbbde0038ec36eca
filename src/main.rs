mod builtin;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parley_core::{ChatOrchestrator, Config, ExchangeOptions};
use parley_llm::ChatProvider;
use parley_mcp::McpManager;
use parley_tools::{ToolRegistry, ToolSource};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const DEFAULT_CONFIG_PATH: &str = "config/parley.toml";
const LOCAL_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat with a model that can call local tools and MCP servers.
#[derive(Debug, Parser)]
#[command(name = "parley", version)]
struct Cli {
    /// Config file. Falls back to `PARLEY_CONFIG`, then `config/parley.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to use instead of `chat.model`.
    #[arg(long)]
    model: Option<String>,

    /// System message for the conversation.
    #[arg(long)]
    system: Option<String>,

    /// Local tool to offer with every request. Repeatable.
    #[arg(long = "tool", value_name = "NAME")]
    tools: Vec<String>,

    /// Keep tool calls and tool results in the conversation history.
    #[arg(long)]
    keep_tool_messages: bool,

    /// Send one message, print the answer, and exit.
    #[arg(long, value_name = "TEXT")]
    message: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Clear,
    System(&'a str),
    Tools,
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/clear" => Input::Clear,
        "/tools" => Input::Tools,
        _ => match line.strip_prefix("/system") {
            Some(rest) if rest.is_empty() || rest.starts_with(' ') => Input::System(rest.trim()),
            _ => Input::Message(line),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;
    for note in config.suggestions() {
        tracing::warn!("{note}");
    }

    let registry = Arc::new(ToolRegistry::new().with_local_timeout(LOCAL_TOOL_TIMEOUT));
    let local = registry.register(ToolSource::Local(builtin::tools()));
    tracing::debug!(tools = ?local, "registered local tools");

    let manager = McpManager::new(config.mcp_entries())?;
    let mcp_tools = manager.connect_all().await;
    if !config.mcp.servers.is_empty() {
        tracing::info!(
            servers = config.mcp.servers.len(),
            tools = mcp_tools.len(),
            "MCP tools available"
        );
    }
    manager.register_all(&registry);

    let provider = config.chat_client()?;
    let orchestrator = ChatOrchestrator::from_config(provider, &config, Arc::clone(&registry));
    if let Some(system) = &cli.system {
        orchestrator.store().set_system_message(system.as_str());
    }

    let options = ExchangeOptions {
        model: cli.model,
        stop: None,
        tools: cli.tools,
        clear_tool_messages: !cli.keep_tool_messages,
    };

    let result = match cli.message {
        Some(text) => one_shot(&orchestrator, &text, &options).await,
        None => repl(&orchestrator, &options).await,
    };
    manager.shutdown_all();
    result
}

async fn one_shot<P: ChatProvider>(
    orchestrator: &ChatOrchestrator<P>,
    text: &str,
    options: &ExchangeOptions,
) -> anyhow::Result<()> {
    let result = orchestrator.exchange(text, options).await?;
    println!("{}", result.message.content);
    Ok(())
}

async fn repl<P: ChatProvider>(
    orchestrator: &ChatOrchestrator<P>,
    options: &ExchangeOptions,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Clear => {
                orchestrator.store().clear();
                println!("history cleared");
            }
            Input::System("") => {
                orchestrator.store().clear_system_message();
                println!("system message removed");
            }
            Input::System(text) => {
                orchestrator.store().set_system_message(text);
                println!("system message set");
            }
            Input::Tools => print_tools(orchestrator.registry(), options),
            Input::Message(text) => {
                let exchange = orchestrator.exchange(text, options);
                tokio::select! {
                    result = exchange => match result {
                        Ok(result) => {
                            tracing::debug!(
                                rounds = result.tool_rounds,
                                total_tokens = result.usage.total_tokens,
                                "exchange complete"
                            );
                            println!("{}", result.message.content);
                        }
                        Err(e) => {
                            tracing::error!(kind = ?e.kind(), "exchange failed: {e:#}");
                            eprintln!("error: {e}");
                        }
                    },
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("exchange interrupted");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_tools(registry: &ToolRegistry, options: &ExchangeOptions) {
    for name in registry.local_names() {
        let marker = if options.tools.contains(&name) { "*" } else { " " };
        println!("{marker} {name} (local)");
    }
    for descriptor in registry.descriptors_for(&[]) {
        println!("* {} (remote)", descriptor.name);
    }
}

fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_owned();
    }
    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
