//! mcpt CLI: connect to an MCP server, call one method, print the reply.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mcpt_config::{CliOverrides, McptConfig};
use mcpt_engine::{ConnectionRegistry, JsonRpcMessage, ReadinessPolicy, TransportSpec};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;

#[derive(Parser)]
#[command(name = "mcpt", version, about = "Connect to MCP servers and exercise them")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Named server profile from config.toml
    #[arg(long, global = true, conflicts_with_all = ["spawn", "url"])]
    server: Option<String>,

    /// Spawn this command as a stdio MCP server
    #[arg(long = "command", id = "spawn", global = true, conflicts_with = "url")]
    spawn: Option<String>,

    /// Argument for --command (repeatable)
    #[arg(long = "arg", global = true, allow_hyphen_values = true, requires = "spawn")]
    spawn_args: Vec<String>,

    /// Environment variable for --command, as KEY=VALUE (repeatable)
    #[arg(long = "env", global = true, value_parser = parse_env_var, requires = "spawn")]
    spawn_env: Vec<(String, String)>,

    /// URL of an HTTP MCP server
    #[arg(long, global = true)]
    url: Option<String>,

    /// Header for --url, as 'Name: value' (repeatable)
    #[arg(long = "header", global = true, value_parser = parse_header, requires = "url")]
    headers: Vec<(String, String)>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Handshake timeout in milliseconds
    #[arg(long, global = true)]
    handshake_timeout_ms: Option<u64>,

    /// Treat any stdout output as readiness instead of the initialize reply
    #[arg(long, global = true)]
    first_output: bool,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Show server identity and capabilities
    Info,
    /// Check that the server answers
    Ping,
    /// List tools
    Tools,
    /// Call a tool
    CallTool {
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// List resources
    Resources,
    /// Read a resource
    Read { uri: String },
    /// List prompts
    Prompts,
    /// Send an arbitrary JSON-RPC request
    Raw {
        method: String,
        /// Request params as JSON
        #[arg(long)]
        params: Option<String>,
    },
    /// List server profiles from config.toml
    Servers,
}

/// What to send once connected.
///
/// `Call` prints only the `result` of the reply; `Raw` prints the whole
/// response, error object included.
#[derive(Debug, PartialEq)]
enum Request {
    ServerInfo,
    Ping,
    Call { method: String, params: Option<Value> },
    Raw { method: String, params: Option<Value> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; stdout is reserved for JSON output.
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = McptConfig::load(CliOverrides {
        call_timeout_ms: cli.timeout_ms,
        handshake_timeout_ms: cli.handshake_timeout_ms,
        readiness: cli.first_output.then_some(ReadinessPolicy::FirstOutput),
    })
    .context("Failed to load configuration")?;

    if cli.command == Command::Servers {
        return print_json(&serde_json::to_value(&config.servers)?);
    }

    let request = build_request(&cli.command)?;
    let spec = resolve_target(&cli, &config)?;

    let registry = ConnectionRegistry::new(config.engine.clone());
    let id = registry
        .connect(&spec)
        .await
        .with_context(|| format!("Failed to connect to {}", spec.target()))?;
    tracing::debug!(connection_id = %id, "connected");

    let outcome = send(&registry, &id, request).await;
    registry.shutdown().await;
    print_json(&outcome?)
}

/// Map a subcommand to the request it sends, validating JSON inputs up front.
fn build_request(command: &Command) -> Result<Request> {
    let call = |method: &str, params: Option<Value>| Request::Call {
        method: method.to_string(),
        params,
    };
    Ok(match command {
        Command::Info => Request::ServerInfo,
        Command::Ping => Request::Ping,
        Command::Tools => call("tools/list", None),
        Command::CallTool { name, args } => {
            let arguments = match args {
                Some(raw) => parse_json("--args", raw)?,
                None => json!({}),
            };
            call("tools/call", Some(json!({"name": name, "arguments": arguments})))
        }
        Command::Resources => call("resources/list", None),
        Command::Read { uri } => call("resources/read", Some(json!({"uri": uri}))),
        Command::Prompts => call("prompts/list", None),
        Command::Raw { method, params } => {
            let params = params
                .as_deref()
                .map(|raw| parse_json("--params", raw))
                .transpose()?;
            Request::Raw {
                method: method.clone(),
                params,
            }
        }
        Command::Servers => bail!("'servers' does not talk to a server"),
    })
}

/// Pick the server to talk to from --server, --command or --url.
fn resolve_target(cli: &Cli, config: &McptConfig) -> Result<TransportSpec> {
    if let Some(name) = &cli.server {
        return Ok(config.server(name)?.clone());
    }
    if let Some(command) = &cli.spawn {
        return Ok(TransportSpec::Process {
            command: command.clone(),
            args: cli.spawn_args.clone(),
            env: cli.spawn_env.iter().cloned().collect::<HashMap<_, _>>(),
        });
    }
    if let Some(url) = &cli.url {
        return Ok(TransportSpec::Http {
            url: url.clone(),
            headers: cli.headers.iter().cloned().collect::<HashMap<_, _>>(),
        });
    }
    bail!("No server given: pass --server <name>, --command <cmd> or --url <url>")
}

async fn send(registry: &ConnectionRegistry, id: &str, request: Request) -> Result<Value> {
    match request {
        Request::ServerInfo => result_of("initialize", registry.server_info(id).await?),
        Request::Ping => {
            let response = registry.call(id, "ping", None).await?;
            Ok(json!({"success": true, "response": response}))
        }
        Request::Call { method, params } => {
            let response = registry
                .call(id, &method, params)
                .await
                .with_context(|| format!("'{method}' failed"))?;
            result_of(&method, response)
        }
        Request::Raw { method, params } => {
            let response = registry
                .call(id, &method, params)
                .await
                .with_context(|| format!("'{method}' failed"))?;
            Ok(serde_json::to_value(response)?)
        }
    }
}

/// The `result` of a reply; a JSON-RPC error object fails the command.
fn result_of(method: &str, response: JsonRpcMessage) -> Result<Value> {
    response
        .into_result()
        .with_context(|| format!("'{method}' returned an error"))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn parse_env_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected 'Name: value', got '{raw}'")),
    }
}
