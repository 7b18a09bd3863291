// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! toolhost main entry point.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use futures_util::future::join_all;
use serde_json::Value;

use toolhost::config::{self, HostConfig};
use toolhost::mcp::{HttpTarget, ServerConfig, ToolConnectionManager, Transport};
use toolhost::telemetry::{init_telemetry, TelemetryConfig};

/// toolhost version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// toolhost - talk to MCP tool servers.
#[derive(Parser)]
#[command(name = "toolhost")]
#[command(author, version, about = "Host-side manager for MCP tool servers", long_about = None)]
struct Cli {
    /// Config file (defaults to the workspace or ~/.toolhost/config.json)
    #[arg(short, long, env = "TOOLHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print call and connect metrics on exit
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,

    /// Connect every enabled server and list their tools
    Tools {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Call a tool and print its content
    Call {
        /// Server id
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default().with_level(tracing::Level::WARN)
    };
    let _guard = init_telemetry(&telemetry)?;

    let result = run(&cli).await;

    if cli.metrics {
        print_metrics();
    }

    result
}

#[cfg(feature = "telemetry")]
fn print_metrics() {
    let report = toolhost::telemetry::GLOBAL_METRICS.snapshot().format_report();
    eprint!("{}", report.dimmed());
}

#[cfg(not(feature = "telemetry"))]
fn print_metrics() {
    eprintln!("{}", "metrics need the telemetry feature".dimmed());
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Version => {
            println!("toolhost {}", VERSION);
            Ok(())
        }
        Commands::Servers => {
            let config = load(cli)?;
            print_servers(&config);
            Ok(())
        }
        Commands::Tools { format } => {
            let config = load(cli)?;
            list_tools(&config, *format).await
        }
        Commands::Call { server, tool, args } => {
            let config = load(cli)?;
            call_tool(&config, server, tool, args).await
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<HostConfig> {
    let config = match &cli.config {
        Some(path) => config::load_config_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => config::load_config(&std::env::current_dir()?)?,
    };
    Ok(config)
}

fn describe_target(server: &ServerConfig) -> String {
    match &server.transport {
        Transport::Stdio { command, args, .. } if args.is_empty() => command.clone(),
        Transport::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
        Transport::Http {
            target: HttpTarget::Url(url),
        } => url.clone(),
        Transport::Http {
            target: HttpTarget::Port(port),
        } => format!("127.0.0.1:{}", port),
    }
}

fn print_servers(config: &HostConfig) {
    if config.servers.is_empty() {
        println!("{}", "No servers configured".dimmed());
        return;
    }
    for server in &config.servers {
        let status = if server.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!(
            "{} [{}] {} - {}",
            server.id.bright_white().bold(),
            server.transport_kind(),
            status,
            describe_target(server)
        );
    }
}

async fn list_tools(config: &HostConfig, format: OutputFormat) -> anyhow::Result<()> {
    let manager = ToolConnectionManager::new();
    let servers: Vec<ServerConfig> = config.enabled_servers().cloned().collect();

    let outcomes = join_all(servers.iter().map(|server| manager.connect(server.clone()))).await;
    for (server, outcome) in servers.iter().zip(outcomes) {
        if let Err(e) = outcome {
            eprintln!("{} {}: {}", "✗".red(), server.id, e);
        }
    }

    let tools = manager.get_all_tools().await;
    match format {
        OutputFormat::Json => {
            let listing: Vec<Value> = tools
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "server": entry.server_id,
                        "name": entry.tool.name,
                        "description": entry.tool.description,
                        "inputSchema": entry.tool.input_schema,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Text => {
            for entry in &tools {
                println!(
                    "{}/{} - {}",
                    entry.server_id.bright_cyan(),
                    entry.tool.name.bright_white(),
                    entry.tool.description.as_deref().unwrap_or("")
                );
            }
            if tools.is_empty() {
                println!("{}", "No tools available".dimmed());
            }
        }
    }

    manager.disconnect_all().await;
    Ok(())
}

async fn call_tool(config: &HostConfig, server: &str, tool: &str, args: &str) -> anyhow::Result<()> {
    let Some(server_config) = config.server(server) else {
        bail!("unknown server: {}", server);
    };
    let arguments: Value =
        serde_json::from_str(args).with_context(|| format!("--args is not valid JSON: {}", args))?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let manager = ToolConnectionManager::new();
    manager.connect(server_config.clone()).await?;
    let result = manager.call_tool(server, tool, arguments).await;
    manager.disconnect_all().await;

    let content = result?;
    print_content(&content)?;
    Ok(())
}

/// Text items print as-is; anything else as pretty JSON.
fn print_content(content: &Value) -> anyhow::Result<()> {
    let items = content.as_array().map(Vec::as_slice).unwrap_or_default();
    if !items.is_empty() && items.iter().all(|item| item["type"] == "text") {
        for item in items {
            println!("{}", item["text"].as_str().unwrap_or_default());
        }
    } else {
        println!("{}", serde_json::to_string_pretty(content)?);
    }
    Ok(())
}
