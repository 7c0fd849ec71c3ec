//! `claw-alert-router` binary entrypoint.
//!
//! - `check`: validate a configuration and print the routing tree
//! - `route`: show where a label set would be delivered
//! - `run`: route alerts read as JSON lines from stdin and print notifications

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use claw_alert_router::duration::format_duration;
use claw_alert_router::{
    Alert, ChannelNotifier, CompiledConfig, Config, Engine, LabelSet, LogNotifier, Route,
    RouteTree,
};

/// Alertmanager-style alert router.
#[derive(Parser, Debug)]
#[command(name = "claw-alert-router")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON routing configuration.
    #[arg(short, long, global = true, env = "CLAW_ALERT_ROUTER_CONFIG", default_value = "alert-router.json")]
    config: PathBuf,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Human-readable text.
    Text,
    /// JSON for scripting.
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print the routing tree.
    Check,

    /// Show the routes and receivers a label set resolves to.
    Route {
        /// Alert label as name=value; repeat for more labels.
        #[arg(short, long = "label", value_parser = parse_label, required = true)]
        labels: Vec<(String, String)>,
    },

    /// Read alerts as JSON lines on stdin, print notifications as JSON lines on stdout.
    Run {
        /// Also log notifications through tracing.
        #[arg(long)]
        log_notifications: bool,
    },
}

fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    if name.is_empty() {
        return Err("label name cannot be empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("claw_alert_router=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Check => {
            let compiled = config.compile()?;
            let mut stdout = io::stdout().lock();
            check(&mut stdout, &compiled, cli.format)?;
        }
        Commands::Route { labels } => {
            let compiled = config.compile()?;
            let labels: LabelSet = labels.into_iter().collect();
            let mut stdout = io::stdout().lock();
            route(&mut stdout, &compiled, &labels, cli.format)?;
        }
        Commands::Run { log_notifications } => {
            serve(&config, log_notifications).await?;
        }
    }

    Ok(())
}

fn check(out: &mut impl Write, compiled: &CompiledConfig, format: Format) -> Result<()> {
    let tree = &compiled.tree;
    match format {
        Format::Json => {
            let routes: Vec<_> = tree.iter().map(route_json).collect();
            let summary = json!({
                "valid": true,
                "routes": routes,
                "receivers": tree.receivers(),
                "inhibit_rules": compiled.inhibitor.rules().len(),
                "global": compiled.global,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        }
        Format::Text => {
            writeln!(out, "Configuration OK")?;
            writeln!(out)?;
            print_tree(out, tree)?;
            writeln!(out)?;
            writeln!(out, "Receivers: {}", tree.receivers().into_iter().collect::<Vec<_>>().join(", "))?;
            writeln!(out, "Inhibit rules: {}", compiled.inhibitor.rules().len())?;
        }
    }
    Ok(())
}

fn print_tree(out: &mut impl Write, tree: &RouteTree) -> Result<()> {
    for route in tree.iter() {
        let indent = "  ".repeat(route.depth());
        let matchers = if route.matchers().is_empty() {
            "*".to_string()
        } else {
            route.matchers().to_string()
        };
        let cont = if route.continue_matching() { " (continue)" } else { "" };
        writeln!(
            out,
            "{indent}- {matchers} -> {receiver}{cont}  group_by={group_by} wait={wait} interval={interval} repeat={repeat}",
            receiver = route.receiver(),
            group_by = route.opts().group_by,
            wait = format_duration(route.opts().group_wait),
            interval = format_duration(route.opts().group_interval),
            repeat = format_duration(route.opts().repeat_interval),
        )?;
    }
    Ok(())
}

fn route_json(route: &Route) -> serde_json::Value {
    let opts = route.opts();
    json!({
        "path": route.path(),
        "receiver": route.receiver(),
        "matchers": route.matchers(),
        "continue": route.continue_matching(),
        "group_by": opts.group_by.to_string(),
        "group_wait": format_duration(opts.group_wait),
        "group_interval": format_duration(opts.group_interval),
        "repeat_interval": format_duration(opts.repeat_interval),
    })
}

fn route(out: &mut impl Write, compiled: &CompiledConfig, labels: &LabelSet, format: Format) -> Result<()> {
    let tree = &compiled.tree;
    let full_path = tree.resolve(labels);
    let delivery = tree.resolve_with(labels, compiled.global.delivery);

    match format {
        Format::Json => {
            let result = json!({
                "labels": labels,
                "matched": full_path.iter().copied().map(route_json).collect::<Vec<_>>(),
                "delivery": delivery.iter().copied().map(route_json).collect::<Vec<_>>(),
                "receivers": delivery.iter().map(|r| r.receiver()).collect::<Vec<_>>(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
        }
        Format::Text => {
            writeln!(out, "Labels: {labels}")?;
            writeln!(out, "Matched routes:")?;
            for r in &full_path {
                writeln!(out, "  {} -> {}", r.path(), r.receiver())?;
            }
            writeln!(out, "Delivered to ({:?}):", compiled.global.delivery)?;
            for r in &delivery {
                let opts = r.opts();
                writeln!(
                    out,
                    "  {}  group_by={} wait={} interval={} repeat={}",
                    r.receiver(),
                    opts.group_by,
                    format_duration(opts.group_wait),
                    format_duration(opts.group_interval),
                    format_duration(opts.repeat_interval),
                )?;
            }
        }
    }
    Ok(())
}

async fn serve(config: &Config, log_notifications: bool) -> Result<()> {
    let engine = Engine::new(config)?;
    let (notifier, mut notifications) = ChannelNotifier::new("stdout");
    engine.add_notifier(Box::new(notifier));
    if log_notifications {
        engine.add_notifier(Box::new(LogNotifier::default()));
    }

    let printer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(notification) = notifications.recv().await {
            match serde_json::to_string(&notification) {
                Ok(line) => {
                    if writeln!(stdout, "{line}").and_then(|()| stdout.flush()).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode notification"),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = engine.clone();
    let loop_handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Alert>(&line) {
                    Ok(alert) => match engine.ingest(alert) {
                        Ok(outcome) => info!(
                            fingerprint = %outcome.fingerprint,
                            receivers = ?outcome.receivers,
                            "Alert routed"
                        ),
                        Err(e) => warn!(error = %e, "Alert rejected"),
                    },
                    Err(e) => warn!(error = %e, "Skipping malformed alert line"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Drain what is pending before exiting.
    engine.flush_all(Utc::now());
    let _ = shutdown_tx.send(true);
    loop_handle.await.context("run loop panicked")?;
    drop(engine);
    printer.await.context("printer task panicked")?;
    Ok(())
}
