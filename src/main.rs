use std::path::Path;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tandem::audit::AuditSink;
use tandem::config::Config;
use tandem::core::outcome::{FinalOutcome, OverallStatus};
use tandem::core::plan::Plan;
use tandem::core::task::TaskStatus;
use tandem::orchestration::{self, classify, Coordinator, EffortLevel, EngineEvent, Request};
use tandem::registry::CapabilityRegistry;
use tandem::{tlog, Error, Result};

/// Tandem - parallel task coordination engine
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TANDEM_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.tandem/tandem.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a request to completion
    Run {
        /// Request TOML file, or an inline natural-language description
        request: String,

        /// Override the classified effort level
        #[arg(long)]
        effort: Option<EffortLevel>,

        /// Print the outcome as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Build and display the plan for a request without dispatching
    Plan {
        /// Request TOML file, or an inline natural-language description
        request: String,
    },

    /// List registered capabilities
    Capabilities,

    /// Check the local setup: config, worker command, registry
    Doctor,

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tandem::log::init_with_debug(cli.debug);

    let result = match cli.command {
        Command::Run {
            request,
            effort,
            json,
        } => run_request(&request, effort, json).await,
        Command::Plan { request } => run_plan(&request),
        Command::Capabilities => run_capabilities(),
        Command::Doctor => run_doctor(),
        Command::Config { init } => run_config(init),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    }
}

/// Load the effective config and the registry it points at.
fn load_setup() -> Result<(Config, CapabilityRegistry)> {
    let config = Config::load()?;
    let registry =
        CapabilityRegistry::load(&config.registry_path()?, config.effective_worker_command())?;
    Ok((config, registry))
}

/// A request argument is a TOML file when it points at one, otherwise an
/// inline description.
fn parse_request(arg: &str) -> Result<Request> {
    let path = Path::new(arg);
    if path.extension().is_some_and(|ext| ext == "toml") || path.is_file() {
        Request::load(path)
    } else {
        Ok(Request::from_description(arg))
    }
}

async fn run_request(arg: &str, effort: Option<EffortLevel>, json: bool) -> Result<i32> {
    let (config, registry) = load_setup()?;
    Config::ensure_dirs()?;

    let mut request = parse_request(arg)?;
    if effort.is_some() {
        request.effort = effort;
    }

    tlog!("Run command: request={:?}", arg);

    let audit = if config.audit_enabled {
        AuditSink::open(&config.audit_path()?)
    } else {
        AuditSink::disabled()
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let (event_tx, event_rx) = mpsc::channel(256);
    let printer = if json {
        None
    } else {
        Some(tokio::spawn(print_events(event_rx)))
    };

    let coordinator = Coordinator::new(registry, config)
        .with_audit(audit)
        .with_cancellation(cancel)
        .with_events(event_tx);

    let outcome = coordinator.run(&request).await;
    coordinator.close();
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match outcome {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            Ok(match outcome.status {
                OverallStatus::Succeeded => 0,
                OverallStatus::PartiallyFailed | OverallStatus::Failed => 1,
            })
        }
        Err(Error::Cancelled) => {
            eprintln!("\nRequest cancelled.");
            Ok(130)
        }
        Err(e) => Err(e),
    }
}

/// Print the progress stream until the coordinator drops its sender.
async fn print_events(mut rx: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::RequestStarted {
                request_id,
                effort,
                tasks,
            } => {
                println!(
                    "Request {} ({} effort, {} task{})",
                    request_id.short(),
                    effort,
                    tasks,
                    if tasks == 1 { "" } else { "s" }
                );
            }
            EngineEvent::TaskStarted {
                name, worker_id, ..
            } => {
                println!("  \x1b[33m▸\x1b[0m {} (worker {})", name, worker_id.short());
            }
            EngineEvent::TaskRetried { name, attempt, .. } => {
                println!("  \x1b[33m↻\x1b[0m {} (attempt {})", name, attempt);
            }
            EngineEvent::TaskFinished { name, status, .. } => match status {
                TaskStatus::Succeeded => println!("  \x1b[32m✓\x1b[0m {}", name),
                TaskStatus::Failed { error, .. } => {
                    println!("  \x1b[31m✗\x1b[0m {}: {}", name, error)
                }
                _ => {}
            },
            EngineEvent::TaskSkipped { name, reason, .. } => {
                println!("  \x1b[90m−\x1b[0m {} (skipped: {})", name, reason);
            }
            EngineEvent::BatchCompleted { settled, remaining } => {
                if remaining > 0 {
                    println!("  batch done: {} settled, {} remaining", settled, remaining);
                }
            }
            EngineEvent::ConflictDetected { conflict } => {
                println!(
                    "  \x1b[33m!\x1b[0m conflict on {}",
                    conflict.scopes.join(", ")
                );
            }
            EngineEvent::FollowUpsMerged { count } => {
                println!("  merged {} follow-up task(s)", count);
            }
            EngineEvent::ReviewRoundStarted { .. } => {
                println!("  starting self-review round");
            }
            EngineEvent::RequestCompleted { .. } => {}
        }
    }
}

fn print_outcome(outcome: &FinalOutcome) {
    println!();
    println!(
        "Status: {}  ({} succeeded, {} failed, {} skipped)",
        format_status(outcome.status),
        outcome.succeeded_count(),
        outcome.failed_count(),
        outcome.skipped_count()
    );

    let unresolved = outcome.unresolved_conflicts();
    if !unresolved.is_empty() {
        println!();
        println!("\x1b[33mUnresolved conflicts:\x1b[0m");
        for conflict in unresolved {
            println!(
                "  - tasks {} and {} both touched: {}",
                conflict.first.short(),
                conflict.second.short(),
                conflict.scopes.join(", ")
            );
        }
    }

    if !outcome.artifact.is_empty() {
        println!();
        println!("{}", outcome.artifact);
    }
}

fn format_status(status: OverallStatus) -> String {
    match status {
        OverallStatus::Succeeded => "\x1b[32msucceeded\x1b[0m".to_string(),
        OverallStatus::PartiallyFailed => "\x1b[33mpartially failed\x1b[0m".to_string(),
        OverallStatus::Failed => "\x1b[31mfailed\x1b[0m".to_string(),
    }
}

fn run_plan(arg: &str) -> Result<i32> {
    let (config, registry) = load_setup()?;
    let request = parse_request(arg)?;

    let level = classify(&request);
    let plan = orchestration::planner::build(&request, &registry, &config)?;

    println!("Effort: {}", level);
    print_plan(&plan);
    Ok(0)
}

fn print_plan(plan: &Plan) {
    for (index, phase) in plan.phases().iter().enumerate() {
        println!();
        println!("Phase {}: {}", index + 1, phase.name);
        for id in &phase.tasks {
            let Some(task) = plan.get_task(id) else {
                continue;
            };
            let deps: Vec<String> = plan
                .dependencies_of(id)
                .iter()
                .map(|dep| dep.name.clone())
                .collect();
            print!("  {} [{}]", task.name, task.capability);
            if !task.scope.is_empty() {
                print!("  scope: {}", task.scope.join(", "));
            }
            if !deps.is_empty() {
                print!("  after: {}", deps.join(", "));
            }
            println!();
        }
    }
}

fn run_capabilities() -> Result<i32> {
    let (_, registry) = load_setup()?;

    for name in registry.names() {
        let spec = registry.resolve(name)?;
        println!("  {:<16} {}", name, spec.description);
    }
    Ok(0)
}

fn run_doctor() -> Result<i32> {
    let mut healthy = true;

    match Config::tandem_dir() {
        Ok(dir) => println!("  \x1b[32m✓\x1b[0m home directory: {}", dir.display()),
        Err(e) => {
            println!("  \x1b[31m✗\x1b[0m home directory: {}", e);
            healthy = false;
        }
    }

    let config = match Config::load() {
        Ok(config) => {
            println!("  \x1b[32m✓\x1b[0m config loads");
            config
        }
        Err(e) => {
            println!("  \x1b[31m✗\x1b[0m config: {}", e);
            return Ok(1);
        }
    };

    let worker = config.effective_worker_command();
    match which::which(worker) {
        Ok(path) => println!(
            "  \x1b[32m✓\x1b[0m worker command '{}': {}",
            worker,
            path.display()
        ),
        Err(_) => {
            println!(
                "  \x1b[31m✗\x1b[0m worker command '{}' not found on PATH",
                worker
            );
            healthy = false;
        }
    }

    match CapabilityRegistry::load(&config.registry_path()?, worker) {
        Ok(registry) => println!(
            "  \x1b[32m✓\x1b[0m registry: {} capabilit{}",
            registry.len(),
            if registry.len() == 1 { "y" } else { "ies" }
        ),
        Err(e) => {
            println!("  \x1b[31m✗\x1b[0m registry: {}", e);
            healthy = false;
        }
    }

    Ok(if healthy { 0 } else { 1 })
}

fn run_config(init: bool) -> Result<i32> {
    if init {
        let path = Config::config_path()?;
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            Config::ensure_dirs()?;
            Config::default().save()?;
            println!("Wrote default config: {}", path.display());
        }
        return Ok(0);
    }

    let config = Config::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    println!("# config file: {}", Config::config_path()?.display());
    Ok(0)
}
