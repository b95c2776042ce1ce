//! Govern - command line front end for the governance engine
//!
//! Every lifecycle subcommand is routed through the tool registry with the
//! governance gate installed as its hooks, the same path an agent host uses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use govern_core::constants::tools::{GOVERN_ANCHOR, GOVERN_DELEGATE, GOVERN_PLAN, GOVERN_TASK};
use govern_core::graph::detect_graph_breaks;
use govern_core::{
    constants, paths, register_govern_tools, GateDecision, GovernConfig, GovernanceGate,
    PersistenceContext, ToolCall, ToolContext, ToolRegistry,
};

/// Govern - keep autonomous agents on a governed task graph
#[derive(Parser)]
#[command(name = "govern")]
#[command(about = "Dependency-aware task governance for coding agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.govern/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session id the command acts for
    #[arg(short, long, global = true, default_value = "cli")]
    session: String,

    /// Agent identity to run as
    #[arg(short, long, global = true)]
    agent: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Work plan commands
    Plan {
        #[command(subcommand)]
        action: PlanCommands,
    },

    /// Task commands
    Task {
        #[command(subcommand)]
        action: TaskCommands,
    },

    /// Delegation commands
    Delegate {
        #[command(subcommand)]
        action: DelegateCommands,
    },

    /// Session anchors
    Anchor {
        #[command(subcommand)]
        action: AnchorCommands,
    },

    /// Ask the gate whether a tool call would be allowed
    Check {
        tool: String,
        /// Call arguments as JSON
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Report chain breaks in active plans
    Breaks,

    /// Print the lifecycle tool definitions as JSON
    Tools,

    /// Write every store to disk now
    Flush {
        /// Leave degraded mode before flushing
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Create and activate a plan
    Create {
        name: String,
        #[arg(long)]
        acceptance: Vec<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Add a task to the active plan (or --plan)
    AddTask {
        name: String,
        #[arg(long)]
        expected_output: String,
        #[arg(long)]
        depends_on: Vec<String>,
        #[arg(long)]
        plan_ahead: bool,
        #[arg(long = "allowed-tool")]
        allowed_tools: Vec<String>,
        /// Temporal gate prerequisite
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        gate_reason: Option<String>,
        #[arg(long)]
        plan: Option<String>,
    },
    Status {
        target_id: Option<String>,
    },
    Archive {
        target_id: String,
    },
    Abandon {
        target_id: String,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create (and start) a task in one step
    QuickStart {
        name: String,
        #[arg(long)]
        expected_output: Option<String>,
    },
    Start {
        target_id: String,
    },
    Complete {
        #[arg(long)]
        evidence: String,
        #[arg(long)]
        target_id: Option<String>,
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long = "test")]
        tests: Vec<String>,
    },
    Fail {
        target_id: String,
        #[arg(long)]
        reason: String,
    },
    Review {
        target_id: Option<String>,
    },
    Status,
}

#[derive(Subcommand)]
enum DelegateCommands {
    Create {
        assigned_to: String,
        description: String,
        #[arg(long)]
        task_id: Option<String>,
    },
    Complete {
        target_id: String,
        result: String,
        #[arg(long)]
        status: Option<String>,
    },
    List {
        #[arg(long)]
        pending: bool,
    },
}

#[derive(Subcommand)]
enum AnchorCommands {
    Add {
        content: String,
        #[arg(long)]
        priority: Option<String>,
    },
    List,
}

/// Tool name and parameters for a lifecycle subcommand
fn tool_call(command: Commands) -> Option<(&'static str, Value)> {
    let call = match command {
        Commands::Plan { action } => match action {
            PlanCommands::Create {
                name,
                acceptance,
                category,
            } => (
                GOVERN_PLAN,
                json!({"action": "create", "name": name, "acceptance": acceptance, "category": category}),
            ),
            PlanCommands::AddTask {
                name,
                expected_output,
                depends_on,
                plan_ahead,
                allowed_tools,
                after,
                gate_reason,
                plan,
            } => (
                GOVERN_PLAN,
                json!({
                    "action": "add_task",
                    "name": name,
                    "expected_output": expected_output,
                    "depends_on": depends_on,
                    "plan_ahead": plan_ahead,
                    "allowed_tools": allowed_tools,
                    "after": after,
                    "gate_reason": gate_reason,
                    "target_id": plan,
                }),
            ),
            PlanCommands::Status { target_id } => {
                (GOVERN_PLAN, json!({"action": "status", "target_id": target_id}))
            }
            PlanCommands::Archive { target_id } => {
                (GOVERN_PLAN, json!({"action": "archive", "target_id": target_id}))
            }
            PlanCommands::Abandon { target_id } => {
                (GOVERN_PLAN, json!({"action": "abandon", "target_id": target_id}))
            }
        },
        Commands::Task { action } => match action {
            TaskCommands::QuickStart {
                name,
                expected_output,
            } => (
                GOVERN_TASK,
                json!({"action": "quick_start", "name": name, "expected_output": expected_output}),
            ),
            TaskCommands::Start { target_id } => {
                (GOVERN_TASK, json!({"action": "start", "target_id": target_id}))
            }
            TaskCommands::Complete {
                evidence,
                target_id,
                files,
                tests,
            } => (
                GOVERN_TASK,
                json!({
                    "action": "complete",
                    "evidence": evidence,
                    "target_id": target_id,
                    "files": files,
                    "tests": tests,
                }),
            ),
            TaskCommands::Fail { target_id, reason } => (
                GOVERN_TASK,
                json!({"action": "fail", "target_id": target_id, "reason": reason}),
            ),
            TaskCommands::Review { target_id } => {
                (GOVERN_TASK, json!({"action": "review", "target_id": target_id}))
            }
            TaskCommands::Status => (GOVERN_TASK, json!({"action": "status"})),
        },
        Commands::Delegate { action } => match action {
            DelegateCommands::Create {
                assigned_to,
                description,
                task_id,
            } => (
                GOVERN_DELEGATE,
                json!({
                    "action": "create",
                    "assigned_to": assigned_to,
                    "description": description,
                    "task_id": task_id,
                }),
            ),
            DelegateCommands::Complete {
                target_id,
                result,
                status,
            } => (
                GOVERN_DELEGATE,
                json!({"action": "complete", "target_id": target_id, "result": result, "status": status}),
            ),
            DelegateCommands::List { pending } => (
                GOVERN_DELEGATE,
                json!({"action": "list", "pending_only": pending}),
            ),
        },
        Commands::Anchor { action } => match action {
            AnchorCommands::Add { content, priority } => (
                GOVERN_ANCHOR,
                json!({"action": "add", "content": content, "priority": priority}),
            ),
            AnchorCommands::List => (GOVERN_ANCHOR, json!({"action": "list"})),
        },
        _ => return None,
    };
    Some(call)
}

fn init_logging() {
    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();

    // Logs never go to stdout, which carries command results
    let Ok(log_file) = std::fs::File::create(log_dir.join("govern.log")) else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
}

/// Run one subcommand, returning whether it succeeded
async fn run(cli: Cli, config: &GovernConfig, ctx: Arc<PersistenceContext>) -> Result<bool> {
    let gate = Arc::new(GovernanceGate::from_config(ctx.clone(), config)?);

    let mut registry = ToolRegistry::new();
    registry.add_pre_hook(gate.clone());
    registry.add_post_hook(gate.clone());
    register_govern_tools(&registry, ctx.clone()).await;

    match cli.command {
        Commands::Check { tool, args } => {
            let args: Value = serde_json::from_str(&args).context("--args must be JSON")?;
            let mut call = ToolCall::new(tool, &cli.session, args);
            call.agent = cli.agent.clone();
            match gate.before(&call) {
                GateDecision::Allow => {
                    println!("allowed");
                    Ok(true)
                }
                GateDecision::Deny(message) => {
                    println!("{}", message);
                    Ok(false)
                }
            }
        }
        Commands::Breaks => {
            let breaks = ctx.with_graph(|g| {
                detect_graph_breaks(g, constants::graph::STALE_ACTIVE_TASK, Utc::now())
            });
            if breaks.is_empty() {
                println!("No chain breaks");
            }
            for b in &breaks {
                println!("{}", b);
            }
            Ok(breaks.is_empty())
        }
        Commands::Tools => {
            let defs = registry.definitions().await;
            println!("{}", serde_json::to_string_pretty(&defs)?);
            Ok(true)
        }
        Commands::Flush { reset } => {
            if reset {
                ctx.reset_degraded();
            }
            ctx.flush_now();
            if ctx.is_degraded() {
                println!("Store is degraded; writes are suspended (see govern.log)");
                return Ok(false);
            }
            println!("Flushed {} store", ctx.backend_name());
            Ok(true)
        }
        command => {
            let Some((tool, params)) = tool_call(command) else {
                return Ok(false);
            };
            let mut tool_ctx = ToolContext::new(&cli.session);
            tool_ctx.agent = cli.agent.clone();
            let result = registry
                .execute(tool, params, &tool_ctx)
                .await
                .with_context(|| format!("tool {} is not registered", tool))?;
            println!("{}", result.output);
            Ok(!result.is_error)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(paths::config_file);
    let config = GovernConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let ctx = Arc::new(PersistenceContext::open(&config)?);
    tracing::info!(backend = ctx.backend_name(), "Govern started");

    let outcome = run(cli, &config, ctx.clone()).await;

    // Debounced writes may still be pending
    ctx.flush_now();

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}
