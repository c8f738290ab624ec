//! agentigraph: run a tool-using agent loop from the terminal
//!
//! Usage:
//!   agentigraph run "summarize src/"            → one run, approvals asked on stdin
//!   agentigraph run "deploy" --thread ops       → resumable run, suspends on approval
//!   agentigraph resume ops --approve            → answer the pending approval and continue
//!   agentigraph checkpoints ops                 → list checkpoints of a thread
//!   agentigraph config                          → print the effective config

mod config;

use agentigraph_agent::{
    generate_text_with_graph, AgentEvent, AgentGraph, Checkpointer, FileCheckpointer, GenerateOptions,
    RunOutcome,
};
use agentigraph_core::Message;
use agentigraph_llm::{AnthropicProvider, LlmProvider, MockBehavior, MockProvider};
use agentigraph_tools::{
    approval_fn, builtin_tools, ApprovalDecision, ApprovalGate, ApprovalRequest, ToolRegistry,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{AppConfig, CONFIG_FILE};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentigraph",
    about = "Graph-based agent runtime with tool approval and checkpoints",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace directory (or set AGENTIGRAPH_WORKSPACE)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Path to the config file (default: <workspace>/agentigraph.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the scripted offline backend instead of Anthropic
    #[arg(long, global = true, default_value_t = false)]
    mock: bool,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a prompt
    Run {
        prompt: String,
        /// Thread id; makes the run resumable and checkpointed
        #[arg(short, long)]
        thread: Option<String>,
        /// Model override
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        max_steps: Option<usize>,
        /// Approve every tool call without asking
        #[arg(long, default_value_t = false)]
        approve_all: bool,
    },
    /// Answer the pending approval of a thread and continue
    Resume {
        thread: String,
        #[arg(long, default_value_t = false, conflicts_with = "reject")]
        approve: bool,
        #[arg(long, default_value_t = false)]
        reject: bool,
    },
    /// List, delete or clear checkpoints of a thread
    Checkpoints {
        thread: String,
        #[arg(long)]
        delete: Option<String>,
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
    /// Print the effective config as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref(), cli.json_logs)?;

    let workspace = cli
        .workspace
        .clone()
        .or_else(|| std::env::var("AGENTIGRAPH_WORKSPACE").ok().map(PathBuf::from))
        .map(Ok)
        .unwrap_or_else(std::env::current_dir)
        .context("resolving workspace")?;
    let config_path = cli.config.clone().unwrap_or_else(|| workspace.join(CONFIG_FILE));
    let app = AppConfig::load(&config_path);

    match cli.command {
        Commands::Run { prompt, thread, model, max_steps, approve_all } => {
            let mut agent = app.agent_config();
            if let Some(model) = model {
                agent.model = model;
            }
            if let Some(max_steps) = max_steps {
                agent.max_steps = max_steps;
            }
            let provider = provider(cli.mock, &prompt)?;
            let gate = approval_gate(&app, approve_all, thread.is_some());
            let (graph, printer) = build_graph(&app, agent, &workspace, provider, gate)?;

            let options = GenerateOptions { thread_id: thread.clone(), ..Default::default() };
            let result = generate_text_with_graph(&graph, vec![Message::user(prompt)], options).await;
            drop(graph);
            let _ = printer.await;
            let result = result?;

            println!();
            match (&result.suspended, &thread) {
                (Some(checkpoint), Some(thread)) => {
                    let tool = checkpoint.pending_approval.as_ref().map(|p| p.tool_name.as_str()).unwrap_or("?");
                    eprintln!("Waiting for approval of '{}'. Continue with:", tool);
                    eprintln!("  agentigraph resume {} --approve   (or --reject)", thread);
                }
                _ => info!(
                    steps = result.state.step_count,
                    tokens = result.usage.total(),
                    finish = ?result.finish_reason,
                    "run finished"
                ),
            }
        }

        Commands::Resume { thread, approve, reject } => {
            if approve == reject {
                anyhow::bail!("pass exactly one of --approve or --reject");
            }
            let provider = provider(cli.mock, "resume")?;
            let gate = approval_gate(&app, false, true);
            let (graph, printer) = build_graph(&app, app.agent_config(), &workspace, provider, gate)?;
            let outcome = graph.resume(&thread, approve).await;
            drop(graph);
            let _ = printer.await;

            println!();
            match outcome.with_context(|| format!("resuming thread {}", thread))? {
                RunOutcome::Suspended { checkpoint, .. } => {
                    let tool = checkpoint.pending_approval.as_ref().map(|p| p.tool_name.as_str()).unwrap_or("?");
                    eprintln!("Waiting for approval of '{}' again.", tool);
                }
                RunOutcome::Completed { state, .. } => {
                    info!(thread = %thread, steps = state.step_count, "resumed run finished");
                }
            }
        }

        Commands::Checkpoints { thread, delete, clear } => {
            let checkpointer = FileCheckpointer::new(app.checkpoint_dir(&workspace));
            if clear {
                let n = checkpointer.clear(&thread).await?;
                println!("Removed {} checkpoint(s) of {}", n, thread);
            } else if let Some(id) = delete {
                let removed = checkpointer.delete(&id).await?;
                println!("{}", if removed { "Deleted" } else { "Not found" });
            } else {
                let list = checkpointer.list(&thread).await?;
                if list.is_empty() {
                    println!("No checkpoints for {}", thread);
                }
                for meta in list {
                    println!(
                        "{}  {}  step {:>3}  {:?}",
                        meta.id,
                        meta.created_at.format("%Y-%m-%d %H:%M:%S"),
                        meta.step_count,
                        meta.status
                    );
                }
            }
        }

        Commands::Config => {
            print!("{}", app.to_toml());
        }
    }

    Ok(())
}

fn init_tracing(
    log_file: Option<&Path>,
    json: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agentigraph=info".into());

    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("--log-file needs a file name")?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn provider(mock: bool, prompt: &str) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if mock {
        let reply = format!("(mock) received: {}", prompt);
        return Ok(Arc::new(MockProvider::constant(MockBehavior::Text(reply))));
    }
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY not set (or use --mock)"))?;
    Ok(Arc::new(AnthropicProvider::new(api_key)))
}

/// Resumable runs defer to `agentigraph resume`; inline runs ask on stdin.
fn approval_gate(app: &AppConfig, approve_all: bool, resumable: bool) -> ApprovalGate {
    let mut gate = ApprovalGate::new();
    for pattern in &app.tools.auto_approve {
        gate = gate.auto_approve(pattern.clone());
    }
    let handler = if approve_all {
        approval_fn(|_| async { Ok(ApprovalDecision::Approved) })
    } else if resumable {
        approval_fn(|_| async { Ok(ApprovalDecision::Defer) })
    } else {
        approval_fn(|req: ApprovalRequest| async move {
            let answer = tokio::task::spawn_blocking(move || ask(&req))
                .await
                .map_err(|e| agentigraph_core::Error::Internal(e.to_string()))?;
            Ok(answer)
        })
    };
    gate.with_handler(handler)
}

fn ask(req: &ApprovalRequest) -> ApprovalDecision {
    eprint!("\nAllow {} [{}] with {}? [y/N] ", req.tool_name, req.source, req.args);
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return ApprovalDecision::denied("could not read answer");
    }
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approved,
        _ => ApprovalDecision::denied("declined at the prompt"),
    }
}

fn build_graph(
    app: &AppConfig,
    agent: agentigraph_agent::AgentConfig,
    workspace: &Path,
    provider: Arc<dyn LlmProvider>,
    gate: ApprovalGate,
) -> anyhow::Result<(AgentGraph, tokio::task::JoinHandle<()>)> {
    let mut registry = ToolRegistry::with_options(app.tools.registry_options());
    registry
        .register_all(builtin_tools(app.tools_root(workspace), &app.tools.builtins))
        .context("registering builtin tools")?;

    let checkpointer: Arc<dyn Checkpointer> = Arc::new(FileCheckpointer::new(app.checkpoint_dir(workspace)));
    let (tx, rx) = mpsc::channel(1024);
    let printer = tokio::spawn(print_events(rx));

    let graph = AgentGraph::new(provider, registry.to_tool_map(), agent)
        .with_approval_gate(gate)
        .with_checkpointer(checkpointer)
        .with_events(tx);
    Ok((graph, printer))
}

async fn print_events(mut rx: mpsc::Receiver<AgentEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Text(text) => {
                print!("{}", text);
                let _ = stdout.flush();
            }
            AgentEvent::Thinking(_) | AgentEvent::Checkpointed { .. } | AgentEvent::Done { .. } => {}
            AgentEvent::ToolExecuting { name, .. } => eprintln!("\n[tool] {}", name),
            AgentEvent::ToolResult { name, result, is_error, .. } => {
                let preview: String = result.chars().take(200).collect();
                let mark = if is_error { "error" } else { "ok" };
                eprintln!("[{}] {}: {}", mark, name, preview);
            }
            AgentEvent::ApprovalRequested { name, .. } => eprintln!("[approval] {} needs approval", name),
            AgentEvent::Compacted { dropped_skills, dropped_messages, tokens_after } => eprintln!(
                "[compact] dropped {} message(s), skills {:?}, now ~{} tokens",
                dropped_messages, dropped_skills, tokens_after
            ),
            AgentEvent::Error(e) => eprintln!("[error] {}", e),
        }
    }
}
