use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use foreman::agent::{AgentRunner, CommandAgent};
use foreman::config::Config;
use foreman::core::loader::load_graph;
use foreman::git::GitOps;
use foreman::orchestration::{
    ContextBuilder, MergeCoordinator, PresubmitCommand, PromptLibrary, Scheduler, TaskExecutor,
};
use foreman::workflow::StateStore;
use foreman::{flog, flog_error, Result};

/// Foreman - parallel AI development workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    FOREMAN_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
struct Cli {
    /// Number of parallel implementation agents
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Command to evaluate correctness inside workspaces and merge clones
    #[arg(long = "presubmit-cmd", default_value = "./do presubmit")]
    presubmit_cmd: String,

    /// Project root (defaults to the current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Enable debug logging (writes to ~/.foreman/foreman.log)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    foreman::log::init_with_debug(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("foreman: {e}");
            flog_error!("run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize()?;
    flog!("foreman starting in {}", root.display());

    let config = Config::load(&root)?;
    let presubmit = PresubmitCommand::parse(&cli.presubmit_cmd)?;

    let agent = CommandAgent::from_config(&config);
    if !agent.is_available() {
        println!(
            "[!] Warning: agent binary '{}' not found on PATH; invocations will fail.",
            agent.binary()
        );
    }
    let agent: Arc<dyn AgentRunner> = Arc::new(agent);

    let graph = load_graph(&config.tasks_path(&root));
    println!("Loaded {} tasks across all phases.", graph.len());

    let store = StateStore::new(config.state_path(&root));
    let state = store.load();

    let executor = TaskExecutor::new(
        GitOps::new(&root)?,
        Arc::clone(&agent),
        PromptLibrary::new(config.prompts_path(&root)),
        ContextBuilder::new(&config, &root),
        presubmit.clone(),
        config.mainline.clone(),
        config.max_retries,
    );
    let merger = MergeCoordinator::new(
        GitOps::new(&root)?,
        agent,
        PromptLibrary::new(config.prompts_path(&root)),
        ContextBuilder::new(&config, &root),
        presubmit,
        config.mainline.clone(),
        config.max_retries,
    );

    let mut scheduler = Scheduler::new(graph, store, state, executor, merger, cli.jobs);
    scheduler.run().await
}
