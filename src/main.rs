//! Terraplane CLI entrypoint.
//!
//! This is the main entrypoint for the terraplane command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use terraplane::cli::{Cli, Commands, OutputFormatter, StateCommands};
use terraplane::config::{ConfigParser, ConfigValidator, StackConfig, StateBackend, find_config_file};
use terraplane::error::{ExecError, Result, TerraplaneError};
use terraplane::graph::DependencyGraph;
use terraplane::planner::ExecutionReport;
use terraplane::provider::{MemoryProvider, Provider};
use terraplane::reconciler::Reconciler;
use terraplane::registry::ResourceRegistry;
use terraplane::state::{LocalStateStore, STATE_DIR, StateStore, generate_holder_id};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

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
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings),
        Commands::Graph => cmd_graph(cli.config.as_ref()),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(cli.config.as_ref(), yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::Drift => cmd_drift(cli.config.as_ref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new stack configuration.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let config_path = path.join("terraplane.stack.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let config_template = include_str!("../templates/terraplane.stack.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    let ignore_line = format!("{STATE_DIR}/\n");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(STATE_DIR) {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            write!(file, "\n# Terraplane\n{ignore_line}")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, &ignore_line)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Edit terraplane.stack.yaml to declare your resources");
    eprintln!("  2. Run 'terraplane validate' to check the configuration");
    eprintln!("  3. Run 'terraplane plan' to see what would change");
    eprintln!("  4. Run 'terraplane apply' to converge");

    Ok(())
}

/// Validate the stack configuration.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    info!("Validated configuration: {}", config_file.display());

    eprintln!("Configuration is valid!");

    let validator = ConfigValidator::new();
    let result = validator.validate(&config)?;
    if show_warnings && !result.warnings.is_empty() {
        eprintln!("\nWarnings:");
        for warning in &result.warnings {
            eprintln!("  - {warning}");
        }
    }

    eprintln!("\nConfiguration summary:");
    eprintln!("  Project: {}", config.project.name);
    eprintln!("  Environment: {}", config.project.environment);
    eprintln!("  Resources: {}", config.resources.len());
    eprintln!("  Parallelism: {}", config.settings.parallelism);

    Ok(())
}

/// Show the dependency graph in execution order.
fn cmd_graph(config_path: Option<&PathBuf>) -> Result<()> {
    let (config, _) = load_config(config_path)?;

    let registry = ResourceRegistry::from_config(&config)?;
    let graph = DependencyGraph::build(&registry)?;

    eprintln!("Execution order:");
    for (i, id) in graph.topo_order().iter().enumerate() {
        let deps = graph.dependencies_of(id);
        if deps.is_empty() {
            eprintln!("  {}. {id}", i + 1);
        } else {
            let list: Vec<String> = deps.iter().map(ToString::to_string).collect();
            eprintln!("  {}. {id} (after {})", i + 1, list.join(", "));
        }
    }

    Ok(())
}

/// Compute and display the execution plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider();

    let reconciler = Reconciler::new(&config, &state_store, provider);
    let changes = reconciler.plan().await?;

    let output = formatter.format_plan(&changes.plan, &changes.diff, detailed);
    eprintln!("{output}");

    Ok(())
}

/// Apply the execution plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider();

    let reconciler = Reconciler::new(&config, &state_store, provider);

    // Show the plan first
    let changes = reconciler.plan().await?;
    if changes.plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    let output = formatter.format_plan(&changes.plan, &changes.diff, false);
    eprintln!("{output}");

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let cancel = spawn_ctrl_c_handler();
    let outcome = reconciler.apply(&cancel).await?;

    let output = formatter.format_report(&outcome.report);
    eprintln!("{output}");

    report_to_result(&outcome.report)
}

/// Destroy all recorded resources.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider();

    let Some(state) = state_store.load().await? else {
        eprintln!("No state found, nothing to destroy.");
        return Ok(());
    };

    if state.records.is_empty() {
        eprintln!("No recorded resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for address in state.addresses() {
        eprintln!("  - {address}");
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let cancel = spawn_ctrl_c_handler();
    let reconciler = Reconciler::new(&config, &state_store, provider);
    let outcome = reconciler.destroy(&cancel).await?;

    let output = formatter.format_report(&outcome.report);
    eprintln!("{output}");

    report_to_result(&outcome.report)
}

/// Check recorded resources against provider reality.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = create_state_store(&config, &config_file);
    let provider = create_provider();

    let reconciler = Reconciler::new(&config, &state_store, provider);
    let report = reconciler.check_drift().await?;

    let output = formatter.format_drift(&report);
    eprintln!("{output}");

    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    let state_store = create_state_store(&config, &config_file);

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                let output = formatter.format_state(&state);
                eprintln!("{output}");
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = state_store.acquire_lock(&holder).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves, parses, and validates the stack configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<(StackConfig, PathBuf)> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;

    let validator = ConfigValidator::new();
    validator.validate(&config)?;

    Ok((config, config_file))
}

/// Creates the state store configured for this stack.
fn create_state_store(config: &StackConfig, config_file: &std::path::Path) -> Box<dyn StateStore> {
    match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || {
                    config_file
                        .parent()
                        .unwrap_or_else(|| std::path::Path::new("."))
                        .join(STATE_DIR)
                },
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
    }
}

/// Creates the resource provider.
fn create_provider() -> Arc<dyn Provider> {
    Arc::new(MemoryProvider::new())
}

/// Asks for confirmation on stderr and checks the reply.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Cancels the returned token on the first ctrl-c. In-flight actions drain
/// before the run stops.
fn spawn_ctrl_c_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight actions");
            token.cancel();
        }
    });
    cancel
}

/// Maps a finished report onto the process exit status.
fn report_to_result(report: &ExecutionReport) -> Result<()> {
    // A failed run reports as failed even when cancellation also fired
    if report.failed > 0 {
        return Err(TerraplaneError::Exec(ExecError::ActionsFailed {
            failed: report.failed,
            total: report.outcomes.len(),
        }));
    }
    if report.cancelled {
        return Err(TerraplaneError::Exec(ExecError::Cancelled {
            completed: report.applied,
            total: report.outcomes.len(),
        }));
    }
    Ok(())
}
