//! Stackform CLI entrypoint.
//!
//! This is the main entrypoint for the stackform command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stackform::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stackform::config::{find_config_file, ConfigParser, ConfigValidator, StackConfig};
use stackform::deployer::{open_provider, open_state_store, Deployer};
use stackform::error::{ConfigError, Result};
use stackform::graph::DependencyGraph;
use stackform::planner::Plan;
use stackform::state::{StateSnapshot, StateStore, STATE_DIR};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            let ids = e.resource_ids();
            if !ids.is_empty() && !formatter.is_json() {
                eprintln!("  Resources involved: {}", ids.join(", "));
            }
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
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Graph => cmd_graph(cli.config.as_ref(), &formatter),
        Commands::Plan { detailed, simulate } => {
            cmd_plan(cli.config.as_ref(), detailed, simulate, &formatter).await
        }
        Commands::Apply {
            yes,
            concurrency,
            simulate,
        } => cmd_apply(cli.config.as_ref(), yes, concurrency, simulate, &formatter).await,
        Commands::Destroy { yes, simulate } => {
            cmd_destroy(cli.config.as_ref(), yes, simulate, &formatter).await
        }
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let config_path = path.join("stackform.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/stackform.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(STATE_DIR) {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Stackform")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(STATE_DIR) {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set the provider endpoint and token");
    eprintln!("  2. Edit stackform.yaml with your resources");
    eprintln!("  3. Run 'stackform validate' to check the stack file");
    eprintln!("  4. Run 'stackform plan' to see what will change");
    eprintln!("  5. Run 'stackform apply' to apply it");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_config(config_path)?;
    info!("Validating stack file: {}", config_file.display());

    let result = ConfigValidator::new().check(&config);
    println_out(&formatter.format_validation(&result, show_warnings));

    if let Some(first) = result.errors.first() {
        return Err(ConfigError::validation(first.message.clone(), first.field.clone()).into());
    }

    // Declaration and ordering problems are part of validation too.
    let graph = DependencyGraph::build(config.declare()?)?;

    if !formatter.is_json() {
        eprintln!("\nStack summary:");
        eprintln!("  Stack: {}", config.stack_id());
        if let Some(account) = &config.stack.account {
            eprintln!("  Account: {account}");
        }
        if let Some(region) = &config.stack.region {
            eprintln!("  Region: {region}");
        }
        eprintln!("  Resources: {}", graph.len());
        eprintln!("  Dependencies: {}", graph.edge_count());
    }

    Ok(())
}

/// Print the dependency order.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_, config) = load_validated_config(config_path)?;
    let graph = DependencyGraph::build(config.declare()?)?;

    println_out(&formatter.format_graph(&config.stack_id(), &graph));
    Ok(())
}

/// Show the change plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_validated_config(config_path)?;
    let state_store = open_state_store(&config, config_dir(&config_file)).await?;
    let prior = load_prior(&config, &state_store).await?;
    let provider = open_provider(&config, &prior, simulate)?;

    let deployer = Deployer::new(&config, &state_store, provider).simulated(simulate);
    let plan = deployer.plan().await?;

    println_out(&formatter.format_plan(&plan, detailed));
    Ok(())
}

/// Plan and apply.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    concurrency: Option<usize>,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_validated_config(config_path)?;
    let state_store = open_state_store(&config, config_dir(&config_file)).await?;
    let prior = load_prior(&config, &state_store).await?;
    let provider = open_provider(&config, &prior, simulate)?;

    let mut deployer = Deployer::new(&config, &state_store, provider).simulated(simulate);
    if let Some(concurrency) = concurrency {
        deployer = deployer.with_concurrency(concurrency);
    }

    let plan = deployer.plan().await?;
    if plan.is_empty() {
        println_out(&formatter.format_plan(&plan, false));
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan, false));
    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    run_plan(deployer, &plan, formatter).await
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_validated_config(config_path)?;
    let state_store = open_state_store(&config, config_dir(&config_file)).await?;
    let prior = load_prior(&config, &state_store).await?;
    let provider = open_provider(&config, &prior, simulate)?;

    let deployer = Deployer::new(&config, &state_store, provider).simulated(simulate);
    let plan = deployer.plan_destroy().await?;

    if plan.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for entry in &plan.entries {
        eprintln!(
            "  - {} ({})",
            entry.resource,
            entry.provider_id.as_deref().unwrap_or("?")
        );
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    run_plan(deployer, &plan, formatter).await
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_validated_config(config_path)?;
    let state_store = open_state_store(&config, config_dir(&config_file)).await?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                println_out(&formatter.format_state(&state));
            } else {
                eprintln!("{}", formatter.warning("No state found."));
            }
            if let Some(lock) = state_store.get_lock_info().await? {
                eprintln!("{}", formatter.format_lock(&lock));
            }
        }
        StateCommands::Lock { holder } => {
            let lock = state_store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            println_out(&formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                state_store.force_unlock().await?;
                eprintln!("{}", formatter.success("State forcefully unlocked."));
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("{}", formatter.warning("Please provide --lock-id or use --force"));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Applies a plan, cancelling on Ctrl-C.
async fn run_plan<S: StateStore>(
    deployer: Deployer<'_, S>,
    plan: &Plan,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight changes to finish");
            let _ = cancel_tx.send(true);
        }
    });

    let result = deployer.with_cancellation(cancel_rx).apply_plan(plan).await;
    signal.abort();

    let result = result?;
    println_out(&formatter.format_result(&result));
    Ok(())
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory holding the stack file.
fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads `.env` and the stack file with environment overrides.
fn load_config(config_path: Option<&PathBuf>) -> Result<(PathBuf, StackConfig)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading stack file from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config_file, config))
}

/// Loads the stack file and fails on validation errors.
fn load_validated_config(config_path: Option<&PathBuf>) -> Result<(PathBuf, StackConfig)> {
    let (config_file, config) = load_config(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        debug!("Validation warning: {warning}");
    }
    Ok((config_file, config))
}

/// Loads recorded state for seeding the simulated provider.
async fn load_prior<S: StateStore + ?Sized>(config: &StackConfig, store: &S) -> Result<StateSnapshot> {
    Ok(store
        .load()
        .await?
        .unwrap_or_else(|| StateSnapshot::new(&config.stack_id())))
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn println_out(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{text}");
}
