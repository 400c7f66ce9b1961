//! Convoy CLI entrypoint.
//!
//! This is the main entrypoint for the convoy command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use convoy_deploy::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use convoy_deploy::config::{find_config_file, ConfigParser, ConfigValidator, DeployConfig, StateBackend};
use convoy_deploy::error::Result;
use convoy_deploy::planner::{CancellationFlag, DependencyGraph};
use convoy_deploy::reconciler::{DriftReport, Reconciler};
use convoy_deploy::remote::{ControlPlane, HttpControlPlane};
use convoy_deploy::state::{open_store, StateStore, STATE_DIR};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DOCUMENT_TEMPLATE: &str = include_str!("../templates/convoy.deploy.yaml");
const ENV_TEMPLATE: &str = include_str!("../templates/.env.example");

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<u8> {
    let file = cli.file.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force, formatter),
        Commands::Validate { warnings } => cmd_validate(file, warnings, formatter),
        Commands::Plan => cmd_plan(file, formatter).await,
        Commands::Apply { yes } => cmd_apply(file, yes, formatter).await,
        Commands::Diff => cmd_diff(file, formatter).await,
        Commands::Reconcile { watch, interval } => cmd_reconcile(file, watch, interval, formatter).await,
        Commands::State { command } => cmd_state(file, command, formatter).await,
    }
}

/// Writes a command's result to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", output.trim_end())?;
    Ok(())
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<u8> {
    info!("Initializing new Convoy project in: {}", path.display());

    let document_path = path.join("convoy.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && document_path.exists() {
        eprintln!(
            "{}",
            formatter.warning(&format!("Document already exists: {}", document_path.display()))
        );
        eprintln!("Use --force to overwrite.");
        return Ok(1);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&document_path, DOCUMENT_TEMPLATE)?;
    eprintln!("Created: {}", document_path.display());

    std::fs::write(&env_path, ENV_TEMPLATE)?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has = |entry: &str| existing.lines().any(|line| line.trim() == entry);
        if !has(".env") || !has(&state_entry) {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# Convoy")?;
            if !has(".env") {
                writeln!(file, ".env")?;
            }
            if !has(&state_entry) {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\n{}", formatter.success("Project initialized"));
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set CONVOY_API_TOKEN");
    eprintln!("  2. Edit convoy.deploy.yaml with your resources");
    eprintln!("  3. Run 'convoy validate' to check the document");
    eprintln!("  4. Run 'convoy plan' to see what will change");
    eprintln!("  5. Run 'convoy apply' to deploy");

    Ok(0)
}

/// Validate the document. Exit 2 when anything is wrong with it.
fn cmd_validate(file: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<u8> {
    let (config, _) = load_document(file)?;
    info!("Validating project {}", config.project.name);

    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&config, &result, show_warnings))?;
    if !result.is_valid() {
        return Ok(2);
    }

    let specs = config.resource_specs()?;
    DependencyGraph::build(&specs)?.topological_order()?;
    Ok(0)
}

/// Show the operation plan.
async fn cmd_plan(file: Option<&Path>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, store) = load_config_and_state(file).await?;
    let reconciler = Reconciler::new(&config, store.as_ref(), create_control_plane(&config)?);

    let plan = reconciler.plan().await?;
    emit(&formatter.format_plan(&plan))?;
    Ok(0)
}

/// Plan, confirm and apply.
async fn cmd_apply(file: Option<&Path>, auto_approve: bool, formatter: &OutputFormatter) -> Result<u8> {
    let (config, store) = load_config_and_state(file).await?;
    let cancel = cancel_on_ctrl_c();
    let reconciler = Reconciler::new(&config, store.as_ref(), create_control_plane(&config)?)
        .with_cancellation(cancel);

    if !auto_approve {
        let plan = reconciler.plan().await?;
        if plan.is_noop() {
            emit(&formatter.format_plan(&plan))?;
            return Ok(0);
        }

        eprintln!("{}", formatter.format_plan(&plan));
        if !confirm("Do you want to apply this plan? [y/N]: ")? {
            eprintln!("Apply cancelled.");
            return Ok(0);
        }
    }

    let result = reconciler.apply().await?;
    emit(&formatter.format_reconciliation(&result))?;
    Ok(u8::from(!result.success))
}

/// Show drifted resources.
///
/// Always exits 0: drift is reported, and so is a failure to compute it.
async fn cmd_diff(file: Option<&Path>, formatter: &OutputFormatter) -> Result<u8> {
    match drift_report(file).await {
        Ok(report) => emit(&formatter.format_drift(&report))?,
        Err(e) => {
            warn!("Drift check failed: {e}");
            eprintln!("{}", formatter.error(&e.to_string()));
        }
    }
    Ok(0)
}

async fn drift_report(file: Option<&Path>) -> Result<DriftReport> {
    let (config, store) = load_config_and_state(file).await?;
    let reconciler = Reconciler::new(&config, store.as_ref(), create_control_plane(&config)?);
    reconciler.check_drift().await
}

/// Run one reconciliation pass, or keep running them.
async fn cmd_reconcile(
    file: Option<&Path>,
    watch: bool,
    interval: u64,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, store) = load_config_and_state(file).await?;
    let cancel = cancel_on_ctrl_c();
    let reconciler = Reconciler::new(&config, store.as_ref(), create_control_plane(&config)?)
        .with_cancellation(cancel);

    if watch {
        let passes = reconciler.watch(Duration::from_secs(interval.max(1))).await?;
        eprintln!("{}", formatter.success(&format!("Stopped after {passes} pass(es)")));
        return Ok(0);
    }

    let result = reconciler.reconcile().await?;
    emit(&formatter.format_reconciliation(&result))?;
    Ok(u8::from(!result.success))
}

/// State management commands.
async fn cmd_state(file: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<u8> {
    let (_config, store) = load_config_and_state(file).await?;

    match command {
        StateCommands::Show => {
            let lock = store.get_lock_info().await?;
            match store.load().await? {
                Some(state) => emit(&formatter.format_state(&state, lock.as_ref()))?,
                None => eprintln!("{}", formatter.warning("No state found.")),
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(lock) => {
                        warn!("Removed lock {} held by {}", lock.lock_id, lock.holder);
                        eprintln!("{}", formatter.success("State forcefully unlocked."));
                    }
                    None => eprintln!("{}", formatter.warning("State was not locked.")),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                if store.get_lock_info().await?.is_some_and(|lock| lock.lock_id != id) {
                    eprintln!("{}", formatter.warning("Lock is held under a different id; nothing released."));
                    return Ok(1);
                }
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("{}", formatter.error("Please provide --lock-id or use --force"));
                return Ok(1);
            }
        }
    }

    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Asks a yes/no question on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Returns a flag that is set on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationFlag {
    let cancel = CancellationFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight operations");
            flag.cancel();
        }
    });
    cancel
}

/// Resolves the document path.
fn resolve_document_path(file: Option<&Path>) -> Result<PathBuf> {
    file.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads `.env` and the document, with environment overrides applied.
fn load_document(file: Option<&Path>) -> Result<(DeployConfig, PathBuf)> {
    let document = resolve_document_path(file)?;
    let base = document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&base);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&document)?;
    Ok((config, base))
}

/// Loads and validates the document and opens its state store.
///
/// A relative local state path is resolved against the document's directory.
async fn load_config_and_state(file: Option<&Path>) -> Result<(DeployConfig, Box<dyn StateStore>)> {
    let (mut config, base) = load_document(file)?;
    ConfigValidator::new().validate(&config)?;

    if config.state.backend == StateBackend::Local {
        let path = config
            .state
            .path
            .as_deref()
            .map_or_else(|| base.join(STATE_DIR), |p| base.join(p));
        config.state.path = Some(path.display().to_string());
    }

    let store = open_store(&config).await?;
    debug!("Using {} state backend", store.backend_type());
    Ok((config, store))
}

/// Creates the HTTP control plane client for this document.
fn create_control_plane(config: &DeployConfig) -> Result<Arc<dyn ControlPlane>> {
    let token = ConfigParser::get_api_token();
    if token.is_none() {
        debug!("No API token set; requests are sent unauthenticated");
    }
    let client = HttpControlPlane::from_config(&config.control_plane, token)?;
    Ok(Arc::new(client))
}
