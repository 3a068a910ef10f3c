//! tagsync CLI entrypoint.
//!
//! This is the main entrypoint for the tagsync command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use tagsync::cli::{Cli, Commands, LogFormat, OutputFormatter};
use tagsync::client::{
    HttpTagClient, LocalTagStore, RemoteTagClient, S3BucketTagClient, DEFAULT_STORE_DIR,
    DEFAULT_TIMEOUT_SECS,
};
use tagsync::config::{
    find_config_file, BackendKind, ConfigParser, ConfigValidator, TagSyncConfig,
};
use tagsync::context::ReconciliationContext;
use tagsync::error::{ConfigError, Result, TagSyncError};
use tagsync::planner::{PlanExecutor, TagPlan};
use tagsync::reconciler::Reconciler;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
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

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan { resource, detailed } => {
            cmd_plan(cli.config.as_ref(), resource.as_deref(), detailed, &formatter).await
        }
        Commands::Apply {
            yes,
            continue_on_error,
            resource,
            timeout_secs,
        } => {
            let options = ApplyOptions {
                auto_approve: yes,
                continue_on_error,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            cmd_apply(cli.config.as_ref(), resource.as_deref(), &options, &formatter).await
        }
        Commands::Show {
            identifier,
            service,
        } => cmd_show(cli.config.as_ref(), &identifier, service, &formatter).await,
    }
}

/// Flags of the apply command.
struct ApplyOptions {
    auto_approve: bool,
    continue_on_error: bool,
    timeout: Option<Duration>,
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_config(config_path)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));

    if !result.is_valid() {
        return Err(ConfigError::validation_general(format!(
            "{} error(s) found",
            result.error_count()
        ))
        .into());
    }

    eprintln!("\nConfiguration summary:");
    eprintln!("  Backend: {}", config.backend.kind);
    eprintln!("  Resources: {}", config.resources.len());
    eprintln!("  Default tags: {}", config.default_tags.len());
    eprintln!("  Extra reserved rules: {}", config.system_tags.len());

    Ok(())
}

/// Show the tag plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    resource: Option<&str>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_validated_config(config_path)?;
    let client = create_client(&config, &base_dir).await?;
    let policy = config.build_policy();

    let selected = config.select_resources(resource)?;
    let plan = TagPlan::build(&config, client.as_ref(), &policy, &selected).await?;

    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(())
}

/// Apply the tag plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    resource: Option<&str>,
    options: &ApplyOptions,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_validated_config(config_path)?;
    let client = create_client(&config, &base_dir).await?;
    let policy = config.build_policy();

    let selected = config.select_resources(resource)?;
    let plan = TagPlan::build(&config, client.as_ref(), &policy, &selected).await?;

    if plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    // Show plan
    eprintln!("{}", formatter.format_plan(&plan, true));

    // Confirm
    if !options.auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let mut executor = PlanExecutor::new(client.as_ref(), &policy)
        .with_ignore_config(config.ignore_tags.clone())
        .with_continue_on_error(options.continue_on_error);
    if let Some(timeout) = options.timeout {
        executor = executor.with_timeout(timeout);
    }

    let result = executor.execute(&plan).await;
    println!("{}", formatter.format_execution(&result));

    if result.success {
        Ok(())
    } else {
        Err(TagSyncError::internal(format!(
            "{} resource(s) failed to converge",
            result.failed
        )))
    }
}

/// Show the tags stored on one resource.
async fn cmd_show(
    config_path: Option<&PathBuf>,
    identifier: &str,
    service: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_validated_config(config_path)?;
    let client = create_client(&config, &base_dir).await?;
    let policy = config.build_policy();

    let service = service
        .or_else(|| config.find_resource(identifier).map(|r| r.service.clone()))
        .or_else(|| service_from_arn(identifier).map(String::from))
        .unwrap_or_default();
    debug!("Showing tags of {identifier} as service '{service}'");

    let reconciler = Reconciler::new(client.as_ref(), &policy, service)
        .with_ignore_config(config.ignore_tags.clone());
    let tags = reconciler
        .list_tags(&ReconciliationContext::new(), identifier)
        .await?;

    println!("{}", formatter.format_tags(identifier, &tags));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` and the configuration, returning it with its directory.
fn load_config(config_path: Option<&PathBuf>) -> Result<(TagSyncConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config, base_dir))
}

/// Loads and validates the configuration.
fn load_validated_config(config_path: Option<&PathBuf>) -> Result<(TagSyncConfig, PathBuf)> {
    let (config, base_dir) = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    Ok((config, base_dir))
}

/// Creates the configured tagging backend.
async fn create_client(
    config: &TagSyncConfig,
    base_dir: &Path,
) -> Result<Box<dyn RemoteTagClient>> {
    let backend = &config.backend;

    let client: Box<dyn RemoteTagClient> = match backend.kind {
        BackendKind::Local => {
            let store = backend.path.as_ref().map_or_else(
                || LocalTagStore::with_base_dir(base_dir.join(DEFAULT_STORE_DIR)),
                |path| LocalTagStore::with_path(base_dir.join(path)),
            );
            info!("Using local tag store: {}", store.path().display());
            Box::new(store)
        }
        BackendKind::Http => {
            let endpoint = backend
                .endpoint
                .as_deref()
                .ok_or_else(|| ConfigError::validation("Endpoint is required", "backend.endpoint"))?;
            let token = ConfigParser::get_api_token().ok();
            if token.is_none() {
                debug!("No API token set, sending unauthenticated requests");
            }
            info!("Using HTTP tagging API: {endpoint}");
            Box::new(HttpTagClient::with_timeout(
                endpoint,
                token,
                backend.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            )?)
        }
        BackendKind::S3 => {
            info!("Using S3 bucket tagging");
            Box::new(S3BucketTagClient::new(backend.region.as_deref()).await)
        }
    };

    debug!("Backend ready: {}", client.backend_type());
    Ok(client)
}

/// Extracts the service segment of an ARN (`arn:partition:service:...`).
fn service_from_arn(identifier: &str) -> Option<&str> {
    let mut parts = identifier.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("arn"), Some(_), Some(service)) if !service.is_empty() => Some(service),
        _ => None,
    }
}
