//! lxcm - LXC host network manager
//!
//! Serves the HTTP API that manages port forwarding (DNAT) into containers,
//! static DHCP assignments and a few settings, and offers the same operations
//! as one-shot CLI commands.
//!
//! # Usage
//!
//! ```bash
//! lxcm serve                                   # Bootstrap the NAT chain and serve the API
//! lxcm rules list                              # Show stored port mappings
//! lxcm rules add 8080 10.0.3.5 80              # Forward tcp/8080 to 10.0.3.5:80
//! lxcm rules add 2222 web 22 --container       # Target a container by name
//! lxcm rules remove 8080
//! lxcm rules apply                             # Rebuild the kernel chain from the store
//! lxcm dhcp set web 10.0.3.10
//! lxcm settings set /srv/backups
//! lxcm audit --count 50
//! lxcm config init                             # Write a default config file
//! ```

use clap::{Args, Parser, Subcommand};
use lxcm::audit::AuditLog;
use lxcm::config::{self, AppConfig};
use lxcm::core::applier::IptablesApplier;
use lxcm::core::container::ContainerResolver;
use lxcm::core::dhcp::DhcpLeases;
use lxcm::core::error::IptablesErrorPattern;
use lxcm::core::manager::RuleManager;
use lxcm::core::mapping::{InterfaceFilter, NewPortMapping, Protocol};
use lxcm::core::store::{BACKUP_PATH_KEY, DEFAULT_BACKUP_PATH, JsonRuleStore, SettingsStore};
use lxcm::core::sync::SyncReport;
use lxcm::http::{AppState, build_router};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lxcm", version)]
#[command(about = "Port forwarding and static DHCP for LXC containers", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/lxcm/config.json)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the NAT chain, sync stored rules and serve the HTTP API
    Serve,
    /// Manage port forwarding rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Manage static DHCP assignments
    #[command(subcommand)]
    Dhcp(DhcpCommand),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Write or show the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Show recent audit log entries
    Audit {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// List stored rules
    List,
    /// Add a rule and apply it
    Add(AddRuleArgs),
    /// Remove the rule for an external port
    Remove { port: u16 },
    /// Recreate the chain and jump if needed, then rebuild it from the store
    Apply,
}

#[derive(Args)]
struct AddRuleArgs {
    external_port: u16,
    /// Target IPv4 address, or a container name with --container
    target: String,
    internal_port: u16,
    /// Resolve TARGET as a container name
    #[arg(long)]
    container: bool,
    #[arg(short, long, default_value = "tcp")]
    protocol: Protocol,
    /// Inbound interface, or "all"
    #[arg(short, long, default_value = "all")]
    interface: String,
    #[arg(long)]
    comment: Option<String>,
}

#[derive(Subcommand)]
enum DhcpCommand {
    List,
    /// Assign (or reassign) a static address
    Set { name: String, ip: String },
    Remove { name: String },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Get,
    /// Set the container backup directory
    Set { backup_path: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(e.as_ref());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints `err`, with operator hints for firewall failures.
fn print_error(err: &(dyn std::error::Error + 'static)) {
    eprintln!("Error: {err}");

    if let Some(diagnostic) = err
        .downcast_ref::<lxcm::Error>()
        .and_then(lxcm::Error::diagnostic)
    {
        let translation = IptablesErrorPattern::match_error(diagnostic);
        eprintln!("  {}", translation.user_message);
        for suggestion in translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

/// Everything the commands need, wired from one config
struct Services {
    manager: Arc<RuleManager<JsonRuleStore, IptablesApplier>>,
    dhcp: Arc<DhcpLeases>,
    settings: Arc<SettingsStore>,
    resolver: ContainerResolver,
    audit: Arc<AuditLog>,
}

impl Services {
    async fn open(config: &AppConfig) -> lxcm::Result<Self> {
        let timeout = config.command_timeout();
        let audit = Arc::new(AuditLog::at(&config.audit_log_path));

        let store = Arc::new(JsonRuleStore::open(&config.rules_path).await?);
        let applier = IptablesApplier::new(&config.iptables_command)
            .with_timeout(timeout)
            .with_elevation(config.elevation);
        let manager = RuleManager::new(store, applier, &config.chain_name)
            .with_audit(Arc::clone(&audit));

        let dhcp = DhcpLeases::new(&config.dhcp_config_path)
            .with_reload_command(Some(config.dhcp_reload_command.clone()))
            .with_elevation(config.elevation)
            .with_timeout(timeout)
            .with_audit(Arc::clone(&audit));

        let resolver = ContainerResolver::new(&config.lxc_info_command)
            .with_elevation(config.elevation)
            .with_timeout(timeout);

        Ok(Self {
            manager: Arc::new(manager),
            dhcp: Arc::new(dhcp),
            settings: Arc::new(SettingsStore::open(&config.settings_path).await?),
            resolver,
            audit,
        })
    }
}

async fn run(cli: Cli) -> CliResult {
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path).await?;

    // Config commands must work before the store paths exist
    let services = match cli.command {
        Commands::Config(command) => return config_command(command, &config, &config_path).await,
        _ => Services::open(&config).await?,
    };

    match cli.command {
        Commands::Serve => serve(config, services).await,
        Commands::Rules(command) => rules(command, &services).await,
        Commands::Dhcp(command) => dhcp(command, &services).await,
        Commands::Settings(command) => settings(command, &services).await,
        Commands::Config(command) => config_command(command, &config, &config_path).await,
        Commands::Audit { count } => {
            for event in services.audit.read_recent(count).await? {
                println!(
                    "{} {:<18} {} {}{}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    if event.success { "ok  " } else { "FAIL" },
                    event.details,
                    event.error.map(|e| format!(" ({e})")).unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}

async fn config_command(
    command: ConfigCommand,
    config: &AppConfig,
    path: &std::path::Path,
) -> CliResult {
    match command {
        ConfigCommand::Show => {
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommand::Init { force } => {
            if !force && tokio::fs::try_exists(path).await? {
                return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
            }
            config::save_config(&AppConfig::default(), path).await?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

async fn serve(config: AppConfig, services: Services) -> CliResult {
    let state = Arc::new(
        AppState::new(
            Arc::clone(&services.manager),
            services.dhcp,
            services.settings,
            services.resolver,
        )
        .with_audit(services.audit),
    );

    match state.manager.initialize().await {
        Ok(report) => {
            state.set_network_ready(true);
            info!(
                "Network initialized: chain {} with {} rules",
                state.manager.chain(),
                report.applied
            );
            if !report.is_complete() {
                warn!("{} stored rules could not be applied", report.failures.len());
            }
        }
        Err(e) => {
            error!("Network bootstrap failed, serving in degraded mode: {e}");
        }
    }

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn print_report(report: &SyncReport) {
    println!("✓ {} rules applied", report.applied);
    for failure in &report.failures {
        println!("✗ port {}: {}", failure.external_port, failure.message);
    }
}

async fn rules(command: RulesCommand, services: &Services) -> CliResult {
    let manager = &services.manager;

    match command {
        RulesCommand::List => {
            let rules = manager.list_rules().await?;
            if rules.is_empty() {
                println!("No port forwarding rules.");
            }
            for rule in rules {
                match &rule.comment {
                    Some(comment) => println!("{:>4}  {rule}  # {comment}", rule.id),
                    None => println!("{:>4}  {rule}", rule.id),
                }
            }
        }
        RulesCommand::Add(args) => {
            let internal_ip = if args.container {
                services.resolver.require(&args.target).await?
            } else {
                lxcm::validators::validate_target_ip(&args.target)
                    .map_err(|e| lxcm::Error::validation("internal_ip", e))?
            };
            let interface = InterfaceFilter::try_from(args.interface)
                .map_err(|e| lxcm::Error::validation("interface", e))?;

            let rule = manager
                .add_rule(NewPortMapping {
                    interface,
                    protocol: args.protocol,
                    external_port: args.external_port,
                    internal_ip,
                    internal_port: args.internal_port,
                    comment: args.comment,
                })
                .await?;
            println!("✓ Added {rule}");
        }
        RulesCommand::Remove { port } => {
            if manager.remove_rule(port).await? {
                println!("✓ Removed rule for port {port}");
            } else {
                println!("No rule for port {port}; chain resynced.");
            }
        }
        RulesCommand::Apply => {
            let report = manager.initialize().await?;
            print_report(&report);
            if !report.is_complete() {
                return Err(format!("{} rules failed to apply", report.failures.len()).into());
            }
        }
    }
    Ok(())
}

async fn dhcp(command: DhcpCommand, services: &Services) -> CliResult {
    match command {
        DhcpCommand::List => {
            for (name, ip) in services.dhcp.list().await? {
                println!("{name:<24} {ip}");
            }
        }
        DhcpCommand::Set { name, ip } => {
            services.dhcp.set(&name, &ip).await?;
            println!("✓ {name} -> {ip}");
        }
        DhcpCommand::Remove { name } => {
            if !services.dhcp.remove(&name).await? {
                return Err(format!("No DHCP entry for '{name}'").into());
            }
            println!("✓ Removed {name}");
        }
    }
    Ok(())
}

async fn settings(command: SettingsCommand, services: &Services) -> CliResult {
    match command {
        SettingsCommand::Get => {
            let backup_path = services
                .settings
                .get(BACKUP_PATH_KEY, DEFAULT_BACKUP_PATH)
                .await;
            println!("{BACKUP_PATH_KEY} = {backup_path}");
        }
        SettingsCommand::Set { backup_path } => {
            let backup_path = backup_path.trim();
            if backup_path.is_empty() {
                return Err("backup_path cannot be empty".into());
            }
            let result = services.settings.set(BACKUP_PATH_KEY, backup_path).await;
            services
                .audit
                .log(lxcm::audit::AuditEvent::from_result(
                    lxcm::audit::EventType::UpdateSettings,
                    serde_json::json!({ "backup_path": backup_path }),
                    &result,
                ))
                .await;
            result?;
            println!("✓ {BACKUP_PATH_KEY} = {backup_path}");
        }
    }
    Ok(())
}
