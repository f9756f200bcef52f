use clap::{Parser, Subcommand};
use ndcache::config::{self, InterfaceSpec, NeighborSpec};
use ndcache::nd::{NdAction, NdEngine};
use ndcache::protocol::MacAddr;
use ndcache::service::{LinkOutput, NdService};
use ndcache::telemetry::{init_logging, MetricsRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "ndcache")]
#[command(about = "IPv6 Neighbor Discovery cache daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the ND engine
    Run {
        /// Path to config.lock file
        #[arg(short, long, default_value = "config.lock")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate config.lock from config.toml
    Generate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Output path for config.lock
        #[arg(short, long, default_value = "config.lock")]
        output: PathBuf,
    },
    /// Validate config.toml without generating lock file
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config { action }) => {
            init_logging(None);
            match action {
                ConfigAction::Generate {
                    config: config_path,
                    output,
                } => cmd_config_generate(&config_path, &output),
                ConfigAction::Validate {
                    config: config_path,
                } => cmd_config_validate(&config_path),
            }
        }
        Some(Commands::Run { config: lock_path }) => cmd_run(&lock_path),
        None => cmd_run(&PathBuf::from("config.lock")),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

/// Logs every action. Frame I/O is left to whatever embeds the engine.
struct LoggingLink;

impl LinkOutput for LoggingLink {
    fn execute(&mut self, action: NdAction) {
        match &action {
            NdAction::SendSolicitation {
                ifindex, target, ..
            } => info!(ifindex, target = %target, "neighbor solicitation"),
            NdAction::SendAdvertisement {
                ifindex, dst, target, ..
            } => info!(ifindex, dst = %dst, target = %target, "neighbor advertisement"),
            NdAction::ReportUnreachable {
                ifindex, packet, reason,
            } => warn!(ifindex, dst = %packet.destination, ?reason, "destination unreachable"),
            _ => debug!(?action, "action"),
        }
    }
}

fn cmd_run(lock_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;

    let lock = config::load_lock(lock_path)
        .map_err(|e| format!("Failed to load {}: {}", lock_path.display(), e))?;
    init_logging(Some(&lock.logging));
    info!("Loaded {} (generated {})", lock_path.display(), lock.generated_at);

    let params = lock.nd_params().map_err(|e| e.to_string())?;
    let interfaces = lock.interface_specs().map_err(|e| e.to_string())?;
    let neighbors = lock.neighbor_specs().map_err(|e| e.to_string())?;
    if interfaces.is_empty() {
        return Err("No interfaces configured".to_string());
    }

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let metrics = Arc::new(MetricsRegistry::new());
        let now = Instant::now();
        let mut engine = NdEngine::new(params, metrics.clone(), now);
        let mut startup = Vec::new();

        for spec in &interfaces {
            let mac = spec.mac.unwrap_or_else(|| get_interface_mac(&spec.name));
            startup.extend(engine.add_interface(now, spec.interface(mac)));
            for addr in spec.interface_addresses() {
                startup.extend(engine.add_address(now, addr).map_err(|e| e.to_string())?);
            }
            log_interface(spec, mac);
        }

        for neighbor in &neighbors {
            let result = match neighbor {
                NeighborSpec::Static {
                    address,
                    ifindex,
                    mac,
                } => engine.add_static_neighbor(now, *address, *ifindex, *mac),
                NeighborSpec::Proxy { address, ifindex } => {
                    engine.add_proxy_neighbor(now, *address, *ifindex)
                }
            };
            match result {
                Ok(actions) => {
                    debug!(?neighbor, "administrative neighbor installed");
                    startup.extend(actions);
                }
                Err(e) => warn!(?neighbor, "Failed to install neighbor: {}", e),
            }
        }

        let mut link = LoggingLink;
        for action in startup {
            link.execute(action);
        }
        let (handle, task) = NdService::spawn(engine, link);
        info!("ND engine started on {} interfaces", interfaces.len());

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;
        info!("Shutting down...");
        drop(handle);
        task.await.map_err(|e| format!("Engine task failed: {}", e))?;

        for (name, value) in metrics.export() {
            debug!("{} = {}", name, value);
        }
        Ok::<(), String>(())
    })
}

fn log_interface(spec: &InterfaceSpec, mac: MacAddr) {
    info!(
        "  {} configured: ifindex={}, link={:?}, MAC={}, addresses={:?}",
        spec.name, spec.ifindex, spec.kind, mac, spec.addresses
    );
}

fn get_interface_mac(name: &str) -> MacAddr {
    // Read MAC from /sys/class/net/{name}/address
    let path = format!("/sys/class/net/{}/address", name);
    if let Ok(content) = std::fs::read_to_string(&path) {
        if let Ok(mac) = content.trim().parse() {
            return mac;
        }
    }
    warn!("Could not read MAC of {}, using {}", name, MacAddr::ZERO);
    MacAddr::ZERO
}

fn cmd_config_generate(config_path: &PathBuf, output_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Loading {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    let lock = config::generate_lock(&cfg);

    let lock_toml =
        toml::to_string_pretty(&lock).map_err(|e| format!("Failed to serialize lock: {}", e))?;

    let output = format!(
        "# Generated by ndcache - DO NOT EDIT\n# Source: {}\n\n{}",
        config_path.display(),
        lock_toml
    );

    std::fs::write(output_path, output).map_err(|e| format!("Failed to write lock file: {}", e))?;

    println!("[INFO] Generated {}", output_path.display());
    Ok(())
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
