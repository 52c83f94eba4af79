//! pvrbus CLI - daemon entry points and the process manager

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pvrbus_core::bus::{Bus, TcpBus};
use pvrbus_core::config::{BusConfig, PvrbusConfig};
use pvrbus_core::daemon::{self, loggerd, printd, proxyd, replayd, timed};
use pvrbus_core::signals::{shutdown_token, wait_for_shutdown_signal};
use pvrbus_supervisor::{ProcessSpec, ProcessSupervisor, SupervisorConfig, forward_heartbeats};

#[derive(Parser)]
#[command(name = "pvrbus")]
#[command(about = "Bus daemons, session recorder and replayer", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (overrides pvrbus.toml)
    #[arg(long, global = true, env = "PVRBUS_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Bus ports, as the daemons take them on their command line
#[derive(Args, Debug, Clone, Copy)]
struct Ports {
    /// Request/reply port
    rep_port: Option<u16>,
    /// Publish port
    pub_port: Option<u16>,
    /// Subscribe port
    sub_port: Option<u16>,
}

impl Ports {
    fn given(self) -> bool {
        self.rep_port.is_some() || self.pub_port.is_some() || self.sub_port.is_some()
    }

    fn apply(self, bus: BusConfig) -> BusConfig {
        let (rep, publ, sub) = (bus.rep_port, bus.pub_port, bus.sub_port);
        bus.with_ports(
            self.rep_port.unwrap_or(rep),
            self.pub_port.unwrap_or(publ),
            self.sub_port.unwrap_or(sub),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Forward published messages to subscribers
    Proxyd {
        #[command(flatten)]
        ports: Ports,
    },
    /// Record bus traffic into session logs
    Loggerd {
        #[command(flatten)]
        ports: Ports,
        /// Log root (overrides configuration)
        #[arg(long)]
        log_root: Option<PathBuf>,
    },
    /// Replay recorded sessions onto the bus
    Replayd {
        #[command(flatten)]
        ports: Ports,
        /// Log root (overrides configuration)
        #[arg(long)]
        log_root: Option<PathBuf>,
    },
    /// Publish the wall clock once per second
    Timed {
        #[command(flatten)]
        ports: Ports,
    },
    /// Print the freshest message of every topic
    Printd {
        #[command(flatten)]
        ports: Ports,
        /// Messages drained per cycle
        #[arg(long, default_value_t = 1000)]
        max_skip: usize,
    },
    /// Start and watch the daemons of the process table
    Manager {
        #[command(flatten)]
        ports: Ports,
    },
    /// List recorded sessions
    Sessions {
        /// Log root (overrides configuration)
        #[arg(long)]
        log_root: Option<PathBuf>,
    },
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<PvrbusConfig> {
    let config = match path {
        Some(path) => PvrbusConfig::from_file(path),
        None => PvrbusConfig::load(),
    };
    config.context("Failed to load configuration")
}

fn tcp_bus(config: &PvrbusConfig, ports: Ports) -> Arc<dyn Bus> {
    Arc::new(TcpBus::new(ports.apply(config.bus.clone())))
}

/// Run a daemon with signal handling and, under the manager, heartbeats
async fn serve<F, Fut>(bus: Arc<dyn Bus>, daemon: F) -> Result<()>
where
    F: FnOnce(Arc<dyn Bus>, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = pvrbus_core::error::Result<()>>,
{
    let shutdown = shutdown_token();
    let heartbeat = daemon::spawn_heartbeat(bus.clone(), shutdown.child_token());
    let result = daemon(bus, shutdown.clone()).await;
    shutdown.cancel();
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    result.map_err(Into::into)
}

/// Hand the manager's config file and ports on to its own daemons
fn forward_to_daemons(specs: &mut [ProcessSpec], path: Option<&PathBuf>, bus: Option<&BusConfig>) {
    for spec in specs.iter_mut().filter(|p| p.program.is_none()) {
        if let Some(path) = path {
            spec.args.push("--config".to_string());
            spec.args.push(path.display().to_string());
        }
        if let Some(bus) = bus {
            spec.args.extend(
                [bus.rep_port, bus.pub_port, bus.sub_port].map(|port| port.to_string()),
            );
        }
    }
}

async fn manager(config: &PvrbusConfig, path: Option<&PathBuf>, ports: Ports) -> Result<()> {
    let mut supervisor_config = match path {
        Some(path) => SupervisorConfig::from_file(path),
        None => SupervisorConfig::load(),
    }
    .context("Failed to load supervisor table")?;
    let bus = ports.given().then(|| ports.apply(config.bus.clone()));
    forward_to_daemons(&mut supervisor_config.processes, path, bus.as_ref());
    let supervisor = ProcessSupervisor::new(supervisor_config)?;

    let (names, heartbeats) = mpsc::channel(256);
    let listening = CancellationToken::new();
    let listener = tokio::spawn(forward_heartbeats(
        tcp_bus(config, ports),
        names,
        listening.clone(),
    ));

    let result = supervisor
        .run(
            async {
                if let Err(e) = wait_for_shutdown_signal().await {
                    warn!(error = %e, "cannot install signal handlers, shutting down");
                }
            },
            heartbeats,
        )
        .await;

    listening.cancel();
    let _ = listener.await;
    result.map_err(Into::into)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("pvrbus {}", env!("CARGO_PKG_VERSION"));
            println!("pvrbus-core {}", pvrbus_core::VERSION);
        }
        Commands::Proxyd { ports } => {
            let config = load_config(cli.config.as_ref())?;
            let bus = ports.apply(config.bus.clone());
            let shutdown = shutdown_token();
            let heartbeat = daemon::spawn_heartbeat(tcp_bus(&config, ports), shutdown.child_token());
            proxyd::run(&bus, shutdown.clone()).await?;
            shutdown.cancel();
            if let Some(heartbeat) = heartbeat {
                let _ = heartbeat.await;
            }
        }
        Commands::Loggerd { ports, log_root } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(root) = log_root {
                config.logger.log_root = root;
            }
            let logger = config.logger.clone();
            serve(tcp_bus(&config, ports), |bus, shutdown| {
                loggerd::run(bus, logger, shutdown)
            })
            .await?;
        }
        Commands::Replayd { ports, log_root } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(root) = log_root {
                config.replay.log_root = root;
            }
            let replay = config.replay.clone();
            serve(tcp_bus(&config, ports), |bus, shutdown| {
                replayd::run(bus, replay, shutdown)
            })
            .await?;
        }
        Commands::Timed { ports } => {
            let config = load_config(cli.config.as_ref())?;
            serve(tcp_bus(&config, ports), timed::run).await?;
        }
        Commands::Printd { ports, max_skip } => {
            let config = load_config(cli.config.as_ref())?;
            serve(tcp_bus(&config, ports), |bus, shutdown| {
                printd::run(bus, max_skip, shutdown)
            })
            .await?;
        }
        Commands::Manager { ports } => {
            let config = load_config(cli.config.as_ref())?;
            manager(&config, cli.config.as_ref(), ports).await?;
        }
        Commands::Sessions { log_root } => {
            let config = load_config(cli.config.as_ref())?;
            let root = log_root.unwrap_or(config.replay.log_root);
            let list = replayd::session_list(&root)
                .with_context(|| format!("Failed to list {}", root.display()))?;
            if list.logs.is_empty() {
                info!(root = %root.display(), "no sessions recorded");
            }
            for log in list.logs {
                println!("{}\t{}", log.mtime, log.id);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvrbus_supervisor::default_table;

    #[test]
    fn test_manager_ports_reach_daemons() {
        let cli = Cli::try_parse_from(["pvrbus", "manager", "5000", "5001", "5002"]).unwrap();
        let Commands::Manager { ports } = cli.command else {
            panic!("expected manager");
        };
        assert!(ports.given());
        let bus = ports.apply(BusConfig::default());

        let mut specs = default_table();
        specs.push(ProcessSpec::new("external", "sleep", &["30"]));
        forward_to_daemons(&mut specs, None, Some(&bus));

        assert_eq!(specs[0].args, vec!["proxyd", "5000", "5001", "5002"]);
        let ports = ["5000".to_string(), "5001".to_string(), "5002".to_string()];
        assert!(specs[..4].iter().all(|p| p.args.ends_with(&ports)));
        assert_eq!(specs[4].args, vec!["30"]);

        let child = Cli::try_parse_from(
            std::iter::once("pvrbus".to_string()).chain(specs[0].args.iter().cloned()),
        )
        .unwrap();
        let Commands::Proxyd { ports } = child.command else {
            panic!("expected proxyd");
        };
        assert_eq!(ports.apply(BusConfig::default()), bus);
    }

    #[test]
    fn test_config_path_forwarded_without_ports() {
        let cli = Cli::try_parse_from(["pvrbus", "manager"]).unwrap();
        let Commands::Manager { ports } = cli.command else {
            panic!("expected manager");
        };
        assert!(!ports.given());

        let path = PathBuf::from("site.toml");
        let mut specs = default_table();
        forward_to_daemons(&mut specs, Some(&path), None);
        assert_eq!(specs[1].args, vec!["loggerd", "--config", "site.toml"]);
    }
}
