//! compute-flock - Local-network node discovery and adoption

use clap::{Args, Parser, Subcommand};
use flock_server::config::{FlockConfig, StartMode};
use flock_server::control_plane::{K3s, K3sTokenIssuer};
use flock_server::discovery::MdnsTransport;
use flock_server::metadata::{MetadataCollector, SystemMetadata};
use flock_server::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use flock_server::runtime::{Collaborators, NodeRuntime};
use flock_server::version;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "compute-flock")]
#[command(about = "Discover machines on the local network and adopt them into a k3s cluster")]
#[command(version = version::CLI_VERSION)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true, env = "FLOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane and adopt pending nodes
    Controller(RunArgs),
    /// Advertise as pending and wait to be adopted
    Agent(RunArgs),
    /// Start in the mode named by the config file
    Run(RunArgs),
    /// Print this host's metadata as JSON
    Fingerprint,
    /// Print build information
    Version,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Preferred adoption port
    #[arg(long)]
    port: Option<u16>,
    /// Skip host prerequisite checks
    #[arg(long)]
    no_verify: bool,
    /// Address handed to adopted nodes
    #[arg(long)]
    advertise_ip: Option<IpAddr>,
    /// Status API listen address
    #[arg(long)]
    status_addr: Option<SocketAddr>,
}

impl RunArgs {
    fn apply(&self, config: &mut FlockConfig) {
        if let Some(port) = self.port {
            config.default_port = port;
        }
        if self.no_verify {
            config.no_verify = true;
        }
        if let Some(ip) = self.advertise_ip {
            config.advertise_ip = Some(ip);
        }
        if let Some(addr) = self.status_addr {
            config.status_addr = Some(addr);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mode, args) = match cli.command {
        Commands::Fingerprint => {
            let metadata = SystemMetadata::default().collect();
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            return Ok(());
        }
        Commands::Version => {
            println!("{}", version::build_info());
            return Ok(());
        }
        Commands::Controller(args) => (Some(StartMode::Controller), args),
        Commands::Agent(args) => (Some(StartMode::Agent), args),
        Commands::Run(args) => (None, args),
    };

    let mut config = match FlockConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("compute-flock: {e}");
            std::process::exit(2);
        }
    };
    args.apply(&mut config);
    let mode = mode.unwrap_or(config.mode);

    if let Err(e) = init_tracing(TracingConfig::from_env().with_log_format(config.log_format.clone())) {
        eprintln!("compute-flock: failed to initialize tracing: {e}");
    }
    info!(version = %version::full_version(), mode = %mode, "compute-flock starting");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        shutdown_tracing();
        std::process::exit(2);
    }

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let transport = match MdnsTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "Failed to start mDNS responder");
            shutdown_tracing();
            std::process::exit(1);
        }
    };

    let collaborators = Collaborators {
        control_plane: Arc::new(K3s::new(config.k3s_path.clone())),
        token_issuer: Arc::new(K3sTokenIssuer::new(config.k3s_path.clone())),
        metadata: Arc::new(SystemMetadata::default()),
        transport: Arc::new(transport),
    };

    let result = match NodeRuntime::start(config, mode, collaborators, metrics_state).await {
        Ok(runtime) => runtime.run_until_shutdown().await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        let message = format!("{e:#}");
        error!(error = %message, "compute-flock failed");
        shutdown_tracing();
        std::process::exit(1);
    }

    shutdown_tracing();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_override_config() {
        let cli = Cli::parse_from([
            "compute-flock",
            "agent",
            "--port",
            "9100",
            "--no-verify",
            "--advertise-ip",
            "10.0.0.1",
        ]);
        let Commands::Agent(args) = cli.command else {
            panic!("expected agent subcommand");
        };
        let mut config = FlockConfig::default();
        args.apply(&mut config);
        assert_eq!(config.default_port, 9100);
        assert!(config.no_verify);
        assert_eq!(config.advertise_ip, Some("10.0.0.1".parse().unwrap()));
    }
}
