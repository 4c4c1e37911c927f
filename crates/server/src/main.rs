//! Steward - certificate manager for Nebula mesh networks.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use steward_ca::node_config::{self, HostConfigParams, NodeConfig, RelayPolicy};
use steward_ca::SignRequest;
use steward_server::{api, build_authority, logging, AppState, ServeSettings, Settings};

/// Steward - certificate manager for Nebula mesh networks
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(flatten)]
    serve: ServeSettings,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Create a new CA, replacing the stored one
    CreateCa {
        /// CA name
        #[arg(long = "name")]
        name: String,
    },
    /// Sign a host certificate with the stored CA
    Sign {
        /// Host name
        #[arg(long = "name")]
        name: String,
        /// Overlay IP in CIDR form, e.g. 10.0.0.2/24
        #[arg(long = "ip")]
        ip: String,
        /// Host public key file; no private key is generated when given
        #[arg(long = "pub")]
        public_key: Option<PathBuf>,
    },
    /// Print a lighthouse config
    LighthouseConfig {
        /// Relay to use; without any the lighthouse acts as a relay
        #[arg(long = "relay")]
        relays: Vec<String>,
    },
    /// Print a host config
    HostConfig {
        /// Overlay IP of a lighthouse
        #[arg(long = "lighthouse")]
        lighthouses: Vec<String>,
        /// Static host entry as nebula_ip=addr:port
        #[arg(long = "static-host")]
        static_hosts: Vec<String>,
        /// Relay to use
        #[arg(long = "relay", conflicts_with = "am_relay")]
        relays: Vec<String>,
        /// Act as a relay instead of using relays
        #[arg(long = "am-relay")]
        am_relay: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.settings.log_format, cli.settings.verbose);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(&cli.settings, &cli.serve).await,
        Commands::CreateCa { name } => {
            let authority = build_authority(&cli.settings).await;
            let created = authority
                .create_ca(&name)
                .await
                .context("Failed to create CA")?;
            print!("{}", created.certificate_pem);
            Ok(())
        }
        Commands::Sign {
            name,
            ip,
            public_key,
        } => {
            let mut request = SignRequest::new(name, ip);
            if let Some(path) = public_key {
                let key = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read public key {}", path.display()))?;
                request = request.with_public_key(key);
            }
            let authority = build_authority(&cli.settings).await;
            let signed = authority
                .sign_cert(request)
                .await
                .context("Failed to sign certificate")?;
            print!("{}", signed.certificate_pem);
            if let Some(key) = signed.private_key {
                print!("{}", key);
            }
            Ok(())
        }
        Commands::LighthouseConfig { relays } => {
            let policy = if relays.is_empty() {
                RelayPolicy::AmRelay
            } else {
                RelayPolicy::UseRelays(relays)
            };
            print_yaml(&node_config::lighthouse_config(&policy))
        }
        Commands::HostConfig {
            lighthouses,
            static_hosts,
            relays,
            am_relay,
        } => {
            let params = HostConfigParams {
                static_host_map: parse_static_hosts(&static_hosts)?,
                lighthouse_hosts: lighthouses,
                relays: if am_relay {
                    RelayPolicy::AmRelay
                } else {
                    RelayPolicy::UseRelays(relays)
                },
            };
            print_yaml(&node_config::host_config(&params))
        }
    }
}

async fn run_server(settings: &Settings, serve: &ServeSettings) -> Result<()> {
    let authority = build_authority(settings).await;
    info!(
        data_path = %settings.data_path.display(),
        nebula_cert = %settings.nebula_cert,
        work_dir = %settings.work_dir().display(),
        "Certificate authority ready"
    );

    let state = Arc::new(AppState::new(authority, serve.dist_dir.clone()));
    let router = api::router(state);

    let addr = serve.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(address = %addr, dist_dir = %serve.dist_dir.display(), "Steward listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Steward stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Parse `nebula_ip=addr:port` entries, merging repeated IPs.
fn parse_static_hosts(entries: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let Some((nebula_ip, public)) = entry.split_once('=') else {
            bail!("Invalid static host `{}`, expected nebula_ip=addr:port", entry);
        };
        if nebula_ip.is_empty() || public.is_empty() {
            bail!("Invalid static host `{}`, expected nebula_ip=addr:port", entry);
        }
        map.entry(nebula_ip.to_string())
            .or_default()
            .push(public.to_string());
    }
    Ok(map)
}

fn print_yaml(config: &NodeConfig) -> Result<()> {
    let yaml = config.to_yaml().context("Failed to render config")?;
    print!("{}", yaml);
    Ok(())
}
