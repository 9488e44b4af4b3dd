use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use speedbeacon::config::{BeaconConfig, LoggingConfig};
use speedbeacon::reflector::ReflectorServer;
use speedbeacon::throughput::orchestrator;
use speedbeacon::throughput::report;
use speedbeacon::RunParams;

#[derive(Parser)]
#[command(
    name = "speedbeacon",
    about = "LAN throughput benchmark with broadcast server discovery",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $SPEEDBEACON_CONFIG, then /etc/speedbeacon/speedbeacon.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the discovery port
    #[arg(long, global = true)]
    discovery_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the measurement server and broadcast offers
    Serve {
        /// Interface address for the transfer sockets
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Destination address for offer broadcasts
        #[arg(long)]
        broadcast: Option<IpAddr>,

        /// Fixed TCP transfer port (default: OS-assigned)
        #[arg(long)]
        tcp_port: Option<u16>,

        /// Fixed UDP transfer port (default: OS-assigned)
        #[arg(long)]
        udp_port: Option<u16>,
    },

    /// Discover a server and run TCP/UDP transfer sessions against it
    Client {
        /// Bytes requested by every session
        #[arg(long)]
        size: u64,

        /// Number of parallel TCP sessions
        #[arg(long, default_value = "1")]
        tcp: u32,

        /// Number of parallel UDP sessions
        #[arg(long, default_value = "1")]
        udp: u32,

        /// Rounds to run, each with a fresh discovery (0 = until interrupted)
        #[arg(long, default_value = "1")]
        rounds: u32,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Wait for one server offer and print it
    Discover {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BeaconConfig::resolve(cli.config.as_deref())?;
    if let Some(port) = cli.discovery_port {
        config.discovery.port = port;
    }
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve {
            bind,
            broadcast,
            tcp_port,
            udp_port,
        } => {
            if let Some(addr) = bind {
                config.server.bind_address = addr;
            }
            if let Some(addr) = broadcast {
                config.discovery.broadcast_address = addr;
            }
            if let Some(port) = tcp_port {
                config.server.tcp_port = port;
            }
            if let Some(port) = udp_port {
                config.server.udp_port = port;
            }

            let server = ReflectorServer::bind(&config).await?;
            let local_ip = speedbeacon::discovery::local_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            println!();
            println!("  speedbeacon reflector");
            println!("  =====================");
            println!("  Local IP    : {}", local_ip);
            println!("  UDP port    : {}", server.udp_port());
            println!("  TCP port    : {}", server.tcp_port());
            println!("  Offers to   : {}", server.broadcast_target());
            println!();

            server.run().await;
        }
        Commands::Client {
            size,
            tcp,
            udp,
            rounds,
            json,
        } => {
            let params = RunParams {
                file_size: size,
                tcp_sessions: tcp,
                udp_sessions: udp,
            };

            let mut round: u32 = 0;
            loop {
                round = round.saturating_add(1);
                tracing::info!(round, "starting round");
                let run = orchestrator::run(params, &config).await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&run)?);
                } else {
                    println!("{}", report::format_offer(&run.offer));
                    println!();
                    for outcome in &run.sessions {
                        println!("{}", report::format_outcome(outcome));
                    }
                    println!();
                    println!("{}", report::format_run_summary(&run));
                }

                if rounds != 0 && round >= rounds {
                    break;
                }
            }
        }
        Commands::Discover { json } => {
            let offer = speedbeacon::discovery::discover(config.discovery.port).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&offer)?);
            } else {
                println!("{}", report::format_offer(&offer));
            }
        }
    }

    Ok(())
}
