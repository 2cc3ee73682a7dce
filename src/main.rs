use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lumi_driver::driver::ios::DeviceFactory;
use lumi_driver::driver::sim::{SimOptions, SimulatorFactory};
use lumi_driver::driver::BackendFactory;
use lumi_driver::server::DriverServer;
use lumi_driver::session::SessionManager;
use lumi_driver::utils::config::{DriverConfig, InspectorConfig};

#[derive(Parser)]
#[command(name = "lumi-driver")]
#[command(author = "NL Team")]
#[command(version)]
#[command(about = "Remote automation driver for iOS apps and their webviews", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the driver server
    Serve {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Drive an in-process simulated device instead of WDA
        #[arg(long, default_value = "false")]
        simulator: bool,

        /// WebDriverAgent host
        #[arg(long)]
        wda_host: Option<String>,

        /// WebDriverAgent port
        #[arg(long)]
        wda_port: Option<u16>,

        /// Web inspector proxy port (enables webview contexts)
        #[arg(long)]
        inspector_port: Option<u16>,

        /// Default implicit wait for new sessions (ms)
        #[arg(long)]
        implicit_wait: Option<u64>,
    },

    /// Query a running driver's status
    Status {
        /// Driver base URL
        #[arg(long, default_value = "http://127.0.0.1:4723")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            simulator,
            wda_host,
            wda_port,
            inspector_port,
            implicit_wait,
        } => {
            let mut config = match config {
                Some(path) => DriverConfig::load(&path)?,
                None => DriverConfig::default(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(wda_host) = wda_host {
                config.wda.host = wda_host;
            }
            if let Some(wda_port) = wda_port {
                config.wda.port = wda_port;
            }
            if let Some(inspector_port) = inspector_port {
                let inspector = config.web_inspector.get_or_insert_with(InspectorConfig::default);
                inspector.port = inspector_port;
            }
            if let Some(implicit_wait) = implicit_wait {
                config.implicit_wait_ms = implicit_wait;
            }

            let (factory, backend): (Arc<dyn BackendFactory>, String) = if simulator {
                let options = SimOptions {
                    webview_attach_delay: Duration::from_millis(
                        config.simulator.webview_attach_delay_ms,
                    ),
                    log_capacity: config.log_capacity,
                    ..SimOptions::default()
                };
                (
                    Arc::new(SimulatorFactory::new(options)),
                    "simulated device".to_string(),
                )
            } else {
                let backend = format!("WDA at {}:{}", config.wda.host, config.wda.port);
                (
                    Arc::new(DeviceFactory::new(
                        config.wda.clone(),
                        config.web_inspector.clone(),
                        config.log_capacity,
                    )),
                    backend,
                )
            };

            let manager = Arc::new(SessionManager::new(factory, config.session_settings()));
            DriverServer::new(config.server.clone(), manager, backend)
                .start()
                .await?;
        }

        Commands::Status { url } => {
            let endpoint = format!("{}/status", url.trim_end_matches('/'));
            println!("{} Querying {}", "🔍".to_string().blue(), endpoint.cyan());

            let response: serde_json::Value = reqwest::get(&endpoint).await?.json().await?;
            let value = &response["value"];
            let ready = value["ready"].as_bool().unwrap_or(false);
            if ready {
                println!("{} Driver is ready", "✓".green().bold());
            } else {
                println!("{} Driver is not ready", "✗".red().bold());
            }
            if let Some(sessions) = value["sessions"].as_array() {
                println!("  Sessions: {}", sessions.len().to_string().cyan());
            }
            if let Some(pending) = value["session"]["pending"].as_object() {
                println!(
                    "  Running: {} ({} ms)",
                    pending
                        .get("command")
                        .and_then(|c| c.as_str())
                        .unwrap_or("?")
                        .yellow(),
                    pending
                        .get("elapsedMs")
                        .and_then(|ms| ms.as_u64())
                        .unwrap_or(0)
                );
            }
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }

    Ok(())
}
