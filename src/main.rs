use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use btleplug::platform::Adapter;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hrs_monitor::ble::{self, DeviceConnection};
use hrs_monitor::config::{Config, CONFIG_FILE};
use hrs_monitor::dashboard::Dashboard;
use hrs_monitor::hub::DeviceHub;
use hrs_monitor::render::ConsoleRenderer;
use hrs_monitor::server;
use hrs_monitor::transport::{HrsSocket, SocketEvent, SocketOptions};

#[derive(Parser, Debug)]
#[command(name = "hrs-monitor")]
#[command(author, version, about = "Bluetooth heart rate monitor with a live WebSocket feed")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a heart rate strap and serve /api/v1/ws
    Serve,
    /// Follow a server's feed and print the rolling window
    Watch {
        /// Server base URL (overrides HRS_BASE_URL and the config)
        #[arg(short, long)]
        url: Option<String>,
    },
    /// List nearby devices advertising the Heart Rate Service
    Scan,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(format!("hrs_monitor={},tower_http=info", config.log_level))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve => serve(&mut config, &cli.config).await?,
        Command::Watch { url } => watch(&config, url).await?,
        Command::Scan => {
            let central = ble::first_adapter().await?;
            for (i, device) in ble::scan_devices(&central, config.discover_delay())
                .await?
                .iter()
                .enumerate()
            {
                println!("{}: {}", i + 1, device.label());
            }
        }
    }
    Ok(())
}

async fn serve(config: &mut Config, config_path: &Path) -> Result<(), Box<dyn Error>> {
    let central = ble::first_adapter().await?;
    let hub = Arc::new(DeviceHub::new());

    let Some(conn) = connect_device(&central, &hub, config, config_path).await? else {
        tracing::error!("No device found");
        return Ok(());
    };

    let app = server::router(
        Arc::clone(&hub),
        &config.server_cors_origins,
        config.server_static_dir.as_deref(),
    );
    let listener =
        tokio::net::TcpListener::bind((config.server_host.as_str(), config.server_port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        if let Err(e) = conn.shutdown().await {
            tracing::error!(error = %e, "Device connection ended with an error");
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Try the remembered device first, then fall back to interactive
/// selection. The chosen address is saved once it connects.
async fn connect_device(
    central: &Adapter,
    hub: &Arc<DeviceHub>,
    config: &mut Config,
    config_path: &Path,
) -> hrs_monitor::Result<Option<DeviceConnection>> {
    if let Some(address) = config.last_device_address.clone() {
        tracing::info!(address = %address, "Using last connected device");
        if let Some(conn) = try_connect(central, hub, config, address).await {
            return Ok(Some(conn));
        }
        tracing::error!("Cannot connect to last used device, please re-select one");
    }

    loop {
        let Some(address) = ble::select_device(central, config.discover_delay()).await? else {
            return Ok(None);
        };
        if let Some(conn) = try_connect(central, hub, config, address.clone()).await {
            config.last_device_address = Some(address);
            config.save(config_path)?;
            return Ok(Some(conn));
        }
        tracing::error!("Cannot connect to this device, please re-select one");
    }
}

async fn try_connect(
    central: &Adapter,
    hub: &Arc<DeviceHub>,
    config: &Config,
    address: String,
) -> Option<DeviceConnection> {
    let mut conn = DeviceConnection::spawn(
        central.clone(),
        address,
        config.retry_interval(),
        Arc::clone(hub),
    );
    if conn.wait_ready().await {
        return Some(conn);
    }
    if let Err(e) = conn.shutdown().await {
        tracing::warn!(error = %e, "Device connection ended with an error");
    }
    None
}

async fn watch(config: &Config, url: Option<String>) -> Result<(), Box<dyn Error>> {
    let base_url = url.unwrap_or_else(|| config.resolve_base_url());
    let mut socket = HrsSocket::new(&base_url, SocketOptions::default())?;
    let mut events = socket.start().await?;

    let mut dashboard = Dashboard::new(config.window(), ConsoleRenderer::new(std::io::stdout()));
    dashboard.mount();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let closed = matches!(event, SocketEvent::Closed(_));
                dashboard.handle(event);
                if closed {
                    break;
                }
            }
        }
    }

    drop(events);
    socket.stop().await;
    Ok(())
}
