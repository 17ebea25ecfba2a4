use clap::Parser;
use log::{error, info};
use master::{http, MasterConfig, MasterService};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::time::Duration;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port for the register/heartbeat/list protocol
    #[clap(short, long, default_value_t = shared::DEFAULT_MASTER_PORT)]
    port: u16,
    /// Port for the HTTP listing (0 disables it)
    #[clap(long, default_value = "7780")]
    http_port: u16,
    /// Seconds without a heartbeat before an entry is dropped
    #[clap(short, long, default_value = "45")]
    stale_after: u64,
    /// Seconds between reaper sweeps
    #[clap(long, default_value = "15")]
    reap_interval: u64,
    /// Requests allowed per IP per minute
    #[clap(long, default_value = "30")]
    rate_limit: u32,
    /// Shared secret required on REGISTER (or MASTER_TOKEN)
    #[clap(long)]
    token: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<MasterConfig, Box<dyn std::error::Error>> {
        let bind: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        let http_bind = match self.http_port {
            0 => None,
            port => Some(format!("{}:{}", self.host, port).parse::<SocketAddr>()?),
        };
        Ok(MasterConfig {
            bind,
            http_bind,
            stale_after: Duration::from_secs(self.stale_after),
            reap_interval: Duration::from_secs(self.reap_interval),
            rate_limit: self.rate_limit,
            token: self.token.or_else(|| std::env::var("MASTER_TOKEN").ok()),
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    config.validate()?;
    if config.token.is_none() {
        info!("No registration token configured; any server may register");
    }

    let service = MasterService::new(&config);
    let listener = TcpListener::bind(config.bind).await?;
    tokio::spawn(service.clone().run_reaper());

    if let Some(http_bind) = config.http_bind {
        let http_listener = TcpListener::bind(http_bind).await?;
        let registry = service.registry();
        tokio::spawn(async move {
            if let Err(e) = http::serve(http_listener, registry).await {
                error!("HTTP listing stopped: {}", e);
            }
        });
    }

    tokio::select! {
        result = service.run(listener) => {
            if let Err(e) = result {
                error!("Master stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }
    Ok(())
}
