use clap::Parser;
use log::{error, info, warn};
use server::heartbeat::{HeartbeatConfig, HeartbeatPublisher};
use server::replay::{FileRecorder, NullRecorder, ReplayRecorder};
use server::security::BanList;
use server::skirmish::Skirmish;
use server::{Server, ServerConfig, SessionConfig, SessionDirectory};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_SERVER_PORT)]
    port: u16,
    /// Room names to host, comma separated; the first is the default room
    #[clap(short, long, value_delimiter = ',', default_value = "default")]
    rooms: Vec<String>,
    /// Participant slots per room
    #[clap(short, long, default_value = "2")]
    capacity: u8,
    /// Participants needed to start
    #[clap(long, default_value = "2")]
    min_players: u8,
    /// Spectator cap per room (0 = none allowed)
    #[clap(long)]
    max_spectators: Option<u8>,
    /// Seconds a dropped participant's slot stays reserved
    #[clap(short, long, default_value = "60")]
    grace: u64,
    /// End the match when a participant's grace expires
    #[clap(long)]
    end_on_vacate: bool,
    /// RNG seed (random when omitted)
    #[clap(long)]
    seed: Option<u64>,
    /// Game mode advertised to the master
    #[clap(long, default_value = "competitive")]
    mode: String,
    /// Skirmish board size
    #[clap(long, default_value = "8")]
    board: i64,
    /// Score that wins a skirmish
    #[clap(long, default_value = "12")]
    target_score: u32,
    /// Master server address (host:port); unlisted when omitted
    #[clap(short, long)]
    master: Option<String>,
    /// Address advertised to the master (defaults to host:port)
    #[clap(long)]
    advertise: Option<String>,
    /// Seconds between master heartbeats
    #[clap(long, default_value = "15")]
    heartbeat: u64,
    /// Shared secret for master registration (or MASTER_TOKEN)
    #[clap(long)]
    token: Option<String>,
    /// Region advertised to the master
    #[clap(long, default_value = "")]
    region: String,
    /// Directory for replay logs
    #[clap(long)]
    replay_dir: Option<PathBuf>,
    /// Ban list file
    #[clap(long)]
    banlist: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let bind: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        let seed = self.seed.unwrap_or_else(rand::random);
        let template = SessionConfig {
            capacity: self.capacity,
            min_players: self.min_players,
            max_spectators: self.max_spectators,
            grace_period: Duration::from_secs(self.grace),
            continue_after_vacate: !self.end_on_vacate,
            mode: self.mode,
            ..Default::default()
        };
        let sessions = self
            .rooms
            .into_iter()
            .enumerate()
            .map(|(i, name)| SessionConfig {
                name,
                seed: seed.wrapping_add(i as u64),
                ..template.clone()
            })
            .collect();

        Ok(ServerConfig {
            bind,
            advertised: self.advertise,
            sessions,
            master: self.master,
            heartbeat_interval: Duration::from_secs(self.heartbeat.max(1)),
            master_token: self.token.or_else(|| std::env::var("MASTER_TOKEN").ok()),
            region: self.region,
            replay_dir: self.replay_dir,
            banlist: self.banlist,
            ..Default::default()
        })
    }
}

/// Main-method of the application.
/// Parses command-line arguments, opens every room, then serves until all
/// matches have ended or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let engine = Arc::new(Skirmish {
        width: args.board,
        height: args.board,
        target_score: args.target_score,
    });
    let config = args.into_config()?;
    config.validate()?;

    let directory = SessionDirectory::new();
    let (stop, shutdown) = watch::channel(false);
    let mut heartbeats = Vec::new();

    for session in &config.sessions {
        let recorder: Box<dyn ReplayRecorder> = match &config.replay_dir {
            Some(dir) => Box::new(FileRecorder::in_dir(dir, &session.name)),
            None => Box::new(NullRecorder),
        };
        let handle = directory
            .open(session.clone(), engine.clone(), recorder)
            .await?;

        if let Some(master) = &config.master {
            let publisher = HeartbeatPublisher::new(
                HeartbeatConfig {
                    master: master.clone(),
                    advertised: config.advertised_address(),
                    interval: config.heartbeat_interval,
                    token: config.master_token.clone(),
                    region: config.region.clone(),
                    build: config.build.clone(),
                },
                handle.status.clone(),
            );
            heartbeats.push(tokio::spawn(publisher.run(shutdown.clone())));
        }
    }
    if config.master.is_none() {
        info!("No master server configured; rooms are unlisted");
    }

    let bans = match &config.banlist {
        Some(path) => BanList::load(path),
        None => BanList::in_memory(),
    };
    let server = Server::bind(config.bind, directory.clone(), bans).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = directory.wait_empty() => {
            info!("All matches have ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    directory.shutdown().await;
    let _ = stop.send(true);
    for heartbeat in heartbeats {
        if let Err(e) = heartbeat.await {
            warn!("Heartbeat task failed: {}", e);
        }
    }
    Ok(())
}
