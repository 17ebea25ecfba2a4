use clap::Parser;
use client::browser::pick_open;
use client::{browse, SessionClient};
use log::{info, warn};
use serde_json::Value;
use shared::{ListFilter, Phase, ReasonCode, Role, ServerMessage};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless bot that joins a session and plays it out", long_about = None)]
struct Args {
    /// Session server address; looked up on the master when omitted
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Master server address used for browsing
    #[arg(short = 'm', long)]
    master: Option<String>,

    /// Room to join (server default when omitted)
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// Display name
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Join as a spectator
    #[arg(long)]
    spectate: bool,
}

async fn resolve_server(args: &Args) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(server) = &args.server {
        return Ok(server.clone());
    }
    let master = args
        .master
        .as_deref()
        .ok_or("either --server or --master is required")?;
    let servers = browse(master, ListFilter::default()).await?;
    info!("Master lists {} server(s)", servers.len());
    let chosen = pick_open(&servers).ok_or("no open server listed")?;
    Ok(chosen.address.clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server = resolve_server(&args).await?;
    let role = if args.spectate {
        Role::Spectator
    } else {
        Role::Participant
    };

    let mut client = SessionClient::connect(&server).await?;
    let slot = client.hello(&args.name, role, args.room.as_deref()).await?;
    info!("Joined {} at slot {}", server, slot);
    if role == Role::Participant {
        client.ready(true).await?;
    }

    // Search once per turn, then end it.
    let mut searched_turn = None;
    while let Some(message) = client.recv().await? {
        match &message {
            ServerMessage::Phase {
                phase: Phase::Ended,
                result,
            } => {
                info!("Match over: {:?}", result);
                break;
            }
            ServerMessage::Reject { reason_code, .. } => {
                warn!("Rejected: {}", reason_code);
                if *reason_code == ReasonCode::InsufficientResources {
                    client.act("end_turn", Value::Null).await?;
                }
                continue;
            }
            _ => {}
        }

        let updated = matches!(message, ServerMessage::State { .. });
        if updated && role == Role::Participant && client.mirror().is_my_turn() {
            let turn = client.mirror().snapshot.as_ref().map(|s| s.turn);
            if searched_turn != turn {
                searched_turn = turn;
                client.act("search", Value::Null).await?;
            } else {
                client.act("end_turn", Value::Null).await?;
            }
        }
    }

    info!("Disconnected");
    Ok(())
}
