//! Integration tests for the session server, client and master server
//!
//! These tests run real TCP servers on loopback ports and drive them with
//! the headless client.

use client::{ClientError, SessionClient, StateMirror};
use serde_json::Value;
use server::heartbeat::{HeartbeatConfig, HeartbeatPublisher};
use server::replay::NullRecorder;
use server::security::BanList;
use server::skirmish::Skirmish;
use server::{Server, SessionConfig, SessionDirectory};
use shared::{ClientMessage, Phase, ReasonCode, Role, ServerMessage};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(config: SessionConfig) -> (String, SessionDirectory) {
    let directory = SessionDirectory::new();
    directory
        .open(config, Arc::new(Skirmish::default()), Box::new(NullRecorder))
        .await
        .unwrap();
    let server = Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        directory.clone(),
        BanList::in_memory(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    (addr, directory)
}

fn arena() -> SessionConfig {
    SessionConfig {
        name: "arena".into(),
        capacity: 2,
        min_players: 2,
        grace_period: Duration::from_secs(10),
        ..Default::default()
    }
}

async fn join(addr: &str, name: &str) -> SessionClient {
    let mut client = SessionClient::connect(addr).await.unwrap();
    client.hello(name, Role::Participant, None).await.unwrap();
    client
}

/// Receives until the mirror satisfies `cond`.
async fn until<F>(client: &mut SessionClient, what: &str, cond: F)
where
    F: Fn(&StateMirror) -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !cond(client.mirror()) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, client.recv()).await {
            Ok(Ok(Some(_))) => {}
            other => panic!("Waiting for {}: {:?}", what, other.map(|r| r.map(|_| ()))),
        }
    }
}

async fn reject(client: &mut SessionClient) -> ReasonCode {
    match client
        .wait_for(WAIT, "REJECT", |m| matches!(m, ServerMessage::Reject { .. }))
        .await
        .unwrap()
    {
        ServerMessage::Reject { reason_code, .. } => reason_code,
        _ => unreachable!(),
    }
}

/// Two ready participants in a running match; slot 0 has the turn.
async fn running_match(addr: &str) -> (SessionClient, SessionClient) {
    let mut a = join(addr, "ana").await;
    let mut b = join(addr, "bo").await;
    a.ready(true).await.unwrap();
    b.ready(true).await.unwrap();
    until(&mut a, "running", |m| m.phase() == Some(Phase::Running)).await;
    until(&mut b, "running", |m| m.phase() == Some(Phase::Running)).await;
    (a, b)
}

/// SESSION FLOW TESTS
mod session_tests {
    use super::*;

    /// Lobby to running, out-of-turn rejection, then disconnect and rejoin
    /// within the grace period.
    #[tokio::test]
    async fn end_to_end_rejoin_scenario() {
        let (addr, _directory) = start_server(arena()).await;
        let (mut a, mut b) = running_match(&addr).await;

        assert_eq!(a.mirror().slot, Some(0));
        assert_eq!(b.mirror().slot, Some(1));
        assert!(a.mirror().is_my_turn());

        b.act("end_turn", Value::Null).await.unwrap();
        assert_eq!(reject(&mut b).await, ReasonCode::NotYourTurn);

        // B drops while A holds the turn, so nothing moves in between.
        let before = b.mirror().snapshot.clone().unwrap();
        let token = b.mirror().rejoin_token.clone().unwrap();
        drop(b);

        // A sees B reserved rather than vacated.
        until(&mut a, "b reserved", |m| {
            m.slots
                .get(1)
                .map_or(false, |s| s.status == shared::SlotStatus::Reserved)
        })
        .await;

        let mut b = SessionClient::rejoin(&addr, &token).await.unwrap();
        let after = b.mirror().snapshot.clone().unwrap();
        assert_eq!(after.round, before.round);
        assert_eq!(after.turn, before.turn);
        assert_eq!(after, before);
        assert_eq!(b.mirror().slot, Some(1));
        assert_ne!(b.mirror().rejoin_token.as_deref(), Some(token.as_str()));

        // Play carries on with the rejoined connection.
        a.act("end_turn", Value::Null).await.unwrap();
        until(&mut b, "turn for b", |m| m.is_my_turn()).await;

        // The old token no longer works.
        let err = SessionClient::rejoin(&addr, &token).await.err().unwrap();
        assert!(matches!(err, ClientError::Rejected(ReasonCode::InvalidToken)));
    }

    /// A duplicated ACTION frame is applied once.
    #[tokio::test]
    async fn duplicate_action_is_not_applied_twice() {
        let (addr, _directory) = start_server(arena()).await;
        let (mut a, _b) = running_match(&addr).await;

        let sequence = a.mirror().sequence();
        let action = ClientMessage::Action {
            slot: 0,
            sequence,
            action_type: "search".into(),
            action_payload: Value::Null,
        };
        a.send(&action).await.unwrap();
        a.send(&action).await.unwrap();

        until(&mut a, "search applied", |m| m.sequence() == sequence + 1).await;
        assert_eq!(reject(&mut a).await, ReasonCode::Stale);
        assert_eq!(a.mirror().sequence(), sequence + 1);
    }

    /// Pause needs a strict majority; resume needs the same.
    #[tokio::test]
    async fn pause_and_resume_by_vote() {
        let (addr, _directory) = start_server(arena()).await;
        let (mut a, mut b) = running_match(&addr).await;

        a.pause_vote(true).await.unwrap();
        let tally = a
            .wait_for(WAIT, "tally", |m| matches!(m, ServerMessage::PauseTally { .. }))
            .await
            .unwrap();
        assert_eq!(
            tally,
            ServerMessage::PauseTally {
                votes: 1,
                needed: 2,
                paused: false
            }
        );
        assert_eq!(a.mirror().phase(), Some(Phase::Running));

        b.pause_vote(true).await.unwrap();
        until(&mut a, "paused", |m| m.phase() == Some(Phase::Paused)).await;

        a.act("end_turn", Value::Null).await.unwrap();
        assert_eq!(reject(&mut a).await, ReasonCode::Paused);

        a.pause_vote(false).await.unwrap();
        b.pause_vote(false).await.unwrap();
        until(&mut a, "resumed", |m| m.phase() == Some(Phase::Running)).await;
    }

    /// Spectators watch but cannot act, and late participants are refused.
    #[tokio::test]
    async fn spectator_follows_match() {
        let (addr, _directory) = start_server(arena()).await;
        let (mut a, _b) = running_match(&addr).await;

        let mut late = SessionClient::connect(&addr).await.unwrap();
        let err = late.hello("late", Role::Participant, None).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ReasonCode::MatchInProgress)));

        let mut watcher = SessionClient::connect(&addr).await.unwrap();
        watcher
            .hello("watcher", Role::Spectator, Some("arena"))
            .await
            .unwrap();
        let seen = watcher.mirror().sequence();

        a.act("search", Value::Null).await.unwrap();
        until(&mut watcher, "update", |m| m.sequence() > seen).await;

        watcher.act("end_turn", Value::Null).await.unwrap();
        assert_eq!(reject(&mut watcher).await, ReasonCode::NotParticipant);
    }

    /// A match abandoned by everyone ends and leaves the directory.
    #[tokio::test]
    async fn leave_ends_abandoned_match() {
        let (addr, directory) = start_server(arena()).await;
        let (a, mut b) = running_match(&addr).await;

        a.leave().await.unwrap();
        until(&mut b, "a vacated", |m| {
            m.slots
                .first()
                .map_or(false, |s| s.status == shared::SlotStatus::Vacant)
        })
        .await;
        b.send(&ClientMessage::Leave).await.unwrap();

        timeout(WAIT, directory.wait_empty()).await.unwrap();
    }
}

/// MASTER SERVER TESTS
mod master_tests {
    use super::*;
    use master::{http, MasterConfig, MasterService};
    use shared::framing::{read_message, write_message};
    use shared::{MasterRequest, MasterResponse, ServerListing, ServerMetadata};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn start_master(stale_after: Duration) -> (String, String) {
        let service = MasterService::new(&MasterConfig {
            stale_after,
            reap_interval: Duration::from_millis(100),
            rate_limit: 1000,
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let http_addr = http_listener.local_addr().unwrap().to_string();

        tokio::spawn(http::serve(http_listener, service.registry()));
        tokio::spawn(service.clone().run_reaper());
        tokio::spawn(service.run(listener));
        (addr, http_addr)
    }

    async fn http_list(http_addr: &str) -> Vec<ServerListing> {
        let mut stream = TcpStream::connect(http_addr).await.unwrap();
        stream
            .write_all(b"GET /list HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let body = response.split("\r\n\r\n").nth(1).unwrap_or("[]");
        serde_json::from_str(body).unwrap()
    }

    async fn request(master: &str, message: &MasterRequest) -> MasterResponse {
        let mut stream = TcpStream::connect(master).await.unwrap();
        write_message(&mut stream, message).await.unwrap();
        read_message(&mut stream).await.unwrap().unwrap()
    }

    /// A heartbeating session stays listed; a silent entry is reaped.
    #[tokio::test]
    async fn heartbeats_keep_entries_and_silence_reaps() {
        let (master, http_addr) = start_master(Duration::from_millis(600)).await;
        let (addr, directory) = start_server(arena()).await;

        let handle = directory.get("arena").await.unwrap();
        let (_stop, shutdown) = tokio::sync::watch::channel(false);
        let publisher = HeartbeatPublisher::new(
            HeartbeatConfig {
                master: master.clone(),
                advertised: addr.clone(),
                interval: Duration::from_millis(100),
                token: None,
                region: "local".into(),
                build: "test".into(),
            },
            handle.status.clone(),
        );
        tokio::spawn(publisher.run(shutdown));

        let silent = request(
            &master,
            &MasterRequest::Register {
                address: "10.9.9.9:7777".into(),
                metadata: ServerMetadata {
                    name: "silent".into(),
                    capacity: 2,
                    ..Default::default()
                },
                token: None,
            },
        )
        .await;
        assert!(matches!(silent, MasterResponse::Registered { .. }));

        let deadline = Instant::now() + WAIT;
        loop {
            let listed = http_list(&http_addr).await;
            let names: Vec<&str> = listed.iter().map(|l| l.metadata.name.as_str()).collect();
            if names == ["arena"] {
                assert_eq!(listed[0].address, addr);
                assert_eq!(listed[0].capacity, 2);
                assert_eq!(listed[0].metadata.region, "local");
                break;
            }
            assert!(Instant::now() < deadline, "Listing never settled: {:?}", names);
            sleep(Duration::from_millis(100)).await;
        }

        // Players joining show up in the next heartbeat.
        let _a = join(&addr, "ana").await;
        let deadline = Instant::now() + WAIT;
        while http_list(&http_addr).await[0].player_count != 1 {
            assert!(Instant::now() < deadline);
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// LIST over the message protocol matches the HTTP listing.
    #[tokio::test]
    async fn list_over_message_protocol() {
        let (master, http_addr) = start_master(Duration::from_secs(30)).await;
        for name in ["one", "two"] {
            request(
                &master,
                &MasterRequest::Register {
                    address: format!("{name}.example.net:7777"),
                    metadata: ServerMetadata {
                        name: name.into(),
                        capacity: 4,
                        mode: "coop".into(),
                        ..Default::default()
                    },
                    token: None,
                },
            )
            .await;
        }

        let listed = client::browse(&master, Default::default()).await.unwrap();
        assert_eq!(listed, http_list(&http_addr).await);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].metadata.name, "one");
    }
}
