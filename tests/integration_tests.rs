//! Integration tests for the networked tag game
//!
//! These tests validate cross-component interactions over real TCP sockets.

use assert_approx_eq::assert_approx_eq;
use client::game::{ClientView, ViewState};
use server::config::ServerConfig;
use server::game::{Outbound, RoundState, Session};
use server::network::{Server, ServerMessage};
use shared::framing::{read_frame, write_frame};
use shared::{
    spawn_position, ControlMessage, Message, PlayerId, StatePacket, Vec2, MAX_PLAYERS,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reads the next message, failing the test after `limit`.
async fn recv_within(stream: &mut TcpStream, limit: Duration) -> Option<Message> {
    match tokio::time::timeout(limit, read_frame(stream)).await {
        Ok(frame) => frame
            .expect("read failed")
            .map(|payload| Message::decode(&payload).expect("undecodable message")),
        Err(_) => None,
    }
}

/// Skips messages until one matches.
async fn recv_matching<F>(stream: &mut TcpStream, limit: Duration, mut wanted: F) -> Message
where
    F: FnMut(&Message) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let message = recv_within(stream, left)
            .await
            .expect("timed out waiting for message");
        if wanted(&message) {
            return message;
        }
    }
}

async fn start_server(
    config: ServerConfig,
) -> (
    std::net::SocketAddr,
    mpsc::UnboundedSender<ServerMessage>,
    JoinHandle<server::error::Result<()>>,
) {
    let server = Server::bind(config).await.expect("bind failed");
    let addr = server.local_addr();
    let events = server.sender();
    (addr, events, tokio::spawn(server.run()))
}

fn peers_only_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        seed: Some(17),
        host_player: false,
        ..ServerConfig::default()
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Frames written back to back arrive intact over a real socket
    #[tokio::test]
    async fn frames_survive_tcp_coalescing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let messages = vec![
            Message::Assign(2),
            Message::Control(ControlMessage::PickUp { x: 340, y: 120 }),
            Message::State(StatePacket::game_over(Duration::from_millis(7_500))),
            Message::Control(ControlMessage::Invis {
                player_id: 2,
                reset: false,
            }),
            Message::Control(ControlMessage::Remove { player_id: 0 }),
        ];

        let sent = messages.clone();
        let writer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for message in &sent {
                write_frame(&mut stream, message).await.unwrap();
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        writer.await.unwrap();

        let mut received = Vec::new();
        while let Some(message) = recv_within(&mut stream, Duration::from_secs(1)).await {
            received.push(message);
        }
        assert_eq!(received, messages);
    }

    /// Control lines use the documented text form on the wire
    #[test]
    fn control_lines_are_plain_text() {
        let payload = Message::Control(ControlMessage::Invis {
            player_id: 1,
            reset: true,
        })
        .encode()
        .unwrap();
        assert_eq!(payload, b"Invis: 1,1");
    }
}

/// GAME LOGIC TESTS
mod game_logic_tests {
    use super::*;

    fn broadcast_messages(out: &[Outbound]) -> Vec<Message> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::Broadcast { message, .. } => Some(*message),
                Outbound::SendTo { .. } => None,
            })
            .collect()
    }

    /// A client view fed with everything the session broadcasts agrees with it
    #[test]
    fn client_view_tracks_session() {
        let t0 = Instant::now();
        let mut session = Session::new(t0, Some(4));
        let mut view = ClientView::new();

        session.add_host_player(0, t0);
        for outbound in session.add_peer(1, t0) {
            match outbound {
                Outbound::SendTo {
                    player_id: 1,
                    message,
                } => view.apply(message),
                Outbound::Broadcast {
                    message,
                    exclude: Some(excluded),
                } if excluded != 1 => view.apply(message),
                _ => {}
            }
        }
        assert_eq!(view.state(), ViewState::Playing);

        for _ in 0..10 {
            let moved = session.apply_remote_movement(1, Vec2::new(0.0, 1.0));
            for message in broadcast_messages(&moved) {
                view.apply(message);
            }
        }

        let authoritative = session.player(1).unwrap().position;
        let mirrored = view.player(1).unwrap().position;
        assert_approx_eq!(mirrored.x, authoritative.x.trunc());
        assert_approx_eq!(mirrored.y, authoritative.y.trunc());
    }

    /// A tag ends the round once, and the reset three seconds later restores it
    #[test]
    fn tag_round_trip_through_view() {
        let t0 = Instant::now();
        let mut session = Session::new(t0, Some(8));
        let mut view = ClientView::new();
        view.apply(Message::Assign(1));

        session.add_host_player(0, t0);
        for outbound in session.add_peer(1, t0) {
            if let Outbound::SendTo { message, .. } = outbound {
                view.apply(message);
            }
        }

        // Walk the peer left onto the tagger at (200, 400).
        let mut now = t0;
        let mut messages = Vec::new();
        while session.round() == RoundState::Playing {
            now += Duration::from_millis(16);
            messages.extend(broadcast_messages(
                &session.apply_remote_movement(1, Vec2::new(-1.0, 0.0)),
            ));
            messages.extend(broadcast_messages(&session.simulate_tick(now)));
            assert!(now - t0 < Duration::from_secs(3), "peer never reached the tagger");
        }
        for message in messages.drain(..) {
            view.apply(message);
        }
        assert_eq!(view.state(), ViewState::GameOver);
        assert!(view.game_over_text().unwrap().starts_with("Game Over! Red lasted "));

        let resumed = now + Duration::from_secs(3);
        for message in broadcast_messages(&session.simulate_tick(resumed)) {
            view.apply(message);
        }
        assert_eq!(session.round(), RoundState::Playing);
        assert_eq!(view.state(), ViewState::Playing);
        assert_eq!(view.players().filter(|p| p.is_tagger).count(), 1);
    }
}

/// CLIENT SERVER TESTS
mod client_server_tests {
    use super::*;

    /// Identities are unique, a full session defers the next peer, and a freed
    /// identity goes to the waiting peer
    #[tokio::test]
    async fn identity_assignment_and_reuse() {
        let (addr, events, handle) = start_server(peers_only_config()).await;
        let limit = Duration::from_secs(2);

        let mut peers = Vec::new();
        let mut ids = HashSet::new();
        for _ in 0..MAX_PLAYERS {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let id = match recv_within(&mut stream, limit).await {
                Some(Message::Assign(id)) => id,
                other => panic!("Expected identity, got {:?}", other),
            };
            ids.insert(id);
            peers.push((id, stream));
        }
        assert_eq!(ids, HashSet::from([0, 1, 2]));

        let mut waiting = TcpStream::connect(addr).await.unwrap();
        assert!(
            recv_within(&mut waiting, Duration::from_millis(300)).await.is_none(),
            "fourth peer was admitted to a full session"
        );

        let (left_id, left) = peers.remove(1);
        drop(left);

        for (_, stream) in peers.iter_mut() {
            let removal = Message::Control(ControlMessage::Remove { player_id: left_id });
            recv_matching(stream, limit, |m| *m == removal).await;
        }

        match recv_within(&mut waiting, limit).await {
            Some(Message::Assign(id)) => assert_eq!(id, left_id),
            other => panic!("Expected reused identity, got {:?}", other),
        }

        events.send(ServerMessage::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    /// A new peer learns about everyone, and everyone learns about the new peer
    #[tokio::test]
    async fn join_replays_existing_players() {
        let (addr, events, handle) = start_server(peers_only_config()).await;
        let limit = Duration::from_secs(2);

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(recv_within(&mut first, limit).await, Some(Message::Assign(0)));

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut view = ClientView::new();
        view.apply(recv_within(&mut second, limit).await.unwrap());
        assert_eq!(view.local_id(), Some(1));
        for _ in 0..2 {
            view.apply(recv_within(&mut second, limit).await.unwrap());
        }
        assert_eq!(view.state(), ViewState::Playing);
        assert!(view.player(0).unwrap().is_tagger);
        assert!(!view.player(1).unwrap().is_tagger);

        let announced = recv_matching(&mut first, limit, |m| {
            matches!(m, Message::State(p) if p.player_id == 1)
        })
        .await;
        match announced {
            Message::State(p) => assert_eq!((p.x, p.y), (600, 400)),
            other => panic!("Unexpected message: {:?}", other),
        }

        events.send(ServerMessage::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    /// Running into the tagger ends the round; the host restarts it
    #[tokio::test]
    async fn tag_ends_round_and_host_restarts() {
        let (addr, events, handle) = start_server(peers_only_config()).await;
        let limit = Duration::from_secs(2);

        let mut tagger = TcpStream::connect(addr).await.unwrap();
        assert_eq!(recv_within(&mut tagger, limit).await, Some(Message::Assign(0)));
        let mut runner = TcpStream::connect(addr).await.unwrap();
        assert_eq!(recv_within(&mut runner, limit).await, Some(Message::Assign(1)));

        // From x = 600 to overlapping the tagger at x = 200 takes about 125 moves.
        let step = Message::State(StatePacket::intent(1, Vec2::new(-1.0, 0.0)));
        for _ in 0..140 {
            write_frame(&mut runner, &step).await.unwrap();
        }

        let game_over = recv_matching(&mut tagger, limit, |m| {
            matches!(m, Message::State(p) if p.game_over)
        })
        .await;
        assert!(matches!(game_over, Message::State(p) if p.survival_millis < 2_000));

        let restart_limit = Duration::from_secs(5);
        let mut restarted: HashSet<PlayerId> = HashSet::new();
        let mut taggers = 0;
        while restarted.len() < 2 {
            if let Message::State(p) = recv_matching(&mut runner, restart_limit, |m| {
                matches!(m, Message::State(p) if p.restart)
            })
            .await
            {
                restarted.insert(p.player_id as PlayerId);
                taggers += usize::from(p.is_tagger);
            }
        }
        assert_eq!(taggers, 1);

        events.send(ServerMessage::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }
}

/// STRESS TESTS
mod stress_tests {
    use super::*;

    /// Garbage and rapid reconnects never leak identities
    #[tokio::test]
    async fn churn_does_not_leak_identities() {
        let (addr, events, handle) = start_server(peers_only_config()).await;
        let limit = Duration::from_secs(2);

        for round in 0..10 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let id = match recv_within(&mut stream, limit).await {
                Some(Message::Assign(id)) => id,
                other => panic!("Round {}: expected identity, got {:?}", round, other),
            };
            assert!((id as usize) < MAX_PLAYERS, "bad identity on round {}", round);

            // Unknown payloads are dropped without closing the connection.
            use tokio::io::AsyncWriteExt;
            stream.write_all(&[0, 0, 0, 2, 0xff, 0xfe]).await.unwrap();
            write_frame(
                &mut stream,
                &Message::State(StatePacket::intent(id, Vec2::new(1.0, 0.0))),
            )
            .await
            .unwrap();
            let moved_x = spawn_position(id).x as i32 + 3;
            recv_matching(&mut stream, limit, |m| {
                matches!(m, Message::State(p) if p.player_id == id as i32 && p.x == moved_x)
            })
            .await;
            drop(stream);

            // A leaked identity would eventually leave the next peer unassigned.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        events.send(ServerMessage::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }
}
