//! Per-connection tasks
//!
//! The accept task holds a free identity before it accepts, so a full session
//! leaves new connections waiting in the listen backlog. Each accepted stream
//! is split into a reader task and a writer task. Both report to the server
//! loop through its event channel and never touch the session.

use crate::broadcast::{ConnectionId, OUTBOUND_QUEUE_FRAMES};
use crate::error::ServerError;
use crate::identity::IdentityGate;
use crate::network::ServerMessage;
use log::{debug, error, info, warn};
use shared::framing::read_frame;
use shared::{Message, PlayerId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// Accepts peers for as long as the server loop is listening.
pub async fn accept_loop(
    listener: TcpListener,
    gate: Arc<IdentityGate>,
    events: mpsc::UnboundedSender<ServerMessage>,
    idle_timeout: Option<Duration>,
) {
    let mut next_conn_id: ConnectionId = 0;

    loop {
        let player_id = gate.acquire().await;

        let (stream, addr) = loop {
            match listener.accept().await {
                Ok(accepted) => break accepted,
                Err(e) => {
                    // The identity stays reserved for the next attempt.
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        };

        next_conn_id += 1;
        info!("New connection from {} as player {}", addr, player_id);

        if !spawn_connection(stream, addr, player_id, next_conn_id, &events, idle_timeout) {
            debug!("Server loop is gone, accept task exiting");
            gate.release(player_id);
            return;
        }
    }
}

/// Starts the reader and writer for one stream and registers it with the
/// loop. Returns false if the loop no longer receives events.
fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    player_id: PlayerId,
    conn_id: ConnectionId,
    events: &mpsc::UnboundedSender<ServerMessage>,
    idle_timeout: Option<Duration>,
) -> bool {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let (read_half, write_half) = stream.into_split();
    let (frame_tx, frame_rx) = mpsc::channel(OUTBOUND_QUEUE_FRAMES);
    let (start_tx, start_rx) = oneshot::channel();

    let reader = tokio::spawn(read_loop(
        read_half,
        player_id,
        conn_id,
        events.clone(),
        idle_timeout,
        start_rx,
    ));
    tokio::spawn(write_loop(
        write_half,
        frame_rx,
        player_id,
        conn_id,
        events.clone(),
    ));

    let connected = ServerMessage::Connected {
        player_id,
        conn_id,
        addr,
        sender: frame_tx,
        reader: reader.abort_handle(),
    };
    if events.send(connected).is_err() {
        reader.abort();
        return false;
    }

    // `Connected` is queued before anything this reader posts.
    let _ = start_tx.send(());
    true
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    player_id: PlayerId,
    conn_id: ConnectionId,
    events: mpsc::UnboundedSender<ServerMessage>,
    idle_timeout: Option<Duration>,
    start: oneshot::Receiver<()>,
) {
    if start.await.is_err() {
        return;
    }

    let cause = loop {
        let frame = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, read_frame(&mut reader)).await {
                Ok(result) => result,
                Err(_) => {
                    break ServerError::Connection {
                        player_id,
                        reason: format!("no data for {:.1}s", limit.as_secs_f32()),
                    }
                }
            },
            None => read_frame(&mut reader).await,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                break ServerError::Connection {
                    player_id,
                    reason: "closed by peer".to_string(),
                }
            }
            Err(e) => break ServerError::Io(e),
        };

        match Message::decode(&payload) {
            Ok(message) => {
                let inbound = ServerMessage::Inbound {
                    player_id,
                    conn_id,
                    message,
                };
                if events.send(inbound).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Dropping malformed message from player {}: {}", player_id, e),
        }
    };

    let _ = events.send(ServerMessage::Disconnected {
        player_id,
        conn_id,
        cause,
    });
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Vec<u8>>,
    player_id: PlayerId,
    conn_id: ConnectionId,
    events: mpsc::UnboundedSender<ServerMessage>,
) {
    while let Some(frame) = frames.recv().await {
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let _ = events.send(ServerMessage::Disconnected {
                player_id,
                conn_id,
                cause: ServerError::Io(e),
            });
            return;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::framing::write_frame;
    use shared::{ControlMessage, StatePacket};
    use tokio::io::AsyncReadExt;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn start(
        gate: Arc<IdentityGate>,
        idle_timeout: Option<Duration>,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<ServerMessage>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, gate, tx, idle_timeout));
        (addr, rx)
    }

    #[tokio::test]
    async fn test_connection_lifecycle_events() {
        let gate = Arc::new(IdentityGate::new(3));
        let (addr, mut rx) = start(Arc::clone(&gate), None).await;

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let sender = match next_event(&mut rx).await {
            ServerMessage::Connected {
                player_id,
                conn_id,
                sender,
                ..
            } => {
                assert_eq!(player_id, 0);
                assert_eq!(conn_id, 1);
                sender
            }
            other => panic!("Unexpected event: {:?}", other),
        };

        // Frames queued by the loop reach the peer.
        sender
            .try_send(shared::framing::encode_frame(&Message::Assign(0)).unwrap())
            .unwrap();
        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 4, 0, 0, 0, 0]);

        // Garbage is dropped, valid messages are forwarded.
        peer.write_all(&[0, 0, 0, 3, 1, 2, 3]).await.unwrap();
        let intent = Message::State(StatePacket::intent(0, shared::Vec2::new(1.0, 0.0)));
        write_frame(&mut peer, &intent).await.unwrap();
        match next_event(&mut rx).await {
            ServerMessage::Inbound { message, .. } => assert_eq!(message, intent),
            other => panic!("Unexpected event: {:?}", other),
        }

        drop(peer);
        match next_event(&mut rx).await {
            ServerMessage::Disconnected {
                player_id, conn_id, ..
            } => {
                assert_eq!(player_id, 0);
                assert_eq!(conn_id, 1);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_idle_peer_is_disconnected() {
        let gate = Arc::new(IdentityGate::new(1));
        let (addr, mut rx) = start(gate, Some(Duration::from_millis(100))).await;

        let _peer = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ServerMessage::Connected { .. }
        ));
        match next_event(&mut rx).await {
            ServerMessage::Disconnected { cause, .. } => {
                assert!(matches!(cause, ServerError::Connection { player_id: 0, .. }));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accept_waits_for_free_identity() {
        let gate = Arc::new(IdentityGate::new(1));
        let (addr, mut rx) = start(Arc::clone(&gate), None).await;

        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ServerMessage::Connected { player_id: 0, .. }
        ));

        let mut second = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut second,
            &Message::Control(ControlMessage::Remove { player_id: 0 }),
        )
        .await
        .unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(waited.is_err(), "second peer accepted while pool was empty");

        gate.release(0);
        match next_event(&mut rx).await {
            ServerMessage::Connected {
                player_id, conn_id, ..
            } => {
                assert_eq!(player_id, 0);
                assert_eq!(conn_id, 2);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        // Bytes sent while waiting are delivered once accepted.
        match next_event(&mut rx).await {
            ServerMessage::Inbound { message, .. } => assert_eq!(
                message,
                Message::Control(ControlMessage::Remove { player_id: 0 })
            ),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
