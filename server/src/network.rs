//! Server event loop coordinating connections and the game simulation

use crate::broadcast::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::config::ServerConfig;
use crate::connection::accept_loop;
use crate::error::{Result, ServerError};
use crate::game::{Outbound, RenderSnapshot, Session};
use crate::identity::IdentityGate;
use log::{debug, info, warn};
use shared::{Message, PlayerId, Vec2, MAX_PLAYERS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};

/// Events posted to the server loop by connection tasks and the embedding code.
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        player_id: PlayerId,
        conn_id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::Sender<Vec<u8>>,
        reader: AbortHandle,
    },
    Inbound {
        player_id: PlayerId,
        conn_id: ConnectionId,
        message: Message,
    },
    Disconnected {
        player_id: PlayerId,
        conn_id: ConnectionId,
        cause: ServerError,
    },
    /// Movement intent for the host's own player.
    LocalIntent(Vec2),
    Shutdown,
}

/// Aborts a background task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Authoritative host: owns the session and every connection.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    gate: Arc<IdentityGate>,
    session: Session,
    connections: ConnectionRegistry,
    tick_duration: Duration,
    idle_timeout: Option<Duration>,
    tick: u64,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    snapshot_tx: watch::Sender<RenderSnapshot>,
}

impl Server {
    /// Binds the listener and prepares the session. The host's own player
    /// takes the first identity unless `host_player` is off.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bootstrap {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let now = Instant::now();
        let gate = Arc::new(IdentityGate::new(MAX_PLAYERS));
        let mut session = Session::new(now, config.seed);
        if config.host_player {
            let id = gate.try_allocate()?;
            session.add_host_player(id, now);
        }

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(session.snapshot(now));

        Ok(Server {
            listener: Some(listener),
            local_addr,
            gate,
            session,
            connections: ConnectionRegistry::new(),
            tick_duration: config.tick_duration(),
            idle_timeout: config.idle_timeout(),
            tick: 0,
            server_tx,
            server_rx,
            snapshot_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Channel for [`ServerMessage::LocalIntent`] and [`ServerMessage::Shutdown`].
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Snapshot published after every tick.
    pub fn subscribe(&self) -> watch::Receiver<RenderSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Main server loop. Returns after a [`ServerMessage::Shutdown`].
    pub async fn run(mut self) -> Result<()> {
        let _accept = self.listener.take().map(|listener| {
            TaskGuard(tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.gate),
                self.server_tx.clone(),
                self.idle_timeout,
            )))
        });

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.run_tick(now);

                    if self.tick % 60 == 0 {
                        debug!(
                            "Tick {}: {} peers, {:.1}Hz, {} free identities",
                            self.tick,
                            self.connections.len(),
                            1.0 / dt.max(f32::EPSILON),
                            self.open_slots()
                        );
                    }
                },
            }
        }

        Ok(())
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected {
                player_id,
                conn_id,
                addr,
                sender,
                reader,
            } => {
                info!("Assigned ID: {} to {}", player_id, addr);
                self.connections.register(
                    player_id,
                    ConnectionHandle {
                        conn_id,
                        addr,
                        sender,
                        reader: Some(reader),
                    },
                );
                let outbound = self.session.add_peer(player_id, Instant::now());
                self.dispatch(outbound);
            }

            ServerMessage::Inbound {
                player_id,
                conn_id,
                message,
            } => {
                if !self.connections.is_current(player_id, conn_id) {
                    debug!("Ignoring message from stale connection {}", conn_id);
                    return;
                }
                self.handle_inbound(player_id, message);
            }

            ServerMessage::Disconnected {
                player_id,
                conn_id,
                cause,
            } => {
                if self.connections.unregister(player_id, conn_id) {
                    info!("Player {} disconnected: {}", player_id, cause);
                    self.drop_player(player_id);
                } else {
                    debug!(
                        "Ignoring repeated disconnect of connection {} ({})",
                        conn_id, cause
                    );
                }
            }

            ServerMessage::LocalIntent(intent) => self.session.set_local_intent(intent),

            ServerMessage::Shutdown => {}
        }
    }

    fn handle_inbound(&mut self, player_id: PlayerId, message: Message) {
        match message {
            Message::State(packet) => {
                if packet.player_id != player_id as i32 {
                    debug!(
                        "Player {} sent movement tagged as {}; applying to sender",
                        player_id, packet.player_id
                    );
                }
                let outbound = self
                    .session
                    .apply_remote_movement(player_id, packet.vector());
                self.dispatch(outbound);
            }
            other => debug!("Ignoring {:?} from player {}", other, player_id),
        }
    }

    fn run_tick(&mut self, now: Instant) {
        let outbound = self.session.simulate_tick(now);
        self.dispatch(outbound);
        self.snapshot_tx.send_replace(self.session.snapshot(now));
        self.tick += 1;
    }

    /// Player slots not taken by the host or a connected peer. The accept task
    /// holds a reserved identity while it waits, so the gate's count runs one
    /// lower than this.
    fn open_slots(&self) -> usize {
        MAX_PLAYERS.saturating_sub(self.session.player_count())
    }

    /// Removes a player whose connection is already unregistered.
    fn drop_player(&mut self, player_id: PlayerId) {
        let outbound = self.session.remove_player(player_id, Instant::now());
        self.gate.release(player_id);
        self.dispatch(outbound);
    }

    /// Sends session output. A peer that cannot be reached is torn down the
    /// same way as one that disconnected, and its removal is sent in turn.
    fn dispatch(&mut self, outbound: Vec<Outbound>) {
        let mut pending = outbound;

        while !pending.is_empty() {
            let failed = self.connections.dispatch(std::mem::take(&mut pending));

            for player_id in failed {
                let Some(conn_id) = self.connections.conn_id(player_id) else {
                    continue;
                };
                warn!("Send to player {} failed, dropping connection", player_id);
                self.connections.unregister(player_id, conn_id);
                pending.extend(self.session.remove_player(player_id, Instant::now()));
                self.gate.release(player_id);
            }
        }
    }
}
