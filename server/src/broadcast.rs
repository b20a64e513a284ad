//! Fan-out of session messages to connected peers
//!
//! Each peer has a writer task draining a bounded queue of encoded frames.
//! The registry maps identities to those queues. A peer whose queue is full
//! has stopped reading and is reported as unreachable, the same as a closed
//! one. A message is encoded once and
//! the same bytes are queued for every recipient, so every peer observes
//! broadcasts in the order the session produced them.

use crate::game::Outbound;
use log::{debug, error, warn};
use shared::framing::encode_frame;
use shared::{Message, PlayerId};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;

/// Frames a peer may have outstanding before it counts as unreachable.
pub const OUTBOUND_QUEUE_FRAMES: usize = 256;

/// Distinguishes successive connections that held the same identity.
pub type ConnectionId = u64;

/// The loop's handle on one live peer connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub conn_id: ConnectionId,
    pub addr: SocketAddr,
    pub sender: mpsc::Sender<Vec<u8>>,
    /// Aborts the reader task on teardown.
    pub reader: Option<AbortHandle>,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        // Dropping the sender ends the writer task once its queue drains.
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: HashMap<PlayerId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, player_id: PlayerId, handle: ConnectionHandle) {
        debug!(
            "Registered connection {} from {} as player {}",
            handle.conn_id, handle.addr, player_id
        );
        if let Some(previous) = self.peers.insert(player_id, handle) {
            warn!(
                "Player {} was still registered to connection {}; replacing it",
                player_id, previous.conn_id
            );
        }
    }

    /// Removes the peer if `conn_id` still owns `player_id`. Returns false for
    /// stale or repeated teardown requests.
    pub fn unregister(&mut self, player_id: PlayerId, conn_id: ConnectionId) -> bool {
        match self.peers.get(&player_id) {
            Some(handle) if handle.conn_id == conn_id => {}
            _ => return false,
        }
        self.peers.remove(&player_id);
        debug!("Unregistered connection {} for player {}", conn_id, player_id);
        true
    }

    /// Whether `conn_id` is the live connection for `player_id`.
    pub fn is_current(&self, player_id: PlayerId, conn_id: ConnectionId) -> bool {
        self.peers
            .get(&player_id)
            .is_some_and(|handle| handle.conn_id == conn_id)
    }

    pub fn conn_id(&self, player_id: PlayerId) -> Option<ConnectionId> {
        self.peers.get(&player_id).map(|handle| handle.conn_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queues one frame for a single peer. Returns false if the peer is gone
    /// or its queue is full.
    pub fn send_to(&self, player_id: PlayerId, message: &Message) -> bool {
        let Some(frame) = Self::encode(message) else {
            return true;
        };
        self.queue(player_id, frame)
    }

    /// Queues one frame for every peer except `exclude`. Returns the peers
    /// whose queues were closed or full.
    pub fn broadcast(&self, message: &Message, exclude: Option<PlayerId>) -> Vec<PlayerId> {
        let Some(frame) = Self::encode(message) else {
            return Vec::new();
        };

        let mut ids: Vec<PlayerId> = self.peers.keys().copied().collect();
        ids.sort_unstable();

        ids.into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| !self.queue(*id, frame.clone()))
            .collect()
    }

    /// Delivers everything a session call produced, in order. Returns the
    /// peers that could not be reached, each listed once.
    pub fn dispatch(&self, outbound: Vec<Outbound>) -> Vec<PlayerId> {
        let mut failed: Vec<PlayerId> = Vec::new();

        for item in outbound {
            let unreachable = match item {
                Outbound::Broadcast { message, exclude } => self.broadcast(&message, exclude),
                Outbound::SendTo { player_id, message } => {
                    if self.send_to(player_id, &message) {
                        Vec::new()
                    } else {
                        vec![player_id]
                    }
                }
            };
            for id in unreachable {
                if !failed.contains(&id) {
                    failed.push(id);
                }
            }
        }

        failed
    }

    fn encode(message: &Message) -> Option<Vec<u8>> {
        match encode_frame(message) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Failed to encode {:?}: {}", message, e);
                None
            }
        }
    }

    fn queue(&self, player_id: PlayerId, frame: Vec<u8>) -> bool {
        match self.peers.get(&player_id) {
            Some(handle) => match handle.sender.try_send(frame) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue for player {} is full ({} frames)",
                        player_id, OUTBOUND_QUEUE_FRAMES
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            },
            None => {
                debug!("Dropping message for unregistered player {}", player_id);
                false
            }
        }
    }
}
