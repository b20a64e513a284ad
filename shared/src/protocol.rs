//! Message taxonomy exchanged between host and peers.
//!
//! Every message travels inside one length-prefixed frame (see [`crate::framing`]).
//! Inside the frame the payload is one of:
//!
//! | payload | size | meaning |
//! |---------|------|---------|
//! | `i32` (bincode, little-endian) | 4 bytes | identity assigned to a new peer |
//! | [`StatePacket`] (bincode, fixed-width) | 19 bytes | player state, game over or restart |
//! | ASCII `Tag: a,b` line | variable | [`ControlMessage`] |
//!
//! Decoding classifies by leading tag first, then by exact binary size.
//! Anything else is reported as [`ProtocolError::UnknownMessage`] and the
//! caller drops it without closing the connection.

use crate::{Pickup, Player, PlayerId, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Encoded size of an identity assignment.
pub const ASSIGN_SIZE: usize = 4;
/// Encoded size of a [`StatePacket`]: three flags, three `i32` and one `u32`.
pub const STATE_PACKET_SIZE: usize = 19;

const REMOVE_TAG: &str = "Remove";
const INVIS_TAG: &str = "Invis";
const PICKUP_TAG: &str = "PickUp";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unrecognised message of {len} bytes")]
    UnknownMessage { len: usize },

    #[error("malformed control message {line:?}: {reason}")]
    BadControl { line: String, reason: &'static str },

    #[error("malformed state packet: {0}")]
    BadState(String),

    #[error("encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}

/// Fixed-size binary record for player state and round transitions.
///
/// When the host sends it, `x`/`y` carry the player's authoritative position.
/// When a peer sends it, they carry the peer's movement intent for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatePacket {
    pub game_over: bool,
    pub restart: bool,
    pub is_tagger: bool,
    pub player_id: i32,
    pub x: i32,
    pub y: i32,
    /// How long the round lasted. Only meaningful when `game_over` is set.
    pub survival_millis: u32,
}

impl StatePacket {
    /// Authoritative position update for one player.
    pub fn position(player: &Player) -> Self {
        Self {
            is_tagger: player.is_tagger,
            player_id: player.id as i32,
            x: player.position.x as i32,
            y: player.position.y as i32,
            ..Self::default()
        }
    }

    /// Per-player message sent when a new round starts.
    pub fn restart(player: &Player) -> Self {
        Self {
            restart: true,
            ..Self::position(player)
        }
    }

    pub fn game_over(survival: Duration) -> Self {
        Self {
            game_over: true,
            survival_millis: survival.as_millis().min(u32::MAX as u128) as u32,
            ..Self::default()
        }
    }

    /// Movement intent sent by a peer.
    pub fn intent(player_id: PlayerId, intent: Vec2) -> Self {
        Self {
            player_id: player_id as i32,
            x: intent.x as i32,
            y: intent.y as i32,
            ..Self::default()
        }
    }

    pub fn vector(&self) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32)
    }

    /// Survival time in seconds with two decimals, e.g. `"12.34"`.
    pub fn survival_text(&self) -> String {
        format!("{:.2}", self.survival_millis as f64 / 1000.0)
    }
}

/// Text control events, one per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// A player left the session.
    Remove { player_id: PlayerId },
    /// Visibility change. `reset` restores normal drawing, otherwise the
    /// player turns invisible.
    Invis { player_id: PlayerId, reset: bool },
    /// A pickup spawned at the given position.
    PickUp { x: i32, y: i32 },
}

impl ControlMessage {
    pub fn pickup_spawned(pickup: &Pickup) -> Self {
        ControlMessage::PickUp {
            x: pickup.position.x as i32,
            y: pickup.position.y as i32,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Remove { player_id } => write!(f, "{}: {}", REMOVE_TAG, player_id),
            ControlMessage::Invis { player_id, reset } => {
                write!(f, "{}: {},{}", INVIS_TAG, player_id, u8::from(*reset))
            }
            ControlMessage::PickUp { x, y } => write!(f, "{}: {},{}", PICKUP_TAG, x, y),
        }
    }
}

impl FromStr for ControlMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = |reason| ProtocolError::BadControl {
            line: line.to_string(),
            reason,
        };

        let (tag, payload) = line.split_once(':').ok_or_else(|| bad("missing ':'"))?;
        let fields: Vec<&str> = payload.split(',').map(str::trim).collect();

        match tag.trim() {
            REMOVE_TAG => match fields.as_slice() {
                [id] => Ok(ControlMessage::Remove {
                    player_id: id.parse().map_err(|_| bad("bad player id"))?,
                }),
                _ => Err(bad("expected one field")),
            },
            INVIS_TAG => match fields.as_slice() {
                [id, reset] => Ok(ControlMessage::Invis {
                    player_id: id.parse().map_err(|_| bad("bad player id"))?,
                    reset: match *reset {
                        "0" => false,
                        "1" => true,
                        _ => return Err(bad("reset flag must be 0 or 1")),
                    },
                }),
                _ => Err(bad("expected two fields")),
            },
            PICKUP_TAG => match fields.as_slice() {
                [x, y] => Ok(ControlMessage::PickUp {
                    x: x.parse().map_err(|_| bad("bad x"))?,
                    y: y.parse().map_err(|_| bad("bad y"))?,
                }),
                _ => Err(bad("expected two fields")),
            },
            _ => Err(bad("unknown tag")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Assign(PlayerId),
    State(StatePacket),
    Control(ControlMessage),
}

impl Message {
    /// Frame payload for this message. Never touches game state.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Message::Assign(id) => Ok(bincode::serialize(&(*id as i32))?),
            Message::State(packet) => Ok(bincode::serialize(packet)?),
            Message::Control(control) => Ok(control.to_string().into_bytes()),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if has_control_tag(payload) {
            let line = std::str::from_utf8(payload).map_err(|_| ProtocolError::BadControl {
                line: String::from_utf8_lossy(payload).into_owned(),
                reason: "not valid UTF-8",
            })?;
            return line.parse().map(Message::Control);
        }

        match payload.len() {
            STATE_PACKET_SIZE => {
                let packet: StatePacket = bincode::deserialize(payload)
                    .map_err(|e| ProtocolError::BadState(e.to_string()))?;
                Ok(Message::State(packet))
            }
            ASSIGN_SIZE => {
                let raw: i32 = bincode::deserialize(payload)
                    .map_err(|e| ProtocolError::BadState(e.to_string()))?;
                let id = PlayerId::try_from(raw)
                    .map_err(|_| ProtocolError::BadState(format!("negative identity {}", raw)))?;
                Ok(Message::Assign(id))
            }
            len => Err(ProtocolError::UnknownMessage { len }),
        }
    }
}

fn has_control_tag(payload: &[u8]) -> bool {
    [REMOVE_TAG, INVIS_TAG, PICKUP_TAG]
        .iter()
        .any(|tag| payload.starts_with(tag.as_bytes()))
}
