use serde::{Deserialize, Serialize};

pub mod framing;
pub mod protocol;

pub use protocol::{ControlMessage, Message, ProtocolError, StatePacket};

pub const SCREEN_WIDTH: f32 = 1200.0;
pub const SCREEN_HEIGHT: f32 = 700.0;
pub const PLAYER_RADIUS: f32 = 15.0;
pub const PICKUP_RADIUS: f32 = 5.0;
/// Distance moved per tick for a unit intent.
pub const MOVE_SPEED: f32 = 3.0;
/// How far past an edge a player may travel before wrapping.
pub const WRAP_MARGIN: f32 = 60.0;
pub const MAX_PLAYERS: usize = 3;
pub const DEFAULT_PORT: u16 = 53000;

pub const PICKUP_COOLDOWN_SECS: f32 = 3.0;
pub const INVISIBILITY_SECS: f32 = 1.5;
pub const GAME_OVER_PAUSE_SECS: f32 = 3.0;

/// Spawn slot for each identity.
pub const SPAWN_POSITIONS: [Vec2; MAX_PLAYERS] = [
    Vec2 { x: 200.0, y: 400.0 },
    Vec2 { x: 600.0, y: 400.0 },
    Vec2 { x: 500.0, y: 200.0 },
];

/// Identity slot a player occupies, in `0..MAX_PLAYERS`.
pub type PlayerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scale(&self, scalar: f32) -> Vec2 {
        Vec2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

/// Spawn slot for an identity. Identities outside the table fall back to the first slot.
pub fn spawn_position(id: PlayerId) -> Vec2 {
    SPAWN_POSITIONS
        .get(id as usize)
        .copied()
        .unwrap_or(SPAWN_POSITIONS[0])
}

/// How a player is drawn from the viewer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Visible,
    /// The viewer's own player while invisible: drawn translucent.
    Dimmed,
    /// Someone else's player while invisible.
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub position: Vec2,
    pub is_tagger: bool,
    pub visibility: Visibility,
}

impl Player {
    pub fn new(id: PlayerId, position: Vec2, is_tagger: bool) -> Self {
        Self {
            id,
            position,
            is_tagger,
            visibility: Visibility::Visible,
        }
    }

    /// Axis-aligned box around the player's circle, as (left, top, right, bottom).
    pub fn get_bounds(&self) -> (f32, f32, f32, f32) {
        bounds_around(self.position, PLAYER_RADIUS)
    }

    /// Moves by `intent` scaled by the fixed speed, then wraps.
    /// Returns true if the move wrapped the player to the opposite edge.
    pub fn move_by(&mut self, intent: Vec2) -> bool {
        self.position = self.position.add(&intent.scale(MOVE_SPEED));
        let (wrapped, did_wrap) = wrap_position(self.position);
        self.position = wrapped;
        did_wrap
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub position: Vec2,
}

impl Pickup {
    pub fn new(position: Vec2) -> Self {
        Self { position }
    }

    pub fn get_bounds(&self) -> (f32, f32, f32, f32) {
        bounds_around(self.position, PICKUP_RADIUS)
    }
}

fn bounds_around(center: Vec2, radius: f32) -> (f32, f32, f32, f32) {
    (
        center.x - radius,
        center.y - radius,
        center.x + radius,
        center.y + radius,
    )
}

/// Strict overlap test: boxes that only touch do not intersect.
pub fn bounds_intersect(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> bool {
    let (x1, y1, x2, y2) = a;
    let (x3, y3, x4, y4) = b;

    !(x2 <= x3 || x4 <= x1 || y2 <= y3 || y4 <= y1)
}

pub fn check_collision(player1: &Player, player2: &Player) -> bool {
    bounds_intersect(player1.get_bounds(), player2.get_bounds())
}

/// Moves a position that left the play area by more than the margin to just
/// past the opposite edge. Positions inside the wrapped area are returned as is.
pub fn wrap_position(position: Vec2) -> (Vec2, bool) {
    let mut wrapped = position;

    if position.x < -WRAP_MARGIN {
        wrapped.x = SCREEN_WIDTH + WRAP_MARGIN;
    } else if position.x > SCREEN_WIDTH + WRAP_MARGIN {
        wrapped.x = -WRAP_MARGIN;
    }

    if position.y < -WRAP_MARGIN {
        wrapped.y = SCREEN_HEIGHT + WRAP_MARGIN;
    } else if position.y > SCREEN_HEIGHT + WRAP_MARGIN {
        wrapped.y = -WRAP_MARGIN;
    }

    (wrapped, wrapped != position)
}
