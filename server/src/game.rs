use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    bounds_intersect, check_collision, spawn_position, ControlMessage, Message, Pickup, Player,
    PlayerId, StatePacket, Vec2, Visibility, GAME_OVER_PAUSE_SECS, INVISIBILITY_SECS,
    PICKUP_COOLDOWN_SECS, SCREEN_HEIGHT, SCREEN_WIDTH,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Distance from the screen edges inside which pickups spawn.
const PICKUP_SPAWN_INSET: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Playing,
    GameOver,
}

/// A message the session wants delivered once the current call returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Broadcast {
        message: Message,
        exclude: Option<PlayerId>,
    },
    SendTo {
        player_id: PlayerId,
        message: Message,
    },
}

impl Outbound {
    fn broadcast(message: Message) -> Self {
        Outbound::Broadcast {
            message,
            exclude: None,
        }
    }

    fn send_to(player_id: PlayerId, message: Message) -> Self {
        Outbound::SendTo { player_id, message }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderablePlayer {
    pub id: PlayerId,
    pub position: Vec2,
    pub is_tagger: bool,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundView {
    pub state: RoundState,
    pub survival_text: String,
}

/// Everything a front-end needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub players: Vec<RenderablePlayer>,
    pub pickup: Option<Vec2>,
    pub round: RoundView,
}

#[derive(Debug, Clone)]
struct SpawnedPickup {
    pickup: Pickup,
    spawned_at: Instant,
}

/// Authoritative game state. Owned by the server loop; nothing else mutates it.
///
/// Every mutating call returns the messages it caused. The caller dispatches
/// them after the call, so state changes always precede their broadcasts.
#[derive(Debug)]
pub struct Session {
    players: BTreeMap<PlayerId, Player>,
    local_id: Option<PlayerId>,
    local_intent: Vec2,
    pickup: Option<SpawnedPickup>,
    round: RoundState,
    round_started: Instant,
    game_over_at: Option<Instant>,
    last_survival: Duration,
    invisibility_started: Option<Instant>,
    pickup_timer: Instant,
    rng: StdRng,
}

impl Session {
    pub fn new(now: Instant, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            players: BTreeMap::new(),
            local_id: None,
            local_intent: Vec2::ZERO,
            pickup: None,
            round: RoundState::Playing,
            round_started: now,
            game_over_at: None,
            last_survival: Duration::ZERO,
            invisibility_started: None,
            pickup_timer: now,
            rng,
        }
    }

    fn insert_player(&mut self, id: PlayerId, now: Instant) -> &Player {
        // The first player of an empty session is "it".
        let is_tagger = !self.players.values().any(|p| p.is_tagger);
        let player = Player::new(id, spawn_position(id), is_tagger);

        info!(
            "Added player {} at ({}, {}){}",
            id,
            player.position.x,
            player.position.y,
            if is_tagger { " as tagger" } else { "" }
        );
        self.round_started = now;
        self.players.entry(id).or_insert(player)
    }

    /// Creates the host's own player, driven by [`Session::set_local_intent`].
    pub fn add_host_player(&mut self, id: PlayerId, now: Instant) {
        self.insert_player(id, now);
        self.local_id = Some(id);
    }

    /// Creates a peer's player and brings the new peer up to date: its
    /// identity, the current pickup and every player's state. The other
    /// peers receive the new player's state.
    pub fn add_peer(&mut self, id: PlayerId, now: Instant) -> Vec<Outbound> {
        let joined = StatePacket::position(self.insert_player(id, now));

        let mut out = vec![Outbound::send_to(id, Message::Assign(id))];
        if let Some(spawned) = &self.pickup {
            out.push(Outbound::send_to(
                id,
                Message::Control(ControlMessage::pickup_spawned(&spawned.pickup)),
            ));
        }
        for player in self.players.values() {
            out.push(Outbound::send_to(
                id,
                Message::State(StatePacket::position(player)),
            ));
        }
        out.push(Outbound::Broadcast {
            message: Message::State(joined),
            exclude: Some(id),
        });
        out
    }

    /// Drops a departed player. Removing an absent player does nothing.
    pub fn remove_player(&mut self, id: PlayerId, now: Instant) -> Vec<Outbound> {
        let Some(removed) = self.players.remove(&id) else {
            return Vec::new();
        };
        info!("Removing player ID: {}", id);

        let mut out = vec![Outbound::broadcast(Message::Control(ControlMessage::Remove {
            player_id: id,
        }))];

        if removed.is_tagger && !self.players.is_empty() && self.round == RoundState::Playing {
            info!("Tagger {} left, starting a new round", id);
            self.reset_game(now, &mut out);
        }
        out
    }

    pub fn set_local_intent(&mut self, intent: Vec2) {
        self.local_intent = intent;
    }

    /// Applies one movement packet from a peer and relays the new position.
    pub fn apply_remote_movement(&mut self, id: PlayerId, intent: Vec2) -> Vec<Outbound> {
        if self.round != RoundState::Playing || Some(id) == self.local_id {
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(player) = self.players.get_mut(&id) {
            Self::move_player(player, intent, &mut out);
        }
        out
    }

    fn move_player(player: &mut Player, intent: Vec2, out: &mut Vec<Outbound>) {
        if player.move_by(intent) {
            debug!(
                "Player {} wrapped to ({}, {})",
                player.id, player.position.x, player.position.y
            );
        }
        out.push(Outbound::broadcast(Message::State(StatePacket::position(
            player,
        ))));
    }

    /// Advances the simulation by one tick.
    pub fn simulate_tick(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();

        match self.round {
            RoundState::Playing => {
                self.apply_local_movement(&mut out);
                self.check_tag_collisions(now, &mut out);

                if self.round == RoundState::Playing {
                    self.handle_pickup_spawn(now, &mut out);
                    self.handle_pickup_collision(now, &mut out);
                    self.handle_invisibility_effect(now, &mut out);
                }
            }
            RoundState::GameOver => {
                let pause = Duration::from_secs_f32(GAME_OVER_PAUSE_SECS);
                if self
                    .game_over_at
                    .map_or(true, |at| now.duration_since(at) >= pause)
                {
                    self.reset_game(now, &mut out);
                }
            }
        }

        out
    }

    fn apply_local_movement(&mut self, out: &mut Vec<Outbound>) {
        if self.local_intent == Vec2::ZERO {
            return;
        }
        let intent = self.local_intent;
        if let Some(player) = self.local_id.and_then(|id| self.players.get_mut(&id)) {
            Self::move_player(player, intent, out);
        }
    }

    fn check_tag_collisions(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let taggers: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.is_tagger)
            .map(|p| p.id)
            .collect();

        for tagger_id in taggers {
            let tagged: Vec<PlayerId> = {
                let tagger = &self.players[&tagger_id];
                self.players
                    .values()
                    .filter(|other| other.id != tagger_id && check_collision(tagger, other))
                    .map(|other| other.id)
                    .collect()
            };

            for other_id in tagged {
                // Later pairs in the same tick see GameOver and change nothing.
                if self.round == RoundState::Playing {
                    info!("Player {} tagged player {}", tagger_id, other_id);
                    self.enter_game_over(now, out);
                }
            }
        }
    }

    fn enter_game_over(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        self.round = RoundState::GameOver;
        self.game_over_at = Some(now);
        self.last_survival = now.duration_since(self.round_started);

        for player in self.players.values_mut() {
            player.visibility = Visibility::Visible;
            out.push(Outbound::broadcast(Message::Control(ControlMessage::Invis {
                player_id: player.id,
                reset: true,
            })));
        }

        info!(
            "Game over! Red lasted {:.2} seconds",
            self.last_survival.as_secs_f32()
        );
        out.push(Outbound::broadcast(Message::State(StatePacket::game_over(
            self.last_survival,
        ))));
    }

    /// Starts a new round: random tagger, everyone back on their spawn slot.
    pub fn reset_game(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        if !self.players.is_empty() {
            let tagger_index = self.rng.gen_range(0..self.players.len());
            for (index, player) in self.players.values_mut().enumerate() {
                player.position = spawn_position(player.id);
                player.is_tagger = index == tagger_index;
                player.visibility = Visibility::Visible;
                out.push(Outbound::broadcast(Message::State(StatePacket::restart(
                    player,
                ))));
            }
        }

        self.round_started = now;
        self.game_over_at = None;
        self.last_survival = Duration::ZERO;
        self.invisibility_started = None;
        self.pickup_timer = now;
        self.pickup = None;
        self.round = RoundState::Playing;
        info!("Round restarted with {} players", self.players.len());
    }

    fn handle_pickup_spawn(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        if self.pickup.is_some() || self.invisibility_started.is_some() {
            return;
        }
        if now.duration_since(self.pickup_timer).as_secs_f32() <= PICKUP_COOLDOWN_SECS {
            return;
        }

        let x = self
            .rng
            .gen_range(PICKUP_SPAWN_INSET..SCREEN_WIDTH as i32 - PICKUP_SPAWN_INSET);
        let y = self
            .rng
            .gen_range(PICKUP_SPAWN_INSET..SCREEN_HEIGHT as i32 - PICKUP_SPAWN_INSET);
        let pickup = Pickup::new(Vec2::new(x as f32, y as f32));

        debug!("Pickup spawned at ({}, {})", x, y);
        out.push(Outbound::broadcast(Message::Control(
            ControlMessage::pickup_spawned(&pickup),
        )));
        self.pickup = Some(SpawnedPickup {
            pickup,
            spawned_at: now,
        });
    }

    fn handle_pickup_collision(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let Some(spawned) = &self.pickup else {
            return;
        };
        let pickup_bounds = spawned.pickup.get_bounds();

        let Some(player) = self
            .players
            .values_mut()
            .find(|p| bounds_intersect(p.get_bounds(), pickup_bounds))
        else {
            return;
        };

        player.visibility = if Some(player.id) == self.local_id {
            Visibility::Dimmed
        } else {
            Visibility::Hidden
        };
        info!(
            "Player {} collected the pickup after {:.2}s",
            player.id,
            now.duration_since(spawned.spawned_at).as_secs_f32()
        );
        out.push(Outbound::broadcast(Message::Control(ControlMessage::Invis {
            player_id: player.id,
            reset: false,
        })));

        self.invisibility_started = Some(now);
        self.pickup = None;
    }

    fn handle_invisibility_effect(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let Some(started) = self.invisibility_started else {
            return;
        };
        if now.duration_since(started).as_secs_f32() <= INVISIBILITY_SECS {
            return;
        }

        for player in self.players.values_mut() {
            player.visibility = Visibility::Visible;
            out.push(Outbound::broadcast(Message::Control(ControlMessage::Invis {
                player_id: player.id,
                reset: true,
            })));
        }
        self.invisibility_started = None;
        self.pickup_timer = now;
    }

    pub fn round(&self) -> RoundState {
        self.round
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn pickup(&self) -> Option<&Pickup> {
        self.pickup.as_ref().map(|spawned| &spawned.pickup)
    }

    pub fn is_invisibility_active(&self) -> bool {
        self.invisibility_started.is_some()
    }

    pub fn renderable_players(&self) -> Vec<RenderablePlayer> {
        self.players
            .values()
            .map(|p| RenderablePlayer {
                id: p.id,
                position: p.position,
                is_tagger: p.is_tagger,
                visibility: p.visibility,
            })
            .collect()
    }

    pub fn pickup_renderable(&self) -> Option<Vec2> {
        self.pickup().map(|pickup| pickup.position)
    }

    /// Round state plus survival time: live while playing, frozen at game over.
    pub fn round_state(&self, now: Instant) -> RoundView {
        let survival = match self.round {
            RoundState::Playing => now.duration_since(self.round_started),
            RoundState::GameOver => self.last_survival,
        };
        RoundView {
            state: self.round,
            survival_text: format!("{:.2}", survival.as_secs_f32()),
        }
    }

    pub fn snapshot(&self, now: Instant) -> RenderSnapshot {
        RenderSnapshot {
            players: self.renderable_players(),
            pickup: self.pickup_renderable(),
            round: self.round_state(now),
        }
    }
}
