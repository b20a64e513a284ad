use log::{debug, info};
use shared::{
    ControlMessage, Message, Player, PlayerId, StatePacket, Vec2, Visibility, MAX_PLAYERS,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Connected but our own player has not been announced yet.
    Waiting,
    Playing,
    GameOver,
}

/// A peer's picture of the session, built purely from what the host sends.
#[derive(Debug, Clone)]
pub struct ClientView {
    local_id: Option<PlayerId>,
    players: BTreeMap<PlayerId, Player>,
    pickup: Option<Vec2>,
    state: ViewState,
    game_over_text: Option<String>,
}

impl ClientView {
    pub fn new() -> Self {
        Self {
            local_id: None,
            players: BTreeMap::new(),
            pickup: None,
            state: ViewState::Waiting,
            game_over_text: None,
        }
    }

    pub fn apply(&mut self, message: Message) {
        match message {
            Message::Assign(id) => {
                info!("Assigned ID: {}", id);
                self.local_id = Some(id);
            }
            Message::State(packet) => self.apply_state(packet),
            Message::Control(control) => self.apply_control(control),
        }
    }

    fn apply_state(&mut self, packet: StatePacket) {
        if packet.game_over {
            let text = format!("Game Over! Red lasted {} seconds", packet.survival_text());
            info!("{}", text);
            self.game_over_text = Some(text);
            self.state = ViewState::GameOver;
            return;
        }

        let Ok(id) = PlayerId::try_from(packet.player_id) else {
            debug!("Ignoring state for invalid player {}", packet.player_id);
            return;
        };

        if !self.players.contains_key(&id) {
            if self.players.len() >= MAX_PLAYERS {
                debug!("Ignoring state for player {}: view is full", id);
                return;
            }
            self.players
                .insert(id, Player::new(id, packet.vector(), packet.is_tagger));
            if Some(id) == self.local_id && self.state == ViewState::Waiting {
                self.state = ViewState::Playing;
            }
        }

        if let Some(player) = self.players.get_mut(&id) {
            player.position = packet.vector();
            player.is_tagger = packet.is_tagger;
            if packet.restart {
                player.visibility = Visibility::Visible;
            }
        }

        if packet.restart {
            self.state = ViewState::Playing;
            self.game_over_text = None;
            self.pickup = None;
        }
    }

    fn apply_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::Remove { player_id } => {
                if self.players.remove(&player_id).is_some() {
                    info!("Player {} left", player_id);
                }
            }
            ControlMessage::PickUp { x, y } => {
                self.pickup = Some(Vec2::new(x as f32, y as f32));
            }
            ControlMessage::Invis { player_id, reset } => {
                let local = Some(player_id) == self.local_id;
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.visibility = match (reset, local) {
                        (true, _) => Visibility::Visible,
                        (false, true) => Visibility::Dimmed,
                        (false, false) => Visibility::Hidden,
                    };
                }
                if !reset {
                    self.pickup = None;
                }
            }
        }
    }

    /// Movement packet for this tick, if we are in a round.
    pub fn intent_packet(&self, intent: Vec2) -> Option<StatePacket> {
        match (self.state, self.local_id) {
            (ViewState::Playing, Some(id)) => Some(StatePacket::intent(id, intent)),
            _ => None,
        }
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn pickup(&self) -> Option<Vec2> {
        self.pickup
    }

    pub fn game_over_text(&self) -> Option<&str> {
        self.game_over_text.as_deref()
    }
}

impl Default for ClientView {
    fn default() -> Self {
        Self::new()
    }
}
