use crate::game::{ClientView, ViewState};
use crate::input::Autopilot;
use log::{error, info, warn};
use shared::framing::{read_frame, write_frame};
use shared::Message;
use std::io;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// A peer connected to the host.
pub struct Client {
    stream: TcpStream,
    view: ClientView,
    autopilot: Autopilot,
    tick_duration: Duration,
}

impl Client {
    pub async fn connect(
        server_addr: &str,
        tick_rate: u32,
        seed: Option<u64>,
    ) -> io::Result<Self> {
        info!("Connecting to {}...", server_addr);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", stream.peer_addr()?);

        Ok(Client {
            stream,
            view: ClientView::new(),
            autopilot: Autopilot::new(seed),
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
        })
    }

    pub fn view(&self) -> &ClientView {
        &self.view
    }

    /// Spawns task that decodes frames from the host. The channel closes when
    /// the host goes away.
    fn spawn_receiver(mut reader: OwnedReadHalf) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(payload)) => match Message::decode(&payload) {
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed message: {}", e),
                    },
                    Ok(None) => {
                        info!("Host closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!("Error receiving from host: {}", e);
                        break;
                    }
                }
            }
        });

        rx
    }

    /// Plays until the host disconnects. Sends one movement packet per tick
    /// while a round is running.
    pub async fn run(self) -> io::Result<ClientView> {
        let Client {
            stream,
            mut view,
            mut autopilot,
            tick_duration,
        } = self;
        let (reader, mut writer) = stream.into_split();
        let mut inbound = Self::spawn_receiver(reader);

        let mut input_interval = interval(tick_duration);
        input_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_state = view.state();

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    match message {
                        Some(message) => view.apply(message),
                        None => break,
                    }

                    if view.state() != last_state {
                        info!("Round state: {:?}", view.state());
                        last_state = view.state();
                    }
                },

                _ = input_interval.tick() => {
                    if view.state() == ViewState::Playing {
                        let intent = autopilot.next_intent();
                        if let Some(packet) = view.intent_packet(intent) {
                            write_frame(&mut writer, &Message::State(packet)).await?;
                        }
                    }
                },
            }
        }

        Ok(view)
    }
}
