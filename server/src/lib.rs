//! # Tag Game Server Library
//!
//! This library provides the authoritative host for the multiplayer tag game.
//! The host owns the canonical game state, accepts up to three peers over TCP,
//! applies their movement and tells every peer what happened.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Tag detection, pickup spawning, invisibility and round resets are decided
//! here only. Peers send movement intents and draw whatever the host reports.
//!
//! ### Identity Management
//! Each peer receives one of a fixed set of identities on connect. When the
//! set is exhausted the host stops accepting until someone leaves, and the
//! freed identity goes to the next connection.
//!
//! ### State Broadcasting
//! Every change to a player, the pickup or the round is broadcast to all
//! peers in the order it happened, so peers converge on the host's view.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! One task owns the [`game::Session`] and the connection registry. Accept,
//! read and write tasks talk to it only through an event channel, which
//! removes any need to lock game state. The loop `select!`s between those
//! events and a fixed-rate tick.
//!
//! ### TCP Framing
//! Every message travels in a length-prefixed frame (see
//! [`shared::framing`]), so coalesced or split reads never confuse message
//! boundaries.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The round state machine: movement, tag collisions, the pickup lifecycle
//! and resets. Pure logic with explicit time, unit-tested without sockets.
//!
//! ### Identity Module (`identity`)
//! The identity pool and the gate the accept task waits on.
//!
//! ### Connection Module (`connection`)
//! Accept, reader and writer tasks for peer sockets, including the idle
//! timeout.
//!
//! ### Broadcast Module (`broadcast`)
//! Registry of live connections and fan-out of encoded frames.
//!
//! ### Network Module (`network`)
//! The [`network::Server`] event loop tying the above together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Render snapshots for a front-end, published after every tick
//!     let _snapshots = server.subscribe();
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod game;
pub mod identity;
pub mod network;
