//! # Tag Game Client Library
//!
//! This library provides a headless peer for the multiplayer tag game. It
//! connects to the host over TCP, mirrors the session from the host's
//! messages and drives its own player with generated movement.
//!
//! ## Architecture Overview
//!
//! The host is authoritative. The client never simulates anything itself: it
//! sends a movement intent every tick while a round is running and applies
//! whatever positions, visibility changes and round transitions the host
//! reports.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The client's view of the session:
//! - Identity assignment and player bookkeeping (at most three players)
//! - Round state: waiting for our own player, playing, game over
//! - Pickup and invisibility display state
//!
//! ### Input Module (`input`)
//! The autopilot that stands in for keyboard input.
//!
//! ### Network Module (`network`)
//! The connection to the host: a receive task decoding frames and a tick
//! loop sending movement.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect at 60 ticks per second with a random autopilot
//!     let client = Client::connect("127.0.0.1:53000", 60, None).await?;
//!
//!     // Runs until the host closes the connection
//!     let view = client.run().await?;
//!     println!("Last state: {:?}", view.state());
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
