use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::game::RoundState;
use server::network::{Server, ServerMessage};

/// Parses command-line arguments, binds the host and runs it until Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();
    info!(
        "Starting server on {} at {}Hz (host player: {})",
        config.address(),
        config.tick_rate,
        config.host_player
    );

    let server = Server::bind(config).await?;
    let events = server.sender();
    let mut snapshots = server.subscribe();

    // Announce round results since there is no window to show them in.
    tokio::spawn(async move {
        let mut last = RoundState::Playing;
        while snapshots.changed().await.is_ok() {
            let round = snapshots.borrow_and_update().round.clone();
            if round.state != last {
                if round.state == RoundState::GameOver {
                    info!("Game Over! Red lasted {} seconds", round.survival_text);
                }
                last = round.state;
            }
        }
    });

    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = events.send(ServerMessage::Shutdown);
        }
    }

    Ok(())
}
