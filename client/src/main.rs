use clap::Parser;
use client::network::Client;
use log::info;
use shared::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Movement packets per second
    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    /// Seed for the autopilot
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let client = Client::connect(&args.server, args.tick_rate, args.seed).await?;
    let view = client.run().await?;

    if let Some(text) = view.game_over_text() {
        info!("Last result: {}", text);
    }
    info!("Disconnected");

    Ok(())
}
