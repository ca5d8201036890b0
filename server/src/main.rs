use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use server::config::ServerConfig;
use server::server::{notify_autohost_fatal, GameServer};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Lockstep core server")]
struct Args {
    /// Path to the JSON configuration file
    #[clap(short, long, default_value = "server.json")]
    config: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("RUST_LOG not set; defaulting to no log output. Try RUST_LOG=info.");
    }

    let args = Args::parse();

    let config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("node {} starting on {}:{}", config.node_id.as_deref().unwrap_or("?"), config.host, config.port);

    let server = match GameServer::new(&config) {
        Ok(server) => server,
        Err(e) => {
            notify_autohost_fatal(&config, &e.to_string());
            return ExitCode::FAILURE;
        }
    };

    server.run(config);
    ExitCode::SUCCESS
}
