//! oekaki server binary.
//!
//! ## Usage
//!
//! ```bash
//! oekaki-server [OPTIONS]
//! ```
//!
//! Environment: `PORT` overrides the listen port, `OEKAKI_CHUNKS_DIR` the
//! chunk directory, `OEKAKI_ENV=development` selects the development port.

use std::env;
use std::process::ExitCode;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use oekaki_server::{Server, ServerConfig};
use oekaki_types::TileGeometry;

fn print_usage() {
    eprintln!(
        r#"oekaki-server - shared canvas sync server

USAGE:
    oekaki-server [OPTIONS] [PORT]

OPTIONS:
    --port <PORT>           Listen port (default: {port}, or $PORT)
    --chunks-dir <DIR>      Chunk storage directory (default: paint_chunks, or $OEKAKI_CHUNKS_DIR)
    --tile-size <PIXELS>    Tile edge length in pixels (default: 64)
    --help, -h              Show this help
"#,
        port = oekaki_server::DEFAULT_PORT,
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ServerConfig::from_env();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "--port" => {
                let Some(port) = args.get(i + 1).and_then(|s| s.parse().ok()) else {
                    eprintln!("--port requires a port number");
                    return ExitCode::FAILURE;
                };
                config.bind_addr.set_port(port);
                i += 2;
            }
            "--chunks-dir" => {
                let Some(dir) = args.get(i + 1) else {
                    eprintln!("--chunks-dir requires a path");
                    return ExitCode::FAILURE;
                };
                config.chunks_dir = dir.into();
                i += 2;
            }
            "--tile-size" => {
                let Some(size) = args.get(i + 1).and_then(|s| s.parse().ok()) else {
                    eprintln!("--tile-size requires a pixel count");
                    return ExitCode::FAILURE;
                };
                config.geometry = TileGeometry::new(size);
                i += 2;
            }
            arg => {
                // Bare port number for backwards compatibility.
                if let Ok(port) = arg.parse::<u16>() {
                    config.bind_addr.set_port(port);
                    i += 1;
                    continue;
                }
                eprintln!("Unknown argument: {arg}");
                print_usage();
                return ExitCode::FAILURE;
            }
        }
    }

    tracing::info!(
        addr = %config.bind_addr,
        tile_size = config.geometry.tile_size(),
        "starting oekaki server"
    );

    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
