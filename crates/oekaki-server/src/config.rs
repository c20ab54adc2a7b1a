//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use oekaki_types::{DEFAULT_TILE_SIZE, TileGeometry};

/// Default port when nothing else is configured.
pub const DEFAULT_PORT: u16 = 4287;

/// Port used when `OEKAKI_ENV=development`.
pub const DEVELOPMENT_PORT: u16 = 3001;

/// How often the write queue is drained to disk.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Server configuration, constructed once at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory holding one raw file per chunk, created if absent.
    pub chunks_dir: PathBuf,
    pub geometry: TileGeometry,
    pub flush_interval: Duration,
}

impl ServerConfig {
    /// Production defaults, listening on all interfaces.
    pub fn production(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            chunks_dir: PathBuf::from("paint_chunks"),
            geometry: TileGeometry::new(DEFAULT_TILE_SIZE),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Loopback config with a caller-owned chunk directory (for testing).
    pub fn ephemeral(chunks_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            chunks_dir: chunks_dir.into(),
            geometry: TileGeometry::new(DEFAULT_TILE_SIZE),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Defaults with environment overrides applied.
    ///
    /// `PORT` sets the port (else `OEKAKI_ENV=development` selects the
    /// development port), `OEKAKI_CHUNKS_DIR` the chunk directory.
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| {
                if std::env::var("OEKAKI_ENV").as_deref() == Ok("development") {
                    DEVELOPMENT_PORT
                } else {
                    DEFAULT_PORT
                }
            });
        let mut config = Self::production(port);
        if let Ok(dir) = std::env::var("OEKAKI_CHUNKS_DIR") {
            config.chunks_dir = PathBuf::from(dir);
        }
        config
    }
}
