//! dconfig daemon - serves configuration resources over D-Bus until interrupted.

use std::{error::Error, path::PathBuf};

use clap::Parser;
use dconfig::{
    bus,
    center::ConfigCenter,
    settings::{BusKind, DaemonSettings, SettingsPaths},
    tracing_config,
};
use tracing::{Level, info, span};

#[derive(Parser)]
#[command(name = "dconfig-daemon")]
#[command(about = "Shared configuration distribution daemon")]
struct Cli {
    /// Settings file, defaults to $XDG_CONFIG_HOME/dconfig/daemon.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schema search root, highest precedence first; repeatable
    #[arg(short, long = "root")]
    roots: Vec<PathBuf>,

    /// Directory prepended to every root and the cache directory
    #[arg(long)]
    local_prefix: Option<PathBuf>,

    /// Directory of the per-user cache layers
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Grace window in milliseconds before unreferenced resources are released
    #[arg(short, long)]
    delay_release_ms: Option<u64>,

    /// Bus to serve on
    #[arg(short, long, value_enum)]
    bus: Option<BusKind>,

    /// Also write logs to daily rotated files
    #[arg(long)]
    log_file: bool,
}

impl Cli {
    fn apply(self, settings: &mut DaemonSettings) {
        if !self.roots.is_empty() {
            settings.search_roots = self.roots;
        }
        if self.local_prefix.is_some() {
            settings.local_prefix = self.local_prefix;
        }
        if self.cache_dir.is_some() {
            settings.cache_dir = self.cache_dir;
        }
        if let Some(delay) = self.delay_release_ms {
            settings.delay_release_ms = delay;
        }
        if let Some(bus) = self.bus {
            settings.bus = bus;
        }
        settings.log_to_file |= self.log_file;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut settings = DaemonSettings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);

    let _log_guard = if settings.log_to_file {
        Some(tracing_config::init_with_file(&SettingsPaths::log_dir()?)?)
    } else {
        tracing_config::init()?;
        None
    };

    let _span = span!(Level::INFO, "dconfig_daemon").entered();
    info!("Starting configuration daemon");

    let center = ConfigCenter::new(&settings)?;
    let _connection = bus::serve(center, settings.bus).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
