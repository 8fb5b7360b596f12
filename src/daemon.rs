use crate::config;
use crate::deck::Deck;
use crate::device::{Device, StreamDeckDevice};
use crate::error::{DeckError, Result};
use crate::hamlib::HamlibButtonFactory;
use crate::mqtt::{LegacyBroker, MqttButtonFactory};
use crate::pulse::PulseButtonFactory;
use crate::render::Theme;
use crate::tci::TciButtonFactory;
use std::fs::File;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything the daemon needs from the command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Serial of the Stream Deck to use; the first one if `None`.
    pub serial: Option<String>,
    pub brightness: u8,
    /// Configuration file; the default location if `None`.
    pub config: Option<PathBuf>,
    pub hamlib: String,
    pub tci: String,
    pub mqtt: LegacyBroker,
    pub theme: Theme,
}

/// The configuration file to read.
///
/// # Errors
/// Returns `DeckError::Config` if no file is given and the default location
/// cannot be resolved.
pub fn config_path(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => {
            let path = config::default_path()?;
            info!("using default configuration file {}", path.display());
            Ok(path)
        }
    }
}

/// Run the deck until `stop` is cancelled or the device goes away.
///
/// # Errors
/// Returns `DeckError` if the device cannot be opened, the configuration
/// cannot be read, or the deck loop fails.
pub async fn run(options: Options, stop: CancellationToken) -> Result<()> {
    let mut device = StreamDeckDevice::open(options.serial.as_deref())?;
    info!(
        "using Stream Deck {} {}x{} {}",
        device.id(),
        device.columns(),
        device.rows(),
        device.serial()
    );
    info!("firmware version {}", device.firmware_version());
    if let Err(e) = device.set_brightness(options.brightness) {
        warn!("cannot set brightness: {e}");
    }

    let mut deck = Deck::new(Box::new(device), options.theme);
    let connections = deck.connections();
    deck.register_factory(Box::new(PulseButtonFactory::new(connections.clone(), &stop)));
    deck.register_factory(Box::new(HamlibButtonFactory::new(
        connections.clone(),
        &options.hamlib,
        &stop,
    )));
    deck.register_factory(Box::new(TciButtonFactory::new(connections.clone(), &options.tci, &stop)));
    deck.register_factory(Box::new(MqttButtonFactory::new(connections, &options.mqtt, &stop)));

    let result = match configure(&mut deck, options.config) {
        Ok(()) => deck.run(stop).await,
        Err(e) => Err(e),
    };

    info!("closing device");
    match deck.close() {
        Ok(()) => info!("device closed"),
        Err(e) => warn!("cannot close Stream Deck: {e}"),
    }
    result
}

fn configure(deck: &mut Deck, config: Option<PathBuf>) -> Result<()> {
    let path = config_path(config)?;
    let file = File::open(&path).map_err(|e| {
        DeckError::Config(format!("cannot open configuration file {}: {e}", path.display()))
    })?;
    deck.read_config(file)?;
    deck.close_unused_factories();
    Ok(())
}

/// Cancel `stop` on the first SIGINT, SIGTERM, SIGHUP or SIGQUIT; exit on the
/// second one if the shutdown did not finish by then.
pub fn watch_shutdown_signals(stop: CancellationToken) {
    tokio::spawn(async move {
        let mut rude = false;
        loop {
            if let Err(e) = shutdown_signal().await {
                error!("cannot listen for shutdown signals: {e}");
                return;
            }
            if rude {
                error!("graceful shutdown failed");
                std::process::exit(1);
            }
            info!("shutting down");
            rude = true;
            stop.cancel();
        }
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
        _ = hangup.recv() => Ok(()),
        _ = quit.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_path_wins() {
        let path = config_path(Some(PathBuf::from("/tmp/deck.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/deck.json"));
    }
}
