use clap::Parser;
use hamdeck::daemon::{self, Options};
use hamdeck::mqtt::LegacyBroker;
use hamdeck::render::canvas::parse_hex_color;
use hamdeck::render::Theme;
use std::fs::File;
use std::path::PathBuf;
use tiny_skia::Color;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Control your ham radio station with a Stream Deck
#[derive(Parser)]
#[command(name = "hamdeck", version, about)]
struct Cli {
    /// Serial number of the Stream Deck to use (default: the first one found).
    #[arg(long)]
    serial: Option<String>,

    /// Initial brightness of the Stream Deck in percent.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    brightness: u8,

    /// Configuration file (default: ~/.config/hamradio/hamdeck.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address of the rigctld server; without it hamlib buttons need a named connection.
    #[arg(long, default_value = "")]
    hamlib: String,

    /// Address of the TCI server; without it tci buttons need a named connection.
    #[arg(long, default_value = "")]
    tci: String,

    /// Address of the MQTT broker; without it mqtt buttons need a named connection.
    #[arg(long, default_value = "")]
    mqtt: String,

    #[arg(long, default_value = "")]
    mqtt_username: String,

    #[arg(long, default_value = "")]
    mqtt_password: String,

    /// Font file for button labels.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Directory with icon assets (volume_up.png, volume_off.png).
    #[arg(long)]
    icons: Option<PathBuf>,

    /// Button background color (#rgb or #rrggbb).
    #[arg(long, value_parser = parse_color)]
    background: Option<Color>,

    /// Button label color (#rgb or #rrggbb).
    #[arg(long, value_parser = parse_color)]
    foreground: Option<Color>,

    /// Enable JSON log output (for journald).
    #[arg(long)]
    json: bool,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn parse_color(value: &str) -> Result<Color, String> {
    parse_hex_color(value).map_err(|e| e.to_string())
}

impl Cli {
    fn theme(&self) -> Theme {
        let mut theme = Theme::default();
        if let Some(background) = self.background {
            theme.background = background;
        }
        if let Some(foreground) = self.foreground {
            theme.foreground = foreground;
        }
        theme.font.clone_from(&self.font);
        theme.icon_dir.clone_from(&self.icons);
        theme
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hamdeck=info"));
    if cli.json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    info!("hamdeck v{}", env!("CARGO_PKG_VERSION"));

    if cli.check {
        let path = daemon::config_path(cli.config.clone())?;
        let summary = hamdeck::config::summarize(File::open(&path)?)?;
        println!(
            "config OK: {} connections, {} pages, {} total buttons",
            summary.connections, summary.pages, summary.buttons,
        );
        return Ok(());
    }

    let options = Options {
        serial: cli.serial.clone(),
        brightness: cli.brightness,
        config: cli.config.clone(),
        hamlib: cli.hamlib.clone(),
        tci: cli.tci.clone(),
        mqtt: LegacyBroker {
            address: cli.mqtt.clone(),
            username: cli.mqtt_username.clone(),
            password: cli.mqtt_password.clone(),
        },
        theme: cli.theme(),
    };

    let stop = CancellationToken::new();
    daemon::watch_shutdown_signals(stop.clone());
    daemon::run(options, stop).await?;

    info!("hamdeck stopped");
    Ok(())
}
