//! Audio mixer control through PulseAudio.

pub mod buttons;
pub mod client;

use crate::button::Button;
use crate::config::schema::{ButtonConfig, ConnectionConfig, LABEL};
use crate::connection::{ConnectionConfigProvider, ConnectionManager};
use crate::error::Result;
use crate::factory::{resolve_connection, ButtonFactory};
use buttons::ToggleMuteButton;
use client::{MuteTarget, PulseClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const CONNECTION_TYPE: &str = "pulse";
pub const TOGGLE_MUTE_BUTTON_TYPE: &str = "pulse.ToggleMute";

const SERVER: &str = "server";
const SINK: &str = "sink";
const SOURCE: &str = "source";
const SINK_INPUT: &str = "sinkInput";
const SOURCE_OUTPUT: &str = "sourceOutput";

pub struct PulseButtonFactory {
    connections: ConnectionManager<Arc<PulseClient>>,
}

impl PulseButtonFactory {
    /// The legacy connection is always the local default server.
    pub fn new(provider: Arc<dyn ConnectionConfigProvider>, stop: &CancellationToken) -> Self {
        let clients = stop.clone();
        let mut connections = ConnectionManager::new(CONNECTION_TYPE, provider, move |name, config| {
            create_client(name, config, &clients)
        });
        connections.set_legacy(PulseClient::open(None, stop));
        Self { connections }
    }

    fn create_toggle_mute_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let Some(target) = mute_target(config) else {
            warn!("a {TOGGLE_MUTE_BUTTON_TYPE} button must have a sink, source, sinkInput or sourceOutput field");
            return None;
        };
        let label = config.string_or_default(LABEL);
        let client = resolve_connection(&self.connections, config, TOGGLE_MUTE_BUTTON_TYPE)?;
        Some(ToggleMuteButton::new(client, target, label))
    }
}

/// The first configured of sink, source, sink input and source output.
fn mute_target(config: &ButtonConfig) -> Option<MuteTarget> {
    config
        .string(SINK)
        .map(MuteTarget::sink)
        .or_else(|| config.string(SOURCE).map(MuteTarget::source))
        .or_else(|| config.string(SINK_INPUT).map(MuteTarget::sink_input))
        .or_else(|| config.string(SOURCE_OUTPUT).map(MuteTarget::source_output))
}

fn create_client(_name: &str, config: &ConnectionConfig, stop: &CancellationToken) -> Result<Arc<PulseClient>> {
    Ok(PulseClient::open(config.string(SERVER).as_deref(), stop))
}

impl ButtonFactory for PulseButtonFactory {
    fn create_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        match config.kind()? {
            TOGGLE_MUTE_BUTTON_TYPE => self.create_toggle_mute_button(config),
            _ => None,
        }
    }

    fn close(&self) {
        self.connections.for_each(|client| client.close());
    }
}
