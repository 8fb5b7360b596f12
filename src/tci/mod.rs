//! SDR transceiver control through the TCI WebSocket protocol.

pub mod buttons;
pub mod client;
pub mod protocol;

use crate::bandplan::Band;
use crate::button::Button;
use crate::config::schema::{ButtonConfig, ConnectionConfig, LABEL};
use crate::connection::{ConnectionConfigProvider, ConnectionManager};
use crate::error::{DeckError, Result};
use crate::factory::{required_string, resolve_connection, ButtonFactory};
use buttons::{
    IncrementDriveButton, IncrementVolumeButton, MuteButton, SetDriveButton, SetFilterButton, SetModeButton,
    SwitchToBandButton, ToggleModeButton, Transmit, TransmitButton,
};
use client::TciClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const CONNECTION_TYPE: &str = "tci";

pub const SET_MODE_BUTTON_TYPE: &str = "tci.SetMode";
pub const TOGGLE_MODE_BUTTON_TYPE: &str = "tci.ToggleMode";
pub const SET_FILTER_BUTTON_TYPE: &str = "tci.SetFilter";
pub const MOX_BUTTON_TYPE: &str = "tci.MOX";
pub const TUNE_BUTTON_TYPE: &str = "tci.Tune";
pub const MUTE_BUTTON_TYPE: &str = "tci.Mute";
pub const SET_DRIVE_BUTTON_TYPE: &str = "tci.SetDrive";
pub const INCREMENT_DRIVE_BUTTON_TYPE: &str = "tci.IncrementDrive";
pub const INCREMENT_VOLUME_BUTTON_TYPE: &str = "tci.IncrementVolume";
pub const SWITCH_TO_BAND_BUTTON_TYPE: &str = "tci.SwitchToBand";

const ADDRESS: &str = "address";
const MODE: &str = "mode";
const MODE1: &str = "mode1";
const LABEL1: &str = "label1";
const MODE2: &str = "mode2";
const LABEL2: &str = "label2";
const BOTTOM_FREQUENCY: &str = "bottom_frequency";
const TOP_FREQUENCY: &str = "top_frequency";
const ICON: &str = "icon";
const VALUE: &str = "value";
const INCREMENT: &str = "increment";
const BAND: &str = "band";
const TRX: &str = "trx";

const DEFAULT_FILTER_ICON: &str = "filter";

pub struct TciButtonFactory {
    connections: ConnectionManager<Arc<TciClient>>,
}

impl TciButtonFactory {
    /// `legacy_address` is the command line connection; empty means none.
    /// Cancelling `stop` shuts down every client of this factory.
    pub fn new(provider: Arc<dyn ConnectionConfigProvider>, legacy_address: &str, stop: &CancellationToken) -> Self {
        let clients = stop.clone();
        let mut connections = ConnectionManager::new(CONNECTION_TYPE, provider, move |name, config| {
            create_client(name, config, &clients)
        });
        if !legacy_address.is_empty() {
            connections.set_legacy(TciClient::open(legacy_address, stop));
        }
        Self { connections }
    }

    fn client(&self, config: &ButtonConfig, button_type: &str) -> Option<Arc<TciClient>> {
        resolve_connection(&self.connections, config, button_type)
    }

    fn create_set_mode_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let mode = required_string(config, SET_MODE_BUTTON_TYPE, MODE)?;
        let mode = mode.trim().to_lowercase();
        let client = self.client(config, SET_MODE_BUTTON_TYPE)?;
        Some(SetModeButton::new(client, trx(config), mode, config.string_or_default(LABEL)))
    }

    fn create_toggle_mode_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (Some(mode1), Some(mode2)) = (config.string(MODE1), config.string(MODE2)) else {
            warn!("a {TOGGLE_MODE_BUTTON_TYPE} button must have mode1 and mode2 fields");
            return None;
        };
        let modes = [mode1.trim().to_lowercase(), mode2.trim().to_lowercase()];
        let labels = [config.string_or_default(LABEL1), config.string_or_default(LABEL2)];
        let client = self.client(config, TOGGLE_MODE_BUTTON_TYPE)?;
        Some(ToggleModeButton::new(client, trx(config), modes, labels))
    }

    fn create_set_filter_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let fields = (config.int(BOTTOM_FREQUENCY), config.int(TOP_FREQUENCY), config.string(LABEL));
        let (Some(bottom), Some(top), Some(label)) = fields else {
            warn!("a {SET_FILTER_BUTTON_TYPE} button must have bottom_frequency, top_frequency and label fields");
            return None;
        };
        let icon = config.string(ICON).unwrap_or_else(|| DEFAULT_FILTER_ICON.to_string());
        let client = self.client(config, SET_FILTER_BUTTON_TYPE)?;
        Some(SetFilterButton::new(client, trx(config), (bottom, top), label, &icon))
    }

    fn create_transmit_button(&self, config: &ButtonConfig, kind: Transmit) -> Option<Arc<dyn Button>> {
        let button_type = match kind {
            Transmit::Mox => MOX_BUTTON_TYPE,
            Transmit::Tune => TUNE_BUTTON_TYPE,
        };
        let client = self.client(config, button_type)?;
        Some(TransmitButton::new(client, kind, trx(config), config.string_or_default(LABEL)))
    }

    fn create_mute_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let client = self.client(config, MUTE_BUTTON_TYPE)?;
        Some(MuteButton::new(client, config.string_or_default(LABEL)))
    }

    fn create_set_drive_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (Some(value), Some(label)) = (config.int(VALUE), config.string(LABEL)) else {
            warn!("a {SET_DRIVE_BUTTON_TYPE} button must have value and label fields");
            return None;
        };
        let client = self.client(config, SET_DRIVE_BUTTON_TYPE)?;
        Some(SetDriveButton::new(client, label, value))
    }

    fn create_increment_drive_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (increment, label) = increment_fields(config, INCREMENT_DRIVE_BUTTON_TYPE)?;
        let client = self.client(config, INCREMENT_DRIVE_BUTTON_TYPE)?;
        Some(IncrementDriveButton::new(client, label, increment))
    }

    fn create_increment_volume_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (increment, label) = increment_fields(config, INCREMENT_VOLUME_BUTTON_TYPE)?;
        let client = self.client(config, INCREMENT_VOLUME_BUTTON_TYPE)?;
        Some(IncrementVolumeButton::new(client, label, increment))
    }

    fn create_switch_to_band_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let name = required_string(config, SWITCH_TO_BAND_BUTTON_TYPE, BAND)?;
        let Some(band) = Band::by_name(&name) else {
            warn!("cannot create {SWITCH_TO_BAND_BUTTON_TYPE} button: no band {name} in the IARU Region 1 band plan");
            return None;
        };
        let client = self.client(config, SWITCH_TO_BAND_BUTTON_TYPE)?;
        Some(SwitchToBandButton::new(client, trx(config), band, config.string_or_default(LABEL)))
    }
}

/// The transceiver a button controls; the first one unless configured.
fn trx(config: &ButtonConfig) -> i64 {
    config.int(TRX).unwrap_or(0)
}

/// Non-zero `increment` and `label` of the increment buttons.
fn increment_fields(config: &ButtonConfig, button_type: &str) -> Option<(i64, String)> {
    match (config.int(INCREMENT), config.string(LABEL)) {
        (Some(0), Some(_)) => {
            warn!("the increment of a {button_type} button must not be 0");
            None
        }
        (Some(increment), Some(label)) => Some((increment, label)),
        _ => {
            warn!("a {button_type} button must have increment and label fields");
            None
        }
    }
}

fn create_client(name: &str, config: &ConnectionConfig, stop: &CancellationToken) -> Result<Arc<TciClient>> {
    let address = config.string(ADDRESS).ok_or_else(|| {
        DeckError::Config(format!("no address defined for tci connection {name}"))
    })?;
    Ok(TciClient::open(&address, stop))
}

impl ButtonFactory for TciButtonFactory {
    fn create_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        match config.kind()? {
            SET_MODE_BUTTON_TYPE => self.create_set_mode_button(config),
            TOGGLE_MODE_BUTTON_TYPE => self.create_toggle_mode_button(config),
            SET_FILTER_BUTTON_TYPE => self.create_set_filter_button(config),
            MOX_BUTTON_TYPE => self.create_transmit_button(config, Transmit::Mox),
            TUNE_BUTTON_TYPE => self.create_transmit_button(config, Transmit::Tune),
            MUTE_BUTTON_TYPE => self.create_mute_button(config),
            SET_DRIVE_BUTTON_TYPE => self.create_set_drive_button(config),
            INCREMENT_DRIVE_BUTTON_TYPE => self.create_increment_drive_button(config),
            INCREMENT_VOLUME_BUTTON_TYPE => self.create_increment_volume_button(config),
            SWITCH_TO_BAND_BUTTON_TYPE => self.create_switch_to_band_button(config),
            _ => None,
        }
    }

    fn close(&self) {
        self.connections.for_each(|client| client.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connections;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn record(value: Value) -> ButtonConfig {
        match value {
            Value::Object(fields) => ButtonConfig::new(fields),
            _ => unreachable!(),
        }
    }

    fn factory(connections: Connections, legacy_address: &str) -> TciButtonFactory {
        TciButtonFactory::new(Arc::new(connections), legacy_address, &CancellationToken::new())
    }

    #[tokio::test]
    async fn creates_all_button_types() {
        let factory = factory(Connections::default(), "127.0.0.1:1");
        let configs = [
            json!({"type": "tci.SetMode", "mode": " USB "}),
            json!({"type": "tci.ToggleMode", "mode1": "USB", "mode2": "CW", "label1": "Voice"}),
            json!({"type": "tci.SetFilter", "bottom_frequency": 300, "top_frequency": 2700, "label": "2.4k"}),
            json!({"type": "tci.MOX", "trx": 1}),
            json!({"type": "tci.Tune"}),
            json!({"type": "tci.Mute", "label": "RX"}),
            json!({"type": "tci.SetDrive", "value": "50", "label": "50%"}),
            json!({"type": "tci.IncrementDrive", "increment": 10, "label": "Drive+"}),
            json!({"type": "tci.IncrementVolume", "increment": -6, "label": "Vol-"}),
            json!({"type": "tci.SwitchToBand", "band": "40m"}),
        ];
        for config in configs {
            assert!(factory.create_button(&record(config.clone())).is_some(), "{config}");
        }
        factory.close();
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let factory = factory(Connections::default(), "127.0.0.1:1");
        let configs = [
            json!({"type": "tci.SetMode", "label": "USB"}),
            json!({"type": "tci.ToggleMode", "mode1": "USB"}),
            json!({"type": "tci.SetFilter", "bottom_frequency": 300, "top_frequency": 2700}),
            json!({"type": "tci.SetFilter", "top_frequency": 2700, "label": "2.4k"}),
            json!({"type": "tci.SetDrive", "value": 50}),
            json!({"type": "tci.SetDrive", "label": "50%"}),
            json!({"type": "tci.IncrementDrive", "label": "+"}),
            json!({"type": "tci.IncrementDrive", "increment": 0, "label": "+"}),
            json!({"type": "tci.IncrementVolume", "increment": 1}),
            json!({"type": "tci.SwitchToBand", "label": "40"}),
            json!({"type": "tci.SwitchToBand", "band": "11m"}),
        ];
        for config in configs {
            assert!(factory.create_button(&record(config.clone())).is_none(), "{config}");
        }
        factory.close();
    }

    #[tokio::test]
    async fn named_connections_need_an_address() {
        let connections = Connections::default();
        let mut table = HashMap::new();
        table.insert(
            ("sdr".to_string(), CONNECTION_TYPE.to_string()),
            record(json!({"type": "tci", "address": "127.0.0.1:1"})),
        );
        table.insert(
            ("broken".to_string(), CONNECTION_TYPE.to_string()),
            record(json!({"type": "tci"})),
        );
        connections.replace(table);
        let factory = factory(connections, "");

        let named = record(json!({"type": "tci.MOX", "connection": "sdr"}));
        assert!(factory.create_button(&named).is_some());
        assert!(factory
            .create_button(&record(json!({"type": "tci.MOX", "connection": "broken"})))
            .is_none());
        assert!(factory.create_button(&record(json!({"type": "tci.MOX"}))).is_none());
        factory.close();
    }

    #[tokio::test]
    async fn stopping_the_daemon_closes_the_clients() {
        let stop = CancellationToken::new();
        let factory = TciButtonFactory::new(Arc::new(Connections::default()), "127.0.0.1:1", &stop);
        stop.cancel();
        let mut closed = Vec::new();
        factory.connections.for_each(|client| closed.push(client.is_closed()));
        assert_eq!(closed, vec![true]);
    }
}
