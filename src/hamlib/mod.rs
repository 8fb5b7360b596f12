//! Radio control through a rigctld daemon.

pub mod buttons;
pub mod client;

use crate::bandplan::Band;
use crate::button::Button;
use crate::config::schema::{ButtonConfig, ConnectionConfig, LABEL};
use crate::connection::{ConnectionConfigProvider, ConnectionManager};
use crate::error::{DeckError, Result};
use crate::factory::{required_string, resolve_connection, ButtonFactory};
use buttons::{
    MoxButton, SetButton, SetModeButton, SetPowerLevelButton, SetVfoButton, SwitchToBandButton, ToggleModeButton,
};
use client::HamlibClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const CONNECTION_TYPE: &str = "hamlib";

pub const SET_MODE_BUTTON_TYPE: &str = "hamlib.SetMode";
pub const TOGGLE_MODE_BUTTON_TYPE: &str = "hamlib.ToggleMode";
pub const SET_BUTTON_TYPE: &str = "hamlib.Set";
pub const SET_POWER_LEVEL_BUTTON_TYPE: &str = "hamlib.SetPowerLevel";
pub const MOX_BUTTON_TYPE: &str = "hamlib.MOX";
pub const SET_VFO_BUTTON_TYPE: &str = "hamlib.SetVFO";
pub const SWITCH_TO_BAND_BUTTON_TYPE: &str = "hamlib.SwitchToBand";

const ADDRESS: &str = "address";
const COMMAND: &str = "command";
const ARGS: &str = "args";
const MODE: &str = "mode";
const MODE1: &str = "mode1";
const LABEL1: &str = "label1";
const MODE2: &str = "mode2";
const LABEL2: &str = "label2";
const BANDWIDTH: &str = "bandwidth";
const VALUE: &str = "value";
const VFO: &str = "vfo";
const BAND: &str = "band";
const USE_UP_DOWN: &str = "use_up_down";

pub struct HamlibButtonFactory {
    connections: ConnectionManager<Arc<HamlibClient>>,
}

impl HamlibButtonFactory {
    /// `legacy_address` is the command line connection; empty means none.
    pub fn new(provider: Arc<dyn ConnectionConfigProvider>, legacy_address: &str, stop: &CancellationToken) -> Self {
        let clients = stop.clone();
        let mut connections = ConnectionManager::new(CONNECTION_TYPE, provider, move |name, config| {
            create_client(name, config, &clients)
        });
        if !legacy_address.is_empty() {
            connections.set_legacy(HamlibClient::open(legacy_address, stop));
        }
        Self { connections }
    }

    fn client(&self, config: &ButtonConfig, button_type: &str) -> Option<Arc<HamlibClient>> {
        resolve_connection(&self.connections, config, button_type)
    }

    fn create_set_mode_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let mode = required_string(config, SET_MODE_BUTTON_TYPE, MODE)?;
        let bandwidth = config.int(BANDWIDTH).unwrap_or(0);
        let label = config.string_or_default(LABEL);
        let client = self.client(config, SET_MODE_BUTTON_TYPE)?;
        Some(SetModeButton::new(client, mode, bandwidth, label))
    }

    fn create_toggle_mode_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (Some(mode1), Some(mode2)) = (config.string(MODE1), config.string(MODE2)) else {
            warn!("a {TOGGLE_MODE_BUTTON_TYPE} button must have mode1 and mode2 fields");
            return None;
        };
        let labels = [config.string_or_default(LABEL1), config.string_or_default(LABEL2)];
        let client = self.client(config, TOGGLE_MODE_BUTTON_TYPE)?;
        Some(ToggleModeButton::new(client, [mode1, mode2], labels))
    }

    fn create_set_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (Some(command), Some(label)) = (config.string(COMMAND), config.string(LABEL)) else {
            warn!("a {SET_BUTTON_TYPE} button must have command and label fields");
            return None;
        };
        let args = config.string_array(ARGS).unwrap_or_default();
        let client = self.client(config, SET_BUTTON_TYPE)?;
        Some(SetButton::new(client, label, command, args))
    }

    fn create_set_power_level_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (Some(value), Some(label)) = (config.float(VALUE), config.string(LABEL)) else {
            warn!("a {SET_POWER_LEVEL_BUTTON_TYPE} button must have value and label fields");
            return None;
        };
        let client = self.client(config, SET_POWER_LEVEL_BUTTON_TYPE)?;
        Some(SetPowerLevelButton::new(client, label, value))
    }

    fn create_mox_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let label = config.string(LABEL).unwrap_or_else(|| "MOX".to_string());
        let client = self.client(config, MOX_BUTTON_TYPE)?;
        Some(MoxButton::new(client, label))
    }

    fn create_set_vfo_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let (Some(vfo), Some(label)) = (config.string(VFO), config.string(LABEL)) else {
            warn!("a {SET_VFO_BUTTON_TYPE} button must have vfo and label fields");
            return None;
        };
        let client = self.client(config, SET_VFO_BUTTON_TYPE)?;
        Some(SetVfoButton::new(client, label, vfo))
    }

    fn create_switch_to_band_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let name = required_string(config, SWITCH_TO_BAND_BUTTON_TYPE, BAND)?;
        let Some(band) = Band::by_name(&name) else {
            warn!("cannot create {SWITCH_TO_BAND_BUTTON_TYPE} button: no band {name} in the IARU Region 1 band plan");
            return None;
        };
        let use_up_down = config.bool(USE_UP_DOWN).unwrap_or(false);
        let client = self.client(config, SWITCH_TO_BAND_BUTTON_TYPE)?;
        Some(SwitchToBandButton::new(client, band, config.string_or_default(LABEL), use_up_down))
    }
}

fn create_client(name: &str, config: &ConnectionConfig, stop: &CancellationToken) -> Result<Arc<HamlibClient>> {
    let address = config.string(ADDRESS).ok_or_else(|| {
        DeckError::Config(format!("no address defined for hamlib connection {name}"))
    })?;
    Ok(HamlibClient::open(&address, stop))
}

impl ButtonFactory for HamlibButtonFactory {
    fn create_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        match config.kind()? {
            SET_MODE_BUTTON_TYPE => self.create_set_mode_button(config),
            TOGGLE_MODE_BUTTON_TYPE => self.create_toggle_mode_button(config),
            SET_BUTTON_TYPE => self.create_set_button(config),
            SET_POWER_LEVEL_BUTTON_TYPE => self.create_set_power_level_button(config),
            MOX_BUTTON_TYPE => self.create_mox_button(config),
            SET_VFO_BUTTON_TYPE => self.create_set_vfo_button(config),
            SWITCH_TO_BAND_BUTTON_TYPE => self.create_switch_to_band_button(config),
            _ => None,
        }
    }

    fn close(&self) {
        self.connections.for_each(|client| client.close());
    }
}
